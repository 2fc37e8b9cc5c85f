//! Integration tests for floppyemu

use floppyemu::controller::i8271::{completion_type, REG_DRIVE_CONTROL_OUTPUT};
use floppyemu::*;

const DRIVE_0: u8 = 0x40;

/// 40 track single-sided drives with a 16 x 256 byte dump in drive 0
fn bbc_system() -> FloppySystem {
    let config = SystemConfig::bbc_micro().with_drives(vec![DriveConfig::ss_40(); 2]);
    let mut system = FloppySystem::new(config);
    let geometry = BasicDskGeometry::new(40, 1, 16, 256, 1);
    let image = BasicDsk::blank(geometry, 0xE5).expect("Failed to create image");
    system.insert(0, Box::new(image)).expect("Failed to insert image");
    system
}

fn issue(system: &mut FloppySystem, command: u8, params: &[u8]) {
    system.write_register(0, command);
    for &p in params {
        system.write_register(1, p);
    }
}

fn load_head(system: &mut FloppySystem) {
    issue(system, DRIVE_0 | 0x3A, &[REG_DRIVE_CONTROL_OUTPUT, 0x08]);
}

fn wait_irq(system: &mut FloppySystem) -> u8 {
    let lines = system.run_until_request(system.now() + 1_000_000);
    assert!(lines.irq, "controller did not interrupt");
    system.read_register(1)
}

/// Read bytes on every DRQ until the completion interrupt
fn collect_read(system: &mut FloppySystem) -> (Vec<u8>, u8) {
    let mut data = Vec::new();
    loop {
        let lines = system.run_until_request(system.now() + 1_000_000);
        if lines.drq {
            data.push(system.read_data());
        } else {
            assert!(lines.irq, "controller stalled after {} bytes", data.len());
            return (data, system.read_register(1));
        }
    }
}

/// Supply bytes on every DRQ until the completion interrupt
fn supply_write(system: &mut FloppySystem, data: &[u8]) -> (usize, u8) {
    let mut written = 0;
    loop {
        let lines = system.run_until_request(system.now() + 1_000_000);
        if lines.drq {
            system.write_data(data[written % data.len()]);
            written += 1;
        } else {
            assert!(lines.irq, "controller stalled after {} bytes", written);
            return (written, system.read_register(1));
        }
    }
}

#[test]
fn test_read_sector_through_registers() {
    let mut system = bbc_system();
    {
        let codec = system
            .drive_mut(0)
            .unwrap()
            .binding_mut()
            .unwrap()
            .codec_mut()
            .unwrap();
        // R=3 sits at rotational index 2
        codec.write_indexed_sector(5, 0, 2, &[0xAA; 256], false).unwrap();
    }
    load_head(&mut system);

    issue(&mut system, DRIVE_0 | 0x29, &[5]);
    assert_eq!(wait_irq(&mut system), 0);
    assert_eq!(system.drive(0).unwrap().current_track(), 5);

    let start = system.now();
    issue(&mut system, DRIVE_0 | 0x12, &[5, 3]);
    let (data, result) = collect_read(&mut system);
    assert_eq!(data.len(), 256);
    assert!(data.iter().all(|&b| b == 0xAA));
    assert_eq!(result, 0);
    assert!(!system.lines().irq);

    // one byte per data request interval at least
    assert!(system.now() - start >= 256 * 64);
}

#[test]
fn test_write_sector_through_registers() {
    let mut system = bbc_system();
    load_head(&mut system);

    issue(&mut system, DRIVE_0 | 0x29, &[7]);
    assert_eq!(wait_irq(&mut system), 0);

    issue(&mut system, DRIVE_0 | 0x0A, &[7, 9]);
    let (written, result) = supply_write(&mut system, &[0x5A]);
    assert_eq!(written, 256);
    assert_eq!(result, 0);

    let binding = system.drive_mut(0).unwrap().binding_mut().unwrap();
    assert!(binding.is_modified());
    let codec = binding.codec_mut().unwrap();
    let mut buf = [0u8; 256];
    codec.read_indexed_sector(7, 0, 8, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x5A));

    let bytes = system.eject(0).unwrap().expect("modified image returns bytes");
    let offset = (7 * 16 + 8) * 256;
    assert_eq!(bytes[offset], 0x5A);
}

#[test]
fn test_deleted_data_through_registers() {
    let mut system = bbc_system();
    load_head(&mut system);

    issue(&mut system, DRIVE_0 | 0x0E, &[0, 4]);
    let (_, result) = supply_write(&mut system, &[0x11]);
    assert_eq!(result, 0);

    // plain read reports the deleted mark
    issue(&mut system, DRIVE_0 | 0x12, &[0, 4]);
    let (data, result) = collect_read(&mut system);
    assert_eq!(data.len(), 256);
    assert_eq!(result, 0x20);

    // read-and-deleted reports it too but the data is the same
    issue(&mut system, DRIVE_0 | 0x16, &[0, 4]);
    let (again, result) = collect_read(&mut system);
    assert_eq!(again, data);
    assert_eq!(result, 0x20);

    let codec = system.drive(0).unwrap().binding().unwrap().codec();
    assert_eq!(codec.format_name(), "BasicDsk");
}

#[test]
fn test_not_ready_needs_operator() {
    let mut system = bbc_system();
    issue(&mut system, DRIVE_0 | 0x12, &[0, 1]);
    assert!(system.lines().irq);
    assert!(!system.fdc_timer_armed(FdcTimer::DataRequest));
    assert!(!system.fdc_timer_armed(FdcTimer::Complete));
    let result = system.read_register(1);
    assert_eq!(result, 0x10);
    // operator intervention
    assert_eq!(completion_type(result), 2);
}

#[test]
fn test_empty_drive_is_not_ready() {
    let mut system = bbc_system();
    issue(&mut system, 0x80 | 0x3A, &[REG_DRIVE_CONTROL_OUTPUT, 0x08]);
    assert!(!system.drive(1).unwrap().flags().ready());
    issue(&mut system, 0x80 | 0x12, &[0, 1]);
    assert_eq!(system.read_register(1), 0x10);
}

#[test]
fn test_read_drive_status_through_registers() {
    let mut system = bbc_system();
    load_head(&mut system);
    issue(&mut system, DRIVE_0 | 0x2C, &[]);
    // result without an interrupt
    assert!(!system.lines().irq);
    let status = system.read_register(1);
    assert_eq!(status & 0x04, 0x04);
    assert_eq!(status & 0x40, 0);
    assert_eq!(status & 0x02, 0x02);
}

#[test]
fn test_index_period_and_pulse() {
    let mut system = bbc_system();
    load_head(&mut system);
    let drive = system.drive(0).unwrap();
    assert_eq!(drive.index_period_us(), 200_000);
    assert_eq!(drive.index_high_us(), 10_000);
    assert!(drive.flags().index());

    let start = system.now();
    system.run_until(start + 10_000);
    assert!(!system.drive(0).unwrap().flags().index());
    system.run_until(start + 200_000);
    assert!(system.drive(0).unwrap().flags().index());
}

/// Time drive 0's index line spends high between now and `end`, sampled at
/// every event the system fires
fn index_high_time(system: &mut FloppySystem, end: Micros) -> Micros {
    let mut high = 0;
    let mut since = system.now();
    let mut level = system.drive(0).unwrap().flags().index();
    while system.step(end).is_some() {
        if level {
            high += system.now() - since;
        }
        since = system.now();
        level = system.drive(0).unwrap().flags().index();
    }
    if level {
        high += end - since;
    }
    system.run_until(end);
    high
}

#[test]
fn test_index_pulse_survives_sector_search() {
    let mut system = bbc_system();
    load_head(&mut system);
    system.run_until(50_000);

    // record 0x30 is not on the track, so the search walks two revolutions
    issue(&mut system, DRIVE_0 | 0x12, &[0, 0x30]);
    assert!(system.lines().irq);
    assert_eq!(system.read_register(1), 0x18);

    // five pulses of 10 ms in the next second
    let high = index_high_time(&mut system, 1_050_000);
    assert_eq!(high, 50_000);

    // and the phase is unchanged: rising edges stay on 200 ms boundaries
    system.run_until(1_200_000);
    assert!(system.drive(0).unwrap().flags().index());
    system.run_until(1_210_000);
    assert!(!system.drive(0).unwrap().flags().index());
}

#[test]
fn test_index_pulse_during_transfers() {
    let mut system = bbc_system();
    load_head(&mut system);
    let start = system.now();
    for sector in 1..=16 {
        issue(&mut system, DRIVE_0 | 0x12, &[0, sector]);
        let (data, result) = collect_read(&mut system);
        assert_eq!((data.len(), result), (256, 0));
    }
    let elapsed = system.now() - start;
    assert!(elapsed < 400_000);
    // the generator is still on its 200 ms grid
    let high = index_high_time(&mut system, start + 1_000_000);
    let revolutions_left = (start + 1_000_000 - system.now()) / 200_000;
    assert!(high >= revolutions_left * 10_000);
    assert!(high <= (revolutions_left + 1) * 10_000);
}

#[test]
fn test_d64_standard_image() {
    let registry = FormatRegistry::standard();
    let data = vec![0u8; 174_848];
    let hits = registry.identify(&data);
    assert_eq!(hits[0].0.name, "D64");
    assert_eq!(hits[0].1, 100);

    let mut image = registry.open(data).unwrap();
    assert_eq!(image.format_name(), "D64");
    assert_eq!(image.tracks(), 35);
    assert_eq!(image.heads(), 1);
    assert_eq!(image.sectors_per_track(0, 0), 21);
    assert_eq!(image.sectors_per_track(17, 0), 19);
    assert_eq!(image.sectors_per_track(34, 0), 17);
}

#[test]
fn test_gcr_write_track_is_unsupported() {
    let mut d64 = D64Image::blank().unwrap();
    d64.write_indexed_sector(0, 0, 0, &[0x42; 256], false).unwrap();
    let before = d64.to_bytes().unwrap();
    let track = d64.read_track(0, 0).unwrap();
    let err = d64.write_track(0, 0, &track).unwrap_err();
    assert!(err.is_unsupported());
    assert_eq!(d64.to_bytes().unwrap(), before);

    let mut g64 = G64Image::from_tracks(&[track.clone()]).unwrap();
    let before = g64.to_bytes().unwrap();
    assert!(g64.write_track(0, 0, &track).unwrap_err().is_unsupported());
    assert_eq!(g64.to_bytes().unwrap(), before);
}

#[test]
fn test_d64_in_1541_drive() {
    let config = SystemConfig::default().with_drives(vec![DriveConfig::c1541()]);
    let mut system = FloppySystem::new(config);
    system.insert(0, Box::new(D64Image::blank().unwrap())).unwrap();

    let drive = system.drive_mut(0).unwrap();
    // two half steps per track
    for bits in [1, 2, 3, 0] {
        drive.set_stepper_bits(bits);
    }
    assert_eq!(drive.cylinder(), 2);
    assert_eq!(drive.sectors_per_track(0), 21);
    let raw = drive.read_track(0).unwrap();
    assert!(!raw.is_empty());
    assert!(drive.write_track(0, &raw).unwrap_err().is_unsupported());
}

#[test]
fn test_edsk_ddam_survives_save() {
    let mut image = ImageBuilder::new().num_tracks(2).build().unwrap();
    image.write_indexed_sector(1, 0, 3, &[0x77; 512], true).unwrap();
    let bytes = image.to_bytes().unwrap();

    let registry = FormatRegistry::standard();
    let mut reopened = registry.open(bytes).unwrap();
    assert_eq!(reopened.format_name(), "EDSK");
    let info = reopened.indexed_sector_info(1, 0, 3).unwrap();
    assert!(info.flags.is_deleted());
    let mut buf = [0u8; 512];
    reopened.read_indexed_sector(1, 0, 3, &mut buf).unwrap();
    assert!(buf.iter().all(|&b| b == 0x77));
}

#[test]
fn test_save_and_reload_file() {
    let dir = std::env::temp_dir();
    let path = dir.join(format!("floppyemu_integration_{}.ssd", std::process::id()));

    let mut image = BasicDsk::blank(BasicDskGeometry::bbc_dfs_ss40(), 0xE5).unwrap();
    image.write_indexed_sector(0, 0, 1, &[0x33; 256], false).unwrap();
    save_image(&path, &image).unwrap();

    let registry = FormatRegistry::standard();
    let mut reloaded = read_image_as(&path, &registry, "BasicDsk").unwrap();
    let mut buf = [0u8; 256];
    reloaded.read_indexed_sector(0, 0, 1, &mut buf).unwrap();
    assert_eq!(buf, [0x33; 256]);

    std::fs::remove_file(&path).ok();
}

#[test]
fn test_error_handling() {
    let registry = FormatRegistry::standard();
    assert!(matches!(
        registry.open(vec![0x12; 1000]),
        Err(FloppyError::UnknownFormat(_))
    ));
    assert!(matches!(
        read_image("/nonexistent/disk.dsk", &registry),
        Err(FloppyError::Io(_))
    ));

    let mut system = bbc_system();
    assert!(system.insert(5, Box::new(D64Image::blank().unwrap())).is_err());
    assert!(system.eject(5).unwrap().is_none());
}

#[test]
fn test_sector_map_of_mounted_image() {
    let mut system = bbc_system();
    let codec = system
        .drive_mut(0)
        .unwrap()
        .binding_mut()
        .unwrap()
        .codec_mut()
        .unwrap();
    let map = render_sector_map(codec, 0, false);
    assert!(map.starts_with("=== Sector Map (Side 0) ==="));
    // header, legend, blank line, 16 rows and the axis
    assert_eq!(map.lines().count(), 3 + 16 + 1);
}
