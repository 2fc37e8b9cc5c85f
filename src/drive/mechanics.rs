//! Mechanical model of one drive slot

use crate::clock::Micros;
use crate::drive::binding::DriveImageBinding;
use crate::drive::config::{Density, DriveConfig, DriveType, SONY_ZONE_RPM, SONY_ZONE_TRACKS};
use crate::drive::DriveFlags;
use crate::error::{FloppyError, Result};
use crate::image::{ImageCodec, SectorInfo};
use log::{debug, trace};

/// Microseconds per minute
const MINUTE_US: u64 = 60_000_000;

/// Head position, motor, index generator and flags of one drive
pub struct Drive {
    id: usize,
    config: DriveConfig,
    /// Head position in stepper units
    position: u16,
    /// Last stepper phase pattern (Apple mask or 1541 two-bit value)
    stepper: u8,
    flags: DriveFlags,
    /// Rotating sector cursor on the current track
    id_index: usize,
    /// Phase of the index pulse generator
    index_high: bool,
    /// The last ID query wrapped the cursor past the index hole
    cursor_wrapped: bool,
    binding: Option<DriveImageBinding>,
}

impl Drive {
    /// Create an empty drive with the head at track 0
    pub fn new(id: usize, config: DriveConfig) -> Self {
        let mut flags = DriveFlags::default();
        flags.set(DriveFlags::HEAD_AT_TRACK_0, true);
        Self {
            id,
            config,
            position: 0,
            stepper: 0,
            flags,
            id_index: 0,
            index_high: false,
            cursor_wrapped: false,
            binding: None,
        }
    }

    /// Slot number
    pub fn id(&self) -> usize {
        self.id
    }

    /// Mechanism description
    pub fn config(&self) -> &DriveConfig {
        &self.config
    }

    /// Head position in stepper units, always below `max_track`
    pub fn current_track(&self) -> u16 {
        self.position
    }

    /// Number of head positions
    pub fn max_track(&self) -> u16 {
        self.config.max_track()
    }

    /// Whole track under the head
    pub fn cylinder(&self) -> u8 {
        (self.position / self.config.steps_per_track.max(1) as u16).min(u8::MAX as u16) as u8
    }

    /// Number of heads
    pub fn num_sides(&self) -> u8 {
        self.config.sides
    }

    /// Move the head by `delta` positions, stopping at either end
    pub fn seek(&mut self, delta: i32) {
        let max = self.max_track() as i32 - 1;
        let target = self.position as i32 + delta;
        let clamped = target.clamp(0, max);
        if clamped != target {
            trace!(
                "Drive {}: seek to {} clamped to {}",
                self.id,
                target,
                clamped
            );
        }
        self.move_head(clamped as u16);
    }

    fn move_head(&mut self, position: u16) {
        let old_cylinder = self.cylinder();
        self.position = position;
        self.flags.set(DriveFlags::HEAD_AT_TRACK_0, position == 0);
        if self.cylinder() != old_cylinder {
            self.id_index = 0;
        }
        if let Some(binding) = self.binding.as_mut() {
            binding.head_moved(position);
        }
    }

    /// Drive the Disk II phase magnets (bit n = phase n energised)
    pub fn set_stepper_phases(&mut self, phases: u8) {
        self.stepper = phases & 0x0F;
        let phase = (self.position / 2) as u8;
        let forward = 1 << ((phase + 1) % 4);
        let backward = 1 << ((phase + 3) % 4);
        if self.stepper & forward != 0 {
            self.seek(2);
        } else if self.stepper & backward != 0 {
            self.seek(-2);
        }
    }

    /// Drive the 1541 stepper with its two-bit phase value
    pub fn set_stepper_bits(&mut self, bits: u8) {
        let bits = bits & 0x03;
        if bits == self.stepper {
            return;
        }
        if bits == (self.stepper + 1) & 0x03 {
            self.seek(1);
        } else if bits == (self.stepper + 3) & 0x03 {
            self.seek(-1);
        }
        self.stepper = bits;
    }

    /// Current spindle speed
    pub fn rpm(&self) -> u16 {
        match self.config.drive_type {
            DriveType::Sony => {
                let zone = (self.cylinder() / SONY_ZONE_TRACKS) as usize;
                SONY_ZONE_RPM[zone.min(SONY_ZONE_RPM.len() - 1)]
            }
            _ => self.config.rpm,
        }
    }

    /// One revolution
    pub fn index_period_us(&self) -> Micros {
        MINUTE_US / self.rpm().max(1) as u64
    }

    /// Time the index signal stays high each revolution
    pub fn index_high_us(&self) -> Micros {
        self.index_period_us() / 20
    }

    /// Byte transfer time at a density
    pub fn byte_time_us(&self, density: Density) -> Micros {
        density.byte_time_us()
    }

    /// Switch the spindle motor
    pub fn set_motor(&mut self, on: bool) {
        if on != self.flags.motor_on() {
            debug!("Drive {}: motor {}", self.id, if on { "on" } else { "off" });
        }
        self.flags.set(DriveFlags::MOTOR_ON, on);
        if !on {
            self.index_high = false;
            self.cursor_wrapped = false;
        }
    }

    /// Is the spindle turning?
    pub fn motor_on(&self) -> bool {
        self.flags.motor_on()
    }

    /// Index timer expired; returns the delay until the next edge.
    ///
    /// The pulse phase is private to the generator, so sector ID queries
    /// never shift it.
    pub fn index_edge(&mut self) -> Option<Micros> {
        self.cursor_wrapped = false;
        if !self.motor_on() {
            self.index_high = false;
            return None;
        }
        self.index_high = !self.index_high;
        if self.index_high {
            Some(self.index_high_us())
        } else {
            Some(self.index_period_us() - self.index_high_us())
        }
    }

    /// Is the index pulse generator in its high phase?
    pub fn index_pulse(&self) -> bool {
        self.index_high
    }

    /// Did the last `get_next_sector_id` wrap back to the first sector?
    pub fn sector_cursor_wrapped(&self) -> bool {
        self.cursor_wrapped
    }

    /// Flag register; write protect reads set unless a writable image is
    /// bound. INDEX follows the pulse generator while the spindle turns and
    /// the sector cursor wrap while it is stopped.
    pub fn flags(&self) -> DriveFlags {
        let mut flags = self.flags;
        let index = if self.motor_on() {
            self.index_high
        } else {
            self.cursor_wrapped
        };
        flags.set(DriveFlags::INDEX, index);
        if !self.binding.as_ref().is_some_and(DriveImageBinding::is_writable) {
            flags.set(DriveFlags::WRITE_PROTECTED, true);
        }
        flags
    }

    /// Read one flag
    pub fn get_flag(&self, flag: u8) -> bool {
        self.flags().0 & flag != 0
    }

    /// Store one flag
    pub fn set_flag(&mut self, flag: u8, state: bool) {
        self.flags.set(flag, state);
    }

    /// Set or clear ready; with `require_media` ready only sticks when an image is bound
    pub fn set_ready_state(&mut self, state: bool, require_media: bool) {
        let ready = state && (!require_media || self.has_media());
        self.flags.set(DriveFlags::READY, ready);
    }

    /// Is an image bound?
    pub fn has_media(&self) -> bool {
        self.binding.is_some()
    }

    /// The bound image
    pub fn binding(&self) -> Option<&DriveImageBinding> {
        self.binding.as_ref()
    }

    /// The bound image, mutably
    pub fn binding_mut(&mut self) -> Option<&mut DriveImageBinding> {
        self.binding.as_mut()
    }

    /// Mount an image. Any image already mounted is ejected first and its
    /// bytes returned if it was modified.
    pub fn insert(&mut self, codec: Box<dyn ImageCodec>) -> Result<Option<Vec<u8>>> {
        let previous = self.eject()?;
        debug!("Drive {}: inserted {} image", self.id, codec.format_name());
        let mut binding = DriveImageBinding::new(codec, &self.config);
        binding.head_moved(self.position);
        self.binding = Some(binding);
        self.id_index = 0;
        Ok(previous)
    }

    /// Unmount the image; returns its serialised bytes if it was modified
    pub fn eject(&mut self) -> Result<Option<Vec<u8>>> {
        let Some(binding) = self.binding.take() else {
            return Ok(None);
        };
        self.flags.set(DriveFlags::READY, false);
        self.id_index = 0;
        let codec = binding.into_codec()?;
        debug!("Drive {}: ejected {} image", self.id, codec.format_name());
        if codec.is_modified() {
            Ok(Some(codec.to_bytes()?))
        } else {
            Ok(None)
        }
    }

    /// Sectors on the track under the head
    pub fn sectors_per_track(&mut self, side: u8) -> usize {
        let position = self.position;
        self.binding
            .as_mut()
            .map_or(0, |b| b.sectors_per_track(position, side))
    }

    /// Next sector ID passing under the head.
    ///
    /// The cursor wrap is flagged by exactly the call that wraps back to the
    /// first sector, and by every call on an empty or unformatted track.
    pub fn get_next_sector_id(&mut self, side: u8) -> Option<(usize, SectorInfo)> {
        let count = self.sectors_per_track(side);
        if count == 0 {
            self.cursor_wrapped = true;
            return None;
        }
        let index = self.id_index % count;
        self.id_index = (index + 1) % count;
        self.cursor_wrapped = self.id_index == 0;

        let position = self.position;
        let binding = self.binding.as_mut()?;
        match binding.sector_info(position, side, index) {
            Ok(info) => Some((index, info)),
            Err(e) => {
                trace!("Drive {}: no ID at index {}: {}", self.id, index, e);
                None
            }
        }
    }

    /// Read a sector; an empty drive fills `buf` with 0xFF
    pub fn read_sector(&mut self, side: u8, index: usize, buf: &mut [u8]) -> Result<()> {
        let position = self.position;
        match self.binding.as_mut() {
            Some(binding) => binding.read_sector(position, side, index, buf),
            None => {
                buf.fill(0xFF);
                Err(FloppyError::NoMedia)
            }
        }
    }

    /// Write a sector
    pub fn write_sector(&mut self, side: u8, index: usize, data: &[u8], ddam: bool) -> Result<()> {
        let position = self.position;
        self.binding
            .as_mut()
            .ok_or(FloppyError::NoMedia)?
            .write_sector(position, side, index, data, ddam)
    }

    /// Read the raw track under the head
    pub fn read_track(&mut self, side: u8) -> Result<Vec<u8>> {
        let position = self.position;
        self.binding
            .as_mut()
            .ok_or(FloppyError::NoMedia)?
            .read_track(position, side)
    }

    /// Replace the raw track under the head
    pub fn write_track(&mut self, side: u8, data: &[u8]) -> Result<()> {
        let position = self.position;
        self.binding
            .as_mut()
            .ok_or(FloppyError::NoMedia)?
            .write_track(position, side, data)
    }

    /// Fill every sector of the track under the head with `filler`
    pub fn format_track(&mut self, side: u8, filler: u8) -> Result<()> {
        let count = self.sectors_per_track(side);
        let mut buf = Vec::new();
        for index in 0..count {
            let position = self.position;
            let binding = self.binding.as_mut().ok_or(FloppyError::NoMedia)?;
            let info = binding.sector_info(position, side, index)?;
            buf.clear();
            buf.resize(info.id.size_bytes(), filler);
            binding.write_sector(position, side, index, &buf, false)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BasicDsk, BasicDskGeometry, Td0Image};

    fn image(tracks: u8, sectors: u8) -> Box<dyn ImageCodec> {
        let geometry = BasicDskGeometry::new(tracks, 1, sectors, 256, 1);
        Box::new(BasicDsk::blank(geometry, 0xE5).unwrap())
    }

    #[test]
    fn test_seek_clamps() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.seek(-5);
        assert_eq!(drive.current_track(), 0);
        assert!(drive.get_flag(DriveFlags::HEAD_AT_TRACK_0));

        drive.seek(1000);
        assert_eq!(drive.current_track(), 39);
        assert!(!drive.get_flag(DriveFlags::HEAD_AT_TRACK_0));
    }

    #[test]
    fn test_empty_drive() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        assert!(drive.get_flag(DriveFlags::WRITE_PROTECTED));
        drive.set_flag(DriveFlags::WRITE_PROTECTED, false);
        assert!(drive.get_flag(DriveFlags::WRITE_PROTECTED));

        drive.set_ready_state(true, true);
        assert!(!drive.get_flag(DriveFlags::READY));

        let mut buf = [0u8; 16];
        assert!(matches!(drive.read_sector(0, 0, &mut buf), Err(FloppyError::NoMedia)));
        assert_eq!(buf, [0xFF; 16]);
        assert!(drive.get_next_sector_id(0).is_none());
        assert!(drive.get_flag(DriveFlags::INDEX));
    }

    #[test]
    fn test_write_protect_follows_image() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 10)).unwrap();
        assert!(!drive.get_flag(DriveFlags::WRITE_PROTECTED));
        drive.set_flag(DriveFlags::WRITE_PROTECTED, true);
        assert!(drive.get_flag(DriveFlags::WRITE_PROTECTED));

        let mut td0 = vec![b'T', b'D', 0, 0, 0x15, 0, 0, 0, 0, 1, 0, 0];
        td0.push(0xFF);
        drive.set_flag(DriveFlags::WRITE_PROTECTED, false);
        drive.insert(Box::new(Td0Image::open(td0).unwrap())).unwrap();
        assert!(drive.get_flag(DriveFlags::WRITE_PROTECTED));
    }

    #[test]
    fn test_sector_cursor_wraps_with_index() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 5)).unwrap();
        for call in 1..=10 {
            let (index, info) = drive.get_next_sector_id(0).unwrap();
            assert_eq!(index, (call - 1) % 5);
            assert_eq!(info.id.sector as usize, index + 1);
            assert_eq!(drive.get_flag(DriveFlags::INDEX), call % 5 == 0);
        }
    }

    #[test]
    fn test_cursor_resets_on_track_change() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 5)).unwrap();
        drive.get_next_sector_id(0);
        drive.get_next_sector_id(0);
        drive.seek(1);
        assert_eq!(drive.get_next_sector_id(0).unwrap().0, 0);
    }

    #[test]
    fn test_ready_with_media() {
        let mut drive = Drive::new(1, DriveConfig::ss_40());
        drive.insert(image(40, 10)).unwrap();
        drive.set_ready_state(true, true);
        assert!(drive.get_flag(DriveFlags::READY));
        assert_eq!(drive.eject().unwrap(), None);
        assert!(!drive.get_flag(DriveFlags::READY));
    }

    #[test]
    fn test_eject_returns_modified_bytes() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 10)).unwrap();
        drive.seek(2);
        drive.write_sector(0, 0, &[0x42; 256], true).unwrap();
        let bytes = drive.eject().unwrap().unwrap();
        assert_eq!(bytes[2 * 10 * 256], 0x42);
        assert!(!drive.has_media());
    }

    #[test]
    fn test_format_track() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 10)).unwrap();
        drive.seek(7);
        drive.format_track(0, 0x00).unwrap();
        let mut buf = [0xAAu8; 256];
        drive.read_sector(0, 9, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_index_timing() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        assert_eq!(drive.index_period_us(), 200_000);
        assert_eq!(drive.index_edge(), None);

        drive.set_motor(true);
        assert_eq!(drive.index_edge(), Some(10_000));
        assert!(drive.get_flag(DriveFlags::INDEX));
        assert_eq!(drive.index_edge(), Some(190_000));
        assert!(!drive.get_flag(DriveFlags::INDEX));

        drive.set_motor(false);
        assert!(!drive.get_flag(DriveFlags::INDEX));
    }

    #[test]
    fn test_sector_queries_keep_index_phase() {
        let mut drive = Drive::new(0, DriveConfig::ss_40());
        drive.insert(image(40, 5)).unwrap();
        drive.set_motor(true);
        assert_eq!(drive.index_edge(), Some(10_000));
        assert_eq!(drive.index_edge(), Some(190_000));
        assert!(!drive.index_pulse());

        // a full scan ends on the wrapping query; the sensor stays low
        for _ in 0..5 {
            drive.get_next_sector_id(0);
        }
        assert!(drive.sector_cursor_wrapped());
        assert!(!drive.get_flag(DriveFlags::INDEX));
        assert!(!drive.index_pulse());

        // the generator carries on from its own phase
        assert_eq!(drive.index_edge(), Some(10_000));
        assert!(drive.index_pulse());
        assert!(!drive.sector_cursor_wrapped());
        assert_eq!(drive.index_edge(), Some(190_000));
        assert!(!drive.get_flag(DriveFlags::INDEX));
    }

    #[test]
    fn test_sony_zones() {
        let mut drive = Drive::new(0, DriveConfig::sony_35());
        assert_eq!(drive.rpm(), 394);
        drive.seek(16);
        assert_eq!(drive.rpm(), 429);
        drive.seek(100);
        assert_eq!(drive.rpm(), 590);
    }

    #[test]
    fn test_apple_stepper() {
        let mut drive = Drive::new(0, DriveConfig::apple_525());
        drive.set_stepper_phases(0b0010);
        assert_eq!(drive.current_track(), 2);
        drive.set_stepper_phases(0b0100);
        assert_eq!(drive.current_track(), 4);
        assert_eq!(drive.cylinder(), 1);
        drive.set_stepper_phases(0b0010);
        assert_eq!(drive.current_track(), 2);
    }

    #[test]
    fn test_c1541_stepper() {
        let mut drive = Drive::new(0, DriveConfig::c1541());
        drive.seek(34);
        for bits in [1, 2, 3, 0] {
            drive.set_stepper_bits(bits);
        }
        assert_eq!(drive.current_track(), 38);
        drive.set_stepper_bits(3);
        assert_eq!(drive.current_track(), 37);
        assert_eq!(drive.cylinder(), 18);
    }
}
