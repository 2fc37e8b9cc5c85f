//! A floppy subsystem: drives, one i8271 and the clock they share
//!
//! `FloppySystem` is the owner the controller's effects are applied to. It
//! forwards host register accesses, arms the controller's timers on the
//! virtual clock and keeps one index timer per spinning drive, so index
//! pulses and command timers are drained in a single deadline order.

use crate::clock::{Micros, TimerId, VirtualClock};
use crate::controller::{Effect, Effects, FdcTimer, I8271};
use crate::drive::{Density, Drive, DriveConfig, DriveTable};
use crate::error::{FloppyError, Result};
use crate::image::ImageCodec;
use log::{debug, trace};

/// Event carried by a timer on the system clock
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemEvent {
    /// Index edge of one drive
    Index {
        /// Drive slot
        drive: usize,
    },
    /// Controller timer
    Fdc(FdcTimer),
}

/// Drives fitted and the data rate they run at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemConfig {
    /// One entry per drive slot
    pub drives: Vec<DriveConfig>,
    /// Recording density
    pub density: Density,
}

impl SystemConfig {
    /// Two 80-track double-sided drives at FM single density, as on a BBC Micro
    pub fn bbc_micro() -> Self {
        Self {
            drives: vec![DriveConfig::ds_80(); 2],
            density: Density::FmLow,
        }
    }

    /// Set the drives
    pub fn with_drives(mut self, drives: Vec<DriveConfig>) -> Self {
        self.drives = drives;
        self
    }

    /// Set the density
    pub fn with_density(mut self, density: Density) -> Self {
        self.density = density;
        self
    }
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self::bbc_micro()
    }
}

/// Line state seen by the host
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HostLines {
    /// Interrupt request
    pub irq: bool,
    /// DMA request
    pub drq: bool,
}

/// Clock, drive table and controller of one emulated machine
pub struct FloppySystem {
    config: SystemConfig,
    clock: VirtualClock<SystemEvent>,
    drives: DriveTable,
    fdc: I8271,
    fdc_timers: [TimerId; 2],
    index_timers: Vec<TimerId>,
    lines: HostLines,
}

impl FloppySystem {
    /// Build a system from its configuration
    pub fn new(config: SystemConfig) -> Self {
        let mut clock = VirtualClock::new();
        let fdc_timers = [
            clock.add_timer(SystemEvent::Fdc(FdcTimer::DataRequest)),
            clock.add_timer(SystemEvent::Fdc(FdcTimer::Complete)),
        ];
        let index_timers = (0..config.drives.len())
            .map(|drive| clock.add_timer(SystemEvent::Index { drive }))
            .collect();
        let drives = DriveTable::new(&config.drives);
        Self {
            config,
            clock,
            drives,
            fdc: I8271::new(),
            fdc_timers,
            index_timers,
            lines: HostLines::default(),
        }
    }

    /// Configuration the system was built from
    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    /// Current emulated time
    pub fn now(&self) -> Micros {
        self.clock.now()
    }

    /// The controller
    pub fn fdc(&self) -> &I8271 {
        &self.fdc
    }

    /// Drive slots
    pub fn drives(&self) -> &DriveTable {
        &self.drives
    }

    /// One drive
    pub fn drive(&self, id: usize) -> Option<&Drive> {
        self.drives.get(id)
    }

    /// One drive, mutably; index timers follow any motor change on the next run
    pub fn drive_mut(&mut self, id: usize) -> Option<&mut Drive> {
        self.drives.get_mut(id)
    }

    /// Interrupt and DMA request lines
    pub fn lines(&self) -> HostLines {
        self.lines
    }

    /// Time to move one byte at the configured density
    pub fn byte_time_us(&self) -> Micros {
        self.config.density.byte_time_us()
    }

    /// Mount an image; returns the bytes of a modified image it displaced
    pub fn insert(&mut self, drive: usize, codec: Box<dyn ImageCodec>) -> Result<Option<Vec<u8>>> {
        self.drives
            .get_mut(drive)
            .ok_or(FloppyError::NoMedia)?
            .insert(codec)
    }

    /// Unmount an image; returns its bytes if it was modified
    pub fn eject(&mut self, drive: usize) -> Result<Option<Vec<u8>>> {
        match self.drives.get_mut(drive) {
            Some(d) => d.eject(),
            None => Ok(None),
        }
    }

    /// Reset the controller and cancel every pending timer
    pub fn reset(&mut self) {
        debug!("System reset at {} us", self.clock.now());
        self.clock.disarm_all();
        let effects = self.fdc.reset();
        self.apply(effects);
        self.sync_index_timers();
    }

    /// Host read of a controller register
    pub fn read_register(&mut self, offset: u8) -> u8 {
        let (value, effects) = self.fdc.read(offset);
        self.apply(effects);
        value
    }

    /// Host write of a controller register
    pub fn write_register(&mut self, offset: u8, data: u8) {
        let effects = self.fdc.write(&mut self.drives, offset, data);
        self.apply(effects);
        self.sync_index_timers();
    }

    /// DMA acknowledge read (or non-DMA data read)
    pub fn read_data(&mut self) -> u8 {
        let (value, effects) = self.fdc.read_data(&mut self.drives);
        self.apply(effects);
        value
    }

    /// DMA acknowledge write (or non-DMA data write)
    pub fn write_data(&mut self, data: u8) {
        let effects = self.fdc.write_data(&mut self.drives, data);
        self.apply(effects);
    }

    /// Deadline of the earliest pending timer
    pub fn next_event(&self) -> Option<Micros> {
        self.clock.next_deadline()
    }

    /// Is a controller timer pending?
    pub fn fdc_timer_armed(&self, timer: FdcTimer) -> bool {
        self.clock.is_armed(self.fdc_timer(timer))
    }

    /// Fire every timer due up to `limit`, then move time to `limit`
    pub fn run_until(&mut self, limit: Micros) {
        while self.step(limit).is_some() {}
        self.clock.advance_to(limit);
    }

    /// Fire the next timer due at or before `limit`
    pub fn step(&mut self, limit: Micros) -> Option<SystemEvent> {
        let (_, event) = self.clock.pop_due(limit)?;
        trace!("{} us: {:?}", self.clock.now(), event);
        match event {
            SystemEvent::Index { drive } => self.index_edge(drive),
            SystemEvent::Fdc(timer) => {
                let effects = self.fdc.timer_expired(timer);
                self.apply(effects);
            }
        }
        Some(event)
    }

    /// Run until the controller raises DRQ or IRQ, or nothing is pending
    /// before `limit`
    pub fn run_until_request(&mut self, limit: Micros) -> HostLines {
        while !self.lines.irq && !self.lines.drq {
            if self.step(limit).is_none() {
                break;
            }
        }
        self.lines
    }

    fn fdc_timer(&self, timer: FdcTimer) -> TimerId {
        match timer {
            FdcTimer::DataRequest => self.fdc_timers[0],
            FdcTimer::Complete => self.fdc_timers[1],
        }
    }

    fn apply(&mut self, effects: Effects) {
        for effect in effects {
            match effect {
                Effect::Arm(timer, delay) => {
                    let id = self.fdc_timer(timer);
                    self.clock.arm(id, delay);
                }
                Effect::Disarm(timer) => {
                    let id = self.fdc_timer(timer);
                    self.clock.disarm(id);
                }
                Effect::Irq(state) => self.lines.irq = state,
                Effect::Drq { active, .. } => self.lines.drq = active,
            }
        }
    }

    fn index_edge(&mut self, drive: usize) {
        let next = self.drives.get_mut(drive).and_then(Drive::index_edge);
        if let (Some(delay), Some(&id)) = (next, self.index_timers.get(drive)) {
            self.clock.arm(id, delay);
        }
    }

    /// Start index timers for drives whose motor came on and stop the
    /// timers of drives whose motor went off
    fn sync_index_timers(&mut self) {
        for (drive, &id) in self.index_timers.iter().enumerate() {
            let Some(d) = self.drives.get_mut(drive) else {
                continue;
            };
            let armed = self.clock.is_armed(id);
            if d.motor_on() && !armed {
                if let Some(delay) = d.index_edge() {
                    self.clock.arm(id, delay);
                }
            } else if !d.motor_on() && armed {
                self.clock.disarm(id);
            }
        }
    }

    /// Pick up motor changes made through `drive_mut`
    pub fn refresh(&mut self) {
        self.sync_index_timers();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drive::DriveFlags;
    use crate::format::{BasicDsk, BasicDskGeometry};

    fn system() -> FloppySystem {
        let config = SystemConfig::default().with_drives(vec![DriveConfig::ss_40(); 2]);
        let mut system = FloppySystem::new(config);
        let geometry = BasicDskGeometry::bbc_dfs_ss40();
        let image = BasicDsk::blank(geometry, 0xE5).unwrap();
        system.insert(0, Box::new(image)).unwrap();
        system
    }

    #[test]
    fn test_index_pulses_follow_motor() {
        let mut system = system();
        assert_eq!(system.next_event(), None);

        system.drive_mut(0).unwrap().set_motor(true);
        system.refresh();
        assert!(system.drive(0).unwrap().get_flag(DriveFlags::INDEX));
        assert_eq!(system.next_event(), Some(10_000));

        system.run_until(10_000);
        assert!(!system.drive(0).unwrap().get_flag(DriveFlags::INDEX));
        assert_eq!(system.next_event(), Some(200_000));

        system.drive_mut(0).unwrap().set_motor(false);
        system.refresh();
        assert_eq!(system.next_event(), None);
    }

    #[test]
    fn test_register_protocol_drives_clock() {
        let mut system = system();
        // load head on drive 0
        system.write_register(0, 0x7A);
        system.write_register(1, 0x23);
        system.write_register(1, 0x08);
        assert!(system.drive(0).unwrap().motor_on());

        // read track 2 sector 0
        system.write_register(0, 0x52);
        system.write_register(1, 2);
        system.write_register(1, 0);
        assert!(system.fdc_timer_armed(FdcTimer::DataRequest));

        let mut bytes = 0;
        loop {
            let lines = system.run_until_request(system.now() + 1_000_000);
            if lines.drq {
                assert_eq!(system.read_data(), 0xE5);
                bytes += 1;
            } else {
                break;
            }
        }
        assert_eq!(bytes, 256);
        assert!(system.lines().irq);
        assert_eq!(system.read_register(1), 0);
        assert!(!system.lines().irq);
    }

    #[test]
    fn test_reset_disarms_everything() {
        let mut system = system();
        system.write_register(0, 0x69);
        system.write_register(1, 4);
        assert!(system.fdc_timer_armed(FdcTimer::Complete));
        system.reset();
        assert!(!system.fdc_timer_armed(FdcTimer::Complete));
        assert_eq!(system.next_event(), None);
    }
}
