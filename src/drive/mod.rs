//! Drive mechanics, presets and the binding to mounted images

/// Drive/image binding and track cache
pub mod binding;
/// Drive presets
pub mod config;
/// Head, motor and index model
pub mod mechanics;
/// Drive slots
pub mod table;

pub use binding::DriveImageBinding;
pub use config::{Density, DriveConfig, DriveType};
pub use mechanics::Drive;
pub use table::{decode_drive_select, DriveTable};

use std::fmt;

/// Drive flag register
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DriveFlags(pub u8);

impl DriveFlags {
    /// Drive is ready
    pub const READY: u8 = 0x01;
    /// Spindle motor running
    pub const MOTOR_ON: u8 = 0x02;
    /// Index hole under the sensor
    pub const INDEX: u8 = 0x04;
    /// Media is write protected
    pub const WRITE_PROTECTED: u8 = 0x08;
    /// Head is at track 0
    pub const HEAD_AT_TRACK_0: u8 = 0x10;

    /// Check if the drive is ready
    #[inline]
    pub fn ready(&self) -> bool {
        (self.0 & Self::READY) != 0
    }

    /// Check if the motor is on
    #[inline]
    pub fn motor_on(&self) -> bool {
        (self.0 & Self::MOTOR_ON) != 0
    }

    /// Check the index signal
    #[inline]
    pub fn index(&self) -> bool {
        (self.0 & Self::INDEX) != 0
    }

    /// Check write protect
    #[inline]
    pub fn write_protected(&self) -> bool {
        (self.0 & Self::WRITE_PROTECTED) != 0
    }

    /// Check the track 0 sensor
    #[inline]
    pub fn at_track_0(&self) -> bool {
        (self.0 & Self::HEAD_AT_TRACK_0) != 0
    }

    /// Set or clear a flag
    #[inline]
    pub fn set(&mut self, flag: u8, state: bool) {
        if state {
            self.0 |= flag;
        } else {
            self.0 &= !flag;
        }
    }
}

impl fmt::Display for DriveFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut flags = Vec::new();
        if self.ready() {
            flags.push("RDY");
        }
        if self.motor_on() {
            flags.push("MOT");
        }
        if self.index() {
            flags.push("IDX");
        }
        if self.write_protected() {
            flags.push("WP");
        }
        if self.at_track_0() {
            flags.push("TK0");
        }
        if flags.is_empty() {
            write!(f, "-")
        } else {
            write!(f, "{}", flags.join("|"))
        }
    }
}
