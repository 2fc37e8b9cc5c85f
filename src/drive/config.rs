//! Drive mechanism presets

use crate::clock::Micros;
use std::fmt;

/// Mechanism family fitted in a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DriveType {
    /// One step pulse moves one track
    #[default]
    Regular,
    /// Disk II: four-phase stepper, positions counted in quarter tracks
    Apple,
    /// Variable-speed 3.5" drive with five rpm zones
    Sony,
    /// Commodore 1541: two-bit stepper, positions counted in half tracks
    C1541,
}

impl fmt::Display for DriveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DriveType::Regular => "regular",
            DriveType::Apple => "apple",
            DriveType::Sony => "sony",
            DriveType::C1541 => "c1541",
        };
        write!(f, "{}", name)
    }
}

/// Recording density and data rate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Density {
    /// FM at 125 kbit/s
    FmLow,
    /// FM at 250 kbit/s
    FmHigh,
    /// MFM at 250 kbit/s
    #[default]
    MfmLow,
    /// MFM at 500 kbit/s
    MfmHigh,
}

impl Density {
    /// Time to transfer one data byte
    pub fn byte_time_us(self) -> Micros {
        match self {
            Density::FmLow => 64,
            Density::FmHigh => 32,
            Density::MfmLow => 32,
            Density::MfmHigh => 16,
        }
    }
}

/// rpm of each 16-track speed zone on Sony variable-speed drives
pub const SONY_ZONE_RPM: [u16; 5] = [394, 429, 472, 525, 590];

/// Tracks per Sony speed zone
pub const SONY_ZONE_TRACKS: u8 = 16;

/// Static description of one drive mechanism
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DriveConfig {
    /// Mechanism family
    pub drive_type: DriveType,
    /// Tracks the head can reach
    pub tracks: u8,
    /// Number of heads
    pub sides: u8,
    /// Spindle speed (zone 0 for Sony drives)
    pub rpm: u16,
    /// Head positions per track (4 for quarter-step, 2 for half-step)
    pub steps_per_track: u8,
}

impl DriveConfig {
    /// Single-sided 40 track 5.25" drive
    pub fn ss_40() -> Self {
        Self {
            drive_type: DriveType::Regular,
            tracks: 40,
            sides: 1,
            rpm: 300,
            steps_per_track: 1,
        }
    }

    /// Double-sided 40 track 5.25" drive
    pub fn ds_40() -> Self {
        Self::ss_40().with_sides(2)
    }

    /// Single-sided 80 track drive
    pub fn ss_80() -> Self {
        Self::ss_40().with_tracks(80)
    }

    /// Double-sided 80 track drive
    pub fn ds_80() -> Self {
        Self::ss_80().with_sides(2)
    }

    /// Apple Disk II
    pub fn apple_525() -> Self {
        Self {
            drive_type: DriveType::Apple,
            tracks: 35,
            sides: 1,
            rpm: 300,
            steps_per_track: 4,
        }
    }

    /// Sony 800K variable-speed drive
    pub fn sony_35() -> Self {
        Self {
            drive_type: DriveType::Sony,
            tracks: 80,
            sides: 2,
            rpm: SONY_ZONE_RPM[0],
            steps_per_track: 1,
        }
    }

    /// Commodore 1541
    pub fn c1541() -> Self {
        Self {
            drive_type: DriveType::C1541,
            tracks: 42,
            sides: 1,
            rpm: 300,
            steps_per_track: 2,
        }
    }

    /// Set the mechanism family
    pub fn with_drive_type(mut self, drive_type: DriveType) -> Self {
        self.drive_type = drive_type;
        self
    }

    /// Set the reachable track count
    pub fn with_tracks(mut self, tracks: u8) -> Self {
        self.tracks = tracks;
        self
    }

    /// Set the number of heads
    pub fn with_sides(mut self, sides: u8) -> Self {
        self.sides = sides;
        self
    }

    /// Set the spindle speed
    pub fn with_rpm(mut self, rpm: u16) -> Self {
        self.rpm = rpm;
        self
    }

    /// Set head positions per track
    pub fn with_steps_per_track(mut self, steps_per_track: u8) -> Self {
        self.steps_per_track = steps_per_track;
        self
    }

    /// Head positions the stepper can reach
    pub fn max_track(&self) -> u16 {
        (self.tracks as u16 * self.steps_per_track.max(1) as u16).max(1)
    }

    /// Look a preset up by the name the console uses
    pub fn preset(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "ss40" => Some(Self::ss_40()),
            "ds40" => Some(Self::ds_40()),
            "ss80" => Some(Self::ss_80()),
            "ds80" => Some(Self::ds_80()),
            "apple" => Some(Self::apple_525()),
            "sony" => Some(Self::sony_35()),
            "c1541" => Some(Self::c1541()),
            _ => None,
        }
    }
}

impl Default for DriveConfig {
    fn default() -> Self {
        Self::ds_80()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_byte_times() {
        assert_eq!(Density::FmLow.byte_time_us(), 64);
        assert_eq!(Density::FmHigh.byte_time_us(), 32);
        assert_eq!(Density::MfmLow.byte_time_us(), 32);
        assert_eq!(Density::MfmHigh.byte_time_us(), 16);
    }

    #[test]
    fn test_presets() {
        assert_eq!(DriveConfig::ds_40().sides, 2);
        assert_eq!(DriveConfig::ds_40().tracks, 40);
        assert_eq!(DriveConfig::ss_80().max_track(), 80);
        assert_eq!(DriveConfig::apple_525().max_track(), 140);
        assert_eq!(DriveConfig::c1541().max_track(), 84);
        assert_eq!(DriveConfig::preset("SONY"), Some(DriveConfig::sony_35()));
        assert_eq!(DriveConfig::preset("ds81"), None);
    }

    #[test]
    fn test_with_setters() {
        let config = DriveConfig::ss_40().with_rpm(360).with_tracks(77);
        assert_eq!(config.rpm, 360);
        assert_eq!(config.tracks, 77);
        assert_eq!(config.drive_type, DriveType::Regular);
    }
}
