//! uPD765 result status bytes stored per sector in CPC DSK images
//!
//! DSK containers record the ST1/ST2 bytes the original controller
//! returned when the disk was imaged. Only the bits that describe the
//! sector itself map onto [`SectorFlags`]; the rest are carried through
//! unchanged when the image is written back.

use crate::image::SectorFlags;
use std::fmt;

/// Status register 1 as stored in a DSK sector info block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status1(pub u8);

impl Status1 {
    /// End of Cylinder (EN)
    pub const EN: u8 = 0x80;
    /// Data Error (DE), CRC error in the ID or data field
    pub const DE: u8 = 0x20;
    /// No Data (ND)
    pub const ND: u8 = 0x04;
    /// Missing Address Mark (MA)
    pub const MA: u8 = 0x01;

    /// Check if the data error bit is set
    #[inline]
    pub fn data_error(&self) -> bool {
        (self.0 & Self::DE) != 0
    }
}

/// Status register 2 as stored in a DSK sector info block
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Status2(pub u8);

impl Status2 {
    /// Control Mark (CM), sector was written with a deleted data mark
    pub const CM: u8 = 0x40;
    /// Data Error in Data Field (DD)
    pub const DD: u8 = 0x20;
    /// Missing Address Mark in Data Field (MD)
    pub const MD: u8 = 0x01;

    /// Check if the control mark bit is set
    #[inline]
    pub fn is_deleted(&self) -> bool {
        (self.0 & Self::CM) != 0
    }

    /// Check if the data field error bit is set
    #[inline]
    pub fn data_field_error(&self) -> bool {
        (self.0 & Self::DD) != 0
    }
}

/// Sector flags implied by a stored ST1/ST2 pair
pub fn flags_from_status(st1: Status1, st2: Status2) -> SectorFlags {
    let mut flags = SectorFlags::default();
    flags.set(SectorFlags::DELETED_DATA, st2.is_deleted());
    if st1.data_error() {
        if st2.data_field_error() {
            flags.set(SectorFlags::DATA_CRC_ERROR, true);
        } else {
            flags.set(SectorFlags::ID_CRC_ERROR, true);
        }
    }
    flags
}

/// Fold sector flags back into a stored ST1/ST2 pair, keeping unrelated bits
pub fn status_from_flags(flags: SectorFlags, st1: Status1, st2: Status2) -> (Status1, Status2) {
    let mut st1 = st1.0 & !Status1::DE;
    let mut st2 = st2.0 & !(Status2::CM | Status2::DD);
    if flags.is_deleted() {
        st2 |= Status2::CM;
    }
    if flags.data_crc_error() {
        st1 |= Status1::DE;
        st2 |= Status2::DD;
    } else if flags.id_crc_error() {
        st1 |= Status1::DE;
    }
    (Status1(st1), Status2(st2))
}

impl fmt::Display for Status1 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "OK");
        }
        let mut flags = Vec::new();
        if (self.0 & Self::EN) != 0 {
            flags.push("EN");
        }
        if self.data_error() {
            flags.push("DE");
        }
        if (self.0 & Self::ND) != 0 {
            flags.push("ND");
        }
        if (self.0 & Self::MA) != 0 {
            flags.push("MA");
        }
        write!(f, "{}", flags.join("|"))
    }
}

impl fmt::Display for Status2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "OK");
        }
        let mut flags = Vec::new();
        if self.is_deleted() {
            flags.push("CM");
        }
        if self.data_field_error() {
            flags.push("DD");
        }
        if (self.0 & Self::MD) != 0 {
            flags.push("MD");
        }
        write!(f, "{}", flags.join("|"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deleted_mark() {
        let flags = flags_from_status(Status1(0), Status2(0x40));
        assert!(flags.is_deleted());
        assert!(!flags.data_crc_error());
    }

    #[test]
    fn test_crc_errors() {
        let data = flags_from_status(Status1(0x20), Status2(0x20));
        assert!(data.data_crc_error());
        assert!(!data.id_crc_error());

        let id = flags_from_status(Status1(0x20), Status2(0));
        assert!(id.id_crc_error());
        assert!(!id.data_crc_error());
    }

    #[test]
    fn test_status_from_flags_keeps_other_bits() {
        let (st1, st2) = status_from_flags(
            SectorFlags::deleted(true),
            Status1(Status1::EN | Status1::DE),
            Status2(Status2::MD),
        );
        assert_eq!(st1.0, Status1::EN);
        assert_eq!(st2.0, Status2::MD | Status2::CM);
    }

    #[test]
    fn test_display() {
        assert_eq!(Status1(0x80 | 0x04).to_string(), "EN|ND");
        assert_eq!(Status2(0x40 | 0x20).to_string(), "CM|DD");
        assert_eq!(Status2(0).to_string(), "OK");
    }
}
