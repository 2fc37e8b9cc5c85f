//! Sector identification and table-backed sector storage

use crate::format::constants::fdc_size_to_bytes;
use std::fmt;

/// Sector ID (CHRN) - addressing information for a sector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorId {
    /// C - Cylinder/Track number
    pub track: u8,
    /// H - Head/Side number
    pub side: u8,
    /// R - Sector ID/Record number
    pub sector: u8,
    /// N - Size code (0=128, 1=256, 2=512, 3=1024, ...)
    pub size_code: u8,
}

impl SectorId {
    /// Create a new sector ID
    pub fn new(track: u8, side: u8, sector: u8, size_code: u8) -> Self {
        Self {
            track,
            side,
            sector,
            size_code,
        }
    }

    /// Sector size in bytes from the size code (128 << N)
    pub fn size_bytes(&self) -> usize {
        fdc_size_to_bytes(self.size_code)
    }

    /// The four ID bytes in C, H, R, N order
    pub fn to_bytes(&self) -> [u8; 4] {
        [self.track, self.side, self.sector, self.size_code]
    }
}

/// Out-of-band sector flags reported alongside the ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorFlags(pub u8);

impl SectorFlags {
    /// Data field written with a Deleted Data Address Mark
    pub const DELETED_DATA: u8 = 0x01;
    /// CRC error in the ID field
    pub const ID_CRC_ERROR: u8 = 0x02;
    /// CRC error in the data field
    pub const DATA_CRC_ERROR: u8 = 0x04;

    /// Create flags from a raw byte
    #[inline]
    pub fn new(value: u8) -> Self {
        SectorFlags(value)
    }

    /// Flags for a sector with or without a DDAM and no errors
    #[inline]
    pub fn deleted(ddam: bool) -> Self {
        if ddam {
            SectorFlags(Self::DELETED_DATA)
        } else {
            SectorFlags(0)
        }
    }

    /// Check if the data field carries a deleted data mark
    #[inline]
    pub fn is_deleted(&self) -> bool {
        (self.0 & Self::DELETED_DATA) != 0
    }

    /// Check if the ID field has a CRC error
    #[inline]
    pub fn id_crc_error(&self) -> bool {
        (self.0 & Self::ID_CRC_ERROR) != 0
    }

    /// Check if the data field has a CRC error
    #[inline]
    pub fn data_crc_error(&self) -> bool {
        (self.0 & Self::DATA_CRC_ERROR) != 0
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

impl fmt::Display for SectorFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0 == 0 {
            return write!(f, "OK");
        }
        let mut flags = Vec::new();
        if self.is_deleted() {
            flags.push("DDAM");
        }
        if self.id_crc_error() {
            flags.push("IDCRC");
        }
        if self.data_crc_error() {
            flags.push("DATACRC");
        }
        write!(f, "{}", flags.join("|"))
    }
}

/// What a codec reports for one rotational slot of a track
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SectorInfo {
    /// The ID field
    pub id: SectorId,
    /// DDAM and CRC flags
    pub flags: SectorFlags,
}

impl SectorInfo {
    /// Create sector info
    pub fn new(id: SectorId, flags: SectorFlags) -> Self {
        Self { id, flags }
    }
}

/// A sector held in memory by table-backed codecs
#[derive(Debug, Clone)]
pub struct Sector {
    /// Sector addressing information (CHRN)
    pub id: SectorId,
    /// DDAM and CRC flags
    pub flags: SectorFlags,
    data: Vec<u8>,
}

impl Sector {
    /// Create a new sector filled with the CP/M filler byte
    pub fn new(id: SectorId) -> Self {
        let size = id.size_bytes();
        Self {
            id,
            flags: SectorFlags::default(),
            data: vec![0xE5; size],
        }
    }

    /// Create a new sector with specific data
    pub fn with_data(id: SectorId, flags: SectorFlags, data: Vec<u8>) -> Self {
        Self { id, flags, data }
    }

    /// Get a reference to the sector data
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Get a mutable reference to the sector data
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Sector info (ID + flags)
    pub fn info(&self) -> SectorInfo {
        SectorInfo::new(self.id, self.flags)
    }

    /// Check if this sector is marked as deleted data
    pub fn is_deleted(&self) -> bool {
        self.flags.is_deleted()
    }

    /// Overwrite the payload; the stored length never changes
    pub fn write(&mut self, data: &[u8], ddam: bool) {
        let len = self.data.len().min(data.len());
        self.data[..len].copy_from_slice(&data[..len]);
        self.flags.set(SectorFlags::DELETED_DATA, ddam);
        self.flags.set(SectorFlags::DATA_CRC_ERROR, false);
    }

    /// Copy the payload into `buf`, padding with zero if the stored data is short
    pub fn read_into(&self, buf: &mut [u8]) {
        let len = self.data.len().min(buf.len());
        buf[..len].copy_from_slice(&self.data[..len]);
        buf[len..].fill(0);
    }

    /// Fill the sector with a specific byte value
    pub fn fill(&mut self, byte: u8) {
        self.data.fill(byte);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sector_id_size() {
        let id = SectorId::new(0, 0, 0xC1, 2);
        assert_eq!(id.size_bytes(), 512);

        let id2 = SectorId::new(0, 0, 1, 1);
        assert_eq!(id2.size_bytes(), 256);
        assert_eq!(id2.to_bytes(), [0, 0, 1, 1]);
    }

    #[test]
    fn test_flags() {
        let mut flags = SectorFlags::deleted(true);
        assert!(flags.is_deleted());
        assert!(!flags.data_crc_error());

        flags.set(SectorFlags::DATA_CRC_ERROR, true);
        assert!(flags.data_crc_error());
        assert_eq!(flags.to_string(), "DDAM|DATACRC");

        flags.set(SectorFlags::DELETED_DATA, false);
        assert!(!flags.is_deleted());
        assert_eq!(SectorFlags::default().to_string(), "OK");
    }

    #[test]
    fn test_sector_write_keeps_length() {
        let mut sector = Sector::new(SectorId::new(0, 0, 1, 0));
        sector.write(&[0x11; 300], true);

        assert_eq!(sector.data().len(), 128);
        assert!(sector.is_deleted());

        let mut buf = [0u8; 128];
        sector.read_into(&mut buf);
        assert!(buf.iter().all(|&b| b == 0x11));
    }

    #[test]
    fn test_read_into_pads_short_data() {
        let sector = Sector::with_data(SectorId::new(0, 0, 1, 1), SectorFlags::default(), vec![7; 4]);
        let mut buf = [0xFFu8; 8];
        sector.read_into(&mut buf);
        assert_eq!(buf, [7, 7, 7, 7, 0, 0, 0, 0]);
    }
}
