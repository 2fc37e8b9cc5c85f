//! Format magic bytes and constants

/// Standard CPC DSK format signature prefix
pub const STANDARD_DSK_SIGNATURE: &[u8] = b"MV - CPC";

/// Extended CPC DSK format signature prefix
pub const EXTENDED_DSK_SIGNATURE: &[u8] = b"EXTENDED";

/// Full standard header text written when creating images
pub const STANDARD_DSK_HEADER: &[u8] = b"MV - CPCEMU Disk-File\r\nDisk-Info\r\n";

/// Full extended header text written when creating images
pub const EXTENDED_DSK_HEADER: &[u8] = b"EXTENDED CPC DSK File\r\nDisk-Info\r\n";

/// Track-Info block marker
pub const TRACK_INFO_MARKER: &[u8] = b"Track-Info";

/// Creator signature for images built by this library
pub const CREATOR_SIGNATURE: &[u8] = b"floppyemu 0.1\0";

/// G64 signature
pub const G64_SIGNATURE: &[u8] = b"GCR-1541";

/// Oric raw MFM image signature
pub const MFM_DISK_SIGNATURE: &[u8] = b"MFM_DISK";

/// ImageDisk signature
pub const IMD_SIGNATURE: &[u8] = b"IMD ";

/// Teledisk signature (normal compression)
pub const TD0_SIGNATURE: &[u8] = b"TD";

/// Teledisk signature (advanced compression)
pub const TD0_ADVANCED_SIGNATURE: &[u8] = b"td";

/// Size of the DSK disk info block
pub const DISK_INFO_BLOCK_SIZE: usize = 256;

/// Size of the DSK track info block
pub const TRACK_INFO_BLOCK_SIZE: usize = 256;

/// Size of a DSK sector info entry
pub const SECTOR_INFO_SIZE: usize = 8;

/// Offset of track count in the DSK disk info block
pub const DISK_INFO_TRACK_COUNT_OFFSET: usize = 0x30;

/// Offset of side count in the DSK disk info block
pub const DISK_INFO_SIDE_COUNT_OFFSET: usize = 0x31;

/// Offset of the fixed track size (standard DSK)
pub const DISK_INFO_TRACK_SIZE_OFFSET: usize = 0x32;

/// Offset of the per-track size table (extended DSK)
pub const DISK_INFO_EXT_TRACK_SIZE_OFFSET: usize = 0x34;

/// Offset of creator in the DSK disk info block
pub const DISK_INFO_CREATOR_OFFSET: usize = 0x22;

/// Largest sector size code we accept (8 = 32 KiB)
pub const MAX_SIZE_CODE: u8 = 8;

/// FDC sector size code to actual byte size mapping
pub const FDC_SECTOR_SIZES: [usize; 9] = [
    128,   // 0
    256,   // 1
    512,   // 2
    1024,  // 3
    2048,  // 4
    4096,  // 5
    8192,  // 6
    16384, // 7
    32768, // 8
];

/// Convert FDC size code to actual byte size
#[inline]
pub fn fdc_size_to_bytes(size_code: u8) -> usize {
    if size_code as usize >= FDC_SECTOR_SIZES.len() {
        // Invalid size code, clamp to the largest
        FDC_SECTOR_SIZES[FDC_SECTOR_SIZES.len() - 1]
    } else {
        FDC_SECTOR_SIZES[size_code as usize]
    }
}

/// Convert byte size to FDC size code
#[inline]
pub fn bytes_to_fdc_size(bytes: usize) -> Option<u8> {
    FDC_SECTOR_SIZES
        .iter()
        .position(|&size| size == bytes)
        .map(|code| code as u8)
}

/// DSK containers never store more than 0x1800 bytes for one sector
#[inline]
pub fn fdc_size_to_stored_bytes(size_code: u8) -> usize {
    fdc_size_to_bytes(size_code).min(0x1800)
}

#[inline]
pub(crate) fn le16(data: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([data[offset], data[offset + 1]])
}

#[inline]
pub(crate) fn le32(data: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fdc_size_to_bytes() {
        assert_eq!(fdc_size_to_bytes(0), 128);
        assert_eq!(fdc_size_to_bytes(1), 256);
        assert_eq!(fdc_size_to_bytes(2), 512);
        assert_eq!(fdc_size_to_bytes(3), 1024);
        assert_eq!(fdc_size_to_bytes(8), 32768);
        assert_eq!(fdc_size_to_bytes(200), 32768);
    }

    #[test]
    fn test_bytes_to_fdc_size() {
        assert_eq!(bytes_to_fdc_size(128), Some(0));
        assert_eq!(bytes_to_fdc_size(256), Some(1));
        assert_eq!(bytes_to_fdc_size(1024), Some(3));
        assert_eq!(bytes_to_fdc_size(100), None);
    }

    #[test]
    fn test_stored_size_cap() {
        assert_eq!(fdc_size_to_stored_bytes(2), 512);
        assert_eq!(fdc_size_to_stored_bytes(6), 0x1800);
    }

    #[test]
    fn test_little_endian_helpers() {
        let data = [0x34, 0x12, 0x78, 0x56];
        assert_eq!(le16(&data, 0), 0x1234);
        assert_eq!(le32(&data, 0), 0x5678_1234);
    }
}
