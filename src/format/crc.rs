//! CRC helpers for address marks and container headers

/// CRC-16/CCITT (poly 0x1021, MSB first) as computed by WD/uPD765 controllers
pub fn crc16_ccitt(init: u16, data: &[u8]) -> u16 {
    let mut crc = init;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0x1021
            } else {
                crc << 1
            };
        }
    }
    crc
}

/// CRC over an MFM address mark: three 0xA1 syncs, the mark byte, then the field
pub fn mfm_field_crc(mark: u8, field: &[u8]) -> u16 {
    let crc = crc16_ccitt(0xFFFF, &[0xA1, 0xA1, 0xA1, mark]);
    crc16_ccitt(crc, field)
}

/// Teledisk CRC-16 (poly 0xA097, init 0, MSB first)
pub fn teledisk_crc(data: &[u8]) -> u16 {
    let mut crc: u16 = 0;
    for &byte in data {
        crc ^= (byte as u16) << 8;
        for _ in 0..8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ 0xA097
            } else {
                crc << 1
            };
        }
    }
    crc
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ccitt_check_value() {
        // CRC-16/CCITT-FALSE check value
        assert_eq!(crc16_ccitt(0xFFFF, b"123456789"), 0x29B1);
    }

    #[test]
    fn test_id_field_crc() {
        // ID field of cylinder 0, head 0, record 1, N=2
        assert_eq!(mfm_field_crc(0xFE, &[0, 0, 1, 2]), 0xCA6F);
    }

    #[test]
    fn test_teledisk_crc_empty() {
        assert_eq!(teledisk_crc(&[]), 0);
        assert_ne!(teledisk_crc(b"TD"), 0);
    }
}
