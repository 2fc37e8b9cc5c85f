//! Commodore 4-to-5 group coded recording
//!
//! Every nibble is written as a 5-bit code with no more than two
//! consecutive zero bits, so four data bytes become five disk bytes.

use crate::error::{FloppyError, Result};

/// Nibble to 5-bit GCR code
pub const GCR_ENCODE: [u8; 16] = [
    0x0A, 0x0B, 0x12, 0x13, 0x0E, 0x0F, 0x16, 0x17, 0x09, 0x19, 0x1A, 0x1B, 0x0D, 0x1D, 0x1E, 0x15,
];

/// Length of the sync run preceding header and data blocks
pub const SYNC_LENGTH: usize = 5;

/// Header block ID
pub const HEADER_BLOCK_ID: u8 = 0x08;

/// Data block ID
pub const DATA_BLOCK_ID: u8 = 0x07;

/// Encoded header block length (8 bytes in, 10 out)
pub const HEADER_GCR_LENGTH: usize = 10;

/// Encoded data block length (260 bytes in, 325 out)
pub const DATA_GCR_LENGTH: usize = 325;

/// Gap between the header block and the data sync
pub const HEADER_GAP_LENGTH: usize = 9;

/// Gap byte
pub const GAP_BYTE: u8 = 0x55;

fn gcr_decode_nibble(code: u8) -> Option<u8> {
    GCR_ENCODE.iter().position(|&c| c == code).map(|n| n as u8)
}

/// Encode 4 bytes into 5 GCR bytes
pub fn encode_group(input: &[u8; 4]) -> [u8; 5] {
    let mut bits: u64 = 0;
    for &byte in input {
        bits = (bits << 5) | GCR_ENCODE[(byte >> 4) as usize] as u64;
        bits = (bits << 5) | GCR_ENCODE[(byte & 0x0F) as usize] as u64;
    }
    [
        (bits >> 32) as u8,
        (bits >> 24) as u8,
        (bits >> 16) as u8,
        (bits >> 8) as u8,
        bits as u8,
    ]
}

/// Decode 5 GCR bytes into 4 bytes; `None` if any code is invalid
pub fn decode_group(input: &[u8]) -> Option<[u8; 4]> {
    if input.len() < 5 {
        return None;
    }
    let mut bits: u64 = 0;
    for &byte in &input[..5] {
        bits = (bits << 8) | byte as u64;
    }
    let mut out = [0u8; 4];
    for (i, slot) in out.iter_mut().enumerate() {
        let shift = 30 - i * 10;
        let hi = gcr_decode_nibble(((bits >> (shift + 5)) & 0x1F) as u8)?;
        let lo = gcr_decode_nibble(((bits >> shift) & 0x1F) as u8)?;
        *slot = (hi << 4) | lo;
    }
    Some(out)
}

/// Encode a buffer whose length is a multiple of 4
pub fn encode(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len() / 4 * 5);
    for chunk in input.chunks_exact(4) {
        out.extend_from_slice(&encode_group(&[chunk[0], chunk[1], chunk[2], chunk[3]]));
    }
    out
}

/// Decode a GCR buffer whose length is a multiple of 5
pub fn decode(input: &[u8]) -> Result<Vec<u8>> {
    let mut out = Vec::with_capacity(input.len() / 5 * 4);
    for (n, chunk) in input.chunks_exact(5).enumerate() {
        let group = decode_group(chunk)
            .ok_or_else(|| FloppyError::parse(n * 5, "Invalid GCR code"))?;
        out.extend_from_slice(&group);
    }
    Ok(out)
}

/// Inter-sector gap length for a zone, keyed by its sector count
pub fn inter_sector_gap(sectors_per_track: usize) -> usize {
    match sectors_per_track {
        21 => 8,
        19 => 17,
        18 => 12,
        _ => 9,
    }
}

/// The 8 plain bytes of a sector header block
pub fn header_block(track: u8, sector: u8, id1: u8, id2: u8) -> [u8; 8] {
    let checksum = sector ^ track ^ id2 ^ id1;
    [HEADER_BLOCK_ID, checksum, sector, track, id2, id1, 0x0F, 0x0F]
}

/// The 260 plain bytes of a sector data block
pub fn data_block(data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(260);
    block.push(DATA_BLOCK_ID);
    let mut payload = [0u8; 256];
    let len = data.len().min(256);
    payload[..len].copy_from_slice(&data[..len]);
    block.extend_from_slice(&payload);
    block.push(payload.iter().fold(0, |acc, &b| acc ^ b));
    block.extend_from_slice(&[0x00, 0x00]);
    block
}

/// Append one complete sector (sync, header, gap, sync, data, gap) to a track
pub fn write_sector(
    out: &mut Vec<u8>,
    track: u8,
    sector: u8,
    disk_id: (u8, u8),
    data: &[u8],
    gap: usize,
) {
    out.extend(std::iter::repeat(0xFF).take(SYNC_LENGTH));
    out.extend_from_slice(&encode(&header_block(track, sector, disk_id.0, disk_id.1)));
    out.extend(std::iter::repeat(GAP_BYTE).take(HEADER_GAP_LENGTH));
    out.extend(std::iter::repeat(0xFF).take(SYNC_LENGTH));
    out.extend_from_slice(&encode(&data_block(data)));
    out.extend(std::iter::repeat(GAP_BYTE).take(gap));
}

/// A decoded header block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcrHeader {
    /// Track number as recorded (1-based)
    pub track: u8,
    /// Sector number
    pub sector: u8,
    /// Header checksum matched
    pub checksum_ok: bool,
}

/// Parse a decoded header block
pub fn parse_header(block: &[u8]) -> Option<GcrHeader> {
    if block.len() < 6 || block[0] != HEADER_BLOCK_ID {
        return None;
    }
    let sector = block[2];
    let track = block[3];
    Some(GcrHeader {
        track,
        sector,
        checksum_ok: block[1] == sector ^ track ^ block[4] ^ block[5],
    })
}

/// Check a decoded data block's ID and checksum
pub fn data_checksum_ok(block: &[u8]) -> bool {
    block.len() >= 258
        && block[0] == DATA_BLOCK_ID
        && block[1..257].iter().fold(0, |acc, &b| acc ^ b) == block[257]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_known_group() {
        // four zero nibble pairs all encode as 01010
        let out = encode_group(&[0x00, 0x00, 0x00, 0x00]);
        assert_eq!(out, [0x52, 0x94, 0xA5, 0x29, 0x4A]);
    }

    #[test]
    fn test_no_long_zero_runs() {
        for &code in &GCR_ENCODE {
            // never three zero bits in a row inside a code
            for shift in 0..3 {
                assert_ne!((code >> shift) & 0x07, 0, "code {:05b}", code);
            }
        }
    }

    #[test]
    fn test_decode_inverts_encode() {
        let plain: Vec<u8> = (0..=255u8).collect();
        let gcr = encode(&plain);
        assert_eq!(gcr.len(), 320);
        assert_eq!(decode(&gcr).unwrap(), plain);
    }

    #[test]
    fn test_invalid_code_rejected() {
        assert!(decode_group(&[0, 0, 0, 0, 0]).is_none());
        assert!(decode(&[0u8; 5]).is_err());
    }

    #[test]
    fn test_block_sizes() {
        assert_eq!(encode(&header_block(1, 0, 0x41, 0x42)).len(), HEADER_GCR_LENGTH);
        assert_eq!(encode(&data_block(&[0u8; 256])).len(), DATA_GCR_LENGTH);
    }

    #[test]
    fn test_header_checksum() {
        let block = header_block(18, 3, 0x30, 0x31);
        let header = parse_header(&block).unwrap();
        assert_eq!(header.track, 18);
        assert_eq!(header.sector, 3);
        assert!(header.checksum_ok);
    }

    #[test]
    fn test_data_checksum() {
        let mut block = data_block(&[0xAA; 256]);
        assert!(data_checksum_ok(&block));
        block[10] ^= 1;
        assert!(!data_checksum_ok(&block));
    }
}
