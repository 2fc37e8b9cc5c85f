//! Teledisk images (TD0)
//!
//! Only the normal "TD" container is decoded. Images saved with advanced
//! compression start with "td" and are refused. Teledisk images are opened
//! read-only.

use crate::error::{FloppyError, Result};
use crate::format::constants::{TD0_ADVANCED_SIGNATURE, TD0_SIGNATURE};
use crate::format::crc::teledisk_crc;
use crate::image::{
    ImageCodec, RecordingMode, Sector, SectorFlags, SectorId, SectorInfo, Track, TrackTable,
};
use log::{debug, warn};

const HEADER_SIZE: usize = 12;
const COMMENT_HEADER_SIZE: usize = 10;
const STEPPING_OFFSET: usize = 7;
const SIDES_OFFSET: usize = 9;
const COMMENT_FLAG: u8 = 0x80;
const END_OF_IMAGE: u8 = 0xFF;
/// Largest size code that carries a data block
const MAX_DATA_SIZE_CODE: u8 = 6;

/// Per-sector flag bits in the sector header
mod sector_flag {
    pub const DUPLICATE: u8 = 0x01;
    pub const CRC_ERROR: u8 = 0x02;
    pub const DELETED: u8 = 0x04;
    pub const NO_DATA: u8 = 0x30;
}

/// Bounds-checked reader over the image bytes
struct Cursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    fn new(data: &'a [u8], pos: usize) -> Self {
        Self { data, pos }
    }

    fn bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(len).filter(|&end| end <= self.data.len());
        match end {
            Some(end) => {
                let slice = &self.data[self.pos..end];
                self.pos = end;
                Ok(slice)
            }
            None => Err(FloppyError::parse(self.pos, "Unexpected end of Teledisk image")),
        }
    }

    fn u8(&mut self) -> Result<u8> {
        Ok(self.bytes(1)?[0])
    }

    fn u16(&mut self) -> Result<u16> {
        let b = self.bytes(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }
}

/// A Teledisk image
#[derive(Debug, Clone)]
pub struct Td0Image {
    table: TrackTable,
    comment: Option<String>,
    original: Vec<u8>,
}

impl Td0Image {
    /// Identification confidence for the registry
    pub fn identify(data: &[u8]) -> u8 {
        if data.len() < HEADER_SIZE {
            return 0;
        }
        let signature = &data[..2];
        if signature != TD0_SIGNATURE && signature != TD0_ADVANCED_SIGNATURE {
            return 0;
        }
        if header_crc_ok(data) {
            100
        } else {
            50
        }
    }

    /// Open a Teledisk image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        if data.len() < HEADER_SIZE {
            return Err(FloppyError::invalid_image("Teledisk header is truncated"));
        }
        if &data[..2] == TD0_ADVANCED_SIGNATURE {
            return Err(FloppyError::unsupported("TD0", "advanced compression"));
        }
        if &data[..2] != TD0_SIGNATURE {
            return Err(FloppyError::invalid_image("Missing Teledisk signature"));
        }
        if !header_crc_ok(&data) {
            warn!("Teledisk header CRC mismatch, continuing");
        }

        let heads = data[SIDES_OFFSET].clamp(1, 2);
        let mut cursor = Cursor::new(&data, HEADER_SIZE);
        let comment = if data[STEPPING_OFFSET] & COMMENT_FLAG != 0 {
            let header = cursor.bytes(COMMENT_HEADER_SIZE)?;
            let len = u16::from_le_bytes([header[2], header[3]]) as usize;
            let text = cursor.bytes(len)?;
            Some(
                text.split(|&b| b == 0)
                    .filter(|line| !line.is_empty())
                    .map(|line| String::from_utf8_lossy(line).into_owned())
                    .collect::<Vec<_>>()
                    .join("\n"),
            )
        } else {
            None
        };

        let mut table = TrackTable::new(0, heads);
        loop {
            if cursor.at_end() {
                warn!("Teledisk image ends without a terminator");
                break;
            }
            let count = cursor.u8()?;
            if count == END_OF_IMAGE {
                break;
            }
            let cylinder = cursor.u8()?;
            let head = cursor.u8()?;
            let _crc = cursor.u8()?;

            let mut track = Track::new(cylinder, head & 1);
            track.recording_mode = if head & 0x80 != 0 {
                RecordingMode::FM
            } else {
                RecordingMode::MFM
            };
            for _ in 0..count {
                let sector = read_sector(&mut cursor)?;
                track.add_sector(sector);
            }

            if head & 1 >= table.heads() {
                warn!("Teledisk track {} claims side {} on a single-sided image", cylinder, head & 1);
                continue;
            }
            table.ensure_track(cylinder);
            if let Some(slot) = table.get_mut(cylinder, head & 1) {
                *slot = track;
            }
        }

        debug!(
            "Opened Teledisk image: {} tracks, {} heads",
            table.track_count(),
            table.heads()
        );
        Ok(Self {
            table,
            comment,
            original: data,
        })
    }

    /// Comment block text, lines joined with newlines
    pub fn comment(&self) -> Option<&str> {
        self.comment.as_deref()
    }
}

fn header_crc_ok(data: &[u8]) -> bool {
    let stored = u16::from_le_bytes([data[10], data[11]]);
    teledisk_crc(&data[..10]) == stored
}

fn read_sector(cursor: &mut Cursor<'_>) -> Result<Sector> {
    let header = cursor.bytes(6)?;
    let id = SectorId::new(header[0], header[1], header[2], header[3]);
    let raw_flags = header[4];

    let mut flags = SectorFlags::default();
    flags.set(SectorFlags::DATA_CRC_ERROR, raw_flags & sector_flag::CRC_ERROR != 0);
    flags.set(SectorFlags::DELETED_DATA, raw_flags & sector_flag::DELETED != 0);
    if raw_flags & sector_flag::DUPLICATE != 0 {
        debug!("Teledisk sector R={} is a duplicate", id.sector);
    }

    let size = id.size_bytes();
    if raw_flags & sector_flag::NO_DATA != 0 || id.size_code > MAX_DATA_SIZE_CODE {
        return Ok(Sector::with_data(id, flags, vec![0; size]));
    }

    let len = cursor.u16()? as usize;
    let start = cursor.pos;
    let block = cursor.bytes(len)?;
    let (&encoding, payload) = block
        .split_first()
        .ok_or_else(|| FloppyError::parse(start, "Empty Teledisk data block"))?;
    let mut data = decode_block(encoding, payload, size, start)?;
    data.resize(size, 0);
    Ok(Sector::with_data(id, flags, data))
}

/// Expand one data block into at most `size` bytes
fn decode_block(encoding: u8, payload: &[u8], size: usize, offset: usize) -> Result<Vec<u8>> {
    let truncated = || FloppyError::parse(offset, "Truncated Teledisk data block");
    let mut out = Vec::with_capacity(size);
    match encoding {
        0 => out.extend_from_slice(&payload[..payload.len().min(size)]),
        1 => {
            if payload.len() < 4 {
                return Err(truncated());
            }
            let count = u16::from_le_bytes([payload[0], payload[1]]) as usize;
            for _ in 0..count {
                if out.len() >= size {
                    break;
                }
                out.extend_from_slice(&payload[2..4]);
            }
        }
        2 => {
            let mut pos = 0;
            while out.len() < size && pos < payload.len() {
                let kind = payload[pos];
                let count = *payload.get(pos + 1).ok_or_else(truncated)? as usize;
                pos += 2;
                if kind == 0 {
                    let literal = payload.get(pos..pos + count).ok_or_else(truncated)?;
                    out.extend_from_slice(literal);
                    pos += count;
                } else {
                    let pattern_len = 1usize << kind.min(8);
                    let pattern = payload.get(pos..pos + pattern_len).ok_or_else(truncated)?;
                    for _ in 0..count {
                        out.extend_from_slice(pattern);
                    }
                    pos += pattern_len;
                }
            }
        }
        other => {
            return Err(FloppyError::parse(
                offset,
                format!("Unknown Teledisk sector encoding {}", other),
            ))
        }
    }
    out.truncate(size);
    Ok(out)
}

impl ImageCodec for Td0Image {
    fn format_name(&self) -> &'static str {
        "TD0"
    }

    fn heads(&self) -> u8 {
        self.table.heads()
    }

    fn tracks(&self) -> u8 {
        self.table.track_count()
    }

    fn sectors_per_track(&mut self, track: u8, side: u8) -> usize {
        self.table.sectors_per_track(track, side)
    }

    fn indexed_sector_info(&mut self, track: u8, side: u8, index: usize) -> Result<SectorInfo> {
        Ok(self.table.sector(track, side, index)?.info())
    }

    fn read_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        self.table.sector(track, side, index)?.read_into(buf);
        Ok(())
    }

    fn write_indexed_sector(
        &mut self,
        _track: u8,
        _side: u8,
        _index: usize,
        _data: &[u8],
        _ddam: bool,
    ) -> Result<()> {
        Err(FloppyError::unsupported("TD0", "write_indexed_sector"))
    }

    fn read_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        self.table
            .get(track, side)
            .map(Track::data_stream)
            .ok_or(FloppyError::seek(track, side, 0))
    }

    fn is_writable(&self) -> bool {
        false
    }

    fn is_modified(&self) -> bool {
        false
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.original.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(sides: u8, stepping: u8) -> Vec<u8> {
        let mut out = vec![b'T', b'D', 0, 0, 0x15, 0x02, 0x03, stepping, 0, sides];
        let crc = teledisk_crc(&out);
        out.extend_from_slice(&crc.to_le_bytes());
        out
    }

    fn push_sector(out: &mut Vec<u8>, chrn: [u8; 4], flags: u8, encoding: u8, payload: &[u8]) {
        out.extend_from_slice(&chrn);
        out.push(flags);
        out.push(0);
        if flags & 0x30 == 0 {
            out.extend_from_slice(&(payload.len() as u16 + 1).to_le_bytes());
            out.push(encoding);
            out.extend_from_slice(payload);
        }
    }

    fn sample() -> Vec<u8> {
        let mut out = header(1, 0);
        // track 0 side 0, three sectors of 128 bytes
        out.extend_from_slice(&[3, 0, 0, 0]);
        push_sector(&mut out, [0, 0, 1, 0], 0, 0, &[0x11; 128]);
        // 64 repeats of 0xAB 0xCD
        push_sector(&mut out, [0, 0, 2, 0], 0x04, 1, &[64, 0, 0xAB, 0xCD]);
        // RLE: 4 literal bytes, then 62 repeats of a 2-byte pattern
        push_sector(
            &mut out,
            [0, 0, 3, 0],
            0x02,
            2,
            &[0, 4, 1, 2, 3, 4, 1, 62, 0xEE, 0xFF],
        );
        // track 1 side 0, one sector without data
        out.extend_from_slice(&[1, 1, 0, 0]);
        push_sector(&mut out, [1, 0, 1, 1], 0x10, 0, &[]);
        out.push(0xFF);
        out
    }

    #[test]
    fn test_identify() {
        let data = sample();
        assert_eq!(Td0Image::identify(&data), 100);

        let mut bad_crc = data.clone();
        bad_crc[10] ^= 0xFF;
        assert_eq!(Td0Image::identify(&bad_crc), 50);
        assert_eq!(Td0Image::identify(b"IMD 1.18"), 0);
    }

    #[test]
    fn test_advanced_compression_unsupported() {
        let mut data = sample();
        data[0] = b't';
        data[1] = b'd';
        let err = Td0Image::open(data).unwrap_err();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_sector_encodings() {
        let mut image = Td0Image::open(sample()).unwrap();
        assert_eq!(image.tracks(), 2);
        assert_eq!(image.heads(), 1);
        assert_eq!(image.sectors_per_track(0, 0), 3);

        let mut buf = [0u8; 128];
        image.read_indexed_sector(0, 0, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x11));

        image.read_indexed_sector(0, 0, 1, &mut buf).unwrap();
        assert_eq!(&buf[..4], &[0xAB, 0xCD, 0xAB, 0xCD]);
        assert!(image.indexed_sector_info(0, 0, 1).unwrap().flags.is_deleted());

        image.read_indexed_sector(0, 0, 2, &mut buf).unwrap();
        assert_eq!(&buf[..6], &[1, 2, 3, 4, 0xEE, 0xFF]);
        assert_eq!(&buf[126..], &[0xEE, 0xFF]);
        assert!(image.indexed_sector_info(0, 0, 2).unwrap().flags.data_crc_error());
    }

    #[test]
    fn test_missing_data_is_zero_filled() {
        let mut image = Td0Image::open(sample()).unwrap();
        let info = image.indexed_sector_info(1, 0, 0).unwrap();
        assert_eq!(info.id.size_bytes(), 256);
        let mut buf = [0xFFu8; 256];
        image.read_indexed_sector(1, 0, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));
    }

    #[test]
    fn test_read_only() {
        let mut image = Td0Image::open(sample()).unwrap();
        assert!(!image.is_writable());
        let err = image.write_indexed_sector(0, 0, 0, &[0; 128], false).unwrap_err();
        assert!(err.is_unsupported());
        assert_eq!(image.to_bytes().unwrap(), sample());
    }

    #[test]
    fn test_comment_block() {
        let mut data = header(1, 0x80);
        let text = b"Line one\0Line two\0";
        data.extend_from_slice(&[0, 0]);
        data.extend_from_slice(&(text.len() as u16).to_le_bytes());
        data.extend_from_slice(&[90, 1, 1, 0, 0, 0]);
        data.extend_from_slice(text);
        data.push(0xFF);

        let image = Td0Image::open(data).unwrap();
        assert_eq!(image.comment(), Some("Line one\nLine two"));
        assert_eq!(image.tracks(), 0);
    }

    #[test]
    fn test_truncated_image() {
        let data = sample();
        let err = Td0Image::open(data[..40].to_vec()).unwrap_err();
        assert!(matches!(err, FloppyError::Parse { .. }));
    }
}
