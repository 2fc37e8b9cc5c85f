//! Raw MFM track images ("MFM_DISK", Oric)
//!
//! The container has no sector table. Each 6400-byte track holds the
//! decoded MFM byte stream, and sectors are rebuilt by scanning for
//! A1 A1 A1 FE ID marks followed by FB/F8 data marks.

use crate::error::{FloppyError, Result};
use crate::format::constants::{fdc_size_to_bytes, le32, MFM_DISK_SIGNATURE};
use crate::format::crc::mfm_field_crc;
use crate::image::{check_write_len, ImageCodec, SectorFlags, SectorId, SectorInfo};
use log::{debug, trace};

const HEADER_SIZE: usize = 256;
/// Bytes per raw track
pub const TRACK_SIZE: usize = 6400;
const ID_MARK: u8 = 0xFE;
const DATA_MARK: u8 = 0xFB;
const DELETED_MARK: u8 = 0xF8;
/// Furthest a data mark may follow its ID field
const DATA_MARK_WINDOW: usize = 60;

#[derive(Debug, Clone, Copy)]
struct ScannedSector {
    info: SectorInfo,
    /// Offset of the data mark within the track, if one was found
    mark_offset: Option<usize>,
}

/// An MFM_DISK image
#[derive(Debug, Clone)]
pub struct MfmDisk {
    data: Vec<u8>,
    heads: u8,
    tracks: u8,
    /// 1 = all of side 0 first, otherwise tracks interleave sides
    geometry: u32,
    cache: Option<((u8, u8), Vec<ScannedSector>)>,
    modified: bool,
}

impl MfmDisk {
    /// Identification confidence for the registry
    pub fn identify(data: &[u8]) -> u8 {
        if data.starts_with(MFM_DISK_SIGNATURE) && Self::validate(data).is_ok() {
            100
        } else {
            0
        }
    }

    fn validate(data: &[u8]) -> Result<(u8, u8, u32)> {
        if data.len() < HEADER_SIZE || !data.starts_with(MFM_DISK_SIGNATURE) {
            return Err(FloppyError::invalid_image("Missing MFM_DISK signature"));
        }
        let heads = le32(data, 8);
        let tracks = le32(data, 12);
        let geometry = le32(data, 16);
        if heads == 0 || heads > 2 || tracks == 0 || tracks > u8::MAX as u32 {
            return Err(FloppyError::parse(
                8,
                format!("{} sides x {} tracks", heads, tracks),
            ));
        }
        let needed = HEADER_SIZE + heads as usize * tracks as usize * TRACK_SIZE;
        if needed > data.len() {
            return Err(FloppyError::invalid_image(format!(
                "Header needs {} bytes but the file is {}",
                needed,
                data.len()
            )));
        }
        Ok((heads as u8, tracks as u8, geometry))
    }

    /// Open an MFM_DISK image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let (heads, tracks, geometry) = Self::validate(&data)?;
        debug!(
            "Opened MFM_DISK image: {} tracks, {} sides, geometry {}",
            tracks, heads, geometry
        );
        Ok(Self {
            data,
            heads,
            tracks,
            geometry,
            cache: None,
            modified: false,
        })
    }

    /// Create an unformatted image (every track filled with 0x4E)
    pub fn blank(tracks: u8, heads: u8) -> Result<Self> {
        let size = HEADER_SIZE + tracks as usize * heads as usize * TRACK_SIZE;
        let mut data = crate::error::alloc_buffer(size, "MFM_DISK image")?;
        data[..MFM_DISK_SIGNATURE.len()].copy_from_slice(MFM_DISK_SIGNATURE);
        data[8..12].copy_from_slice(&(heads as u32).to_le_bytes());
        data[12..16].copy_from_slice(&(tracks as u32).to_le_bytes());
        data[16..20].copy_from_slice(&1u32.to_le_bytes());
        data[HEADER_SIZE..].fill(0x4E);
        Self::open(data)
    }

    fn track_offset(&self, track: u8, side: u8) -> Option<usize> {
        if track >= self.tracks || side >= self.heads {
            return None;
        }
        let index = if self.geometry == 1 {
            side as usize * self.tracks as usize + track as usize
        } else {
            track as usize * self.heads as usize + side as usize
        };
        Some(HEADER_SIZE + index * TRACK_SIZE)
    }

    fn scan(&mut self, track: u8, side: u8) -> &[ScannedSector] {
        let stale = !matches!(&self.cache, Some((key, _)) if *key == (track, side));
        if stale {
            let sectors = match self.track_offset(track, side) {
                Some(offset) => scan_track(&self.data[offset..offset + TRACK_SIZE]),
                None => Vec::new(),
            };
            trace!("MFM track {} side {}: {} sectors", track, side, sectors.len());
            self.cache = Some(((track, side), sectors));
        }
        match &self.cache {
            Some((_, sectors)) => sectors.as_slice(),
            None => &[],
        }
    }

    fn scanned(&mut self, track: u8, side: u8, index: usize) -> Result<ScannedSector> {
        self.scan(track, side)
            .get(index)
            .copied()
            .ok_or(FloppyError::seek(track, side, index))
    }
}

fn find_mark(bytes: &[u8], from: usize, to: usize, marks: &[u8]) -> Option<usize> {
    let to = to.min(bytes.len());
    (from..to.saturating_sub(3)).find(|&i| {
        bytes[i] == 0xA1 && bytes[i + 1] == 0xA1 && bytes[i + 2] == 0xA1 && marks.contains(&bytes[i + 3])
    })
}

/// Rebuild the sector table of one raw track
fn scan_track(bytes: &[u8]) -> Vec<ScannedSector> {
    let mut sectors = Vec::new();
    let mut pos = 0;
    while let Some(id_at) = find_mark(bytes, pos, bytes.len(), &[ID_MARK]) {
        let field = id_at + 4;
        if field + 6 > bytes.len() {
            break;
        }
        let chrn = &bytes[field..field + 4];
        let stored = u16::from_be_bytes([bytes[field + 4], bytes[field + 5]]);
        let mut flags = SectorFlags::default();
        flags.set(SectorFlags::ID_CRC_ERROR, mfm_field_crc(ID_MARK, chrn) != stored);
        let id = SectorId::new(chrn[0], chrn[1], chrn[2], chrn[3]);

        let search_from = field + 6;
        let mut next = search_from;
        let mark_offset = find_mark(
            bytes,
            search_from,
            search_from + DATA_MARK_WINDOW,
            &[DATA_MARK, DELETED_MARK],
        );
        if let Some(mark) = mark_offset {
            let data_at = mark + 4;
            let len = fdc_size_to_bytes(id.size_code);
            flags.set(SectorFlags::DELETED_DATA, bytes[mark + 3] == DELETED_MARK);
            let crc_ok = data_at + len + 2 <= bytes.len() && {
                let stored = u16::from_be_bytes([bytes[data_at + len], bytes[data_at + len + 1]]);
                mfm_field_crc(bytes[mark + 3], &bytes[data_at..data_at + len]) == stored
            };
            flags.set(SectorFlags::DATA_CRC_ERROR, !crc_ok);
            next = (data_at + len + 2).min(bytes.len());
        }

        sectors.push(ScannedSector {
            info: SectorInfo::new(id, flags),
            mark_offset,
        });
        pos = next;
    }
    sectors
}

/// Append a formatted sector (gap, syncs, ID field, gap, data field) to a track
pub fn write_sector(out: &mut Vec<u8>, id: SectorId, data: &[u8], ddam: bool) {
    out.extend(std::iter::repeat(0x4E).take(22));
    out.extend(std::iter::repeat(0x00).take(12));
    out.extend_from_slice(&[0xA1, 0xA1, 0xA1, ID_MARK]);
    let chrn = id.to_bytes();
    out.extend_from_slice(&chrn);
    out.extend_from_slice(&mfm_field_crc(ID_MARK, &chrn).to_be_bytes());
    out.extend(std::iter::repeat(0x4E).take(22));
    out.extend(std::iter::repeat(0x00).take(12));
    let mark = if ddam { DELETED_MARK } else { DATA_MARK };
    out.extend_from_slice(&[0xA1, 0xA1, 0xA1, mark]);
    out.extend_from_slice(data);
    out.extend_from_slice(&mfm_field_crc(mark, data).to_be_bytes());
}

impl ImageCodec for MfmDisk {
    fn format_name(&self) -> &'static str {
        "MFM_DISK"
    }

    fn heads(&self) -> u8 {
        self.heads
    }

    fn tracks(&self) -> u8 {
        self.tracks
    }

    fn sectors_per_track(&mut self, track: u8, side: u8) -> usize {
        self.scan(track, side).len()
    }

    fn indexed_sector_info(&mut self, track: u8, side: u8, index: usize) -> Result<SectorInfo> {
        Ok(self.scanned(track, side, index)?.info)
    }

    fn read_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let sector = self.scanned(track, side, index)?;
        let base = self
            .track_offset(track, side)
            .ok_or(FloppyError::seek(track, side, index))?;
        let mark = sector
            .mark_offset
            .ok_or_else(|| FloppyError::parse(base, "ID field without a data mark"))?;
        let start = base + mark + 4;
        let end = (start + sector.info.id.size_bytes()).min(base + TRACK_SIZE);
        let len = (end - start).min(buf.len());
        buf[..len].copy_from_slice(&self.data[start..start + len]);
        buf[len..].fill(0);
        Ok(())
    }

    fn write_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        data: &[u8],
        ddam: bool,
    ) -> Result<()> {
        let sector = self.scanned(track, side, index)?;
        let size = sector.info.id.size_bytes();
        check_write_len("MFM_DISK", size, data)?;
        let base = self
            .track_offset(track, side)
            .ok_or(FloppyError::seek(track, side, index))?;
        let mark = sector
            .mark_offset
            .ok_or_else(|| FloppyError::parse(base, "ID field without a data mark"))?;
        if mark + 4 + size + 2 > TRACK_SIZE {
            return Err(FloppyError::parse(base + mark, "Data field runs past the end of the track"));
        }

        let mark_byte = if ddam { DELETED_MARK } else { DATA_MARK };
        let start = base + mark + 4;
        self.data[base + mark + 3] = mark_byte;
        self.data[start..start + size].copy_from_slice(&data[..size]);
        let crc = mfm_field_crc(mark_byte, &data[..size]);
        self.data[start + size..start + size + 2].copy_from_slice(&crc.to_be_bytes());

        if let Some((_, sectors)) = &mut self.cache {
            if let Some(s) = sectors.get_mut(index) {
                s.info.flags.set(SectorFlags::DELETED_DATA, ddam);
                s.info.flags.set(SectorFlags::DATA_CRC_ERROR, false);
            }
        }
        self.modified = true;
        Ok(())
    }

    fn read_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        let base = self
            .track_offset(track, side)
            .ok_or(FloppyError::seek(track, side, 0))?;
        Ok(self.data[base..base + TRACK_SIZE].to_vec())
    }

    fn can_write_track(&self) -> bool {
        true
    }

    fn write_track(&mut self, track: u8, side: u8, data: &[u8]) -> Result<()> {
        let base = self
            .track_offset(track, side)
            .ok_or(FloppyError::seek(track, side, 0))?;
        let len = data.len().min(TRACK_SIZE);
        self.data[base..base + len].copy_from_slice(&data[..len]);
        self.data[base + len..base + TRACK_SIZE].fill(0x4E);
        self.cache = None;
        self.modified = true;
        Ok(())
    }

    fn head_moved(&mut self, track: u8) {
        if !matches!(&self.cache, Some(((t, _), _)) if *t == track) {
            self.cache = None;
        }
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn formatted(sectors: u8) -> MfmDisk {
        let mut image = MfmDisk::blank(2, 1).unwrap();
        let mut raw = Vec::new();
        for r in 1..=sectors {
            write_sector(&mut raw, SectorId::new(1, 0, r, 1), &[r; 256], false);
        }
        image.write_track(1, 0, &raw).unwrap();
        image
    }

    #[test]
    fn test_identify() {
        let image = MfmDisk::blank(2, 1).unwrap();
        let bytes = image.to_bytes().unwrap();
        assert_eq!(MfmDisk::identify(&bytes), 100);
        assert_eq!(MfmDisk::identify(&bytes[..1000]), 0);
    }

    #[test]
    fn test_unformatted_track_has_no_sectors() {
        let mut image = MfmDisk::blank(2, 1).unwrap();
        assert_eq!(image.sectors_per_track(0, 0), 0);
    }

    #[test]
    fn test_scan_finds_sectors() {
        let mut image = formatted(16);
        assert_eq!(image.sectors_per_track(1, 0), 16);
        let info = image.indexed_sector_info(1, 0, 2).unwrap();
        assert_eq!(info.id, SectorId::new(1, 0, 3, 1));
        assert_eq!(info.flags, SectorFlags::default());

        let mut buf = [0u8; 256];
        image.read_indexed_sector(1, 0, 2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 3));
    }

    #[test]
    fn test_write_sets_mark_and_crc() {
        let mut image = formatted(4);
        image.write_indexed_sector(1, 0, 1, &[0xAB; 256], true).unwrap();

        // force a rescan from the raw bytes
        image.head_moved(0);
        let info = image.indexed_sector_info(1, 0, 1).unwrap();
        assert!(info.flags.is_deleted());
        assert!(!info.flags.data_crc_error());
        let mut buf = [0u8; 256];
        image.read_indexed_sector(1, 0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAB));
    }

    #[test]
    fn test_corrupt_id_crc_flagged() {
        let mut image = formatted(2);
        let mut raw = image.read_track(1, 0).unwrap();
        // first ID field CRC sits after 22 + 12 + 4 + 4 bytes
        raw[42] ^= 0xFF;
        image.write_track(1, 0, &raw).unwrap();
        assert!(image.indexed_sector_info(1, 0, 0).unwrap().flags.id_crc_error());
        assert!(!image.indexed_sector_info(1, 0, 1).unwrap().flags.id_crc_error());
    }

    #[test]
    fn test_side_major_geometry() {
        let mut image = MfmDisk::blank(3, 2).unwrap();
        assert_eq!(image.track_offset(0, 1), Some(HEADER_SIZE + 3 * TRACK_SIZE));
        image.geometry = 2;
        assert_eq!(image.track_offset(0, 1), Some(HEADER_SIZE + TRACK_SIZE));
        assert!(image.read_track(3, 0).is_err());
    }
}
