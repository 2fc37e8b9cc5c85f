//! D88 (PC-88/PC-98/X1) and D77 (FM-7) containers
//!
//! Both share one layout: a 0x2B0 byte header with a per-track offset
//! table, then tracks made of 16-byte sector headers each followed by
//! the sector data.

use crate::error::{FloppyError, Result};
use crate::format::constants::{le16, le32};
use crate::image::{
    check_write_len, ImageCodec, Sector, SectorFlags, SectorId, SectorInfo, Track, TrackTable,
};
use log::debug;

/// Header size
pub const D88_HEADER_SIZE: usize = 0x2B0;
/// Number of entries in the track offset table
pub const D88_TRACK_ENTRIES: usize = 164;
const NAME_LENGTH: usize = 17;
const WRITE_PROTECT_OFFSET: usize = 0x1A;
const MEDIA_TYPE_OFFSET: usize = 0x1B;
const DISK_SIZE_OFFSET: usize = 0x1C;
const TRACK_TABLE_OFFSET: usize = 0x20;
const SECTOR_HEADER_SIZE: usize = 16;

const STATUS_ID_CRC: u8 = 0xA0;
const STATUS_DATA_CRC: u8 = 0xB0;
const DELETED_MARK: u8 = 0x10;

/// D88 media type byte
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    /// 2D: 40 tracks, double sided, double density
    TwoD,
    /// 2DD: 80 tracks, double sided, double density
    TwoDD,
    /// 2HD: 77 tracks, double sided, high density
    TwoHD,
    /// 1D: single sided
    OneD,
    /// 1DD: single sided, 80 tracks
    OneDD,
}

impl MediaType {
    /// Decode the media byte
    pub fn from_byte(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(MediaType::TwoD),
            0x10 => Some(MediaType::TwoDD),
            0x20 => Some(MediaType::TwoHD),
            0x30 => Some(MediaType::OneD),
            0x40 => Some(MediaType::OneDD),
            _ => None,
        }
    }

    /// Encode the media byte
    pub fn to_byte(self) -> u8 {
        match self {
            MediaType::TwoD => 0x00,
            MediaType::TwoDD => 0x10,
            MediaType::TwoHD => 0x20,
            MediaType::OneD => 0x30,
            MediaType::OneDD => 0x40,
        }
    }

    /// Heads implied by the media type
    pub fn heads(self) -> u8 {
        match self {
            MediaType::OneD | MediaType::OneDD => 1,
            _ => 2,
        }
    }
}

/// Per-sector bytes kept for re-serialisation
#[derive(Debug, Clone, Copy, Default)]
struct SectorExtra {
    density: u8,
    status: u8,
}

/// A D88 or D77 image held as a track table
#[derive(Debug, Clone)]
pub struct D88Image {
    format_name: &'static str,
    name: [u8; NAME_LENGTH],
    media: MediaType,
    write_protected: bool,
    table: TrackTable,
    extra: Vec<Vec<SectorExtra>>,
    modified: bool,
}

/// Validate the header against the file and return the track offsets
fn track_offsets(data: &[u8]) -> Result<Vec<u32>> {
    if data.len() < D88_HEADER_SIZE {
        return Err(FloppyError::invalid_image("File too small for a D88 header"));
    }
    let disk_size = le32(data, DISK_SIZE_OFFSET) as usize;
    if disk_size != data.len() {
        return Err(FloppyError::invalid_image(format!(
            "Header disk size {} does not match file length {}",
            disk_size,
            data.len()
        )));
    }
    let offsets: Vec<u32> = (0..D88_TRACK_ENTRIES)
        .map(|i| le32(data, TRACK_TABLE_OFFSET + i * 4))
        .collect();
    for (i, &offset) in offsets.iter().enumerate() {
        let offset = offset as usize;
        if offset != 0 && (offset < D88_HEADER_SIZE || offset >= data.len()) {
            return Err(FloppyError::parse(
                TRACK_TABLE_OFFSET + i * 4,
                format!("Track offset {:#x} outside the image", offset),
            ));
        }
    }
    Ok(offsets)
}

impl D88Image {
    /// Identification confidence for D88: consistent header and a known media byte
    pub fn identify(data: &[u8]) -> u8 {
        match track_offsets(data) {
            Ok(_) if MediaType::from_byte(data[MEDIA_TYPE_OFFSET]).is_some() => 100,
            _ => 0,
        }
    }

    /// Identification confidence for D77: the size and offsets alone must be consistent
    pub fn identify_d77(data: &[u8]) -> u8 {
        match track_offsets(data) {
            Ok(offsets) if offsets[0] == D88_HEADER_SIZE as u32 => 80,
            _ => 0,
        }
    }

    /// Parse a D88 image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        Self::parse(data, "D88")
    }

    /// Parse a D77 image
    pub fn open_d77(data: Vec<u8>) -> Result<Self> {
        Self::parse(data, "D77")
    }

    fn parse(data: Vec<u8>, format_name: &'static str) -> Result<Self> {
        let offsets = track_offsets(&data)?;
        let media = MediaType::from_byte(data[MEDIA_TYPE_OFFSET]).unwrap_or(MediaType::TwoD);
        let heads = media.heads();
        let mut name = [0u8; NAME_LENGTH];
        name.copy_from_slice(&data[..NAME_LENGTH]);

        let last = offsets.iter().rposition(|&o| o != 0).unwrap_or(0);
        let tracks = (last / heads as usize + 1).min(u8::MAX as usize) as u8;
        let mut table = TrackTable::new(tracks, heads);
        let mut extra = vec![Vec::new(); tracks as usize * heads as usize];

        for (slot, &offset) in offsets.iter().enumerate().take(tracks as usize * heads as usize) {
            if offset == 0 {
                continue;
            }
            let track_num = (slot / heads as usize) as u8;
            let side = (slot % heads as usize) as u8;
            let (track, track_extra) = read_track(&data, offset as usize, track_num, side)?;
            if let Some(t) = table.get_mut(track_num, side) {
                *t = track;
            }
            extra[slot] = track_extra;
        }

        debug!(
            "Opened {} image: {:?}, {} tracks, {} heads",
            format_name, media, tracks, heads
        );
        Ok(Self {
            format_name,
            name,
            media,
            write_protected: data[WRITE_PROTECT_OFFSET] & 0x10 != 0,
            table,
            extra,
            modified: false,
        })
    }

    /// Disk name from the header, trimmed at the first NUL
    pub fn disk_name(&self) -> String {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_LENGTH);
        String::from_utf8_lossy(&self.name[..end]).into_owned()
    }

    /// Media type from the header
    pub fn media(&self) -> MediaType {
        self.media
    }
}

fn read_track(data: &[u8], offset: usize, track_num: u8, side: u8) -> Result<(Track, Vec<SectorExtra>)> {
    let mut track = Track::new(track_num, side);
    let mut extra = Vec::new();
    let mut pos = offset;
    let mut remaining: Option<usize> = None;

    while remaining != Some(0) {
        if pos + SECTOR_HEADER_SIZE > data.len() {
            return Err(FloppyError::parse(pos, "Sector header runs past the end of the image"));
        }
        let header = &data[pos..pos + SECTOR_HEADER_SIZE];
        let count = le16(header, 4) as usize;
        if count == 0 {
            break;
        }
        let left = remaining.unwrap_or(count);
        let size = le16(header, 14) as usize;
        let start = pos + SECTOR_HEADER_SIZE;
        if start + size > data.len() {
            return Err(FloppyError::parse(pos, "Sector data runs past the end of the image"));
        }

        let mut flags = SectorFlags::deleted(header[7] == DELETED_MARK);
        match header[8] {
            STATUS_ID_CRC => flags.set(SectorFlags::ID_CRC_ERROR, true),
            STATUS_DATA_CRC => flags.set(SectorFlags::DATA_CRC_ERROR, true),
            _ => {}
        }
        let id = SectorId::new(header[0], header[1], header[2], header[3]);
        track.add_sector(Sector::with_data(id, flags, data[start..start + size].to_vec()));
        extra.push(SectorExtra {
            density: header[6],
            status: header[8],
        });

        pos = start + size;
        remaining = Some(left - 1);
    }
    Ok((track, extra))
}

impl ImageCodec for D88Image {
    fn format_name(&self) -> &'static str {
        self.format_name
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
        track: u8,
        side: u8,
        index: usize,
        data: &[u8],
        ddam: bool,
    ) -> Result<()> {
        let format = self.format_name;
        let sector = self.table.sector_mut(track, side, index)?;
        check_write_len(format, sector.data().len(), data)?;
        sector.write(data, ddam);
        self.modified = true;
        Ok(())
    }

    fn read_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        self.table
            .get(track, side)
            .map(Track::data_stream)
            .ok_or(FloppyError::seek(track, side, 0))
    }

    fn can_write_track(&self) -> bool {
        true
    }

    fn write_track(&mut self, track: u8, side: u8, data: &[u8]) -> Result<()> {
        let t = self
            .table
            .get_mut(track, side)
            .ok_or(FloppyError::seek(track, side, 0))?;
        t.load_data_stream(data);
        self.modified = true;
        Ok(())
    }

    fn is_writable(&self) -> bool {
        !self.write_protected
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = vec![0u8; D88_HEADER_SIZE];
        out[..NAME_LENGTH].copy_from_slice(&self.name);
        out[WRITE_PROTECT_OFFSET] = if self.write_protected { 0x10 } else { 0 };
        out[MEDIA_TYPE_OFFSET] = self.media.to_byte();

        for (slot, track) in self.table.iter().enumerate() {
            if track.is_empty() || slot >= D88_TRACK_ENTRIES {
                continue;
            }
            let entry = TRACK_TABLE_OFFSET + slot * 4;
            let here = out.len() as u32;
            out[entry..entry + 4].copy_from_slice(&here.to_le_bytes());

            let count = track.sector_count() as u16;
            for (i, sector) in track.sectors().iter().enumerate() {
                let kept = self.extra.get(slot).and_then(|e| e.get(i)).copied().unwrap_or_default();
                let mut header = [0u8; SECTOR_HEADER_SIZE];
                header[..4].copy_from_slice(&sector.id.to_bytes());
                header[4..6].copy_from_slice(&count.to_le_bytes());
                header[6] = kept.density;
                header[7] = if sector.is_deleted() { DELETED_MARK } else { 0 };
                header[8] = if sector.flags.data_crc_error() {
                    STATUS_DATA_CRC
                } else if sector.flags.id_crc_error() {
                    STATUS_ID_CRC
                } else if kept.status == STATUS_DATA_CRC || kept.status == STATUS_ID_CRC {
                    0
                } else {
                    kept.status
                };
                header[14..16].copy_from_slice(&(sector.data().len() as u16).to_le_bytes());
                out.extend_from_slice(&header);
                out.extend_from_slice(sector.data());
            }
        }

        let size = out.len() as u32;
        out[DISK_SIZE_OFFSET..DISK_SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Two-sided 2D image with `tracks` cylinders of 16 x 256-byte sectors
    fn build_image(tracks: u8, media: u8) -> Vec<u8> {
        let heads = if media >= 0x30 { 1 } else { 2 };
        let mut out = vec![0u8; D88_HEADER_SIZE];
        out[..4].copy_from_slice(b"TEST");
        out[MEDIA_TYPE_OFFSET] = media;
        for t in 0..tracks {
            for s in 0..heads {
                let slot = t as usize * heads as usize + s as usize;
                let entry = TRACK_TABLE_OFFSET + slot * 4;
                let here = out.len() as u32;
                out[entry..entry + 4].copy_from_slice(&here.to_le_bytes());
                for r in 1..=16u8 {
                    let mut header = [0u8; SECTOR_HEADER_SIZE];
                    header[..4].copy_from_slice(&[t, s, r, 1]);
                    header[4..6].copy_from_slice(&16u16.to_le_bytes());
                    header[14..16].copy_from_slice(&256u16.to_le_bytes());
                    out.extend_from_slice(&header);
                    out.extend(std::iter::repeat(r).take(256));
                }
            }
        }
        let size = out.len() as u32;
        out[DISK_SIZE_OFFSET..DISK_SIZE_OFFSET + 4].copy_from_slice(&size.to_le_bytes());
        out
    }

    #[test]
    fn test_identify() {
        let image = build_image(2, 0x00);
        assert_eq!(D88Image::identify(&image), 100);
        assert_eq!(D88Image::identify_d77(&image), 80);

        let mut bad = image.clone();
        bad.truncate(bad.len() - 1);
        assert_eq!(D88Image::identify(&bad), 0);
        assert_eq!(D88Image::identify(&[0u8; 100]), 0);
    }

    #[test]
    fn test_geometry() {
        let mut image = D88Image::open(build_image(3, 0x00)).unwrap();
        assert_eq!(image.disk_name(), "TEST");
        assert_eq!(image.heads(), 2);
        assert_eq!(image.tracks(), 3);
        assert_eq!(image.sectors_per_track(2, 1), 16);
        let info = image.indexed_sector_info(2, 1, 4).unwrap();
        assert_eq!(info.id, SectorId::new(2, 1, 5, 1));

        let mut buf = [0u8; 256];
        image.read_indexed_sector(2, 1, 4, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 5));
    }

    #[test]
    fn test_single_sided_media() {
        let image = D88Image::open(build_image(2, 0x30)).unwrap();
        assert_eq!(image.heads(), 1);
        assert_eq!(image.tracks(), 2);
        assert_eq!(image.media(), MediaType::OneD);
    }

    #[test]
    fn test_round_trip_with_ddam() {
        let mut image = D88Image::open(build_image(1, 0x00)).unwrap();
        image.write_indexed_sector(0, 0, 2, &[0xC3; 256], true).unwrap();

        let bytes = image.to_bytes().unwrap();
        let mut reopened = D88Image::open(bytes).unwrap();
        assert!(reopened.indexed_sector_info(0, 0, 2).unwrap().flags.is_deleted());
        assert!(!reopened.indexed_sector_info(0, 0, 1).unwrap().flags.is_deleted());
        let mut buf = [0u8; 256];
        reopened.read_indexed_sector(0, 0, 2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xC3));
    }

    #[test]
    fn test_write_protect_flag() {
        let mut bytes = build_image(1, 0x00);
        bytes[WRITE_PROTECT_OFFSET] = 0x10;
        let image = D88Image::open(bytes).unwrap();
        assert!(!image.is_writable());
    }

    #[test]
    fn test_d77_name() {
        let image = D88Image::open_d77(build_image(1, 0x00)).unwrap();
        assert_eq!(image.format_name(), "D77");
    }
}
