//! Commodore 1541/1571 sector dumps (D64, D71)
//!
//! Identified by file size alone. Tracks are numbered from 1 on the disk
//! but addressed from 0 here; the ID field carries the 1-based number.

use crate::error::{FloppyError, Result};
use crate::format::gcr;
use crate::image::{check_write_len, ImageCodec, SectorFlags, SectorId, SectorInfo};
use log::debug;

const SECTOR_SIZE: usize = 256;
/// Track holding the BAM and disk ID (0-based)
const BAM_TRACK: u8 = 17;
const DISK_ID_OFFSET: usize = 0xA2;

/// Layout variant chosen from the file size
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct D64Layout {
    /// Tracks per side
    pub tracks: u8,
    /// 1 for D64, 2 for D71
    pub heads: u8,
    /// An error-info table follows the sector data
    pub has_error_table: bool,
}

/// Every size we accept, with its layout
const KNOWN_SIZES: [(usize, D64Layout); 8] = [
    (174848, D64Layout { tracks: 35, heads: 1, has_error_table: false }),
    (175531, D64Layout { tracks: 35, heads: 1, has_error_table: true }),
    (196608, D64Layout { tracks: 40, heads: 1, has_error_table: false }),
    (197376, D64Layout { tracks: 40, heads: 1, has_error_table: true }),
    (205312, D64Layout { tracks: 42, heads: 1, has_error_table: false }),
    (206114, D64Layout { tracks: 42, heads: 1, has_error_table: true }),
    (349696, D64Layout { tracks: 35, heads: 2, has_error_table: false }),
    (351062, D64Layout { tracks: 35, heads: 2, has_error_table: true }),
];

/// Sectors on a 0-based track (speed zones)
pub fn sectors_in_track(track: u8) -> usize {
    match track {
        0..=16 => 21,
        17..=23 => 19,
        24..=29 => 18,
        _ => 17,
    }
}

/// A D64 or D71 image
#[derive(Debug, Clone)]
pub struct D64Image {
    layout: D64Layout,
    data: Vec<u8>,
    /// Sector index of the first sector of each (side, track)
    track_start: Vec<usize>,
    modified: bool,
}

impl D64Image {
    /// Layout for a file size
    pub fn layout_for_size(len: usize) -> Option<D64Layout> {
        KNOWN_SIZES
            .iter()
            .find(|(size, _)| *size == len)
            .map(|(_, layout)| *layout)
    }

    /// Identification confidence for D64
    pub fn identify(data: &[u8]) -> u8 {
        match Self::layout_for_size(data.len()) {
            Some(layout) if layout.heads == 1 => 100,
            _ => 0,
        }
    }

    /// Identification confidence for D71
    pub fn identify_d71(data: &[u8]) -> u8 {
        match Self::layout_for_size(data.len()) {
            Some(layout) if layout.heads == 2 => 100,
            _ => 0,
        }
    }

    /// Open a D64 or D71 image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let layout = Self::layout_for_size(data.len()).ok_or_else(|| {
            FloppyError::invalid_image(format!("{} bytes is not a D64/D71 size", data.len()))
        })?;

        let mut track_start = Vec::with_capacity(layout.tracks as usize * layout.heads as usize);
        let mut next = 0;
        for _side in 0..layout.heads {
            for track in 0..layout.tracks {
                track_start.push(next);
                next += sectors_in_track(track);
            }
        }

        debug!(
            "Opened D64 image: {} tracks, {} heads, error table: {}",
            layout.tracks, layout.heads, layout.has_error_table
        );
        Ok(Self {
            layout,
            data,
            track_start,
            modified: false,
        })
    }

    /// Create a blank 35-track D64
    pub fn blank() -> Result<Self> {
        Self::open(vec![0u8; KNOWN_SIZES[0].0])
    }

    /// The layout chosen at open time
    pub fn layout(&self) -> D64Layout {
        self.layout
    }

    fn total_sectors(&self) -> usize {
        self.track_start.last().copied().unwrap_or(0)
            + sectors_in_track(self.layout.tracks.saturating_sub(1))
    }

    fn sector_number(&self, track: u8, side: u8, index: usize) -> Result<usize> {
        if track >= self.layout.tracks || side >= self.layout.heads || index >= sectors_in_track(track) {
            return Err(FloppyError::seek(track, side, index));
        }
        Ok(self.track_start[side as usize * self.layout.tracks as usize + track as usize] + index)
    }

    fn error_code(&self, sector: usize) -> u8 {
        if !self.layout.has_error_table {
            return 1;
        }
        let offset = self.total_sectors() * SECTOR_SIZE + sector;
        self.data.get(offset).copied().unwrap_or(1)
    }

    fn disk_id(&self) -> (u8, u8) {
        let offset = self.track_start[BAM_TRACK as usize] * SECTOR_SIZE + DISK_ID_OFFSET;
        (self.data[offset], self.data[offset + 1])
    }
}

impl ImageCodec for D64Image {
    fn format_name(&self) -> &'static str {
        if self.layout.heads == 2 {
            "D71"
        } else {
            "D64"
        }
    }

    fn heads(&self) -> u8 {
        self.layout.heads
    }

    fn tracks(&self) -> u8 {
        self.layout.tracks
    }

    fn sectors_per_track(&mut self, track: u8, side: u8) -> usize {
        if track < self.layout.tracks && side < self.layout.heads {
            sectors_in_track(track)
        } else {
            0
        }
    }

    fn indexed_sector_info(&mut self, track: u8, side: u8, index: usize) -> Result<SectorInfo> {
        let sector = self.sector_number(track, side, index)?;
        let mut flags = SectorFlags::default();
        match self.error_code(sector) {
            5 => flags.set(SectorFlags::DATA_CRC_ERROR, true),
            9 => flags.set(SectorFlags::ID_CRC_ERROR, true),
            _ => {}
        }
        Ok(SectorInfo::new(
            SectorId::new(track + 1, side, index as u8, 1),
            flags,
        ))
    }

    fn read_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        let offset = self.sector_number(track, side, index)? * SECTOR_SIZE;
        let len = SECTOR_SIZE.min(buf.len());
        buf[..len].copy_from_slice(&self.data[offset..offset + len]);
        Ok(())
    }

    fn write_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        data: &[u8],
        _ddam: bool,
    ) -> Result<()> {
        let sector = self.sector_number(track, side, index)?;
        check_write_len(self.format_name(), SECTOR_SIZE, data)?;
        let offset = sector * SECTOR_SIZE;
        self.data[offset..offset + SECTOR_SIZE].copy_from_slice(&data[..SECTOR_SIZE]);
        if self.layout.has_error_table {
            let error_offset = self.total_sectors() * SECTOR_SIZE + sector;
            self.data[error_offset] = 1;
        }
        self.modified = true;
        Ok(())
    }

    /// Synthesise the GCR bitstream a 1541 head would see
    fn read_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        let count = self.sectors_per_track(track, side);
        if count == 0 {
            return Err(FloppyError::seek(track, side, 0));
        }
        let gap = gcr::inter_sector_gap(count);
        let disk_id = self.disk_id();
        let mut out = Vec::with_capacity(count * 380);
        let mut buf = [0u8; SECTOR_SIZE];
        for index in 0..count {
            self.read_indexed_sector(track, side, index, &mut buf)?;
            gcr::write_sector(&mut out, track + 1, index as u8, disk_id, &buf, gap);
        }
        Ok(out)
    }

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(self.data.clone())
    }
}
