//! G64 raw GCR track images
//!
//! Tracks are stored as the GCR byte stream. Sectors are found by
//! scanning for sync runs on byte boundaries; writes re-encode the data
//! block in place so the stream keeps its length.

use crate::error::{FloppyError, Result};
use crate::format::constants::{le16, le32, G64_SIGNATURE};
use crate::format::gcr;
use crate::image::{check_write_len, ImageCodec, SectorFlags, SectorId, SectorInfo};
use log::{debug, trace};

const HEADER_SIZE: usize = 0x0C;
const SECTOR_SIZE: usize = 256;

/// A sector found on a scanned track
#[derive(Debug, Clone, Copy)]
struct ScannedSector {
    info: SectorInfo,
    /// File offset of the encoded data block, if one followed the header
    data_offset: Option<usize>,
}

/// A G64 image
#[derive(Debug, Clone)]
pub struct G64Image {
    data: Vec<u8>,
    half_tracks: u8,
    /// Sector table of the last scanned track
    cache: Option<(u8, Vec<ScannedSector>)>,
    modified: bool,
}

impl G64Image {
    /// Identification confidence for the registry
    pub fn identify(data: &[u8]) -> u8 {
        if data.starts_with(G64_SIGNATURE) && Self::validate(data).is_ok() {
            100
        } else {
            0
        }
    }

    fn validate(data: &[u8]) -> Result<u8> {
        if data.len() < HEADER_SIZE || !data.starts_with(G64_SIGNATURE) {
            return Err(FloppyError::invalid_image("Missing GCR-1541 signature"));
        }
        let half_tracks = data[9];
        let table_end = HEADER_SIZE + half_tracks as usize * 8;
        if table_end > data.len() {
            return Err(FloppyError::invalid_image("Track tables run past the end of the file"));
        }
        for i in 0..half_tracks as usize {
            let offset = le32(data, HEADER_SIZE + i * 4) as usize;
            if offset == 0 {
                continue;
            }
            if offset + 2 > data.len() || offset + 2 + le16(data, offset) as usize > data.len() {
                return Err(FloppyError::parse(
                    HEADER_SIZE + i * 4,
                    format!("Half-track {} lies outside the file", i),
                ));
            }
        }
        Ok(half_tracks)
    }

    /// Open a G64 image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        let half_tracks = Self::validate(&data)?;
        debug!("Opened G64 image: version {}, {} half-tracks", data[8], half_tracks);
        Ok(Self {
            data,
            half_tracks,
            cache: None,
            modified: false,
        })
    }

    /// Build a G64 from whole-track GCR streams (one per full track)
    pub fn from_tracks(tracks: &[Vec<u8>]) -> Result<Self> {
        let half_tracks = (tracks.len() * 2).min(u8::MAX as usize) as u8;
        let max_len = tracks.iter().map(Vec::len).max().unwrap_or(0).max(7928);
        let mut out = Vec::new();
        out.extend_from_slice(G64_SIGNATURE);
        out.push(0);
        out.push(half_tracks);
        out.extend_from_slice(&(max_len as u16).to_le_bytes());
        let offsets_at = out.len();
        out.resize(offsets_at + half_tracks as usize * 8, 0);

        for (i, track) in tracks.iter().enumerate() {
            let offset = out.len() as u32;
            let entry = offsets_at + i * 2 * 4;
            out[entry..entry + 4].copy_from_slice(&offset.to_le_bytes());
            out.extend_from_slice(&(track.len() as u16).to_le_bytes());
            out.extend_from_slice(track);
            out.resize(out.len() + max_len - track.len(), gcr::GAP_BYTE);
        }
        Self::open(out)
    }

    /// (offset of the GCR bytes, length) for a full track
    fn track_bytes(&self, track: u8) -> Option<(usize, usize)> {
        let half = track as usize * 2;
        if half >= self.half_tracks as usize {
            return None;
        }
        let offset = le32(&self.data, HEADER_SIZE + half * 4) as usize;
        if offset == 0 {
            return None;
        }
        Some((offset + 2, le16(&self.data, offset) as usize))
    }

    fn scan(&mut self, track: u8) -> &[ScannedSector] {
        let stale = !matches!(&self.cache, Some((t, _)) if *t == track);
        if stale {
            let sectors = self.scan_track(track);
            trace!("G64 track {}: {} sectors", track, sectors.len());
            self.cache = Some((track, sectors));
        }
        match &self.cache {
            Some((_, sectors)) => sectors.as_slice(),
            None => &[],
        }
    }

    fn scan_track(&self, track: u8) -> Vec<ScannedSector> {
        let Some((start, len)) = self.track_bytes(track) else {
            return Vec::new();
        };
        let bytes = &self.data[start..start + len];
        let mut sectors: Vec<ScannedSector> = Vec::new();
        let mut pos = 0;

        while let Some(block_start) = next_block(bytes, pos) {
            pos = block_start;
            let Some(first) = bytes.get(block_start..block_start + 5).and_then(gcr::decode_group) else {
                pos += 1;
                continue;
            };
            match first[0] {
                gcr::HEADER_BLOCK_ID if block_start + gcr::HEADER_GCR_LENGTH <= bytes.len() => {
                    let decoded = gcr::decode(&bytes[block_start..block_start + gcr::HEADER_GCR_LENGTH]);
                    if let Some(header) = decoded.ok().as_deref().and_then(gcr::parse_header) {
                        let mut flags = SectorFlags::default();
                        flags.set(SectorFlags::ID_CRC_ERROR, !header.checksum_ok);
                        sectors.push(ScannedSector {
                            info: SectorInfo::new(
                                SectorId::new(header.track, 0, header.sector, 1),
                                flags,
                            ),
                            data_offset: None,
                        });
                    }
                    pos = block_start + gcr::HEADER_GCR_LENGTH;
                }
                gcr::DATA_BLOCK_ID if block_start + gcr::DATA_GCR_LENGTH <= bytes.len() => {
                    if let Some(last) = sectors.last_mut() {
                        if last.data_offset.is_none() {
                            last.data_offset = Some(start + block_start);
                            let ok = gcr::decode(&bytes[block_start..block_start + gcr::DATA_GCR_LENGTH])
                                .map(|block| gcr::data_checksum_ok(&block))
                                .unwrap_or(false);
                            last.info.flags.set(SectorFlags::DATA_CRC_ERROR, !ok);
                        }
                    }
                    pos = block_start + gcr::DATA_GCR_LENGTH;
                }
                _ => pos += 1,
            }
        }
        sectors
    }

    fn scanned(&mut self, track: u8, side: u8, index: usize) -> Result<ScannedSector> {
        if side != 0 {
            return Err(FloppyError::seek(track, side, index));
        }
        self.scan(track)
            .get(index)
            .copied()
            .ok_or(FloppyError::seek(track, side, index))
    }
}

/// Offset of the first non-sync byte after the next sync run
fn next_block(bytes: &[u8], from: usize) -> Option<usize> {
    let mut pos = from;
    while pos < bytes.len() {
        if bytes[pos] == 0xFF {
            let run_start = pos;
            while pos < bytes.len() && bytes[pos] == 0xFF {
                pos += 1;
            }
            if pos - run_start >= 2 && pos < bytes.len() {
                return Some(pos);
            }
        } else {
            pos += 1;
        }
    }
    None
}

impl ImageCodec for G64Image {
    fn format_name(&self) -> &'static str {
        "G64"
    }

    fn heads(&self) -> u8 {
        1
    }

    fn tracks(&self) -> u8 {
        self.half_tracks.div_ceil(2)
    }

    fn sectors_per_track(&mut self, track: u8, side: u8) -> usize {
        if side != 0 {
            return 0;
        }
        self.scan(track).len()
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
        let offset = sector
            .data_offset
            .ok_or_else(|| FloppyError::parse(0, "Sector header without a data block"))?;
        let block = gcr::decode(&self.data[offset..offset + gcr::DATA_GCR_LENGTH])
            .map_err(|_| FloppyError::parse(offset, "Invalid GCR in data block"))?;
        let len = SECTOR_SIZE.min(buf.len());
        buf[..len].copy_from_slice(&block[1..1 + len]);
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
        check_write_len("G64", SECTOR_SIZE, data)?;
        let sector = self.scanned(track, side, index)?;
        let offset = sector
            .data_offset
            .ok_or_else(|| FloppyError::parse(0, "Sector header without a data block"))?;
        let encoded = gcr::encode(&gcr::data_block(&data[..SECTOR_SIZE]));
        self.data[offset..offset + gcr::DATA_GCR_LENGTH].copy_from_slice(&encoded);
        if let Some((_, sectors)) = &mut self.cache {
            if let Some(s) = sectors.get_mut(index) {
                s.info.flags.set(SectorFlags::DATA_CRC_ERROR, false);
            }
        }
        self.modified = true;
        Ok(())
    }

    fn read_track(&mut self, track: u8, side: u8) -> Result<Vec<u8>> {
        match self.track_bytes(track) {
            Some((start, len)) if side == 0 => Ok(self.data[start..start + len].to_vec()),
            _ => Err(FloppyError::seek(track, side, 0)),
        }
    }

    fn head_moved(&mut self, track: u8) {
        if !matches!(&self.cache, Some((t, _)) if *t == track) {
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
