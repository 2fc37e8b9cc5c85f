//! CPCEMU standard and extended DSK containers

use crate::error::{FloppyError, Result};
use crate::format::constants::*;
use crate::format::status::{flags_from_status, status_from_flags, Status1, Status2};
use crate::image::{
    check_write_len, ImageCodec, RecordingMode, Sector, SectorId, SectorInfo, Track, TrackTable,
};
use log::{debug, warn};

/// Which DSK flavour the image was read from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DskVariant {
    /// Fixed track size ("MV - CPC")
    Standard,
    /// Per-track sizes ("EXTENDED")
    Extended,
}

impl DskVariant {
    /// Get a human-readable name for this variant
    pub fn name(&self) -> &'static str {
        match self {
            DskVariant::Standard => "DSK",
            DskVariant::Extended => "EDSK",
        }
    }
}

/// Stored ST1/ST2 per sector, indexed like the track table
#[derive(Debug, Clone, Default)]
struct TrackStatus {
    status: Vec<(Status1, Status2)>,
}

/// A CPC DSK image held as a track table
#[derive(Debug, Clone)]
pub struct DskImage {
    variant: DskVariant,
    table: TrackTable,
    status: Vec<TrackStatus>,
    modified: bool,
}

/// Detect DSK variant from the signature
pub fn detect_variant(header: &[u8]) -> Option<DskVariant> {
    if header.starts_with(EXTENDED_DSK_SIGNATURE) {
        Some(DskVariant::Extended)
    } else if header.starts_with(STANDARD_DSK_SIGNATURE) {
        Some(DskVariant::Standard)
    } else {
        None
    }
}

impl DskImage {
    /// Identification confidence for the registry
    pub fn identify(data: &[u8]) -> u8 {
        if data.len() < DISK_INFO_BLOCK_SIZE {
            return 0;
        }
        match detect_variant(data) {
            Some(_) if track_layout(data).is_ok() => 100,
            Some(_) => 10,
            None => 0,
        }
    }

    /// Parse a DSK image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        if data.len() < DISK_INFO_BLOCK_SIZE {
            return Err(FloppyError::invalid_image("File too small for a disk info block"));
        }
        let variant = detect_variant(&data)
            .ok_or_else(|| FloppyError::invalid_image("Unknown DSK signature"))?;
        let tracks = data[DISK_INFO_TRACK_COUNT_OFFSET];
        let heads = data[DISK_INFO_SIDE_COUNT_OFFSET];
        if heads == 0 || heads > 2 {
            return Err(FloppyError::parse(
                DISK_INFO_SIDE_COUNT_OFFSET,
                format!("{} sides", heads),
            ));
        }

        let layout = track_layout(&data)?;
        let mut table = TrackTable::new(tracks, heads);
        let mut status = vec![TrackStatus::default(); tracks as usize * heads as usize];

        for (slot, &(offset, size)) in layout.iter().enumerate() {
            let track_num = (slot / heads as usize) as u8;
            let side = (slot % heads as usize) as u8;
            if size == 0 {
                continue;
            }
            let (track, track_status) =
                read_track_block(variant, &data[offset..offset + size], offset, track_num, side)?;
            if let Some(t) = table.get_mut(track_num, side) {
                *t = track;
            }
            status[slot] = track_status;
        }

        debug!(
            "Opened {} image: {} tracks, {} sides",
            variant.name(),
            tracks,
            heads
        );
        Ok(Self {
            variant,
            table,
            status,
            modified: false,
        })
    }

    /// Build an image from a prepared track table
    pub fn from_table(variant: DskVariant, table: TrackTable) -> Self {
        let status = table
            .iter()
            .map(|t| TrackStatus {
                status: t
                    .sectors()
                    .iter()
                    .map(|s| status_from_flags(s.flags, Status1::default(), Status2::default()))
                    .collect(),
            })
            .collect();
        Self {
            variant,
            table,
            status,
            modified: false,
        }
    }

    /// DSK flavour
    pub fn variant(&self) -> DskVariant {
        self.variant
    }

    /// The underlying track table
    pub fn table(&self) -> &TrackTable {
        &self.table
    }

    /// Stored ST1/ST2 of a sector
    pub fn sector_status(&self, track: u8, side: u8, index: usize) -> Option<(Status1, Status2)> {
        let slot = track as usize * self.table.heads() as usize + side as usize;
        self.status.get(slot)?.status.get(index).copied()
    }

    fn write_info_block(&self, out: &mut Vec<u8>, track_sizes: &[usize]) {
        let start = out.len();
        out.resize(start + DISK_INFO_BLOCK_SIZE, 0);
        let info = &mut out[start..];
        let header = match self.variant {
            DskVariant::Standard => STANDARD_DSK_HEADER,
            DskVariant::Extended => EXTENDED_DSK_HEADER,
        };
        info[..header.len()].copy_from_slice(header);
        let creator_len = CREATOR_SIGNATURE.len().min(14);
        info[DISK_INFO_CREATOR_OFFSET..DISK_INFO_CREATOR_OFFSET + creator_len]
            .copy_from_slice(&CREATOR_SIGNATURE[..creator_len]);
        info[DISK_INFO_TRACK_COUNT_OFFSET] = self.table.track_count();
        info[DISK_INFO_SIDE_COUNT_OFFSET] = self.table.heads();

        match self.variant {
            DskVariant::Standard => {
                let size = track_sizes.iter().copied().max().unwrap_or(0) as u16;
                info[DISK_INFO_TRACK_SIZE_OFFSET..DISK_INFO_TRACK_SIZE_OFFSET + 2]
                    .copy_from_slice(&size.to_le_bytes());
            }
            DskVariant::Extended => {
                for (i, &size) in track_sizes.iter().enumerate() {
                    let offset = DISK_INFO_EXT_TRACK_SIZE_OFFSET + i;
                    if offset < DISK_INFO_BLOCK_SIZE {
                        info[offset] = size.div_ceil(256) as u8;
                    }
                }
            }
        }
    }
}

/// (offset, size) of every track block, validated against the file length
fn track_layout(data: &[u8]) -> Result<Vec<(usize, usize)>> {
    let variant = detect_variant(data)
        .ok_or_else(|| FloppyError::invalid_image("Unknown DSK signature"))?;
    let tracks = data[DISK_INFO_TRACK_COUNT_OFFSET] as usize;
    let heads = data[DISK_INFO_SIDE_COUNT_OFFSET] as usize;
    let count = tracks * heads;
    if variant == DskVariant::Extended && DISK_INFO_EXT_TRACK_SIZE_OFFSET + count > DISK_INFO_BLOCK_SIZE {
        return Err(FloppyError::parse(
            DISK_INFO_TRACK_COUNT_OFFSET,
            format!("{} tracks x {} sides do not fit the size table", tracks, heads),
        ));
    }

    let mut layout = Vec::with_capacity(count);
    let mut offset = DISK_INFO_BLOCK_SIZE;
    for i in 0..count {
        let size = match variant {
            DskVariant::Standard => le16(data, DISK_INFO_TRACK_SIZE_OFFSET) as usize,
            DskVariant::Extended => data[DISK_INFO_EXT_TRACK_SIZE_OFFSET + i] as usize * 256,
        };
        if offset + size > data.len() {
            return Err(FloppyError::invalid_image(format!(
                "Track block {} ends at {} but the file is {} bytes",
                i,
                offset + size,
                data.len()
            )));
        }
        layout.push((offset, size));
        offset += size;
    }
    Ok(layout)
}

fn read_track_block(
    variant: DskVariant,
    block: &[u8],
    file_offset: usize,
    track_num: u8,
    side: u8,
) -> Result<(Track, TrackStatus)> {
    if block.len() < TRACK_INFO_BLOCK_SIZE || !block.starts_with(TRACK_INFO_MARKER) {
        return Err(FloppyError::parse(file_offset, "Invalid Track-Info block"));
    }

    let mut track = Track::new(track_num, side);
    track.recording_mode = match block[0x13] {
        1 => RecordingMode::FM,
        2 => RecordingMode::MFM,
        _ => RecordingMode::Unknown,
    };
    // standard images size every sector from the track header N
    let track_size_code = block[0x14];
    let num_sectors = block[0x15] as usize;
    track.gap3_length = block[0x16];
    track.filler_byte = block[0x17];

    let mut status = TrackStatus::default();
    let mut data_offset = TRACK_INFO_BLOCK_SIZE;
    for i in 0..num_sectors {
        let sib_offset = 0x18 + i * SECTOR_INFO_SIZE;
        if sib_offset + SECTOR_INFO_SIZE > TRACK_INFO_BLOCK_SIZE {
            warn!("Track {} side {} lists more sectors than fit", track_num, side);
            break;
        }
        let sib = &block[sib_offset..sib_offset + SECTOR_INFO_SIZE];
        let id = SectorId::new(sib[0], sib[1], sib[2], sib[3]);
        let st1 = Status1(sib[4]);
        let st2 = Status2(sib[5]);
        let size = match variant {
            DskVariant::Standard => fdc_size_to_stored_bytes(track_size_code),
            DskVariant::Extended => match le16(sib, 6) as usize {
                0 => fdc_size_to_stored_bytes(id.size_code),
                stored => stored,
            },
        };

        if data_offset + size > block.len() {
            return Err(FloppyError::parse(
                file_offset + data_offset,
                format!("Sector {} data runs past its track block", id.sector),
            ));
        }
        let data = block[data_offset..data_offset + size].to_vec();
        data_offset += size;

        track.add_sector(Sector::with_data(id, flags_from_status(st1, st2), data));
        status.status.push((st1, st2));
    }
    Ok((track, status))
}

fn write_track_block(
    out: &mut Vec<u8>,
    variant: DskVariant,
    track: &Track,
    status: &TrackStatus,
    size: usize,
) {
    let start = out.len();
    out.resize(start + size, 0);
    let block = &mut out[start..];
    block[..TRACK_INFO_MARKER.len()].copy_from_slice(TRACK_INFO_MARKER);
    block[0x10] = track.track_number;
    block[0x11] = track.side_number;
    block[0x13] = match track.recording_mode {
        RecordingMode::FM => 1,
        RecordingMode::MFM => 2,
        RecordingMode::Unknown => 0,
    };
    block[0x14] = track.sectors().first().map_or(2, |s| s.id.size_code);
    block[0x15] = track.sector_count() as u8;
    block[0x16] = track.gap3_length;
    block[0x17] = track.filler_byte;

    let mut data_offset = TRACK_INFO_BLOCK_SIZE;
    for (i, sector) in track.sectors().iter().enumerate() {
        let sib_offset = 0x18 + i * SECTOR_INFO_SIZE;
        if sib_offset + SECTOR_INFO_SIZE > TRACK_INFO_BLOCK_SIZE {
            break;
        }
        let (st1, st2) = status.status.get(i).copied().unwrap_or_default();
        let (st1, st2) = status_from_flags(sector.flags, st1, st2);
        let data = sector.data();
        let sib = &mut block[sib_offset..sib_offset + SECTOR_INFO_SIZE];
        sib[..4].copy_from_slice(&sector.id.to_bytes());
        sib[4] = st1.0;
        sib[5] = st2.0;
        if variant == DskVariant::Extended {
            sib[6..8].copy_from_slice(&(data.len() as u16).to_le_bytes());
        }

        let copy_len = data.len().min(size.saturating_sub(data_offset));
        block[data_offset..data_offset + copy_len].copy_from_slice(&data[..copy_len]);
        data_offset += data.len();
    }
}

fn track_block_size(track: &Track) -> usize {
    if track.is_empty() {
        return 0;
    }
    TRACK_INFO_BLOCK_SIZE + track.sectors().iter().map(|s| s.data().len()).sum::<usize>()
}

impl ImageCodec for DskImage {
    fn format_name(&self) -> &'static str {
        self.variant.name()
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
        let sector = self.table.sector_mut(track, side, index)?;
        check_write_len(self.variant.name(), sector.data().len(), data)?;
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

    fn is_modified(&self) -> bool {
        self.modified
    }

    fn to_bytes(&self) -> Result<Vec<u8>> {
        let sizes: Vec<usize> = self.table.iter().map(track_block_size).collect();
        let standard_size = sizes.iter().copied().max().unwrap_or(0);
        if self.variant == DskVariant::Standard && standard_size > u16::MAX as usize {
            return Err(FloppyError::invalid_image("Track too large for a standard DSK"));
        }

        let mut out = Vec::new();
        self.write_info_block(&mut out, &sizes);
        let empty = TrackStatus::default();
        for (slot, track) in self.table.iter().enumerate() {
            let status = self.status.get(slot).unwrap_or(&empty);
            let size = match self.variant {
                DskVariant::Standard => standard_size,
                DskVariant::Extended => sizes[slot].div_ceil(256) * 256,
            };
            if size == 0 {
                continue;
            }
            write_track_block(&mut out, self.variant, track, status, size);
        }
        Ok(out)
    }
}
