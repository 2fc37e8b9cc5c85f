//! Builder for creating blank formatted images

use crate::error::{FloppyError, Result};
use crate::format::constants::bytes_to_fdc_size;
use crate::format::{BasicDsk, BasicDskGeometry, DskImage, DskVariant};
use crate::image::{ImageCodec, RecordingMode, Sector, SectorId, Track, TrackTable};

/// Container produced by [`ImageBuilder`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    /// Headerless sector dump
    BasicDsk,
    /// CPC DSK container
    Dsk(DskVariant),
}

/// Builder for constructing formatted blank images
#[derive(Debug, Clone)]
pub struct ImageBuilder {
    kind: ImageKind,
    num_tracks: u8,
    num_sides: u8,
    sectors_per_track: u8,
    sector_size: u16,
    first_sector_id: u8,
    interleave: u8,
    gap3_length: u8,
    filler_byte: u8,
}

impl ImageBuilder {
    /// Create a builder for a 40 track single-sided Extended DSK, 9 x 512 bytes
    pub fn new() -> Self {
        Self {
            kind: ImageKind::Dsk(DskVariant::Extended),
            num_tracks: 40,
            num_sides: 1,
            sectors_per_track: 9,
            sector_size: 512,
            first_sector_id: 1,
            interleave: 1,
            gap3_length: 0x4E,
            filler_byte: 0xE5,
        }
    }

    /// Start from a headerless geometry preset
    pub fn from_geometry(geometry: &BasicDskGeometry) -> Self {
        Self::new()
            .kind(ImageKind::BasicDsk)
            .num_tracks(geometry.tracks)
            .num_sides(geometry.heads)
            .sectors_per_track(geometry.sectors_per_track)
            .sector_size(geometry.sector_length)
            .first_sector_id(geometry.first_sector_id)
            .interleave(geometry.interleave)
    }

    /// Set the container
    pub fn kind(mut self, kind: ImageKind) -> Self {
        self.kind = kind;
        self
    }

    /// Set the number of tracks
    pub fn num_tracks(mut self, num_tracks: u8) -> Self {
        self.num_tracks = num_tracks;
        self
    }

    /// Set the number of sides
    pub fn num_sides(mut self, num_sides: u8) -> Self {
        self.num_sides = num_sides;
        self
    }

    /// Set sectors per track
    pub fn sectors_per_track(mut self, sectors_per_track: u8) -> Self {
        self.sectors_per_track = sectors_per_track;
        self
    }

    /// Set sector size in bytes
    pub fn sector_size(mut self, sector_size: u16) -> Self {
        self.sector_size = sector_size;
        self
    }

    /// Set R of the first sector on each track
    pub fn first_sector_id(mut self, first_sector_id: u8) -> Self {
        self.first_sector_id = first_sector_id;
        self
    }

    /// Set the interleave factor
    pub fn interleave(mut self, interleave: u8) -> Self {
        self.interleave = interleave;
        self
    }

    /// Set GAP#3 recorded in DSK track headers
    pub fn gap3_length(mut self, gap3_length: u8) -> Self {
        self.gap3_length = gap3_length;
        self
    }

    /// Set the byte every sector is filled with
    pub fn filler_byte(mut self, filler_byte: u8) -> Self {
        self.filler_byte = filler_byte;
        self
    }

    fn geometry(&self) -> BasicDskGeometry {
        BasicDskGeometry::new(
            self.num_tracks,
            self.num_sides,
            self.sectors_per_track,
            self.sector_size,
            self.first_sector_id,
        )
        .with_interleave(self.interleave)
    }

    fn validate(&self) -> Result<u8> {
        if self.num_sides == 0 || self.num_sides > 2 {
            return Err(FloppyError::invalid_image(format!(
                "{} sides is not buildable",
                self.num_sides
            )));
        }
        if self.num_tracks == 0 {
            return Err(FloppyError::invalid_image("Image needs at least one track"));
        }
        bytes_to_fdc_size(self.sector_size as usize).ok_or_else(|| {
            FloppyError::invalid_image(format!(
                "Sector size {} is not 128 << N",
                self.sector_size
            ))
        })
    }

    fn track_table(&self, size_code: u8) -> TrackTable {
        let skew = self.geometry().skew_table();
        let mut table = TrackTable::new(self.num_tracks, self.num_sides);
        for track_num in 0..self.num_tracks {
            for side in 0..self.num_sides {
                let mut track = Track::new(track_num, side);
                track.recording_mode = RecordingMode::MFM;
                track.gap3_length = self.gap3_length;
                track.filler_byte = self.filler_byte;
                for &logical in &skew {
                    let record = self.first_sector_id.wrapping_add(logical);
                    let mut sector = Sector::new(SectorId::new(track_num, side, record, size_code));
                    sector.fill(self.filler_byte);
                    track.add_sector(sector);
                }
                if let Some(slot) = table.get_mut(track_num, side) {
                    *slot = track;
                }
            }
        }
        table
    }

    /// Build the image as an opened codec
    pub fn build(self) -> Result<Box<dyn ImageCodec>> {
        let size_code = self.validate()?;
        match self.kind {
            ImageKind::BasicDsk => Ok(Box::new(BasicDsk::blank(
                self.geometry(),
                self.filler_byte,
            )?)),
            ImageKind::Dsk(variant) => Ok(Box::new(DskImage::from_table(
                variant,
                self.track_table(size_code),
            ))),
        }
    }

    /// Build the image and serialise it to container bytes
    pub fn build_bytes(self) -> Result<Vec<u8>> {
        self.build()?.to_bytes()
    }
}

impl Default for ImageBuilder {
    fn default() -> Self {
        Self::new()
    }
}
