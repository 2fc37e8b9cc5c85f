//! Disk image abstraction shared by every codec

/// Blank image builder
pub mod builder;
/// Sector identification and storage
pub mod sector;
/// Track tables for table-backed codecs
pub mod track;

pub use builder::ImageBuilder;
pub use sector::{Sector, SectorFlags, SectorId, SectorInfo};
pub use track::{RecordingMode, Track, TrackTable};

use crate::error::{FloppyError, Result};

/// Canonical geometry reported by an opened image
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Number of heads (sides)
    pub heads: u8,
    /// Number of tracks per side
    pub tracks: u8,
    /// Sectors on track 0 side 0
    pub sectors_per_track: u8,
    /// Sector length on track 0 side 0
    pub sector_length: u16,
    /// Lowest R on track 0 side 0
    pub first_sector_id: u8,
}

/// Capability set every disk image format implements.
///
/// Sectors are addressed by rotational index on a (track, side): index 0 is
/// the first sector after the index hole. The R value of that sector comes
/// from `indexed_sector_info`.
pub trait ImageCodec {
    /// Short format name, e.g. "D64"
    fn format_name(&self) -> &'static str;

    /// Number of heads
    fn heads(&self) -> u8;

    /// Number of tracks per side
    fn tracks(&self) -> u8;

    /// Number of sectors on a track; zero for unformatted or absent tracks
    fn sectors_per_track(&mut self, track: u8, side: u8) -> usize;

    /// ID field and flags of the sector at a rotational index
    fn indexed_sector_info(&mut self, track: u8, side: u8, index: usize) -> Result<SectorInfo>;

    /// Read the payload of the sector at a rotational index
    fn read_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        buf: &mut [u8],
    ) -> Result<()>;

    /// Write the payload of the sector at a rotational index.
    ///
    /// `ddam` selects a deleted data address mark for the data field.
    fn write_indexed_sector(
        &mut self,
        track: u8,
        side: u8,
        index: usize,
        data: &[u8],
        ddam: bool,
    ) -> Result<()>;

    /// Read a whole track as the raw byte stream a controller would see
    fn read_track(&mut self, _track: u8, _side: u8) -> Result<Vec<u8>> {
        Err(FloppyError::unsupported(self.format_name(), "read_track"))
    }

    /// Replace a whole track from a raw byte stream
    fn write_track(&mut self, _track: u8, _side: u8, _data: &[u8]) -> Result<()> {
        Err(FloppyError::unsupported(self.format_name(), "write_track"))
    }

    /// Does `write_track` accept data?
    fn can_write_track(&self) -> bool {
        false
    }

    /// Called when the head arrives on a different track
    fn head_moved(&mut self, _track: u8) {}

    /// Can sectors be written?
    fn is_writable(&self) -> bool {
        true
    }

    /// Has anything been written since the image was opened?
    fn is_modified(&self) -> bool;

    /// Serialise the image back to its container format
    fn to_bytes(&self) -> Result<Vec<u8>>;

    /// Geometry read from track 0 side 0
    fn geometry(&mut self) -> Geometry {
        let heads = self.heads();
        let tracks = self.tracks();
        let count = self.sectors_per_track(0, 0);
        let mut first_sector_id = u8::MAX;
        let mut sector_length = 0u16;
        for index in 0..count {
            if let Ok(info) = self.indexed_sector_info(0, 0, index) {
                first_sector_id = first_sector_id.min(info.id.sector);
                sector_length = info.id.size_bytes() as u16;
            }
        }
        Geometry {
            heads,
            tracks,
            sectors_per_track: count as u8,
            sector_length,
            first_sector_id: if count == 0 { 0 } else { first_sector_id },
        }
    }
}

/// Reject a write that does not cover a whole sector
pub(crate) fn check_write_len(
    format: &'static str,
    expected: usize,
    data: &[u8],
) -> Result<()> {
    if data.len() < expected {
        return Err(FloppyError::invalid_image(format!(
            "{} sector write needs {} bytes, got {}",
            format,
            expected,
            data.len()
        )));
    }
    Ok(())
}
