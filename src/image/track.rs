//! Track data structures for table-backed codecs

use crate::error::{FloppyError, Result};
use crate::image::sector::{Sector, SectorInfo};

/// Recording mode for the track
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingMode {
    /// Unknown recording mode
    Unknown,
    /// FM (Frequency Modulation) - single density
    FM,
    /// MFM (Modified Frequency Modulation) - double density
    MFM,
}

/// A track holding sectors in rotational order
#[derive(Debug, Clone)]
pub struct Track {
    /// Physical track number
    pub track_number: u8,
    /// Physical side number (0 or 1)
    pub side_number: u8,
    /// Recording mode, if the container records one
    pub recording_mode: RecordingMode,
    /// GAP#3 length used when the track was formatted
    pub gap3_length: u8,
    /// Filler byte used when the track was formatted
    pub filler_byte: u8,
    sectors: Vec<Sector>,
}

impl Track {
    /// Create a new empty (unformatted) track
    pub fn new(track_number: u8, side_number: u8) -> Self {
        Self {
            track_number,
            side_number,
            recording_mode: RecordingMode::Unknown,
            gap3_length: 0x4E,
            filler_byte: 0xE5,
            sectors: Vec::new(),
        }
    }

    /// Append a sector at the next rotational position
    pub fn add_sector(&mut self, sector: Sector) {
        self.sectors.push(sector);
    }

    /// Get a reference to all sectors
    pub fn sectors(&self) -> &[Sector] {
        &self.sectors
    }

    /// Get a sector by its rotational index
    pub fn get_sector_by_index(&self, index: usize) -> Option<&Sector> {
        self.sectors.get(index)
    }

    /// Get a mutable sector by its rotational index
    pub fn get_sector_by_index_mut(&mut self, index: usize) -> Option<&mut Sector> {
        self.sectors.get_mut(index)
    }

    /// Find the first sector whose R matches
    pub fn find_sector(&self, record: u8) -> Option<&Sector> {
        self.sectors.iter().find(|s| s.id.sector == record)
    }

    /// Sector info for a rotational index
    pub fn sector_info(&self, index: usize) -> Option<SectorInfo> {
        self.sectors.get(index).map(Sector::info)
    }

    /// Get the number of sectors in this track
    pub fn sector_count(&self) -> usize {
        self.sectors.len()
    }

    /// Check if this track has any sectors
    pub fn is_empty(&self) -> bool {
        self.sectors.is_empty()
    }

    /// Remove every sector
    pub fn clear(&mut self) {
        self.sectors.clear();
    }

    /// Sector payloads concatenated in rotational order
    pub fn data_stream(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.sectors.iter().map(|s| s.data().len()).sum());
        for sector in &self.sectors {
            out.extend_from_slice(sector.data());
        }
        out
    }

    /// Split a buffer produced by `data_stream` back into the sectors.
    ///
    /// Flags are left alone; a short buffer only updates the leading sectors.
    pub fn load_data_stream(&mut self, data: &[u8]) {
        let mut offset = 0;
        for sector in &mut self.sectors {
            if offset >= data.len() {
                break;
            }
            let len = sector.data().len().min(data.len() - offset);
            sector.data_mut()[..len].copy_from_slice(&data[offset..offset + len]);
            offset += len;
        }
    }

    /// Fill every sector with a byte
    pub fn fill(&mut self, byte: u8) {
        self.filler_byte = byte;
        for sector in &mut self.sectors {
            sector.fill(byte);
        }
    }
}

/// Tracks of an image, addressed by (track, side)
#[derive(Debug, Clone, Default)]
pub struct TrackTable {
    heads: u8,
    tracks: Vec<Track>,
}

impl TrackTable {
    /// Create a table with `tracks * heads` unformatted tracks
    pub fn new(tracks: u8, heads: u8) -> Self {
        let heads = heads.max(1);
        let mut table = Vec::with_capacity(tracks as usize * heads as usize);
        for track in 0..tracks {
            for side in 0..heads {
                table.push(Track::new(track, side));
            }
        }
        Self {
            heads,
            tracks: table,
        }
    }

    /// Number of heads
    pub fn heads(&self) -> u8 {
        self.heads
    }

    /// Number of tracks per side
    pub fn track_count(&self) -> u8 {
        (self.tracks.len() / self.heads as usize) as u8
    }

    /// Grow the table so `track` exists
    pub fn ensure_track(&mut self, track: u8) {
        while self.track_count() <= track {
            let next = self.track_count();
            for side in 0..self.heads {
                self.tracks.push(Track::new(next, side));
            }
        }
    }

    /// Get a track
    pub fn get(&self, track: u8, side: u8) -> Option<&Track> {
        if side >= self.heads {
            return None;
        }
        self.tracks
            .get(track as usize * self.heads as usize + side as usize)
    }

    /// Get a mutable track
    pub fn get_mut(&mut self, track: u8, side: u8) -> Option<&mut Track> {
        if side >= self.heads {
            return None;
        }
        self.tracks
            .get_mut(track as usize * self.heads as usize + side as usize)
    }

    /// Iterate tracks in (track, side) order
    pub fn iter(&self) -> impl Iterator<Item = &Track> {
        self.tracks.iter()
    }

    /// Number of sectors on a track, zero when the track does not exist
    pub fn sectors_per_track(&self, track: u8, side: u8) -> usize {
        self.get(track, side).map_or(0, Track::sector_count)
    }

    /// Look up a sector by rotational index
    pub fn sector(&self, track: u8, side: u8, index: usize) -> Result<&Sector> {
        self.get(track, side)
            .and_then(|t| t.get_sector_by_index(index))
            .ok_or(FloppyError::seek(track, side, index))
    }

    /// Look up a mutable sector by rotational index
    pub fn sector_mut(&mut self, track: u8, side: u8, index: usize) -> Result<&mut Sector> {
        self.get_mut(track, side)
            .and_then(|t| t.get_sector_by_index_mut(index))
            .ok_or(FloppyError::seek(track, side, index))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::sector::SectorId;

    #[test]
    fn test_new_track() {
        let track = Track::new(0, 0);
        assert_eq!(track.track_number, 0);
        assert_eq!(track.sector_count(), 0);
        assert!(track.is_empty());
    }

    #[test]
    fn test_rotational_order_is_insertion_order() {
        let mut track = Track::new(0, 0);
        for r in [1u8, 6, 2, 7, 3] {
            track.add_sector(Sector::new(SectorId::new(0, 0, r, 1)));
        }

        assert_eq!(track.sector_info(1).unwrap().id.sector, 6);
        assert_eq!(track.find_sector(7).unwrap().id.sector, 7);
        assert!(track.find_sector(9).is_none());
    }

    #[test]
    fn test_data_stream_round_trip() {
        let mut track = Track::new(0, 0);
        track.add_sector(Sector::new(SectorId::new(0, 0, 1, 0)));
        track.add_sector(Sector::new(SectorId::new(0, 0, 2, 0)));

        let mut stream = track.data_stream();
        assert_eq!(stream.len(), 256);
        stream[200] = 0x42;
        track.load_data_stream(&stream);

        assert_eq!(track.get_sector_by_index(1).unwrap().data()[72], 0x42);
        assert_eq!(track.get_sector_by_index(0).unwrap().data()[0], 0xE5);
    }

    #[test]
    fn test_table_addressing() {
        let mut table = TrackTable::new(2, 2);
        assert_eq!(table.track_count(), 2);
        assert_eq!(table.get(1, 1).unwrap().side_number, 1);
        assert!(table.get(0, 2).is_none());
        assert!(table.get(2, 0).is_none());

        table.ensure_track(4);
        assert_eq!(table.track_count(), 5);
        assert_eq!(table.get(4, 1).unwrap().track_number, 4);
    }

    #[test]
    fn test_table_sector_lookup() {
        let mut table = TrackTable::new(1, 1);
        if let Some(track) = table.get_mut(0, 0) {
            track.add_sector(Sector::new(SectorId::new(0, 0, 1, 0)));
        }

        assert_eq!(table.sectors_per_track(0, 0), 1);
        assert_eq!(table.sectors_per_track(3, 0), 0);
        assert!(table.sector(0, 0, 0).is_ok());
        assert!(matches!(
            table.sector(0, 0, 1),
            Err(FloppyError::SeekError { index: 1, .. })
        ));
    }
}
