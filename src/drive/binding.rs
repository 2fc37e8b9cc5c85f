//! Binding between a drive mechanism and the image mounted in it
//!
//! The binding translates head positions to image tracks and holds the
//! whole-track buffer used by `read_track`/`write_track`. A dirty buffer is
//! written back when the head leaves its track, before any sector access,
//! and on eject.

use crate::drive::config::{DriveConfig, DriveType};
use crate::error::{FloppyError, Result};
use crate::image::{ImageCodec, SectorInfo};
use log::{debug, error, trace};

/// Largest image that is double-stepped in an 80-track drive
const DOUBLE_STEP_MAX_TRACKS: u8 = 42;

#[derive(Debug)]
struct TrackCache {
    track: u8,
    side: u8,
    data: Vec<u8>,
    dirty: bool,
}

/// One image mounted in one drive
pub struct DriveImageBinding {
    codec: Box<dyn ImageCodec>,
    steps_per_track: u8,
    track_divisor: u8,
    cache: Option<TrackCache>,
}

impl DriveImageBinding {
    /// Bind an opened image to a drive described by `config`
    pub fn new(codec: Box<dyn ImageCodec>, config: &DriveConfig) -> Self {
        let track_divisor = if config.drive_type == DriveType::Regular
            && config.tracks >= 80
            && codec.tracks() <= DOUBLE_STEP_MAX_TRACKS
        {
            2
        } else {
            1
        };
        debug!(
            "Binding {} image ({} tracks) to {} drive, divisor {}",
            codec.format_name(),
            codec.tracks(),
            config.drive_type,
            track_divisor
        );
        Self {
            codec,
            steps_per_track: config.steps_per_track.max(1),
            track_divisor,
            cache: None,
        }
    }

    /// Physical steps per image track
    pub fn track_divisor(&self) -> u8 {
        self.track_divisor
    }

    /// Override the double-step decision
    pub fn set_track_divisor(&mut self, divisor: u8) {
        self.track_divisor = divisor.max(1);
    }

    /// Image track under a head position
    pub fn image_track(&self, position: u16) -> u8 {
        let track = position / self.steps_per_track as u16 / self.track_divisor as u16;
        track.min(u8::MAX as u16) as u8
    }

    /// The mounted image
    pub fn codec(&self) -> &dyn ImageCodec {
        self.codec.as_ref()
    }

    /// The mounted image, mutably; the track buffer is flushed first
    pub fn codec_mut(&mut self) -> Result<&mut dyn ImageCodec> {
        self.flush()?;
        Ok(self.codec.as_mut())
    }

    /// Writable unless the image format is read-only
    pub fn is_writable(&self) -> bool {
        self.codec.is_writable()
    }

    /// Has the image or the track buffer been written?
    pub fn is_modified(&self) -> bool {
        self.codec.is_modified() || self.cache.as_ref().is_some_and(|c| c.dirty)
    }

    /// Head arrived at a new position
    pub fn head_moved(&mut self, position: u16) {
        let track = self.image_track(position);
        if self.cache.as_ref().is_some_and(|c| c.track != track) {
            if let Err(e) = self.flush() {
                error!("Failed to write back track buffer: {}", e);
            }
            self.cache = None;
        }
        self.codec.head_moved(track);
    }

    /// Write a dirty track buffer back to the image
    pub fn flush(&mut self) -> Result<()> {
        if let Some(cache) = self.cache.as_mut().filter(|c| c.dirty) {
            trace!("Flushing track {} side {}", cache.track, cache.side);
            self.codec.write_track(cache.track, cache.side, &cache.data)?;
            cache.dirty = false;
        }
        Ok(())
    }

    /// Sectors on the track under the head
    pub fn sectors_per_track(&mut self, position: u16, side: u8) -> usize {
        let track = self.image_track(position);
        self.codec.sectors_per_track(track, side)
    }

    /// ID and flags of a sector on the track under the head
    pub fn sector_info(&mut self, position: u16, side: u8, index: usize) -> Result<SectorInfo> {
        let track = self.image_track(position);
        self.codec.indexed_sector_info(track, side, index)
    }

    /// Read a sector on the track under the head
    pub fn read_sector(
        &mut self,
        position: u16,
        side: u8,
        index: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        self.flush()?;
        let track = self.image_track(position);
        self.codec.read_indexed_sector(track, side, index, buf)
    }

    /// Write a sector on the track under the head
    pub fn write_sector(
        &mut self,
        position: u16,
        side: u8,
        index: usize,
        data: &[u8],
        ddam: bool,
    ) -> Result<()> {
        self.flush()?;
        let track = self.image_track(position);
        self.codec.write_indexed_sector(track, side, index, data, ddam)?;
        // the buffered copy of this track is stale now
        self.cache = None;
        Ok(())
    }

    /// Raw track under the head, read through the track buffer
    pub fn read_track(&mut self, position: u16, side: u8) -> Result<Vec<u8>> {
        let track = self.image_track(position);
        if let Some(cache) = self.cache.as_ref().filter(|c| c.track == track && c.side == side) {
            return Ok(cache.data.clone());
        }
        self.flush()?;
        let data = self.codec.read_track(track, side)?;
        self.cache = Some(TrackCache {
            track,
            side,
            data: data.clone(),
            dirty: false,
        });
        Ok(data)
    }

    /// Replace the raw track under the head; written back lazily
    pub fn write_track(&mut self, position: u16, side: u8, data: &[u8]) -> Result<()> {
        if !self.codec.can_write_track() || !self.codec.is_writable() {
            return Err(FloppyError::unsupported(self.codec.format_name(), "write_track"));
        }
        let track = self.image_track(position);
        if self.cache.as_ref().is_some_and(|c| c.track != track || c.side != side) {
            self.flush()?;
        }
        self.cache = Some(TrackCache {
            track,
            side,
            data: data.to_vec(),
            dirty: true,
        });
        Ok(())
    }

    /// Flush and hand the image back
    pub fn into_codec(mut self) -> Result<Box<dyn ImageCodec>> {
        self.flush()?;
        Ok(self.codec)
    }
}
