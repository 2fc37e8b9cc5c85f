//! Fixed geometry descriptions and presets for headerless sector dumps

use crate::format::constants::bytes_to_fdc_size;

/// Maps (geometry, track, side, logical sector) to a byte offset in the image
pub type OffsetFn = fn(&BasicDskGeometry, u8, u8, u8) -> usize;

/// Geometry of a fixed-layout sector dump
#[derive(Debug, Clone, Copy)]
pub struct BasicDskGeometry {
    /// Preset name shown by the console
    pub name: &'static str,
    /// Number of tracks per side
    pub tracks: u8,
    /// Number of heads (1 or 2)
    pub heads: u8,
    /// Sectors per track
    pub sectors_per_track: u8,
    /// Sector length in bytes (128 << N)
    pub sector_length: u16,
    /// R of the first logical sector
    pub first_sector_id: u8,
    /// Bytes before the first sector
    pub header_size: usize,
    /// Interleave factor (1 = sectors in logical order around the track)
    pub interleave: u8,
    /// Replaces the linear offset calculation
    pub offset_fn: Option<OffsetFn>,
}

impl BasicDskGeometry {
    /// Create a geometry with linear layout and no header
    pub fn new(
        tracks: u8,
        heads: u8,
        sectors_per_track: u8,
        sector_length: u16,
        first_sector_id: u8,
    ) -> Self {
        Self {
            name: "custom",
            tracks,
            heads,
            sectors_per_track,
            sector_length,
            first_sector_id,
            header_size: 0,
            interleave: 1,
            offset_fn: None,
        }
    }

    /// Acorn DFS single-sided, 40 tracks (.ssd)
    pub fn bbc_dfs_ss40() -> Self {
        Self::new(40, 1, 10, 256, 0).with_name("BBC DFS SS/40")
    }

    /// Acorn DFS single-sided, 80 tracks (.ssd)
    pub fn bbc_dfs_ss80() -> Self {
        Self::new(80, 1, 10, 256, 0).with_name("BBC DFS SS/80")
    }

    /// Acorn DFS double-sided, 40 tracks (.dsd, track-interleaved)
    pub fn bbc_dfs_ds40() -> Self {
        Self::new(40, 2, 10, 256, 0).with_name("BBC DFS DS/40")
    }

    /// Acorn DFS double-sided, 80 tracks (.dsd, track-interleaved)
    pub fn bbc_dfs_ds80() -> Self {
        Self::new(80, 2, 10, 256, 0).with_name("BBC DFS DS/80")
    }

    /// Tandy CoCo / Dragon RS-DOS (35 tracks, 18 sectors of 256 bytes)
    pub fn coco_35() -> Self {
        Self::new(35, 1, 18, 256, 1).with_name("CoCo 35 track")
    }

    /// IBM PC 360K (40 tracks, 9 sectors, 512 bytes, 2 sides)
    pub fn pc_360k() -> Self {
        Self::new(40, 2, 9, 512, 1).with_name("PC 360K")
    }

    /// IBM PC 720K (80 tracks, 9 sectors, 512 bytes, 2 sides)
    pub fn pc_720k() -> Self {
        Self::new(80, 2, 9, 512, 1).with_name("PC 720K")
    }

    /// Presets tried, in order, when identifying a raw image by size.
    ///
    /// DS/40 has the same size as SS/80 and is left out.
    pub fn presets() -> Vec<Self> {
        vec![
            Self::bbc_dfs_ss40(),
            Self::bbc_dfs_ss80(),
            Self::bbc_dfs_ds80(),
            Self::coco_35(),
            Self::pc_360k(),
            Self::pc_720k(),
        ]
    }

    /// Set the preset name
    pub fn with_name(mut self, name: &'static str) -> Self {
        self.name = name;
        self
    }

    /// Set the header size
    pub fn with_header_size(mut self, header_size: usize) -> Self {
        self.header_size = header_size;
        self
    }

    /// Set the interleave factor
    pub fn with_interleave(mut self, interleave: u8) -> Self {
        self.interleave = interleave;
        self
    }

    /// Set the first sector ID
    pub fn with_first_sector_id(mut self, first_sector_id: u8) -> Self {
        self.first_sector_id = first_sector_id;
        self
    }

    /// Supply a custom offset function
    pub fn with_offset_fn(mut self, offset_fn: OffsetFn) -> Self {
        self.offset_fn = Some(offset_fn);
        self
    }

    /// Sector size code N, if the length is a power-of-two multiple of 128
    pub fn size_code(&self) -> Option<u8> {
        bytes_to_fdc_size(self.sector_length as usize)
    }

    /// Bytes of sector data the geometry describes
    pub fn total_capacity(&self) -> usize {
        self.heads as usize
            * self.tracks as usize
            * self.sectors_per_track as usize
            * self.sector_length as usize
    }

    /// Exact file size for this geometry including the header
    pub fn image_size(&self) -> usize {
        self.header_size + self.total_capacity()
    }

    /// Byte offset of a logical sector (0-based, not R)
    pub fn offset(&self, track: u8, side: u8, sector: u8) -> usize {
        match self.offset_fn {
            Some(f) => f(self, track, side, sector),
            None => {
                (((track as usize * self.heads as usize) + side as usize)
                    * self.sectors_per_track as usize
                    + sector as usize)
                    * self.sector_length as usize
                    + self.header_size
            }
        }
    }

    /// Logical sector held at each rotational position.
    ///
    /// Each logical sector lands `interleave` slots after the previous one,
    /// moving on to the next free slot when that one is taken.
    pub fn skew_table(&self) -> Vec<u8> {
        let count = self.sectors_per_track as usize;
        let mut table = vec![u8::MAX; count];
        let step = self.interleave.max(1) as usize;
        let mut pos = 0;
        for logical in 0..count {
            while table[pos] != u8::MAX {
                pos = (pos + 1) % count;
            }
            table[pos] = logical as u8;
            pos = (pos + step) % count;
        }
        table
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bbc_capacity() {
        let g = BasicDskGeometry::bbc_dfs_ss80();
        assert_eq!(g.total_capacity(), 80 * 10 * 256);
        assert_eq!(g.size_code(), Some(1));
    }

    #[test]
    fn test_pc_360k_capacity() {
        let g = BasicDskGeometry::pc_360k();
        assert_eq!(g.total_capacity() / 1024, 360);
    }

    #[test]
    fn test_linear_offset() {
        let g = BasicDskGeometry::new(40, 2, 10, 256, 0).with_header_size(16);
        assert_eq!(g.offset(0, 0, 0), 16);
        assert_eq!(g.offset(0, 1, 0), 16 + 2560);
        assert_eq!(g.offset(1, 0, 3), 16 + 2 * 2560 + 3 * 256);
    }

    #[test]
    fn test_custom_offset_fn() {
        fn side_major(g: &BasicDskGeometry, track: u8, side: u8, sector: u8) -> usize {
            ((side as usize * g.tracks as usize + track as usize)
                * g.sectors_per_track as usize
                + sector as usize)
                * g.sector_length as usize
        }
        let g = BasicDskGeometry::new(40, 2, 10, 256, 0).with_offset_fn(side_major);
        assert_eq!(g.offset(0, 1, 0), 40 * 2560);
    }

    #[test]
    fn test_skew_table() {
        let plain = BasicDskGeometry::new(1, 1, 4, 256, 1);
        assert_eq!(plain.skew_table(), vec![0, 1, 2, 3]);

        let skewed = BasicDskGeometry::new(1, 1, 10, 256, 0).with_interleave(2);
        assert_eq!(skewed.skew_table(), vec![0, 5, 1, 6, 2, 7, 3, 8, 4, 9]);
    }

    #[test]
    fn test_with_methods() {
        let g = BasicDskGeometry::coco_35()
            .with_interleave(3)
            .with_first_sector_id(0);
        assert_eq!(g.interleave, 3);
        assert_eq!(g.first_sector_id, 0);
    }
}
