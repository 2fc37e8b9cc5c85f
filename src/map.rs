//! Sector map rendering
//!
//! One column per track, one row per rotational sector index, index 0 at
//! the bottom. A sector whose payload is a single repeated byte is shown
//! as filler; anything else is in use.

use crate::image::ImageCodec;
use std::fmt::Write;

/// ANSI color codes for sector map
mod colors {
    pub const RESET: &str = "\x1b[0m";
    pub const BRIGHT_WHITE: &str = "\x1b[97m";
    pub const DARK_WHITE: &str = "\x1b[37m";
    pub const BRIGHT_RED: &str = "\x1b[91m";
    pub const DARK_RED: &str = "\x1b[2;31m";
    pub const BRIGHT_YELLOW: &str = "\x1b[93m";
    pub const DARK_YELLOW: &str = "\x1b[2;33m";
}

const BLOCK_NO_DATA: char = '\u{2591}';
const BLOCK_HAS_DATA: char = '\u{2593}';
const BLOCK_ERROR: char = 'E';
const BLOCK_DELETED: char = 'D';

/// How one sector is drawn
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cell {
    /// Data field differs from filler
    InUse,
    /// Data field is one repeated byte
    Filler,
    /// ID or data CRC error
    Error {
        /// Data differs from filler
        in_use: bool,
    },
    /// Deleted data mark
    Deleted {
        /// Data differs from filler
        in_use: bool,
    },
    /// No sector at this index
    Empty,
}

impl Cell {
    fn glyph(self, color: bool) -> (char, &'static str) {
        match self {
            Cell::InUse => (BLOCK_HAS_DATA, colors::BRIGHT_WHITE),
            Cell::Filler => (BLOCK_NO_DATA, colors::DARK_WHITE),
            Cell::Error { in_use } if color => (
                if in_use { BLOCK_HAS_DATA } else { BLOCK_NO_DATA },
                if in_use { colors::BRIGHT_RED } else { colors::DARK_RED },
            ),
            Cell::Error { .. } => (BLOCK_ERROR, ""),
            Cell::Deleted { in_use } if color => (
                if in_use { BLOCK_HAS_DATA } else { BLOCK_NO_DATA },
                if in_use { colors::BRIGHT_YELLOW } else { colors::DARK_YELLOW },
            ),
            Cell::Deleted { .. } => (BLOCK_DELETED, ""),
            Cell::Empty => (' ', ""),
        }
    }
}

/// Classify every sector on one side: `cells[track][index]`
pub fn classify_side(image: &mut dyn ImageCodec, side: u8) -> Vec<Vec<Cell>> {
    let mut buf = Vec::new();
    let mut cells = Vec::with_capacity(image.tracks() as usize);
    for track in 0..image.tracks() {
        let count = image.sectors_per_track(track, side);
        let mut column = Vec::with_capacity(count);
        for index in 0..count {
            column.push(classify(&mut *image, track, side, index, &mut buf));
        }
        cells.push(column);
    }
    cells
}

fn classify(image: &mut dyn ImageCodec, track: u8, side: u8, index: usize, buf: &mut Vec<u8>) -> Cell {
    let Ok(info) = image.indexed_sector_info(track, side, index) else {
        return Cell::Empty;
    };
    buf.clear();
    buf.resize(info.id.size_bytes(), 0);
    let in_use = match image.read_indexed_sector(track, side, index, buf) {
        Ok(()) => buf.iter().any(|&b| b != buf[0]),
        Err(_) => false,
    };
    if info.flags.id_crc_error() || info.flags.data_crc_error() {
        Cell::Error { in_use }
    } else if info.flags.is_deleted() {
        Cell::Deleted { in_use }
    } else if in_use {
        Cell::InUse
    } else {
        Cell::Filler
    }
}

/// Render a sector map for one side; `color` selects ANSI colors over letters
pub fn render_sector_map(image: &mut dyn ImageCodec, side: u8, color: bool) -> String {
    let cells = classify_side(image, side);
    let max_sectors = cells.iter().map(Vec::len).max().unwrap_or(0);
    let mut out = String::new();
    if max_sectors == 0 {
        let _ = writeln!(out, "No sectors found on side {}.", side);
        return out;
    }

    let _ = writeln!(out, "=== Sector Map (Side {}) ===", side);
    if color {
        let _ = writeln!(
            out,
            "Legend: {}In Use{} {}Filler{} {}Error{} {}Deleted{}",
            colors::BRIGHT_WHITE,
            colors::RESET,
            colors::DARK_WHITE,
            colors::RESET,
            colors::BRIGHT_RED,
            colors::RESET,
            colors::BRIGHT_YELLOW,
            colors::RESET
        );
    } else {
        let _ = writeln!(
            out,
            "Legend: {} In Use  {} Filler  {} Error  {} Deleted",
            BLOCK_HAS_DATA, BLOCK_NO_DATA, BLOCK_ERROR, BLOCK_DELETED
        );
    }
    out.push('\n');

    for index in (0..max_sectors).rev() {
        let _ = write!(out, "{:>2} ", index);
        for track in &cells {
            let cell = track.get(index).copied().unwrap_or(Cell::Empty);
            let (glyph, code) = cell.glyph(color);
            if color && !code.is_empty() {
                let _ = write!(out, "{}{}{}", code, glyph, colors::RESET);
            } else {
                out.push(glyph);
            }
        }
        out.push('\n');
    }

    // track axis, a label every five columns
    out.push_str("   ");
    let num_tracks = cells.len();
    let mut column = 0;
    while column < num_tracks {
        if column % 5 == 0 {
            let label = column.to_string();
            let fit = label.len().min(num_tracks - column);
            out.push_str(&label[..fit]);
            column += fit;
        } else {
            out.push(' ');
            column += 1;
        }
    }
    out.push('\n');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BasicDsk, BasicDskGeometry};

    #[test]
    fn test_classify() {
        let geometry = BasicDskGeometry::new(3, 1, 4, 256, 1);
        let mut image = BasicDsk::blank(geometry, 0xE5).unwrap();
        let mut data = vec![0u8; 256];
        data[10] = 1;
        image.write_indexed_sector(1, 0, 2, &data, false).unwrap();
        image.write_indexed_sector(2, 0, 3, &[0x00; 256], true).unwrap();

        let cells = classify_side(&mut image, 0);
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0][0], Cell::Filler);
        assert_eq!(cells[1][2], Cell::InUse);
        assert_eq!(cells[2][3], Cell::Deleted { in_use: false });
    }

    #[test]
    fn test_render_plain() {
        let geometry = BasicDskGeometry::new(12, 1, 2, 256, 1);
        let mut image = BasicDsk::blank(geometry, 0xE5).unwrap();
        let mut data = vec![0xE5; 256];
        data[0] = 0x01;
        image.write_indexed_sector(0, 0, 0, &data, false).unwrap();
        let map = render_sector_map(&mut image, 0, false);
        let lines: Vec<&str> = map.lines().collect();
        assert_eq!(lines[0], "=== Sector Map (Side 0) ===");
        assert_eq!(lines[4], format!(" 0 {}{}", BLOCK_HAS_DATA, BLOCK_NO_DATA.to_string().repeat(11)));
        assert_eq!(lines[5], "   0    5    10");

        let empty = render_sector_map(&mut image, 1, false);
        assert_eq!(empty, "No sectors found on side 1.\n");
    }
}
