//! ImageDisk images (IMD)

use crate::error::{FloppyError, Result};
use crate::format::constants::IMD_SIGNATURE;
use crate::image::{
    check_write_len, ImageCodec, RecordingMode, Sector, SectorFlags, SectorId, SectorInfo, Track,
    TrackTable,
};
use log::{debug, trace};
use std::collections::BTreeMap;

const COMMENT_TERMINATOR: u8 = 0x1A;
const CYLINDER_MAP_FLAG: u8 = 0x80;
const HEAD_MAP_FLAG: u8 = 0x40;
const VARIABLE_SIZE: u8 = 0xFF;
const MAX_SIZE_CODE: u8 = 6;

/// Sector record types 0-8
mod record {
    pub const UNAVAILABLE: u8 = 0;
    pub const NORMAL: u8 = 1;
    pub const DELETED_BIT: u8 = 2;
    pub const ERROR_BIT: u8 = 4;
    pub const LAST: u8 = 8;
}

/// An ImageDisk image
#[derive(Debug, Clone)]
pub struct ImdImage {
    /// Header line and comment, up to and including the 0x1A terminator
    header: Vec<u8>,
    table: TrackTable,
    /// Mode byte (data rate and encoding) of each recorded track
    modes: BTreeMap<(u8, u8), u8>,
    modified: bool,
}

impl ImdImage {
    /// Identification confidence for the registry
    pub fn identify(data: &[u8]) -> u8 {
        if data.starts_with(IMD_SIGNATURE) && data.contains(&COMMENT_TERMINATOR) {
            100
        } else {
            0
        }
    }

    /// Open an ImageDisk image
    pub fn open(data: Vec<u8>) -> Result<Self> {
        if !data.starts_with(IMD_SIGNATURE) {
            return Err(FloppyError::invalid_image("Missing IMD signature"));
        }
        let header_end = data
            .iter()
            .position(|&b| b == COMMENT_TERMINATOR)
            .ok_or_else(|| FloppyError::invalid_image("IMD comment is not terminated"))?
            + 1;

        let mut modes = BTreeMap::new();
        let mut parsed = Vec::new();
        let mut pos = header_end;
        while pos < data.len() {
            let (track, mode, next) = parse_track(&data, pos)?;
            pos = next;
            modes.insert((track.track_number, track.side_number), mode);
            parsed.push(track);
        }
        let heads = if parsed.iter().any(|t| t.side_number > 0) { 2 } else { 1 };
        let mut table = TrackTable::new(0, heads);
        for track in parsed {
            table.ensure_track(track.track_number);
            let (t, s) = (track.track_number, track.side_number);
            if let Some(slot) = table.get_mut(t, s) {
                *slot = track;
            }
        }

        debug!(
            "Opened IMD image: {} tracks, {} heads",
            table.track_count(),
            table.heads()
        );
        Ok(Self {
            header: data[..header_end].to_vec(),
            table,
            modes,
            modified: false,
        })
    }

    /// Header line and comment text
    pub fn comment(&self) -> String {
        let text = &self.header[..self.header.len() - 1];
        String::from_utf8_lossy(text).trim_end().to_string()
    }
}

fn take<'a>(data: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8]> {
    let slice = data
        .get(*pos..*pos + len)
        .ok_or_else(|| FloppyError::parse(*pos, "Unexpected end of IMD track"))?;
    *pos += len;
    Ok(slice)
}

fn parse_track(data: &[u8], start: usize) -> Result<(Track, u8, usize)> {
    let mut pos = start;
    let header = take(data, &mut pos, 5)?;
    let (mode, cylinder, head, count, size_code) =
        (header[0], header[1], header[2], header[3] as usize, header[4]);
    if mode > 5 {
        return Err(FloppyError::parse(start, format!("Unknown IMD track mode {}", mode)));
    }
    if size_code == VARIABLE_SIZE {
        return Err(FloppyError::parse(start + 4, "Variable sector size tables are not supported"));
    }
    if size_code > MAX_SIZE_CODE {
        return Err(FloppyError::parse(start + 4, format!("Sector size code {} is too large", size_code)));
    }
    let side = head & 0x01;

    let records = take(data, &mut pos, count)?;
    let cylinders = if head & CYLINDER_MAP_FLAG != 0 {
        Some(take(data, &mut pos, count)?)
    } else {
        None
    };
    let heads = if head & HEAD_MAP_FLAG != 0 {
        Some(take(data, &mut pos, count)?)
    } else {
        None
    };

    let mut track = Track::new(cylinder, side);
    track.recording_mode = if mode < 3 {
        RecordingMode::FM
    } else {
        RecordingMode::MFM
    };
    let size = SectorId::new(0, 0, 0, size_code).size_bytes();
    for i in 0..count {
        let id = SectorId::new(
            cylinders.map_or(cylinder, |map| map[i]),
            heads.map_or(side, |map| map[i]),
            records[i],
            size_code,
        );
        let kind = take(data, &mut pos, 1)?[0];
        if kind > record::LAST {
            return Err(FloppyError::parse(pos - 1, format!("Unknown IMD record type {}", kind)));
        }

        let mut flags = SectorFlags::default();
        let payload = if kind == record::UNAVAILABLE {
            flags.set(SectorFlags::DATA_CRC_ERROR, true);
            vec![0; size]
        } else {
            let code = kind - 1;
            flags.set(SectorFlags::DELETED_DATA, code & record::DELETED_BIT != 0);
            flags.set(SectorFlags::DATA_CRC_ERROR, code & record::ERROR_BIT != 0);
            if code & 1 != 0 {
                vec![take(data, &mut pos, 1)?[0]; size]
            } else {
                take(data, &mut pos, size)?.to_vec()
            }
        };
        track.add_sector(Sector::with_data(id, flags, payload));
    }
    trace!("IMD track {} side {}: {} sectors", cylinder, side, count);
    Ok((track, mode, pos))
}

fn record_type(flags: SectorFlags) -> u8 {
    let mut kind = record::NORMAL;
    if flags.is_deleted() {
        kind += record::DELETED_BIT;
    }
    if flags.data_crc_error() {
        kind += record::ERROR_BIT;
    }
    kind
}

impl ImageCodec for ImdImage {
    fn format_name(&self) -> &'static str {
        "IMD"
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
        check_write_len("IMD", sector.data().len(), data)?;
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

    /// Serialise with every sector stored uncompressed
    fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut out = self.header.clone();
        for track in self.table.iter().filter(|t| !t.is_empty()) {
            let sectors = track.sectors();
            let cylinder = track.track_number;
            let side = track.side_number;
            let cylinder_map = sectors.iter().any(|s| s.id.track != cylinder);
            let head_map = sectors.iter().any(|s| s.id.side != side);

            let mode = self
                .modes
                .get(&(cylinder, side))
                .copied()
                .unwrap_or(match track.recording_mode {
                    RecordingMode::FM => 2,
                    _ => 5,
                });
            let mut head = side;
            if cylinder_map {
                head |= CYLINDER_MAP_FLAG;
            }
            if head_map {
                head |= HEAD_MAP_FLAG;
            }
            out.extend_from_slice(&[mode, cylinder, head, sectors.len() as u8, sectors[0].id.size_code]);
            out.extend(sectors.iter().map(|s| s.id.sector));
            if cylinder_map {
                out.extend(sectors.iter().map(|s| s.id.track));
            }
            if head_map {
                out.extend(sectors.iter().map(|s| s.id.side));
            }
            for sector in sectors {
                out.push(record_type(sector.flags));
                out.extend_from_slice(sector.data());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut out = b"IMD 1.18: 15/10/2026 12:00:00\r\ntest disk".to_vec();
        out.push(0x1A);
        // track 0 head 0, MFM 250k, 3 x 256-byte sectors interleaved 1,3,2
        out.extend_from_slice(&[5, 0, 0, 3, 1]);
        out.extend_from_slice(&[1, 3, 2]);
        out.push(1);
        out.extend_from_slice(&[0x11; 256]);
        out.extend_from_slice(&[2, 0x33]);
        out.extend_from_slice(&[4, 0x22]);
        // track 0 head 1 with a cylinder map, one unavailable sector
        out.extend_from_slice(&[5, 0, 0x81, 2, 1]);
        out.extend_from_slice(&[1, 2]);
        out.extend_from_slice(&[7, 7]);
        out.push(0);
        out.push(5);
        out.extend_from_slice(&[0x44; 256]);
        out
    }

    #[test]
    fn test_identify() {
        assert_eq!(ImdImage::identify(&sample()), 100);
        assert_eq!(ImdImage::identify(b"IMD 1.18 no terminator"), 0);
        assert_eq!(ImdImage::identify(b"TD\0\0"), 0);
    }

    #[test]
    fn test_records() {
        let mut image = ImdImage::open(sample()).unwrap();
        assert_eq!(image.heads(), 2);
        assert_eq!(image.tracks(), 1);
        assert_eq!(image.comment(), "IMD 1.18: 15/10/2026 12:00:00\r\ntest disk");

        let ids: Vec<u8> = (0..3)
            .map(|i| image.indexed_sector_info(0, 0, i).unwrap().id.sector)
            .collect();
        assert_eq!(ids, vec![1, 3, 2]);

        let mut buf = [0u8; 256];
        image.read_indexed_sector(0, 0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x33));
        let deleted = image.indexed_sector_info(0, 0, 2).unwrap();
        assert!(deleted.flags.is_deleted());
    }

    #[test]
    fn test_maps_and_unavailable_sector() {
        let mut image = ImdImage::open(sample()).unwrap();
        let info = image.indexed_sector_info(0, 1, 0).unwrap();
        assert_eq!(info.id, SectorId::new(7, 1, 1, 1));
        assert!(info.flags.data_crc_error());

        let mut buf = [0xFFu8; 256];
        image.read_indexed_sector(0, 1, 0, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0));

        let info = image.indexed_sector_info(0, 1, 1).unwrap();
        assert!(info.flags.data_crc_error());
        assert!(!info.flags.is_deleted());
    }

    #[test]
    fn test_write_serialises_uncompressed() {
        let mut image = ImdImage::open(sample()).unwrap();
        image.write_indexed_sector(0, 0, 1, &[0x99; 256], true).unwrap();
        assert!(image.is_modified());

        let bytes = image.to_bytes().unwrap();
        let mut reopened = ImdImage::open(bytes).unwrap();
        let info = reopened.indexed_sector_info(0, 0, 1).unwrap();
        assert_eq!(info.id.sector, 3);
        assert!(info.flags.is_deleted());
        let mut buf = [0u8; 256];
        reopened.read_indexed_sector(0, 0, 1, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0x99));

        // the unavailable sector comes back as a data-error record
        let info = reopened.indexed_sector_info(0, 1, 0).unwrap();
        assert_eq!(info.id.track, 7);
        assert!(info.flags.data_crc_error());
    }

    #[test]
    fn test_variable_size_rejected() {
        let mut data = b"IMD 1.18\x1a".to_vec();
        data.extend_from_slice(&[5, 0, 0, 1, 0xFF, 1]);
        let err = ImdImage::open(data).unwrap_err();
        assert!(matches!(err, FloppyError::Parse { .. }));
    }

    #[test]
    fn test_truncated_record() {
        let data = sample();
        assert!(ImdImage::open(data[..100].to_vec()).is_err());
    }
}
