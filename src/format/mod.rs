//! Disk image codecs and the registry that identifies them

/// Headerless sector dumps
pub mod basicdsk;
/// Format constants
pub mod constants;
/// CRC helpers
pub mod crc;
/// NEC/Sharp D88 and Fujitsu D77 containers
pub mod d88;
/// Commodore D64/D71 sector dumps
pub mod d64;
/// CPC DSK and Extended DSK containers
pub mod dsk;
/// Commodore G64 GCR track images
pub mod g64;
/// Commodore group-coded recording
pub mod gcr;
/// ImageDisk containers
pub mod imd;
/// Raw MFM track images
pub mod mfm;
/// Geometry descriptions for headerless dumps
pub mod spec;
/// uPD765 ST1/ST2 status bytes stored by DSK images
pub mod status;
/// Teledisk containers
pub mod td0;

pub use basicdsk::BasicDsk;
pub use constants::*;
pub use d64::D64Image;
pub use d88::D88Image;
pub use dsk::{DskImage, DskVariant};
pub use g64::G64Image;
pub use imd::ImdImage;
pub use mfm::MfmDisk;
pub use spec::BasicDskGeometry;
pub use status::{Status1, Status2};
pub use td0::Td0Image;

use crate::error::{FloppyError, Result};
use crate::image::ImageCodec;
use log::debug;
use std::fmt;

/// Confidence score for the raw file bytes; 0 means "not this format"
pub type IdentifyFn = fn(&[u8]) -> u8;

/// Open an image from its raw file bytes
pub type OpenFn = fn(Vec<u8>) -> Result<Box<dyn ImageCodec>>;

/// One registered image format
#[derive(Clone, Copy)]
pub struct FormatDescriptor {
    /// Short name used by `open_as`
    pub name: &'static str,
    /// Human-readable description
    pub description: &'static str,
    /// Usual file extensions, lower case
    pub extensions: &'static [&'static str],
    /// Identification function
    pub identify: IdentifyFn,
    /// Factory
    pub open: OpenFn,
}

impl fmt::Debug for FormatDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatDescriptor")
            .field("name", &self.name)
            .field("extensions", &self.extensions)
            .finish()
    }
}

impl FormatDescriptor {
    /// Check whether a file extension belongs to this format
    pub fn matches_extension(&self, ext: &str) -> bool {
        self.extensions.iter().any(|e| e.eq_ignore_ascii_case(ext))
    }
}

/// Name to factory table used to identify and open images
#[derive(Debug, Clone, Default)]
pub struct FormatRegistry {
    formats: Vec<FormatDescriptor>,
}

impl FormatRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every built-in format
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.register(FormatDescriptor {
            name: "DSK",
            description: "Amstrad CPC DSK / Extended DSK",
            extensions: &["dsk", "edsk"],
            identify: DskImage::identify,
            open: |data| Ok(Box::new(DskImage::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "D88",
            description: "NEC PC-88/PC-98 and Sharp D88",
            extensions: &["d88", "88d", "d98", "98d"],
            identify: D88Image::identify,
            open: |data| Ok(Box::new(D88Image::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "D77",
            description: "Fujitsu FM-7 D77",
            extensions: &["d77"],
            identify: D88Image::identify_d77,
            open: |data| Ok(Box::new(D88Image::open_d77(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "D64",
            description: "Commodore 1541 sector dump",
            extensions: &["d64"],
            identify: D64Image::identify,
            open: |data| Ok(Box::new(D64Image::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "D71",
            description: "Commodore 1571 sector dump",
            extensions: &["d71"],
            identify: D64Image::identify_d71,
            open: |data| Ok(Box::new(D64Image::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "G64",
            description: "Commodore 1541 GCR track image",
            extensions: &["g64"],
            identify: G64Image::identify,
            open: |data| Ok(Box::new(G64Image::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "MFM_DISK",
            description: "Raw MFM track image",
            extensions: &["dsk", "mfm"],
            identify: MfmDisk::identify,
            open: |data| Ok(Box::new(MfmDisk::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "TD0",
            description: "Sydex Teledisk",
            extensions: &["td0"],
            identify: Td0Image::identify,
            open: |data| Ok(Box::new(Td0Image::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "IMD",
            description: "ImageDisk",
            extensions: &["imd"],
            identify: ImdImage::identify,
            open: |data| Ok(Box::new(ImdImage::open(data)?)),
        });
        registry.register(FormatDescriptor {
            name: "BasicDsk",
            description: "Headerless sector dump (SSD/DSD, JVC, raw PC)",
            extensions: &["ssd", "dsd", "img", "ima", "jvc", "dsk", "vdk"],
            identify: BasicDsk::identify,
            open: |data| Ok(Box::new(BasicDsk::open_detected(data)?)),
        });
        registry
    }

    /// Add a format; later registrations lose ties to earlier ones
    pub fn register(&mut self, descriptor: FormatDescriptor) {
        self.formats.push(descriptor);
    }

    /// Every registered format
    pub fn descriptors(&self) -> &[FormatDescriptor] {
        &self.formats
    }

    /// Look a format up by name, ignoring case
    pub fn find(&self, name: &str) -> Option<&FormatDescriptor> {
        self.formats
            .iter()
            .find(|d| d.name.eq_ignore_ascii_case(name))
    }

    /// Formats that claim an extension
    pub fn by_extension(&self, ext: &str) -> Vec<&FormatDescriptor> {
        self.formats
            .iter()
            .filter(|d| d.matches_extension(ext))
            .collect()
    }

    /// Score every format; non-zero confidences, best first
    pub fn identify(&self, data: &[u8]) -> Vec<(&FormatDescriptor, u8)> {
        let mut hits: Vec<_> = self
            .formats
            .iter()
            .map(|d| (d, (d.identify)(data)))
            .filter(|(_, confidence)| *confidence > 0)
            .collect();
        // stable sort keeps registration order for ties
        hits.sort_by(|a, b| b.1.cmp(&a.1));
        hits
    }

    /// Open with the most confident format.
    ///
    /// Lower-ranked candidates are tried when a better one fails to parse;
    /// the error of the best candidate is returned if none succeeds.
    pub fn open(&self, data: Vec<u8>) -> Result<Box<dyn ImageCodec>> {
        let candidates = self.identify(&data);
        let mut first_error = None;
        for (descriptor, confidence) in candidates {
            debug!("Trying {} (confidence {})", descriptor.name, confidence);
            match (descriptor.open)(data.clone()) {
                Ok(image) => return Ok(image),
                Err(e) if e.is_unsupported() => return Err(e),
                Err(e) => {
                    debug!("{} rejected the image: {}", descriptor.name, e);
                    first_error.get_or_insert(e);
                }
            }
        }
        Err(first_error.unwrap_or_else(|| {
            FloppyError::UnknownFormat(format!("{} bytes matched no format", data.len()))
        }))
    }

    /// Open with a named format, skipping identification
    pub fn open_as(&self, name: &str, data: Vec<u8>) -> Result<Box<dyn ImageCodec>> {
        let descriptor = self
            .find(name)
            .ok_or_else(|| FloppyError::UnknownFormat(name.to_string()))?;
        (descriptor.open)(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::{Sector, SectorId, Track, TrackTable};

    fn small_dsk() -> Vec<u8> {
        let mut table = TrackTable::new(2, 1);
        for t in 0..2 {
            let track: &mut Track = table.get_mut(t, 0).unwrap();
            for r in 1..=9 {
                track.add_sector(Sector::new(SectorId::new(t, 0, r, 2)));
            }
        }
        DskImage::from_table(DskVariant::Extended, table)
            .to_bytes()
            .unwrap()
    }

    #[test]
    fn test_standard_registry_names() {
        let registry = FormatRegistry::standard();
        let names: Vec<_> = registry.descriptors().iter().map(|d| d.name).collect();
        for name in ["DSK", "D88", "D77", "D64", "D71", "G64", "MFM_DISK", "TD0", "IMD", "BasicDsk"] {
            assert!(names.contains(&name), "{} missing", name);
        }
        assert!(registry.find("mfm_disk").is_some());
        assert!(registry.find("ADF").is_none());
    }

    #[test]
    fn test_identify_dsk() {
        let registry = FormatRegistry::standard();
        let data = small_dsk();
        let hits = registry.identify(&data);
        assert_eq!(hits[0].0.name, "DSK");
        assert_eq!(hits[0].1, 100);

        let mut image = registry.open(data).unwrap();
        assert_eq!(image.format_name(), "EDSK");
        assert_eq!(image.sectors_per_track(1, 0), 9);
    }

    #[test]
    fn test_identify_by_size() {
        let registry = FormatRegistry::standard();
        let image = registry.open(vec![0u8; 174848]).unwrap();
        assert_eq!(image.format_name(), "D64");

        let image = registry.open(vec![0u8; 40 * 10 * 256]).unwrap();
        assert_eq!(image.format_name(), "BasicDsk");
    }

    #[test]
    fn test_unknown_format() {
        let registry = FormatRegistry::standard();
        let err = registry.open(vec![0x12; 1000]).err().unwrap();
        assert!(matches!(err, FloppyError::UnknownFormat(_)));
    }

    #[test]
    fn test_advanced_teledisk_unsupported() {
        let registry = FormatRegistry::standard();
        let mut data = b"td".to_vec();
        data.extend_from_slice(&[0; 20]);
        let err = registry.open(data).err().unwrap();
        assert!(err.is_unsupported());
    }

    #[test]
    fn test_open_as() {
        let registry = FormatRegistry::standard();
        assert!(registry.open_as("D64", vec![0u8; 174848]).is_ok());
        assert!(registry.open_as("G64", vec![0u8; 174848]).is_err());
        assert!(matches!(
            registry.open_as("NOPE", vec![]),
            Err(FloppyError::UnknownFormat(_))
        ));
    }

    #[test]
    fn test_by_extension() {
        let registry = FormatRegistry::standard();
        let names: Vec<_> = registry.by_extension("DSK").iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["DSK", "MFM_DISK", "BasicDsk"]);
        assert_eq!(registry.by_extension("td0")[0].name, "TD0");
    }
}
