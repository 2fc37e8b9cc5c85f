//! Image file reader

use crate::error::Result;
use crate::format::FormatRegistry;
use crate::image::ImageCodec;
use log::debug;
use std::fs;
use std::path::Path;

/// Read an image file and open it with the best matching format
pub fn read_image<P: AsRef<Path>>(path: P, registry: &FormatRegistry) -> Result<Box<dyn ImageCodec>> {
    let path = path.as_ref();
    let data = fs::read(path)?;
    debug!("Read {} bytes from {}", data.len(), path.display());
    let image = registry.open(data)?;
    debug!("{} opened as {}", path.display(), image.format_name());
    Ok(image)
}

/// Read an image file with a named format, skipping identification
pub fn read_image_as<P: AsRef<Path>>(
    path: P,
    registry: &FormatRegistry,
    format: &str,
) -> Result<Box<dyn ImageCodec>> {
    let data = fs::read(path.as_ref())?;
    registry.open_as(format, data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FloppyError;

    fn temp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("floppyemu-{}-{}", std::process::id(), name))
    }

    #[test]
    fn test_read_d64_file() {
        let path = temp_path("blank.d64");
        fs::write(&path, vec![0u8; 174_848]).unwrap();
        let mut image = read_image(&path, &FormatRegistry::standard()).unwrap();
        assert_eq!(image.format_name(), "D64");
        assert_eq!(image.sectors_per_track(0, 0), 21);
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file() {
        let err = read_image(temp_path("missing.img"), &FormatRegistry::standard()).err().unwrap();
        assert!(matches!(err, FloppyError::Io(_)));
    }
}
