//! Image file writer

use crate::error::Result;
use crate::image::ImageCodec;
use log::debug;
use std::fs::File;
use std::io::Write;
use std::path::Path;

/// Write serialised image bytes to a file
pub fn write_image<P: AsRef<Path>>(path: P, bytes: &[u8]) -> Result<()> {
    let path = path.as_ref();
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.flush()?;
    debug!("Wrote {} bytes to {}", bytes.len(), path.display());
    Ok(())
}

/// Serialise an image in its own container format and write it
pub fn save_image<P: AsRef<Path>>(path: P, image: &dyn ImageCodec) -> Result<()> {
    write_image(path, &image.to_bytes()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{BasicDsk, BasicDskGeometry};

    #[test]
    fn test_save_round_trip() {
        let path = std::env::temp_dir().join(format!("floppyemu-{}-save.ssd", std::process::id()));
        let mut image = BasicDsk::blank(BasicDskGeometry::bbc_dfs_ss40(), 0xE5).unwrap();
        image.write_indexed_sector(1, 0, 2, &[0x33; 256], false).unwrap();
        save_image(&path, &image).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 40 * 10 * 256);
        assert_eq!(bytes[(10 + 2) * 256], 0x33);
        std::fs::remove_file(&path).unwrap();
    }
}
