use thiserror::Error;

/// Result type alias for floppy operations
pub type Result<T> = std::result::Result<T, FloppyError>;

/// Errors raised by image codecs, drives and the image loader
#[derive(Debug, Error)]
pub enum FloppyError {
    /// I/O error occurred while reading or writing an image file
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Signature or geometry does not match the claimed format
    #[error("Invalid image: {0}")]
    InvalidImage(String),

    /// Parse error at specific offset
    #[error("Parse error at offset {offset}: {message}")]
    Parse {
        /// Byte offset where error occurred
        offset: usize,
        /// Error message
        message: String,
    },

    /// The operation is not implemented by this format
    #[error("{operation} is not supported by {format} images")]
    Unsupported {
        /// Format name
        format: &'static str,
        /// Operation name
        operation: &'static str,
    },

    /// A buffer implied by the image could not be allocated
    #[error("Out of memory: {0}")]
    OutOfMemory(String),

    /// Track, side or sector index outside the declared geometry
    #[error("Seek error: track {track}, side {side}, index {index}")]
    SeekError {
        /// Track number
        track: u8,
        /// Side number
        side: u8,
        /// Sector index within the track
        index: usize,
    },

    /// No image is bound to the drive
    #[error("No media in drive")]
    NoMedia,

    /// No registered format recognised the image
    #[error("Unknown format: {0}")]
    UnknownFormat(String),
}

impl FloppyError {
    /// Create a parse error with context
    pub fn parse<S: Into<String>>(offset: usize, message: S) -> Self {
        FloppyError::Parse {
            offset,
            message: message.into(),
        }
    }

    /// Create an invalid image error
    pub fn invalid_image<S: Into<String>>(message: S) -> Self {
        FloppyError::InvalidImage(message.into())
    }

    /// Create an unsupported operation error
    pub fn unsupported(format: &'static str, operation: &'static str) -> Self {
        FloppyError::Unsupported { format, operation }
    }

    /// Create a seek error
    pub fn seek(track: u8, side: u8, index: usize) -> Self {
        FloppyError::SeekError { track, side, index }
    }

    /// True for errors that mean the format cannot do the operation at all
    pub fn is_unsupported(&self) -> bool {
        matches!(self, FloppyError::Unsupported { .. })
    }
}

/// Allocate a zeroed buffer whose size comes from untrusted image data
pub(crate) fn alloc_buffer(len: usize, what: &str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| FloppyError::OutOfMemory(format!("{} ({} bytes)", what, len)))?;
    buf.resize(len, 0);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = FloppyError::seek(50, 0, 3);
        assert_eq!(err.to_string(), "Seek error: track 50, side 0, index 3");
    }

    #[test]
    fn test_parse_error() {
        let err = FloppyError::parse(256, "Invalid magic bytes");
        assert_eq!(
            err.to_string(),
            "Parse error at offset 256: Invalid magic bytes"
        );
    }

    #[test]
    fn test_unsupported() {
        let err = FloppyError::unsupported("D64", "write_track");
        assert!(err.is_unsupported());
        assert_eq!(err.to_string(), "write_track is not supported by D64 images");
        assert!(!FloppyError::NoMedia.is_unsupported());
    }

    #[test]
    fn test_alloc_buffer() {
        let buf = alloc_buffer(16, "track").unwrap();
        assert_eq!(buf, vec![0u8; 16]);
    }
}
