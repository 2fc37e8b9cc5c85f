//! Reading and writing image files

/// Image file reader
pub mod reader;
/// Image file writer
pub mod writer;

pub use reader::{read_image, read_image_as};
pub use writer::{save_image, write_image};
