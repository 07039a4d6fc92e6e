//! Tile image decoder.
//!
//! Tiles arrive as encoded images (JPEG or PNG, whatever the mirror serves)
//! and are decoded to 8-bit greyscale `(rows, cols)` arrays. Colour images
//! are converted to luma.

use std::io::Cursor;

use image::ImageReader;
use ndarray::Array2;

use crate::error::DecodeError;

// =============================================================================
// Decoder
// =============================================================================

/// Decodes tile bytes into greyscale pixel arrays.
///
/// # Example
///
/// ```ignore
/// use catmaid_tiles::tile::TileDecoder;
///
/// let decoder = TileDecoder::new();
/// let pixels = decoder.decode(&tile_bytes)?;
/// assert_eq!(pixels.dim(), (256, 256));
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct TileDecoder;

impl TileDecoder {
    pub fn new() -> Self {
        Self
    }

    /// Decode an encoded tile into a `(rows, cols)` array.
    ///
    /// The image format is detected from the data itself.
    ///
    /// # Errors
    ///
    /// Returns an error if the format is not recognised or decoding fails.
    pub fn decode(&self, source: &[u8]) -> Result<Array2<u8>, DecodeError> {
        let reader = ImageReader::new(Cursor::new(source))
            .with_guessed_format()
            .map_err(|e| DecodeError::new(e.to_string()))?;

        let img = reader
            .decode()
            .map_err(|e| DecodeError::new(e.to_string()))?
            .into_luma8();

        let (width, height) = img.dimensions();
        Array2::from_shape_vec((height as usize, width as usize), img.into_raw())
            .map_err(|e| DecodeError::new(e.to_string()))
    }
}

// =============================================================================
// Tests
// =============================================================================
