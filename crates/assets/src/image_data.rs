//! RGBA8 pixel buffers.

use std::path::Path;

use tracing::debug;

use crate::error::{AssetError, AssetResult};

/// Bytes per pixel of the only supported layout.
const CHANNELS: usize = 4;

/// A decoded image: tightly packed RGBA8 rows, top row first.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageData {
    width: u32,
    height: u32,
    pixels: Vec<u8>,
}

impl ImageData {
    /// Wraps already decoded pixels.
    ///
    /// # Errors
    ///
    /// [`AssetError::InvalidData`] for a zero dimension or when
    /// `pixels.len() != width * height * 4`.
    pub fn new(width: u32, height: u32, pixels: Vec<u8>) -> AssetResult<Self> {
        if width == 0 || height == 0 {
            return Err(AssetError::invalid(
                "image",
                format!("dimensions must be non-zero, got {}x{}", width, height),
            ));
        }
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(AssetError::invalid(
                "image",
                format!(
                    "{}x{} RGBA8 needs {} bytes, got {}",
                    width,
                    height,
                    expected,
                    pixels.len()
                ),
            ));
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// A `width`x`height` image filled with one color.
    pub fn solid(width: u32, height: u32, rgba: [u8; 4]) -> AssetResult<Self> {
        let count = width as usize * height as usize;
        let pixels = rgba.iter().copied().cycle().take(count * CHANNELS).collect();
        Self::new(width, height, pixels)
    }

    /// Decodes a PNG or JPEG file and converts it to RGBA8.
    pub fn load<P: AsRef<Path>>(path: P) -> AssetResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AssetError::FileNotFound(path.to_path_buf()));
        }

        let decoded = image::open(path)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        debug!("Decoded image {}: {}x{}", path.display(), width, height);

        Self::new(width, height, decoded.into_raw())
    }

    /// Decodes an in-memory PNG or JPEG.
    pub fn from_encoded(bytes: &[u8]) -> AssetResult<Self> {
        let decoded = image::load_from_memory(bytes)?.to_rgba8();
        let (width, height) = decoded.dimensions();
        Self::new(width, height, decoded.into_raw())
    }

    #[inline]
    pub fn width(&self) -> u32 {
        self.width
    }

    #[inline]
    pub fn height(&self) -> u32 {
        self.height
    }

    #[inline]
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// Size of the pixel data in bytes.
    #[inline]
    pub fn byte_len(&self) -> u64 {
        self.pixels.len() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_solid_fills_every_pixel() {
        let image = ImageData::solid(2, 3, [10, 20, 30, 255]).unwrap();
        assert_eq!(image.byte_len(), 2 * 3 * 4);
        assert!(
            image
                .pixels()
                .chunks_exact(4)
                .all(|px| px == [10, 20, 30, 255])
        );
    }

    #[test]
    fn test_new_rejects_wrong_length() {
        let result = ImageData::new(2, 2, vec![0; 15]);
        assert!(matches!(result, Err(AssetError::InvalidData { .. })));
    }

    #[test]
    fn test_new_rejects_zero_dimension() {
        assert!(ImageData::new(0, 4, Vec::new()).is_err());
        assert!(ImageData::solid(4, 0, [0; 4]).is_err());
    }

    #[test]
    fn test_load_missing_file() {
        let result = ImageData::load("does/not/exist.png");
        assert!(matches!(result, Err(AssetError::FileNotFound(_))));
    }
}
