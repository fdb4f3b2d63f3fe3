//! Image decoding into RGBA8 texel data.

use std::path::Path;

use tracing::{debug, info};

use crate::error::{ResourceError, ResourceResult};

/// Decoded texels, always four 8-bit channels per pixel, rows tightly packed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DecodedImage {
    pub width: u32,
    pub height: u32,
    pub channels: u32,
    pub pixels: Vec<u8>,
}

impl DecodedImage {
    /// Wraps RGBA8 data, checking that it matches the dimensions.
    pub fn from_rgba8(width: u32, height: u32, pixels: Vec<u8>) -> ResourceResult<Self> {
        let image = Self {
            width,
            height,
            channels: 4,
            pixels,
        };
        image.validate()?;
        Ok(image)
    }

    /// Checks that the dimensions are non-zero and that `pixels` holds
    /// exactly `width * height` RGBA8 texels. The fields are public, so
    /// anything uploading the pixels calls this first.
    pub fn validate(&self) -> ResourceResult<()> {
        let expected = u64::from(self.width) * u64::from(self.height) * 4;
        if self.width == 0
            || self.height == 0
            || self.channels != 4
            || self.pixels.len() as u64 != expected
        {
            return Err(ResourceError::InvalidDimensions {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }

    #[inline]
    pub fn size_bytes(&self) -> usize {
        self.pixels.len()
    }
}

impl From<image::RgbaImage> for DecodedImage {
    fn from(image: image::RgbaImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            channels: 4,
            pixels: image.into_raw(),
        }
    }
}

/// Loads and decodes an image file.
///
/// # Errors
///
/// [`ResourceError::FileNotFound`] if `path` does not exist, otherwise any
/// decoding error from the `image` crate.
pub fn load_pixels(path: impl AsRef<Path>) -> ResourceResult<DecodedImage> {
    let path = path.as_ref();
    if !path.exists() {
        return Err(ResourceError::FileNotFound(path.to_path_buf()));
    }

    let decoded = image::open(path)?.to_rgba8();
    let decoded = DecodedImage::from(decoded);
    decoded.validate()?;
    info!(
        path = %path.display(),
        width = decoded.width,
        height = decoded.height,
        "Loaded image"
    );
    Ok(decoded)
}

/// Decodes an in-memory encoded image (PNG, JPEG).
pub fn decode_pixels(bytes: &[u8]) -> ResourceResult<DecodedImage> {
    let decoded = DecodedImage::from(image::load_from_memory(bytes)?.to_rgba8());
    decoded.validate()?;
    debug!(
        width = decoded.width,
        height = decoded.height,
        "Decoded image from memory"
    );
    Ok(decoded)
}

/// A `size`×`size` checkerboard of `cell`-pixel squares, used when no
/// texture file is supplied.
pub fn checkerboard(size: u32, cell: u32, light: [u8; 4], dark: [u8; 4]) -> DecodedImage {
    let cell = cell.max(1);
    let image = image::RgbaImage::from_fn(size.max(1), size.max(1), |x, y| {
        if ((x / cell) + (y / cell)) % 2 == 0 {
            image::Rgba(light)
        } else {
            image::Rgba(dark)
        }
    });
    DecodedImage::from(image)
}
