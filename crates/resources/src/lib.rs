//! Asset loading for vkinterop.
//!
//! Two thin loaders sit in front of the renderer:
//! - [`load_pixels`] / [`decode_pixels`]: any format the `image` crate reads,
//!   converted to tightly packed RGBA8
//! - [`load_spirv`]: shader bytecode, checked for alignment and the SPIR-V
//!   magic number before it reaches the driver

mod error;
mod pixels;
mod spirv;

pub use error::{ResourceError, ResourceResult};
pub use pixels::{DecodedImage, checkerboard, decode_pixels, load_pixels};
pub use spirv::{SPIRV_MAGIC, load_spirv, validate_spirv};
