//! Decoded asset data handed to the renderer.
//!
//! The renderer never parses files itself. This crate turns files into the
//! three shapes it accepts:
//! - [`ImageData`]: RGBA8 pixels with explicit dimensions
//! - [`MeshData`]: per-vertex position/color/UV arrays and 32-bit indices
//! - [`SpirvBlob`]: validated SPIR-V words

mod error;
mod image_data;
mod mesh;
mod spirv;

pub use error::{AssetError, AssetResult};
pub use image_data::ImageData;
pub use mesh::MeshData;
pub use spirv::{SPIRV_MAGIC, SpirvBlob};
