//! Vulkan abstraction layer (Render Hardware Interface).
//!
//! Thin owning wrappers over `ash` handles. Every wrapper keeps an
//! `Arc<Device>` and releases its Vulkan object (and its gpu-allocator
//! allocation, if any) on drop.

mod error;

pub mod buffer;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod image;
pub mod instance;
pub mod physical_device;
pub mod pipeline;
pub mod sampler;
pub mod shader;
pub mod swapchain;
pub mod sync;
pub mod vertex;

pub use error::{RhiError, RhiResult};

pub use ash::vk;
