//! Depth attachment sized to the swapchain.
//!
//! The depth image is owned here rather than per swapchain image: frames
//! that overlap on the GPU are ordered by the depth transition barrier
//! recorded at the start of each frame.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameflow_rhi::device::Device;
//! use frameflow_renderer::depth_buffer::{DepthBuffer, DepthTarget};
//! use ash::vk;
//!
//! # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
//! let extent = vk::Extent2D { width: 1920, height: 1080 };
//! let depth = DepthBuffer::new(device, DepthTarget::for_swapchain(extent))?;
//! let view = depth.view();
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use frameflow_rhi::RhiResult;
use frameflow_rhi::device::Device;
use frameflow_rhi::image::{Image, ImageKind};

/// 32-bit float depth, no stencil.
pub const DEFAULT_DEPTH_FORMAT: vk::Format = vk::Format::D32_SFLOAT;

/// Value the depth attachment is cleared to each frame.
pub const DEPTH_CLEAR: f32 = 1.0;

/// Format and size of the depth image a swapchain needs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthTarget {
    pub format: vk::Format,
    pub extent: vk::Extent2D,
}

impl DepthTarget {
    /// Depth target matching a swapchain of `extent`.
    pub fn for_swapchain(extent: vk::Extent2D) -> Self {
        Self {
            format: DEFAULT_DEPTH_FORMAT,
            extent,
        }
    }

    /// Whether this target still fits a swapchain of `extent`.
    #[inline]
    pub fn matches(&self, extent: vk::Extent2D) -> bool {
        self.extent.width == extent.width && self.extent.height == extent.height
    }
}

pub struct DepthBuffer {
    image: Image,
}

impl DepthBuffer {
    /// Creates the depth image described by `target`.
    pub fn new(device: Arc<Device>, target: DepthTarget) -> RhiResult<Self> {
        let image = Image::new(device, ImageKind::Depth, target.format, target.extent)?;
        debug!(
            "Depth buffer created: {}x{}",
            target.extent.width, target.extent.height
        );
        Ok(Self { image })
    }

    #[inline]
    pub fn image(&self) -> vk::Image {
        self.image.handle()
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    /// Format and extent the image was created with.
    #[inline]
    pub fn target(&self) -> DepthTarget {
        DepthTarget {
            format: self.image.format(),
            extent: self.image.extent(),
        }
    }

    /// Attachment info clearing depth to [`DEPTH_CLEAR`] and discarding it
    /// after the pass.
    pub fn attachment_info(&self) -> vk::RenderingAttachmentInfo<'static> {
        depth_attachment(self.view())
    }
}

pub(crate) fn depth_attachment(view: vk::ImageView) -> vk::RenderingAttachmentInfo<'static> {
    vk::RenderingAttachmentInfo::default()
        .image_view(view)
        .image_layout(vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::DONT_CARE)
        .clear_value(vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: DEPTH_CLEAR,
                stencil: 0,
            },
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_depth_format() {
        assert_eq!(DEFAULT_DEPTH_FORMAT, vk::Format::D32_SFLOAT);
        assert_eq!(ImageKind::Depth.aspect(), vk::ImageAspectFlags::DEPTH);
    }

    #[test]
    fn test_target_follows_swapchain_extent() {
        let target = DepthTarget::for_swapchain(vk::Extent2D {
            width: 1280,
            height: 720,
        });
        assert_eq!(target.format, DEFAULT_DEPTH_FORMAT);
        assert!(target.matches(vk::Extent2D {
            width: 1280,
            height: 720
        }));
        assert!(!target.matches(vk::Extent2D {
            width: 640,
            height: 360
        }));
    }

    #[test]
    fn test_depth_attachment_clears() {
        let info = depth_attachment(vk::ImageView::null());
        assert_eq!(info.load_op, vk::AttachmentLoadOp::CLEAR);
        assert_eq!(info.image_layout, vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL);
        assert_eq!(unsafe { info.clear_value.depth_stencil.depth }, 1.0);
    }
}
