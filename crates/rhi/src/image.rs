//! Device-local 2D images and layout transitions.
//!
//! Images are created in `UNDEFINED` layout. Sampled textures are filled by
//! a staging copy and moved to `SHADER_READ_ONLY_OPTIMAL`; depth targets are
//! transitioned at the start of every frame.

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Format used for sampled RGBA8 textures.
pub const TEXTURE_FORMAT: vk::Format = vk::Format::R8G8B8A8_SRGB;

/// What an image is used for. Selects usage flags and the view aspect.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImageKind {
    /// Copy destination, then sampled from fragment shaders.
    Texture,
    /// Depth attachment for dynamic rendering.
    Depth,
}

impl ImageKind {
    pub fn to_vk_usage(self) -> vk::ImageUsageFlags {
        match self {
            ImageKind::Texture => vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED,
            ImageKind::Depth => vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
        }
    }

    pub fn aspect(self) -> vk::ImageAspectFlags {
        match self {
            ImageKind::Texture => vk::ImageAspectFlags::COLOR,
            ImageKind::Depth => vk::ImageAspectFlags::DEPTH,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ImageKind::Texture => "texture",
            ImageKind::Depth => "depth",
        }
    }
}

/// A `VkImage`, its allocation and a full-subresource view.
pub struct Image {
    device: Arc<Device>,
    image: vk::Image,
    view: vk::ImageView,
    allocation: Option<Allocation>,
    format: vk::Format,
    extent: vk::Extent2D,
    kind: ImageKind,
}

impl Image {
    /// Creates a single-mip, single-layer image in GPU-only memory.
    ///
    /// The image starts in `UNDEFINED` layout. Textures must be moved to
    /// `TRANSFER_DST_OPTIMAL` before the first copy.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `kind` - Texture or depth attachment; picks usage, aspect and view
    /// * `format` - Texel format
    /// * `extent` - Size in texels, both sides non-zero
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] on a zero extent. Otherwise any failure
    /// from image creation, allocation, binding or view creation.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use frameflow_rhi::device::Device;
    /// use frameflow_rhi::image::{Image, ImageKind};
    /// use frameflow_rhi::vk;
    ///
    /// # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
    /// let extent = vk::Extent2D { width: 256, height: 256 };
    /// let texture = Image::new(device, ImageKind::Texture, vk::Format::R8G8B8A8_SRGB, extent)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        device: Arc<Device>,
        kind: ImageKind,
        format: vk::Format,
        extent: vk::Extent2D,
    ) -> RhiResult<Self> {
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} image extent must be non-zero, got {}x{}",
                kind.name(),
                extent.width,
                extent.height
            )));
        }

        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: extent.width,
                height: extent.height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(kind.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let image = unsafe { device.handle().create_image(&image_info, None)? };
        let requirements = unsafe { device.handle().get_image_memory_requirements(image) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name: kind.name(),
                    requirements,
                    location: MemoryLocation::GpuOnly,
                    linear: false,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_image(image, None) };
                return Err(e);
            }
        };

        // From here on `Drop` cleans up whatever was created.
        let mut this = Self {
            device,
            image,
            view: vk::ImageView::null(),
            allocation: Some(allocation),
            format,
            extent,
            kind,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device
                    .handle()
                    .bind_image_memory(image, allocation.memory(), allocation.offset())?;
            }
        }

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(full_subresource_range(kind.aspect()));
        this.view = unsafe { this.device.handle().create_image_view(&view_info, None)? };

        debug!(
            "Created {} image {}x{} ({:?})",
            kind.name(),
            extent.width,
            extent.height,
            format
        );
        Ok(this)
    }

    #[inline]
    pub fn handle(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.view
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn kind(&self) -> ImageKind {
        self.kind
    }
}

impl Drop for Image {
    fn drop(&mut self) {
        unsafe {
            if self.view != vk::ImageView::null() {
                self.device.handle().destroy_image_view(self.view, None);
            }
        }

        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free image allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking image allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_image(self.image, None);
        }
        debug!(
            "Destroyed {} image {}x{}",
            self.kind.name(),
            self.extent.width,
            self.extent.height
        );
    }
}

/// Whole image: mip 0, layer 0.
pub fn full_subresource_range(aspect: vk::ImageAspectFlags) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange::default()
        .aspect_mask(aspect)
        .base_mip_level(0)
        .level_count(1)
        .base_array_layer(0)
        .layer_count(1)
}

/// Stage and access masks on both sides of a layout transition.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TransitionMasks {
    pub src_stage: vk::PipelineStageFlags,
    pub src_access: vk::AccessFlags,
    pub dst_stage: vk::PipelineStageFlags,
    pub dst_access: vk::AccessFlags,
}

/// Masks for the transitions the renderer records. Unknown pairs fall back
/// to a full `ALL_COMMANDS` barrier with a warning.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> TransitionMasks {
    use vk::AccessFlags as A;
    use vk::ImageLayout as L;
    use vk::PipelineStageFlags as S;

    let (src_stage, src_access, dst_stage, dst_access) = match (old, new) {
        (L::UNDEFINED, L::TRANSFER_DST_OPTIMAL) => {
            (S::TOP_OF_PIPE, A::empty(), S::TRANSFER, A::TRANSFER_WRITE)
        }
        (L::TRANSFER_DST_OPTIMAL, L::SHADER_READ_ONLY_OPTIMAL) => (
            S::TRANSFER,
            A::TRANSFER_WRITE,
            S::FRAGMENT_SHADER,
            A::SHADER_READ,
        ),
        // The previous frame's color write is covered by the acquire
        // semaphore wait at COLOR_ATTACHMENT_OUTPUT.
        (L::UNDEFINED, L::COLOR_ATTACHMENT_OPTIMAL) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::empty(),
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
        ),
        // The depth image is shared by all frame slots, so the previous
        // frame's depth writes must finish first.
        (L::UNDEFINED, L::DEPTH_ATTACHMENT_OPTIMAL) => (
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_WRITE,
            S::EARLY_FRAGMENT_TESTS | S::LATE_FRAGMENT_TESTS,
            A::DEPTH_STENCIL_ATTACHMENT_READ | A::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ),
        (L::COLOR_ATTACHMENT_OPTIMAL, L::PRESENT_SRC_KHR) => (
            S::COLOR_ATTACHMENT_OUTPUT,
            A::COLOR_ATTACHMENT_WRITE,
            S::BOTTOM_OF_PIPE,
            A::empty(),
        ),
        _ => {
            warn!("Unhandled layout transition: {:?} -> {:?}", old, new);
            (
                S::ALL_COMMANDS,
                A::MEMORY_READ | A::MEMORY_WRITE,
                S::ALL_COMMANDS,
                A::MEMORY_READ | A::MEMORY_WRITE,
            )
        }
    };

    TransitionMasks {
        src_stage,
        src_access,
        dst_stage,
        dst_access,
    }
}

/// Builds the barrier for an `old -> new` transition of the whole image,
/// returned with its masks so the caller can pick the stage pair.
pub fn layout_barrier(
    image: vk::Image,
    aspect: vk::ImageAspectFlags,
    old: vk::ImageLayout,
    new: vk::ImageLayout,
) -> (vk::ImageMemoryBarrier<'static>, TransitionMasks) {
    let masks = transition_masks(old, new);
    let barrier = vk::ImageMemoryBarrier::default()
        .old_layout(old)
        .new_layout(new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(full_subresource_range(aspect))
        .src_access_mask(masks.src_access)
        .dst_access_mask(masks.dst_access);
    (barrier, masks)
}

/// Tightly packed copy of `extent` into mip 0 / layer 0 of a color image.
pub fn buffer_image_copy(buffer_offset: vk::DeviceSize, extent: vk::Extent2D) -> vk::BufferImageCopy {
    vk::BufferImageCopy::default()
        .buffer_offset(buffer_offset)
        .buffer_row_length(0)
        .buffer_image_height(0)
        .image_subresource(
            vk::ImageSubresourceLayers::default()
                .aspect_mask(vk::ImageAspectFlags::COLOR)
                .mip_level(0)
                .base_array_layer(0)
                .layer_count(1),
        )
        .image_offset(vk::Offset3D::default())
        .image_extent(vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_usage_and_aspect() {
        assert!(
            ImageKind::Texture
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::TRANSFER_DST | vk::ImageUsageFlags::SAMPLED)
        );
        assert_eq!(ImageKind::Texture.aspect(), vk::ImageAspectFlags::COLOR);
        assert_eq!(ImageKind::Depth.aspect(), vk::ImageAspectFlags::DEPTH);
        assert!(
            ImageKind::Depth
                .to_vk_usage()
                .contains(vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT)
        );
    }

    #[test]
    fn test_upload_transitions() {
        let to_dst = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        assert_eq!(to_dst.dst_stage, vk::PipelineStageFlags::TRANSFER);
        assert_eq!(to_dst.dst_access, vk::AccessFlags::TRANSFER_WRITE);

        let to_read = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        assert_eq!(to_read.src_access, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(to_read.dst_stage, vk::PipelineStageFlags::FRAGMENT_SHADER);
    }

    #[test]
    fn test_unknown_transition_is_full_barrier() {
        let masks = transition_masks(
            vk::ImageLayout::GENERAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        );
        assert_eq!(masks.src_stage, vk::PipelineStageFlags::ALL_COMMANDS);
        assert_eq!(masks.dst_stage, vk::PipelineStageFlags::ALL_COMMANDS);
    }

    #[test]
    fn test_layout_barrier_fields() {
        let (barrier, masks) = layout_barrier(
            vk::Image::null(),
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );
        assert_eq!(barrier.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(barrier.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(barrier.src_access_mask, masks.src_access);
        assert_eq!(barrier.subresource_range.level_count, 1);
    }

    #[test]
    fn test_buffer_image_copy() {
        let copy = buffer_image_copy(
            256,
            vk::Extent2D {
                width: 4,
                height: 2,
            },
        );
        assert_eq!(copy.buffer_offset, 256);
        assert_eq!(copy.image_extent.depth, 1);
        assert_eq!(copy.image_subresource.layer_count, 1);
    }

    #[test]
    fn test_image_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Image>();
    }
}
