//! Swapchain creation, recreation, acquisition and presentation.
//!
//! Acquisition and presentation return raw `vk::Result`s; the frame
//! scheduler classifies them into frame statuses.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// What a surface supports, queried before every (re)creation.
#[derive(Debug, Clone)]
pub struct SwapchainSupportDetails {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    #[inline]
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Swapchain plus one color view per presentable image.
pub struct Swapchain {
    device: Arc<Device>,
    swapchain_loader: ash::khr::swapchain::Device,
    surface_loader: ash::khr::surface::Instance,
    swapchain: vk::SwapchainKHR,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    format: vk::Format,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,
    vsync: bool,
}

impl Swapchain {
    /// Creates a swapchain for `surface` sized to `width`x`height` (or the
    /// surface's fixed extent when it reports one).
    ///
    /// With `vsync` the present mode is FIFO; otherwise MAILBOX when available.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `device` - The logical device
    /// * `surface` - Surface created from the window
    /// * `width`, `height` - Framebuffer size in pixels
    /// * `vsync` - Prefer FIFO presentation
    ///
    /// # Errors
    ///
    /// Returns an error if surface queries, swapchain creation or image view
    /// creation fail.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use frameflow_rhi::device::Device;
    /// use frameflow_rhi::instance::Instance;
    /// use frameflow_rhi::swapchain::Swapchain;
    /// use frameflow_rhi::vk;
    ///
    /// # fn example(instance: &Instance, device: Arc<Device>, surface: vk::SurfaceKHR) -> frameflow_rhi::RhiResult<()> {
    /// let mut swapchain = Swapchain::new(instance, device, surface, 1280, 720, true)?;
    /// // After a resize, once the GPU is idle:
    /// swapchain.recreate(surface, 1920, 1080)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        width: u32,
        height: u32,
        vsync: bool,
    ) -> RhiResult<Self> {
        let swapchain_loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());

        let mut swapchain = Self {
            device,
            swapchain_loader,
            surface_loader,
            swapchain: vk::SwapchainKHR::null(),
            images: Vec::new(),
            image_views: Vec::new(),
            format: vk::Format::UNDEFINED,
            extent: vk::Extent2D::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            vsync,
        };
        swapchain.build(surface, width, height)?;
        Ok(swapchain)
    }

    /// Rebuilds the swapchain after a resize or an out-of-date result.
    ///
    /// The caller must make sure no submitted work still references the old
    /// images (the renderer waits for device idle first).
    ///
    /// # Errors
    ///
    /// Same as [`Swapchain::new`]. The old image views are destroyed even
    /// when an error is returned.
    pub fn recreate(&mut self, surface: vk::SurfaceKHR, width: u32, height: u32) -> RhiResult<()> {
        info!("Recreating swapchain for {}x{}", width, height);
        self.destroy_image_views();
        self.build(surface, width, height)
    }

    fn build(&mut self, surface: vk::SurfaceKHR, width: u32, height: u32) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            surface,
            &self.surface_loader,
        )?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface reports no formats or present modes".to_string(),
            ));
        }

        let surface_format = choose_surface_format(&support.formats);
        let present_mode = choose_present_mode(&support.present_modes, self.vsync);
        let extent = choose_extent(&support.capabilities, width, height);
        if extent.width == 0 || extent.height == 0 {
            return Err(RhiError::SwapchainError(format!(
                "cannot create a {}x{} swapchain",
                extent.width, extent.height
            )));
        }
        let image_count = determine_image_count(&support.capabilities);

        let families = self.device.queue_families();
        let (graphics, present) = (
            families.graphics_family.unwrap_or_default(),
            families.present_family.unwrap_or_default(),
        );
        let family_indices = [graphics, present];
        let (sharing_mode, shared_families) = if graphics != present {
            (vk::SharingMode::CONCURRENT, &family_indices[..])
        } else {
            (vk::SharingMode::EXCLUSIVE, &[][..])
        };

        let old_swapchain = self.swapchain;
        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(shared_families)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(old_swapchain);

        let swapchain = unsafe { self.swapchain_loader.create_swapchain(&create_info, None)? };
        if old_swapchain != vk::SwapchainKHR::null() {
            unsafe { self.swapchain_loader.destroy_swapchain(old_swapchain, None) };
        }
        self.swapchain = swapchain;

        self.images = unsafe { self.swapchain_loader.get_swapchain_images(swapchain)? };
        self.format = surface_format.format;
        self.extent = extent;
        self.present_mode = present_mode;
        self.create_image_views()?;

        info!(
            "Swapchain ready: {}x{}, {:?}, {:?}, {} images",
            extent.width,
            extent.height,
            surface_format.format,
            present_mode,
            self.images.len()
        );
        Ok(())
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
                .subresource_range(
                    vk::ImageSubresourceRange::default()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .level_count(1)
                        .layer_count(1),
                );
            let view = unsafe { self.device.handle().create_image_view(&create_info, None)? };
            self.image_views.push(view);
        }
        Ok(())
    }

    /// Acquires the next presentable image, signaling `semaphore`.
    ///
    /// Returns `(image_index, suboptimal)`. `VK_TIMEOUT`, `VK_NOT_READY` and
    /// `VK_ERROR_OUT_OF_DATE_KHR` come back as `Err`.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
        timeout: u64,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Queues `image_index` for presentation after `wait_semaphore`.
    ///
    /// `Ok(true)` means the swapchain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];
        let wait_semaphores = [wait_semaphore];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        unsafe { self.swapchain_loader.queue_present(queue, &present_info) }
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
    pub fn image_count(&self) -> u32 {
        self.images.len() as u32
    }

    /// Image and view for `index`, or `None` when out of range.
    pub fn target(&self, index: u32) -> Option<(vk::Image, vk::ImageView)> {
        let index = index as usize;
        Some((*self.images.get(index)?, *self.image_views.get(index)?))
    }

    fn destroy_image_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe { self.device.handle().destroy_image_view(view, None) };
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_image_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.swapchain_loader
                    .destroy_swapchain(self.swapchain, None);
            }
            info!(
                "Swapchain destroyed (was {}x{}, {} images)",
                self.extent.width,
                self.extent.height,
                self.images.len()
            );
        }
    }
}

/// Prefers B8G8R8A8_SRGB / SRGB_NONLINEAR, then any SRGB_NONLINEAR
/// B8G8R8A8 format, then whatever comes first.
fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> vk::SurfaceFormatKHR {
    let srgb_nonlinear = |f: &&vk::SurfaceFormatKHR| f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR;

    if let Some(&format) = formats
        .iter()
        .filter(srgb_nonlinear)
        .find(|f| f.format == vk::Format::B8G8R8A8_SRGB)
    {
        return format;
    }
    if let Some(&format) = formats
        .iter()
        .filter(srgb_nonlinear)
        .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
    {
        warn!("Using fallback surface format B8G8R8A8_UNORM");
        return format;
    }

    let format = formats.first().copied().unwrap_or_default();
    warn!("Using first available surface format {:?}", format.format);
    format
}

/// FIFO when `vsync` (always available), otherwise MAILBOX, then IMMEDIATE.
fn choose_present_mode(present_modes: &[vk::PresentModeKHR], vsync: bool) -> vk::PresentModeKHR {
    if !vsync {
        for mode in [vk::PresentModeKHR::MAILBOX, vk::PresentModeKHR::IMMEDIATE] {
            if present_modes.contains(&mode) {
                return mode;
            }
        }
    }
    vk::PresentModeKHR::FIFO
}

/// Uses the surface's fixed extent when set, otherwise clamps the request.
fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let extent = vk::Extent2D {
        width: width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    };
    debug!(
        "Clamped extent {}x{} -> {}x{}",
        width, height, extent.width, extent.height
    );
    extent
}

/// One more than the minimum, capped by the maximum when there is one.
fn determine_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let preferred = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        preferred.min(capabilities.max_image_count)
    } else {
        preferred
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn surface_format(format: vk::Format) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR {
            format,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        }
    }

    fn capabilities(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn test_choose_surface_format_prefers_srgb() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_SRGB),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_SRGB);
    }

    #[test]
    fn test_choose_surface_format_fallbacks() {
        let formats = [
            surface_format(vk::Format::R8G8B8A8_UNORM),
            surface_format(vk::Format::B8G8R8A8_UNORM),
        ];
        assert_eq!(choose_surface_format(&formats).format, vk::Format::B8G8R8A8_UNORM);

        let formats = [surface_format(vk::Format::R16G16B16A16_SFLOAT)];
        assert_eq!(
            choose_surface_format(&formats).format,
            vk::Format::R16G16B16A16_SFLOAT
        );
    }

    #[test]
    fn test_choose_present_mode() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::MAILBOX);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::FIFO], false),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_choose_extent_uses_current() {
        let mut caps = capabilities(2, 3);
        caps.current_extent = vk::Extent2D {
            width: 800,
            height: 600,
        };
        let extent = choose_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn test_choose_extent_clamps_to_limits() {
        let caps = capabilities(2, 3);
        let extent = choose_extent(&caps, 10_000, 0);
        assert_eq!((extent.width, extent.height), (4096, 1));
    }

    #[test]
    fn test_determine_image_count() {
        assert_eq!(determine_image_count(&capabilities(2, 0)), 3);
        assert_eq!(determine_image_count(&capabilities(2, 2)), 2);
        assert_eq!(determine_image_count(&capabilities(3, 8)), 4);
    }

    #[test]
    fn test_support_details_adequacy() {
        let mut details = SwapchainSupportDetails {
            capabilities: capabilities(2, 3),
            formats: vec![surface_format(vk::Format::B8G8R8A8_SRGB)],
            present_modes: vec![],
        };
        assert!(!details.is_adequate());
        details.present_modes.push(vk::PresentModeKHR::FIFO);
        assert!(details.is_adequate());
    }
}
