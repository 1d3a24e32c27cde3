//! Vulkan logical device, queues and the gpu-allocator instance.
//!
//! # Example
//!
//! ```no_run
//! use frameflow_rhi::instance::Instance;
//! use frameflow_rhi::physical_device::select_physical_device;
//! use frameflow_rhi::device::Device;
//! use ash::vk;
//!
//! # fn example() -> frameflow_rhi::RhiResult<()> {
//! let instance = Instance::new(false, &[])?;
//! let surface = vk::SurfaceKHR::null(); // from the platform crate in practice
//! let surface_loader = ash::khr::surface::Instance::new(instance.entry(), instance.handle());
//! let info = select_physical_device(instance.handle(), surface, &surface_loader)?;
//! let device = Device::new(&instance, &info)?;
//! println!("storage range: {}", device.limits().max_storage_buffer_range);
//! # Ok(())
//! # }
//! ```

use std::mem::ManuallyDrop;
use std::sync::{Arc, Mutex, MutexGuard};

use ash::vk;
use gpu_allocator::vulkan::{Allocator, AllocatorCreateDesc};
use tracing::{debug, error, info};

use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;
use crate::physical_device::{DeviceLimits, PhysicalDeviceInfo, QueueFamilyIndices};

/// Required device extensions. Dynamic rendering and synchronization2 are
/// core in 1.3 and enabled through the feature chain instead.
const DEVICE_EXTENSIONS: &[&std::ffi::CStr] = &[ash::khr::swapchain::NAME];

/// Vulkan logical device wrapper.
///
/// Shared through `Arc` by every resource wrapper. The allocator is the only
/// mutable state and sits behind a `Mutex`.
pub struct Device {
    device: ash::Device,
    physical_device: vk::PhysicalDevice,
    /// Dropped by hand before `destroy_device` in `Drop`.
    allocator: ManuallyDrop<Mutex<Allocator>>,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    queue_families: QueueFamilyIndices,
    limits: DeviceLimits,
    sampler_anisotropy: bool,
}

impl Device {
    /// Creates the logical device with a graphics and a present queue and
    /// initializes gpu-allocator.
    ///
    /// # Arguments
    ///
    /// * `instance` - The Vulkan instance
    /// * `physical_device_info` - The GPU returned by
    ///   [`select_physical_device`](crate::physical_device::select_physical_device)
    ///
    /// # Errors
    ///
    /// Returns an error if the GPU has no graphics or present family, if
    /// device creation fails, or if the allocator cannot be created.
    ///
    /// See the [`device`](crate::device) module docs for an example.
    pub fn new(instance: &Instance, physical_device_info: &PhysicalDeviceInfo) -> RhiResult<Arc<Self>> {
        let queue_families = physical_device_info.queue_families;
        let (Some(graphics_family), Some(present_family)) =
            (queue_families.graphics_family, queue_families.present_family)
        else {
            return Err(RhiError::NoSuitableGpu);
        };

        let unique_families = queue_families.unique_families();
        let queue_priorities = [1.0f32];
        let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = unique_families
            .iter()
            .map(|&family| {
                vk::DeviceQueueCreateInfo::default()
                    .queue_family_index(family)
                    .queue_priorities(&queue_priorities)
            })
            .collect();

        debug!("Creating queues for families: {:?}", unique_families);

        let mut features_1_3 = vk::PhysicalDeviceVulkan13Features::default()
            .dynamic_rendering(true)
            .synchronization2(true);

        let sampler_anisotropy = physical_device_info.features.sampler_anisotropy == vk::TRUE;
        let features = vk::PhysicalDeviceFeatures::default().sampler_anisotropy(sampler_anisotropy);

        let extension_names: Vec<*const std::ffi::c_char> =
            DEVICE_EXTENSIONS.iter().map(|ext| ext.as_ptr()).collect();

        let create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_create_infos)
            .enabled_extension_names(&extension_names)
            .enabled_features(&features)
            .push_next(&mut features_1_3);

        let device = unsafe {
            instance
                .handle()
                .create_device(physical_device_info.device, &create_info, None)?
        };

        let graphics_queue = unsafe { device.get_device_queue(graphics_family, 0) };
        let present_queue = unsafe { device.get_device_queue(present_family, 0) };
        debug!(
            "Queues retrieved: graphics family {}, present family {}",
            graphics_family, present_family
        );

        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: instance.handle().clone(),
            device: device.clone(),
            physical_device: physical_device_info.device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        });
        let allocator = match allocator {
            Ok(allocator) => allocator,
            Err(e) => {
                unsafe { device.destroy_device(None) };
                return Err(e.into());
            }
        };

        let limits = physical_device_info.limits();
        info!(
            "Logical device created on '{}' (max storage range {} bytes)",
            physical_device_info.device_name(),
            limits.max_storage_buffer_range
        );

        Ok(Arc::new(Self {
            device,
            physical_device: physical_device_info.device,
            allocator: ManuallyDrop::new(Mutex::new(allocator)),
            graphics_queue,
            present_queue,
            queue_families,
            limits,
            sampler_anisotropy,
        }))
    }

    #[inline]
    pub fn handle(&self) -> &ash::Device {
        &self.device
    }

    #[inline]
    pub fn physical_device(&self) -> vk::PhysicalDevice {
        self.physical_device
    }

    /// Queue used for draws and uploads. Graphics families always support transfer.
    #[inline]
    pub fn graphics_queue(&self) -> vk::Queue {
        self.graphics_queue
    }

    #[inline]
    pub fn present_queue(&self) -> vk::Queue {
        self.present_queue
    }

    #[inline]
    pub fn queue_families(&self) -> &QueueFamilyIndices {
        &self.queue_families
    }

    #[inline]
    pub fn graphics_family(&self) -> u32 {
        // Checked to be Some in `new`.
        self.queue_families.graphics_family.unwrap_or_default()
    }

    #[inline]
    pub fn limits(&self) -> &DeviceLimits {
        &self.limits
    }

    #[inline]
    pub fn supports_sampler_anisotropy(&self) -> bool {
        self.sampler_anisotropy
    }

    /// Locks the allocator, mapping a poisoned lock to an error.
    pub fn lock_allocator(&self) -> RhiResult<MutexGuard<'_, Allocator>> {
        self.allocator.lock().map_err(|_| RhiError::AllocatorPoisoned)
    }

    /// Blocks until every queue is idle.
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }

    /// Submits to the graphics queue, signaling `fence` on completion.
    ///
    /// # Safety
    ///
    /// Command buffers must be fully recorded, and `fence` must be unsignaled
    /// and not referenced by another pending submission.
    pub unsafe fn submit_graphics(
        &self,
        submit_infos: &[vk::SubmitInfo],
        fence: vk::Fence,
    ) -> RhiResult<()> {
        unsafe {
            self.device
                .queue_submit(self.graphics_queue, submit_infos, fence)?;
        }
        Ok(())
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            if let Err(e) = self.device.device_wait_idle() {
                error!("Failed to wait for device idle during drop: {:?}", e);
            }
            // The allocator frees its memory blocks through the device, so it
            // has to go first.
            ManuallyDrop::drop(&mut self.allocator);
            self.device.destroy_device(None);
        }
        info!("Logical device destroyed");
    }
}

// SAFETY: ash::Device is Send + Sync, the remaining handles are plain ids,
// and the allocator is only reachable through its Mutex.
unsafe impl Send for Device {}
unsafe impl Sync for Device {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_extensions_defined() {
        assert!(DEVICE_EXTENSIONS.contains(&ash::khr::swapchain::NAME));
    }

    #[test]
    fn test_device_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Device>();
    }
}
