//! Synchronization primitives.
//!
//! - [`Semaphore`]: GPU-to-GPU ordering between queue operations
//!   (acquire -> render -> present).
//! - [`Fence`]: GPU-to-CPU completion signal. Frame slots and upload lanes
//!   wait on one before reusing their command buffer or staging range.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameflow_rhi::device::Device;
//! use frameflow_rhi::sync::Fence;
//!
//! # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
//! // Signaled so the first wait returns immediately.
//! let fence = Fence::new(device, true)?;
//! fence.wait(u64::MAX)?;
//! fence.reset()?;
//! // ... submit work that signals `fence.handle()` ...
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Vulkan semaphore wrapper, created unsignaled.
pub struct Semaphore {
    device: Arc<Device>,
    semaphore: vk::Semaphore,
}

impl Semaphore {
    /// Creates an unsignaled semaphore.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    ///
    /// # Errors
    ///
    /// Returns an error if semaphore creation fails.
    pub fn new(device: Arc<Device>) -> RhiResult<Self> {
        let create_info = vk::SemaphoreCreateInfo::default();
        let semaphore = unsafe { device.handle().create_semaphore(&create_info, None)? };
        Ok(Self { device, semaphore })
    }

    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_semaphore(self.semaphore, None);
        }
    }
}

/// Vulkan fence wrapper.
pub struct Fence {
    device: Arc<Device>,
    fence: vk::Fence,
}

impl Fence {
    /// Creates a fence, optionally already signaled.
    ///
    /// Per-slot fences start signaled so the first wait on a slot that was
    /// never submitted does not block.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `signaled` - Create the fence in the signaled state
    ///
    /// # Errors
    ///
    /// Returns an error if fence creation fails.
    pub fn new(device: Arc<Device>, signaled: bool) -> RhiResult<Self> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        let create_info = vk::FenceCreateInfo::default().flags(flags);
        let fence = unsafe { device.handle().create_fence(&create_info, None)? };

        debug!(
            "Created fence ({})",
            if signaled { "signaled" } else { "unsignaled" }
        );

        Ok(Self { device, fence })
    }

    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }

    /// Blocks until the fence is signaled.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] if `timeout` nanoseconds pass first.
    pub fn wait(&self, timeout: u64) -> RhiResult<()> {
        wait_for_fences(&self.device, &[self.fence], timeout)
    }

    /// Moves the fence to the unsignaled state. It must not be pending.
    pub fn reset(&self) -> RhiResult<()> {
        unsafe { self.device.handle().reset_fences(&[self.fence])? };
        Ok(())
    }
}

impl Drop for Fence {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_fence(self.fence, None);
        }
    }
}

/// Waits for all `fences`, mapping `VK_TIMEOUT` to [`RhiError::Timeout`].
pub fn wait_for_fences(device: &Device, fences: &[vk::Fence], timeout: u64) -> RhiResult<()> {
    if fences.is_empty() {
        return Ok(());
    }
    match unsafe { device.handle().wait_for_fences(fences, true, timeout) } {
        Ok(()) => Ok(()),
        Err(vk::Result::TIMEOUT) => Err(RhiError::Timeout(timeout)),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_semaphore_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Semaphore>();
    }

    #[test]
    fn test_fence_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Fence>();
    }
}
