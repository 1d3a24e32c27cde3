//! GPU buffers backed by gpu-allocator.
//!
//! Device-local buffers ([`BufferUsage::Vertex`], [`BufferUsage::Index`],
//! [`BufferUsage::Storage`]) are only ever filled by copy commands from a
//! staging buffer. Host-visible buffers ([`BufferUsage::Uniform`],
//! [`BufferUsage::Staging`]) stay persistently mapped for their whole life.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use frameflow_rhi::device::Device;
//! use frameflow_rhi::buffer::{Buffer, BufferUsage};
//!
//! # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
//! let mut staging = Buffer::new(device, BufferUsage::Staging, 64 * 1024)?;
//! staging.write_data(0, &[1u8, 2, 3, 4])?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type. Selects Vulkan usage flags and memory location.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    Vertex,
    Index,
    /// Small per-frame data written directly by the host.
    Uniform,
    /// Device-local storage (instance transforms, material table).
    Storage,
    /// Host-visible source of copy commands.
    Staging,
}

impl BufferUsage {
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Vertex => {
                vk::BufferUsageFlags::VERTEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Index => {
                vk::BufferUsageFlags::INDEX_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Uniform => vk::BufferUsageFlags::UNIFORM_BUFFER,
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    pub fn memory_location(self) -> MemoryLocation {
        match self {
            BufferUsage::Vertex | BufferUsage::Index | BufferUsage::Storage => {
                MemoryLocation::GpuOnly
            }
            BufferUsage::Uniform | BufferUsage::Staging => MemoryLocation::CpuToGpu,
        }
    }

    /// Whether buffers of this usage are persistently mapped.
    pub fn is_host_visible(self) -> bool {
        self.memory_location() == MemoryLocation::CpuToGpu
    }

    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Vertex => "vertex",
            BufferUsage::Index => "index",
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Checks that `[offset, offset + len)` lies inside a buffer of `size` bytes.
pub fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(RhiError::InvalidArgument(format!(
            "range {}..+{} exceeds buffer of {} bytes",
            offset, len, size
        ))),
    }
}

/// A `VkBuffer` and its gpu-allocator allocation.
pub struct Buffer {
    device: Arc<Device>,
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
    size: vk::DeviceSize,
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `size` bytes.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - Decides the Vulkan usage flags and the memory location
    /// * `size` - Size in bytes, must be non-zero
    ///
    /// # Errors
    ///
    /// [`RhiError::InvalidArgument`] on a zero size. Otherwise any failure
    /// from Vulkan or the allocator.
    pub fn new(device: Arc<Device>, usage: BufferUsage, size: vk::DeviceSize) -> RhiResult<Self> {
        Self::with_name(device, usage, size, usage.name())
    }

    /// Like [`Buffer::new`], with an allocation name for allocator reports.
    ///
    /// # Errors
    ///
    /// Same as [`Buffer::new`].
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use frameflow_rhi::buffer::{Buffer, BufferUsage};
    /// use frameflow_rhi::device::Device;
    ///
    /// # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
    /// let instances = Buffer::with_name(device, BufferUsage::Storage, 64 * 1024, "instances")?;
    /// assert_eq!(instances.size(), 64 * 1024);
    /// # Ok(())
    /// # }
    /// ```
    pub fn with_name(
        device: Arc<Device>,
        usage: BufferUsage,
        size: vk::DeviceSize,
        name: &str,
    ) -> RhiResult<Self> {
        if size == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer size must be greater than 0",
                name
            )));
        }

        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { device.handle().create_buffer(&buffer_info, None)? };
        let requirements = unsafe { device.handle().get_buffer_memory_requirements(buffer) };

        let allocation = device.lock_allocator().and_then(|mut allocator| {
            allocator
                .allocate(&AllocationCreateDesc {
                    name,
                    requirements,
                    location: usage.memory_location(),
                    linear: true,
                    allocation_scheme: AllocationScheme::GpuAllocatorManaged,
                })
                .map_err(RhiError::from)
        });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.handle().destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let mut this = Self {
            device,
            buffer,
            allocation: Some(allocation),
            size,
            usage,
        };

        if let Some(allocation) = &this.allocation {
            unsafe {
                this.device.handle().bind_buffer_memory(
                    buffer,
                    allocation.memory(),
                    allocation.offset(),
                )?;
            }
        }

        if usage.is_host_visible() && this.mapped_bytes().is_none() {
            // `this` is dropped here, which frees the allocation.
            return Err(RhiError::InvalidArgument(format!(
                "{} buffer memory could not be mapped",
                name
            )));
        }

        debug!("Created {} buffer '{}': {} bytes", usage.name(), name, size);
        Ok(this)
    }

    /// Copies `data` into the mapped memory at `offset`.
    pub fn write_data(&mut self, offset: vk::DeviceSize, data: &[u8]) -> RhiResult<()> {
        if data.is_empty() {
            return Ok(());
        }
        let dst = self.mapped_slice_mut(offset, data.len() as vk::DeviceSize)?;
        dst.copy_from_slice(data);
        Ok(())
    }

    /// Mutable view of `len` mapped bytes starting at `offset`.
    pub fn mapped_slice_mut(
        &mut self,
        offset: vk::DeviceSize,
        len: vk::DeviceSize,
    ) -> RhiResult<&mut [u8]> {
        check_range(offset, len, self.size)?;
        let usage = self.usage;
        let bytes = self.mapped_bytes_mut().ok_or_else(|| {
            RhiError::InvalidArgument(format!("{} buffer is not host visible", usage.name()))
        })?;
        Ok(&mut bytes[offset as usize..(offset + len) as usize])
    }

    fn mapped_bytes(&self) -> Option<&[u8]> {
        let allocation = self.allocation.as_ref()?;
        let ptr = allocation.mapped_ptr()?;
        // SAFETY: the mapping covers the whole allocation, which is at least
        // `size` bytes, and lives as long as the allocation.
        Some(unsafe { std::slice::from_raw_parts(ptr.as_ptr() as *const u8, self.size as usize) })
    }

    fn mapped_bytes_mut(&mut self) -> Option<&mut [u8]> {
        let allocation = self.allocation.as_ref()?;
        let ptr = allocation.mapped_ptr()?;
        // SAFETY: as above; `&mut self` guarantees exclusive host access.
        Some(unsafe { std::slice::from_raw_parts_mut(ptr.as_ptr() as *mut u8, self.size as usize) })
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            match self.device.lock_allocator() {
                Ok(mut allocator) => {
                    if let Err(e) = allocator.free(allocation) {
                        error!("Failed to free buffer allocation: {:?}", e);
                    }
                }
                Err(e) => error!("Leaking buffer allocation: {}", e),
            }
        }

        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_local_usages_accept_copies() {
        for usage in [BufferUsage::Vertex, BufferUsage::Index, BufferUsage::Storage] {
            assert!(usage.to_vk_usage().contains(vk::BufferUsageFlags::TRANSFER_DST));
            assert_eq!(usage.memory_location(), MemoryLocation::GpuOnly);
            assert!(!usage.is_host_visible());
        }
    }

    #[test]
    fn test_host_visible_usages() {
        assert!(BufferUsage::Staging.is_host_visible());
        assert!(BufferUsage::Uniform.is_host_visible());
        assert!(
            BufferUsage::Staging
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::TRANSFER_SRC)
        );
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
    }

    #[test]
    fn test_check_range() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(8, 8, 16).is_ok());
        assert!(check_range(8, 9, 16).is_err());
        assert!(check_range(u64::MAX, 2, 16).is_err());
    }
}
