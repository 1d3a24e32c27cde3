//! RHI-specific error types.

use thiserror::Error;

/// RHI-specific error type.
#[derive(Error, Debug)]
pub enum RhiError {
    /// Vulkan API error
    #[error("Vulkan error: {0}")]
    VulkanError(#[from] ash::vk::Result),

    /// Failed to load Vulkan
    #[error("Failed to load Vulkan: {0}")]
    LoadingError(#[from] ash::LoadingError),

    /// GPU allocator error
    #[error("Allocator error: {0}")]
    AllocatorError(#[from] gpu_allocator::AllocationError),

    /// Another thread panicked while holding the allocator lock.
    #[error("GPU allocator lock poisoned")]
    AllocatorPoisoned,

    #[error("No suitable GPU found")]
    NoSuitableGpu,

    #[error("Shader error: {0}")]
    ShaderError(String),

    #[error("Surface error: {0}")]
    SurfaceError(String),

    #[error("Swapchain error: {0}")]
    SwapchainError(String),

    #[error("Pipeline error: {0}")]
    PipelineError(String),

    /// A caller passed an out-of-range offset, size or count.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A host-side wait exceeded its timeout.
    #[error("Timed out after {0} ns")]
    Timeout(u64),
}

impl RhiError {
    /// Returns true if the error is a swapchain that no longer matches its surface.
    pub fn is_out_of_date(&self) -> bool {
        matches!(self, Self::VulkanError(ash::vk::Result::ERROR_OUT_OF_DATE_KHR))
    }
}

/// Result type alias for RHI operations.
pub type RhiResult<T> = std::result::Result<T, RhiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_out_of_date() {
        assert!(RhiError::from(ash::vk::Result::ERROR_OUT_OF_DATE_KHR).is_out_of_date());
        assert!(!RhiError::from(ash::vk::Result::ERROR_DEVICE_LOST).is_out_of_date());
        assert!(!RhiError::Timeout(10).is_out_of_date());
    }
}
