//! Texture samplers.

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Upper bound on requested anisotropy; the device limit may lower it.
const MAX_ANISOTROPY: f32 = 16.0;

/// Linear-filtered, repeating sampler shared by every material.
pub struct Sampler {
    device: Arc<Device>,
    sampler: vk::Sampler,
}

impl Sampler {
    /// Creates a linear repeat sampler, anisotropic when the device allows.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    ///
    /// # Errors
    ///
    /// Returns an error if sampler creation fails.
    pub fn linear_repeat(device: Arc<Device>) -> RhiResult<Self> {
        let anisotropy = effective_anisotropy(
            device.supports_sampler_anisotropy(),
            device.limits().max_sampler_anisotropy,
        );

        let create_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(anisotropy.is_some())
            .max_anisotropy(anisotropy.unwrap_or(1.0))
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .compare_enable(false)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE);

        let sampler = unsafe { device.handle().create_sampler(&create_info, None)? };
        debug!("Created linear sampler (anisotropy {:?})", anisotropy);

        Ok(Self { device, sampler })
    }

    #[inline]
    pub fn handle(&self) -> vk::Sampler {
        self.sampler
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_sampler(self.sampler, None);
        }
    }
}

fn effective_anisotropy(supported: bool, device_max: f32) -> Option<f32> {
    (supported && device_max > 1.0).then(|| device_max.min(MAX_ANISOTROPY))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_anisotropy() {
        assert_eq!(effective_anisotropy(false, 16.0), None);
        assert_eq!(effective_anisotropy(true, 1.0), None);
        assert_eq!(effective_anisotropy(true, 8.0), Some(8.0));
        assert_eq!(effective_anisotropy(true, 64.0), Some(16.0));
    }
}
