//! Physical device (GPU) selection.
//!
//! A device is eligible when it exposes a graphics queue family, can present
//! to the target surface, and supports Vulkan 1.3. Among eligible devices the
//! one with the highest [`score_device`] wins.

use std::ffi::CStr;

use ash::vk;
use tracing::{debug, info, warn};

use crate::error::{RhiError, RhiResult};

/// Queue family indices used by the renderer.
///
/// Uploads and draws share the graphics family, so only graphics and present
/// are tracked.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics_family: Option<u32>,
    pub present_family: Option<u32>,
}

impl QueueFamilyIndices {
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.graphics_family.is_some() && self.present_family.is_some()
    }

    /// Distinct family indices, graphics first.
    pub fn unique_families(&self) -> Vec<u32> {
        let mut families = Vec::with_capacity(2);
        if let Some(graphics) = self.graphics_family {
            families.push(graphics);
        }
        if let Some(present) = self.present_family
            && !families.contains(&present)
        {
            families.push(present);
        }
        families
    }
}

/// Device limits the frame and upload paths size themselves against.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DeviceLimits {
    /// Largest range a single storage buffer descriptor may cover.
    pub max_storage_buffer_range: u64,
    /// Required alignment of dynamic and per-frame storage buffer offsets.
    pub min_storage_buffer_offset_alignment: u64,
    pub min_uniform_buffer_offset_alignment: u64,
    /// Preferred alignment of buffer offsets used in copy commands.
    pub optimal_buffer_copy_offset_alignment: u64,
    pub max_push_constants_size: u32,
    pub max_sampler_anisotropy: f32,
}

impl DeviceLimits {
    pub fn from_properties(properties: &vk::PhysicalDeviceProperties) -> Self {
        let limits = &properties.limits;
        Self {
            max_storage_buffer_range: u64::from(limits.max_storage_buffer_range),
            min_storage_buffer_offset_alignment: limits.min_storage_buffer_offset_alignment.max(1),
            min_uniform_buffer_offset_alignment: limits.min_uniform_buffer_offset_alignment.max(1),
            optimal_buffer_copy_offset_alignment: limits
                .optimal_buffer_copy_offset_alignment
                .max(1),
            max_push_constants_size: limits.max_push_constants_size,
            max_sampler_anisotropy: limits.max_sampler_anisotropy,
        }
    }
}

/// Information about the selected GPU.
#[derive(Clone)]
pub struct PhysicalDeviceInfo {
    pub device: vk::PhysicalDevice,
    pub properties: vk::PhysicalDeviceProperties,
    pub features: vk::PhysicalDeviceFeatures,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
}

impl PhysicalDeviceInfo {
    pub fn device_name(&self) -> &str {
        // SAFETY: device_name is a null-terminated array filled by the driver.
        unsafe {
            CStr::from_ptr(self.properties.device_name.as_ptr())
                .to_str()
                .unwrap_or("Unknown Device")
        }
    }

    pub fn device_type_name(&self) -> &'static str {
        match self.properties.device_type {
            vk::PhysicalDeviceType::DISCRETE_GPU => "Discrete GPU",
            vk::PhysicalDeviceType::INTEGRATED_GPU => "Integrated GPU",
            vk::PhysicalDeviceType::VIRTUAL_GPU => "Virtual GPU",
            vk::PhysicalDeviceType::CPU => "CPU",
            _ => "Other",
        }
    }

    pub fn limits(&self) -> DeviceLimits {
        DeviceLimits::from_properties(&self.properties)
    }

    /// Total size of all device-local heaps, in bytes.
    pub fn device_local_memory(&self) -> u64 {
        self.memory_properties
            .memory_heaps
            .iter()
            .take(self.memory_properties.memory_heap_count as usize)
            .filter(|heap| heap.flags.contains(vk::MemoryHeapFlags::DEVICE_LOCAL))
            .map(|heap| heap.size)
            .sum()
    }
}

impl std::fmt::Debug for PhysicalDeviceInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let version = self.properties.api_version;
        f.debug_struct("PhysicalDeviceInfo")
            .field("name", &self.device_name())
            .field("type", &self.device_type_name())
            .field(
                "api_version",
                &format!(
                    "{}.{}.{}",
                    vk::api_version_major(version),
                    vk::api_version_minor(version),
                    vk::api_version_patch(version)
                ),
            )
            .field("queue_families", &self.queue_families)
            .finish()
    }
}

/// Picks the highest-scoring eligible GPU for `surface`.
///
/// Eligible GPUs support Vulkan 1.3 and have a graphics family and a
/// family that can present to `surface`. Discrete GPUs score highest.
///
/// # Arguments
///
/// * `instance` - The raw instance, see [`Instance::handle`](crate::instance::Instance::handle)
/// * `surface` - Surface the device must present to
/// * `surface_loader` - `VK_KHR_surface` function table
///
/// # Errors
///
/// [`RhiError::NoSuitableGpu`] if no GPU qualifies, or any enumeration
/// failure.
///
/// See the [`device`](crate::device) module docs for an example.
pub fn select_physical_device(
    instance: &ash::Instance,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> RhiResult<PhysicalDeviceInfo> {
    let devices = unsafe { instance.enumerate_physical_devices()? };
    info!("Found {} GPU(s)", devices.len());

    let best = devices
        .into_iter()
        .filter_map(|device| check_device_suitability(instance, device, surface, surface_loader))
        .map(|info| {
            let score = score_device(
                info.properties.device_type,
                info.device_local_memory(),
                info.properties.limits.max_image_dimension2_d,
            );
            debug!("GPU '{}' scored {}", info.device_name(), score);
            (info, score)
        })
        .max_by_key(|(_, score)| *score);

    match best {
        Some((info, score)) => {
            info!(
                "Selected GPU: '{}' ({}), score {}",
                info.device_name(),
                info.device_type_name(),
                score
            );
            Ok(info)
        }
        None => {
            warn!("No GPU satisfies graphics + present + Vulkan 1.3");
            Err(RhiError::NoSuitableGpu)
        }
    }
}

fn check_device_suitability(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> Option<PhysicalDeviceInfo> {
    let properties = unsafe { instance.get_physical_device_properties(device) };
    let features = unsafe { instance.get_physical_device_features(device) };
    let memory_properties = unsafe { instance.get_physical_device_memory_properties(device) };
    let queue_families = find_queue_families(instance, device, surface, surface_loader);

    let info = PhysicalDeviceInfo {
        device,
        properties,
        features,
        memory_properties,
        queue_families,
    };

    if !queue_families.is_complete() {
        debug!("GPU '{}' skipped: no graphics/present family", info.device_name());
        return None;
    }
    if !supports_api_1_3(properties.api_version) {
        debug!("GPU '{}' skipped: Vulkan 1.3 not supported", info.device_name());
        return None;
    }

    Some(info)
}

fn find_queue_families(
    instance: &ash::Instance,
    device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
    surface_loader: &ash::khr::surface::Instance,
) -> QueueFamilyIndices {
    let families = unsafe { instance.get_physical_device_queue_family_properties(device) };
    let mut indices = QueueFamilyIndices::default();

    for (i, family) in families.iter().enumerate() {
        let i = i as u32;
        if family.queue_count == 0 {
            continue;
        }

        let graphics = family.queue_flags.contains(vk::QueueFlags::GRAPHICS);
        let present = unsafe {
            surface_loader
                .get_physical_device_surface_support(device, i, surface)
                .unwrap_or(false)
        };

        // A family that does both avoids a queue ownership split.
        if graphics && present {
            indices.graphics_family = Some(i);
            indices.present_family = Some(i);
            break;
        }
        if graphics && indices.graphics_family.is_none() {
            indices.graphics_family = Some(i);
        }
        if present && indices.present_family.is_none() {
            indices.present_family = Some(i);
        }
    }

    indices
}

fn supports_api_1_3(api_version: u32) -> bool {
    let major = vk::api_version_major(api_version);
    let minor = vk::api_version_minor(api_version);
    major > 1 || (major == 1 && minor >= 3)
}

/// Ranks a device: discrete beats integrated beats everything else, then
/// VRAM (capped at 16 GiB) and max 2D image size break ties.
pub fn score_device(
    device_type: vk::PhysicalDeviceType,
    device_local_bytes: u64,
    max_image_dimension_2d: u32,
) -> u64 {
    let type_score = match device_type {
        vk::PhysicalDeviceType::DISCRETE_GPU => 100_000,
        vk::PhysicalDeviceType::INTEGRATED_GPU => 10_000,
        vk::PhysicalDeviceType::VIRTUAL_GPU => 1_000,
        vk::PhysicalDeviceType::CPU => 100,
        _ => 1,
    };
    let vram_mib = (device_local_bytes / (1024 * 1024)).min(16 * 1024);

    type_score + vram_mib + u64::from(max_image_dimension_2d / 1024)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_family_indices_complete() {
        assert!(!QueueFamilyIndices::default().is_complete());

        let graphics_only = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: None,
        };
        assert!(!graphics_only.is_complete());

        let both = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert!(both.is_complete());
    }

    #[test]
    fn test_unique_families() {
        let shared = QueueFamilyIndices {
            graphics_family: Some(2),
            present_family: Some(2),
        };
        assert_eq!(shared.unique_families(), vec![2]);

        let split = QueueFamilyIndices {
            graphics_family: Some(0),
            present_family: Some(1),
        };
        assert_eq!(split.unique_families(), vec![0, 1]);
    }

    #[test]
    fn test_supports_api_1_3() {
        assert!(supports_api_1_3(vk::API_VERSION_1_3));
        assert!(!supports_api_1_3(vk::API_VERSION_1_2));
        assert!(supports_api_1_3(vk::make_api_version(0, 1, 4, 0)));
    }

    #[test]
    fn test_discrete_outranks_integrated_with_more_memory() {
        let discrete = score_device(vk::PhysicalDeviceType::DISCRETE_GPU, 2 << 30, 16384);
        let integrated = score_device(vk::PhysicalDeviceType::INTEGRATED_GPU, 32 << 30, 16384);
        assert!(discrete > integrated);
    }

    #[test]
    fn test_limits_clamp_zero_alignments() {
        let mut properties = vk::PhysicalDeviceProperties::default();
        properties.limits.max_storage_buffer_range = 1 << 27;
        properties.limits.min_storage_buffer_offset_alignment = 0;
        properties.limits.optimal_buffer_copy_offset_alignment = 0;

        let limits = DeviceLimits::from_properties(&properties);
        assert_eq!(limits.max_storage_buffer_range, 1 << 27);
        assert_eq!(limits.min_storage_buffer_offset_alignment, 1);
        assert_eq!(limits.optimal_buffer_copy_offset_alignment, 1);
    }
}
