//! Vulkan instance with optional validation layers.
//!
//! Surface extensions are platform specific, so the caller passes the list
//! reported by the windowing layer (see `frameflow_platform::Window::required_extensions`).

use std::ffi::{CStr, c_char};

use ash::{Entry, vk};
use tracing::{error, info, warn};

use crate::error::RhiResult;

const VALIDATION_LAYER_NAME: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Owns the loader entry, the instance and the debug messenger.
pub struct Instance {
    entry: Entry,
    instance: ash::Instance,
    debug_utils: Option<(ash::ext::debug_utils::Instance, vk::DebugUtilsMessengerEXT)>,
}

impl Instance {
    /// Loads Vulkan and creates a 1.3 instance.
    ///
    /// Validation is skipped with a warning when the layer is not installed.
    ///
    /// # Arguments
    ///
    /// * `enable_validation` - Request `VK_LAYER_KHRONOS_validation` and a
    ///   debug messenger that forwards to `tracing`
    /// * `surface_extensions` - Platform surface extensions, enabled in
    ///   addition to `VK_KHR_surface`
    ///
    /// # Errors
    ///
    /// Returns an error if the Vulkan loader cannot be found or instance
    /// creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use frameflow_rhi::instance::Instance;
    ///
    /// # fn example() -> frameflow_rhi::RhiResult<()> {
    /// let instance = Instance::new(cfg!(debug_assertions), &[])?;
    /// println!("validation: {}", instance.has_validation());
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(enable_validation: bool, surface_extensions: &[*const c_char]) -> RhiResult<Self> {
        let entry = unsafe { Entry::load()? };

        let validation = enable_validation && is_validation_layer_available(&entry)?;
        if enable_validation && !validation {
            warn!("Validation layer requested but not available, proceeding without it");
        }

        let app_info = vk::ApplicationInfo::default()
            .application_name(c"frameflow")
            .application_version(vk::make_api_version(0, 0, 1, 0))
            .engine_name(c"frameflow")
            .engine_version(vk::make_api_version(0, 0, 1, 0))
            .api_version(vk::API_VERSION_1_3);

        let extensions = instance_extensions(surface_extensions, validation);
        let layers = if validation {
            vec![VALIDATION_LAYER_NAME.as_ptr()]
        } else {
            Vec::new()
        };

        let create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None)? };
        info!(
            "Vulkan instance created (API 1.3, {} extension(s), validation {})",
            extensions.len(),
            if validation { "on" } else { "off" }
        );

        let debug_utils = if validation {
            let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
            match create_debug_messenger(&loader) {
                Ok(messenger) => Some((loader, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Self {
            entry,
            instance,
            debug_utils,
        })
    }

    #[inline]
    pub fn handle(&self) -> &ash::Instance {
        &self.instance
    }

    #[inline]
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    #[inline]
    pub fn has_validation(&self) -> bool {
        self.debug_utils.is_some()
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        unsafe {
            if let Some((loader, messenger)) = self.debug_utils.take() {
                loader.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
        info!("Vulkan instance destroyed");
    }
}

/// `VK_KHR_surface`, the caller's surface extensions (deduplicated) and,
/// with validation, `VK_EXT_debug_utils`.
fn instance_extensions(surface_extensions: &[*const c_char], validation: bool) -> Vec<*const c_char> {
    let mut extensions = vec![ash::khr::surface::NAME.as_ptr()];
    for &ext in surface_extensions {
        // SAFETY: callers pass static, null-terminated names from the loader.
        let name = unsafe { CStr::from_ptr(ext) };
        if name != ash::khr::surface::NAME {
            extensions.push(ext);
        }
    }
    if validation {
        extensions.push(ash::ext::debug_utils::NAME.as_ptr());
    }
    extensions
}

fn is_validation_layer_available(entry: &Entry) -> RhiResult<bool> {
    let layers = unsafe { entry.enumerate_instance_layer_properties()? };
    Ok(layers
        .iter()
        .any(|layer| layer.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER_NAME)))
}

fn create_debug_messenger(
    loader: &ash::ext::debug_utils::Instance,
) -> RhiResult<vk::DebugUtilsMessengerEXT> {
    let create_info = vk::DebugUtilsMessengerCreateInfoEXT::default()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback));

    Ok(unsafe { loader.create_debug_utils_messenger(&create_info, None)? })
}

/// Forwards validation messages to tracing.
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() {
        return vk::FALSE;
    }

    let callback_data = unsafe { &*p_callback_data };
    let message = if callback_data.p_message.is_null() {
        std::borrow::Cow::Borrowed("(no message)")
    } else {
        unsafe { CStr::from_ptr(callback_data.p_message).to_string_lossy() }
    };

    let kind = match message_type {
        vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION => "validation",
        vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE => "performance",
        _ => "general",
    };

    if message_severity.contains(vk::DebugUtilsMessageSeverityFlagsEXT::ERROR) {
        error!(target: "frameflow::vulkan", "[{}] {}", kind, message);
    } else {
        warn!(target: "frameflow::vulkan", "[{}] {}", kind, message);
    }

    vk::FALSE
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(extensions: &[*const c_char]) -> Vec<&'static CStr> {
        extensions
            .iter()
            .map(|&ext| unsafe { CStr::from_ptr(ext) })
            .collect()
    }

    #[test]
    fn test_instance_extensions_always_include_surface() {
        let extensions = instance_extensions(&[], false);
        assert_eq!(names(&extensions), vec![ash::khr::surface::NAME]);
    }

    #[test]
    fn test_instance_extensions_dedup_and_debug_utils() {
        let platform = [
            ash::khr::surface::NAME.as_ptr(),
            ash::khr::xlib_surface::NAME.as_ptr(),
        ];
        let extensions = names(&instance_extensions(&platform, true));

        assert_eq!(extensions.len(), 3);
        assert!(extensions.contains(&ash::khr::xlib_surface::NAME));
        assert!(extensions.contains(&ash::ext::debug_utils::NAME));
    }
}
