//! Shader modules.
//!
//! Modules are built from SPIR-V words that were already validated by the
//! loader (see `frameflow_assets::SpirvBlob`). Entry points are always `main`.

use std::ffi::CStr;
use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

const ENTRY_POINT: &CStr = c"main";

/// Pipeline stage a module is bound to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ShaderStage {
    Vertex,
    Fragment,
}

impl ShaderStage {
    pub fn to_vk_stage(self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
        }
    }
}

impl std::fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A `VkShaderModule` tagged with its stage.
pub struct Shader {
    device: Arc<Device>,
    module: vk::ShaderModule,
    stage: ShaderStage,
}

impl Shader {
    /// Creates a shader module from SPIR-V words.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `words` - SPIR-V code, already aligned to `u32`
    /// * `stage` - Pipeline stage the module is bound to
    ///
    /// # Errors
    ///
    /// Returns an error if module creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use frameflow_rhi::device::Device;
    /// use frameflow_rhi::shader::{Shader, ShaderStage};
    ///
    /// # fn example(device: Arc<Device>, spirv: Vec<u32>) -> frameflow_rhi::RhiResult<()> {
    /// let vert = Shader::from_words(device, &spirv, ShaderStage::Vertex)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn from_words(device: Arc<Device>, words: &[u32], stage: ShaderStage) -> RhiResult<Self> {
        if words.is_empty() {
            return Err(RhiError::ShaderError(format!(
                "empty SPIR-V for {} shader",
                stage
            )));
        }

        let create_info = vk::ShaderModuleCreateInfo::default().code(words);
        let module = unsafe {
            device
                .handle()
                .create_shader_module(&create_info, None)
                .map_err(|e| RhiError::ShaderError(format!("{} shader: {}", stage, e)))?
        };

        debug!("Created {} shader module ({} words)", stage, words.len());
        Ok(Self {
            device,
            module,
            stage,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.module
    }

    #[inline]
    pub fn stage(&self) -> ShaderStage {
        self.stage
    }

    pub fn stage_create_info(&self) -> vk::PipelineShaderStageCreateInfo<'static> {
        vk::PipelineShaderStageCreateInfo::default()
            .stage(self.stage.to_vk_stage())
            .module(self.module)
            .name(ENTRY_POINT)
    }
}

impl Drop for Shader {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_shader_module(self.module, None);
        }
        debug!("Destroyed {} shader module", self.stage);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shader_stage_to_vk_stage() {
        assert_eq!(ShaderStage::Vertex.to_vk_stage(), vk::ShaderStageFlags::VERTEX);
        assert_eq!(
            ShaderStage::Fragment.to_vk_stage(),
            vk::ShaderStageFlags::FRAGMENT
        );
    }

    #[test]
    fn test_shader_stage_display() {
        assert_eq!(ShaderStage::Vertex.to_string(), "vertex");
        assert_eq!(format!("{}", ShaderStage::Fragment), "fragment");
    }
}
