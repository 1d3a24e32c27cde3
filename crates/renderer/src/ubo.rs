//! Shader-visible data layouts.
//!
//! These must match the GLSL blocks in `shaders/` exactly. All structures are
//! `#[repr(C)]` and `Pod` so they can be copied byte for byte.

use bytemuck::{Pod, Zeroable};
use glam::Mat4;

/// Camera uniform (set 0, binding 0).
///
/// - Offset 0: view matrix
/// - Offset 64: projection matrix
/// - Offset 128: projection * view
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Pod, Zeroable)]
pub struct CameraUbo {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
}

impl CameraUbo {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
        }
    }
}

impl Default for CameraUbo {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}

/// One instance transform in the instance storage buffer (set 0, binding 1).
pub type InstanceData = Mat4;

/// Size of one [`InstanceData`] entry in bytes.
pub const INSTANCE_SIZE: u64 = std::mem::size_of::<InstanceData>() as u64;

/// Push constant block shared by the vertex and fragment stages.
///
/// Padded to 16 bytes; only `material_id` is read.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct DrawPushConstants {
    pub material_id: u32,
    pub _padding: [u32; 3],
}

impl DrawPushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;

    pub fn new(material_id: u32) -> Self {
        Self {
            material_id,
            _padding: [0; 3],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;

    #[test]
    fn test_camera_ubo_size() {
        assert_eq!(CameraUbo::SIZE, 192);
        assert_eq!(std::mem::align_of::<CameraUbo>(), 16);
    }

    #[test]
    fn test_camera_ubo_new() {
        let view = Mat4::look_at_rh(Vec3::new(0.0, 0.0, 5.0), Vec3::ZERO, Vec3::Y);
        let projection = Mat4::perspective_rh(45.0_f32.to_radians(), 16.0 / 9.0, 0.1, 100.0);
        let ubo = CameraUbo::new(view, projection);
        assert_eq!(ubo.view_projection, projection * view);
    }

    #[test]
    fn test_instance_size() {
        assert_eq!(INSTANCE_SIZE, 64);
    }

    #[test]
    fn test_push_constants_layout() {
        assert_eq!(DrawPushConstants::SIZE, 16);
        let push = DrawPushConstants::new(7);
        assert_eq!(&bytemuck::bytes_of(&push)[0..4], &7u32.to_ne_bytes());
    }
}
