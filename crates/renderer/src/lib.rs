//! Frame pipelining and GPU upload core.
//!
//! This crate drives frames against a window surface:
//! - [`FrameScheduler`]: N frame slots against M presentable images
//! - [`StagingUploader`]: fenced per-frame staging lanes for uploads
//! - [`ResourceStore`]: append-only meshes, textures and materials
//! - [`SceneData`]: camera uniforms and per-frame instance slices
//! - [`Renderer`]: owns all of the above and runs the frame sequence

pub mod arena;
pub mod batch;
pub mod depth_buffer;
mod error;
pub mod frame_scheduler;
pub mod material;
pub mod renderer;
pub mod resources;
pub mod scene_data;
pub mod staging;
pub mod surface;
pub mod ubo;

pub use batch::{DrawBatch, DrawItem, build_batches};
pub use depth_buffer::{DepthBuffer, DepthTarget};
pub use error::{RenderError, RenderResult};
pub use frame_scheduler::{FrameScheduler, FrameStatus, ImageSlotTable};
pub use material::{DEFAULT_MATERIAL, MaterialId, MaterialParams, MaterialRecord};
pub use renderer::{FrameStats, Renderer, ShaderSet};
pub use resources::{DEFAULT_TEXTURE, MeshHandle, MeshLayout, ResourceStore, TextureHandle};
pub use scene_data::{
    InstanceCursor, InstanceLayout, InstancePlacement, InstanceRange, SceneData, place_instances,
};
pub use staging::{
    LaneBegin, LaneClose, LaneState, STAGING_REGION_ALIGNMENT, StagingRing, StagingUploader,
};
pub use surface::SurfaceTracker;
pub use ubo::{CameraUbo, DrawPushConstants};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gpu_owners_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameScheduler>();
        assert_send::<StagingUploader>();
        assert_send::<ResourceStore>();
        assert_send::<SceneData>();
        assert_send::<Renderer>();
    }

    #[test]
    fn test_value_types_are_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<DrawItem>();
        assert_send_sync::<MeshHandle>();
        assert_send_sync::<MaterialId>();
        assert_send_sync::<FrameStats>();
        assert_send_sync::<SurfaceTracker>();
    }
}
