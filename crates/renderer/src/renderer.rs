//! Renderer orchestration.
//!
//! [`Renderer`] owns the device and every subsystem built on it, and runs
//! the per-frame sequence:
//!
//! ```text
//! begin_frame -> open upload lanes -> camera -> record batches
//!     -> flush lanes -> submit -> present -> recreate if needed
//! ```

use std::mem::ManuallyDrop;
use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use frameflow_assets::{ImageData, MeshData, SpirvBlob};
use frameflow_core::{RendererConfig, ShaderPaths};
use frameflow_platform::{Surface, Window};
use frameflow_rhi::RhiError;
use frameflow_rhi::command::{flipped_viewport, full_scissor};
use frameflow_rhi::device::Device;
use frameflow_rhi::instance::Instance;
use frameflow_rhi::physical_device::select_physical_device;
use frameflow_rhi::pipeline::{CullMode, GraphicsPipelineBuilder, Pipeline, PipelineLayout};
use frameflow_rhi::shader::{Shader, ShaderStage};
use frameflow_rhi::swapchain::Swapchain;
use frameflow_rhi::vertex::Vertex;

use crate::batch::{DrawItem, build_batches};
use crate::depth_buffer::{DEFAULT_DEPTH_FORMAT, DepthBuffer, DepthTarget};
use crate::error::RenderResult;
use crate::frame_scheduler::{FrameScheduler, FrameStatus};
use crate::material::{MaterialId, MaterialParams};
use crate::resources::{MeshHandle, ResourceStore, TextureHandle};
use crate::scene_data::SceneData;
use crate::staging::StagingUploader;
use crate::surface::SurfaceTracker;
use crate::ubo::{CameraUbo, DrawPushConstants};

const CLEAR_COLOR: [f32; 4] = [0.1, 0.1, 0.15, 1.0];

/// Compiled vertex and fragment shaders for the instanced pipeline.
#[derive(Clone, Debug)]
pub struct ShaderSet {
    pub vertex: SpirvBlob,
    pub fragment: SpirvBlob,
}

impl ShaderSet {
    pub fn load(paths: &ShaderPaths) -> RenderResult<Self> {
        Ok(Self {
            vertex: SpirvBlob::load(&paths.vertex)?,
            fragment: SpirvBlob::load(&paths.fragment)?,
        })
    }
}

/// Counters of the last drawn frame, plus running totals.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Frames submitted since construction.
    pub frames: u64,
    pub draw_calls: u32,
    pub instances: u32,
    /// Instances dropped because the instance slice or the transient lane
    /// was full.
    pub dropped_instances: u32,
    /// Instances skipped because their mesh handle was unknown.
    pub skipped_draws: u32,
    pub static_bytes: u64,
    pub transient_bytes: u64,
    /// Frames skipped while the window was minimized.
    pub suspended_frames: u64,
    pub surface_recreations: u64,
}

impl FrameStats {
    fn reset_frame(&mut self) {
        self.draw_calls = 0;
        self.instances = 0;
        self.dropped_instances = 0;
        self.skipped_draws = 0;
        self.static_bytes = 0;
        self.transient_bytes = 0;
    }
}

struct ShaderModules {
    vertex: Shader,
    fragment: Shader,
}

/// Combines acquire and present results, keeping the one that asks for
/// more work.
fn worst_status(a: FrameStatus, b: FrameStatus) -> FrameStatus {
    fn rank(status: FrameStatus) -> u8 {
        match status {
            FrameStatus::Ok => 0,
            FrameStatus::Suboptimal => 1,
            FrameStatus::OutOfDate => 2,
            FrameStatus::Error => 3,
        }
    }
    if rank(b) > rank(a) { b } else { a }
}

/// Owns the Vulkan device and runs frames against one window surface.
///
/// # Resource Destruction Order
///
/// 1. Wait for frame slots and upload lanes, then for the device
/// 2. Pipeline, pipeline layout, shader modules
/// 3. Scene data, resource store, upload lanes, frame scheduler
/// 4. Depth buffer, swapchain, surface
/// 5. Device, then instance (plain fields, dropped in declaration order)
pub struct Renderer {
    config: RendererConfig,
    tracker: SurfaceTracker,
    camera: CameraUbo,
    stats: FrameStats,

    pipeline: ManuallyDrop<Pipeline>,
    pipeline_layout: ManuallyDrop<PipelineLayout>,
    shaders: ManuallyDrop<ShaderModules>,
    scene: ManuallyDrop<SceneData>,
    resources: ManuallyDrop<ResourceStore>,
    transient_lane: ManuallyDrop<StagingUploader>,
    static_lane: ManuallyDrop<StagingUploader>,
    scheduler: ManuallyDrop<FrameScheduler>,
    depth: ManuallyDrop<DepthBuffer>,
    swapchain: ManuallyDrop<Swapchain>,
    surface: ManuallyDrop<Surface>,

    device: Arc<Device>,
    // Declared after the device so it is destroyed last.
    _instance: Instance,
}

impl Renderer {
    /// Builds the device and all subsystems for `window`.
    ///
    /// The default texture and material are recorded on the static lane and
    /// uploaded with the first frame.
    ///
    /// # Errors
    ///
    /// Invalid configuration, or any failure creating Vulkan objects. What
    /// was built so far is destroyed in reverse order.
    pub fn new(window: &Window, config: RendererConfig, shaders: &ShaderSet) -> RenderResult<Self> {
        config.validate()?;
        let (width, height) = (window.width(), window.height());
        info!("Initializing renderer ({}x{})", width, height);

        let instance = Instance::new(config.enable_validation, &window.required_extensions()?)?;
        debug!("Validation layers enabled: {}", instance.has_validation());
        let surface = window.create_surface(instance.entry(), instance.handle())?;
        let physical_device_info =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device_info)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            width,
            height,
            config.vsync,
        )?;
        let depth = DepthBuffer::new(device.clone(), DepthTarget::for_swapchain(swapchain.extent()))?;

        let frames = config.frames_in_flight as usize;
        let scheduler = FrameScheduler::new(device.clone(), frames, swapchain.image_count())?;
        let mut static_lane = StagingUploader::new(
            device.clone(),
            "static",
            frames,
            config.static_staging_bytes,
        )?;
        let transient_lane = StagingUploader::new(
            device.clone(),
            "transient",
            frames,
            config.transient_staging_bytes,
        )?;
        static_lane.begin_frame(scheduler.current_frame_index())?;

        let resources = ResourceStore::new(device.clone(), &mut static_lane, config.max_materials)?;
        let scene = SceneData::new(
            device.clone(),
            frames,
            config.max_instances_per_frame,
            resources.material_table(),
        )?;

        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT)
            .offset(0)
            .size(DrawPushConstants::SIZE)];
        let pipeline_layout = PipelineLayout::new(
            device.clone(),
            &[scene.set_layout(), resources.material_set_layout()],
            &push_ranges,
        )?;
        let modules = ShaderModules {
            vertex: Shader::from_words(device.clone(), shaders.vertex.words(), ShaderStage::Vertex)?,
            fragment: Shader::from_words(
                device.clone(),
                shaders.fragment.words(),
                ShaderStage::Fragment,
            )?,
        };
        let pipeline = Self::create_pipeline(&device, &pipeline_layout, &modules, swapchain.format())?;

        let tracker = SurfaceTracker::new(swapchain.extent(), config.recreate_on_suboptimal);

        info!(
            "Renderer initialized: {} swapchain images, {} frames in flight, {} instances per frame",
            swapchain.image_count(),
            frames,
            scene.instance_layout().capacity
        );

        Ok(Self {
            config,
            tracker,
            camera: CameraUbo::default(),
            stats: FrameStats::default(),
            pipeline: ManuallyDrop::new(pipeline),
            pipeline_layout: ManuallyDrop::new(pipeline_layout),
            shaders: ManuallyDrop::new(modules),
            scene: ManuallyDrop::new(scene),
            resources: ManuallyDrop::new(resources),
            transient_lane: ManuallyDrop::new(transient_lane),
            static_lane: ManuallyDrop::new(static_lane),
            scheduler: ManuallyDrop::new(scheduler),
            depth: ManuallyDrop::new(depth),
            swapchain: ManuallyDrop::new(swapchain),
            surface: ManuallyDrop::new(surface),
            device,
            _instance: instance,
        })
    }

    fn create_pipeline(
        device: &Arc<Device>,
        layout: &PipelineLayout,
        shaders: &ShaderModules,
        color_format: vk::Format,
    ) -> RenderResult<Pipeline> {
        let pipeline = GraphicsPipelineBuilder::new()
            .vertex_shader(&shaders.vertex)
            .fragment_shader(&shaders.fragment)
            .vertex_input(Vertex::binding_description(), &Vertex::attribute_descriptions())
            .color_attachment_format(color_format)
            .depth_attachment_format(DEFAULT_DEPTH_FORMAT)
            .cull_mode(CullMode::Back)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .depth_test(true, true)
            .build(device.clone(), layout)?;
        Ok(pipeline)
    }

    // =========================================================================
    // Frame
    // =========================================================================

    /// Draws `items` and presents.
    ///
    /// Returns `OutOfDate` when the frame was abandoned for a surface
    /// rebuild, `Suboptimal` when it was presented to a mismatched surface,
    /// and `Ok` otherwise, including while drawing is suspended.
    ///
    /// # Errors
    ///
    /// Vulkan failures other than an out-of-date surface, and acquisition
    /// timeouts.
    pub fn draw_frame(&mut self, items: &[DrawItem]) -> RenderResult<FrameStatus> {
        if self.tracker.is_suspended() {
            self.stats.suspended_frames += 1;
            return Ok(FrameStatus::Ok);
        }
        if self.tracker.has_pending_resize() {
            debug!("Resize pending, recreating before acquire");
            self.recreate_surface()?;
        }

        let timeout = self.config.acquire_timeout_ns();
        let (image_index, acquire_status) = self.scheduler.begin_frame(&self.swapchain, timeout)?;
        if acquire_status == FrameStatus::OutOfDate {
            self.recreate_surface()?;
            return Ok(FrameStatus::OutOfDate);
        }

        let frame = self.scheduler.current_frame_index();
        self.static_lane.begin_frame(frame)?;
        self.transient_lane.begin_frame(frame)?;
        self.scene.begin_frame(frame);
        self.scene.update_camera(frame, &self.camera)?;

        self.stats.reset_frame();
        self.record_commands(frame, image_index, items)?;

        self.stats.static_bytes = self.static_lane.used();
        self.stats.transient_bytes = self.transient_lane.used();
        self.static_lane.flush(false)?;
        self.transient_lane.flush(false)?;

        self.scheduler.submit(
            self.device.graphics_queue(),
            image_index,
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        )?;
        self.stats.frames += 1;
        // Resources created before the next frame land in its slot.
        self.static_lane
            .begin_frame(self.scheduler.current_frame_index())?;

        let present_status =
            self.scheduler
                .present(self.device.present_queue(), &self.swapchain, image_index)?;
        let status = worst_status(acquire_status, present_status);
        if self.tracker.needs_recreate(status) {
            debug!("Recreating surface after present ({:?})", status);
            self.recreate_surface()?;
        }

        Ok(status)
    }

    fn record_commands(
        &mut self,
        frame: usize,
        image_index: u32,
        items: &[DrawItem],
    ) -> RenderResult<()> {
        let (color_image, color_view) = self.swapchain.target(image_index).ok_or_else(|| {
            RhiError::InvalidArgument(format!("no swapchain image {}", image_index))
        })?;
        let extent = self.swapchain.extent();
        let cmd = self.scheduler.command_buffer();

        cmd.transition_image_layout(
            color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        );
        cmd.transition_image_layout(
            self.depth.image(),
            vk::ImageAspectFlags::DEPTH,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::DEPTH_ATTACHMENT_OPTIMAL,
        );

        let color_attachment = vk::RenderingAttachmentInfo::default()
            .image_view(color_view)
            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
            .load_op(vk::AttachmentLoadOp::CLEAR)
            .store_op(vk::AttachmentStoreOp::STORE)
            .clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: CLEAR_COLOR,
                },
            });
        let depth_attachment = self.depth.attachment_info();
        let rendering_info = vk::RenderingInfo::default()
            .render_area(full_scissor(extent))
            .layer_count(1)
            .color_attachments(std::slice::from_ref(&color_attachment))
            .depth_attachment(&depth_attachment);

        cmd.begin_rendering(&rendering_info);
        cmd.set_viewport(&flipped_viewport(extent));
        cmd.set_scissor(&full_scissor(extent));
        cmd.bind_graphics_pipeline(self.pipeline.handle());
        self.scene.bind(cmd, self.pipeline_layout.handle(), frame);

        let layout = self.pipeline_layout.handle();
        let batches = build_batches(items, |m| self.resources.resolve_material(m));
        for batch in &batches {
            let requested = batch.models.len() as u32;
            let (Some(mesh), Some(material)) = (
                self.resources.mesh(batch.mesh),
                self.resources.material(batch.material),
            ) else {
                warn!(
                    "Skipping {} draw(s) of {:?} with {:?}: unknown handle",
                    requested, batch.mesh, batch.material
                );
                self.stats.skipped_draws += requested;
                continue;
            };

            let range = self
                .scene
                .upload_instances(&mut self.transient_lane, frame, &batch.models)?;
            self.stats.dropped_instances += range.dropped;
            if range.is_empty() {
                continue;
            }

            cmd.bind_graphics_descriptor_sets(layout, 1, &[material.descriptor_set()], &[]);
            cmd.push_constants(
                layout,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
                0,
                &DrawPushConstants::new(batch.material.index()),
            );
            cmd.bind_vertex_buffers(0, &[mesh.vertex_buffer()], &[0]);

            let counts = mesh.layout();
            match mesh.index_buffer() {
                Some(index_buffer) if counts.indexed() => {
                    cmd.bind_index_buffer(index_buffer, 0, vk::IndexType::UINT32);
                    cmd.draw_indexed(counts.index_count, range.count, 0, 0, range.base_instance);
                }
                _ => cmd.draw(counts.vertex_count, range.count, 0, range.base_instance),
            }

            self.stats.draw_calls += 1;
        }
        self.stats.instances = self.scene.instances_used(frame);

        cmd.end_rendering();
        cmd.transition_image_layout(
            color_image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            vk::ImageLayout::PRESENT_SRC_KHR,
        );

        self.scene.finish_uploads(&mut self.transient_lane, frame)?;
        Ok(())
    }

    /// Rebuilds everything sized or formatted after the surface: swapchain,
    /// depth buffer, per-image sync, and the pipeline if the color format
    /// changed.
    fn recreate_surface(&mut self) -> RenderResult<()> {
        let target = self.tracker.target_extent();
        if target.width == 0 || target.height == 0 {
            return Ok(());
        }

        self.wait_for_gpu()?;
        self.swapchain
            .recreate(self.surface.handle(), target.width, target.height)?;
        let extent = self.swapchain.extent();

        if !self.depth.target().matches(extent) {
            *self.depth = DepthBuffer::new(self.device.clone(), DepthTarget::for_swapchain(extent))?;
        }

        if self.swapchain.format() != self.pipeline.color_format() {
            info!(
                "Surface format changed {:?} -> {:?}, rebuilding pipeline",
                self.pipeline.color_format(),
                self.swapchain.format()
            );
            *self.pipeline = Self::create_pipeline(
                &self.device,
                &self.pipeline_layout,
                &self.shaders,
                self.swapchain.format(),
            )?;
        }

        self.scheduler
            .on_surface_recreated(self.swapchain.image_count())?;
        self.tracker.mark_recreated(extent);
        self.stats.surface_recreations = self.tracker.recreations();

        info!("Surface recreated: {}x{}", extent.width, extent.height);
        Ok(())
    }

    // =========================================================================
    // Frame Inputs
    // =========================================================================

    /// Records the window size. Applied before the next frame; a zero size
    /// suspends drawing.
    pub fn resize(&mut self, width: u32, height: u32) {
        debug!("Resize requested: {}x{}", width, height);
        self.tracker.request_resize(width, height);
    }

    /// Camera used from the next frame on.
    pub fn set_camera(&mut self, camera: CameraUbo) {
        self.camera = camera;
    }

    // =========================================================================
    // Resources
    // =========================================================================

    /// The static lane normally stays open between frames; reopen it if a
    /// failed frame left it closed.
    fn open_static_lane(&mut self) -> RenderResult<()> {
        self.static_lane
            .begin_frame(self.scheduler.current_frame_index())?;
        Ok(())
    }

    pub fn create_mesh(&mut self, mesh: &MeshData) -> RenderResult<MeshHandle> {
        self.open_static_lane()?;
        self.resources.create_mesh(&mut self.static_lane, mesh)
    }

    pub fn create_texture_from_file<P: AsRef<Path>>(&mut self, path: P) -> RenderResult<TextureHandle> {
        self.open_static_lane()?;
        self.resources
            .create_texture_from_file(&mut self.static_lane, path)
    }

    pub fn create_texture_from_image(&mut self, image: &ImageData) -> RenderResult<TextureHandle> {
        self.open_static_lane()?;
        self.resources
            .create_texture_from_image(&mut self.static_lane, image)
    }

    pub fn create_material_from_texture(
        &mut self,
        texture: TextureHandle,
        params: MaterialParams,
    ) -> RenderResult<MaterialId> {
        self.open_static_lane()?;
        self.resources
            .create_material_from_texture(&mut self.static_lane, texture, params)
    }

    pub fn create_material_from_factor(&mut self, params: MaterialParams) -> RenderResult<MaterialId> {
        self.open_static_lane()?;
        self.resources
            .create_material_from_factor(&mut self.static_lane, params)
    }

    /// Material for draw items without an override; `None` restores the
    /// default.
    pub fn set_active_material(&mut self, id: Option<MaterialId>) {
        self.resources.set_active_material(id);
    }

    pub fn resolve_material(&self, override_id: Option<MaterialId>) -> MaterialId {
        self.resources.resolve_material(override_id)
    }

    #[inline]
    pub fn resources(&self) -> &ResourceStore {
        &self.resources
    }

    // =========================================================================
    // Queries
    // =========================================================================

    #[inline]
    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    /// Extent of the live swapchain.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.tracker.is_suspended()
    }

    #[inline]
    pub fn config(&self) -> &RendererConfig {
        &self.config
    }

    /// Blocks until the GPU has finished all submitted work.
    pub fn wait_idle(&self) -> RenderResult<()> {
        self.wait_for_gpu()
    }

    /// Waits on every frame slot and upload lane fence, then for the
    /// queues, since presentation signals no fence.
    fn wait_for_gpu(&self) -> RenderResult<()> {
        self.scheduler.wait_all()?;
        self.static_lane.wait_all()?;
        self.transient_lane.wait_all()?;
        self.device.wait_idle()?;
        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        if let Err(e) = self.wait_for_gpu() {
            error!("Failed to wait for the GPU during renderer drop: {:?}", e);
        }

        unsafe {
            ManuallyDrop::drop(&mut self.pipeline);
            ManuallyDrop::drop(&mut self.pipeline_layout);
            ManuallyDrop::drop(&mut self.shaders);
            ManuallyDrop::drop(&mut self.scene);
            ManuallyDrop::drop(&mut self.resources);
            ManuallyDrop::drop(&mut self.transient_lane);
            ManuallyDrop::drop(&mut self.static_lane);
            ManuallyDrop::drop(&mut self.scheduler);
            ManuallyDrop::drop(&mut self.depth);
            ManuallyDrop::drop(&mut self.swapchain);
            ManuallyDrop::drop(&mut self.surface);
        }

        info!("Renderer destroyed after {} frame(s)", self.stats.frames);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worst_status() {
        assert_eq!(worst_status(FrameStatus::Ok, FrameStatus::Ok), FrameStatus::Ok);
        assert_eq!(
            worst_status(FrameStatus::Suboptimal, FrameStatus::Ok),
            FrameStatus::Suboptimal
        );
        assert_eq!(
            worst_status(FrameStatus::Suboptimal, FrameStatus::OutOfDate),
            FrameStatus::OutOfDate
        );
    }

    #[test]
    fn test_stats_reset_keeps_totals() {
        let mut stats = FrameStats {
            frames: 7,
            draw_calls: 3,
            instances: 40,
            dropped_instances: 2,
            suspended_frames: 1,
            ..Default::default()
        };
        stats.reset_frame();
        assert_eq!(stats.frames, 7);
        assert_eq!(stats.suspended_frames, 1);
        assert_eq!(stats.draw_calls, 0);
        assert_eq!(stats.dropped_instances, 0);
    }
}
