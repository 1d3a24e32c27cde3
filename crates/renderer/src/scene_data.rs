//! Per-frame scene bindings: camera uniform, instance transforms and the
//! material table.
//!
//! Instance transforms live in one device-local storage buffer cut into N
//! slices, one per frame slot. A slice is only rewritten after the frame
//! scheduler has waited on that slot's fence, so the copy never races the
//! draws that read it.

use std::sync::Arc;

use ash::vk;
use glam::Mat4;
use tracing::{debug, info, warn};

use frameflow_rhi::RhiError;
use frameflow_rhi::buffer::{Buffer, BufferUsage};
use frameflow_rhi::command::CommandBuffer;
use frameflow_rhi::descriptor::{
    self, DescriptorPool, DescriptorSetLayout, layout_binding, pool_sizes_for,
};
use frameflow_rhi::device::Device;

use crate::error::{RenderError, RenderResult};
use crate::staging::StagingUploader;
use crate::ubo::{CameraUbo, INSTANCE_SIZE};

/// Size and placement of one frame's instance slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceLayout {
    /// Instances one frame can hold.
    pub capacity: u32,
    /// Bytes the shader may address in one slice.
    pub range: u64,
    /// Distance between consecutive slices.
    pub stride: u64,
}

/// Clamps `requested` instances per frame to what one storage binding can
/// address and aligns the slice stride for dynamic binding offsets.
///
/// Returns `None` when not even one instance fits.
pub fn compute_instance_frame_stride(
    requested: u32,
    instance_size: u64,
    max_storage_range: u64,
    min_offset_alignment: u64,
) -> Option<InstanceLayout> {
    if instance_size == 0 {
        return None;
    }
    let addressable = max_storage_range / instance_size;
    let capacity = u64::from(requested).min(addressable);
    if capacity == 0 {
        return None;
    }

    let range = capacity * instance_size;
    let stride = range.checked_next_multiple_of(min_offset_alignment.max(1))?;
    Some(InstanceLayout {
        capacity: capacity as u32,
        range,
        stride,
    })
}

/// Write cursor into one frame's instance slice.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InstanceCursor {
    capacity: u32,
    cursor: u32,
}

impl InstanceCursor {
    pub fn new(capacity: u32) -> Self {
        Self {
            capacity,
            cursor: 0,
        }
    }

    /// How many of `requested` instances would fit.
    #[inline]
    pub fn peek(&self, requested: usize) -> u32 {
        let requested = u32::try_from(requested).unwrap_or(u32::MAX);
        requested.min(self.remaining())
    }

    /// Takes up to `requested` slots, returning `(base, count)`.
    pub fn reserve(&mut self, requested: usize) -> (u32, u32) {
        let count = self.peek(requested);
        let base = self.cursor;
        self.cursor += count;
        (base, count)
    }

    pub fn reset(&mut self) {
        self.cursor = 0;
    }

    #[inline]
    pub fn cursor(&self) -> u32 {
        self.cursor
    }

    #[inline]
    pub fn remaining(&self) -> u32 {
        self.capacity - self.cursor
    }
}

/// Result of [`SceneData::upload_instances`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstanceRange {
    /// Passed as `firstInstance` of the draw.
    pub base_instance: u32,
    pub count: u32,
    /// Instances of the batch that were not uploaded.
    pub dropped: u32,
}

impl InstanceRange {
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

/// Outcome of [`place_instances`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct InstancePlacement {
    pub range: InstanceRange,
    /// Where the placed models were staged; `None` when nothing was placed.
    pub staging_offset: Option<u64>,
    /// The staging lane refused the batch, so all of it was dropped.
    pub staging_failed: bool,
}

/// Decides how much of a `requested`-instance batch lands in the slice
/// behind `cursor`.
///
/// The batch is truncated to the remaining capacity. `stage` is handed the
/// number of instances to stage and returns their staging offset; when it
/// fails the whole batch is dropped and the cursor does not move.
pub fn place_instances(
    cursor: &mut InstanceCursor,
    requested: usize,
    stage: impl FnOnce(u32) -> Option<u64>,
) -> InstancePlacement {
    let requested_count = u32::try_from(requested).unwrap_or(u32::MAX);
    let dropped_all = InstanceRange {
        base_instance: cursor.cursor(),
        count: 0,
        dropped: requested_count,
    };

    let count = cursor.peek(requested);
    if count == 0 {
        return InstancePlacement {
            range: dropped_all,
            ..Default::default()
        };
    }
    let Some(staging_offset) = stage(count) else {
        return InstancePlacement {
            range: dropped_all,
            staging_offset: None,
            staging_failed: true,
        };
    };

    let (base, count) = cursor.reserve(count as usize);
    InstancePlacement {
        range: InstanceRange {
            base_instance: base,
            count,
            dropped: requested_count - count,
        },
        staging_offset: Some(staging_offset),
        staging_failed: false,
    }
}

pub struct SceneData {
    camera_buffers: Vec<Buffer>,
    instance_buffer: Buffer,
    layout: InstanceLayout,
    cursors: Vec<InstanceCursor>,
    descriptor_sets: Vec<vk::DescriptorSet>,
    _descriptor_pool: DescriptorPool,
    set_layout: DescriptorSetLayout,
}

impl SceneData {
    /// Creates per-frame camera uniforms, the sliced instance buffer and one
    /// set-0 descriptor set per frame pointing at them and at
    /// `material_table`.
    pub fn new(
        device: Arc<Device>,
        frames: usize,
        max_instances_per_frame: u32,
        material_table: (vk::Buffer, u64),
    ) -> RenderResult<Self> {
        let limits = device.limits();
        let layout = compute_instance_frame_stride(
            max_instances_per_frame,
            INSTANCE_SIZE,
            limits.max_storage_buffer_range,
            limits.min_storage_buffer_offset_alignment,
        )
        .ok_or_else(|| {
            RenderError::Rhi(RhiError::InvalidArgument(format!(
                "device cannot address {} instances per frame",
                max_instances_per_frame
            )))
        })?;
        if layout.capacity < max_instances_per_frame {
            warn!(
                "Instance capacity clamped from {} to {} by the storage range limit",
                max_instances_per_frame, layout.capacity
            );
        }

        let bindings = [
            layout_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
            layout_binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::VERTEX),
            layout_binding(
                2,
                vk::DescriptorType::STORAGE_BUFFER,
                vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
            ),
        ];
        let set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let descriptor_pool = DescriptorPool::new(
            device.clone(),
            frames as u32,
            &pool_sizes_for(&bindings, frames as u32),
        )?;

        let instance_buffer = Buffer::with_name(
            device.clone(),
            BufferUsage::Storage,
            layout.stride * frames as u64,
            "instances",
        )?;
        let camera_buffers = (0..frames)
            .map(|_| {
                Buffer::with_name(
                    device.clone(),
                    BufferUsage::Uniform,
                    CameraUbo::SIZE as u64,
                    "camera",
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        let set_layouts = vec![set_layout.handle(); frames];
        let descriptor_sets = descriptor_pool.allocate(&set_layouts)?;
        let (table, table_size) = material_table;
        for (frame, &set) in descriptor_sets.iter().enumerate() {
            descriptor::write_buffer(
                &device,
                set,
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                camera_buffers[frame].handle(),
                0,
                CameraUbo::SIZE as u64,
            );
            descriptor::write_buffer(
                &device,
                set,
                1,
                vk::DescriptorType::STORAGE_BUFFER,
                instance_buffer.handle(),
                layout.stride * frame as u64,
                layout.range,
            );
            descriptor::write_buffer(
                &device,
                set,
                2,
                vk::DescriptorType::STORAGE_BUFFER,
                table,
                0,
                table_size,
            );
        }

        info!(
            "Scene data ready: {} frame(s), {} instances per frame, stride {} bytes",
            frames, layout.capacity, layout.stride
        );

        Ok(Self {
            camera_buffers,
            instance_buffer,
            layout,
            cursors: vec![InstanceCursor::new(layout.capacity); frames],
            descriptor_sets,
            _descriptor_pool: descriptor_pool,
            set_layout,
        })
    }

    /// Rewinds `frame`'s instance cursor. The slot's fence must have been
    /// waited on.
    pub fn begin_frame(&mut self, frame: usize) {
        self.cursors[frame].reset();
    }

    /// Writes the camera uniform of `frame` through its mapping.
    pub fn update_camera(&mut self, frame: usize, camera: &CameraUbo) -> RenderResult<()> {
        self.camera_buffers[frame].write_data(0, bytemuck::bytes_of(camera))?;
        Ok(())
    }

    /// Stages `models` and records their copy into `frame`'s instance slice.
    ///
    /// A batch larger than the remaining capacity is truncated and the tail
    /// dropped. A batch the transient lane cannot stage is dropped whole.
    /// Both cases log a warning and report the loss in
    /// [`InstanceRange::dropped`].
    pub fn upload_instances(
        &mut self,
        uploader: &mut StagingUploader,
        frame: usize,
        models: &[Mat4],
    ) -> RenderResult<InstanceRange> {
        let mut staged_bytes = 0u64;
        let placement = place_instances(&mut self.cursors[frame], models.len(), |count| {
            let bytes: &[u8] = bytemuck::cast_slice(&models[..count as usize]);
            staged_bytes = bytes.len() as u64;
            uploader.stage(bytes, 16)
        });
        let range = placement.range;

        if placement.staging_failed {
            warn!(
                "Lane '{}' cannot stage {} bytes of instances ({} left), dropping {} instance(s)",
                uploader.name(),
                staged_bytes,
                uploader.remaining(),
                range.dropped
            );
        } else if range.dropped > 0 {
            warn!(
                "Instance slice of frame {} is full, dropped {} of {} instance(s)",
                frame,
                range.dropped,
                models.len()
            );
        }

        if let Some(staging_offset) = placement.staging_offset {
            let dst_offset =
                self.layout.stride * frame as u64 + u64::from(range.base_instance) * INSTANCE_SIZE;
            uploader.cmd_copy_to_buffer(
                staging_offset,
                self.instance_buffer.handle(),
                dst_offset,
                u64::from(range.count) * INSTANCE_SIZE,
            )?;
        }
        Ok(range)
    }

    /// Makes this frame's instance copies visible to the vertex shader.
    pub fn finish_uploads(&self, uploader: &mut StagingUploader, frame: usize) -> RenderResult<()> {
        let used = self.cursors[frame].cursor();
        if used == 0 {
            return Ok(());
        }
        uploader.cmd_buffer_barrier(
            self.instance_buffer.handle(),
            self.layout.stride * frame as u64,
            u64::from(used) * INSTANCE_SIZE,
            vk::PipelineStageFlags::VERTEX_SHADER,
            vk::AccessFlags::SHADER_READ,
        )?;
        debug!("Frame {}: {} instance(s) uploaded", frame, used);
        Ok(())
    }

    /// Binds `frame`'s set 0.
    pub fn bind(&self, cmd: &CommandBuffer, pipeline_layout: vk::PipelineLayout, frame: usize) {
        cmd.bind_graphics_descriptor_sets(pipeline_layout, 0, &[self.descriptor_sets[frame]], &[]);
    }

    #[inline]
    pub fn set_layout(&self) -> vk::DescriptorSetLayout {
        self.set_layout.handle()
    }

    #[inline]
    pub fn instance_layout(&self) -> InstanceLayout {
        self.layout
    }

    /// Instances uploaded for `frame` since its last `begin_frame`.
    #[inline]
    pub fn instances_used(&self, frame: usize) -> u32 {
        self.cursors[frame].cursor()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_stride_rounds_to_alignment() {
        let layout = compute_instance_frame_stride(3, 64, 1 << 27, 256).unwrap();
        assert_eq!(layout.capacity, 3);
        assert_eq!(layout.range, 192);
        assert_eq!(layout.stride, 256);
    }

    #[test]
    fn test_capacity_clamped_by_storage_range() {
        // 64 KiB of storage holds 1024 matrices.
        let layout = compute_instance_frame_stride(16_384, 64, 65_536, 64).unwrap();
        assert_eq!(layout.capacity, 1024);
        assert_eq!(layout.range, 65_536);
        assert_eq!(layout.stride, 65_536);
    }

    #[test]
    fn test_stride_rejects_unaddressable() {
        assert!(compute_instance_frame_stride(10, 64, 32, 16).is_none());
        assert!(compute_instance_frame_stride(0, 64, 1 << 20, 16).is_none());
    }

    #[test]
    fn test_cursor_truncates_at_capacity() {
        let mut cursor = InstanceCursor::new(10);
        assert_eq!(cursor.reserve(4), (0, 4));
        assert_eq!(cursor.reserve(8), (4, 6));
        assert_eq!(cursor.reserve(1), (10, 0));
        assert_eq!(cursor.remaining(), 0);

        cursor.reset();
        assert_eq!(cursor.cursor(), 0);
        assert_eq!(cursor.peek(3), 3);
    }

    #[test]
    fn test_placement_truncates_tail() {
        let mut cursor = InstanceCursor::new(8);
        cursor.reserve(5);

        let mut staged = None;
        let placement = place_instances(&mut cursor, 10, |count| {
            staged = Some(count);
            Some(4096)
        });

        assert_eq!(staged, Some(3));
        assert_eq!(
            placement.range,
            InstanceRange {
                base_instance: 5,
                count: 3,
                dropped: 7
            }
        );
        assert_eq!(placement.staging_offset, Some(4096));
        assert!(!placement.staging_failed);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_placement_drops_whole_batch_when_staging_fails() {
        let mut cursor = InstanceCursor::new(8);
        cursor.reserve(2);

        let placement = place_instances(&mut cursor, 4, |_| None);

        assert!(placement.staging_failed);
        assert_eq!(placement.staging_offset, None);
        assert_eq!(placement.range.count, 0);
        assert_eq!(placement.range.dropped, 4);
        // The slots stay free for later batches.
        assert_eq!(cursor.cursor(), 2);
    }

    #[test]
    fn test_placement_into_full_slice_skips_staging() {
        let mut cursor = InstanceCursor::new(2);
        cursor.reserve(2);

        let mut staged = false;
        let placement = place_instances(&mut cursor, 3, |_| {
            staged = true;
            Some(0)
        });

        assert!(!staged);
        assert!(!placement.staging_failed);
        assert!(placement.range.is_empty());
        assert_eq!(placement.range.dropped, 3);
    }

    #[test]
    fn test_empty_range() {
        assert!(InstanceRange::default().is_empty());
    }

    proptest! {
        #[test]
        fn prop_cursor_never_exceeds_capacity(
            capacity in 0u32..2_048,
            batches in prop::collection::vec(0usize..512, 0..32),
        ) {
            let mut cursor = InstanceCursor::new(capacity);
            for batch in batches {
                let before = cursor.cursor();
                let (base, count) = cursor.reserve(batch);
                prop_assert_eq!(base, before);
                prop_assert!(count as usize <= batch);
                prop_assert_eq!(cursor.cursor(), before + count);
                prop_assert!(cursor.cursor() <= capacity);
            }
        }

        #[test]
        fn prop_placement_accounts_for_every_instance(
            capacity in 0u32..512,
            batches in prop::collection::vec((0usize..128, any::<bool>()), 0..24),
        ) {
            let mut cursor = InstanceCursor::new(capacity);
            for (requested, stage_ok) in batches {
                let before = cursor.cursor();
                let placement = place_instances(&mut cursor, requested, |_| stage_ok.then_some(0));
                let range = placement.range;

                prop_assert_eq!((range.count + range.dropped) as usize, requested);
                prop_assert_eq!(cursor.cursor(), before + range.count);
                prop_assert!(cursor.cursor() <= capacity);
                prop_assert_eq!(placement.staging_offset.is_some(), range.count > 0);
                if placement.staging_failed {
                    prop_assert_eq!(range.count, 0);
                }
                if range.count > 0 {
                    prop_assert_eq!(range.base_instance, before);
                }
            }
        }

        #[test]
        fn prop_slices_are_aligned_and_disjoint(
            requested in 1u32..100_000,
            max_range in 64u64..(1 << 28),
            align_pow in 0u32..9,
        ) {
            let alignment = 1u64 << align_pow;
            let layout = compute_instance_frame_stride(requested, 64, max_range, alignment).unwrap();
            prop_assert!(layout.capacity <= requested);
            prop_assert!(layout.range <= max_range);
            prop_assert_eq!(layout.stride % alignment, 0);
            prop_assert!(layout.stride >= layout.range);
        }
    }
}
