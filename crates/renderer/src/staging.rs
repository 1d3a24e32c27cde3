//! Host-to-device uploads through a fenced, per-frame staging ring.
//!
//! One persistently mapped buffer is split into N equal regions, one per
//! frame slot. A slot's region, command buffer and fence are reused only
//! after that fence signals, so allocation inside a region is a plain bump
//! pointer with no locking.
//!
//! The renderer runs two of these "lanes": a static lane for meshes,
//! textures and materials, and a transient lane for per-frame instance data.
//! Both submit to the graphics queue, so ordering with draw submissions
//! follows submission order plus the recorded barriers.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use frameflow_rhi::buffer::{Buffer, BufferUsage};
use frameflow_rhi::command::{CommandBuffer, CommandPool};
use frameflow_rhi::device::Device;
use frameflow_rhi::image::buffer_image_copy;
use frameflow_rhi::sync::{self, Fence};
use frameflow_rhi::{RhiError, RhiResult};

/// Granularity of a staging region. Every alignment used for copies divides
/// it, so each region starts suitably aligned.
pub const STAGING_REGION_ALIGNMENT: u64 = 256;

/// A range handed out by [`StagingRing::alloc`], in absolute buffer offsets.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct StagingAlloc {
    pub offset: u64,
    pub size: u64,
}

/// Byte-range bookkeeping of the staging ring, independent of the GPU.
#[derive(Clone, Debug)]
pub struct StagingRing {
    frames: usize,
    per_frame_bytes: u64,
    frame: usize,
    cursor: u64,
}

impl StagingRing {
    pub fn new(frames: usize, per_frame_bytes: u64) -> Self {
        Self {
            frames: frames.max(1),
            per_frame_bytes,
            frame: 0,
            cursor: 0,
        }
    }

    /// Starts allocating from `frame`'s region. Its previous contents must no
    /// longer be read by the GPU.
    pub fn begin(&mut self, frame: usize) {
        self.frame = frame % self.frames;
        self.cursor = self.frame_base();
    }

    /// Bump-allocates `size` bytes at an absolute offset that is a multiple
    /// of `alignment`. `None` when the region's budget would be exceeded.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<StagingAlloc> {
        let offset = self.cursor.checked_next_multiple_of(alignment.max(1))?;
        let end = offset.checked_add(size)?;
        if end > self.frame_end() {
            return None;
        }
        self.cursor = end;
        Some(StagingAlloc { offset, size })
    }

    #[inline]
    pub fn frame(&self) -> usize {
        self.frame
    }

    /// Number of regions.
    #[inline]
    pub fn frames(&self) -> usize {
        self.frames
    }

    #[inline]
    pub fn frame_base(&self) -> u64 {
        self.frame as u64 * self.per_frame_bytes
    }

    #[inline]
    pub fn frame_end(&self) -> u64 {
        self.frame_base() + self.per_frame_bytes
    }

    #[inline]
    pub fn per_frame_bytes(&self) -> u64 {
        self.per_frame_bytes
    }

    /// Size of the whole ring.
    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.frames as u64 * self.per_frame_bytes
    }

    #[inline]
    pub fn used(&self) -> u64 {
        self.cursor - self.frame_base()
    }

    #[inline]
    pub fn remaining(&self) -> u64 {
        self.frame_end() - self.cursor
    }
}

/// Kind of a recorded, not yet executed transfer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TransferKind {
    BufferCopy,
    ImageUpload,
}

/// A copy recorded since the last flush, kept for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PendingTransfer {
    pub kind: TransferKind,
    pub staging_offset: u64,
    pub size: u64,
}

/// Mapped bytes of a fresh staging allocation.
pub struct StagingWrite<'a> {
    /// Absolute offset into the staging buffer, used as copy source.
    pub offset: u64,
    pub bytes: &'a mut [u8],
}

/// What a lane must do before `frame` can record.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LaneBegin {
    /// `frame` is already recording; its queued work is kept.
    Resume,
    /// Open `frame`, submitting `flush_first` beforehand if set.
    Open { flush_first: Option<usize> },
}

/// A recording slot closed by [`LaneState::close`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LaneClose {
    pub frame: usize,
    /// False when nothing was recorded: the slot's fence stays signaled.
    pub submit: bool,
}

/// Recording state of an upload lane, independent of the GPU.
///
/// Staging memory is only handed out while a slot is open, and only from
/// that slot's region.
#[derive(Clone, Debug)]
pub struct LaneState {
    ring: StagingRing,
    recording: Option<usize>,
    has_commands: bool,
    pending: Vec<PendingTransfer>,
}

impl LaneState {
    pub fn new(frames: usize, per_frame_bytes: u64) -> Self {
        Self {
            ring: StagingRing::new(frames, per_frame_bytes),
            recording: None,
            has_commands: false,
            pending: Vec::new(),
        }
    }

    /// Frame slot that `frame` maps to.
    #[inline]
    pub fn slot(&self, frame: usize) -> usize {
        frame % self.ring.frames()
    }

    pub fn plan_begin(&self, frame: usize) -> LaneBegin {
        let frame = self.slot(frame);
        match self.recording {
            Some(current) if current == frame => LaneBegin::Resume,
            flush_first => LaneBegin::Open { flush_first },
        }
    }

    /// Marks `frame` recording with an empty region. Its fence must have
    /// been waited on.
    pub fn open(&mut self, frame: usize) {
        let frame = self.slot(frame);
        self.ring.begin(frame);
        self.pending.clear();
        self.has_commands = false;
        self.recording = Some(frame);
    }

    /// `None` when no slot is open or its budget would be exceeded.
    pub fn alloc(&mut self, size: u64, alignment: u64) -> Option<StagingAlloc> {
        self.recording?;
        self.ring.alloc(size, alignment)
    }

    /// Notes that a command is about to be recorded, returning the open slot.
    pub fn record(&mut self) -> Option<usize> {
        let frame = self.recording?;
        self.has_commands = true;
        Some(frame)
    }

    pub fn note(&mut self, kind: TransferKind, staging_offset: u64, size: u64) {
        self.pending.push(PendingTransfer {
            kind,
            staging_offset,
            size,
        });
    }

    /// Ends recording. `None` when no slot was open.
    pub fn close(&mut self) -> Option<LaneClose> {
        let frame = self.recording.take()?;
        let submit = std::mem::take(&mut self.has_commands);
        Some(LaneClose { frame, submit })
    }

    /// Slot a flush-and-restart reopens: the recording one, else the last.
    #[inline]
    pub fn restart_frame(&self) -> usize {
        self.recording.unwrap_or(self.ring.frame())
    }

    #[inline]
    pub fn recording(&self) -> Option<usize> {
        self.recording
    }

    /// Bytes allocated in the open slot's region so far.
    pub fn used(&self) -> u64 {
        if self.recording.is_some() {
            self.ring.used()
        } else {
            0
        }
    }

    /// Bytes still available in the open slot's region.
    pub fn remaining(&self) -> u64 {
        if self.recording.is_some() {
            self.ring.remaining()
        } else {
            0
        }
    }

    #[inline]
    pub fn pending(&self) -> &[PendingTransfer] {
        &self.pending
    }

    #[inline]
    pub fn ring(&self) -> &StagingRing {
        &self.ring
    }
}

struct UploadSlot {
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    fence: Fence,
}

/// One upload lane: staging ring plus per-slot command buffers and fences.
pub struct StagingUploader {
    device: Arc<Device>,
    name: &'static str,
    staging: Buffer,
    state: LaneState,
    slots: Vec<UploadSlot>,
}

impl StagingUploader {
    /// Allocates `frames` regions of `per_frame_bytes` (rounded up to
    /// [`STAGING_REGION_ALIGNMENT`]) and one command buffer and signaled
    /// fence per slot.
    pub fn new(
        device: Arc<Device>,
        name: &'static str,
        frames: usize,
        per_frame_bytes: u64,
    ) -> RhiResult<Self> {
        if frames == 0 || per_frame_bytes == 0 {
            return Err(RhiError::InvalidArgument(format!(
                "{} lane needs at least one frame and a non-zero budget",
                name
            )));
        }

        let per_frame_bytes = per_frame_bytes.next_multiple_of(STAGING_REGION_ALIGNMENT);
        let state = LaneState::new(frames, per_frame_bytes);
        let staging = Buffer::with_name(
            device.clone(),
            BufferUsage::Staging,
            state.ring().total_bytes(),
            name,
        )?;

        let slots = (0..frames)
            .map(|_| {
                let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
                Ok(UploadSlot {
                    command_buffer: CommandBuffer::new(device.clone(), &command_pool)?,
                    _command_pool: command_pool,
                    fence: Fence::new(device.clone(), true)?,
                })
            })
            .collect::<RhiResult<Vec<_>>>()?;

        debug!(
            "Staging lane '{}' created: {} x {} bytes",
            name, frames, per_frame_bytes
        );

        Ok(Self {
            device,
            name,
            staging,
            state,
            slots,
        })
    }

    /// Opens `frame`'s slot for recording.
    ///
    /// Waits for the slot's previous upload, resets its command buffer and
    /// rewinds the cursor to the region start. A no-op when `frame` is
    /// already recording, so work queued between frames is kept. If another
    /// slot is still recording it is flushed first.
    pub fn begin_frame(&mut self, frame: usize) -> RhiResult<()> {
        let frame = self.state.slot(frame);
        match self.state.plan_begin(frame) {
            LaneBegin::Resume => return Ok(()),
            LaneBegin::Open {
                flush_first: Some(current),
            } => {
                warn!(
                    "Lane '{}' switching from slot {} to {} with work pending, flushing",
                    self.name, current, frame
                );
                self.flush(false)?;
            }
            LaneBegin::Open { flush_first: None } => {}
        }

        let slot = &self.slots[frame];
        slot.fence.wait(u64::MAX)?;
        slot.command_buffer.reset()?;
        slot.command_buffer.begin()?;

        self.state.open(frame);
        Ok(())
    }

    /// Bump-allocates `size` bytes of mapped staging memory.
    ///
    /// `None` when no slot is recording or the frame's budget would be
    /// exceeded; the caller may [`flush_and_restart`](Self::flush_and_restart)
    /// and retry, split the payload, or drop it.
    pub fn alloc_staging(&mut self, size: u64, alignment: u64) -> Option<StagingWrite<'_>> {
        let alloc = self.state.alloc(size, alignment)?;
        let bytes = self.staging.mapped_slice_mut(alloc.offset, alloc.size).ok()?;
        Some(StagingWrite {
            offset: alloc.offset,
            bytes,
        })
    }

    /// Allocates and fills staging memory in one step, returning its offset.
    pub fn stage(&mut self, data: &[u8], alignment: u64) -> Option<u64> {
        let write = self.alloc_staging(data.len() as u64, alignment)?;
        write.bytes.copy_from_slice(data);
        Some(write.offset)
    }

    /// Records a copy from staging into `dst`.
    pub fn cmd_copy_to_buffer(
        &mut self,
        staging_offset: u64,
        dst: vk::Buffer,
        dst_offset: u64,
        size: u64,
    ) -> RhiResult<()> {
        let region = vk::BufferCopy::default()
            .src_offset(staging_offset)
            .dst_offset(dst_offset)
            .size(size);
        let src = self.staging.handle();
        self.recording_slot()?
            .command_buffer
            .copy_buffer(src, dst, &[region]);
        self.state.note(TransferKind::BufferCopy, staging_offset, size);
        Ok(())
    }

    /// Records the full texture upload: `UNDEFINED -> TRANSFER_DST_OPTIMAL`,
    /// the copy, then `TRANSFER_DST_OPTIMAL -> SHADER_READ_ONLY_OPTIMAL`.
    pub fn cmd_upload_image(
        &mut self,
        staging_offset: u64,
        image: vk::Image,
        extent: vk::Extent2D,
        size: u64,
    ) -> RhiResult<()> {
        let src = self.staging.handle();
        let cmd = &self.recording_slot()?.command_buffer;
        cmd.transition_image_layout(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        );
        cmd.copy_buffer_to_image(src, image, &[buffer_image_copy(staging_offset, extent)]);
        cmd.transition_image_layout(
            image,
            vk::ImageAspectFlags::COLOR,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        );
        self.state.note(TransferKind::ImageUpload, staging_offset, size);
        Ok(())
    }

    /// Records a barrier making transfer writes to `[offset, offset + size)`
    /// of `buffer` visible to `dst_access` at `dst_stage`.
    pub fn cmd_buffer_barrier(
        &mut self,
        buffer: vk::Buffer,
        offset: u64,
        size: u64,
        dst_stage: vk::PipelineStageFlags,
        dst_access: vk::AccessFlags,
    ) -> RhiResult<()> {
        let barrier = vk::BufferMemoryBarrier::default()
            .src_access_mask(vk::AccessFlags::TRANSFER_WRITE)
            .dst_access_mask(dst_access)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .buffer(buffer)
            .offset(offset)
            .size(size);
        self.recording_slot()?.command_buffer.pipeline_barrier(
            vk::PipelineStageFlags::TRANSFER,
            dst_stage,
            &[barrier],
            &[],
        );
        Ok(())
    }

    /// Ends recording and submits the slot's uploads, signaling its fence.
    ///
    /// With `wait` the call blocks until the GPU has executed them. A slot
    /// with nothing recorded submits nothing and its fence stays signaled.
    pub fn flush(&mut self, wait: bool) -> RhiResult<()> {
        let Some(closed) = self.state.close() else {
            return Ok(());
        };
        if !closed.submit {
            return Ok(());
        }

        let slot = &self.slots[closed.frame];
        slot.command_buffer.end()?;
        slot.fence.reset()?;

        let command_buffers = [slot.command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default().command_buffers(&command_buffers);
        // SAFETY: the buffer was fully recorded above and the fence was just
        // reset with no submission pending on it.
        unsafe { self.device.submit_graphics(&[submit_info], slot.fence.handle())? };

        debug!(
            "Lane '{}' flushed slot {}: {} transfer(s), {} bytes",
            self.name,
            closed.frame,
            self.state.pending().len(),
            self.state.ring().used()
        );

        if wait {
            slot.fence.wait(u64::MAX)?;
        }
        Ok(())
    }

    /// Flushes, waits for completion, and reopens the same slot with an
    /// empty region. Fallback for a payload that did not fit.
    pub fn flush_and_restart(&mut self) -> RhiResult<()> {
        let frame = self.state.restart_frame();
        self.flush(true)?;
        self.begin_frame(frame)?;
        debug!("Lane '{}' restarted slot {}", self.name, frame);
        Ok(())
    }

    /// Blocks until every slot's last upload has executed.
    pub fn wait_all(&self) -> RhiResult<()> {
        let fences: Vec<vk::Fence> = self.slots.iter().map(|s| s.fence.handle()).collect();
        sync::wait_for_fences(&self.device, &fences, u64::MAX)
    }

    /// Bytes still available in the recording slot's region.
    pub fn remaining(&self) -> u64 {
        self.state.remaining()
    }

    /// Bytes allocated in the recording slot's region so far.
    pub fn used(&self) -> u64 {
        self.state.used()
    }

    #[inline]
    pub fn per_frame_bytes(&self) -> u64 {
        self.state.ring().per_frame_bytes()
    }

    #[inline]
    pub fn name(&self) -> &'static str {
        self.name
    }

    fn recording_slot(&mut self) -> RhiResult<&UploadSlot> {
        let frame = self.state.record().ok_or_else(|| {
            RhiError::InvalidArgument(format!("lane '{}' is not recording", self.name))
        })?;
        Ok(&self.slots[frame])
    }
}
