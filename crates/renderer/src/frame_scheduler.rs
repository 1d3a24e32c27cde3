//! Frame pipelining: N frame slots against M presentable images.
//!
//! A frame slot owns a command buffer, the semaphore acquisition signals and
//! a fence signaled when its submission completes. An image slot owns the
//! semaphore presentation waits on and remembers which frame slot rendered
//! into it last. The two index spaces are kept in separate arrays and never
//! mixed: N comes from configuration, M from the swapchain.
//!
//! ```text
//! begin_frame:  wait fence[f] -> acquire(image_available[f]) -> i
//!               wait fence[last_writer[i]] if it is another slot
//! submit:       reset fence[f] -> submit(wait image_available[f],
//!               signal render_finished[i], fence[f]) -> f = (f + 1) % N
//! present:      present(i, wait render_finished[i])
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::{debug, error, info, warn};

use frameflow_rhi::command::{CommandBuffer, CommandPool};
use frameflow_rhi::device::Device;
use frameflow_rhi::swapchain::Swapchain;
use frameflow_rhi::sync::{self, Fence, Semaphore};
use frameflow_rhi::{RhiError, RhiResult};

/// Outcome of acquisition or presentation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    Ok,
    /// Usable, but the swapchain no longer matches the surface exactly.
    Suboptimal,
    /// The swapchain must be recreated before the next frame.
    OutOfDate,
    /// Any other failure. Surfaced to callers as an `Err`.
    Error,
}

impl FrameStatus {
    /// Classifies an acquire or present result (`Ok(suboptimal)`).
    pub fn classify(result: Result<bool, vk::Result>) -> Self {
        match result {
            Ok(false) => FrameStatus::Ok,
            Ok(true) | Err(vk::Result::SUBOPTIMAL_KHR) => FrameStatus::Suboptimal,
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => FrameStatus::OutOfDate,
            Err(_) => FrameStatus::Error,
        }
    }

    /// Whether a frame can be recorded against the acquired image.
    #[inline]
    pub fn is_renderable(self) -> bool {
        matches!(self, FrameStatus::Ok | FrameStatus::Suboptimal)
    }
}

/// Which frame slot last submitted work that renders into each image.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ImageSlotTable {
    last_writer: Vec<Option<usize>>,
}

impl ImageSlotTable {
    pub fn new(image_count: usize) -> Self {
        Self {
            last_writer: vec![None; image_count],
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.last_writer.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.last_writer.is_empty()
    }

    pub fn last_writer(&self, image: usize) -> Option<usize> {
        self.last_writer.get(image).copied().flatten()
    }

    /// Records `frame` as the writer of `image`.
    ///
    /// Returns the previous writer when it is a different frame slot: its
    /// fence must be waited on before `frame` renders into the image. The
    /// caller has already waited on `frame`'s own fence.
    pub fn claim(&mut self, image: usize, frame: usize) -> Option<usize> {
        let slot = self.last_writer.get_mut(image)?;
        let previous = slot.replace(frame);
        previous.filter(|&prev| prev != frame)
    }

    /// Drops all records and resizes for a recreated swapchain.
    pub fn reset(&mut self, image_count: usize) {
        self.last_writer.clear();
        self.last_writer.resize(image_count, None);
    }
}

struct FrameSlot {
    // Field order is drop order: the buffer is freed with its pool.
    command_buffer: CommandBuffer,
    _command_pool: CommandPool,
    image_available: Semaphore,
    in_flight: Fence,
}

impl FrameSlot {
    fn new(device: &Arc<Device>) -> RhiResult<Self> {
        let command_pool = CommandPool::new(device.clone(), device.graphics_family())?;
        let command_buffer = CommandBuffer::new(device.clone(), &command_pool)?;
        Ok(Self {
            command_buffer,
            _command_pool: command_pool,
            image_available: Semaphore::new(device.clone())?,
            in_flight: Fence::new(device.clone(), true)?,
        })
    }
}

struct ImageSlot {
    render_finished: Semaphore,
}

/// Drives acquisition, submission and presentation for N frames in flight.
///
/// Single-threaded: the render thread owns it exclusively.
pub struct FrameScheduler {
    device: Arc<Device>,
    frames: Vec<FrameSlot>,
    images: Vec<ImageSlot>,
    image_table: ImageSlotTable,
    current_frame: usize,
    submitted_frames: u64,
}

impl FrameScheduler {
    /// Creates `frames_in_flight` frame slots and `image_count` image slots.
    pub fn new(device: Arc<Device>, frames_in_flight: usize, image_count: u32) -> RhiResult<Self> {
        if frames_in_flight == 0 {
            return Err(RhiError::InvalidArgument(
                "frames_in_flight must be at least 1".to_string(),
            ));
        }

        let frames = (0..frames_in_flight)
            .map(|_| FrameSlot::new(&device))
            .collect::<RhiResult<Vec<_>>>()?;
        let images = Self::create_image_slots(&device, image_count)?;

        info!(
            "Frame scheduler created: {} frame slot(s), {} image slot(s)",
            frames_in_flight, image_count
        );

        Ok(Self {
            device,
            frames,
            images,
            image_table: ImageSlotTable::new(image_count as usize),
            current_frame: 0,
            submitted_frames: 0,
        })
    }

    fn create_image_slots(device: &Arc<Device>, image_count: u32) -> RhiResult<Vec<ImageSlot>> {
        (0..image_count)
            .map(|_| {
                Ok(ImageSlot {
                    render_finished: Semaphore::new(device.clone())?,
                })
            })
            .collect()
    }

    /// Waits for the current slot's previous submission, then acquires the
    /// next image.
    ///
    /// On `Ok`/`Suboptimal` the slot's command buffer has been reset and
    /// begun. On `OutOfDate` nothing was acquired and the returned index is
    /// meaningless; the slot's fence stays signaled.
    ///
    /// # Errors
    ///
    /// [`RhiError::Timeout`] if no image became available within `timeout`
    /// nanoseconds, or the underlying Vulkan error for any other failure.
    pub fn begin_frame(&mut self, swapchain: &Swapchain, timeout: u64) -> RhiResult<(u32, FrameStatus)> {
        let frame = &self.frames[self.current_frame];
        frame.in_flight.wait(u64::MAX)?;

        let acquired = swapchain.acquire_next_image(frame.image_available.handle(), timeout);
        let image_index = match acquired {
            Ok((index, _)) => index,
            Err(vk::Result::TIMEOUT | vk::Result::NOT_READY) => {
                warn!("Image acquisition timed out after {} ns", timeout);
                return Err(RhiError::Timeout(timeout));
            }
            Err(e) => {
                return match FrameStatus::classify(Err(e)) {
                    FrameStatus::OutOfDate => {
                        debug!("Swapchain out of date during acquire");
                        Ok((0, FrameStatus::OutOfDate))
                    }
                    _ => {
                        error!("Image acquisition failed: {}", e);
                        Err(RhiError::VulkanError(e))
                    }
                };
            }
        };
        let status = FrameStatus::classify(acquired.map(|(_, suboptimal)| suboptimal));

        if let Some(previous) = self
            .image_table
            .claim(image_index as usize, self.current_frame)
        {
            debug!(
                "Image {} still owned by frame slot {}, waiting",
                image_index, previous
            );
            self.frames[previous].in_flight.wait(u64::MAX)?;
        }

        let frame = &self.frames[self.current_frame];
        frame.command_buffer.reset()?;
        frame.command_buffer.begin()?;

        Ok((image_index, status))
    }

    /// Command buffer of the current frame slot.
    #[inline]
    pub fn command_buffer(&self) -> &CommandBuffer {
        &self.frames[self.current_frame].command_buffer
    }

    /// Ends the current slot's command buffer and submits it to `queue`.
    ///
    /// Waits on the slot's acquisition semaphore at `wait_stage`, signals the
    /// image's render-finished semaphore and the slot's fence, then advances
    /// to the next frame slot. The fence is reset only here, right before the
    /// submit.
    pub fn submit(
        &mut self,
        queue: vk::Queue,
        image_index: u32,
        wait_stage: vk::PipelineStageFlags,
    ) -> RhiResult<()> {
        let image = self.images.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!(
                "image index {} out of range ({} images)",
                image_index,
                self.images.len()
            ))
        })?;
        let frame = &self.frames[self.current_frame];

        frame.command_buffer.end()?;

        let wait_semaphores = [frame.image_available.handle()];
        let wait_stages = [wait_stage];
        let signal_semaphores = [image.render_finished.handle()];
        let command_buffers = [frame.command_buffer.handle()];
        let submit_info = vk::SubmitInfo::default()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        frame.in_flight.reset()?;
        unsafe {
            self.device
                .handle()
                .queue_submit(queue, &[submit_info], frame.in_flight.handle())?;
        }

        self.submitted_frames += 1;
        self.current_frame = (self.current_frame + 1) % self.frames.len();
        Ok(())
    }

    /// Presents `image_index` once its render-finished semaphore signals.
    pub fn present(
        &self,
        queue: vk::Queue,
        swapchain: &Swapchain,
        image_index: u32,
    ) -> RhiResult<FrameStatus> {
        let image = self.images.get(image_index as usize).ok_or_else(|| {
            RhiError::InvalidArgument(format!("image index {} out of range", image_index))
        })?;

        let result = swapchain.present(queue, image_index, image.render_finished.handle());
        match FrameStatus::classify(result) {
            FrameStatus::Error => {
                let code = result.err().unwrap_or(vk::Result::ERROR_UNKNOWN);
                error!("Present failed: {}", code);
                Err(RhiError::VulkanError(code))
            }
            status => {
                if status != FrameStatus::Ok {
                    debug!("Present returned {:?}", status);
                }
                Ok(status)
            }
        }
    }

    /// Rebuilds the per-image state for a recreated swapchain.
    ///
    /// Frame slots are untouched. The device must be idle.
    pub fn on_surface_recreated(&mut self, image_count: u32) -> RhiResult<()> {
        self.images = Self::create_image_slots(&self.device, image_count)?;
        self.image_table.reset(image_count as usize);
        debug!("Image slots rebuilt for {} images", image_count);
        Ok(())
    }

    /// Blocks until every frame slot's last submission has completed.
    pub fn wait_all(&self) -> RhiResult<()> {
        let fences: Vec<vk::Fence> = self.frames.iter().map(|f| f.in_flight.handle()).collect();
        sync::wait_for_fences(&self.device, &fences, u64::MAX)
    }

    /// Frame slot the next `begin_frame` will use.
    #[inline]
    pub fn current_frame_index(&self) -> usize {
        self.current_frame
    }

    #[inline]
    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Total number of frames submitted so far.
    #[inline]
    pub fn submitted_frames(&self) -> u64 {
        self.submitted_frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_results() {
        assert_eq!(FrameStatus::classify(Ok(false)), FrameStatus::Ok);
        assert_eq!(FrameStatus::classify(Ok(true)), FrameStatus::Suboptimal);
        assert_eq!(
            FrameStatus::classify(Err(vk::Result::SUBOPTIMAL_KHR)),
            FrameStatus::Suboptimal
        );
        assert_eq!(
            FrameStatus::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR)),
            FrameStatus::OutOfDate
        );
        assert_eq!(
            FrameStatus::classify(Err(vk::Result::ERROR_DEVICE_LOST)),
            FrameStatus::Error
        );
    }

    #[test]
    fn test_renderable_statuses() {
        assert!(FrameStatus::Ok.is_renderable());
        assert!(FrameStatus::Suboptimal.is_renderable());
        assert!(!FrameStatus::OutOfDate.is_renderable());
        assert!(!FrameStatus::Error.is_renderable());
    }

    #[test]
    fn test_claim_reports_other_writer() {
        let mut table = ImageSlotTable::new(3);
        assert_eq!(table.claim(0, 0), None);
        assert_eq!(table.claim(1, 1), None);
        // Image 0 comes back while frame slot 1 is recording.
        assert_eq!(table.claim(0, 1), Some(0));
        assert_eq!(table.last_writer(0), Some(1));
    }

    #[test]
    fn test_claim_by_same_slot_needs_no_extra_wait() {
        let mut table = ImageSlotTable::new(2);
        table.claim(1, 0);
        assert_eq!(table.claim(1, 0), None);
    }

    #[test]
    fn test_claim_out_of_range_is_ignored() {
        let mut table = ImageSlotTable::new(2);
        assert_eq!(table.claim(5, 0), None);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_reset_resizes_and_forgets() {
        let mut table = ImageSlotTable::new(2);
        table.claim(0, 1);
        table.reset(4);
        assert_eq!(table.len(), 4);
        assert!((0..4).all(|i| table.last_writer(i).is_none()));
    }

    #[test]
    fn test_frame_scheduler_is_send() {
        fn assert_send<T: Send>() {}
        assert_send::<FrameScheduler>();
    }
}
