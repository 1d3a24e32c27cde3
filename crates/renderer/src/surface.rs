//! Surface size and recreation policy.

use ash::vk;

use crate::frame_scheduler::FrameStatus;

/// Tracks the window extent against the swapchain extent and decides when
/// surface-dependent state must be rebuilt.
#[derive(Clone, Debug)]
pub struct SurfaceTracker {
    current: vk::Extent2D,
    pending: Option<vk::Extent2D>,
    suspended: bool,
    recreate_on_suboptimal: bool,
    recreations: u64,
}

impl SurfaceTracker {
    pub fn new(extent: vk::Extent2D, recreate_on_suboptimal: bool) -> Self {
        Self {
            current: extent,
            pending: None,
            suspended: extent.width == 0 || extent.height == 0,
            recreate_on_suboptimal,
            recreations: 0,
        }
    }

    /// Records a new window size. A zero dimension suspends drawing until a
    /// non-zero size arrives.
    pub fn request_resize(&mut self, width: u32, height: u32) {
        if width == 0 || height == 0 {
            self.suspended = true;
            return;
        }
        self.suspended = false;
        let extent = vk::Extent2D { width, height };
        self.pending = (extent != self.current).then_some(extent);
    }

    #[inline]
    pub fn is_suspended(&self) -> bool {
        self.suspended
    }

    /// Whether a resize is waiting to be applied.
    #[inline]
    pub fn has_pending_resize(&self) -> bool {
        !self.suspended && self.pending.is_some()
    }

    /// Whether `status` (from acquire or present) calls for recreation.
    pub fn needs_recreate(&self, status: FrameStatus) -> bool {
        if self.suspended {
            return false;
        }
        match status {
            FrameStatus::OutOfDate => true,
            FrameStatus::Suboptimal => self.recreate_on_suboptimal,
            FrameStatus::Ok => self.pending.is_some(),
            FrameStatus::Error => false,
        }
    }

    /// Extent to request from the swapchain.
    pub fn target_extent(&self) -> vk::Extent2D {
        self.pending.unwrap_or(self.current)
    }

    /// Records the extent the swapchain was actually rebuilt with.
    pub fn mark_recreated(&mut self, extent: vk::Extent2D) {
        self.current = extent;
        self.pending = None;
        self.recreations += 1;
    }

    /// Extent of the live swapchain.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.current
    }

    #[inline]
    pub fn recreations(&self) -> u64 {
        self.recreations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_out_of_date_always_recreates() {
        let tracker = SurfaceTracker::new(extent(800, 600), false);
        assert!(tracker.needs_recreate(FrameStatus::OutOfDate));
        assert!(!tracker.needs_recreate(FrameStatus::Ok));
        assert!(!tracker.needs_recreate(FrameStatus::Error));
    }

    #[test]
    fn test_suboptimal_follows_policy() {
        assert!(SurfaceTracker::new(extent(800, 600), true).needs_recreate(FrameStatus::Suboptimal));
        assert!(!SurfaceTracker::new(extent(800, 600), false).needs_recreate(FrameStatus::Suboptimal));
    }

    #[test]
    fn test_resize_pending_until_recreated() {
        let mut tracker = SurfaceTracker::new(extent(800, 600), true);
        tracker.request_resize(1024, 768);
        assert!(tracker.has_pending_resize());
        assert!(tracker.needs_recreate(FrameStatus::Ok));
        assert_eq!(tracker.target_extent(), extent(1024, 768));

        tracker.mark_recreated(extent(1024, 768));
        assert!(!tracker.has_pending_resize());
        assert_eq!(tracker.extent(), extent(1024, 768));
        assert_eq!(tracker.recreations(), 1);
    }

    #[test]
    fn test_resize_to_current_size_is_ignored() {
        let mut tracker = SurfaceTracker::new(extent(800, 600), true);
        tracker.request_resize(800, 600);
        assert!(!tracker.has_pending_resize());
    }

    #[test]
    fn test_zero_size_suspends() {
        let mut tracker = SurfaceTracker::new(extent(800, 600), true);
        tracker.request_resize(0, 600);
        assert!(tracker.is_suspended());
        assert!(!tracker.needs_recreate(FrameStatus::OutOfDate));

        tracker.request_resize(640, 480);
        assert!(!tracker.is_suspended());
        assert!(tracker.has_pending_resize());
    }

    #[test]
    fn test_starts_suspended_on_zero_extent() {
        assert!(SurfaceTracker::new(extent(0, 0), true).is_suspended());
    }
}
