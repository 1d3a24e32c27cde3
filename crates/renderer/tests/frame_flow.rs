//! End-to-end checks of the frame bookkeeping that needs no GPU.

use ash::vk;
use glam::{Mat4, Vec3, Vec4};

use frameflow_assets::MeshData;
use frameflow_renderer::depth_buffer::{DEFAULT_DEPTH_FORMAT, DepthTarget};
use frameflow_renderer::frame_scheduler::{FrameStatus, ImageSlotTable};
use frameflow_renderer::material::{MaterialRecord, MaterialResolver};
use frameflow_renderer::scene_data::{InstanceCursor, compute_instance_frame_stride};
use frameflow_renderer::staging::StagingRing;
use frameflow_renderer::{
    DEFAULT_MATERIAL, DrawItem, MaterialId, MaterialParams, MeshHandle, MeshLayout,
    SurfaceTracker, build_batches,
};

const KIB: u64 = 1024;
const MIB: u64 = 1024 * KIB;

fn extent(width: u32, height: u32) -> vk::Extent2D {
    vk::Extent2D { width, height }
}

#[test]
fn test_cube_mesh_reports_indexed_counts() {
    let layout = MeshLayout::from(&MeshData::cube());
    assert_eq!(layout.vertex_count, 24);
    assert_eq!(layout.index_count, 36);
    assert!(layout.indexed());
}

#[test]
fn test_staging_budget_per_frame() {
    let mut ring = StagingRing::new(2, MIB);
    ring.begin(0);
    assert!(ring.alloc(512 * KIB, 16).is_some());
    assert!(ring.alloc(600 * KIB, 16).is_none());

    // The next slot starts with a full budget in its own region.
    ring.begin(1);
    let alloc = ring.alloc(600 * KIB, 16).unwrap();
    assert!(alloc.offset >= MIB);
    assert!(alloc.offset + alloc.size <= 2 * MIB);
}

#[test]
fn test_out_of_date_surface_recovers_with_new_extent() {
    let mut tracker = SurfaceTracker::new(extent(1280, 720), true);
    let mut images = ImageSlotTable::new(3);
    images.claim(0, 0);
    images.claim(1, 1);

    // The window shrinks; the next acquire reports the swapchain stale.
    tracker.request_resize(800, 600);
    let status = FrameStatus::classify(Err(vk::Result::ERROR_OUT_OF_DATE_KHR));
    assert_eq!(status, FrameStatus::OutOfDate);
    assert!(!status.is_renderable());
    assert!(tracker.needs_recreate(status));

    // Recreation rebuilds the per-image table for the new image count and
    // sizes the depth target from the new swapchain extent.
    let old_depth = DepthTarget::for_swapchain(tracker.extent());
    let new_extent = tracker.target_extent();
    images.reset(4);
    tracker.mark_recreated(new_extent);

    assert_eq!(tracker.extent(), extent(800, 600));
    assert_eq!(images.len(), 4);
    assert_eq!(images.last_writer(0), None);

    assert!(!old_depth.matches(tracker.extent()));
    let depth = DepthTarget::for_swapchain(tracker.extent());
    assert_eq!(depth.extent, extent(800, 600));
    assert_eq!(depth.format, DEFAULT_DEPTH_FORMAT);

    let status = FrameStatus::classify(Ok(false));
    assert!(status.is_renderable());
    assert!(!tracker.needs_recreate(status));
}

#[test]
fn test_default_material_without_override_or_active() {
    let resolver = MaterialResolver::new();
    assert_eq!(resolver.resolve(None, 1), DEFAULT_MATERIAL);
    assert_eq!(DEFAULT_MATERIAL.index(), 0);
}

#[test]
fn test_material_priority_chain() {
    let mut resolver = MaterialResolver::new();
    let active = MaterialId::from_index(2);
    let special = MaterialId::from_index(4);
    resolver.set_active(Some(active));

    assert_eq!(resolver.resolve(None, 5), active);
    assert_eq!(resolver.resolve(Some(special), 5), special);
    // A stale override falls through to the active material.
    assert_eq!(resolver.resolve(Some(MaterialId::from_index(9)), 5), active);
}

#[test]
fn test_frames_wait_on_previous_image_writer() {
    // Two frame slots cycling over three images.
    let mut images = ImageSlotTable::new(3);
    let acquired = [0usize, 1, 2, 0, 1, 2];
    let mut waits = Vec::new();
    for (n, &image) in acquired.iter().enumerate() {
        let frame = n % 2;
        waits.push(images.claim(image, frame));
    }
    assert_eq!(waits, vec![None, None, None, Some(0), Some(1), Some(0)]);
}

#[test]
fn test_batches_feed_instance_slices() {
    let layout = compute_instance_frame_stride(8, 64, 1 << 20, 256).unwrap();
    let mut cursor = InstanceCursor::new(layout.capacity);

    let cube = MeshHandle::from_index(1);
    let red = MaterialId::from_index(1);
    let items: Vec<DrawItem> = (0..10)
        .map(|i| {
            let item = DrawItem::new(cube, Mat4::from_translation(Vec3::splat(i as f32)));
            if i % 2 == 0 { item.with_material(red) } else { item }
        })
        .collect();

    let batches = build_batches(&items, |m| m.unwrap_or(DEFAULT_MATERIAL));
    assert_eq!(batches.len(), 2);

    let first = cursor.reserve(batches[0].models.len());
    let second = cursor.reserve(batches[1].models.len());
    assert_eq!(first, (0, 5));
    // Only three slots remain: the tail of the second batch is dropped.
    assert_eq!(second, (5, 3));
    assert_eq!(cursor.remaining(), 0);
}

#[test]
fn test_material_record_layout_is_stable() {
    let record = MaterialRecord::new(
        &MaterialParams::from_color(Vec4::new(1.0, 0.0, 0.0, 1.0)),
        3,
        true,
    );
    assert_eq!(MaterialRecord::SIZE, 48);
    let bytes = bytemuck::bytes_of(&record);
    assert_eq!(&bytes[0..4], &1.0f32.to_ne_bytes());
    assert_eq!(&bytes[32..36], &3u32.to_ne_bytes());
    assert_eq!(&bytes[44..48], &MaterialRecord::FLAG_TEXTURED.to_ne_bytes());
}
