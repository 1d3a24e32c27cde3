//! The demo scene: a grid of spinning cubes and a textured floor.

use glam::{Mat4, Quat, Vec3, Vec4};

use frameflow_assets::{AssetResult, ImageData, MeshData};
use frameflow_renderer::{
    CameraUbo, DrawItem, MaterialId, MaterialParams, MeshHandle, RenderResult, Renderer,
};

/// Cubes per side of the grid.
pub const GRID_SIZE: u32 = 24;
const SPACING: f32 = 2.5;

const PALETTE: [Vec4; 4] = [
    Vec4::new(0.90, 0.30, 0.25, 1.0),
    Vec4::new(0.25, 0.70, 0.35, 1.0),
    Vec4::new(0.25, 0.45, 0.90, 1.0),
    Vec4::new(0.95, 0.80, 0.30, 1.0),
];

pub struct DemoScene {
    cube: MeshHandle,
    floor: MeshHandle,
    floor_material: MaterialId,
    colors: Vec<MaterialId>,
    items: Vec<DrawItem>,
}

impl DemoScene {
    /// Uploads the demo's meshes, texture and materials.
    pub fn new(renderer: &mut Renderer) -> RenderResult<Self> {
        let cube = renderer.create_mesh(&MeshData::cube())?;
        let floor = renderer.create_mesh(&MeshData::quad())?;

        let checker = renderer.create_texture_from_image(&checkerboard(256, 32)?)?;
        let floor_material =
            renderer.create_material_from_texture(checker, MaterialParams::default())?;

        let colors = PALETTE
            .iter()
            .map(|&color| renderer.create_material_from_factor(MaterialParams::from_color(color)))
            .collect::<RenderResult<Vec<_>>>()?;

        let resources = renderer.resources();
        tracing::info!(
            "Demo scene ready: {} cubes ({} meshes, {} textures, {} materials)",
            GRID_SIZE * GRID_SIZE,
            resources.mesh_count(),
            resources.texture_count(),
            resources.material_count()
        );

        Ok(Self {
            cube,
            floor,
            floor_material,
            colors,
            items: Vec::new(),
        })
    }

    /// Draw items at `time` seconds.
    pub fn update(&mut self, time: f32) -> &[DrawItem] {
        self.items.clear();

        let half = (GRID_SIZE as f32 - 1.0) * SPACING * 0.5;
        self.items.push(
            DrawItem::new(self.floor, floor_transform(half + SPACING))
                .with_material(self.floor_material),
        );

        for (i, model) in grid_transforms(GRID_SIZE, SPACING, time).enumerate() {
            let material = self.colors[i % self.colors.len()];
            self.items
                .push(DrawItem::new(self.cube, model).with_material(material));
        }

        &self.items
    }
}

/// Model matrices of a `size` x `size` grid of cubes centered on the
/// origin, each spinning at its own rate.
pub fn grid_transforms(size: u32, spacing: f32, time: f32) -> impl Iterator<Item = Mat4> {
    let half = (size as f32 - 1.0) * spacing * 0.5;
    (0..size * size).map(move |i| {
        let (x, z) = ((i % size) as f32, (i / size) as f32);
        let position = Vec3::new(x * spacing - half, 0.0, z * spacing - half);
        let rate = 0.5 + (i % 7) as f32 * 0.15;
        let rotation = Quat::from_euler(glam::EulerRot::YXZ, time * rate, time * rate * 0.5, 0.0);
        Mat4::from_rotation_translation(rotation, position)
    })
}

fn floor_transform(half_extent: f32) -> Mat4 {
    // The unit quad lies in XY facing +Z; lay it flat facing up.
    let size = half_extent * 2.0;
    Mat4::from_translation(Vec3::new(0.0, -1.5, 0.0))
        * Mat4::from_rotation_x(-std::f32::consts::FRAC_PI_2)
        * Mat4::from_scale(Vec3::new(size, size, 1.0))
}

/// Camera orbiting the origin at `time` seconds.
pub fn orbit_camera(time: f32, aspect: f32) -> CameraUbo {
    let radius = GRID_SIZE as f32 * SPACING * 0.9;
    let eye = Vec3::new(
        radius * (time * 0.1).cos(),
        radius * 0.45,
        radius * (time * 0.1).sin(),
    );
    let view = Mat4::look_at_rh(eye, Vec3::ZERO, Vec3::Y);
    let projection = Mat4::perspective_rh(45f32.to_radians(), aspect, 0.1, radius * 4.0);
    CameraUbo::new(view, projection)
}

/// Grey and white checkerboard with `cell`-pixel squares.
pub fn checkerboard(size: u32, cell: u32) -> AssetResult<ImageData> {
    let cell = cell.max(1);
    let mut pixels = Vec::with_capacity((size * size * 4) as usize);
    for y in 0..size {
        for x in 0..size {
            let value = if ((x / cell) + (y / cell)) % 2 == 0 { 235 } else { 90 };
            pixels.extend_from_slice(&[value, value, value, 255]);
        }
    }
    ImageData::new(size, size, pixels)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_grid_is_centered() {
        let transforms: Vec<Mat4> = grid_transforms(3, 2.0, 0.0).collect();
        assert_eq!(transforms.len(), 9);

        let center = transforms[4].w_axis.truncate();
        assert!(center.length() < 1e-5);
        let corner = transforms[0].w_axis.truncate();
        assert_eq!(corner, Vec3::new(-2.0, 0.0, -2.0));
    }

    #[test]
    fn test_checkerboard_cells() {
        let image = checkerboard(4, 2).unwrap();
        assert_eq!(image.width(), 4);
        assert_eq!(image.pixels().len(), 64);
        // (0,0) and (2,0) sit in different cells.
        assert_eq!(image.pixels()[0], 235);
        assert_eq!(image.pixels()[2 * 4], 90);
    }

    #[test]
    fn test_orbit_camera_projection() {
        let camera = orbit_camera(0.0, 16.0 / 9.0);
        assert_eq!(camera.view_projection, camera.projection * camera.view);
    }
}
