//! Decoded triangle meshes.

use glam::{Vec2, Vec3};

use crate::error::{AssetError, AssetResult};

/// Per-vertex attribute arrays plus optional 32-bit indices.
///
/// An empty `indices` array describes a non-indexed triangle list.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct MeshData {
    pub positions: Vec<Vec3>,
    pub colors: Vec<Vec3>,
    pub tex_coords: Vec<Vec2>,
    pub indices: Vec<u32>,
}

impl MeshData {
    /// Checks attribute lengths, triangle counts and index bounds.
    pub fn validate(&self) -> AssetResult<()> {
        let count = self.positions.len();
        if count == 0 {
            return Err(AssetError::invalid("mesh", "no vertices"));
        }
        if self.colors.len() != count || self.tex_coords.len() != count {
            return Err(AssetError::invalid(
                "mesh",
                format!(
                    "attribute lengths differ: {} positions, {} colors, {} tex coords",
                    count,
                    self.colors.len(),
                    self.tex_coords.len()
                ),
            ));
        }

        if self.indices.is_empty() {
            if count % 3 != 0 {
                return Err(AssetError::invalid(
                    "mesh",
                    format!("{} vertices is not a whole number of triangles", count),
                ));
            }
            return Ok(());
        }

        if self.indices.len() % 3 != 0 {
            return Err(AssetError::invalid(
                "mesh",
                format!("{} indices is not a whole number of triangles", self.indices.len()),
            ));
        }
        if let Some(&bad) = self.indices.iter().find(|&&i| i as usize >= count) {
            return Err(AssetError::invalid(
                "mesh",
                format!("index {} out of range for {} vertices", bad, count),
            ));
        }
        Ok(())
    }

    #[inline]
    pub fn vertex_count(&self) -> u32 {
        self.positions.len() as u32
    }

    #[inline]
    pub fn index_count(&self) -> u32 {
        self.indices.len() as u32
    }

    #[inline]
    pub fn is_indexed(&self) -> bool {
        !self.indices.is_empty()
    }

    /// Axis-aligned bounds, or `None` for an empty mesh.
    pub fn bounds(&self) -> Option<(Vec3, Vec3)> {
        let first = *self.positions.first()?;
        Some(
            self.positions
                .iter()
                .fold((first, first), |(min, max), &p| (min.min(p), max.max(p))),
        )
    }

    /// Unit cube centered at the origin: 24 vertices (4 per face, so every
    /// face has its own UVs and color) and 36 indices, counter-clockwise.
    pub fn cube() -> Self {
        // (normal, up) per face; right = up x normal keeps CCW winding.
        let faces = [
            (Vec3::X, Vec3::Y),
            (Vec3::NEG_X, Vec3::Y),
            (Vec3::Y, Vec3::NEG_Z),
            (Vec3::NEG_Y, Vec3::Z),
            (Vec3::Z, Vec3::Y),
            (Vec3::NEG_Z, Vec3::Y),
        ];
        let corners = [
            (Vec2::new(-1.0, -1.0), Vec2::new(0.0, 1.0)),
            (Vec2::new(1.0, -1.0), Vec2::new(1.0, 1.0)),
            (Vec2::new(1.0, 1.0), Vec2::new(1.0, 0.0)),
            (Vec2::new(-1.0, 1.0), Vec2::new(0.0, 0.0)),
        ];

        let mut mesh = Self::default();
        for (face, (normal, up)) in faces.into_iter().enumerate() {
            let right = up.cross(normal);
            let color = normal.abs() * 0.5 + Vec3::splat(0.5);
            let base = (face * 4) as u32;

            for (corner, uv) in corners {
                mesh.positions
                    .push((normal + right * corner.x + up * corner.y) * 0.5);
                mesh.colors.push(color);
                mesh.tex_coords.push(uv);
            }
            mesh.indices
                .extend_from_slice(&[base, base + 1, base + 2, base + 2, base + 3, base]);
        }
        mesh
    }

    /// Non-indexed unit quad in the XY plane facing +Z.
    pub fn quad() -> Self {
        let corners = [
            (Vec3::new(-0.5, -0.5, 0.0), Vec2::new(0.0, 1.0)),
            (Vec3::new(0.5, -0.5, 0.0), Vec2::new(1.0, 1.0)),
            (Vec3::new(0.5, 0.5, 0.0), Vec2::new(1.0, 0.0)),
            (Vec3::new(-0.5, 0.5, 0.0), Vec2::new(0.0, 0.0)),
        ];
        let mut mesh = Self::default();
        for i in [0usize, 1, 2, 2, 3, 0] {
            mesh.positions.push(corners[i].0);
            mesh.colors.push(Vec3::ONE);
            mesh.tex_coords.push(corners[i].1);
        }
        mesh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cube_counts() {
        let cube = MeshData::cube();
        assert_eq!(cube.vertex_count(), 24);
        assert_eq!(cube.index_count(), 36);
        assert!(cube.is_indexed());
        assert!(cube.validate().is_ok());
    }

    #[test]
    fn test_cube_bounds() {
        let (min, max) = MeshData::cube().bounds().unwrap();
        assert!(min.abs_diff_eq(Vec3::splat(-0.5), 1e-6));
        assert!(max.abs_diff_eq(Vec3::splat(0.5), 1e-6));
    }

    #[test]
    fn test_cube_faces_wind_outward() {
        let cube = MeshData::cube();
        let center = Vec3::ZERO;
        for tri in cube.indices.chunks_exact(3) {
            let [a, b, c] = [0, 1, 2].map(|i| cube.positions[tri[i] as usize]);
            let normal = (b - a).cross(c - a);
            let centroid = (a + b + c) / 3.0;
            assert!(normal.dot(centroid - center) > 0.0);
        }
    }

    #[test]
    fn test_quad_is_non_indexed() {
        let quad = MeshData::quad();
        assert!(!quad.is_indexed());
        assert_eq!(quad.vertex_count(), 6);
        assert!(quad.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_out_of_range_index() {
        let mut mesh = MeshData::quad();
        mesh.indices = vec![0, 1, 6];
        assert!(matches!(mesh.validate(), Err(AssetError::InvalidData { .. })));
    }

    #[test]
    fn test_validate_rejects_mismatched_attributes() {
        let mut mesh = MeshData::quad();
        mesh.colors.pop();
        assert!(mesh.validate().is_err());
        assert!(MeshData::default().validate().is_err());
    }
}
