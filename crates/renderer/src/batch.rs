//! Grouping of draw items into instanced draws.

use std::collections::HashMap;

use glam::Mat4;

use crate::material::MaterialId;
use crate::resources::MeshHandle;

/// One object to draw this frame.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DrawItem {
    pub mesh: MeshHandle,
    /// `None` draws with the active material, or the default one.
    pub material: Option<MaterialId>,
    pub model: Mat4,
}

impl DrawItem {
    pub fn new(mesh: MeshHandle, model: Mat4) -> Self {
        Self {
            mesh,
            material: None,
            model,
        }
    }

    pub fn with_material(mut self, material: MaterialId) -> Self {
        self.material = Some(material);
        self
    }
}

/// Items sharing a mesh and a resolved material, drawn as one instanced call.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawBatch {
    pub mesh: MeshHandle,
    pub material: MaterialId,
    pub models: Vec<Mat4>,
}

/// Groups `items` by `(mesh, resolved material)`.
///
/// Batches come out in the order their key was first seen, and transforms
/// keep their submission order inside a batch. `resolve` runs once per
/// distinct requested material, not once per item.
pub fn build_batches<F>(items: &[DrawItem], mut resolve: F) -> Vec<DrawBatch>
where
    F: FnMut(Option<MaterialId>) -> MaterialId,
{
    let mut batches: Vec<DrawBatch> = Vec::new();
    let mut index: HashMap<(MeshHandle, MaterialId), usize> = HashMap::new();
    let mut resolved: HashMap<Option<MaterialId>, MaterialId> = HashMap::new();

    for item in items {
        let material = *resolved
            .entry(item.material)
            .or_insert_with(|| resolve(item.material));
        let slot = *index.entry((item.mesh, material)).or_insert_with(|| {
            batches.push(DrawBatch {
                mesh: item.mesh,
                material,
                models: Vec::new(),
            });
            batches.len() - 1
        });
        batches[slot].models.push(item.model);
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::material::DEFAULT_MATERIAL;
    use glam::Vec3;

    fn translation(x: f32) -> Mat4 {
        Mat4::from_translation(Vec3::new(x, 0.0, 0.0))
    }

    #[test]
    fn test_groups_by_mesh_and_material() {
        let cube = MeshHandle::from_index(0);
        let quad = MeshHandle::from_index(1);
        let red = MaterialId::from_index(3);

        let items = [
            DrawItem::new(cube, translation(0.0)),
            DrawItem::new(quad, translation(1.0)),
            DrawItem::new(cube, translation(2.0)).with_material(red),
            DrawItem::new(cube, translation(3.0)),
        ];
        let batches = build_batches(&items, |m| m.unwrap_or(DEFAULT_MATERIAL));

        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].mesh, cube);
        assert_eq!(batches[0].material, DEFAULT_MATERIAL);
        assert_eq!(batches[0].models, vec![translation(0.0), translation(3.0)]);
        assert_eq!(batches[1].mesh, quad);
        assert_eq!(batches[2].material, red);
        assert_eq!(batches[2].models.len(), 1);
    }

    #[test]
    fn test_override_resolving_to_same_id_merges() {
        let cube = MeshHandle::from_index(0);
        let items = [
            DrawItem::new(cube, Mat4::IDENTITY),
            DrawItem::new(cube, Mat4::IDENTITY).with_material(DEFAULT_MATERIAL),
        ];
        let batches = build_batches(&items, |m| m.unwrap_or(DEFAULT_MATERIAL));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].models.len(), 2);
    }

    #[test]
    fn test_resolver_called_once_per_distinct_material() {
        let cube = MeshHandle::from_index(0);
        let quad = MeshHandle::from_index(1);
        let stale = MaterialId::from_index(99);
        let mut items = vec![DrawItem::new(cube, Mat4::IDENTITY); 5];
        items.extend(vec![DrawItem::new(cube, Mat4::IDENTITY).with_material(stale); 576]);
        items.push(DrawItem::new(quad, Mat4::IDENTITY).with_material(stale));

        let mut calls = Vec::new();
        let batches = build_batches(&items, |m| {
            calls.push(m);
            DEFAULT_MATERIAL
        });

        // The stale override is resolved (and would warn) once per frame.
        assert_eq!(calls, vec![None, Some(stale)]);
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].models.len(), 581);
    }

    #[test]
    fn test_empty_items() {
        assert!(build_batches(&[], |m| m.unwrap_or(DEFAULT_MATERIAL)).is_empty());
    }
}
