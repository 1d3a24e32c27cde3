//! Material table records and material resolution.

use bytemuck::{Pod, Zeroable};
use glam::{Vec3, Vec4};
use tracing::warn;

use crate::arena::Handle;

#[doc(hidden)]
pub enum MaterialTag {}

/// Index of a material: both its arena slot and its row in the GPU table.
pub type MaterialId = Handle<MaterialTag>;

/// The material created at construction, used when nothing else applies.
pub const DEFAULT_MATERIAL: MaterialId = MaterialId::from_index(0);

/// One row of the material table (set 0, binding 2).
///
/// The layout is fixed because shaders index the table by material id:
/// - Offset 0: base color (vec4)
/// - Offset 16: emissive (vec4, w unused)
/// - Offset 32: texture index, metallic, roughness, flags
/// - Total size: 48 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct MaterialRecord {
    pub base_color: [f32; 4],
    pub emissive: [f32; 4],
    pub texture_index: u32,
    pub metallic: f32,
    pub roughness: f32,
    pub flags: u32,
}

impl MaterialRecord {
    pub const SIZE: u64 = std::mem::size_of::<Self>() as u64;

    /// Set when the material samples its own texture rather than the default.
    pub const FLAG_TEXTURED: u32 = 1;

    pub fn new(params: &MaterialParams, texture_index: u32, textured: bool) -> Self {
        Self {
            base_color: params.base_color.to_array(),
            emissive: params.emissive.extend(0.0).to_array(),
            texture_index,
            metallic: params.metallic,
            roughness: params.roughness,
            flags: if textured { Self::FLAG_TEXTURED } else { 0 },
        }
    }
}

/// Scalar factors of a material.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MaterialParams {
    pub base_color: Vec4,
    pub emissive: Vec3,
    pub metallic: f32,
    pub roughness: f32,
}

impl Default for MaterialParams {
    fn default() -> Self {
        Self {
            base_color: Vec4::ONE,
            emissive: Vec3::ZERO,
            metallic: 0.0,
            roughness: 1.0,
        }
    }
}

impl MaterialParams {
    pub fn from_color(base_color: Vec4) -> Self {
        Self {
            base_color,
            ..Default::default()
        }
    }
}

/// Resolves which material a draw uses: override, then active, then default.
#[derive(Clone, Copy, Debug, Default)]
pub struct MaterialResolver {
    active: Option<MaterialId>,
}

impl MaterialResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_active(&mut self, active: Option<MaterialId>) {
        self.active = active;
    }

    /// `material_count` is the number of existing materials; ids at or past
    /// it are ignored with a warning.
    pub fn resolve(&self, override_id: Option<MaterialId>, material_count: u32) -> MaterialId {
        let exists = |id: MaterialId| id.index() < material_count;

        if let Some(id) = override_id {
            if exists(id) {
                return id;
            }
            warn!("Ignoring material override {:?}: no such material", id);
        }
        match self.active {
            Some(id) if exists(id) => id,
            Some(id) => {
                warn!("Active material {:?} does not exist, using default", id);
                DEFAULT_MATERIAL
            }
            None => DEFAULT_MATERIAL,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::offset_of;

    #[test]
    fn test_record_layout() {
        assert_eq!(MaterialRecord::SIZE, 48);
        assert_eq!(offset_of!(MaterialRecord, base_color), 0);
        assert_eq!(offset_of!(MaterialRecord, emissive), 16);
        assert_eq!(offset_of!(MaterialRecord, texture_index), 32);
        assert_eq!(offset_of!(MaterialRecord, metallic), 36);
        assert_eq!(offset_of!(MaterialRecord, roughness), 40);
        assert_eq!(offset_of!(MaterialRecord, flags), 44);
    }

    #[test]
    fn test_record_from_params() {
        let params = MaterialParams {
            base_color: Vec4::new(1.0, 0.5, 0.25, 1.0),
            emissive: Vec3::new(0.1, 0.2, 0.3),
            metallic: 0.7,
            roughness: 0.2,
        };
        let record = MaterialRecord::new(&params, 4, true);
        assert_eq!(record.base_color, [1.0, 0.5, 0.25, 1.0]);
        assert_eq!(record.emissive, [0.1, 0.2, 0.3, 0.0]);
        assert_eq!(record.texture_index, 4);
        assert_eq!(record.flags & MaterialRecord::FLAG_TEXTURED, 1);
    }

    #[test]
    fn test_resolve_without_override_or_active_is_default() {
        let resolver = MaterialResolver::new();
        assert_eq!(resolver.resolve(None, 1), DEFAULT_MATERIAL);
        assert_eq!(DEFAULT_MATERIAL.index(), 0);
    }

    #[test]
    fn test_resolve_priority() {
        let mut resolver = MaterialResolver::new();
        resolver.set_active(Some(MaterialId::from_index(2)));

        assert_eq!(resolver.resolve(None, 4).index(), 2);
        assert_eq!(resolver.resolve(Some(MaterialId::from_index(3)), 4).index(), 3);
    }

    #[test]
    fn test_resolve_ignores_unknown_ids() {
        let mut resolver = MaterialResolver::new();
        resolver.set_active(Some(MaterialId::from_index(1)));
        // Unknown override falls through to the active material.
        assert_eq!(resolver.resolve(Some(MaterialId::from_index(9)), 2).index(), 1);
        // Unknown active material falls through to the default.
        assert_eq!(resolver.resolve(None, 1), DEFAULT_MATERIAL);
    }
}
