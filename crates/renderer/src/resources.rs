//! Device-resident meshes, textures and materials.
//!
//! Everything is append-only: a handle, once returned, names the same
//! resource until the store is dropped. Creation records its uploads on the
//! static staging lane; the data becomes visible to draws submitted after
//! that lane's next flush.

use std::path::Path;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, info, warn};

use frameflow_assets::{ImageData, MeshData};
use frameflow_rhi::RhiError;
use frameflow_rhi::buffer::{Buffer, BufferUsage};
use frameflow_rhi::descriptor::{
    self, DescriptorPool, DescriptorSetLayout, layout_binding, pool_sizes_for,
};
use frameflow_rhi::device::Device;
use frameflow_rhi::image::{Image, ImageKind, TEXTURE_FORMAT};
use frameflow_rhi::sampler::Sampler;
use frameflow_rhi::vertex::Vertex;

use crate::arena::{Arena, Handle};
use crate::error::{RenderError, RenderResult};
use crate::material::{
    DEFAULT_MATERIAL, MaterialId, MaterialParams, MaterialRecord, MaterialResolver,
};
use crate::staging::StagingUploader;

#[doc(hidden)]
pub enum MeshTag {}
#[doc(hidden)]
pub enum TextureTag {}

pub type MeshHandle = Handle<MeshTag>;
pub type TextureHandle = Handle<TextureTag>;

/// The 1x1 white texture created at construction.
pub const DEFAULT_TEXTURE: TextureHandle = TextureHandle::from_index(0);

/// Draw parameters of a mesh.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MeshLayout {
    pub vertex_count: u32,
    pub index_count: u32,
}

impl MeshLayout {
    /// Indexed draws are used whenever the mesh has indices.
    #[inline]
    pub fn indexed(&self) -> bool {
        self.index_count > 0
    }
}

impl From<&MeshData> for MeshLayout {
    fn from(mesh: &MeshData) -> Self {
        Self {
            vertex_count: mesh.vertex_count(),
            index_count: mesh.index_count(),
        }
    }
}

/// Interleaves the attribute arrays into the pipeline's vertex format.
pub fn interleave_vertices(mesh: &MeshData) -> Vec<Vertex> {
    mesh.positions
        .iter()
        .zip(&mesh.colors)
        .zip(&mesh.tex_coords)
        .map(|((&position, &color), &tex_coord)| Vertex::new(position, color, tex_coord))
        .collect()
}

pub struct GpuMesh {
    vertex_buffer: Buffer,
    index_buffer: Option<Buffer>,
    layout: MeshLayout,
}

impl GpuMesh {
    #[inline]
    pub fn vertex_buffer(&self) -> vk::Buffer {
        self.vertex_buffer.handle()
    }

    pub fn index_buffer(&self) -> Option<vk::Buffer> {
        self.index_buffer.as_ref().map(Buffer::handle)
    }

    #[inline]
    pub fn layout(&self) -> MeshLayout {
        self.layout
    }
}

pub struct GpuTexture {
    image: Image,
}

impl GpuTexture {
    #[inline]
    pub fn view(&self) -> vk::ImageView {
        self.image.view()
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.image.extent()
    }
}

pub struct Material {
    texture: TextureHandle,
    record: MaterialRecord,
    descriptor_set: vk::DescriptorSet,
}

impl Material {
    #[inline]
    pub fn texture(&self) -> TextureHandle {
        self.texture
    }

    #[inline]
    pub fn record(&self) -> &MaterialRecord {
        &self.record
    }

    /// Set 1: the material's combined image sampler.
    #[inline]
    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }
}

/// Append-only caches of meshes, textures and materials.
pub struct ResourceStore {
    device: Arc<Device>,
    // Declared before the pool and layout they were allocated from.
    materials: Arena<Material>,
    textures: Arena<GpuTexture>,
    meshes: Arena<GpuMesh>,
    material_table: Buffer,
    material_capacity: u32,
    material_pool: DescriptorPool,
    material_set_layout: DescriptorSetLayout,
    sampler: Sampler,
    resolver: MaterialResolver,
}

impl ResourceStore {
    /// Creates the store with room for `max_materials` materials, and
    /// records the default texture and default material on `uploader`.
    pub fn new(
        device: Arc<Device>,
        uploader: &mut StagingUploader,
        max_materials: u32,
    ) -> RenderResult<Self> {
        let bindings = [layout_binding(
            0,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
        )];
        let material_set_layout = DescriptorSetLayout::new(device.clone(), &bindings)?;
        let material_pool = DescriptorPool::new(
            device.clone(),
            max_materials,
            &pool_sizes_for(&bindings, max_materials),
        )?;
        let material_table = Buffer::with_name(
            device.clone(),
            BufferUsage::Storage,
            u64::from(max_materials) * MaterialRecord::SIZE,
            "material_table",
        )?;
        let sampler = Sampler::linear_repeat(device.clone())?;

        let mut store = Self {
            device,
            materials: Arena::new(),
            textures: Arena::new(),
            meshes: Arena::new(),
            material_table,
            material_capacity: max_materials,
            material_pool,
            material_set_layout,
            sampler,
            resolver: MaterialResolver::new(),
        };

        let white = ImageData::solid(1, 1, [255; 4])?;
        let texture = store.create_texture_from_image(uploader, &white)?;
        let material = store.create_material_from_factor(uploader, MaterialParams::default())?;
        debug_assert_eq!(texture, DEFAULT_TEXTURE);
        debug_assert_eq!(material, DEFAULT_MATERIAL);

        info!("Resource store ready ({} material slots)", max_materials);
        Ok(store)
    }

    /// Uploads a mesh. An empty index array yields a non-indexed mesh.
    pub fn create_mesh(
        &mut self,
        uploader: &mut StagingUploader,
        mesh: &MeshData,
    ) -> RenderResult<MeshHandle> {
        mesh.validate()?;
        let layout = MeshLayout::from(mesh);

        let vertices = interleave_vertices(mesh);
        let payloads = mesh_payloads(
            bytemuck::cast_slice(&vertices),
            bytemuck::cast_slice(&mesh.indices),
        );
        for payload in &payloads {
            check_fits(uploader, payload.bytes.len() as u64)?;
        }

        let device = self.device.clone();
        let mut buffers = create_then_record(
            uploader,
            &payloads,
            |payload| {
                Ok(Buffer::with_name(
                    device.clone(),
                    payload.usage,
                    payload.bytes.len() as u64,
                    payload.name,
                )?)
            },
            |uploader, buffer, payload| {
                upload_to_buffer(uploader, payload.bytes, buffer.handle(), 0)?;
                uploader.cmd_buffer_barrier(
                    buffer.handle(),
                    0,
                    vk::WHOLE_SIZE,
                    vk::PipelineStageFlags::VERTEX_INPUT,
                    payload.dst_access,
                )?;
                Ok(())
            },
            |uploader| {
                // Execute what was recorded while the buffers are alive.
                if let Err(e) = uploader.flush_and_restart() {
                    warn!(
                        "Failed to drain lane '{}' after a failed mesh upload: {}",
                        uploader.name(),
                        e
                    );
                }
            },
        )?
        .into_iter();

        let (Some(vertex_buffer), index_buffer) = (buffers.next(), buffers.next()) else {
            return Err(RhiError::InvalidArgument("mesh has no vertex buffer".to_string()).into());
        };

        let handle = MeshHandle::from_index(self.meshes.push(GpuMesh {
            vertex_buffer,
            index_buffer,
            layout,
        }));
        debug!(
            "Created mesh {:?}: {} vertices, {} indices",
            handle, layout.vertex_count, layout.index_count
        );
        Ok(handle)
    }

    /// Decodes `path` and uploads it as a texture.
    pub fn create_texture_from_file<P: AsRef<Path>>(
        &mut self,
        uploader: &mut StagingUploader,
        path: P,
    ) -> RenderResult<TextureHandle> {
        let image = ImageData::load(path.as_ref())?;
        self.create_texture_from_image(uploader, &image)
    }

    /// Uploads RGBA8 pixels into a sampled, device-local image.
    pub fn create_texture_from_image(
        &mut self,
        uploader: &mut StagingUploader,
        image: &ImageData,
    ) -> RenderResult<TextureHandle> {
        check_fits(uploader, image.byte_len())?;

        let extent = vk::Extent2D {
            width: image.width(),
            height: image.height(),
        };
        let gpu_image = Image::new(self.device.clone(), ImageKind::Texture, TEXTURE_FORMAT, extent)?;

        let alignment = self.copy_alignment();
        let offset = stage_with_retry(uploader, image.pixels(), alignment)?;
        uploader.cmd_upload_image(offset, gpu_image.handle(), extent, image.byte_len())?;

        let handle = TextureHandle::from_index(self.textures.push(GpuTexture { image: gpu_image }));
        debug!(
            "Created texture {:?}: {}x{}",
            handle,
            image.width(),
            image.height()
        );
        Ok(handle)
    }

    /// Creates a material sampling `texture`.
    pub fn create_material_from_texture(
        &mut self,
        uploader: &mut StagingUploader,
        texture: TextureHandle,
        params: MaterialParams,
    ) -> RenderResult<MaterialId> {
        if !self.textures.contains(texture.index()) {
            return Err(RenderError::InvalidHandle(format!("{:?}", texture)));
        }
        self.create_material(uploader, texture, params, texture != DEFAULT_TEXTURE)
    }

    /// Creates an untextured material (it samples the default white texture).
    pub fn create_material_from_factor(
        &mut self,
        uploader: &mut StagingUploader,
        params: MaterialParams,
    ) -> RenderResult<MaterialId> {
        self.create_material(uploader, DEFAULT_TEXTURE, params, false)
    }

    fn create_material(
        &mut self,
        uploader: &mut StagingUploader,
        texture: TextureHandle,
        params: MaterialParams,
        textured: bool,
    ) -> RenderResult<MaterialId> {
        let index = self.materials.len() as u32;
        if index >= self.material_capacity {
            return Err(RenderError::MaterialTableFull(self.material_capacity));
        }
        let view = self
            .textures
            .get(texture.index())
            .map(GpuTexture::view)
            .ok_or_else(|| RenderError::InvalidHandle(format!("{:?}", texture)))?;

        let record = MaterialRecord::new(&params, texture.index(), textured);
        let table_offset = u64::from(index) * MaterialRecord::SIZE;
        upload_to_buffer(
            uploader,
            bytemuck::bytes_of(&record),
            self.material_table.handle(),
            table_offset,
        )?;
        uploader.cmd_buffer_barrier(
            self.material_table.handle(),
            table_offset,
            MaterialRecord::SIZE,
            vk::PipelineStageFlags::VERTEX_SHADER | vk::PipelineStageFlags::FRAGMENT_SHADER,
            vk::AccessFlags::SHADER_READ,
        )?;

        let descriptor_set = self
            .material_pool
            .allocate_one(self.material_set_layout.handle())?;
        descriptor::write_combined_image_sampler(
            &self.device,
            descriptor_set,
            0,
            self.sampler.handle(),
            view,
        );

        let id = MaterialId::from_index(self.materials.push(Material {
            texture,
            record,
            descriptor_set,
        }));
        debug!("Created material {:?} (texture {:?})", id, texture);
        Ok(id)
    }

    pub fn mesh(&self, handle: MeshHandle) -> Option<&GpuMesh> {
        self.meshes.get(handle.index())
    }

    pub fn texture(&self, handle: TextureHandle) -> Option<&GpuTexture> {
        self.textures.get(handle.index())
    }

    pub fn material(&self, id: MaterialId) -> Option<&Material> {
        self.materials.get(id.index())
    }

    /// Sets the material used by draws without an override. Unknown ids are
    /// ignored with a warning.
    pub fn set_active_material(&mut self, id: Option<MaterialId>) {
        match id {
            Some(id) if !self.materials.contains(id.index()) => {
                warn!("Cannot activate {:?}: no such material", id);
            }
            _ => self.resolver.set_active(id),
        }
    }

    /// Override, then active, then the default material.
    pub fn resolve_material(&self, override_id: Option<MaterialId>) -> MaterialId {
        self.resolver
            .resolve(override_id, self.materials.len() as u32)
    }

    #[inline]
    pub fn mesh_count(&self) -> usize {
        self.meshes.len()
    }

    #[inline]
    pub fn texture_count(&self) -> usize {
        self.textures.len()
    }

    #[inline]
    pub fn material_count(&self) -> usize {
        self.materials.len()
    }

    #[inline]
    pub fn material_set_layout(&self) -> vk::DescriptorSetLayout {
        self.material_set_layout.handle()
    }

    /// The material table buffer and its size in bytes.
    pub fn material_table(&self) -> (vk::Buffer, u64) {
        (self.material_table.handle(), self.material_table.size())
    }

    fn copy_alignment(&self) -> u64 {
        // Texel size of RGBA8, and whatever the device prefers on top.
        self.device
            .limits()
            .optimal_buffer_copy_offset_alignment
            .max(4)
    }
}

/// One device buffer of a mesh and the bytes it is filled with.
#[derive(Clone, Copy, Debug)]
struct MeshPayload<'a> {
    usage: BufferUsage,
    name: &'static str,
    bytes: &'a [u8],
    dst_access: vk::AccessFlags,
}

/// Vertex payload first, then the index payload if there are indices.
fn mesh_payloads<'a>(vertex_bytes: &'a [u8], index_bytes: &'a [u8]) -> Vec<MeshPayload<'a>> {
    let mut payloads = vec![MeshPayload {
        usage: BufferUsage::Vertex,
        name: "mesh_vertices",
        bytes: vertex_bytes,
        dst_access: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
    }];
    if !index_bytes.is_empty() {
        payloads.push(MeshPayload {
            usage: BufferUsage::Index,
            name: "mesh_indices",
            bytes: index_bytes,
            dst_access: vk::AccessFlags::INDEX_READ,
        });
    }
    payloads
}

/// Creates one buffer per payload, and only then records their uploads.
///
/// A failed creation returns before anything is recorded. A failed
/// recording calls `drain` while every buffer is still alive, so no
/// recorded command outlives its destination.
fn create_then_record<C, B>(
    ctx: &mut C,
    payloads: &[MeshPayload<'_>],
    mut create: impl FnMut(&MeshPayload<'_>) -> RenderResult<B>,
    mut record: impl FnMut(&mut C, &B, &MeshPayload<'_>) -> RenderResult<()>,
    drain: impl FnOnce(&mut C),
) -> RenderResult<Vec<B>> {
    let buffers = payloads
        .iter()
        .map(&mut create)
        .collect::<RenderResult<Vec<_>>>()?;

    for (buffer, payload) in buffers.iter().zip(payloads) {
        if let Err(e) = record(ctx, buffer, payload) {
            drain(ctx);
            return Err(e);
        }
    }
    Ok(buffers)
}

/// Fails with `StagingExhausted` for payloads no frame region could hold.
fn check_fits(uploader: &StagingUploader, size: u64) -> RenderResult<()> {
    let budget = uploader.per_frame_bytes();
    if size > budget {
        return Err(RenderError::StagingExhausted {
            requested: size,
            budget,
        });
    }
    Ok(())
}

/// Stages `data`, flushing and restarting the lane once if the current
/// region is too full.
fn stage_with_retry(
    uploader: &mut StagingUploader,
    data: &[u8],
    alignment: u64,
) -> RenderResult<u64> {
    if let Some(offset) = uploader.stage(data, alignment) {
        return Ok(offset);
    }

    debug!(
        "Lane '{}' has {} bytes left for a {} byte upload, restarting",
        uploader.name(),
        uploader.remaining(),
        data.len()
    );
    uploader.flush_and_restart()?;
    uploader
        .stage(data, alignment)
        .ok_or(RenderError::StagingExhausted {
            requested: data.len() as u64,
            budget: uploader.per_frame_bytes(),
        })
}

fn upload_to_buffer(
    uploader: &mut StagingUploader,
    data: &[u8],
    dst: vk::Buffer,
    dst_offset: u64,
) -> RenderResult<()> {
    let offset = stage_with_retry(uploader, data, 16)?;
    uploader.cmd_copy_to_buffer(offset, dst, dst_offset, data.len() as u64)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Vec2, Vec3};

    #[test]
    fn test_cube_mesh_layout() {
        let cube = MeshData::cube();
        let layout = MeshLayout::from(&cube);
        assert_eq!(layout.vertex_count, 24);
        assert_eq!(layout.index_count, 36);
        assert!(layout.indexed());
    }

    #[test]
    fn test_non_indexed_layout() {
        let layout = MeshLayout::from(&MeshData::quad());
        assert_eq!(layout.vertex_count, 6);
        assert!(!layout.indexed());
    }

    #[test]
    fn test_interleave_vertices() {
        let mesh = MeshData {
            positions: vec![Vec3::X, Vec3::Y, Vec3::Z],
            colors: vec![Vec3::ONE; 3],
            tex_coords: vec![Vec2::ZERO, Vec2::X, Vec2::Y],
            indices: Vec::new(),
        };
        let vertices = interleave_vertices(&mesh);
        assert_eq!(vertices.len(), 3);
        assert_eq!(vertices[1].position, Vec3::Y);
        assert_eq!(vertices[2].tex_coord, Vec2::Y);
        assert_eq!(
            bytemuck::cast_slice::<Vertex, u8>(&vertices).len(),
            3 * std::mem::size_of::<Vertex>()
        );
    }

    #[derive(Debug, PartialEq)]
    enum Step {
        Create(&'static str),
        Record(&'static str),
        Drain,
    }

    #[test]
    fn test_mesh_payloads_skip_empty_indices() {
        let vertices = [0u8; 32];
        assert_eq!(mesh_payloads(&vertices, &[]).len(), 1);

        let indices = [0u8; 12];
        let payloads = mesh_payloads(&vertices, &indices);
        assert_eq!(payloads[0].usage, BufferUsage::Vertex);
        assert_eq!(payloads[1].usage, BufferUsage::Index);
        assert_eq!(payloads[1].dst_access, vk::AccessFlags::INDEX_READ);
    }

    #[test]
    fn test_failed_index_buffer_records_nothing() {
        let (vertices, indices) = ([0u8; 32], [0u8; 12]);
        let payloads = mesh_payloads(&vertices, &indices);
        let mut created = Vec::new();
        let mut steps = Vec::new();

        let result = create_then_record(
            &mut steps,
            &payloads,
            |payload| {
                created.push(Step::Create(payload.name));
                if payload.usage == BufferUsage::Index {
                    Err(RenderError::MaterialTableFull(0))
                } else {
                    Ok(payload.name)
                }
            },
            |steps: &mut Vec<Step>, _, payload| {
                steps.push(Step::Record(payload.name));
                Ok(())
            },
            |steps| steps.push(Step::Drain),
        );

        assert!(result.is_err());
        assert_eq!(created.len(), 2);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_failed_recording_drains_before_release() {
        let (vertices, indices) = ([0u8; 32], [0u8; 12]);
        let payloads = mesh_payloads(&vertices, &indices);
        let mut steps = Vec::new();

        let result = create_then_record(
            &mut steps,
            &payloads,
            |payload| Ok(payload.name),
            |steps: &mut Vec<Step>, _, payload| {
                steps.push(Step::Record(payload.name));
                if payload.usage == BufferUsage::Index {
                    return Err(RenderError::StagingExhausted {
                        requested: 12,
                        budget: 0,
                    });
                }
                Ok(())
            },
            |steps| steps.push(Step::Drain),
        );

        assert!(matches!(result, Err(RenderError::StagingExhausted { .. })));
        assert_eq!(
            steps,
            vec![
                Step::Record("mesh_vertices"),
                Step::Record("mesh_indices"),
                Step::Drain,
            ]
        );
    }

    #[test]
    fn test_successful_upload_keeps_buffer_order() {
        let (vertices, indices) = ([0u8; 32], [0u8; 12]);
        let payloads = mesh_payloads(&vertices, &indices);
        let mut steps: Vec<Step> = Vec::new();

        let buffers = create_then_record(
            &mut steps,
            &payloads,
            |payload| Ok(payload.usage),
            |_, _, _| Ok(()),
            |steps| steps.push(Step::Drain),
        )
        .unwrap();

        assert_eq!(buffers, vec![BufferUsage::Vertex, BufferUsage::Index]);
        assert!(steps.is_empty());
    }

    #[test]
    fn test_default_handles() {
        assert_eq!(DEFAULT_TEXTURE.index(), 0);
        assert_eq!(format!("{:?}", DEFAULT_TEXTURE), "Texture(0)");
    }
}
