//! Descriptor set layouts, pools and writes.
//!
//! The renderer uses two set layouts: per-frame scene data (camera uniform,
//! instance storage, material table) and per-material textures. Pools are
//! sized from the layout bindings with [`pool_sizes_for`].

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Single-descriptor layout binding of `ty` visible to `stages`.
#[inline]
pub fn layout_binding(
    binding: u32,
    ty: vk::DescriptorType,
    stages: vk::ShaderStageFlags,
) -> vk::DescriptorSetLayoutBinding<'static> {
    vk::DescriptorSetLayoutBinding::default()
        .binding(binding)
        .descriptor_type(ty)
        .descriptor_count(1)
        .stage_flags(stages)
}

/// Pool sizes able to hold `set_count` sets with `bindings`, one entry per
/// descriptor type in first-seen order.
pub fn pool_sizes_for(
    bindings: &[vk::DescriptorSetLayoutBinding],
    set_count: u32,
) -> Vec<vk::DescriptorPoolSize> {
    let mut sizes: Vec<vk::DescriptorPoolSize> = Vec::new();
    for binding in bindings {
        let count = binding.descriptor_count * set_count;
        match sizes.iter_mut().find(|size| size.ty == binding.descriptor_type) {
            Some(size) => size.descriptor_count += count,
            None => sizes.push(
                vk::DescriptorPoolSize::default()
                    .ty(binding.descriptor_type)
                    .descriptor_count(count),
            ),
        }
    }
    sizes
}

/// Descriptor set layout wrapper.
pub struct DescriptorSetLayout {
    device: Arc<Device>,
    layout: vk::DescriptorSetLayout,
}

impl DescriptorSetLayout {
    /// Creates a layout from `bindings`.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `bindings` - One entry per binding slot, usually built with
    ///   [`layout_binding`]
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(device: Arc<Device>, bindings: &[vk::DescriptorSetLayoutBinding]) -> RhiResult<Self> {
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };

        debug!("Created descriptor set layout with {} binding(s)", bindings.len());
        Ok(Self { device, layout })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Descriptor pool. Sets are never freed individually; they live until the
/// pool is destroyed.
pub struct DescriptorPool {
    device: Arc<Device>,
    pool: vk::DescriptorPool,
    max_sets: u32,
}

impl DescriptorPool {
    /// Creates a pool for at most `max_sets` sets.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `max_sets` - Upper bound on sets allocated from the pool
    /// * `pool_sizes` - Descriptor counts per type, summed over all sets
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use std::sync::Arc;
    /// use frameflow_rhi::descriptor::DescriptorPool;
    /// use frameflow_rhi::device::Device;
    /// use frameflow_rhi::vk;
    ///
    /// # fn example(device: Arc<Device>) -> frameflow_rhi::RhiResult<()> {
    /// // Two frame slots, each with one uniform and two storage buffers.
    /// let sizes = [
    ///     vk::DescriptorPoolSize { ty: vk::DescriptorType::UNIFORM_BUFFER, descriptor_count: 2 },
    ///     vk::DescriptorPoolSize { ty: vk::DescriptorType::STORAGE_BUFFER, descriptor_count: 4 },
    /// ];
    /// let pool = DescriptorPool::new(device, 2, &sizes)?;
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes);

        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!("Created descriptor pool: max_sets={}", max_sets);

        Ok(Self {
            device,
            pool,
            max_sets,
        })
    }

    /// Allocates one set per entry of `layouts`.
    pub fn allocate(&self, layouts: &[vk::DescriptorSetLayout]) -> RhiResult<Vec<vk::DescriptorSet>> {
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(layouts);

        Ok(unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info)? })
    }

    pub fn allocate_one(&self, layout: vk::DescriptorSetLayout) -> RhiResult<vk::DescriptorSet> {
        let sets = self.allocate(&[layout])?;
        Ok(sets[0])
    }

    #[inline]
    pub fn max_sets(&self) -> u32 {
        self.max_sets
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
        debug!("Destroyed descriptor pool");
    }
}

/// Points `binding` of `set` at a buffer range.
pub fn write_buffer(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    ty: vk::DescriptorType,
    buffer: vk::Buffer,
    offset: vk::DeviceSize,
    range: vk::DeviceSize,
) {
    let infos = [vk::DescriptorBufferInfo::default()
        .buffer(buffer)
        .offset(offset)
        .range(range)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(ty)
        .buffer_info(&infos);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

/// Points a combined image sampler `binding` of `set` at a shader-readable view.
pub fn write_combined_image_sampler(
    device: &Device,
    set: vk::DescriptorSet,
    binding: u32,
    sampler: vk::Sampler,
    view: vk::ImageView,
) {
    let infos = [vk::DescriptorImageInfo::default()
        .sampler(sampler)
        .image_view(view)
        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)];
    let write = vk::WriteDescriptorSet::default()
        .dst_set(set)
        .dst_binding(binding)
        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
        .image_info(&infos);

    unsafe { device.handle().update_descriptor_sets(&[write], &[]) };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_binding() {
        let binding = layout_binding(
            2,
            vk::DescriptorType::STORAGE_BUFFER,
            vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT,
        );
        assert_eq!(binding.binding, 2);
        assert_eq!(binding.descriptor_type, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(binding.descriptor_count, 1);
        assert!(binding.stage_flags.contains(vk::ShaderStageFlags::FRAGMENT));
    }

    #[test]
    fn test_pool_sizes_merge_types() {
        let bindings = [
            layout_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX),
            layout_binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::VERTEX),
            layout_binding(2, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::FRAGMENT),
        ];

        let sizes = pool_sizes_for(&bindings, 3);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].ty, vk::DescriptorType::UNIFORM_BUFFER);
        assert_eq!(sizes[0].descriptor_count, 3);
        assert_eq!(sizes[1].ty, vk::DescriptorType::STORAGE_BUFFER);
        assert_eq!(sizes[1].descriptor_count, 6);
    }

    #[test]
    fn test_pool_sizes_empty() {
        assert!(pool_sizes_for(&[], 4).is_empty());
    }
}
