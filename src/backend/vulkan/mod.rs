//! Vulkan binding backend using ash.
//!
//! The backend does not own the device: the renderer creates the instance,
//! device and allocator and hands them over. Everything the binding layer
//! creates through this backend (layouts, pools, uniform buffers) is
//! destroyed through it as well.

pub(crate) mod conversion;

use std::sync::Arc;

use ash::vk;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme, Allocator};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use crate::backend::traits::*;
use crate::backend::types::*;

use self::conversion::{
    convert_bind_point, convert_pool_sizes, convert_resource_kind, convert_stage_flags,
};

struct VulkanBuffer {
    buffer: vk::Buffer,
    allocation: Option<Allocation>,
}

/// Binding backend on top of a Vulkan device.
pub struct VulkanBindingBackend {
    device: ash::Device,
    allocator: Arc<Mutex<Allocator>>,
    min_offset_alignment: u64,
    buffers: FxHashMap<u64, VulkanBuffer>,
}

impl std::fmt::Debug for VulkanBindingBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VulkanBindingBackend")
            .field("min_offset_alignment", &self.min_offset_alignment)
            .field("buffers", &self.buffers.len())
            .finish()
    }
}

fn map_vk_error(result: vk::Result, what: &str) -> BackendError {
    match result {
        vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL => {
            BackendError::PoolOutOfMemory
        }
        vk::Result::ERROR_OUT_OF_HOST_MEMORY | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY => {
            BackendError::OutOfMemory
        }
        vk::Result::ERROR_DEVICE_LOST => BackendError::DeviceLost,
        other => BackendError::InvalidHandle(format!("{what}: {other:?}")),
    }
}

impl VulkanBindingBackend {
    /// Wrap an existing device.
    ///
    /// The dynamic-offset alignment is the larger of the device's uniform and
    /// storage buffer offset alignments.
    pub fn new(
        instance: &ash::Instance,
        physical_device: vk::PhysicalDevice,
        device: ash::Device,
        allocator: Arc<Mutex<Allocator>>,
    ) -> Self {
        let properties = unsafe { instance.get_physical_device_properties(physical_device) };
        let limits = properties.limits;
        let min_offset_alignment = limits
            .min_uniform_buffer_offset_alignment
            .max(limits.min_storage_buffer_offset_alignment)
            .max(1);

        log::info!(
            "Vulkan binding backend: min buffer offset alignment {}",
            min_offset_alignment
        );

        Self {
            device,
            allocator,
            min_offset_alignment,
            buffers: FxHashMap::default(),
        }
    }

    /// The wrapped device.
    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    fn release_buffer(&self, mut buffer: VulkanBuffer) {
        if let Some(allocation) = buffer.allocation.take() {
            if let Err(e) = self.allocator.lock().free(allocation) {
                log::warn!("Failed to free buffer memory: {}", e);
            }
        }
        unsafe { self.device.destroy_buffer(buffer.buffer, None) };
    }
}

impl BindingBackend for VulkanBindingBackend {
    fn name(&self) -> &'static str {
        "Vulkan"
    }

    fn min_buffer_offset_alignment(&self) -> u64 {
        self.min_offset_alignment
    }

    fn create_set_layout(&mut self, entries: &[LayoutEntry]) -> BackendResult<SetLayoutHandle> {
        let bindings: Vec<vk::DescriptorSetLayoutBinding> = entries
            .iter()
            .map(|entry| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(entry.binding)
                    .descriptor_type(convert_resource_kind(entry.kind))
                    .descriptor_count(entry.count)
                    .stage_flags(convert_stage_flags(entry.stages))
            })
            .collect();

        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);

        let layout = unsafe { self.device.create_descriptor_set_layout(&create_info, None) }
            .map_err(|e| {
                BackendError::LayoutCreationFailed(format!(
                    "Failed to create descriptor set layout: {:?}",
                    e
                ))
            })?;

        Ok(layout.into())
    }

    fn destroy_set_layout(&mut self, layout: SetLayoutHandle) {
        unsafe {
            self.device
                .destroy_descriptor_set_layout(layout.into(), None)
        };
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[SetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        let layouts: Vec<vk::DescriptorSetLayout> =
            set_layouts.iter().map(|&layout| layout.into()).collect();
        let ranges: Vec<vk::PushConstantRange> = push_constants
            .iter()
            .map(|range| {
                vk::PushConstantRange::default()
                    .stage_flags(convert_stage_flags(range.stages))
                    .offset(range.offset)
                    .size(range.size)
            })
            .collect();

        let create_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&layouts)
            .push_constant_ranges(&ranges);

        let layout =
            unsafe { self.device.create_pipeline_layout(&create_info, None) }.map_err(|e| {
                BackendError::PipelineLayoutCreationFailed(format!(
                    "Failed to create pipeline layout: {:?}",
                    e
                ))
            })?;

        Ok(layout.into())
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        unsafe { self.device.destroy_pipeline_layout(layout.into(), None) };
    }

    fn create_set_pool(
        &mut self,
        max_sets: u32,
        capacity: &KindCounts,
    ) -> BackendResult<SetPoolHandle> {
        let pool_sizes = convert_pool_sizes(capacity);
        let pool_info = vk::DescriptorPoolCreateInfo::default()
            .flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(max_sets)
            .pool_sizes(&pool_sizes);

        let pool = unsafe { self.device.create_descriptor_pool(&pool_info, None) }.map_err(|e| {
            BackendError::PoolCreationFailed(format!("Failed to create descriptor pool: {:?}", e))
        })?;

        log::debug!(
            "Created descriptor pool (max sets: {}, {} descriptor kinds)",
            max_sets,
            pool_sizes.len()
        );

        Ok(pool.into())
    }

    fn destroy_set_pool(&mut self, pool: SetPoolHandle) {
        unsafe { self.device.destroy_descriptor_pool(pool.into(), None) };
    }

    fn allocate_set(
        &mut self,
        pool: SetPoolHandle,
        layout: SetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let layouts = [vk::DescriptorSetLayout::from(layout)];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(pool.into())
            .set_layouts(&layouts);

        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info) }
            .map_err(|e| map_vk_error(e, "Failed to allocate descriptor set"))?;

        sets.first()
            .map(|&set| set.into())
            .ok_or_else(|| BackendError::SetAllocationFailed("no set returned".to_string()))
    }

    fn free_sets(
        &mut self,
        pool: SetPoolHandle,
        sets: &[DescriptorSetHandle],
    ) -> BackendResult<()> {
        if sets.is_empty() {
            return Ok(());
        }
        let raw: Vec<vk::DescriptorSet> = sets.iter().map(|&set| set.into()).collect();
        unsafe { self.device.free_descriptor_sets(pool.into(), &raw) }
            .map_err(|e| map_vk_error(e, "Failed to free descriptor sets"))
    }

    fn update_set(&mut self, set: DescriptorSetHandle, writes: &[SetWrite<'_>]) {
        // Info arrays must outlive the write structs that point into them.
        let mut buffer_infos = Vec::new();
        let mut image_infos = Vec::new();
        for write in writes {
            match write {
                SetWrite::Buffer { region, .. } => {
                    // Dynamic offsets supplied at bind time are added to `region.offset`.
                    buffer_infos.push(
                        vk::DescriptorBufferInfo::default()
                            .buffer(region.buffer.into())
                            .offset(region.offset)
                            .range(region.size),
                    );
                }
                SetWrite::Images { textures, .. } => {
                    image_infos.extend(textures.iter().map(|texture| {
                        vk::DescriptorImageInfo::default()
                            .image_view(texture.view.into())
                            .sampler(texture.sampler.into())
                            .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    }));
                }
            }
        }

        let dst_set = vk::DescriptorSet::from(set);
        let mut buffer_cursor = 0;
        let mut image_cursor = 0;
        let vk_writes: Vec<vk::WriteDescriptorSet> = writes
            .iter()
            .map(|write| match write {
                SetWrite::Buffer { binding, kind, .. } => {
                    let info = &buffer_infos[buffer_cursor..buffer_cursor + 1];
                    buffer_cursor += 1;
                    vk::WriteDescriptorSet::default()
                        .dst_set(dst_set)
                        .dst_binding(*binding)
                        .descriptor_type(convert_resource_kind(*kind))
                        .buffer_info(info)
                }
                SetWrite::Images {
                    binding,
                    first_element,
                    textures,
                } => {
                    let info = &image_infos[image_cursor..image_cursor + textures.len()];
                    image_cursor += textures.len();
                    vk::WriteDescriptorSet::default()
                        .dst_set(dst_set)
                        .dst_binding(*binding)
                        .dst_array_element(*first_element)
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info)
                }
            })
            .collect();

        unsafe { self.device.update_descriptor_sets(&vk_writes, &[]) };
    }

    fn create_buffer(&mut self, size: u64, label: &str) -> BackendResult<BufferHandle> {
        let buffer_info = vk::BufferCreateInfo::default()
            .size(size)
            .usage(vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::STORAGE_BUFFER)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = unsafe { self.device.create_buffer(&buffer_info, None) }.map_err(|e| {
            BackendError::BufferCreationFailed(format!("Failed to create buffer: {:?}", e))
        })?;

        let requirements = unsafe { self.device.get_buffer_memory_requirements(buffer) };

        let allocation = {
            let mut allocator = self.allocator.lock();
            allocator.allocate(&AllocationCreateDesc {
                name: label,
                requirements,
                location: gpu_allocator::MemoryLocation::CpuToGpu,
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            })
        };
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { self.device.destroy_buffer(buffer, None) };
                return Err(BackendError::BufferCreationFailed(format!(
                    "Failed to allocate buffer memory: {}",
                    e
                )));
            }
        };

        let bound = unsafe {
            self.device
                .bind_buffer_memory(buffer, allocation.memory(), allocation.offset())
        };
        let entry = VulkanBuffer {
            buffer,
            allocation: Some(allocation),
        };
        if let Err(e) = bound {
            self.release_buffer(entry);
            return Err(BackendError::BufferCreationFailed(format!(
                "Failed to bind buffer memory: {:?}",
                e
            )));
        }

        let handle = BufferHandle::from(buffer);
        self.buffers.insert(handle.0, entry);
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let entry = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{buffer:?}")))?;
        let mapped = entry
            .allocation
            .as_mut()
            .and_then(|allocation| allocation.mapped_slice_mut())
            .ok_or_else(|| BackendError::BufferWriteFailed("buffer is not mapped".to_string()))?;

        let start = offset as usize;
        let end = start + data.len();
        if end > mapped.len() {
            return Err(BackendError::BufferWriteFailed(format!(
                "write of {} bytes at {} overruns mapping of {} bytes",
                data.len(),
                offset,
                mapped.len()
            )));
        }
        mapped[start..end].copy_from_slice(data);
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        if let Some(entry) = self.buffers.remove(&buffer.0) {
            self.release_buffer(entry);
        }
    }

    fn cmd_bind_sets(&mut self, cmd: CommandStream, bind: &BindSets<'_>) -> BackendResult<()> {
        let sets: Vec<vk::DescriptorSet> = bind.sets.iter().map(|&set| set.into()).collect();
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                cmd.into(),
                convert_bind_point(bind.bind_point),
                bind.layout.into(),
                bind.first_set,
                &sets,
                bind.dynamic_offsets,
            )
        };
        Ok(())
    }
}

impl Drop for VulkanBindingBackend {
    fn drop(&mut self) {
        if !self.buffers.is_empty() {
            log::warn!(
                "Vulkan binding backend dropped with {} live buffers",
                self.buffers.len()
            );
        }
        let buffers: Vec<VulkanBuffer> = self.buffers.drain().map(|(_, buffer)| buffer).collect();
        for buffer in buffers {
            self.release_buffer(buffer);
        }
    }
}
