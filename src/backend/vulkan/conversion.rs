//! Type conversions between binding-layer types and Vulkan types.

use ash::vk;
use ash::vk::Handle;

use crate::backend::types::*;

/// Convert a resource kind to the Vulkan descriptor type.
///
/// Sampled images are bound as combined image samplers.
pub fn convert_resource_kind(kind: ResourceKind) -> vk::DescriptorType {
    match kind {
        ResourceKind::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
        ResourceKind::UniformBufferDynamic => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        ResourceKind::StorageBuffer => vk::DescriptorType::STORAGE_BUFFER,
        ResourceKind::StorageBufferDynamic => vk::DescriptorType::STORAGE_BUFFER_DYNAMIC,
        ResourceKind::SampledImage => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    }
}

/// Convert stage flags to Vulkan shader stage flags.
pub fn convert_stage_flags(stages: ShaderStageFlags) -> vk::ShaderStageFlags {
    let mut result = vk::ShaderStageFlags::empty();
    if stages.contains(ShaderStageFlags::VERTEX) {
        result |= vk::ShaderStageFlags::VERTEX;
    }
    if stages.contains(ShaderStageFlags::FRAGMENT) {
        result |= vk::ShaderStageFlags::FRAGMENT;
    }
    if stages.contains(ShaderStageFlags::COMPUTE) {
        result |= vk::ShaderStageFlags::COMPUTE;
    }
    result
}

pub fn convert_bind_point(bind_point: BindPoint) -> vk::PipelineBindPoint {
    match bind_point {
        BindPoint::Graphics => vk::PipelineBindPoint::GRAPHICS,
        BindPoint::Compute => vk::PipelineBindPoint::COMPUTE,
    }
}

/// Per-kind capacities to Vulkan pool sizes, skipping empty kinds.
pub fn convert_pool_sizes(capacity: &KindCounts) -> Vec<vk::DescriptorPoolSize> {
    capacity
        .iter()
        .map(|(kind, count)| vk::DescriptorPoolSize {
            ty: convert_resource_kind(kind),
            descriptor_count: count,
        })
        .collect()
}

macro_rules! vk_handle_conversions {
    ($($ours:ident => $theirs:ty),* $(,)?) => {
        $(
            impl From<$theirs> for $ours {
                fn from(raw: $theirs) -> Self {
                    Self(raw.as_raw())
                }
            }

            impl From<$ours> for $theirs {
                fn from(handle: $ours) -> Self {
                    <$theirs>::from_raw(handle.0)
                }
            }
        )*
    };
}

vk_handle_conversions!(
    BufferHandle => vk::Buffer,
    ImageViewHandle => vk::ImageView,
    SamplerHandle => vk::Sampler,
    SetLayoutHandle => vk::DescriptorSetLayout,
    PipelineLayoutHandle => vk::PipelineLayout,
    SetPoolHandle => vk::DescriptorPool,
    DescriptorSetHandle => vk::DescriptorSet,
    CommandStream => vk::CommandBuffer,
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dynamic_kinds_map_to_dynamic_descriptors() {
        assert_eq!(
            convert_resource_kind(ResourceKind::UniformBufferDynamic),
            vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC
        );
        assert_eq!(
            convert_resource_kind(ResourceKind::StorageBufferDynamic),
            vk::DescriptorType::STORAGE_BUFFER_DYNAMIC
        );
    }

    #[test]
    fn test_pool_sizes_skip_empty_kinds() {
        let mut capacity = KindCounts::default();
        capacity.add(ResourceKind::UniformBuffer, 16);
        capacity.add(ResourceKind::SampledImage, 4);
        let sizes = convert_pool_sizes(&capacity);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].descriptor_count, 16);
        assert_eq!(sizes[1].ty, vk::DescriptorType::COMBINED_IMAGE_SAMPLER);
    }

    #[test]
    fn test_handle_roundtrip() {
        let raw = vk::DescriptorSet::from_raw(0xdead_beef);
        let ours = DescriptorSetHandle::from(raw);
        assert_eq!(vk::DescriptorSet::from(ours), raw);
    }
}
