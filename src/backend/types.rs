//! Common types shared between backends and the binding layer

use std::fmt;

/// Shader stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    /// All stages, in pipeline order.
    pub const ALL: [ShaderStage; 3] = [Self::Vertex, Self::Fragment, Self::Compute];

    /// The single-bit stage mask for this stage.
    pub fn flag(self) -> ShaderStageFlags {
        match self {
            Self::Vertex => ShaderStageFlags::VERTEX,
            Self::Fragment => ShaderStageFlags::FRAGMENT,
            Self::Compute => ShaderStageFlags::COMPUTE,
        }
    }

    /// Short lowercase name, used in artifact file names and logs.
    pub fn name(self) -> &'static str {
        match self {
            Self::Vertex => "vert",
            Self::Fragment => "frag",
            Self::Compute => "comp",
        }
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags::bitflags! {
    /// Shader stages that can access a binding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ShaderStageFlags: u32 {
        /// Vertex shader stage.
        const VERTEX = 1 << 0;
        /// Fragment shader stage.
        const FRAGMENT = 1 << 1;
        /// Compute shader stage.
        const COMPUTE = 1 << 2;
    }
}

/// Kind of resource behind a binding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceKind {
    UniformBuffer,
    UniformBufferDynamic,
    StorageBuffer,
    StorageBufferDynamic,
    SampledImage,
}

impl ResourceKind {
    /// Number of distinct kinds.
    pub const COUNT: usize = 5;

    /// All kinds, in declaration order.
    pub const ALL: [ResourceKind; Self::COUNT] = [
        Self::UniformBuffer,
        Self::UniformBufferDynamic,
        Self::StorageBuffer,
        Self::StorageBufferDynamic,
        Self::SampledImage,
    ];

    /// Dense index, usable for per-kind tables.
    pub fn index(self) -> usize {
        match self {
            Self::UniformBuffer => 0,
            Self::UniformBufferDynamic => 1,
            Self::StorageBuffer => 2,
            Self::StorageBufferDynamic => 3,
            Self::SampledImage => 4,
        }
    }

    /// Code folded into layout hashes.
    pub fn code(self) -> u32 {
        self.index() as u32 + 1
    }

    pub fn is_buffer(self) -> bool {
        match self {
            Self::UniformBuffer
            | Self::UniformBufferDynamic
            | Self::StorageBuffer
            | Self::StorageBufferDynamic => true,
            Self::SampledImage => false,
        }
    }

    pub fn is_dynamic(self) -> bool {
        match self {
            Self::UniformBufferDynamic | Self::StorageBufferDynamic => true,
            Self::UniformBuffer | Self::StorageBuffer | Self::SampledImage => false,
        }
    }

    /// The `*Dynamic` counterpart, if this kind can be promoted.
    pub fn to_dynamic(self) -> Option<ResourceKind> {
        match self {
            Self::UniformBuffer => Some(Self::UniformBufferDynamic),
            Self::StorageBuffer => Some(Self::StorageBufferDynamic),
            Self::UniformBufferDynamic | Self::StorageBufferDynamic | Self::SampledImage => None,
        }
    }

    /// The plain counterpart of a `*Dynamic` kind; other kinds map to themselves.
    pub fn to_static(self) -> ResourceKind {
        match self {
            Self::UniformBufferDynamic => Self::UniformBuffer,
            Self::StorageBufferDynamic => Self::StorageBuffer,
            Self::UniformBuffer | Self::StorageBuffer | Self::SampledImage => self,
        }
    }
}

/// Per-kind counters (descriptors consumed, pool capacities).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct KindCounts(pub [u32; ResourceKind::COUNT]);

impl KindCounts {
    pub fn get(&self, kind: ResourceKind) -> u32 {
        self.0[kind.index()]
    }

    pub fn add(&mut self, kind: ResourceKind, count: u32) {
        self.0[kind.index()] += count;
    }

    /// True if `self + other` stays within `capacity` for every kind.
    pub fn fits(&self, other: &KindCounts, capacity: &KindCounts) -> bool {
        ResourceKind::ALL
            .iter()
            .all(|&kind| self.get(kind) + other.get(kind) <= capacity.get(kind))
    }

    pub fn accumulate(&mut self, other: &KindCounts) {
        for kind in ResourceKind::ALL {
            self.add(kind, other.get(kind));
        }
    }

    pub fn release(&mut self, other: &KindCounts) {
        for kind in ResourceKind::ALL {
            self.0[kind.index()] = self.get(kind).saturating_sub(other.get(kind));
        }
    }

    /// Non-zero entries, in kind order.
    pub fn iter(&self) -> impl Iterator<Item = (ResourceKind, u32)> + '_ {
        ResourceKind::ALL
            .into_iter()
            .map(|kind| (kind, self.get(kind)))
            .filter(|&(_, count)| count > 0)
    }
}

/// Pipeline bind point a set is bound to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BindPoint {
    Graphics,
    Compute,
}

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to an image view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageViewHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a physical binding-set layout object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetLayoutHandle(pub(crate) u64);

/// Handle to a physical pipeline layout object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineLayoutHandle(pub(crate) u64);

/// Handle to a physical binding-set pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetPoolHandle(pub(crate) u64);

/// Handle to a physical binding-set instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a command stream being recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CommandStream(pub(crate) u64);

macro_rules! raw_handle {
    ($($name:ident),* $(,)?) => {
        $(
            impl $name {
                /// Wrap a raw backend handle value.
                pub const fn from_raw(raw: u64) -> Self {
                    Self(raw)
                }

                /// The raw backend handle value.
                pub fn raw(&self) -> u64 {
                    self.0
                }
            }
        )*
    };
}

raw_handle!(
    BufferHandle,
    ImageViewHandle,
    SamplerHandle,
    SetLayoutHandle,
    PipelineLayoutHandle,
    SetPoolHandle,
    DescriptorSetHandle,
    CommandStream,
);

/// An image plus the sampler it is read through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextureBinding {
    pub view: ImageViewHandle,
    pub sampler: SamplerHandle,
}

impl TextureBinding {
    pub fn new(view: ImageViewHandle, sampler: SamplerHandle) -> Self {
        Self { view, sampler }
    }
}

/// A byte range of a GPU buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferRegion {
    pub buffer: BufferHandle,
    pub offset: u64,
    pub size: u64,
}
