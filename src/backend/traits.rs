//! Core backend abstraction traits
//!
//! The binding layer talks to the graphics API only through [`BindingBackend`].
//! The Vulkan backend implements it on top of `ash`; the recording backend
//! implements it in memory for tests and headless tools.

use crate::backend::types::*;
use thiserror::Error;

/// Backend error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Failed to create set layout: {0}")]
    LayoutCreationFailed(String),
    #[error("Failed to create pipeline layout: {0}")]
    PipelineLayoutCreationFailed(String),
    #[error("Failed to create set pool: {0}")]
    PoolCreationFailed(String),
    #[error("Failed to allocate binding set: {0}")]
    SetAllocationFailed(String),
    #[error("Binding set pool is out of memory")]
    PoolOutOfMemory,
    #[error("Failed to create buffer: {0}")]
    BufferCreationFailed(String),
    #[error("Failed to write buffer: {0}")]
    BufferWriteFailed(String),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type BackendResult<T> = Result<T, BackendError>;

/// One binding slot of a set layout, as the graphics API sees it.
///
/// Carries no names: two layouts with the same entries are the same layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LayoutEntry {
    pub binding: u32,
    pub kind: ResourceKind,
    pub count: u32,
    pub stages: ShaderStageFlags,
}

/// A push-constant range of a pipeline layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PushConstantRange {
    pub stages: ShaderStageFlags,
    pub offset: u32,
    pub size: u32,
}

/// A single descriptor update
#[derive(Debug, Clone)]
pub enum SetWrite<'a> {
    Buffer {
        binding: u32,
        kind: ResourceKind,
        region: BufferRegion,
    },
    Images {
        binding: u32,
        first_element: u32,
        textures: &'a [TextureBinding],
    },
}

/// "Bind these sets at this base index with these dynamic offsets"
#[derive(Debug, Clone)]
pub struct BindSets<'a> {
    pub bind_point: BindPoint,
    pub layout: PipelineLayoutHandle,
    pub first_set: u32,
    pub sets: &'a [DescriptorSetHandle],
    pub dynamic_offsets: &'a [u32],
}

/// Graphics-API collaborator of the binding layer
pub trait BindingBackend {
    /// Backend name, for logs.
    fn name(&self) -> &'static str;

    /// Minimum alignment of dynamic and region offsets into uniform/storage buffers.
    fn min_buffer_offset_alignment(&self) -> u64;

    // Layout objects

    /// Create a set layout from entries sorted by binding
    fn create_set_layout(&mut self, entries: &[LayoutEntry]) -> BackendResult<SetLayoutHandle>;

    /// Destroy a set layout
    fn destroy_set_layout(&mut self, layout: SetLayoutHandle);

    /// Create a pipeline layout
    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[SetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle>;

    /// Destroy a pipeline layout
    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle);

    // Set pools and instances

    /// Create a pool holding up to `max_sets` sets and `capacity` descriptors per kind
    fn create_set_pool(
        &mut self,
        max_sets: u32,
        capacity: &KindCounts,
    ) -> BackendResult<SetPoolHandle>;

    /// Destroy a pool and every set allocated from it
    fn destroy_set_pool(&mut self, pool: SetPoolHandle);

    /// Allocate one set from a pool
    fn allocate_set(
        &mut self,
        pool: SetPoolHandle,
        layout: SetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle>;

    /// Return sets to the pool they were allocated from
    fn free_sets(&mut self, pool: SetPoolHandle, sets: &[DescriptorSetHandle])
        -> BackendResult<()>;

    /// Update set contents
    fn update_set(&mut self, set: DescriptorSetHandle, writes: &[SetWrite<'_>]);

    // Backing memory

    /// Create a host-visible buffer usable as uniform and storage buffer
    fn create_buffer(&mut self, size: u64, label: &str) -> BackendResult<BufferHandle>;

    /// Write data to a buffer
    fn write_buffer(&mut self, buffer: BufferHandle, offset: u64, data: &[u8])
        -> BackendResult<()>;

    /// Destroy a buffer
    fn destroy_buffer(&mut self, buffer: BufferHandle);

    // Command recording

    /// Record a bind of consecutive sets into a command stream
    fn cmd_bind_sets(&mut self, cmd: CommandStream, bind: &BindSets<'_>) -> BackendResult<()>;
}
