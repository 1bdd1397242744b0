//! Resource binding: layouts, set instances, per-frame state and parameter
//! access.
//!
//! - [`BindingLayoutCache`] - deduplicated set and pipeline layouts
//! - [`BindingSetAllocator`] - set instances from fixed-size pools
//! - [`FrameBindingCache`] - batches, slots and dirty state of one frame-in-flight
//! - [`UniformArena`] - per-frame backing memory for buffer parameters
//! - [`ShaderParamAccess`] - named parameter writes and batched binds
//! - [`BindingContext`] - owner of all of the above

pub mod allocator;
pub mod context;
pub mod frame_cache;
pub mod layout_cache;
pub mod param_access;
pub mod uniform_memory;

pub use allocator::{BindingSetAllocator, SetInstanceHandle};
pub use context::{BindingContext, FrameResources};
pub use frame_cache::{
    Batch, BatchId, DescriptorSetUnit, FrameBindingCache, SetSlot, SlotId, SlotKind,
};
pub use layout_cache::{layout_hash, BindingLayoutCache, LayoutHandle};
pub use param_access::{ParamRecord, ParamSession, ShaderParamAccess};
pub use uniform_memory::{align_up, UniformArena, UniformRegion};
