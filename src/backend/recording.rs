//! Recording backend for testing and headless use.
//!
//! This backend doesn't touch a GPU. It hands out sequential handles, keeps
//! the bookkeeping a real driver would (pool capacities, buffer contents,
//! set contents) and records every call so tests can assert on exactly what
//! the binding layer asked the graphics API to do.

use rustc_hash::{FxHashMap, FxHashSet};

use super::traits::*;
use super::types::*;

/// Default minimum offset alignment, matching the most common hardware limit.
pub const DEFAULT_MIN_ALIGNMENT: u64 = 256;

/// A bind command as recorded into a command stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedBind {
    pub cmd: CommandStream,
    pub bind_point: BindPoint,
    pub layout: PipelineLayoutHandle,
    pub first_set: u32,
    pub sets: Vec<DescriptorSetHandle>,
    pub dynamic_offsets: Vec<u32>,
}

impl RecordedBind {
    /// Set index range covered by this bind, `[first, end)`.
    pub fn set_range(&self) -> std::ops::Range<u32> {
        self.first_set..self.first_set + self.sets.len() as u32
    }
}

/// An owned copy of a [`SetWrite`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedWrite {
    Buffer {
        binding: u32,
        kind: ResourceKind,
        region: BufferRegion,
    },
    Images {
        binding: u32,
        first_element: u32,
        textures: Vec<TextureBinding>,
    },
}

/// Every call the backend received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendCall {
    CreateSetLayout(SetLayoutHandle),
    DestroySetLayout(SetLayoutHandle),
    CreatePipelineLayout(PipelineLayoutHandle),
    DestroyPipelineLayout(PipelineLayoutHandle),
    CreateSetPool(SetPoolHandle),
    DestroySetPool(SetPoolHandle),
    AllocateSet(DescriptorSetHandle),
    FreeSets(Vec<DescriptorSetHandle>),
    UpdateSet(DescriptorSetHandle),
    CreateBuffer(BufferHandle),
    WriteBuffer {
        buffer: BufferHandle,
        offset: u64,
        len: usize,
    },
    DestroyBuffer(BufferHandle),
    BindSets(RecordedBind),
}

#[derive(Debug)]
struct PoolState {
    max_sets: u32,
    capacity: KindCounts,
    used: KindCounts,
    sets: FxHashSet<u64>,
}

#[derive(Debug)]
struct SetState {
    pool: u64,
    consumed: KindCounts,
    writes: Vec<RecordedWrite>,
}

/// In-memory backend that records every call.
#[derive(Debug)]
pub struct RecordingBackend {
    min_alignment: u64,
    next_id: u64,
    set_layouts: FxHashMap<u64, Vec<LayoutEntry>>,
    pipeline_layouts: FxHashSet<u64>,
    pools: FxHashMap<u64, PoolState>,
    sets: FxHashMap<u64, SetState>,
    buffers: FxHashMap<u64, Vec<u8>>,
    calls: Vec<BackendCall>,
}

impl Default for RecordingBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingBackend {
    /// Create a recording backend with the default 256-byte alignment.
    pub fn new() -> Self {
        Self::with_alignment(DEFAULT_MIN_ALIGNMENT)
    }

    /// Create a recording backend reporting the given minimum offset alignment.
    pub fn with_alignment(min_alignment: u64) -> Self {
        debug_assert!(min_alignment.is_power_of_two());
        Self {
            min_alignment,
            next_id: 1,
            set_layouts: FxHashMap::default(),
            pipeline_layouts: FxHashSet::default(),
            pools: FxHashMap::default(),
            sets: FxHashMap::default(),
            buffers: FxHashMap::default(),
            calls: Vec::new(),
        }
    }

    fn next_handle(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    /// Every call received so far.
    pub fn calls(&self) -> &[BackendCall] {
        &self.calls
    }

    /// Bind commands recorded so far, in order.
    pub fn binds(&self) -> Vec<&RecordedBind> {
        self.calls
            .iter()
            .filter_map(|call| match call {
                BackendCall::BindSets(bind) => Some(bind),
                _ => None,
            })
            .collect()
    }

    /// Forget recorded calls (bookkeeping is kept).
    pub fn clear_calls(&mut self) {
        self.calls.clear();
    }

    /// Number of live set layouts.
    pub fn live_set_layouts(&self) -> usize {
        self.set_layouts.len()
    }

    /// Number of live pipeline layouts.
    pub fn live_pipeline_layouts(&self) -> usize {
        self.pipeline_layouts.len()
    }

    /// Number of live pools.
    pub fn live_pools(&self) -> usize {
        self.pools.len()
    }

    /// Number of live sets across all pools.
    pub fn live_sets(&self) -> usize {
        self.sets.len()
    }

    /// Number of live buffers.
    pub fn live_buffers(&self) -> usize {
        self.buffers.len()
    }

    /// Entries a set layout was created with.
    pub fn set_layout_entries(&self, layout: SetLayoutHandle) -> Option<&[LayoutEntry]> {
        self.set_layouts.get(&layout.0).map(Vec::as_slice)
    }

    /// Current contents of a buffer.
    pub fn buffer_contents(&self, buffer: BufferHandle) -> Option<&[u8]> {
        self.buffers.get(&buffer.0).map(Vec::as_slice)
    }

    /// Writes applied to a set, in order.
    pub fn set_writes(&self, set: DescriptorSetHandle) -> Option<&[RecordedWrite]> {
        self.sets.get(&set.0).map(|state| state.writes.as_slice())
    }
}

impl BindingBackend for RecordingBackend {
    fn name(&self) -> &'static str {
        "Recording"
    }

    fn min_buffer_offset_alignment(&self) -> u64 {
        self.min_alignment
    }

    fn create_set_layout(&mut self, entries: &[LayoutEntry]) -> BackendResult<SetLayoutHandle> {
        let handle = SetLayoutHandle(self.next_handle());
        log::trace!(
            "RecordingBackend: creating set layout {:?} ({} bindings)",
            handle,
            entries.len()
        );
        self.set_layouts.insert(handle.0, entries.to_vec());
        self.calls.push(BackendCall::CreateSetLayout(handle));
        Ok(handle)
    }

    fn destroy_set_layout(&mut self, layout: SetLayoutHandle) {
        self.set_layouts.remove(&layout.0);
        self.calls.push(BackendCall::DestroySetLayout(layout));
    }

    fn create_pipeline_layout(
        &mut self,
        set_layouts: &[SetLayoutHandle],
        push_constants: &[PushConstantRange],
    ) -> BackendResult<PipelineLayoutHandle> {
        if let Some(missing) = set_layouts
            .iter()
            .find(|layout| !self.set_layouts.contains_key(&layout.0))
        {
            return Err(BackendError::InvalidHandle(format!("{missing:?}")));
        }
        let handle = PipelineLayoutHandle(self.next_handle());
        log::trace!(
            "RecordingBackend: creating pipeline layout {:?} ({} sets, {} push ranges)",
            handle,
            set_layouts.len(),
            push_constants.len()
        );
        self.pipeline_layouts.insert(handle.0);
        self.calls.push(BackendCall::CreatePipelineLayout(handle));
        Ok(handle)
    }

    fn destroy_pipeline_layout(&mut self, layout: PipelineLayoutHandle) {
        self.pipeline_layouts.remove(&layout.0);
        self.calls.push(BackendCall::DestroyPipelineLayout(layout));
    }

    fn create_set_pool(
        &mut self,
        max_sets: u32,
        capacity: &KindCounts,
    ) -> BackendResult<SetPoolHandle> {
        let handle = SetPoolHandle(self.next_handle());
        log::trace!(
            "RecordingBackend: creating set pool {:?} (max sets: {})",
            handle,
            max_sets
        );
        self.pools.insert(
            handle.0,
            PoolState {
                max_sets,
                capacity: *capacity,
                used: KindCounts::default(),
                sets: FxHashSet::default(),
            },
        );
        self.calls.push(BackendCall::CreateSetPool(handle));
        Ok(handle)
    }

    fn destroy_set_pool(&mut self, pool: SetPoolHandle) {
        if let Some(state) = self.pools.remove(&pool.0) {
            for set in state.sets {
                self.sets.remove(&set);
            }
        }
        self.calls.push(BackendCall::DestroySetPool(pool));
    }

    fn allocate_set(
        &mut self,
        pool: SetPoolHandle,
        layout: SetLayoutHandle,
    ) -> BackendResult<DescriptorSetHandle> {
        let entries = self
            .set_layouts
            .get(&layout.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{layout:?}")))?;
        let mut consumed = KindCounts::default();
        for entry in entries {
            consumed.add(entry.kind, entry.count);
        }

        let state = self
            .pools
            .get_mut(&pool.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{pool:?}")))?;
        if state.sets.len() as u32 >= state.max_sets
            || !state.used.fits(&consumed, &state.capacity)
        {
            return Err(BackendError::PoolOutOfMemory);
        }
        state.used.accumulate(&consumed);

        let handle = DescriptorSetHandle(self.next_handle());
        if let Some(state) = self.pools.get_mut(&pool.0) {
            state.sets.insert(handle.0);
        }
        self.sets.insert(
            handle.0,
            SetState {
                pool: pool.0,
                consumed,
                writes: Vec::new(),
            },
        );
        self.calls.push(BackendCall::AllocateSet(handle));
        Ok(handle)
    }

    fn free_sets(
        &mut self,
        pool: SetPoolHandle,
        sets: &[DescriptorSetHandle],
    ) -> BackendResult<()> {
        for set in sets {
            let state = self
                .sets
                .remove(&set.0)
                .ok_or_else(|| BackendError::InvalidHandle(format!("{set:?}")))?;
            if state.pool != pool.0 {
                return Err(BackendError::InvalidHandle(format!(
                    "{set:?} does not belong to {pool:?}"
                )));
            }
            if let Some(pool_state) = self.pools.get_mut(&pool.0) {
                pool_state.used.release(&state.consumed);
                pool_state.sets.remove(&set.0);
            }
        }
        self.calls.push(BackendCall::FreeSets(sets.to_vec()));
        Ok(())
    }

    fn update_set(&mut self, set: DescriptorSetHandle, writes: &[SetWrite<'_>]) {
        if let Some(state) = self.sets.get_mut(&set.0) {
            state.writes.extend(writes.iter().map(|write| match write {
                SetWrite::Buffer {
                    binding,
                    kind,
                    region,
                } => RecordedWrite::Buffer {
                    binding: *binding,
                    kind: *kind,
                    region: *region,
                },
                SetWrite::Images {
                    binding,
                    first_element,
                    textures,
                } => RecordedWrite::Images {
                    binding: *binding,
                    first_element: *first_element,
                    textures: textures.to_vec(),
                },
            }));
        } else {
            log::warn!("RecordingBackend: update of unknown set {:?}", set);
        }
        self.calls.push(BackendCall::UpdateSet(set));
    }

    fn create_buffer(&mut self, size: u64, label: &str) -> BackendResult<BufferHandle> {
        let handle = BufferHandle(self.next_handle());
        log::trace!(
            "RecordingBackend: creating buffer {:?} '{}' (size: {})",
            handle,
            label,
            size
        );
        self.buffers.insert(handle.0, vec![0; size as usize]);
        self.calls.push(BackendCall::CreateBuffer(handle));
        Ok(handle)
    }

    fn write_buffer(
        &mut self,
        buffer: BufferHandle,
        offset: u64,
        data: &[u8],
    ) -> BackendResult<()> {
        let contents = self
            .buffers
            .get_mut(&buffer.0)
            .ok_or_else(|| BackendError::InvalidHandle(format!("{buffer:?}")))?;
        let start = offset as usize;
        let end = start + data.len();
        if end > contents.len() {
            return Err(BackendError::BufferWriteFailed(format!(
                "write of {} bytes at {} overruns buffer of {} bytes",
                data.len(),
                offset,
                contents.len()
            )));
        }
        contents[start..end].copy_from_slice(data);
        self.calls.push(BackendCall::WriteBuffer {
            buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) {
        self.buffers.remove(&buffer.0);
        self.calls.push(BackendCall::DestroyBuffer(buffer));
    }

    fn cmd_bind_sets(&mut self, cmd: CommandStream, bind: &BindSets<'_>) -> BackendResult<()> {
        if !self.pipeline_layouts.contains(&bind.layout.0) {
            return Err(BackendError::InvalidHandle(format!("{:?}", bind.layout)));
        }
        if let Some(unknown) = bind.sets.iter().find(|set| !self.sets.contains_key(&set.0)) {
            return Err(BackendError::InvalidHandle(format!("{unknown:?}")));
        }
        log::trace!(
            "RecordingBackend: bind {} sets at {} ({} dynamic offsets)",
            bind.sets.len(),
            bind.first_set,
            bind.dynamic_offsets.len()
        );
        self.calls.push(BackendCall::BindSets(RecordedBind {
            cmd,
            bind_point: bind.bind_point,
            layout: bind.layout,
            first_set: bind.first_set,
            sets: bind.sets.to_vec(),
            dynamic_offsets: bind.dynamic_offsets.to_vec(),
        }));
        Ok(())
    }
}
