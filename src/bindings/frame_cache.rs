//! Per-frame-in-flight binding state.
//!
//! Each frame owns its batches (one per shader-program instance), the
//! persistent and volatile slot storage that holds its set instances, and
//! the dirty flags and dynamic offsets of every unit. Nothing here is shared
//! between frames.

use std::fmt;

use crate::arena::{Arena, ArenaIndex};
use crate::backend::{BindPoint, DescriptorSetHandle, PipelineLayoutHandle};
use crate::config::{BindingConfig, OverflowPolicy};
use crate::error::{BindingError, BindingResult};

use super::allocator::SetInstanceHandle;

/// Batch index; identical across frames for the same program instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BatchId(pub(crate) u32);

impl BatchId {
    pub fn index(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SlotKind {
    Persistent,
    Volatile,
}

/// Slot holding one set instance in a frame's slot storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotId {
    frame: u32,
    kind: SlotKind,
    index: ArenaIndex,
}

impl SlotId {
    pub fn frame(&self) -> usize {
        self.frame as usize
    }

    pub fn kind(&self) -> SlotKind {
        self.kind
    }
}

/// Contents of a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetSlot {
    pub instance: SetInstanceHandle,
    pub raw: DescriptorSetHandle,
}

/// A persistent set of one batch, at one set index.
#[derive(Debug, Clone)]
pub struct DescriptorSetUnit {
    set_index: u32,
    slot: SlotId,
    raw: DescriptorSetHandle,
    dynamic_offsets: Vec<u32>,
    dirty: bool,
}

impl DescriptorSetUnit {
    /// New unit; starts dirty so its first use binds it.
    pub fn new(set_index: u32, slot: SlotId, raw: DescriptorSetHandle, dynamic_count: usize) -> Self {
        Self {
            set_index,
            slot,
            raw,
            dynamic_offsets: vec![0; dynamic_count],
            dirty: true,
        }
    }

    pub fn set_index(&self) -> u32 {
        self.set_index
    }

    pub fn slot(&self) -> SlotId {
        self.slot
    }

    pub fn raw(&self) -> DescriptorSetHandle {
        self.raw
    }

    /// Dynamic offsets in ascending binding order.
    pub fn dynamic_offsets(&self) -> &[u32] {
        &self.dynamic_offsets
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// Store a dynamic offset and mark the unit dirty.
    pub fn set_dynamic_offset(&mut self, index: usize, offset: u32) {
        if let Some(slot) = self.dynamic_offsets.get_mut(index) {
            *slot = offset;
            self.dirty = true;
        }
    }
}

/// State of one shader-program instance in one frame.
#[derive(Debug, Clone)]
pub struct Batch {
    id: BatchId,
    units: Vec<DescriptorSetUnit>,
    pipeline_layout: Option<PipelineLayoutHandle>,
    bind_point: BindPoint,
}

impl Batch {
    fn new(id: BatchId) -> Self {
        Self {
            id,
            units: Vec::new(),
            pipeline_layout: None,
            bind_point: BindPoint::Graphics,
        }
    }

    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Add a unit, keeping units sorted by set index. Replaces a unit at the
    /// same set index.
    pub fn add_unit(&mut self, unit: DescriptorSetUnit) {
        match self
            .units
            .binary_search_by_key(&unit.set_index, |existing| existing.set_index)
        {
            Ok(position) => self.units[position] = unit,
            Err(position) => self.units.insert(position, unit),
        }
    }

    /// Units in ascending set-index order.
    pub fn units(&self) -> &[DescriptorSetUnit] {
        &self.units
    }

    pub(crate) fn units_mut(&mut self) -> &mut [DescriptorSetUnit] {
        &mut self.units
    }

    pub fn unit(&self, set_index: u32) -> Option<&DescriptorSetUnit> {
        self.units
            .binary_search_by_key(&set_index, |unit| unit.set_index)
            .ok()
            .map(|position| &self.units[position])
    }

    pub fn unit_mut(&mut self, set_index: u32) -> Option<&mut DescriptorSetUnit> {
        self.units
            .binary_search_by_key(&set_index, |unit| unit.set_index)
            .ok()
            .map(|position| &mut self.units[position])
    }

    pub fn mark_all_dirty(&mut self) {
        for unit in &mut self.units {
            unit.mark_dirty();
        }
    }

    pub fn dirty_count(&self) -> usize {
        self.units.iter().filter(|unit| unit.is_dirty()).count()
    }

    pub fn pipeline_layout(&self) -> Option<PipelineLayoutHandle> {
        self.pipeline_layout
    }

    pub fn bind_point(&self) -> BindPoint {
        self.bind_point
    }

    pub(crate) fn set_pipeline(&mut self, layout: PipelineLayoutHandle, bind_point: BindPoint) {
        self.pipeline_layout = Some(layout);
        self.bind_point = bind_point;
    }
}

/// Growable slot storage with a soft limit.
#[derive(Debug)]
struct SlotStorage {
    what: &'static str,
    slots: Arena<SetSlot>,
    limit: usize,
}

impl SlotStorage {
    fn new(what: &'static str, reserve: usize) -> Self {
        Self {
            what,
            slots: Arena::with_capacity(reserve),
            limit: reserve,
        }
    }

    fn insert(
        &mut self,
        slot: SetSlot,
        policy: OverflowPolicy,
        growth: usize,
    ) -> BindingResult<ArenaIndex> {
        if self.slots.len() >= self.limit {
            match policy {
                OverflowPolicy::Fail => {
                    log::error!(
                        "{} slot storage exhausted ({} slots); raise the reservation",
                        self.what,
                        self.limit
                    );
                    return Err(BindingError::CapacityExhausted {
                        what: self.what,
                        capacity: self.limit,
                    });
                }
                OverflowPolicy::GrowWithWarning => {
                    self.limit += growth;
                    log::warn!(
                        "{} slot storage grown to {} slots; initial reservation is too small",
                        self.what,
                        self.limit
                    );
                }
            }
        }
        Ok(self.slots.insert(slot))
    }
}

/// Binding state owned by one frame-in-flight.
#[derive(Debug)]
pub struct FrameBindingCache {
    frame: u32,
    batches: Vec<Batch>,
    persistent: SlotStorage,
    volatile: SlotStorage,
    policy: OverflowPolicy,
    growth: usize,
}

impl FrameBindingCache {
    pub fn new(frame: usize, config: &BindingConfig) -> Self {
        Self {
            frame: frame as u32,
            batches: Vec::new(),
            persistent: SlotStorage::new("Persistent", config.persistent_slot_reserve),
            volatile: SlotStorage::new("Volatile", config.volatile_slot_reserve),
            policy: config.overflow_policy,
            growth: config.slot_growth_increment.max(1),
        }
    }

    pub fn frame(&self) -> usize {
        self.frame as usize
    }

    pub fn new_batch(&mut self) -> BatchId {
        let id = BatchId(self.batches.len() as u32);
        self.batches.push(Batch::new(id));
        id
    }

    /// Drop batch `id` if it is the newest one. Returns whether it was dropped.
    pub(crate) fn discard_batch(&mut self, id: BatchId) -> bool {
        if self.batches.len() != id.0 as usize + 1 {
            return false;
        }
        self.batches.pop();
        true
    }

    /// Store a set instance that lives until teardown.
    pub fn new_persistent_set(&mut self, slot: SetSlot) -> BindingResult<SlotId> {
        let index = self.persistent.insert(slot, self.policy, self.growth)?;
        Ok(SlotId {
            frame: self.frame,
            kind: SlotKind::Persistent,
            index,
        })
    }

    /// Store a set instance that lives until this frame's next reset.
    pub fn new_volatile_set(&mut self, slot: SetSlot) -> BindingResult<SlotId> {
        let index = self.volatile.insert(slot, self.policy, self.growth)?;
        Ok(SlotId {
            frame: self.frame,
            kind: SlotKind::Volatile,
            index,
        })
    }

    /// Release a persistent slot before teardown, returning what it held.
    pub(crate) fn remove_persistent_set(&mut self, id: SlotId) -> Option<SetSlot> {
        if id.frame != self.frame || id.kind != SlotKind::Persistent {
            return None;
        }
        self.persistent.slots.remove(id.index)
    }

    pub fn slot(&self, id: SlotId) -> Option<&SetSlot> {
        if id.frame != self.frame {
            return None;
        }
        match id.kind {
            SlotKind::Persistent => self.persistent.slots.get(id.index),
            SlotKind::Volatile => self.volatile.slots.get(id.index),
        }
    }

    pub fn batch(&self, id: BatchId) -> BindingResult<&Batch> {
        self.batches
            .get(id.0 as usize)
            .ok_or_else(|| BindingError::StaleHandle(format!("batch {id}")))
    }

    pub fn batch_mut(&mut self, id: BatchId) -> BindingResult<&mut Batch> {
        self.batches
            .get_mut(id.0 as usize)
            .ok_or_else(|| BindingError::StaleHandle(format!("batch {id}")))
    }

    pub fn batch_count(&self) -> usize {
        self.batches.len()
    }

    /// Drop every volatile slot, returning the instances to free.
    pub fn reset_volatile(&mut self) -> Vec<SetInstanceHandle> {
        self.volatile
            .slots
            .drain()
            .into_iter()
            .map(|slot| slot.instance)
            .collect()
    }

    /// Drop everything, returning every instance the frame held.
    pub fn clear(&mut self) -> Vec<SetInstanceHandle> {
        let mut instances = self.reset_volatile();
        instances.extend(self.persistent.slots.drain().into_iter().map(|slot| slot.instance));
        self.batches.clear();
        instances
    }

    pub fn persistent_count(&self) -> usize {
        self.persistent.slots.len()
    }

    pub fn volatile_count(&self) -> usize {
        self.volatile.slots.len()
    }

    pub fn persistent_capacity(&self) -> usize {
        self.persistent.limit
    }

    pub fn volatile_capacity(&self) -> usize {
        self.volatile.limit
    }
}
