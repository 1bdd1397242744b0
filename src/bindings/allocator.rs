//! Binding-set instances allocated from fixed-capacity pools.
//!
//! Each pool holds `max_sets` sets and `max_sets * multiplier` descriptors
//! per resource kind. Exhausting the pool fails the allocation unless the
//! overflow policy allows chaining another pool of the same size.

use crate::arena::{Arena, ArenaIndex};
use crate::backend::{BackendError, BindingBackend, DescriptorSetHandle, KindCounts, SetPoolHandle};
use crate::config::{BindingConfig, OverflowPolicy};
use crate::error::{BindingError, BindingResult};

use super::layout_cache::{BindingLayoutCache, LayoutHandle};

/// Handle to an allocated set instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SetInstanceHandle(pub(crate) ArenaIndex);

#[derive(Debug)]
struct PoolBlock {
    raw: SetPoolHandle,
    used: KindCounts,
    live: u32,
}

#[derive(Debug)]
struct SetInstance {
    raw: DescriptorSetHandle,
    layout: LayoutHandle,
    pool: usize,
    consumed: KindCounts,
}

/// Allocator of binding-set instances.
#[derive(Debug)]
pub struct BindingSetAllocator {
    pools: Vec<PoolBlock>,
    instances: Arena<SetInstance>,
    max_sets: u32,
    capacity: KindCounts,
    policy: OverflowPolicy,
}

impl BindingSetAllocator {
    /// Create the allocator and its first pool.
    pub fn new<B: BindingBackend>(backend: &mut B, config: &BindingConfig) -> BindingResult<Self> {
        let mut allocator = Self {
            pools: Vec::new(),
            instances: Arena::with_capacity(config.max_sets as usize),
            max_sets: config.max_sets,
            capacity: config.pool_multipliers.capacity(config.max_sets),
            policy: config.overflow_policy,
        };
        allocator.add_pool(backend)?;
        Ok(allocator)
    }

    fn add_pool<B: BindingBackend>(&mut self, backend: &mut B) -> BindingResult<usize> {
        let raw = backend.create_set_pool(self.max_sets, &self.capacity)?;
        self.pools.push(PoolBlock {
            raw,
            used: KindCounts::default(),
            live: 0,
        });
        Ok(self.pools.len() - 1)
    }

    fn exhausted(&self) -> BindingError {
        log::error!(
            "Binding set pool exhausted ({} sets, {} pool(s)); raise max_sets or the pool multipliers",
            self.max_sets,
            self.pools.len()
        );
        BindingError::PoolExhausted {
            max_sets: self.max_sets,
        }
    }

    fn grow<B: BindingBackend>(&mut self, backend: &mut B) -> BindingResult<usize> {
        match self.policy {
            OverflowPolicy::Fail => Err(self.exhausted()),
            OverflowPolicy::GrowWithWarning => {
                log::warn!(
                    "Binding set pool exhausted, adding pool #{} ({} sets)",
                    self.pools.len() + 1,
                    self.max_sets
                );
                self.add_pool(backend)
            }
        }
    }

    /// Allocate a set instance of `layout`.
    pub fn allocate<B: BindingBackend>(
        &mut self,
        backend: &mut B,
        layouts: &BindingLayoutCache,
        layout: LayoutHandle,
    ) -> BindingResult<SetInstanceHandle> {
        let consumed = layouts.descriptor_counts(layout)?;
        let raw_layout = layouts.raw(layout)?;

        if !KindCounts::default().fits(&consumed, &self.capacity) {
            // Would not fit even into an empty pool.
            return Err(self.exhausted());
        }

        let candidate = self
            .pools
            .iter()
            .position(|pool| pool.live < self.max_sets && pool.used.fits(&consumed, &self.capacity));
        let mut pool_index = match candidate {
            Some(index) => index,
            None => self.grow(backend)?,
        };

        let raw = match backend.allocate_set(self.pools[pool_index].raw, raw_layout) {
            Ok(raw) => raw,
            // Fragmentation: the driver ran out before our bookkeeping did.
            Err(BackendError::PoolOutOfMemory) => {
                pool_index = self.grow(backend)?;
                backend.allocate_set(self.pools[pool_index].raw, raw_layout)?
            }
            Err(e) => return Err(e.into()),
        };

        let pool = &mut self.pools[pool_index];
        pool.used.accumulate(&consumed);
        pool.live += 1;

        let handle = SetInstanceHandle(self.instances.insert(SetInstance {
            raw,
            layout,
            pool: pool_index,
            consumed,
        }));
        log::trace!("Allocated set {:?} from pool {}", handle, pool_index);
        Ok(handle)
    }

    /// Return instances to their pools.
    ///
    /// Every handle is checked before anything is freed.
    pub fn free<B: BindingBackend>(
        &mut self,
        backend: &mut B,
        handles: &[SetInstanceHandle],
    ) -> BindingResult<()> {
        if let Some(stale) = handles
            .iter()
            .find(|handle| !self.instances.contains(handle.0))
        {
            return Err(BindingError::StaleHandle(format!("{stale:?}")));
        }

        let mut per_pool: Vec<Vec<DescriptorSetHandle>> = vec![Vec::new(); self.pools.len()];
        for handle in handles {
            let Some(instance) = self.instances.remove(handle.0) else {
                // Listed twice.
                continue;
            };
            let pool = &mut self.pools[instance.pool];
            pool.used.release(&instance.consumed);
            pool.live -= 1;
            per_pool[instance.pool].push(instance.raw);
        }

        for (pool, sets) in per_pool.iter().enumerate() {
            if !sets.is_empty() {
                backend.free_sets(self.pools[pool].raw, sets)?;
            }
        }
        Ok(())
    }

    /// Physical set of an instance.
    pub fn raw(&self, handle: SetInstanceHandle) -> BindingResult<DescriptorSetHandle> {
        self.instances
            .get(handle.0)
            .map(|instance| instance.raw)
            .ok_or_else(|| BindingError::StaleHandle(format!("{handle:?}")))
    }

    pub fn layout_of(&self, handle: SetInstanceHandle) -> BindingResult<LayoutHandle> {
        self.instances
            .get(handle.0)
            .map(|instance| instance.layout)
            .ok_or_else(|| BindingError::StaleHandle(format!("{handle:?}")))
    }

    pub fn is_live(&self, handle: SetInstanceHandle) -> bool {
        self.instances.contains(handle.0)
    }

    /// Number of live instances across all pools.
    pub fn live_sets(&self) -> usize {
        self.instances.len()
    }

    pub fn pool_count(&self) -> usize {
        self.pools.len()
    }

    /// Destroy every pool, releasing all instances at once.
    pub fn destroy<B: BindingBackend>(&mut self, backend: &mut B) {
        self.instances.clear();
        for pool in self.pools.drain(..) {
            backend.destroy_set_pool(pool.raw);
        }
    }
}
