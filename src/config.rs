//! Binding layer configuration.

use std::path::PathBuf;

use crate::backend::{KindCounts, ResourceKind};

/// What to do when a pool or slot storage runs out of room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Report the pool as under-provisioned.
    #[default]
    Fail,
    /// Grow with a logged warning.
    GrowWithWarning,
}

/// Descriptors reserved per set, by resource kind.
///
/// A pool for `max_sets` sets holds `max_sets * multiplier` descriptors of
/// each kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolMultipliers {
    pub uniform_buffer: u32,
    pub uniform_buffer_dynamic: u32,
    pub storage_buffer: u32,
    pub storage_buffer_dynamic: u32,
    pub sampled_image: u32,
}

impl Default for PoolMultipliers {
    fn default() -> Self {
        Self {
            uniform_buffer: 4,
            uniform_buffer_dynamic: 2,
            storage_buffer: 2,
            storage_buffer_dynamic: 1,
            sampled_image: 8,
        }
    }
}

impl PoolMultipliers {
    pub fn get(&self, kind: ResourceKind) -> u32 {
        match kind {
            ResourceKind::UniformBuffer => self.uniform_buffer,
            ResourceKind::UniformBufferDynamic => self.uniform_buffer_dynamic,
            ResourceKind::StorageBuffer => self.storage_buffer,
            ResourceKind::StorageBufferDynamic => self.storage_buffer_dynamic,
            ResourceKind::SampledImage => self.sampled_image,
        }
    }

    /// Per-kind capacity of one pool holding `max_sets` sets.
    pub fn capacity(&self, max_sets: u32) -> KindCounts {
        let mut counts = KindCounts::default();
        for kind in ResourceKind::ALL {
            counts.add(kind, max_sets.saturating_mul(self.get(kind)));
        }
        counts
    }
}

/// Binding layer configuration
#[derive(Debug, Clone)]
pub struct BindingConfig {
    /// Number of frames the CPU may prepare ahead of the GPU
    pub frames_in_flight: usize,
    /// Maximum set instances per pool
    pub max_sets: u32,
    /// Descriptors reserved per set, by kind
    pub pool_multipliers: PoolMultipliers,
    /// Initial persistent slots per frame
    pub persistent_slot_reserve: usize,
    /// Initial volatile slots per frame
    pub volatile_slot_reserve: usize,
    /// Slots added when slot storage grows
    pub slot_growth_increment: usize,
    /// Bytes of backing uniform memory per frame
    pub uniform_memory_per_frame: u64,
    /// Capacity exhaustion policy, applied to every pool
    pub overflow_policy: OverflowPolicy,
    /// Where compiled shader artifacts are cached; `None` disables the cache
    pub shader_cache_dir: Option<PathBuf>,
}

impl Default for BindingConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 2,
            max_sets: 1024,
            pool_multipliers: PoolMultipliers::default(),
            persistent_slot_reserve: 256,
            volatile_slot_reserve: 256,
            slot_growth_increment: 64,
            uniform_memory_per_frame: 4 * 1024 * 1024,
            overflow_policy: OverflowPolicy::Fail,
            shader_cache_dir: None,
        }
    }
}

impl BindingConfig {
    pub fn with_frames_in_flight(mut self, frames: usize) -> Self {
        self.frames_in_flight = frames.max(1);
        self
    }

    pub fn with_max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    pub fn with_pool_multipliers(mut self, multipliers: PoolMultipliers) -> Self {
        self.pool_multipliers = multipliers;
        self
    }

    pub fn with_slot_reserve(mut self, persistent: usize, volatile: usize) -> Self {
        self.persistent_slot_reserve = persistent;
        self.volatile_slot_reserve = volatile;
        self
    }

    pub fn with_slot_growth_increment(mut self, increment: usize) -> Self {
        self.slot_growth_increment = increment.max(1);
        self
    }

    pub fn with_uniform_memory_per_frame(mut self, bytes: u64) -> Self {
        self.uniform_memory_per_frame = bytes;
        self
    }

    pub fn with_overflow_policy(mut self, policy: OverflowPolicy) -> Self {
        self.overflow_policy = policy;
        self
    }

    pub fn with_shader_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shader_cache_dir = Some(dir.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = BindingConfig::default();
        assert_eq!(config.frames_in_flight, 2);
        assert_eq!(config.overflow_policy, OverflowPolicy::Fail);
        assert!(config.shader_cache_dir.is_none());
    }

    #[test]
    fn test_pool_capacity() {
        let capacity = PoolMultipliers::default().capacity(10);
        assert_eq!(capacity.get(ResourceKind::UniformBuffer), 40);
        assert_eq!(capacity.get(ResourceKind::SampledImage), 80);
    }

    #[test]
    fn test_frames_in_flight_is_at_least_one() {
        let config = BindingConfig::default().with_frames_in_flight(0);
        assert_eq!(config.frames_in_flight, 1);
    }
}
