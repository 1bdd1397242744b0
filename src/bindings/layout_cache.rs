//! Deduplicated binding-set and pipeline layouts.
//!
//! Layouts are keyed by shape only: two unrelated programs declaring the
//! same (binding, kind, count, stages) sequence at any set index share one
//! physical layout object. Layouts live until [`BindingLayoutCache::destroy`].

use rustc_hash::FxHashMap;

use crate::backend::{
    BindingBackend, KindCounts, LayoutEntry, PipelineLayoutHandle, PushConstantRange,
    SetLayoutHandle,
};
use crate::error::{BindingError, BindingResult};
use crate::shader::BindingSetDescriptor;

/// Opaque handle to a cached set layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct LayoutHandle(u32);

impl LayoutHandle {
    pub fn index(&self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug)]
struct CachedLayout {
    entries: Vec<LayoutEntry>,
    raw: SetLayoutHandle,
    descriptor_counts: KindCounts,
    dynamic_count: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PipelineLayoutKey {
    sets: Vec<LayoutHandle>,
    push_constants: Vec<PushConstantRange>,
}

#[inline]
fn hash_combine(seed: &mut u64, value: u64) {
    *seed ^= value
        .wrapping_add(0x9e37_79b9_7f4a_7c15)
        .wrapping_add(*seed << 6)
        .wrapping_add(*seed >> 2);
}

/// Hash of a sorted layout entry list.
pub fn layout_hash(entries: &[LayoutEntry]) -> u64 {
    let mut seed = 0u64;
    hash_combine(&mut seed, entries.len() as u64);
    for entry in entries {
        let packed = entry.binding as u64
            | (entry.kind.code() as u64) << 8
            | (entry.count as u64) << 16
            | (entry.stages.bits() as u64) << 24;
        hash_combine(&mut seed, packed);
    }
    seed
}

/// Process-wide cache of set and pipeline layouts.
#[derive(Debug, Default)]
pub struct BindingLayoutCache {
    layouts: Vec<CachedLayout>,
    by_hash: FxHashMap<u64, Vec<LayoutHandle>>,
    empty: Option<LayoutHandle>,
    pipeline_layouts: FxHashMap<PipelineLayoutKey, PipelineLayoutHandle>,
}

impl BindingLayoutCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout for a reflected set.
    pub fn create_layout<B: BindingBackend>(
        &mut self,
        backend: &mut B,
        set: &BindingSetDescriptor,
    ) -> BindingResult<LayoutHandle> {
        self.create_layout_from_entries(backend, &set.layout_entries())
    }

    /// Layout for a list of entries, in any order.
    pub fn create_layout_from_entries<B: BindingBackend>(
        &mut self,
        backend: &mut B,
        entries: &[LayoutEntry],
    ) -> BindingResult<LayoutHandle> {
        let mut entries = entries.to_vec();
        if !entries.windows(2).all(|pair| pair[0].binding <= pair[1].binding) {
            entries.sort_by_key(|entry| entry.binding);
        }

        let hash = layout_hash(&entries);
        if let Some(candidates) = self.by_hash.get(&hash) {
            if let Some(&handle) = candidates
                .iter()
                .find(|handle| self.layouts[handle.index()].entries == entries)
            {
                log::trace!("Layout cache hit: {:?}", handle);
                return Ok(handle);
            }
        }

        let raw = backend.create_set_layout(&entries)?;
        let mut descriptor_counts = KindCounts::default();
        let mut dynamic_count = 0;
        for entry in &entries {
            descriptor_counts.add(entry.kind, entry.count);
            if entry.kind.is_dynamic() {
                dynamic_count += entry.count as usize;
            }
        }

        let handle = LayoutHandle(self.layouts.len() as u32);
        log::debug!(
            "Created set layout {:?} ({} bindings, hash {:016x})",
            handle,
            entries.len(),
            hash
        );
        self.layouts.push(CachedLayout {
            entries,
            raw,
            descriptor_counts,
            dynamic_count,
        });
        self.by_hash.entry(hash).or_default().push(handle);
        Ok(handle)
    }

    /// The layout with no bindings, used to fill gaps in set indices.
    pub fn empty_layout<B: BindingBackend>(&mut self, backend: &mut B) -> BindingResult<LayoutHandle> {
        if let Some(handle) = self.empty {
            return Ok(handle);
        }
        let handle = self.create_layout_from_entries(backend, &[])?;
        self.empty = Some(handle);
        Ok(handle)
    }

    /// Pipeline layout for `(set index, layout)` pairs plus push constants.
    ///
    /// Set indices below the highest one that have no layout get the empty layout.
    pub fn pipeline_layout<B: BindingBackend>(
        &mut self,
        backend: &mut B,
        sets: &[(u32, LayoutHandle)],
        push_constants: &[PushConstantRange],
    ) -> BindingResult<PipelineLayoutHandle> {
        let set_count = sets.iter().map(|&(index, _)| index + 1).max().unwrap_or(0);
        let mut slots: Vec<Option<LayoutHandle>> = vec![None; set_count as usize];
        for &(index, layout) in sets {
            self.entry(layout)?;
            slots[index as usize] = Some(layout);
        }
        let mut handles = Vec::with_capacity(slots.len());
        for slot in slots {
            match slot {
                Some(layout) => handles.push(layout),
                None => handles.push(self.empty_layout(backend)?),
            }
        }

        let key = PipelineLayoutKey {
            sets: handles,
            push_constants: push_constants.to_vec(),
        };
        if let Some(&layout) = self.pipeline_layouts.get(&key) {
            return Ok(layout);
        }

        let raw_sets: Vec<SetLayoutHandle> = key
            .sets
            .iter()
            .map(|handle| self.layouts[handle.index()].raw)
            .collect();
        let layout = backend.create_pipeline_layout(&raw_sets, push_constants)?;
        log::debug!(
            "Created pipeline layout {:?} ({} sets, {} push ranges)",
            layout,
            raw_sets.len(),
            push_constants.len()
        );
        self.pipeline_layouts.insert(key, layout);
        Ok(layout)
    }

    fn entry(&self, handle: LayoutHandle) -> BindingResult<&CachedLayout> {
        self.layouts
            .get(handle.index())
            .ok_or_else(|| BindingError::StaleHandle(format!("{handle:?}")))
    }

    /// Physical layout object.
    pub fn raw(&self, handle: LayoutHandle) -> BindingResult<SetLayoutHandle> {
        Ok(self.entry(handle)?.raw)
    }

    pub fn entries(&self, handle: LayoutHandle) -> BindingResult<&[LayoutEntry]> {
        Ok(&self.entry(handle)?.entries)
    }

    /// Descriptors one set of this layout consumes, per kind.
    pub fn descriptor_counts(&self, handle: LayoutHandle) -> BindingResult<KindCounts> {
        Ok(self.entry(handle)?.descriptor_counts)
    }

    /// Dynamic offsets one set of this layout takes at bind time.
    pub fn dynamic_count(&self, handle: LayoutHandle) -> BindingResult<usize> {
        Ok(self.entry(handle)?.dynamic_count)
    }

    /// Number of distinct set layouts.
    pub fn len(&self) -> usize {
        self.layouts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.layouts.is_empty()
    }

    pub fn pipeline_layout_count(&self) -> usize {
        self.pipeline_layouts.len()
    }

    /// Destroy every layout object. The cache is empty afterwards.
    pub fn destroy<B: BindingBackend>(&mut self, backend: &mut B) {
        for (_, layout) in self.pipeline_layouts.drain() {
            backend.destroy_pipeline_layout(layout);
        }
        for layout in self.layouts.drain(..) {
            backend.destroy_set_layout(layout.raw);
        }
        self.by_hash.clear();
        self.empty = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{RecordingBackend, ResourceKind, ShaderStageFlags};
    use crate::shader::BindingDescriptor;

    fn entry(binding: u32, kind: ResourceKind) -> LayoutEntry {
        LayoutEntry {
            binding,
            kind,
            count: 1,
            stages: ShaderStageFlags::VERTEX,
        }
    }

    #[test]
    fn test_unsorted_entries_are_normalized() {
        let mut backend = RecordingBackend::new();
        let mut cache = BindingLayoutCache::new();
        let a = cache
            .create_layout_from_entries(
                &mut backend,
                &[
                    entry(0, ResourceKind::UniformBuffer),
                    entry(1, ResourceKind::SampledImage),
                ],
            )
            .unwrap();
        let b = cache
            .create_layout_from_entries(
                &mut backend,
                &[
                    entry(1, ResourceKind::SampledImage),
                    entry(0, ResourceKind::UniformBuffer),
                ],
            )
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(backend.live_set_layouts(), 1);
    }

    #[test]
    fn test_names_do_not_affect_identity() {
        let mut backend = RecordingBackend::new();
        let mut cache = BindingLayoutCache::new();
        let a = BindingSetDescriptor::new(0).with(
            BindingDescriptor::new(0, ResourceKind::UniformBuffer, "camera")
                .with_stages(ShaderStageFlags::VERTEX),
        );
        let b = BindingSetDescriptor::new(3).with(
            BindingDescriptor::new(0, ResourceKind::UniformBuffer, "view")
                .with_stages(ShaderStageFlags::VERTEX),
        );
        assert_eq!(
            cache.create_layout(&mut backend, &a).unwrap(),
            cache.create_layout(&mut backend, &b).unwrap()
        );
    }

    #[test]
    fn test_descriptor_counts() {
        let mut backend = RecordingBackend::new();
        let mut cache = BindingLayoutCache::new();
        let mut textures = entry(1, ResourceKind::SampledImage);
        textures.count = 4;
        let layout = cache
            .create_layout_from_entries(
                &mut backend,
                &[entry(0, ResourceKind::UniformBufferDynamic), textures],
            )
            .unwrap();
        let counts = cache.descriptor_counts(layout).unwrap();
        assert_eq!(counts.get(ResourceKind::SampledImage), 4);
        assert_eq!(cache.dynamic_count(layout).unwrap(), 1);
    }

    #[test]
    fn test_pipeline_layout_fills_gaps_and_dedups() {
        let mut backend = RecordingBackend::new();
        let mut cache = BindingLayoutCache::new();
        let layout = cache
            .create_layout_from_entries(&mut backend, &[entry(0, ResourceKind::UniformBuffer)])
            .unwrap();

        let a = cache
            .pipeline_layout(&mut backend, &[(2, layout)], &[])
            .unwrap();
        let b = cache
            .pipeline_layout(&mut backend, &[(2, layout)], &[])
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(cache.pipeline_layout_count(), 1);
        // The gap layout is created once.
        assert_eq!(cache.len(), 2);

        cache.destroy(&mut backend);
        assert_eq!(backend.live_set_layouts(), 0);
        assert_eq!(backend.live_pipeline_layouts(), 0);
    }
}
