//! Reflected shader resource descriptions.

use std::collections::BTreeMap;

use crate::backend::{LayoutEntry, PushConstantRange, ResourceKind, ShaderStage, ShaderStageFlags};
use crate::error::{BindingError, BindingResult};

/// One resource binding declared by a shader.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindingDescriptor {
    pub binding: u32,
    pub kind: ResourceKind,
    pub stages: ShaderStageFlags,
    /// Array element count, 1 for non-arrays.
    pub array_count: u32,
    /// Struct size for buffers, 0 for images.
    pub size: u64,
    /// Instance name used in source.
    pub name: String,
}

impl BindingDescriptor {
    pub fn new(binding: u32, kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            binding,
            kind,
            stages: ShaderStageFlags::empty(),
            array_count: 1,
            size: 0,
            name: name.into(),
        }
    }

    pub fn with_stages(mut self, stages: ShaderStageFlags) -> Self {
        self.stages = stages;
        self
    }

    pub fn with_size(mut self, size: u64) -> Self {
        self.size = size;
        self
    }

    pub fn with_array_count(mut self, count: u32) -> Self {
        self.array_count = count;
        self
    }

    pub fn layout_entry(&self) -> LayoutEntry {
        LayoutEntry {
            binding: self.binding,
            kind: self.kind,
            count: self.array_count,
            stages: self.stages,
        }
    }
}

/// Bindings of one set, indexed by binding number.
///
/// Equality is structural: two sets are equal when their used bindings have
/// the same binding, kind, array count and stages. Names and the set index
/// are ignored.
#[derive(Debug, Clone, Default)]
pub struct BindingSetDescriptor {
    pub set: u32,
    entries: Vec<Option<BindingDescriptor>>,
}

impl PartialEq for BindingSetDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.bindings()
            .map(BindingDescriptor::layout_entry)
            .eq(other.bindings().map(BindingDescriptor::layout_entry))
    }
}

impl Eq for BindingSetDescriptor {}

impl BindingSetDescriptor {
    pub fn new(set: u32) -> Self {
        Self {
            set,
            entries: Vec::new(),
        }
    }

    /// Builder form of [`Self::insert`].
    pub fn with(mut self, descriptor: BindingDescriptor) -> Self {
        self.insert(descriptor);
        self
    }

    /// Store a binding at its index, growing the table as needed.
    pub fn insert(&mut self, descriptor: BindingDescriptor) -> Option<BindingDescriptor> {
        let index = descriptor.binding as usize;
        if index >= self.entries.len() {
            self.entries.resize(index + 1, None);
        }
        self.entries[index].replace(descriptor)
    }

    pub fn get(&self, binding: u32) -> Option<&BindingDescriptor> {
        self.entries.get(binding as usize).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, binding: u32) -> Option<&mut BindingDescriptor> {
        self.entries
            .get_mut(binding as usize)
            .and_then(Option::as_mut)
    }

    /// Used bindings in ascending binding order.
    pub fn bindings(&self) -> impl Iterator<Item = &BindingDescriptor> + '_ {
        self.entries.iter().flatten()
    }

    pub fn bindings_mut(&mut self) -> impl Iterator<Item = &mut BindingDescriptor> + '_ {
        self.entries.iter_mut().flatten()
    }

    /// Size of the binding table, including unused gaps.
    pub fn table_len(&self) -> usize {
        self.entries.len()
    }

    /// Number of used bindings.
    pub fn len(&self) -> usize {
        self.bindings().count()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings().next().is_none()
    }

    pub fn layout_entries(&self) -> Vec<LayoutEntry> {
        self.bindings().map(BindingDescriptor::layout_entry).collect()
    }

    pub fn find(&self, name: &str) -> Option<&BindingDescriptor> {
        self.bindings().find(|binding| binding.name == name)
    }

    pub fn has_images(&self) -> bool {
        self.bindings()
            .any(|binding| binding.kind == ResourceKind::SampledImage)
    }

    pub fn has_buffers(&self) -> bool {
        self.bindings().any(|binding| binding.kind.is_buffer())
    }

    /// Dynamic bindings, each consuming one dynamic offset at bind time.
    pub fn dynamic_count(&self) -> usize {
        self.bindings()
            .filter(|binding| binding.kind.is_dynamic())
            .map(|binding| binding.array_count as usize)
            .sum()
    }
}

/// A push-constant block of one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushConstantDescriptor {
    pub stage: ShaderStage,
    pub offset: u32,
    pub size: u32,
    pub name: String,
}

/// Everything a shader program declares, merged across its stages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShaderReflection {
    sets: BTreeMap<u32, BindingSetDescriptor>,
    push_constants: BTreeMap<ShaderStage, PushConstantDescriptor>,
}

impl ShaderReflection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a binding, merging stage masks with a binding already at the same
    /// (set, binding).
    ///
    /// A buffer and its dynamic counterpart merge into the dynamic kind.
    pub fn add_binding(&mut self, set: u32, descriptor: BindingDescriptor) -> BindingResult<()> {
        let set_descriptor = self
            .sets
            .entry(set)
            .or_insert_with(|| BindingSetDescriptor::new(set));

        match set_descriptor.get_mut(descriptor.binding) {
            Some(existing) => {
                if existing.kind.to_static() != descriptor.kind.to_static()
                    || existing.array_count != descriptor.array_count
                {
                    return Err(BindingError::Reflection(format!(
                        "set {} binding {} is declared as {:?}[{}] and {:?}[{}]",
                        set,
                        descriptor.binding,
                        existing.kind,
                        existing.array_count,
                        descriptor.kind,
                        descriptor.array_count
                    )));
                }
                if descriptor.kind.is_dynamic() {
                    existing.kind = descriptor.kind;
                }
                existing.stages |= descriptor.stages;
                existing.size = existing.size.max(descriptor.size);
            }
            None => {
                set_descriptor.insert(descriptor);
            }
        }
        Ok(())
    }

    /// Add a push-constant block. Each stage may declare at most one.
    pub fn add_push_constant(&mut self, block: PushConstantDescriptor) -> BindingResult<()> {
        if let Some(existing) = self.push_constants.get(&block.stage) {
            return Err(BindingError::Reflection(format!(
                "stage {} declares push constant blocks '{}' and '{}'",
                block.stage, existing.name, block.name
            )));
        }
        self.push_constants.insert(block.stage, block);
        Ok(())
    }

    /// Merge another reflection into this one.
    pub fn merge(&mut self, other: ShaderReflection) -> BindingResult<()> {
        for (set, descriptor) in other.sets {
            for binding in descriptor.entries.into_iter().flatten() {
                self.add_binding(set, binding)?;
            }
        }
        for (_, block) in other.push_constants {
            self.add_push_constant(block)?;
        }
        Ok(())
    }

    /// Promote a reflected buffer binding to its dynamic counterpart.
    pub fn set_uniform_buffer_as_dynamic(&mut self, name: &str) -> BindingResult<()> {
        let mut found = false;
        for descriptor in self.sets.values_mut() {
            for binding in descriptor.bindings_mut().filter(|binding| binding.name == name) {
                found = true;
                match binding.kind.to_dynamic() {
                    Some(kind) => binding.kind = kind,
                    None => {
                        log::error!(
                            "Cannot promote '{}' of kind {:?} to a dynamic buffer",
                            name,
                            binding.kind
                        );
                        return Err(BindingError::NotPromotable {
                            name: name.to_string(),
                            kind: binding.kind,
                        });
                    }
                }
            }
        }
        if !found {
            log::error!("No binding named '{}' to promote", name);
            return Err(BindingError::UnknownParameter(name.to_string()));
        }
        Ok(())
    }

    /// Locate a binding by instance name.
    pub fn find_binding(&self, name: &str) -> Option<(u32, &BindingDescriptor)> {
        self.sets
            .iter()
            .find_map(|(&set, descriptor)| descriptor.find(name).map(|binding| (set, binding)))
    }

    pub fn set(&self, index: u32) -> Option<&BindingSetDescriptor> {
        self.sets.get(&index)
    }

    /// Sets in ascending set-index order.
    pub fn sets(&self) -> impl Iterator<Item = &BindingSetDescriptor> + '_ {
        self.sets.values()
    }

    pub fn sets_mut(&mut self) -> impl Iterator<Item = &mut BindingSetDescriptor> + '_ {
        self.sets.values_mut()
    }

    pub fn push_constant(&self, stage: ShaderStage) -> Option<&PushConstantDescriptor> {
        self.push_constants.get(&stage)
    }

    pub fn push_constants(&self) -> impl Iterator<Item = &PushConstantDescriptor> + '_ {
        self.push_constants.values()
    }

    pub fn push_constant_ranges(&self) -> Vec<PushConstantRange> {
        self.push_constants
            .values()
            .map(|block| PushConstantRange {
                stages: block.stage.flag(),
                offset: block.offset,
                size: block.size,
            })
            .collect()
    }

    /// Union of every stage that touches a binding or push-constant block.
    pub fn stages(&self) -> ShaderStageFlags {
        let bindings = self
            .sets
            .values()
            .flat_map(|set| set.bindings())
            .fold(ShaderStageFlags::empty(), |acc, binding| acc | binding.stages);
        self.push_constants
            .keys()
            .fold(bindings, |acc, stage| acc | stage.flag())
    }

    pub fn is_empty(&self) -> bool {
        self.sets.is_empty() && self.push_constants.is_empty()
    }
}
