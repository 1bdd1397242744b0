//! Parameter access for render passes.
//!
//! [`ShaderParamAccess`] maps parameter names of one shader-program instance
//! to physical (set, binding) locations and per-frame backing memory. Writes,
//! texture binds and the final flush go through a [`ParamSession`], which is
//! consumed by [`ParamSession::flush_batch`].

use std::collections::BTreeMap;

use bytemuck::Pod;
use rustc_hash::FxHashMap;

use crate::backend::{
    BindPoint, BindSets, BindingBackend, CommandStream, DescriptorSetHandle, PipelineLayoutHandle,
    ResourceKind, SetWrite, ShaderStageFlags, TextureBinding,
};
use crate::error::{BindingError, BindingResult};
use crate::shader::{BatchSetup, BindingSetDescriptor, ShaderProgram, ShaderReflection};

use super::allocator::{BindingSetAllocator, SetInstanceHandle};
use super::context::{BindingContext, FrameResources};
use super::frame_cache::{BatchId, DescriptorSetUnit, SetSlot, SlotId};
use super::layout_cache::{BindingLayoutCache, LayoutHandle};
use super::uniform_memory::{align_up, UniformRegion};

/// Where a parameter lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParamRecord {
    /// Name of the backing uniform region.
    pub storage_name: String,
    pub set: u32,
    pub binding: u32,
    pub kind: ResourceKind,
    /// Reflected size of one record.
    pub size: u64,
    /// Position of this binding's offset in the unit's dynamic offsets.
    pub dynamic_index: Option<usize>,
}

impl ParamRecord {
    pub fn is_dynamic(&self) -> bool {
        self.dynamic_index.is_some()
    }
}

/// A set made of sampled images, bound per draw through a volatile set.
#[derive(Debug, Clone, Copy)]
struct ImageSet {
    layout: LayoutHandle,
    binding: u32,
    capacity: u32,
}

/// A set made of buffers, built once per frame at setup.
#[derive(Debug)]
struct BufferSet {
    descriptor: BindingSetDescriptor,
    layout: LayoutHandle,
}

/// Parameter access of one shader-program instance.
#[derive(Debug, Default)]
pub struct ShaderParamAccess {
    batch: Option<BatchId>,
    params: FxHashMap<String, ParamRecord>,
    image_sets: BTreeMap<u32, ImageSet>,
    pipeline_layout: Option<PipelineLayoutHandle>,
    bind_point: Option<BindPoint>,
}

/// Resources claimed by a setup in progress, released if it fails.
#[derive(Debug, Default)]
struct SetupUndo {
    /// Batches created, per frame.
    batches: Vec<(usize, BatchId)>,
    /// Per-frame uniform cursor before the setup touched it.
    uniform_marks: Vec<(usize, u64)>,
    slots: Vec<SlotId>,
    instances: Vec<SetInstanceHandle>,
}

impl SetupUndo {
    fn rollback<B: BindingBackend>(
        self,
        backend: &mut B,
        allocator: &mut BindingSetAllocator,
        frames: &mut [FrameResources],
    ) {
        for slot in &self.slots {
            frames[slot.frame()].cache.remove_persistent_set(*slot);
        }
        for &(frame, batch) in &self.batches {
            frames[frame].cache.discard_batch(batch);
        }
        for &(frame, mark) in &self.uniform_marks {
            frames[frame].uniforms.truncate(mark);
        }
        if let Err(err) = allocator.free(backend, &self.instances) {
            log::warn!("Failed to release sets of an aborted setup: {}", err);
        }
    }
}

impl ShaderParamAccess {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set up a program instance: build its buffer sets and backing memory
    /// in every frame-in-flight. Image sets are bound on demand.
    ///
    /// On failure every frame is left as it was.
    pub fn setup_batch<B: BindingBackend>(
        &mut self,
        ctx: &mut BindingContext<B>,
        reflection: &ShaderReflection,
        setup: &BatchSetup,
    ) -> BindingResult<BatchId> {
        if let Some(batch) = self.batch {
            log::error!("Parameter access for batch {} is already set up", batch);
            return Err(BindingError::AlreadySetUp(batch.index()));
        }

        for decl in &setup.dynamic_buffers {
            if reflection.find_binding(&decl.name).is_none() {
                log::error!("Dynamic buffer '{}' is not declared by the shader", decl.name);
                return Err(BindingError::UnknownParameter(decl.name.clone()));
            }
        }
        let reflection = setup.resolve(reflection)?;

        // Validate every set before creating anything.
        let mut sets = Vec::new();
        for set in reflection.sets() {
            if set.has_images() && set.has_buffers() {
                log::error!("Set {} mixes buffer and image bindings", set.set);
                return Err(BindingError::MixedSet(set.set));
            }
            if let Some(array) = set
                .bindings()
                .find(|binding| binding.kind.is_dynamic() && binding.array_count != 1)
            {
                log::error!("Dynamic buffer '{}' is declared as an array", array.name);
                return Err(BindingError::DynamicArray {
                    name: array.name.clone(),
                    count: array.array_count,
                });
            }
            if !set.is_empty() {
                sets.push(set.clone());
            }
        }

        let BindingContext {
            backend,
            layouts,
            allocator,
            frames,
            ..
        } = ctx;

        let mut buffer_sets = Vec::new();
        let mut image_sets = BTreeMap::new();
        let mut pipeline_sets = Vec::with_capacity(sets.len());
        for set in sets {
            let layout = layouts.create_layout(backend, &set)?;
            pipeline_sets.push((set.set, layout));
            if set.has_images() {
                if let Some(image) = set
                    .bindings()
                    .find(|binding| binding.kind == ResourceKind::SampledImage)
                {
                    image_sets.insert(
                        set.set,
                        ImageSet {
                            layout,
                            binding: image.binding,
                            capacity: image.array_count,
                        },
                    );
                }
            } else {
                buffer_sets.push(BufferSet {
                    descriptor: set,
                    layout,
                });
            }
        }

        let pipeline_layout = layouts.pipeline_layout(
            backend,
            &pipeline_sets,
            &reflection.push_constant_ranges(),
        )?;
        let bind_point = if reflection.stages().contains(ShaderStageFlags::COMPUTE) {
            BindPoint::Compute
        } else {
            BindPoint::Graphics
        };

        // Frames hold the same batches, so the next id is shared.
        let next = frames.first().map_or(0, |frame| frame.cache.batch_count());
        let batch_id = BatchId(next as u32);
        let mut undo = SetupUndo::default();
        let built = build_frames(
            backend,
            layouts,
            allocator,
            frames,
            &buffer_sets,
            setup,
            batch_id,
            (pipeline_layout, bind_point),
            &mut undo,
        );
        let params = match built {
            Ok(params) => params,
            Err(err) => {
                log::error!(
                    "Setup of batch {} failed, releasing its resources: {}",
                    batch_id,
                    err
                );
                undo.rollback(backend, allocator, frames);
                return Err(err);
            }
        };

        log::debug!(
            "Set up batch {}: {} buffer set(s), {} image set(s), {} parameter(s)",
            batch_id,
            buffer_sets.len(),
            image_sets.len(),
            params.len()
        );

        self.batch = Some(batch_id);
        self.params = params;
        self.image_sets = image_sets;
        self.pipeline_layout = Some(pipeline_layout);
        self.bind_point = Some(bind_point);
        Ok(batch_id)
    }

    /// [`Self::setup_batch`] with a program's reflection and declarations.
    pub fn setup_program<B: BindingBackend>(
        &mut self,
        ctx: &mut BindingContext<B>,
        program: &ShaderProgram,
    ) -> BindingResult<BatchId> {
        self.setup_batch(ctx, program.reflection(), program.setup())
    }

    /// Start recording parameter writes for the context's current frame.
    pub fn session<'a, B: BindingBackend>(
        &'a self,
        ctx: &'a mut BindingContext<B>,
        cmd: CommandStream,
    ) -> BindingResult<ParamSession<'a, B>> {
        let batch = self.batch.ok_or(BindingError::NotSetUp)?;
        Ok(ParamSession {
            access: self,
            ctx,
            batch,
            cmd,
        })
    }

    pub fn is_set_up(&self) -> bool {
        self.batch.is_some()
    }

    pub fn batch_id(&self) -> Option<BatchId> {
        self.batch
    }

    pub fn pipeline_layout(&self) -> Option<PipelineLayoutHandle> {
        self.pipeline_layout
    }

    pub fn param(&self, name: &str) -> Option<&ParamRecord> {
        self.params.get(name)
    }

    pub fn params(&self) -> impl Iterator<Item = (&str, &ParamRecord)> + '_ {
        self.params.iter().map(|(name, record)| (name.as_str(), record))
    }

    fn record(&self, name: &str) -> BindingResult<&ParamRecord> {
        self.params.get(name).ok_or_else(|| {
            log::error!("Unknown shader parameter '{}'", name);
            BindingError::UnknownParameter(name.to_string())
        })
    }
}

/// Create batch `id` with its buffer sets and uniform regions in every frame,
/// logging each claimed resource in `undo`.
#[allow(clippy::too_many_arguments)]
fn build_frames<B: BindingBackend>(
    backend: &mut B,
    layouts: &BindingLayoutCache,
    allocator: &mut BindingSetAllocator,
    frames: &mut [FrameResources],
    buffer_sets: &[BufferSet],
    setup: &BatchSetup,
    id: BatchId,
    (pipeline_layout, bind_point): (PipelineLayoutHandle, BindPoint),
    undo: &mut SetupUndo,
) -> BindingResult<FxHashMap<String, ParamRecord>> {
    let mut params = FxHashMap::default();
    for (index, frame) in frames.iter_mut().enumerate() {
        undo.uniform_marks.push((index, frame.uniforms.used()));
        let created = frame.cache.new_batch();
        undo.batches.push((index, created));
        if created != id {
            log::error!(
                "Frame {} is out of step: expected batch {}, got {}",
                index,
                id,
                created
            );
            return Err(BindingError::StaleHandle(format!("batch {created}")));
        }

        for buffer_set in buffer_sets {
            let instance = allocator.allocate(backend, layouts, buffer_set.layout)?;
            undo.instances.push(instance);
            let raw = allocator.raw(instance)?;
            let slot = frame.cache.new_persistent_set(SetSlot { instance, raw })?;
            undo.slots.push(slot);

            let set_index = buffer_set.descriptor.set;
            let mut writes = Vec::new();
            let mut dynamic_count = 0;
            for binding in buffer_set.descriptor.bindings() {
                let storage_name = if setup.is_shared(&binding.name) {
                    binding.name.clone()
                } else {
                    format!("{}#{}", binding.name, id)
                };

                let dynamic_index = if binding.kind.is_dynamic() {
                    let count = setup
                        .dynamic_decl(&binding.name)
                        .map_or(1, |decl| decl.count);
                    frame
                        .uniforms
                        .alloc_dynamic_uniform(&storage_name, binding.size, count)?;
                    dynamic_count += 1;
                    Some(dynamic_count - 1)
                } else {
                    frame.uniforms.alloc_uniform(&storage_name, binding.size)?;
                    None
                };

                writes.push(SetWrite::Buffer {
                    binding: binding.binding,
                    kind: binding.kind,
                    region: frame.uniforms.generate_buffer_region(&storage_name)?,
                });

                params.entry(binding.name.clone()).or_insert(ParamRecord {
                    storage_name,
                    set: set_index,
                    binding: binding.binding,
                    kind: binding.kind,
                    size: binding.size,
                    dynamic_index,
                });
            }

            backend.update_set(raw, &writes);
            let batch = frame.cache.batch_mut(id)?;
            batch.add_unit(DescriptorSetUnit::new(set_index, slot, raw, dynamic_count));
        }

        frame
            .cache
            .batch_mut(id)?
            .set_pipeline(pipeline_layout, bind_point);
    }
    Ok(params)
}

/// A dynamic offset whose record of `elem_size` bytes lies inside `region`.
fn checked_offset(
    name: &str,
    region: &UniformRegion,
    offset: u64,
    elem_size: u64,
) -> BindingResult<u32> {
    let end = offset.saturating_add(elem_size);
    if end > region.size() {
        log::error!(
            "Record at offset {} of '{}' ends past its {} bytes",
            offset,
            name,
            region.size()
        );
        return Err(BindingError::DataTooLarge {
            name: name.to_string(),
            size: end,
            capacity: region.size(),
        });
    }
    u32::try_from(offset).map_err(|_| BindingError::DataTooLarge {
        name: name.to_string(),
        size: end,
        capacity: u64::from(u32::MAX),
    })
}

/// Writes and binds for one program instance within one frame.
///
/// Dropping the session without [`flush_batch`](Self::flush_batch) leaves
/// dirty units for the next flush.
pub struct ParamSession<'a, B: BindingBackend> {
    access: &'a ShaderParamAccess,
    ctx: &'a mut BindingContext<B>,
    batch: BatchId,
    cmd: CommandStream,
}

impl<'a, B: BindingBackend> ParamSession<'a, B> {
    fn mark_unit_dirty(&mut self, set: u32) -> BindingResult<()> {
        let frame = self.ctx.current_frame;
        if let Some(unit) = self.ctx.frames[frame]
            .cache
            .batch_mut(self.batch)?
            .unit_mut(set)
        {
            unit.mark_dirty();
        }
        Ok(())
    }

    fn set_active_offset(&mut self, record: &ParamRecord, offset: u32) -> BindingResult<()> {
        let frame = self.ctx.current_frame;
        let index = record
            .dynamic_index
            .ok_or_else(|| BindingError::MissingDynamicDeclaration(record.storage_name.clone()))?;
        if let Some(unit) = self.ctx.frames[frame]
            .cache
            .batch_mut(self.batch)?
            .unit_mut(record.set)
        {
            unit.set_dynamic_offset(index, offset);
        }
        Ok(())
    }

    fn dynamic_record(&self, name: &str) -> BindingResult<&'a ParamRecord> {
        let access: &'a ShaderParamAccess = self.access;
        let record = access.record(name)?;
        if !record.is_dynamic() {
            log::error!("Parameter '{}' is not a dynamic buffer", name);
            return Err(BindingError::MissingDynamicDeclaration(name.to_string()));
        }
        Ok(record)
    }

    /// Write bytes at the start of a parameter's storage.
    pub fn set_buffer_data(&mut self, name: &str, data: &[u8]) -> BindingResult<()> {
        let access: &'a ShaderParamAccess = self.access;
        let record = access.record(name)?;
        let frame = self.ctx.current_frame;
        let BindingContext {
            backend, frames, ..
        } = &mut *self.ctx;
        frames[frame]
            .uniforms
            .set_uniform(backend, &record.storage_name, data)?;
        self.mark_unit_dirty(record.set)
    }

    /// Write `elem_count` records starting at record `elem_offset`, and make
    /// `elem_offset` the active record.
    pub fn set_dynamic_buffer_data(
        &mut self,
        name: &str,
        data: &[u8],
        elem_size: u64,
        elem_count: u32,
        elem_offset: u32,
    ) -> BindingResult<()> {
        let record = self.dynamic_record(name)?;
        let expected = elem_size * elem_count as u64;
        if (data.len() as u64) < expected {
            return Err(BindingError::DataTooShort {
                name: name.to_string(),
                expected,
                actual: data.len() as u64,
            });
        }

        let frame = self.ctx.current_frame;
        let BindingContext {
            backend, frames, ..
        } = &mut *self.ctx;
        let uniforms = &frames[frame].uniforms;
        let region = uniforms.region(&record.storage_name)?;
        let stride = align_up(elem_size.max(1), uniforms.alignment());
        // The whole run must fit, and an empty run still selects a record.
        let last = elem_offset as u64 + (elem_count as u64).saturating_sub(1);
        checked_offset(name, region, last * stride, elem_size)?;
        let offset = checked_offset(name, region, elem_offset as u64 * stride, elem_size)?;

        for i in 0..elem_count as u64 {
            let start = (i * elem_size) as usize;
            let chunk = &data[start..start + elem_size as usize];
            uniforms.write(
                backend,
                &record.storage_name,
                (elem_offset as u64 + i) * stride,
                chunk,
            )?;
        }

        self.set_active_offset(record, offset)
    }

    /// Select record `elem_index` for the next bind.
    ///
    /// The stored offset is `elem_index * align_up(elem_size, min_alignment)`.
    pub fn set_dynamic_buffer_offset(
        &mut self,
        name: &str,
        elem_size: u64,
        elem_index: u32,
    ) -> BindingResult<()> {
        let record = self.dynamic_record(name)?;
        let frame = self.ctx.current_frame;
        let uniforms = &self.ctx.frames[frame].uniforms;
        let offset = elem_index as u64 * align_up(elem_size.max(1), uniforms.alignment());
        let region = uniforms.region(&record.storage_name)?;
        let offset = checked_offset(name, region, offset, elem_size)?;
        self.set_active_offset(record, offset)
    }

    /// Typed [`Self::set_buffer_data`].
    pub fn set_uniform<T: Pod>(&mut self, name: &str, value: &T) -> BindingResult<()> {
        self.set_buffer_data(name, bytemuck::bytes_of(value))
    }

    /// Typed [`Self::set_dynamic_buffer_data`].
    pub fn set_dynamic_uniform<T: Pod>(
        &mut self,
        name: &str,
        values: &[T],
        elem_offset: u32,
    ) -> BindingResult<()> {
        self.set_dynamic_buffer_data(
            name,
            bytemuck::cast_slice(values),
            std::mem::size_of::<T>() as u64,
            values.len() as u32,
            elem_offset,
        )
    }

    /// Bind one texture at set index `slot` through a volatile set.
    pub fn bind_texture_slot(&mut self, slot: u32, texture: TextureBinding) -> BindingResult<()> {
        self.bind_texture_array_slot(slot, &[texture])
    }

    /// Bind textures to consecutive array elements of the image binding at
    /// set index `slot`, through a volatile set bound immediately.
    pub fn bind_texture_array_slot(
        &mut self,
        slot: u32,
        textures: &[TextureBinding],
    ) -> BindingResult<()> {
        let image_set = *self
            .access
            .image_sets
            .get(&slot)
            .ok_or(BindingError::NoImageBinding(slot))?;
        if textures.len() > image_set.capacity as usize {
            return Err(BindingError::TooManyTextures {
                set: slot,
                binding: image_set.binding,
                count: textures.len(),
                capacity: image_set.capacity,
            });
        }
        let pipeline_layout = self.access.pipeline_layout.ok_or(BindingError::NotSetUp)?;
        let bind_point = self.access.bind_point.unwrap_or(BindPoint::Graphics);

        let frame = self.ctx.current_frame;
        let BindingContext {
            backend,
            layouts,
            allocator,
            frames,
            ..
        } = &mut *self.ctx;

        let instance = allocator.allocate(backend, layouts, image_set.layout)?;
        let raw = allocator.raw(instance)?;
        frames[frame]
            .cache
            .new_volatile_set(SetSlot { instance, raw })?;

        backend.update_set(
            raw,
            &[SetWrite::Images {
                binding: image_set.binding,
                first_element: 0,
                textures,
            }],
        );
        backend.cmd_bind_sets(
            self.cmd,
            &BindSets {
                bind_point,
                layout: pipeline_layout,
                first_set: slot,
                sets: &[raw],
                dynamic_offsets: &[],
            },
        )?;
        Ok(())
    }

    /// Force every persistent set to be re-bound on the next flush.
    pub fn mark_as_dirty(&mut self) -> BindingResult<()> {
        let frame = self.ctx.current_frame;
        self.ctx.frames[frame]
            .cache
            .batch_mut(self.batch)?
            .mark_all_dirty();
        Ok(())
    }

    /// Bind every dirty set, one bind call per run of contiguous dirty set
    /// indices. Returns the number of bind calls issued.
    pub fn flush_batch(self) -> BindingResult<usize> {
        let pipeline_layout = self.access.pipeline_layout.ok_or(BindingError::NotSetUp)?;
        let bind_point = self.access.bind_point.unwrap_or(BindPoint::Graphics);
        let frame = self.ctx.current_frame;
        let BindingContext {
            backend, frames, ..
        } = &mut *self.ctx;
        let units = frames[frame].cache.batch_mut(self.batch)?.units_mut();

        let mut sets: Vec<DescriptorSetHandle> = Vec::new();
        let mut offsets: Vec<u32> = Vec::new();
        let mut binds = 0;
        let mut start = 0;
        while start < units.len() {
            if !units[start].is_dirty() {
                start += 1;
                continue;
            }
            let mut end = start + 1;
            while end < units.len()
                && units[end].is_dirty()
                && units[end].set_index() == units[end - 1].set_index() + 1
            {
                end += 1;
            }

            sets.clear();
            offsets.clear();
            for unit in &units[start..end] {
                sets.push(unit.raw());
                offsets.extend_from_slice(unit.dynamic_offsets());
            }
            backend.cmd_bind_sets(
                self.cmd,
                &BindSets {
                    bind_point,
                    layout: pipeline_layout,
                    first_set: units[start].set_index(),
                    sets: &sets,
                    dynamic_offsets: &offsets,
                },
            )?;
            for unit in &mut units[start..end] {
                unit.mark_clean();
            }
            binds += 1;
            start = end;
        }
        Ok(binds)
    }
}
