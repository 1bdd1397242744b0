//! Shader reflection.
//!
//! [`ShaderReflector::process_stage`] resolves a SPIR-V artifact for one
//! stage (from the artifact cache or a fresh compile) and folds the
//! resources the stage's entry point uses into a [`ShaderReflection`].

use std::fs;
use std::path::{Path, PathBuf};

use crate::backend::{ResourceKind, ShaderStage};
use crate::error::{BindingError, BindingResult};

use super::cache::ArtifactCache;
use super::compiler::{naga_stage, CompileOptions, NagaCompiler, ShaderCompiler};
use super::reflection::{BindingDescriptor, PushConstantDescriptor, ShaderReflection};

/// A compiled shader stage.
#[derive(Debug, Clone)]
pub struct CompiledModule {
    pub stage: ShaderStage,
    pub entry_point: String,
    pub source_path: PathBuf,
    /// SPIR-V words.
    pub spirv: Vec<u32>,
    /// Compiler warnings; 0 when loaded from the cache.
    pub warnings: usize,
    pub from_cache: bool,
}

/// Compiles shader stages and reflects their resources.
#[derive(Debug, Clone, Default)]
pub struct ShaderReflector<C: ShaderCompiler = NagaCompiler> {
    compiler: C,
    cache: Option<ArtifactCache>,
}

impl ShaderReflector<NagaCompiler> {
    /// Reflector using naga, caching artifacts under `cache_dir` if given.
    pub fn with_cache_dir(cache_dir: Option<PathBuf>) -> Self {
        Self::new(NagaCompiler, cache_dir.map(ArtifactCache::new))
    }
}

impl<C: ShaderCompiler> ShaderReflector<C> {
    pub fn new(compiler: C, cache: Option<ArtifactCache>) -> Self {
        Self { compiler, cache }
    }

    pub fn cache(&self) -> Option<&ArtifactCache> {
        self.cache.as_ref()
    }

    /// Compile (or load) one stage and accumulate its resources into `reflection`.
    ///
    /// On failure `reflection` is left untouched.
    pub fn process_stage(
        &self,
        path: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
        reflection: &mut ShaderReflection,
    ) -> BindingResult<CompiledModule> {
        let module = self.resolve_binary(path, stage, options)?;
        let stage_reflection = reflect_spirv(&module.spirv, stage, &module.entry_point)?;

        log::debug!(
            "Reflected {} ({}): {} set(s), {} push constant block(s)",
            path.display(),
            stage,
            stage_reflection.sets().count(),
            stage_reflection.push_constants().count()
        );

        reflection.merge(stage_reflection)?;
        Ok(module)
    }

    fn resolve_binary(
        &self,
        path: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> BindingResult<CompiledModule> {
        if let Some(cache) = &self.cache {
            if let Some(spirv) = cache.load(path, stage, options)? {
                return Ok(CompiledModule {
                    stage,
                    entry_point: options.entry_point.clone(),
                    source_path: path.to_path_buf(),
                    spirv,
                    warnings: 0,
                    from_cache: true,
                });
            }
        }

        let source = fs::read(path).map_err(|e| BindingError::Io {
            path: path.to_path_buf(),
            source: e,
        })?;

        log::info!("Compiling shader {} ({})", path.display(), stage);
        let output = self.compiler.compile(path, &source, stage, options);
        if !output.succeeded() {
            log::error!(
                "Shader {} failed to compile: {} error(s), {} warning(s)",
                path.display(),
                output.errors,
                output.warnings
            );
            return Err(BindingError::CompileFailed {
                path: path.to_path_buf(),
                warnings: output.warnings,
                errors: output.errors,
                log: output.log,
            });
        }
        if output.warnings > 0 {
            log::warn!(
                "Shader {} compiled with {} warning(s):\n{}",
                path.display(),
                output.warnings,
                output.log
            );
        }

        if let Some(cache) = &self.cache {
            // A failed cache write only costs a recompile next time.
            if let Err(e) = cache.store(path, stage, options, &output.binary) {
                log::warn!("Failed to cache shader artifact: {}", e);
            }
        }

        Ok(CompiledModule {
            stage,
            entry_point: options.entry_point.clone(),
            source_path: path.to_path_buf(),
            spirv: output.binary,
            warnings: output.warnings,
            from_cache: false,
        })
    }
}

/// Reflect the resources one entry point of a SPIR-V module uses.
///
/// When no entry point matches `entry_point`, the only entry point of the
/// requested stage is used.
pub fn reflect_spirv(
    spirv: &[u32],
    stage: ShaderStage,
    entry_point: &str,
) -> BindingResult<ShaderReflection> {
    let module = naga::front::spv::parse_u8_slice(
        bytemuck::cast_slice::<u32, u8>(spirv),
        &naga::front::spv::Options::default(),
    )
    .map_err(|e| BindingError::Reflection(format!("SPIR-V parse error: {e}")))?;

    let info = naga::valid::Validator::new(
        naga::valid::ValidationFlags::all(),
        naga::valid::Capabilities::all(),
    )
    .validate(&module)
    .map_err(|e| BindingError::Reflection(format!("Validation error: {e}")))?;

    let target = naga_stage(stage);
    let entry_index = module
        .entry_points
        .iter()
        .position(|ep| ep.name == entry_point && ep.stage == target)
        .or_else(|| {
            let mut candidates = module
                .entry_points
                .iter()
                .enumerate()
                .filter(|(_, ep)| ep.stage == target);
            match (candidates.next(), candidates.next()) {
                (Some((index, _)), None) => Some(index),
                _ => None,
            }
        })
        .ok_or_else(|| {
            BindingError::Reflection(format!(
                "Entry point '{}' not found for stage {:?}",
                entry_point, stage
            ))
        })?;
    let usage = info.get_entry_point(entry_index);

    let mut reflection = ShaderReflection::new();
    let stages = stage.flag();
    for (handle, var) in module.global_variables.iter() {
        if usage[handle].is_empty() {
            continue;
        }
        let name = var.name.clone().unwrap_or_default();
        let inner = &module.types[var.ty].inner;

        if var.space == naga::AddressSpace::PushConstant {
            let (offset, span) = match inner {
                naga::TypeInner::Struct { members, span } => {
                    (members.first().map_or(0, |member| member.offset), *span)
                }
                other => (0, other.size(module.to_ctx())),
            };
            reflection.add_push_constant(PushConstantDescriptor {
                stage,
                offset,
                size: span.saturating_sub(offset),
                name,
            })?;
            continue;
        }

        let Some(binding) = &var.binding else {
            continue;
        };

        let (element, array_count) = match inner {
            naga::TypeInner::BindingArray { base, size } => {
                let count = match size {
                    naga::ArraySize::Constant(count) => count.get(),
                    _ => {
                        log::warn!(
                            "Runtime-sized binding array '{}' reflected with one element",
                            name
                        );
                        1
                    }
                };
                (&module.types[*base].inner, count)
            }
            other => (other, 1),
        };

        let kind = match var.space {
            naga::AddressSpace::Uniform => ResourceKind::UniformBuffer,
            naga::AddressSpace::Storage { .. } => ResourceKind::StorageBuffer,
            naga::AddressSpace::Handle => match element {
                naga::TypeInner::Image {
                    class: naga::ImageClass::Sampled { .. } | naga::ImageClass::Depth { .. },
                    ..
                } => ResourceKind::SampledImage,
                // Samplers are folded into the combined image sampler.
                naga::TypeInner::Sampler { .. } => continue,
                _ => {
                    log::warn!("Skipping unsupported handle binding '{}'", name);
                    continue;
                }
            },
            _ => continue,
        };

        let size = if kind.is_buffer() {
            element.size(module.to_ctx()) as u64
        } else {
            0
        };

        reflection.add_binding(
            binding.group,
            BindingDescriptor::new(binding.binding, kind, name)
                .with_stages(stages)
                .with_size(size)
                .with_array_count(array_count),
        )?;
    }

    Ok(reflection)
}
