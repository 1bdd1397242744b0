//! Shader programs: compiled stages plus their merged reflection.

use std::collections::BTreeMap;
use std::path::Path;

use crate::backend::ShaderStage;
use crate::error::{BindingError, BindingResult};

use super::compiler::{CompileOptions, ShaderCompiler};
use super::reflection::{BindingSetDescriptor, ShaderReflection};
use super::reflector::{CompiledModule, ShaderReflector};

/// A buffer served as many records through one dynamic binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicBufferDecl {
    pub name: String,
    /// Number of records in the buffer.
    pub count: u32,
}

impl DynamicBufferDecl {
    pub fn new(name: impl Into<String>, count: u32) -> Self {
        Self {
            name: name.into(),
            count,
        }
    }
}

/// Per-program declarations consumed when a batch is set up.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchSetup {
    pub dynamic_buffers: Vec<DynamicBufferDecl>,
    /// Parameters whose storage is shared by every instance of the program.
    pub shared: Vec<String>,
}

impl BatchSetup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn dynamic(mut self, name: impl Into<String>, count: u32) -> Self {
        self.dynamic_buffers.push(DynamicBufferDecl::new(name, count));
        self
    }

    pub fn shared(mut self, name: impl Into<String>) -> Self {
        self.shared.push(name.into());
        self
    }

    pub fn dynamic_decl(&self, name: &str) -> Option<&DynamicBufferDecl> {
        self.dynamic_buffers.iter().find(|decl| decl.name == name)
    }

    pub fn is_shared(&self, name: &str) -> bool {
        self.shared.iter().any(|shared| shared == name)
    }

    /// Settle the buffer kinds of one set: declared dynamic buffers take
    /// their dynamic kind, every other buffer its plain kind.
    pub fn resolve_set(&self, set: &mut BindingSetDescriptor) {
        for binding in set.bindings_mut().filter(|binding| binding.kind.is_buffer()) {
            binding.kind = match self.dynamic_decl(&binding.name) {
                Some(_) => binding.kind.to_dynamic().unwrap_or(binding.kind),
                None => binding.kind.to_static(),
            };
        }
    }

    /// Reflection with every set settled by [`Self::resolve_set`].
    ///
    /// Declarations naming a non-buffer binding are rejected; declarations
    /// the reflection does not contain yet are skipped.
    pub fn resolve(&self, reflection: &ShaderReflection) -> BindingResult<ShaderReflection> {
        for decl in &self.dynamic_buffers {
            if let Some((_, binding)) = reflection.find_binding(&decl.name) {
                if !binding.kind.is_buffer() {
                    log::error!(
                        "Cannot promote '{}' of kind {:?} to a dynamic buffer",
                        decl.name,
                        binding.kind
                    );
                    return Err(BindingError::NotPromotable {
                        name: decl.name.clone(),
                        kind: binding.kind,
                    });
                }
            }
        }

        let mut resolved = reflection.clone();
        for set in resolved.sets_mut() {
            self.resolve_set(set);
        }
        Ok(resolved)
    }
}

/// A shader program: at most one compiled module per stage.
#[derive(Debug, Clone)]
pub struct ShaderProgram {
    name: String,
    modules: BTreeMap<ShaderStage, CompiledModule>,
    /// Stage reflections merged as the shaders declare them.
    reflected: ShaderReflection,
    /// `reflected` resolved against `setup`.
    reflection: ShaderReflection,
    setup: BatchSetup,
}

impl ShaderProgram {
    pub fn new(name: impl Into<String>, setup: BatchSetup) -> Self {
        Self {
            name: name.into(),
            modules: BTreeMap::new(),
            reflected: ShaderReflection::new(),
            reflection: ShaderReflection::new(),
            setup,
        }
    }

    /// Compile and reflect one stage.
    ///
    /// Stages merge unresolved; declared dynamic buffers are applied to the
    /// merged result, so every stage may read them.
    pub fn add_stage<C: ShaderCompiler>(
        &mut self,
        reflector: &ShaderReflector<C>,
        path: &Path,
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> BindingResult<&CompiledModule> {
        if self.modules.contains_key(&stage) {
            log::error!("Program '{}' already has a {} module", self.name, stage);
            return Err(BindingError::DuplicateStage(stage));
        }

        // Reflect into a copy so a failure leaves the program unchanged.
        let mut reflected = self.reflected.clone();
        let module = reflector.process_stage(path, stage, options, &mut reflected)?;
        self.reflection = self.setup.resolve(&reflected)?;
        self.reflected = reflected;

        Ok(self.modules.entry(stage).or_insert(module))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn module(&self, stage: ShaderStage) -> Option<&CompiledModule> {
        self.modules.get(&stage)
    }

    pub fn modules(&self) -> impl Iterator<Item = &CompiledModule> + '_ {
        self.modules.values()
    }

    pub fn reflection(&self) -> &ShaderReflection {
        &self.reflection
    }

    pub fn setup(&self) -> &BatchSetup {
        &self.setup
    }
}
