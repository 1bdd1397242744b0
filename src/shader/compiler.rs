//! Shader compilation to SPIR-V.
//!
//! The binding layer treats the compiler as opaque: it hands over source
//! bytes and gets back a binary plus diagnostic counts. [`NagaCompiler`] is
//! the stock implementation, built on naga's GLSL and WGSL frontends and its
//! SPIR-V writer.

use std::fmt::Write as _;
use std::path::Path;

use crate::backend::ShaderStage;

/// Options that select one compiled variant of a source file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    /// Entry point name.
    pub entry_point: String,
    /// Macro definitions as `(name, value)` pairs.
    pub defines: Vec<(String, String)>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            entry_point: "main".to_string(),
            defines: Vec::new(),
        }
    }
}

impl CompileOptions {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
            defines: Vec::new(),
        }
    }

    /// Add a macro definition.
    pub fn define(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.defines.push((name.into(), value.into()));
        self
    }

    /// Macro definitions sorted by name, duplicates resolved to the last value.
    pub fn sorted_defines(&self) -> Vec<(String, String)> {
        let mut defines: Vec<(String, String)> = Vec::with_capacity(self.defines.len());
        for (name, value) in &self.defines {
            match defines.iter_mut().find(|(existing, _)| existing == name) {
                Some(entry) => entry.1 = value.clone(),
                None => defines.push((name.clone(), value.clone())),
            }
        }
        defines.sort();
        defines
    }
}

/// Result of one compiler invocation.
#[derive(Debug, Clone, Default)]
pub struct CompileOutput {
    /// SPIR-V words; empty when compilation failed.
    pub binary: Vec<u32>,
    pub warnings: usize,
    pub errors: usize,
    /// Human-readable diagnostics.
    pub log: String,
}

impl CompileOutput {
    pub fn succeeded(&self) -> bool {
        self.errors == 0
    }

    fn failure(log: String) -> Self {
        Self {
            errors: 1,
            log,
            ..Default::default()
        }
    }
}

/// Compiles shader source to SPIR-V.
pub trait ShaderCompiler {
    fn compile(
        &self,
        path: &Path,
        source: &[u8],
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> CompileOutput;
}

/// Source language, picked from the file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceLanguage {
    Glsl,
    Wgsl,
    SpirV,
}

impl SourceLanguage {
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("wgsl") => Self::Wgsl,
            Some("spv") => Self::SpirV,
            _ => Self::Glsl,
        }
    }
}

pub(crate) fn naga_stage(stage: ShaderStage) -> naga::ShaderStage {
    match stage {
        ShaderStage::Vertex => naga::ShaderStage::Vertex,
        ShaderStage::Fragment => naga::ShaderStage::Fragment,
        ShaderStage::Compute => naga::ShaderStage::Compute,
    }
}

/// Read SPIR-V words out of a little-endian byte stream.
pub fn spirv_words(bytes: &[u8]) -> Option<Vec<u32>> {
    if bytes.len() % 4 != 0 {
        return None;
    }
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect();
    const SPIRV_MAGIC: u32 = 0x0723_0203;
    (words.first() == Some(&SPIRV_MAGIC)).then_some(words)
}

/// naga-based compiler for GLSL, WGSL and pre-built SPIR-V.
#[derive(Debug, Clone, Copy, Default)]
pub struct NagaCompiler;

impl NagaCompiler {
    pub fn new() -> Self {
        Self
    }

    fn parse(
        &self,
        language: SourceLanguage,
        source: &str,
        stage: ShaderStage,
        options: &CompileOptions,
        output: &mut CompileOutput,
    ) -> Option<naga::Module> {
        match language {
            SourceLanguage::Glsl => {
                let mut defines = naga::FastHashMap::default();
                for (name, value) in options.sorted_defines() {
                    defines.insert(name, value);
                }
                let glsl_options = naga::front::glsl::Options {
                    stage: naga_stage(stage),
                    defines,
                };
                let mut frontend = naga::front::glsl::Frontend::default();
                match frontend.parse(&glsl_options, source) {
                    Ok(module) => Some(module),
                    Err(e) => {
                        output.errors += e.errors.len().max(1);
                        let _ = writeln!(output.log, "GLSL parse error:\n{e}");
                        None
                    }
                }
            }
            SourceLanguage::Wgsl => {
                if !options.defines.is_empty() {
                    output.warnings += 1;
                    let _ = writeln!(
                        output.log,
                        "warning: {} macro definition(s) ignored for WGSL source",
                        options.defines.len()
                    );
                }
                match naga::front::wgsl::parse_str(source) {
                    Ok(module) => Some(module),
                    Err(e) => {
                        output.errors += 1;
                        let _ = writeln!(output.log, "WGSL parse error:\n{}", e.emit_to_string(source));
                        None
                    }
                }
            }
            SourceLanguage::SpirV => None,
        }
    }
}

impl ShaderCompiler for NagaCompiler {
    fn compile(
        &self,
        path: &Path,
        source: &[u8],
        stage: ShaderStage,
        options: &CompileOptions,
    ) -> CompileOutput {
        let language = SourceLanguage::from_path(path);
        if language == SourceLanguage::SpirV {
            return match spirv_words(source) {
                Some(binary) => CompileOutput {
                    binary,
                    ..Default::default()
                },
                None => CompileOutput::failure(format!(
                    "'{}' is not a SPIR-V binary",
                    path.display()
                )),
            };
        }

        let text = match std::str::from_utf8(source) {
            Ok(text) => text,
            Err(e) => return CompileOutput::failure(format!("Invalid UTF-8: {e}")),
        };

        let mut output = CompileOutput::default();
        let Some(module) = self.parse(language, text, stage, options, &mut output) else {
            return output;
        };

        let mut validator = naga::valid::Validator::new(
            naga::valid::ValidationFlags::all(),
            naga::valid::Capabilities::all(),
        );
        let info = match validator.validate(&module) {
            Ok(info) => info,
            Err(e) => {
                output.errors += 1;
                let _ = writeln!(output.log, "Validation error: {}", e.emit_to_string(text));
                return output;
            }
        };

        // GLSL entry points are always called "main"; fall back to the only
        // entry point of the requested stage.
        let target = naga_stage(stage);
        let entry_point = match module
            .entry_points
            .iter()
            .find(|ep| ep.name == options.entry_point && ep.stage == target)
        {
            Some(ep) => ep.name.clone(),
            None => {
                let mut candidates = module.entry_points.iter().filter(|ep| ep.stage == target);
                match (candidates.next(), candidates.next()) {
                    (Some(ep), None) => {
                        output.warnings += 1;
                        let _ = writeln!(
                            output.log,
                            "warning: entry point '{}' not found, using '{}'",
                            options.entry_point, ep.name
                        );
                        ep.name.clone()
                    }
                    _ => {
                        output.errors += 1;
                        let _ = writeln!(
                            output.log,
                            "Entry point '{}' not found for stage {:?}",
                            options.entry_point, stage
                        );
                        return output;
                    }
                }
            }
        };

        let spv_options = naga::back::spv::Options {
            lang_version: (1, 3),
            flags: naga::back::spv::WriterFlags::DEBUG,
            capabilities: None,
            bounds_check_policies: naga::proc::BoundsCheckPolicies::default(),
            binding_map: Default::default(),
            debug_info: None,
            zero_initialize_workgroup_memory:
                naga::back::spv::ZeroInitializeWorkgroupMemoryMode::None,
        };
        let pipeline_options = naga::back::spv::PipelineOptions {
            shader_stage: target,
            entry_point,
        };

        match naga::back::spv::write_vec(&module, &info, &spv_options, Some(&pipeline_options)) {
            Ok(binary) => output.binary = binary,
            Err(e) => {
                output.errors += 1;
                let _ = writeln!(output.log, "SPIR-V generation error: {e}");
            }
        }
        output
    }
}
