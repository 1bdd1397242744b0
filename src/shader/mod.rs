//! Shader compilation, artifact caching and resource reflection.
//!
//! - [`ShaderCompiler`] / [`NagaCompiler`] - GLSL or WGSL to SPIR-V
//! - [`ArtifactCache`] - compiled artifacts on disk, validated by mtime
//! - [`ShaderReflector`] - per-stage compile + reflection into a [`ShaderReflection`]
//! - [`ShaderProgram`] - compiled stages of one program and their dynamic-buffer declarations

pub mod cache;
pub mod compiler;
pub mod program;
pub mod reflection;
pub mod reflector;

pub use cache::ArtifactCache;
pub use compiler::{CompileOptions, CompileOutput, NagaCompiler, ShaderCompiler, SourceLanguage};
pub use program::{BatchSetup, DynamicBufferDecl, ShaderProgram};
pub use reflection::{
    BindingDescriptor, BindingSetDescriptor, PushConstantDescriptor, ShaderReflection,
};
pub use reflector::{reflect_spirv, CompiledModule, ShaderReflector};
