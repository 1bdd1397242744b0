//! Shader resource binding layer
//!
//! Turns shader source into reflected binding tables, deduplicates the
//! layouts derived from them, allocates binding-set instances from pools and
//! tracks per-frame-in-flight binding state so a render pass can write named
//! parameters and bind only what changed.
//!
//! The GPU is reached through [`backend::BindingBackend`]:
//! - **Vulkan**: via ash and gpu-allocator (`vulkan` feature, on by default)
//! - **Recording**: in-memory backend that logs every call, for tests and tools
//!
//! # Usage
//! ```no_run
//! use std::path::Path;
//!
//! use graphics_bindings::backend::{CommandStream, RecordingBackend, ShaderStage};
//! use graphics_bindings::shader::{BatchSetup, CompileOptions, ShaderProgram};
//! use graphics_bindings::{BindingConfig, BindingContext, ShaderParamAccess};
//!
//! # fn main() -> graphics_bindings::BindingResult<()> {
//! let mut ctx = BindingContext::new(RecordingBackend::new(), BindingConfig::default())?;
//! let reflector = ctx.reflector();
//!
//! let mut program = ShaderProgram::new("mesh", BatchSetup::new().dynamic("u_model", 1000));
//! program.add_stage(&reflector, Path::new("shaders/mesh.vert"), ShaderStage::Vertex, &CompileOptions::default())?;
//! program.add_stage(&reflector, Path::new("shaders/mesh.frag"), ShaderStage::Fragment, &CompileOptions::default())?;
//!
//! let mut access = ShaderParamAccess::new();
//! access.setup_program(&mut ctx, &program)?;
//!
//! let mut session = access.session(&mut ctx, CommandStream::from_raw(1))?;
//! session.set_dynamic_buffer_offset("u_model", 64, 3)?;
//! session.flush_batch()?;
//! # Ok(())
//! # }
//! ```

pub mod arena;
pub mod backend;
pub mod bindings;
pub mod config;
pub mod error;
pub mod shader;

pub use backend::types;

pub use bindings::{
    BindingContext, BindingLayoutCache, BindingSetAllocator, FrameBindingCache, ParamSession,
    ShaderParamAccess,
};
pub use config::{BindingConfig, OverflowPolicy, PoolMultipliers};
pub use error::{BindingError, BindingResult};
pub use shader::{ShaderProgram, ShaderReflection, ShaderReflector};
