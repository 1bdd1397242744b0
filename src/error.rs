//! Error types for the binding layer.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::{BackendError, ResourceKind, ShaderStage};

/// Binding layer error type
#[derive(Error, Debug)]
pub enum BindingError {
    #[error("Failed to compile '{}': {errors} error(s), {warnings} warning(s)\n{log}", path.display())]
    CompileFailed {
        path: PathBuf,
        warnings: usize,
        errors: usize,
        log: String,
    },

    #[error("I/O error on '{}': {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Reflection failed: {0}")]
    Reflection(String),

    #[error("A {0} module is already loaded for this program")]
    DuplicateStage(ShaderStage),

    #[error("Unknown parameter '{0}'")]
    UnknownParameter(String),

    #[error("Uniform region '{0}' has not been allocated")]
    NotAllocated(String),

    #[error("Batch {0} is already set up")]
    AlreadySetUp(u32),

    #[error("Parameter access has not been set up")]
    NotSetUp,

    #[error("Uniform region '{name}' was allocated with {existing} bytes, requested {requested}")]
    SizeMismatch {
        name: String,
        existing: u64,
        requested: u64,
    },

    #[error("Binding '{name}' of kind {kind:?} cannot be made dynamic")]
    NotPromotable { name: String, kind: ResourceKind },

    #[error("Dynamic buffer '{name}' is an array of {count}; only single buffers take a dynamic offset")]
    DynamicArray { name: String, count: u32 },

    #[error("Parameter '{0}' is not declared as a dynamic buffer")]
    MissingDynamicDeclaration(String),

    #[error("Set {0} mixes buffer and image bindings")]
    MixedSet(u32),

    #[error("Binding set pool exhausted ({max_sets} sets per pool)")]
    PoolExhausted { max_sets: u32 },

    #[error("{what} storage exhausted ({capacity} slots)")]
    CapacityExhausted { what: &'static str, capacity: usize },

    #[error("Stale handle: {0}")]
    StaleHandle(String),

    #[error("Uniform memory exhausted allocating '{name}': {requested} bytes requested, {available} available")]
    UniformMemoryExhausted {
        name: String,
        requested: u64,
        available: u64,
    },

    #[error("Write of {size} bytes into '{name}' exceeds its {capacity} bytes")]
    DataTooLarge {
        name: String,
        size: u64,
        capacity: u64,
    },

    #[error("'{name}' expects {expected} bytes of record data, {actual} given")]
    DataTooShort {
        name: String,
        expected: u64,
        actual: u64,
    },

    #[error("Set {0} has no sampled image binding")]
    NoImageBinding(u32),

    #[error("Set {set} binding {binding} holds {capacity} textures, {count} given")]
    TooManyTextures {
        set: u32,
        binding: u32,
        count: usize,
        capacity: u32,
    },

    #[error("Frame index {frame} out of range ({frames_in_flight} frames in flight)")]
    InvalidFrame { frame: usize, frames_in_flight: usize },

    #[error(transparent)]
    Backend(#[from] BackendError),
}

pub type BindingResult<T> = Result<T, BindingError>;
