//! Backend abstraction layer
//!
//! Provides the collaborator trait the binding layer drives and the types
//! shared with its implementations.

pub mod recording;
pub mod traits;
pub mod types;

#[cfg(feature = "vulkan")]
pub mod vulkan;

pub use recording::{BackendCall, RecordedBind, RecordedWrite, RecordingBackend};
pub use traits::*;
pub use types::*;
