//! Shared helpers for the binding integration tests.

#![allow(dead_code)]

use graphics_bindings::backend::{
    CommandStream, ImageViewHandle, RecordingBackend, ResourceKind, SamplerHandle,
    ShaderStageFlags, TextureBinding,
};
use graphics_bindings::shader::{BindingDescriptor, ShaderReflection};
use graphics_bindings::{BindingConfig, BindingContext};

/// Command stream every test records into.
pub const CMD: CommandStream = CommandStream::from_raw(7);

/// Device alignment used unless a test picks its own.
pub const ALIGNMENT: u64 = 256;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn context() -> BindingContext<RecordingBackend> {
    context_with(ALIGNMENT, BindingConfig::default())
}

pub fn context_with(alignment: u64, config: BindingConfig) -> BindingContext<RecordingBackend> {
    init_logging();
    BindingContext::new(RecordingBackend::with_alignment(alignment), config)
        .expect("Failed to create binding context")
}

pub fn uniform(binding: u32, name: &str, size: u64) -> BindingDescriptor {
    BindingDescriptor::new(binding, ResourceKind::UniformBuffer, name)
        .with_stages(ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT)
        .with_size(size)
}

pub fn sampled_image(binding: u32, name: &str) -> BindingDescriptor {
    BindingDescriptor::new(binding, ResourceKind::SampledImage, name)
        .with_stages(ShaderStageFlags::FRAGMENT)
}

/// One uniform block per listed set index, named `block_<set>`.
pub fn reflection_with_sets(sets: &[u32]) -> ShaderReflection {
    let mut reflection = ShaderReflection::new();
    for &set in sets {
        reflection
            .add_binding(set, uniform(0, &format!("block_{set}"), 64))
            .expect("Failed to add binding");
    }
    reflection
}

/// `{set 0: u_model (64 bytes), set 1: albedo}`.
pub fn mesh_reflection() -> ShaderReflection {
    let mut reflection = ShaderReflection::new();
    reflection
        .add_binding(0, uniform(0, "u_model", 64))
        .expect("Failed to add binding");
    reflection
        .add_binding(1, sampled_image(0, "albedo"))
        .expect("Failed to add binding");
    reflection
}

pub fn texture(id: u64) -> TextureBinding {
    TextureBinding::new(ImageViewHandle::from_raw(id), SamplerHandle::from_raw(id + 1000))
}
