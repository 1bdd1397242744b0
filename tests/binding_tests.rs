//! Integration tests for the binding layer, driven through the recording backend.
//!
//! # Test Categories
//!
//! - **Layout Tests**: structural deduplication of set layouts
//! - **Batch Tests**: dirty tracking and bind coalescing on flush
//! - **Offset Tests**: dynamic offsets and device alignment
//! - **Storage Tests**: shared and per-instance backing memory
//! - **Frame Tests**: volatile sets across frames-in-flight and teardown
//!
//! ```bash
//! cargo test --test binding_tests
//! ```

mod common;

use glam::Mat4;
use rstest::rstest;

use common::{
    context, context_with, mesh_reflection, reflection_with_sets, sampled_image, texture, uniform,
    ALIGNMENT, CMD,
};
use graphics_bindings::backend::{
    RecordedWrite, RecordingBackend, ResourceKind, ShaderStageFlags,
};
use graphics_bindings::bindings::BatchId;
use graphics_bindings::shader::{BatchSetup, BindingDescriptor, BindingSetDescriptor, ShaderReflection};
use graphics_bindings::{
    BindingConfig, BindingContext, BindingError, BindingLayoutCache, ShaderParamAccess,
};

/// Set indices of the dirty units of `batch` in the current frame.
fn dirty_sets(ctx: &BindingContext<RecordingBackend>, batch: BatchId) -> Vec<u32> {
    ctx.frame(ctx.current_frame())
        .unwrap()
        .cache
        .batch(batch)
        .unwrap()
        .units()
        .iter()
        .filter(|unit| unit.is_dirty())
        .map(|unit| unit.set_index())
        .collect()
}

// ============================================================================
// Layout Tests
// ============================================================================

#[test]
fn test_layout_dedup_ignores_names_and_order() {
    let mut backend = RecordingBackend::new();
    let mut layouts = BindingLayoutCache::new();

    let a = BindingSetDescriptor::new(0)
        .with(uniform(0, "camera", 64))
        .with(uniform(1, "lights", 256));
    let b = BindingSetDescriptor::new(3)
        .with(uniform(1, "point_lights", 1024))
        .with(uniform(0, "view", 128));

    let first = layouts.create_layout(&mut backend, &a).unwrap();
    let second = layouts.create_layout(&mut backend, &b).unwrap();
    assert_eq!(first, second);
    assert_eq!(layouts.len(), 1);
    assert_eq!(backend.live_set_layouts(), 1);
}

#[rstest]
#[case::kind(BindingDescriptor::new(0, ResourceKind::StorageBuffer, "x")
    .with_stages(ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT))]
#[case::binding(uniform(1, "x", 64))]
#[case::stages(BindingDescriptor::new(0, ResourceKind::UniformBuffer, "x")
    .with_stages(ShaderStageFlags::COMPUTE))]
#[case::array_count(uniform(0, "x", 64).with_array_count(4))]
#[case::dynamic(BindingDescriptor::new(0, ResourceKind::UniformBufferDynamic, "x")
    .with_stages(ShaderStageFlags::VERTEX | ShaderStageFlags::FRAGMENT))]
fn test_layout_non_collision(#[case] other: BindingDescriptor) {
    let mut backend = RecordingBackend::new();
    let mut layouts = BindingLayoutCache::new();

    let base = BindingSetDescriptor::new(0).with(uniform(0, "x", 64));
    let changed = BindingSetDescriptor::new(0).with(other);

    let first = layouts.create_layout(&mut backend, &base).unwrap();
    let second = layouts.create_layout(&mut backend, &changed).unwrap();
    assert_ne!(first, second);
    assert_eq!(backend.live_set_layouts(), 2);
}

// ============================================================================
// Batch Tests
// ============================================================================

#[test]
fn test_dirty_round_trip() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    let batch = access
        .setup_batch(&mut ctx, &reflection_with_sets(&[0, 1, 2]), &BatchSetup::new())
        .unwrap();
    assert_eq!(dirty_sets(&ctx, batch), vec![0, 1, 2]);

    let binds = access.session(&mut ctx, CMD).unwrap().flush_batch().unwrap();
    assert_eq!(binds, 1);
    assert!(dirty_sets(&ctx, batch).is_empty());

    // Nothing changed, nothing to bind.
    ctx.backend_mut().clear_calls();
    assert_eq!(access.session(&mut ctx, CMD).unwrap().flush_batch().unwrap(), 0);
    assert!(ctx.backend().binds().is_empty());

    {
        let mut session = access.session(&mut ctx, CMD).unwrap();
        session.set_buffer_data("block_1", &[1u8; 64]).unwrap();
    }
    assert_eq!(dirty_sets(&ctx, batch), vec![1]);

    access.session(&mut ctx, CMD).unwrap().flush_batch().unwrap();
    let binds = ctx.backend().binds();
    assert_eq!(binds.len(), 1);
    assert_eq!(binds[0].set_range(), 1..2);

    {
        let mut session = access.session(&mut ctx, CMD).unwrap();
        session.mark_as_dirty().unwrap();
    }
    assert_eq!(dirty_sets(&ctx, batch), vec![0, 1, 2]);
}

#[test]
fn test_flush_coalesces_contiguous_runs() {
    let mut ctx = context();

    let mut reflection = ShaderReflection::new();
    for set in [0, 2, 4, 7] {
        reflection
            .add_binding(set, uniform(0, &format!("block_{set}"), 64))
            .unwrap();
    }
    reflection.add_binding(1, uniform(0, "a", 64)).unwrap();
    reflection.add_binding(1, uniform(1, "b", 64)).unwrap();
    reflection.add_binding(5, uniform(0, "c", 64)).unwrap();
    let setup = BatchSetup::new()
        .dynamic("a", 16)
        .dynamic("b", 16)
        .dynamic("c", 16);

    let mut access = ShaderParamAccess::new();
    access.setup_batch(&mut ctx, &reflection, &setup).unwrap();

    let mut session = access.session(&mut ctx, CMD).unwrap();
    session.set_dynamic_buffer_offset("a", 64, 1).unwrap();
    session.set_dynamic_buffer_offset("b", 64, 3).unwrap();
    session.set_dynamic_buffer_offset("c", 64, 2).unwrap();
    assert_eq!(session.flush_batch().unwrap(), 3);

    let binds = ctx.backend().binds();
    let ranges: Vec<_> = binds.iter().map(|bind| bind.set_range()).collect();
    assert_eq!(ranges, vec![0..3, 4..6, 7..8]);
    assert_eq!(binds[0].dynamic_offsets, vec![256, 768]);
    assert_eq!(binds[1].dynamic_offsets, vec![512]);
    assert!(binds[2].dynamic_offsets.is_empty());
    assert!(binds.iter().all(|bind| bind.cmd == CMD));
    assert!(binds.iter().all(|bind| Some(bind.layout) == access.pipeline_layout()));
}

#[test]
fn test_flush_single_bind_for_contiguous_sets() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection_with_sets(&[0, 1, 2, 3]), &BatchSetup::new())
        .unwrap();

    assert_eq!(access.session(&mut ctx, CMD).unwrap().flush_batch().unwrap(), 1);
    let binds = ctx.backend().binds();
    assert_eq!(binds.len(), 1);
    assert_eq!(binds[0].set_range(), 0..4);
}

#[test]
fn test_flush_splits_on_clean_set() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection_with_sets(&[0, 1, 2]), &BatchSetup::new())
        .unwrap();
    access.session(&mut ctx, CMD).unwrap().flush_batch().unwrap();
    ctx.backend_mut().clear_calls();

    let mut session = access.session(&mut ctx, CMD).unwrap();
    session.set_buffer_data("block_0", &[0u8; 16]).unwrap();
    session.set_buffer_data("block_2", &[0u8; 16]).unwrap();
    assert_eq!(session.flush_batch().unwrap(), 2);

    let ranges: Vec<_> = ctx.backend().binds().iter().map(|bind| bind.set_range()).collect();
    assert_eq!(ranges, vec![0..1, 2..3]);
}

// ============================================================================
// Offset Tests
// ============================================================================

#[rstest]
#[case(64, 7, 256, 1792)]
#[case(64, 0, 256, 0)]
#[case(256, 3, 256, 768)]
#[case(300, 2, 256, 1024)]
#[case(16, 5, 64, 320)]
#[case(80, 9, 16, 720)]
fn test_dynamic_offset_alignment(
    #[case] elem_size: u64,
    #[case] index: u32,
    #[case] alignment: u64,
    #[case] expected: u32,
) {
    let mut ctx = context_with(alignment, BindingConfig::default());
    let mut reflection = ShaderReflection::new();
    reflection
        .add_binding(0, uniform(0, "u_model", elem_size))
        .unwrap();

    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection, &BatchSetup::new().dynamic("u_model", 64))
        .unwrap();

    let mut session = access.session(&mut ctx, CMD).unwrap();
    session
        .set_dynamic_buffer_offset("u_model", elem_size, index)
        .unwrap();
    session.flush_batch().unwrap();

    let binds = ctx.backend().binds();
    assert_eq!(binds[0].dynamic_offsets, vec![expected]);
    assert_eq!(expected as u64 % alignment, 0);
}

#[test]
fn test_dynamic_offset_out_of_range() {
    let mut ctx = context();
    let mut reflection = ShaderReflection::new();
    reflection.add_binding(0, uniform(0, "u_model", 64)).unwrap();

    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection, &BatchSetup::new().dynamic("u_model", 4))
        .unwrap();

    let mut session = access.session(&mut ctx, CMD).unwrap();
    session.set_dynamic_buffer_offset("u_model", 64, 3).unwrap();
    assert!(matches!(
        session.set_dynamic_buffer_offset("u_model", 64, 4),
        Err(BindingError::DataTooLarge { .. })
    ));
    assert!(matches!(
        session.set_dynamic_buffer_data("u_model", &[0u8; 32], 64, 1, 0),
        Err(BindingError::DataTooShort { expected: 64, actual: 32, .. })
    ));
}

#[rstest]
#[case::far_past_the_end(0, 20_000_000)]
#[case::one_past_the_end(0, 4)]
#[case::run_crosses_the_end(2, 3)]
fn test_dynamic_write_outside_region_is_rejected(
    #[case] elem_count: u32,
    #[case] elem_offset: u32,
) {
    let mut ctx = context();
    let mut reflection = ShaderReflection::new();
    reflection.add_binding(0, uniform(0, "u_model", 64)).unwrap();

    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection, &BatchSetup::new().dynamic("u_model", 4))
        .unwrap();

    let data = vec![0u8; 64 * elem_count as usize];
    let mut session = access.session(&mut ctx, CMD).unwrap();
    assert!(matches!(
        session.set_dynamic_buffer_data("u_model", &data, 64, elem_count, elem_offset),
        Err(BindingError::DataTooLarge { .. })
    ));
    session.flush_batch().unwrap();

    // The rejected offset never reaches the bind.
    assert_eq!(ctx.backend().binds()[0].dynamic_offsets, vec![0]);
}

#[test]
fn test_empty_dynamic_write_selects_record() {
    let mut ctx = context();
    let mut reflection = ShaderReflection::new();
    reflection.add_binding(0, uniform(0, "u_model", 64)).unwrap();

    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection, &BatchSetup::new().dynamic("u_model", 4))
        .unwrap();

    let mut session = access.session(&mut ctx, CMD).unwrap();
    session
        .set_dynamic_buffer_data("u_model", &[], 64, 0, 3)
        .unwrap();
    session.flush_batch().unwrap();
    assert_eq!(ctx.backend().binds()[0].dynamic_offsets, vec![768]);
}

// ============================================================================
// Storage Tests
// ============================================================================

fn camera_material_reflection(camera_size: u64) -> ShaderReflection {
    let mut reflection = ShaderReflection::new();
    reflection
        .add_binding(0, uniform(0, "camera", camera_size))
        .unwrap();
    reflection.add_binding(0, uniform(1, "material", 32)).unwrap();
    reflection
}

#[test]
fn test_shared_and_per_instance_storage() {
    let mut ctx = context();
    let reflection = camera_material_reflection(64);
    let setup = BatchSetup::new().shared("camera");

    let mut first = ShaderParamAccess::new();
    let mut second = ShaderParamAccess::new();
    first.setup_batch(&mut ctx, &reflection, &setup).unwrap();
    second.setup_batch(&mut ctx, &reflection, &setup).unwrap();

    let camera = (
        &first.param("camera").unwrap().storage_name,
        &second.param("camera").unwrap().storage_name,
    );
    assert_eq!(camera.0, camera.1);

    let material = (
        &first.param("material").unwrap().storage_name,
        &second.param("material").unwrap().storage_name,
    );
    assert_ne!(material.0, material.1);

    let uniforms = &ctx.frame(0).unwrap().uniforms;
    assert_ne!(
        uniforms.region(material.0).unwrap().offset,
        uniforms.region(material.1).unwrap().offset
    );

    // A write through one instance is visible through the other.
    let camera_offset = uniforms.region(camera.0).unwrap().offset as usize;
    let buffer = uniforms.buffer();
    {
        let mut session = first.session(&mut ctx, CMD).unwrap();
        session.set_buffer_data("camera", &[9u8; 64]).unwrap();
    }
    let contents = ctx.backend().buffer_contents(buffer).unwrap();
    assert_eq!(&contents[camera_offset..camera_offset + 64], &[9u8; 64]);
}

#[test]
fn test_shared_storage_size_mismatch() {
    let mut ctx = context();
    let setup = BatchSetup::new().shared("camera");

    let mut first = ShaderParamAccess::new();
    first
        .setup_batch(&mut ctx, &camera_material_reflection(64), &setup)
        .unwrap();

    let mut second = ShaderParamAccess::new();
    assert!(matches!(
        second.setup_batch(&mut ctx, &camera_material_reflection(128), &setup),
        Err(BindingError::SizeMismatch { .. })
    ));
    assert!(!second.is_set_up());
    for frame in 0..2 {
        assert_eq!(ctx.frame(frame).unwrap().cache.batch_count(), 1);
    }
}

#[test]
fn test_failed_setup_leaves_frames_untouched() {
    let mut ctx = context_with(
        ALIGNMENT,
        BindingConfig::default().with_uniform_memory_per_frame(1024),
    );
    let mut oversized = ShaderReflection::new();
    oversized.add_binding(0, uniform(0, "small", 512)).unwrap();
    oversized.add_binding(1, uniform(0, "large", 1024)).unwrap();

    // Set 0 is built in frame 0 before set 1 runs out of memory.
    let mut failed = ShaderParamAccess::new();
    assert!(matches!(
        failed.setup_batch(&mut ctx, &oversized, &BatchSetup::new()),
        Err(BindingError::UniformMemoryExhausted { .. })
    ));
    assert!(!failed.is_set_up());
    for frame in 0..2 {
        let resources = ctx.frame(frame).unwrap();
        assert_eq!(resources.cache.batch_count(), 0);
        assert_eq!(resources.cache.persistent_count(), 0);
        assert_eq!(resources.uniforms.used(), 0);
    }
    assert_eq!(ctx.allocator().live_sets(), 0);
    assert_eq!(ctx.backend().live_sets(), 0);

    let mut access = ShaderParamAccess::new();
    let batch = access
        .setup_batch(&mut ctx, &reflection_with_sets(&[0, 1]), &BatchSetup::new())
        .unwrap();
    assert_eq!(batch.index(), 0);

    for _ in 0..2 {
        let session = access.session(&mut ctx, CMD).unwrap();
        assert_eq!(session.flush_batch().unwrap(), 1);
        ctx.advance_frame().unwrap();
    }
    let binds = ctx.backend().binds();
    assert_eq!(binds.len(), 2);
    assert!(binds.iter().all(|bind| bind.set_range() == (0..2)));
}

#[test]
fn test_batches_exist_in_every_frame() {
    let mut ctx = context_with(ALIGNMENT, BindingConfig::default().with_frames_in_flight(3));
    let mut access = ShaderParamAccess::new();
    let batch = access
        .setup_batch(&mut ctx, &reflection_with_sets(&[0, 1]), &BatchSetup::new())
        .unwrap();

    for frame in 0..3 {
        let cache = &ctx.frame(frame).unwrap().cache;
        assert_eq!(cache.batch(batch).unwrap().units().len(), 2);
        assert_eq!(cache.persistent_count(), 2);
    }
    assert_eq!(ctx.backend().live_sets(), 6);
}

// ============================================================================
// Frame Tests
// ============================================================================

#[test]
fn test_volatile_sets_are_not_reused_across_frames() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &mesh_reflection(), &BatchSetup::new())
        .unwrap();
    // One persistent buffer set per frame.
    assert_eq!(ctx.backend().live_sets(), 2);

    access
        .session(&mut ctx, CMD)
        .unwrap()
        .bind_texture_slot(1, texture(1))
        .unwrap();
    let frame0_set = ctx.backend().binds().last().unwrap().sets[0];
    assert_eq!(ctx.backend().live_sets(), 3);

    assert_eq!(ctx.advance_frame().unwrap(), 1);
    access
        .session(&mut ctx, CMD)
        .unwrap()
        .bind_texture_slot(1, texture(2))
        .unwrap();
    let frame1_set = ctx.backend().binds().last().unwrap().sets[0];
    assert_ne!(frame0_set, frame1_set);
    assert_eq!(ctx.backend().live_sets(), 4);

    // Coming back to frame 0 releases only frame 0's volatile set.
    assert_eq!(ctx.advance_frame().unwrap(), 0);
    assert_eq!(ctx.backend().live_sets(), 3);
    assert_eq!(ctx.frame(0).unwrap().cache.volatile_count(), 0);
    assert_eq!(ctx.frame(1).unwrap().cache.volatile_count(), 1);
}

#[test]
fn test_end_to_end_mesh_batch() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(
            &mut ctx,
            &mesh_reflection(),
            &BatchSetup::new().dynamic("u_model", 1000),
        )
        .unwrap();
    let record = access.param("u_model").unwrap().clone();
    assert_eq!(record.kind, ResourceKind::UniformBufferDynamic);
    ctx.backend_mut().clear_calls();

    let model = Mat4::from_translation(glam::Vec3::new(1.0, 2.0, 3.0));
    let tex_a = texture(42);
    let mut session = access.session(&mut ctx, CMD).unwrap();
    session.set_dynamic_uniform("u_model", &[model], 7).unwrap();
    session.bind_texture_slot(1, tex_a).unwrap();
    assert_eq!(session.flush_batch().unwrap(), 1);

    let binds = ctx.backend().binds();
    assert_eq!(binds.len(), 2);

    // Texture set bound immediately, at its own slot.
    assert_eq!(binds[0].set_range(), 1..2);
    assert!(binds[0].dynamic_offsets.is_empty());
    assert_eq!(
        ctx.backend().set_writes(binds[0].sets[0]).unwrap(),
        &[RecordedWrite::Images {
            binding: 0,
            first_element: 0,
            textures: vec![tex_a],
        }]
    );

    // Buffer set bound on flush with the record's offset.
    assert_eq!(binds[1].set_range(), 0..1);
    assert_eq!(binds[1].dynamic_offsets, vec![1792]);

    let uniforms = &ctx.frame(0).unwrap().uniforms;
    let start = (uniforms.region(&record.storage_name).unwrap().offset + 1792) as usize;
    let contents = ctx.backend().buffer_contents(uniforms.buffer()).unwrap();
    assert_eq!(&contents[start..start + 64], bytemuck::bytes_of(&model));
}

#[test]
fn test_texture_array_binds_consecutive_elements() {
    let mut ctx = context();
    let mut reflection = ShaderReflection::new();
    reflection
        .add_binding(2, sampled_image(0, "cascades").with_array_count(4))
        .unwrap();

    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &reflection, &BatchSetup::new())
        .unwrap();

    let textures = [texture(1), texture(2), texture(3)];
    access
        .session(&mut ctx, CMD)
        .unwrap()
        .bind_texture_array_slot(2, &textures)
        .unwrap();

    let bind = ctx.backend().binds()[0].clone();
    assert_eq!(bind.first_set, 2);
    assert_eq!(
        ctx.backend().set_writes(bind.sets[0]).unwrap(),
        &[RecordedWrite::Images {
            binding: 0,
            first_element: 0,
            textures: textures.to_vec(),
        }]
    );
}

#[test]
fn test_destroy_releases_everything() {
    let mut ctx = context();
    let mut access = ShaderParamAccess::new();
    access
        .setup_batch(&mut ctx, &mesh_reflection(), &BatchSetup::new())
        .unwrap();
    access
        .session(&mut ctx, CMD)
        .unwrap()
        .bind_texture_slot(1, texture(1))
        .unwrap();

    ctx.destroy();
    let backend = ctx.backend();
    assert_eq!(backend.live_set_layouts(), 0);
    assert_eq!(backend.live_pipeline_layouts(), 0);
    assert_eq!(backend.live_pools(), 0);
    assert_eq!(backend.live_sets(), 0);
    assert_eq!(backend.live_buffers(), 0);
}
