//! Explicit owner of the binding layer's shared and per-frame state.

use crate::backend::BindingBackend;
use crate::config::BindingConfig;
use crate::error::{BindingError, BindingResult};
use crate::shader::{NagaCompiler, ShaderReflector};

use super::allocator::BindingSetAllocator;
use super::frame_cache::FrameBindingCache;
use super::layout_cache::BindingLayoutCache;
use super::uniform_memory::UniformArena;

/// Everything one frame-in-flight owns exclusively.
#[derive(Debug)]
pub struct FrameResources {
    pub cache: FrameBindingCache,
    pub uniforms: UniformArena,
}

/// Binding layer context.
///
/// Owns the backend, the layout cache and set allocator shared by every
/// program and frame, and one [`FrameResources`] per frame-in-flight.
/// Torn down in bulk by [`BindingContext::destroy`] or on drop.
pub struct BindingContext<B: BindingBackend> {
    pub(crate) backend: B,
    pub(crate) config: BindingConfig,
    pub(crate) layouts: BindingLayoutCache,
    pub(crate) allocator: BindingSetAllocator,
    pub(crate) frames: Vec<FrameResources>,
    pub(crate) current_frame: usize,
    destroyed: bool,
}

impl<B: BindingBackend> std::fmt::Debug for BindingContext<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BindingContext")
            .field("backend", &self.backend.name())
            .field("frames_in_flight", &self.frames.len())
            .field("current_frame", &self.current_frame)
            .field("layouts", &self.layouts.len())
            .field("live_sets", &self.allocator.live_sets())
            .finish()
    }
}

impl<B: BindingBackend> BindingContext<B> {
    /// Create the set pool and per-frame uniform memory.
    pub fn new(mut backend: B, config: BindingConfig) -> BindingResult<Self> {
        let frames_in_flight = config.frames_in_flight.max(1);
        let allocator = BindingSetAllocator::new(&mut backend, &config)?;

        let mut frames = Vec::with_capacity(frames_in_flight);
        for frame in 0..frames_in_flight {
            let uniforms = UniformArena::new(
                &mut backend,
                config.uniform_memory_per_frame,
                &format!("uniforms_frame_{frame}"),
            )?;
            frames.push(FrameResources {
                cache: FrameBindingCache::new(frame, &config),
                uniforms,
            });
        }

        log::info!(
            "Binding context on {} backend: {} frame(s) in flight, {} sets per pool",
            backend.name(),
            frames_in_flight,
            config.max_sets
        );

        Ok(Self {
            backend,
            config,
            layouts: BindingLayoutCache::new(),
            allocator,
            frames,
            current_frame: 0,
            destroyed: false,
        })
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn config(&self) -> &BindingConfig {
        &self.config
    }

    pub fn layouts(&self) -> &BindingLayoutCache {
        &self.layouts
    }

    pub fn allocator(&self) -> &BindingSetAllocator {
        &self.allocator
    }

    pub fn frames_in_flight(&self) -> usize {
        self.frames.len()
    }

    pub fn current_frame(&self) -> usize {
        self.current_frame
    }

    pub fn frame(&self, frame: usize) -> Option<&FrameResources> {
        self.frames.get(frame)
    }

    /// Reflector using the configured artifact cache directory.
    pub fn reflector(&self) -> ShaderReflector<NagaCompiler> {
        ShaderReflector::with_cache_dir(self.config.shader_cache_dir.clone())
    }

    /// Start preparing `frame`.
    ///
    /// The caller must have waited for the GPU to finish the frame's previous
    /// use. Volatile sets requested during that use are returned to the pool.
    pub fn begin_frame(&mut self, frame: usize) -> BindingResult<()> {
        if frame >= self.frames.len() {
            return Err(BindingError::InvalidFrame {
                frame,
                frames_in_flight: self.frames.len(),
            });
        }
        let released = self.frames[frame].cache.reset_volatile();
        if !released.is_empty() {
            log::trace!(
                "Frame {}: releasing {} volatile set(s)",
                frame,
                released.len()
            );
            self.allocator.free(&mut self.backend, &released)?;
        }
        self.current_frame = frame;
        Ok(())
    }

    /// Move on to the next frame-in-flight.
    pub fn advance_frame(&mut self) -> BindingResult<usize> {
        let next = (self.current_frame + 1) % self.frames.len();
        self.begin_frame(next)?;
        Ok(next)
    }

    /// Destroy every pool, layout and uniform buffer. Safe to call twice.
    pub fn destroy(&mut self) {
        if self.destroyed {
            return;
        }
        self.destroyed = true;

        for frame in &mut self.frames {
            frame.cache.clear();
            frame.uniforms.destroy(&mut self.backend);
        }
        self.allocator.destroy(&mut self.backend);
        self.layouts.destroy(&mut self.backend);
        log::debug!("Binding context destroyed");
    }

    pub fn is_destroyed(&self) -> bool {
        self.destroyed
    }
}

impl<B: BindingBackend> Drop for BindingContext<B> {
    fn drop(&mut self) {
        self.destroy();
    }
}
