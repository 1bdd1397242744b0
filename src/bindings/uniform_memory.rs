//! Per-frame backing memory for uniform and storage buffer parameters.
//!
//! One host-visible buffer per frame-in-flight, carved into named regions by
//! a bump allocator. Region offsets and record strides are aligned to the
//! device's minimum buffer offset alignment, so every offset derived from
//! them is valid as a dynamic offset.

use rustc_hash::FxHashMap;

use crate::backend::{BindingBackend, BufferHandle, BufferRegion};
use crate::error::{BindingError, BindingResult};

/// Align a value up to the given alignment.
#[inline]
pub fn align_up(value: u64, alignment: u64) -> u64 {
    debug_assert!(alignment.is_power_of_two());
    (value + alignment - 1) & !(alignment - 1)
}

/// A named region of the uniform buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UniformRegion {
    /// Byte offset into the buffer, aligned.
    pub offset: u64,
    /// Size of one record.
    pub elem_size: u64,
    /// Distance between consecutive records, aligned.
    pub stride: u64,
    /// Number of records; 1 for plain uniforms.
    pub count: u32,
    pub dynamic: bool,
}

impl UniformRegion {
    /// Total bytes reserved for this region.
    pub fn size(&self) -> u64 {
        self.stride * (self.count as u64 - 1) + self.elem_size
    }
}

/// Named-region allocator over one frame's uniform buffer.
#[derive(Debug)]
pub struct UniformArena {
    buffer: BufferHandle,
    capacity: u64,
    cursor: u64,
    alignment: u64,
    regions: FxHashMap<String, UniformRegion>,
}

impl UniformArena {
    pub fn new<B: BindingBackend>(backend: &mut B, capacity: u64, label: &str) -> BindingResult<Self> {
        let buffer = backend.create_buffer(capacity, label)?;
        Ok(Self {
            buffer,
            capacity,
            cursor: 0,
            alignment: backend.min_buffer_offset_alignment().max(1),
            regions: FxHashMap::default(),
        })
    }

    fn reserve(&mut self, name: &str, region_size: u64) -> BindingResult<u64> {
        let offset = align_up(self.cursor, self.alignment);
        if offset + region_size > self.capacity {
            log::error!(
                "Uniform memory exhausted allocating '{}' ({} bytes, {} of {} used)",
                name,
                region_size,
                self.cursor,
                self.capacity
            );
            return Err(BindingError::UniformMemoryExhausted {
                name: name.to_string(),
                requested: region_size,
                available: self.capacity.saturating_sub(offset),
            });
        }
        self.cursor = offset + region_size;
        Ok(offset)
    }

    fn existing(&self, name: &str, requested: &UniformRegion) -> BindingResult<Option<u64>> {
        match self.regions.get(name) {
            None => Ok(None),
            Some(existing)
                if existing.elem_size == requested.elem_size
                    && existing.count == requested.count
                    && existing.dynamic == requested.dynamic =>
            {
                Ok(Some(existing.offset))
            }
            Some(existing) => {
                log::error!(
                    "Uniform region '{}' re-allocated with a different size ({} vs {})",
                    name,
                    existing.size(),
                    requested.size()
                );
                Err(BindingError::SizeMismatch {
                    name: name.to_string(),
                    existing: existing.size(),
                    requested: requested.size(),
                })
            }
        }
    }

    fn alloc(&mut self, name: &str, mut region: UniformRegion) -> BindingResult<u64> {
        if let Some(offset) = self.existing(name, &region)? {
            return Ok(offset);
        }
        region.offset = self.reserve(name, region.size())?;
        self.regions.insert(name.to_string(), region);
        Ok(region.offset)
    }

    /// Allocate (or look up) a plain region of `size` bytes.
    pub fn alloc_uniform(&mut self, name: &str, size: u64) -> BindingResult<u64> {
        self.alloc(
            name,
            UniformRegion {
                offset: 0,
                elem_size: size,
                stride: align_up(size.max(1), self.alignment),
                count: 1,
                dynamic: false,
            },
        )
    }

    /// Allocate (or look up) a region of `count` records of `elem_size` bytes.
    pub fn alloc_dynamic_uniform(
        &mut self,
        name: &str,
        elem_size: u64,
        count: u32,
    ) -> BindingResult<u64> {
        self.alloc(
            name,
            UniformRegion {
                offset: 0,
                elem_size,
                stride: align_up(elem_size.max(1), self.alignment),
                count: count.max(1),
                dynamic: true,
            },
        )
    }

    pub fn region(&self, name: &str) -> BindingResult<&UniformRegion> {
        self.regions
            .get(name)
            .ok_or_else(|| BindingError::NotAllocated(name.to_string()))
    }

    /// Write bytes at the start of a region.
    pub fn set_uniform<B: BindingBackend>(
        &self,
        backend: &mut B,
        name: &str,
        data: &[u8],
    ) -> BindingResult<()> {
        self.write(backend, name, 0, data)
    }

    /// Write bytes at `offset` within a region.
    pub fn write<B: BindingBackend>(
        &self,
        backend: &mut B,
        name: &str,
        offset: u64,
        data: &[u8],
    ) -> BindingResult<()> {
        let region = self.region(name)?;
        let end = offset + data.len() as u64;
        if end > region.size() {
            return Err(BindingError::DataTooLarge {
                name: name.to_string(),
                size: end,
                capacity: region.size(),
            });
        }
        backend.write_buffer(self.buffer, region.offset + offset, data)?;
        Ok(())
    }

    /// Buffer range a set binding should reference.
    ///
    /// Dynamic regions expose one record; the record is picked by the dynamic
    /// offset at bind time.
    pub fn generate_buffer_region(&self, name: &str) -> BindingResult<BufferRegion> {
        let region = self.region(name)?;
        Ok(BufferRegion {
            buffer: self.buffer,
            offset: region.offset,
            size: if region.dynamic {
                region.elem_size
            } else {
                region.size()
            },
        })
    }

    pub fn buffer(&self) -> BufferHandle {
        self.buffer
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Bytes reserved so far.
    pub fn used(&self) -> u64 {
        self.cursor
    }

    pub fn capacity(&self) -> u64 {
        self.capacity
    }

    /// Release every region reserved after `mark`, a previous value of
    /// [`Self::used`]. Regions are bump-allocated, so these are exactly the
    /// regions starting at or past `mark`.
    pub fn truncate(&mut self, mark: u64) {
        self.regions.retain(|_, region| region.offset < mark);
        self.cursor = self.cursor.min(mark);
    }

    pub fn destroy<B: BindingBackend>(&mut self, backend: &mut B) {
        backend.destroy_buffer(self.buffer);
        self.regions.clear();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::RecordingBackend;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 256), 0);
        assert_eq!(align_up(1, 256), 256);
        assert_eq!(align_up(64, 256), 256);
        assert_eq!(align_up(257, 256), 512);
    }

    #[test]
    fn test_regions_are_aligned() {
        let mut backend = RecordingBackend::with_alignment(256);
        let mut arena = UniformArena::new(&mut backend, 64 * 1024, "uniforms").unwrap();

        let a = arena.alloc_uniform("camera", 80).unwrap();
        let b = arena.alloc_dynamic_uniform("model", 64, 10).unwrap();
        assert_eq!(a, 0);
        assert_eq!(b, 256);
        assert_eq!(arena.region("model").unwrap().stride, 256);
        assert_eq!(arena.used(), 256 + 9 * 256 + 64);
    }

    #[test]
    fn test_realloc_same_size_aliases() {
        let mut backend = RecordingBackend::new();
        let mut arena = UniformArena::new(&mut backend, 4096, "uniforms").unwrap();
        let a = arena.alloc_uniform("camera", 64).unwrap();
        assert_eq!(arena.alloc_uniform("camera", 64).unwrap(), a);
        assert!(matches!(
            arena.alloc_uniform("camera", 128),
            Err(BindingError::SizeMismatch { .. })
        ));
    }

    #[test]
    fn test_exhaustion() {
        let mut backend = RecordingBackend::new();
        let mut arena = UniformArena::new(&mut backend, 512, "uniforms").unwrap();
        arena.alloc_uniform("a", 256).unwrap();
        arena.alloc_uniform("b", 256).unwrap();
        assert!(matches!(
            arena.alloc_uniform("c", 1),
            Err(BindingError::UniformMemoryExhausted { .. })
        ));
    }

    #[test]
    fn test_truncate_releases_later_regions() {
        let mut backend = RecordingBackend::with_alignment(256);
        let mut arena = UniformArena::new(&mut backend, 1024, "uniforms").unwrap();
        arena.alloc_uniform("camera", 64).unwrap();
        let mark = arena.used();

        arena.alloc_dynamic_uniform("model", 64, 2).unwrap();
        arena.truncate(mark);
        assert_eq!(arena.used(), mark);
        assert!(arena.region("camera").is_ok());
        assert!(matches!(
            arena.region("model"),
            Err(BindingError::NotAllocated(_))
        ));
        assert_eq!(arena.alloc_uniform("light", 64).unwrap(), 256);
    }

    #[test]
    fn test_write_checks_bounds() {
        let mut backend = RecordingBackend::new();
        let mut arena = UniformArena::new(&mut backend, 4096, "uniforms").unwrap();
        arena.alloc_uniform("camera", 16).unwrap();
        arena
            .set_uniform(&mut backend, "camera", &[7u8; 16])
            .unwrap();
        assert_eq!(
            &backend.buffer_contents(arena.buffer()).unwrap()[..16],
            &[7u8; 16]
        );
        assert!(matches!(
            arena.set_uniform(&mut backend, "camera", &[0u8; 17]),
            Err(BindingError::DataTooLarge { .. })
        ));
        assert!(matches!(
            arena.set_uniform(&mut backend, "missing", &[0u8; 4]),
            Err(BindingError::NotAllocated(_))
        ));
    }
}
