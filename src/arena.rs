//! Generation-tagged slot storage.
//!
//! Slots are recycled through a LIFO free list. Every removal bumps the
//! slot's generation, so an index taken before the removal no longer
//! resolves afterwards instead of silently aliasing the new occupant.

use std::fmt;

/// Index into an [`Arena`]: slot plus the generation it was issued under.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Slot position inside the arena.
    pub fn slot(&self) -> u32 {
        self.slot
    }

    /// Generation of the slot when this index was issued.
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation)
    }
}

impl fmt::Display for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generation-checked access.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    /// Free list of recyclable slots (LIFO stack).
    free_list: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::with_capacity(capacity),
            free_list: Vec::new(),
            len: 0,
        }
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Store a value, reusing a freed slot when one is available.
    pub fn insert(&mut self, value: T) -> ArenaIndex {
        self.len += 1;
        if let Some(slot) = self.free_list.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return ArenaIndex {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        ArenaIndex {
            slot,
            generation: 0,
        }
    }

    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        self.slots
            .get(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    /// Remove a value. Returns `None` for stale or unknown indices.
    pub fn remove(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    /// Remove every value, invalidating all outstanding indices.
    pub fn drain(&mut self) -> Vec<T> {
        let mut values = Vec::with_capacity(self.len);
        self.free_list.clear();
        for (slot, entry) in self.slots.iter_mut().enumerate().rev() {
            if let Some(value) = entry.value.take() {
                values.push(value);
            }
            entry.generation = entry.generation.wrapping_add(1);
            self.free_list.push(slot as u32);
        }
        values.reverse();
        self.len = 0;
        values
    }

    /// Remove every value, invalidating all outstanding indices.
    pub fn clear(&mut self) {
        self.drain();
    }

    /// Occupied slots with their current indices.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> + '_ {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    ArenaIndex {
                        slot: slot as u32,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }
}
