//! Growable arena with a free-index pool.
//!
//! Tasks and stack frames live in per-location arenas. Released slots are
//! pushed onto a stack of reusable indices, so after warm-up an
//! allocate/release cycle touches no allocator at all. Each slot carries a
//! generation that is bumped on release; an [`ArenaIndex`] kept past its
//! release no longer resolves.

use core::fmt;

/// An index into an [`Arena`], tagged with the generation it was issued for.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ArenaIndex {
    slot: u32,
    generation: u32,
}

impl ArenaIndex {
    /// Creates an index from raw parts.
    #[must_use]
    pub const fn new(slot: u32, generation: u32) -> Self {
        Self { slot, generation }
    }

    /// Returns the slot number.
    #[must_use]
    pub const fn slot(self) -> u32 {
        self.slot
    }

    /// Returns the generation.
    #[must_use]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for ArenaIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ArenaIndex({}:{})", self.slot, self.generation)
    }
}

#[derive(Debug)]
struct Slot<T> {
    value: Option<T>,
    generation: u32,
}

/// Slot storage plus a stack of released slot numbers.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Creates an empty arena.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
        }
    }

    /// Number of live values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.slots.len() - self.free.len()
    }

    /// True if no value is live.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of slots ever created. Does not shrink on release.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of released slots waiting for reuse.
    #[must_use]
    pub fn pooled(&self) -> usize {
        self.free.len()
    }

    /// Stores `value`, reusing a released slot when one is pooled.
    pub fn alloc(&mut self, value: T) -> ArenaIndex {
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return ArenaIndex::new(slot, entry.generation);
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            value: Some(value),
            generation: 0,
        });
        ArenaIndex::new(slot, 0)
    }

    /// Removes the value at `index` and pools its slot.
    ///
    /// Returns `None` for stale or vacant indices.
    pub fn release(&mut self, index: ArenaIndex) -> Option<T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot);
        Some(value)
    }

    /// Returns the value at `index`, if it is still live.
    #[must_use]
    pub fn get(&self, index: ArenaIndex) -> Option<&T> {
        let entry = self.slots.get(index.slot as usize)?;
        if entry.generation == index.generation {
            entry.value.as_ref()
        } else {
            None
        }
    }

    /// Returns the value at `index` mutably, if it is still live.
    pub fn get_mut(&mut self, index: ArenaIndex) -> Option<&mut T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation == index.generation {
            entry.value.as_mut()
        } else {
            None
        }
    }

    /// True if `index` resolves to a live value.
    #[must_use]
    pub fn contains(&self, index: ArenaIndex) -> bool {
        self.get(index).is_some()
    }

    /// Iterates over live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ArenaIndex, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry
                .value
                .as_ref()
                .map(|value| (ArenaIndex::new(slot as u32, entry.generation), value))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_and_get() {
        let mut arena = Arena::new();
        let a = arena.alloc("a");
        let b = arena.alloc("b");
        assert_eq!(arena.get(a), Some(&"a"));
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.len(), 2);
    }

    #[test]
    fn released_slot_is_reused_without_growth() {
        let mut arena = Arena::new();
        let first = arena.alloc(1u32);
        assert_eq!(arena.release(first), Some(1));
        assert_eq!(arena.pooled(), 1);

        let second = arena.alloc(2u32);
        assert_eq!(second.slot(), first.slot());
        assert_eq!(arena.capacity(), 1);
        assert_eq!(arena.pooled(), 0);
    }

    #[test]
    fn stale_index_does_not_resolve() {
        let mut arena = Arena::new();
        let first = arena.alloc(1u32);
        arena.release(first);
        let second = arena.alloc(2u32);

        assert_eq!(arena.get(first), None);
        assert_eq!(arena.release(first), None);
        assert_eq!(arena.get(second), Some(&2));
    }

    #[test]
    fn iter_skips_released() {
        let mut arena = Arena::new();
        let a = arena.alloc('a');
        let _b = arena.alloc('b');
        arena.release(a);
        let live: Vec<char> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec!['b']);
    }
}
