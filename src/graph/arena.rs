//! Generational slot arena.
//!
//! Nodes and edges live in arenas and are addressed by `(index, generation)`
//! handles. Freeing a slot bumps its generation, so any handle still held by a
//! cache or tag resolves to `None` instead of silently aliasing the slot's
//! next occupant.

use std::marker::PhantomData;

use crate::error::{GraphError, GraphResult};

/// A typed handle into an [`Arena`].
pub trait ArenaHandle: Copy + Eq {
    const KIND: &'static str;

    fn from_parts(index: u32, generation: u32) -> Self;
    fn index(self) -> u32;
    fn generation(self) -> u32;
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug, Clone)]
pub struct Arena<T, H> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    _handle: PhantomData<H>,
}

impl<T, H: ArenaHandle> Default for Arena<T, H> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, H: ArenaHandle> Arena<T, H> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            _handle: PhantomData,
        }
    }

    /// Make room for one more value. After this succeeds, the next
    /// [`insert`](Self::insert) cannot fail.
    pub fn reserve_one(&mut self) -> GraphResult<()> {
        if self.free.is_empty() {
            self.slots
                .try_reserve(1)
                .map_err(GraphError::capacity(H::KIND))?;
        }
        // Removing later pushes onto the free list; keep that infallible too.
        self.free
            .try_reserve(1)
            .map_err(GraphError::capacity(H::KIND))?;
        Ok(())
    }

    pub fn insert(&mut self, value: T) -> H {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return H::from_parts(index, slot.generation);
        }
        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        H::from_parts(index, 0)
    }

    pub fn remove(&mut self, handle: H) -> Option<T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(handle.index());
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, handle: H) -> Option<&T> {
        let slot = self.slots.get(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: H) -> Option<&mut T> {
        let slot = self.slots.get_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Like [`get`](Self::get) but reports a stale handle as an error.
    pub fn try_get(&self, handle: H) -> GraphResult<&T> {
        self.get(handle).ok_or(GraphError::StaleHandle {
            kind: H::KIND,
            index: handle.index(),
            generation: handle.generation(),
        })
    }

    pub fn contains(&self, handle: H) -> bool {
        self.get(handle).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of slots ever allocated, occupied or not.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// The live handle stored at raw slot `index`, if that slot is occupied.
    pub fn handle_at(&self, index: usize) -> Option<H> {
        let slot = self.slots.get(index)?;
        slot.value
            .as_ref()
            .map(|_| H::from_parts(index as u32, slot.generation))
    }

    pub fn iter(&self) -> impl Iterator<Item = (H, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (H::from_parts(i as u32, slot.generation), v))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct Id(u32, u32);

    impl ArenaHandle for Id {
        const KIND: &'static str = "test";
        fn from_parts(index: u32, generation: u32) -> Self {
            Id(index, generation)
        }
        fn index(self) -> u32 {
            self.0
        }
        fn generation(self) -> u32 {
            self.1
        }
    }

    #[test]
    fn freed_slot_rejects_old_handle() {
        let mut arena: Arena<&str, Id> = Arena::new();
        let a = arena.insert("a");
        assert_eq!(arena.remove(a), Some("a"));
        let b = arena.insert("b");

        assert_eq!(a.index(), b.index(), "slot should be reused");
        assert!(arena.get(a).is_none(), "stale handle must not alias");
        assert_eq!(arena.get(b), Some(&"b"));
        assert!(arena.try_get(a).is_err());
    }

    #[test]
    fn len_tracks_live_values() {
        let mut arena: Arena<u8, Id> = Arena::new();
        let ids: Vec<Id> = (0..4).map(|i| arena.insert(i)).collect();
        arena.remove(ids[1]);
        assert_eq!(arena.len(), 3);
        assert_eq!(arena.slot_count(), 4);
        assert!(arena.handle_at(1).is_none());
        assert_eq!(arena.iter().count(), 3);
    }
}
