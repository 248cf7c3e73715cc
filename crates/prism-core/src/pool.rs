// SPDX-License-Identifier: CEPL-1.0
//! Fixed-growth slab allocator.
//!
//! Storage grows one chunk at a time and existing chunks are never
//! reallocated, so a live value never moves. Freed slots go on a free list
//! and bump their generation, which makes keys to the old value miss.

use std::fmt;

/// Slots per chunk unless the pool is built with [`ObjectPool::with_chunk_size`].
pub const DEFAULT_CHUNK_SIZE: usize = 64;

#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PoolKey {
    index: u32,
    generation: u32,
}

impl PoolKey {
    pub fn index(self) -> u32 {
        self.index
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for PoolKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct ObjectPool<T> {
    chunks: Vec<Vec<Slot<T>>>,
    chunk_size: usize,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for ObjectPool<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> ObjectPool<T> {
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    pub fn with_chunk_size(chunk_size: usize) -> Self {
        Self {
            chunks: Vec::new(),
            chunk_size: chunk_size.max(1),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Total slots allocated so far, live or free.
    pub fn capacity(&self) -> usize {
        self.chunks.len() * self.chunk_size
    }

    pub fn insert(&mut self, value: T) -> PoolKey {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = self.slot_mut(index);
            slot.value = Some(value);
            return PoolKey {
                index,
                generation: slot.generation,
            };
        }

        let needs_chunk = self
            .chunks
            .last()
            .map_or(true, |chunk| chunk.len() == self.chunk_size);
        if needs_chunk {
            self.chunks.push(Vec::with_capacity(self.chunk_size));
        }
        let chunk_index = self.chunks.len() - 1;
        let chunk = &mut self.chunks[chunk_index];
        let index = (chunk_index * self.chunk_size + chunk.len()) as u32;
        chunk.push(Slot {
            generation: 0,
            value: Some(value),
        });
        PoolKey {
            index,
            generation: 0,
        }
    }

    /// Takes the value out and recycles its slot. Stale keys return `None`.
    pub fn remove(&mut self, key: PoolKey) -> Option<T> {
        let slot = self.lookup_mut(key)?;
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: PoolKey) -> Option<&T> {
        let (chunk, offset) = self.split(key.index);
        let slot = self.chunks.get(chunk)?.get(offset)?;
        if slot.generation != key.generation {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, key: PoolKey) -> Option<&mut T> {
        self.lookup_mut(key)?.value.as_mut()
    }

    /// Live entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (PoolKey, &T)> + '_ {
        let chunk_size = self.chunk_size;
        self.chunks.iter().enumerate().flat_map(move |(c, chunk)| {
            chunk.iter().enumerate().filter_map(move |(o, slot)| {
                slot.value.as_ref().map(|value| {
                    let key = PoolKey {
                        index: (c * chunk_size + o) as u32,
                        generation: slot.generation,
                    };
                    (key, value)
                })
            })
        })
    }

    fn split(&self, index: u32) -> (usize, usize) {
        let index = index as usize;
        (index / self.chunk_size, index % self.chunk_size)
    }

    fn lookup_mut(&mut self, key: PoolKey) -> Option<&mut Slot<T>> {
        let (chunk, offset) = self.split(key.index);
        let slot = self.chunks.get_mut(chunk)?.get_mut(offset)?;
        (slot.generation == key.generation).then_some(slot)
    }

    fn slot_mut(&mut self, index: u32) -> &mut Slot<T> {
        let (chunk, offset) = self.split(index);
        &mut self.chunks[chunk][offset]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_get_remove() {
        let mut pool = ObjectPool::new();
        let a = pool.insert("a");
        let b = pool.insert("b");
        assert_eq!(pool.len(), 2);
        assert_eq!(pool.get(a), Some(&"a"));
        assert_eq!(pool.remove(a), Some("a"));
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.get(b), Some(&"b"));
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn stale_key_misses_after_reuse() {
        let mut pool = ObjectPool::new();
        let a = pool.insert(1u32);
        pool.remove(a);
        let b = pool.insert(2u32);
        assert_eq!(a.index(), b.index());
        assert_ne!(a.generation(), b.generation());
        assert_eq!(pool.get(a), None);
        assert_eq!(pool.remove(a), None);
        assert_eq!(pool.get(b), Some(&2));
    }

    #[test]
    fn grows_by_whole_chunks() {
        let mut pool = ObjectPool::with_chunk_size(4);
        let keys: Vec<_> = (0..9).map(|i| pool.insert(i)).collect();
        assert_eq!(pool.capacity(), 12);
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(pool.get(*key), Some(&i));
        }
    }

    #[test]
    fn values_do_not_move_when_growing() {
        let mut pool = ObjectPool::with_chunk_size(2);
        let first = pool.insert(10u64);
        let addr = pool.get(first).map(|v| v as *const u64);
        for i in 0..32 {
            pool.insert(i);
        }
        assert_eq!(pool.get(first).map(|v| v as *const u64), addr);
    }

    #[test]
    fn iter_skips_free_slots() {
        let mut pool = ObjectPool::with_chunk_size(3);
        let keys: Vec<_> = (0..5).map(|i| pool.insert(i)).collect();
        pool.remove(keys[1]);
        pool.remove(keys[3]);
        let live: Vec<i32> = pool.iter().map(|(_, v)| *v).collect();
        assert_eq!(live, vec![0, 2, 4]);
    }
}
