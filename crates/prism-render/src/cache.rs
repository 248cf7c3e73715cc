// SPDX-License-Identifier: CEPL-1.0
//! Bounded sampler deduplication.
//!
//! Slot 0 is the most recently used entry. A hit rotates its entry to the
//! front, a miss takes the first empty slot or, when full, pushes the last
//! entry out and reserves slot 0. Creation and teardown of the native
//! sampler are left to the caller so they go through the normal command
//! path.

use crate::types::SamplerDesc;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lookup<H> {
    Hit(H),
    /// `slot` is reserved for the new sampler; pass it to
    /// [`SamplerCache::fill`]. `evicted` must be released by the caller.
    Miss { slot: usize, evicted: Option<H> },
}

pub struct SamplerCache<H, const N: usize> {
    slots: [Option<(SamplerDesc, H)>; N],
}

impl<H: Copy, const N: usize> Default for SamplerCache<H, N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<H: Copy, const N: usize> SamplerCache<H, N> {
    pub fn new() -> Self {
        assert!(N > 0, "sampler cache needs at least one slot");
        Self {
            slots: [None; N],
        }
    }

    pub const fn capacity(&self) -> usize {
        N
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn lookup(&mut self, desc: &SamplerDesc) -> Lookup<H> {
        let hit = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some((cached, _)) if cached == desc));
        if let Some(index) = hit {
            self.slots[..=index].rotate_right(1);
            if let Some((_, handle)) = self.slots[0] {
                return Lookup::Hit(handle);
            }
        }

        if let Some(slot) = self.slots.iter().position(Option::is_none) {
            return Lookup::Miss {
                slot,
                evicted: None,
            };
        }

        self.slots.rotate_right(1);
        let evicted = self.slots[0].take().map(|(_, handle)| handle);
        Lookup::Miss { slot: 0, evicted }
    }

    pub fn fill(&mut self, slot: usize, desc: SamplerDesc, handle: H) {
        self.slots[slot] = Some((desc, handle));
    }

    /// Drops the entry for `desc`, keeping the remaining entries in order.
    pub fn remove(&mut self, desc: &SamplerDesc) -> Option<H> {
        let index = self
            .slots
            .iter()
            .position(|slot| matches!(slot, Some((cached, _)) if cached == desc))?;
        let removed = self.slots[index].take().map(|(_, handle)| handle);
        self.slots[index..].rotate_left(1);
        removed
    }

    /// Occupied entries, most recent first.
    pub fn entries(&self) -> impl Iterator<Item = (&SamplerDesc, H)> + '_ {
        self.slots
            .iter()
            .flatten()
            .map(|(desc, handle)| (desc, *handle))
    }

    /// Empties the cache, handing back every handle it held.
    pub fn drain(&mut self) -> Vec<H> {
        self.slots
            .iter_mut()
            .filter_map(|slot| slot.take().map(|(_, handle)| handle))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Filter, TexMode};

    fn desc(filter: Filter, u: TexMode) -> SamplerDesc {
        SamplerDesc {
            filter,
            u,
            ..SamplerDesc::default()
        }
    }

    /// Resolves a lookup the way the device does, numbering new samplers.
    fn get(cache: &mut SamplerCache<u32, 2>, next: &mut u32, d: SamplerDesc) -> (u32, Option<u32>) {
        match cache.lookup(&d) {
            Lookup::Hit(h) => (h, None),
            Lookup::Miss { slot, evicted } => {
                *next += 1;
                cache.fill(slot, d, *next);
                (*next, evicted)
            }
        }
    }

    fn contents(cache: &SamplerCache<u32, 2>) -> Vec<u32> {
        cache.entries().map(|(_, h)| h).collect()
    }

    #[test]
    fn a_b_a_c_evicts_b() {
        let a = desc(Filter::Linear, TexMode::Wrap);
        let b = desc(Filter::Point, TexMode::Wrap);
        let c = desc(Filter::Point, TexMode::Clamp);
        let mut cache = SamplerCache::<u32, 2>::new();
        let mut next = 0;

        let (ha, _) = get(&mut cache, &mut next, a);
        assert_eq!(contents(&cache), vec![ha]);

        let (hb, _) = get(&mut cache, &mut next, b);
        assert_eq!(contents(&cache), vec![ha, hb]);

        let (again, _) = get(&mut cache, &mut next, a);
        assert_eq!(again, ha);
        assert_eq!(contents(&cache), vec![ha, hb]);

        let (hc, evicted) = get(&mut cache, &mut next, c);
        assert_eq!(evicted, Some(hb));
        assert_eq!(contents(&cache), vec![hc, ha]);
        assert_eq!(next, 3);
    }

    #[test]
    fn hit_promotes_to_front() {
        let mut cache = SamplerCache::<u32, 4>::new();
        let descs: Vec<_> = [TexMode::Wrap, TexMode::Clamp, TexMode::Border, TexMode::Mirror]
            .into_iter()
            .map(|m| desc(Filter::Linear, m))
            .collect();
        for (i, d) in descs.iter().enumerate() {
            match cache.lookup(d) {
                Lookup::Miss { slot, evicted: None } => cache.fill(slot, *d, i as u32),
                other => panic!("unexpected {other:?}"),
            }
        }
        assert_eq!(cache.lookup(&descs[2]), Lookup::Hit(2));
        let order: Vec<u32> = cache.entries().map(|(_, h)| h).collect();
        assert_eq!(order, vec![2, 0, 1, 3]);
    }

    #[test]
    fn evicts_last_when_full() {
        let mut cache = SamplerCache::<u32, 2>::new();
        let mut next = 0;
        let mut evictions = Vec::new();
        for m in [TexMode::Wrap, TexMode::Clamp, TexMode::Border, TexMode::Mirror] {
            let (_, evicted) = get(&mut cache, &mut next, desc(Filter::Point, m));
            evictions.extend(evicted);
            assert!(cache.len() <= cache.capacity());
        }
        assert_eq!(evictions, vec![1, 2]);
        assert_eq!(contents(&cache), vec![4, 3]);
    }

    #[test]
    fn removed_entry_is_a_miss_again() {
        let mut cache = SamplerCache::<u32, 4>::new();
        let mut next = 0;
        let descs: Vec<_> = [TexMode::Wrap, TexMode::Clamp, TexMode::Border]
            .into_iter()
            .map(|m| desc(Filter::Point, m))
            .collect();
        for d in &descs {
            match cache.lookup(d) {
                Lookup::Miss { slot, .. } => {
                    next += 1;
                    cache.fill(slot, *d, next);
                }
                other => panic!("unexpected {other:?}"),
            }
        }

        assert_eq!(cache.remove(&descs[1]), Some(2));
        assert_eq!(cache.remove(&descs[1]), None);
        let order: Vec<u32> = cache.entries().map(|(_, h)| h).collect();
        assert_eq!(order, vec![1, 3]);
        assert_eq!(
            cache.lookup(&descs[1]),
            Lookup::Miss {
                slot: 2,
                evicted: None
            }
        );
    }

    #[test]
    fn drain_empties() {
        let mut cache = SamplerCache::<u32, 2>::new();
        let mut next = 0;
        get(&mut cache, &mut next, desc(Filter::Point, TexMode::Wrap));
        get(&mut cache, &mut next, desc(Filter::Linear, TexMode::Wrap));
        let mut drained = cache.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 2]);
        assert!(cache.is_empty());
    }
}
