use std::collections::BTreeMap;

use crate::tile::TileId;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    last_used_tick: u64,
}

/// Capacity-bounded tile cache with strict LRU eviction.
///
/// Notes on determinism:
/// - Entries are keyed in a `BTreeMap` for stable traversal order.
/// - Recency is a monotonically increasing tick, so ties cannot occur.
///
/// The cache does no locking of its own; shared owners wrap it in a mutex.
#[derive(Debug)]
pub struct TileCache<V> {
    capacity: usize,
    tick: u64,
    entries: BTreeMap<TileId, CacheEntry<V>>,
}

impl<V> TileCache<V> {
    /// A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            tick: 0,
            entries: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: &TileId) -> bool {
        self.entries.contains_key(id)
    }

    /// Returns the entry and marks it most-recently-used.
    pub fn get(&mut self, id: &TileId) -> Option<&V> {
        self.tick += 1;
        let tick = self.tick;
        let entry = self.entries.get_mut(id)?;
        entry.last_used_tick = tick;
        Some(&entry.value)
    }

    /// Returns the entry without touching recency.
    pub fn peek(&self, id: &TileId) -> Option<&V> {
        self.entries.get(id).map(|e| &e.value)
    }

    /// Insert or replace `id` as most-recently-used.
    ///
    /// Inserting a new key into a full cache first evicts the
    /// least-recently-used entry, which is returned. Replacing an existing key
    /// never evicts.
    pub fn put(&mut self, id: TileId, value: V) -> Option<(TileId, V)> {
        self.tick += 1;

        if let Some(entry) = self.entries.get_mut(&id) {
            entry.value = value;
            entry.last_used_tick = self.tick;
            return None;
        }

        let evicted = if self.entries.len() >= self.capacity {
            self.evict_lru()
        } else {
            None
        };

        self.entries.insert(
            id,
            CacheEntry {
                value,
                last_used_tick: self.tick,
            },
        );
        evicted
    }

    pub fn remove(&mut self, id: &TileId) -> Option<V> {
        self.entries.remove(id).map(|e| e.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Keys from least- to most-recently-used.
    pub fn keys_lru_order(&self) -> Vec<TileId> {
        let mut keys: Vec<(u64, TileId)> = self
            .entries
            .iter()
            .map(|(k, e)| (e.last_used_tick, *k))
            .collect();
        keys.sort_unstable();
        keys.into_iter().map(|(_, k)| k).collect()
    }

    fn evict_lru(&mut self) -> Option<(TileId, V)> {
        let victim = self
            .entries
            .iter()
            .min_by_key(|(_, e)| e.last_used_tick)
            .map(|(k, _)| *k)?;
        self.entries.remove(&victim).map(|e| (victim, e.value))
    }
}
