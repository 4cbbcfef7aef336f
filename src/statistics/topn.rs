//! Bounded multi-dimension top-N cache with TTL eviction.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use crate::flow::BYTE_DIM;

/// Item storable in a [`TopN`] cache.
pub trait TopNItem: Clone {
    /// Stable identity of the item; replaces on collision.
    fn item_id(&self) -> u64;
    /// Rate of the item in the given dimension, units/sec.
    fn dim_rate(&self, dim: usize) -> f64;
}

#[derive(Debug, Clone)]
struct Slot<T> {
    item: T,
    touched: Instant,
}

/// Cache of the hottest items on one node, ordered per dimension.
///
/// The cache holds more than `n` items (up to an internal capacity) so
/// that ranks are stable under churn; `get_top_n_min` answers "how hot is
/// the n-th hottest item", which callers turn into adaptive thresholds.
/// Items untouched for the TTL are purged lazily on mutation and ignored
/// by reads.
#[derive(Debug)]
pub struct TopN<T: TopNItem> {
    n: usize,
    capacity: usize,
    ttl: Duration,
    items: HashMap<u64, Slot<T>>,
}

impl<T: TopNItem> TopN<T> {
    /// Cache answering top-`n` queries, retaining at most `3 * n` items.
    pub fn new(n: usize, ttl: Duration) -> Self {
        debug_assert!(n > 0);
        TopN { n, capacity: 3 * n, ttl, items: HashMap::new() }
    }

    /// Inserts or replaces an item, refreshing its TTL. Returns every item
    /// dropped as a side effect (TTL-expired entries plus a capacity
    /// eviction of the coldest item by byte rate) so the caller can keep
    /// derived indexes consistent.
    pub fn put(&mut self, item: T) -> Vec<T> {
        let mut dropped = self.purge_expired();
        self.items.insert(item.item_id(), Slot { item, touched: Instant::now() });
        if self.items.len() > self.capacity {
            let coldest = self
                .items
                .iter()
                .min_by(|a, b| a.1.item.dim_rate(BYTE_DIM).total_cmp(&b.1.item.dim_rate(BYTE_DIM)))
                .map(|(id, _)| *id);
            if let Some(id) = coldest {
                if let Some(slot) = self.items.remove(&id) {
                    dropped.push(slot.item);
                }
            }
        }
        dropped
    }

    /// Removes an item by id.
    pub fn remove(&mut self, id: u64) -> Option<T> {
        self.items.remove(&id).map(|slot| slot.item)
    }

    /// Live item by id.
    pub fn get(&self, id: u64) -> Option<&T> {
        self.items.get(&id).filter(|slot| self.is_live(slot)).map(|slot| &slot.item)
    }

    /// Number of live items.
    pub fn len(&self) -> usize {
        self.items.values().filter(|slot| self.is_live(slot)).count()
    }

    /// Whether no live item remains.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Iterates live items in no particular order.
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.items.values().filter(|slot| self.is_live(slot)).map(|slot| &slot.item)
    }

    /// The smallest of the `n` largest items by `dim`, or `None` while
    /// fewer than `n` live items exist.
    pub fn get_top_n_min(&self, dim: usize) -> Option<&T> {
        let mut live: Vec<&T> = self.iter().collect();
        if live.len() < self.n {
            return None;
        }
        live.sort_unstable_by(|a, b| b.dim_rate(dim).total_cmp(&a.dim_rate(dim)));
        live.get(self.n - 1).copied()
    }

    fn is_live(&self, slot: &Slot<T>) -> bool {
        slot.touched.elapsed() < self.ttl
    }

    fn purge_expired(&mut self) -> Vec<T> {
        let ttl = self.ttl;
        let expired: Vec<u64> = self
            .items
            .iter()
            .filter(|(_, slot)| slot.touched.elapsed() >= ttl)
            .map(|(id, _)| *id)
            .collect();
        expired.into_iter().filter_map(|id| self.items.remove(&id)).map(|s| s.item).collect()
    }
}
