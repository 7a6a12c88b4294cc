//! Bounded cache of opened multichunk bodies.

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use syncvault_protocol::MultiChunkId;

/// Least-recently-used cache of verified multichunk bodies.
///
/// Restoring several files from the same multichunk downloads it once.
#[derive(Debug)]
pub struct MultiChunkCache {
    capacity: usize,
    inner: Mutex<CacheInner>,
}

#[derive(Debug, Default)]
struct CacheInner {
    bodies: HashMap<MultiChunkId, Arc<Vec<u8>>>,
    order: VecDeque<MultiChunkId>,
    hits: u64,
    misses: u64,
}

impl MultiChunkCache {
    /// Creates a cache holding up to `capacity` bodies. Zero disables caching.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            inner: Mutex::new(CacheInner::default()),
        }
    }

    /// Returns the cached body of `id`, marking it recently used.
    pub fn get(&self, id: &MultiChunkId) -> Option<Arc<Vec<u8>>> {
        let mut inner = self.inner.lock();
        match inner.bodies.get(id).cloned() {
            Some(body) => {
                inner.hits += 1;
                inner.order.retain(|k| k != id);
                inner.order.push_back(*id);
                Some(body)
            }
            None => {
                inner.misses += 1;
                None
            }
        }
    }

    /// Stores a body, evicting the least recently used ones beyond capacity.
    pub fn insert(&self, id: MultiChunkId, body: Arc<Vec<u8>>) {
        if self.capacity == 0 {
            return;
        }
        let mut inner = self.inner.lock();
        if inner.bodies.insert(id, body).is_some() {
            inner.order.retain(|k| k != &id);
        }
        inner.order.push_back(id);
        while inner.order.len() > self.capacity {
            if let Some(evicted) = inner.order.pop_front() {
                inner.bodies.remove(&evicted);
            }
        }
    }

    /// Drops every cached body.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.bodies.clear();
        inner.order.clear();
    }

    /// Number of cached bodies.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().bodies.len()
    }

    /// Returns true if nothing is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `(hits, misses)` since creation.
    #[must_use]
    pub fn stats(&self) -> (u64, u64) {
        let inner = self.inner.lock();
        (inner.hits, inner.misses)
    }
}
