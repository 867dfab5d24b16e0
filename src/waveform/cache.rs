//! Process-wide envelope cache keyed by file identity.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};

use super::WaveformEnvelope;
use crate::file::FileKey;

/// Capacity-bounded cache of completed envelopes.
///
/// One entry per file identity; storing an envelope with a different point
/// count overwrites the stale entry. The cache may be cleared at any time
/// (for example on a memory-pressure signal) concurrently with in-flight
/// computations; a computation finishing after a clear simply repopulates it.
pub struct EnvelopeCache {
    inner: Mutex<CacheInner>,
}

impl EnvelopeCache {
    /// Create a cache retaining at most `max_entries` envelopes.
    pub fn new(max_entries: usize) -> Self {
        Self {
            inner: Mutex::new(CacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
                max_entries: max_entries.max(1),
            }),
        }
    }

    /// Look up an envelope; only an entry with a matching point count hits.
    pub fn get(&self, key: &FileKey, point_count: usize) -> Option<Arc<WaveformEnvelope>> {
        let mut inner = self.lock();
        let hit = inner
            .map
            .get(key)
            .filter(|envelope| envelope.point_count() == point_count)
            .cloned()?;
        inner.touch(key.clone());
        Some(hit)
    }

    /// Store an envelope, replacing any stale entry for the same file.
    pub fn insert(&self, key: FileKey, envelope: Arc<WaveformEnvelope>) {
        let mut inner = self.lock();
        inner.map.insert(key.clone(), envelope);
        inner.touch(key);
        inner.evict();
    }

    /// Drop every cached envelope.
    pub fn clear(&self) {
        let mut inner = self.lock();
        inner.map.clear();
        inner.order.clear();
    }

    /// Number of retained envelopes.
    pub fn len(&self) -> usize {
        self.lock().map.len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, CacheInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

struct CacheInner {
    map: HashMap<FileKey, Arc<WaveformEnvelope>>,
    order: VecDeque<FileKey>,
    max_entries: usize,
}

impl CacheInner {
    fn touch(&mut self, key: FileKey) {
        self.order.retain(|existing| existing != &key);
        self.order.push_back(key);
    }

    fn evict(&mut self) {
        while self.map.len() > self.max_entries {
            let Some(key) = self.order.pop_front() else {
                break;
            };
            self.map.remove(&key);
        }
    }
}
