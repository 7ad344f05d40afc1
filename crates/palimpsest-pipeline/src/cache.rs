//! Bounded Plaintext Cache
//!
//! Workers computing a diff need the *plaintext* of the predecessor unit.
//! The staging loop inserts every submission's plaintext here keyed by
//! unit identity, so by the time a successor's worker runs, its
//! predecessor's text is one map lookup away instead of a point
//! reconstruction against the store.
//!
//! ## Eviction
//!
//! Size-bounded, oldest-inserted-first. Reads use `peek` and never promote
//! an entry: a predecessor's text is consumed once by one successor, so
//! recency is meaningless here and insertion order is exactly the order
//! entries stop being useful. A worker that misses (capacity pressure, or
//! a predecessor from an earlier run) falls back to reconstructing from
//! the store.
//!
//! The lock is taken per operation and never held across a worker's
//! decode or diff computation.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use lru::LruCache;
use palimpsest_store::{ChainId, UnitId};

use crate::stats::PipelineStats;

/// Bounded map from unit identity to its plaintext.
pub struct PlainTextCache {
    entries: Mutex<LruCache<(ChainId, UnitId), Bytes>>,
    stats: Arc<PipelineStats>,
}

impl PlainTextCache {
    pub fn new(capacity: usize, stats: Arc<PipelineStats>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            stats,
        }
    }

    /// Look up a unit's plaintext without promoting it.
    pub fn get(&self, chain: ChainId, id: UnitId) -> Option<Bytes> {
        let entries = self.entries.lock().expect("cache lock poisoned");
        let found = entries.peek(&(chain, id)).cloned();
        match found {
            Some(plain) => {
                self.stats.inc_cache_hits();
                Some(plain)
            }
            None => {
                self.stats.inc_cache_misses();
                None
            }
        }
    }

    /// Insert a unit's plaintext, evicting the oldest entry when full.
    pub fn put(&self, chain: ChainId, id: UnitId, plain: Bytes) {
        let mut entries = self.entries.lock().expect("cache lock poisoned");
        entries.push((chain, id), plain);
    }
}
