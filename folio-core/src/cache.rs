use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(5);

/// Short-lived read cache in front of the tree builder.
///
/// Any component that changes more than one path key calls
/// [`ReadCache::invalidate`], which drops every entry. Inserts carry the
/// generation observed before the value was computed, so a value built
/// while an invalidation happened is discarded instead of cached.
pub struct ReadCache<K, V> {
    ttl: Duration,
    entries: Mutex<HashMap<K, (Instant, Arc<V>)>>,
    generation: AtomicU64,
}

impl<K, V> fmt::Debug for ReadCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let entries = self.entries.try_lock().map(|guard| guard.len());
        f.debug_struct("ReadCache")
            .field("ttl", &self.ttl)
            .field("entries", &entries)
            .field("generation", &self.generation.load(Ordering::Relaxed))
            .finish()
    }
}

impl<K: Eq + Hash, V> ReadCache<K, V> {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
        }
    }

    pub fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    pub fn get(&self, key: &K) -> Option<Arc<V>> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((stored_at, value)) if stored_at.elapsed() < self.ttl => {
                Some(Arc::clone(value))
            }
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    /// Store `value` unless the cache was invalidated after `generation`
    /// was read. Returns whether the value was kept.
    pub fn insert(&self, generation: u64, key: K, value: Arc<V>) -> bool {
        let mut entries = self.entries.lock();
        if self.generation() != generation {
            return false;
        }
        entries.insert(key, (Instant::now(), value));
        true
    }

    pub fn invalidate(&self) {
        let mut entries = self.entries.lock();
        self.generation.fetch_add(1, Ordering::AcqRel);
        entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
