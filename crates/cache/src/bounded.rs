//! Fixed-capacity cache with LRU eviction and release callbacks
//!
//! Every value that leaves the cache through eviction, [`BoundedCache::delete`],
//! [`BoundedCache::clear`] or replacement by a different value is handed to the
//! release callback exactly once. Bookkeeping is finished before any callback
//! runs, so a misbehaving callback can never leave the cache over capacity or
//! with a dangling recency entry.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::hash::Hash;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::Mutex;

/// Callback invoked with each value removed from the cache
pub type ReleaseCallback<K, V> = Arc<dyn Fn(&K, V) + Send + Sync>;

/// Statistics about cache usage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Number of entries currently resident
    pub entry_count: usize,

    /// Maximum number of resident entries
    pub capacity: usize,

    /// Number of cache hits
    pub hits: u64,

    /// Number of cache misses
    pub misses: u64,

    /// Number of entries evicted to make room for new keys
    pub evictions: u64,

    /// Number of values handed to the release path
    pub releases: u64,

    /// Number of release callbacks that panicked
    pub release_failures: u64,
}

impl CacheStats {
    /// Calculate the cache hit rate (0.0 to 1.0)
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }

    /// Calculate occupancy relative to capacity (0.0 to 1.0)
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            0.0
        } else {
            self.entry_count as f64 / self.capacity as f64
        }
    }
}

struct CacheEntry<V> {
    value: V,
    /// Position in the recency order; larger is more recent
    recency: u64,
}

/// Internal cache state
struct CacheState<K, V> {
    /// Map from key to value and recency position
    entries: HashMap<K, CacheEntry<V>>,

    /// Recency order (least recently used first)
    recency: BTreeMap<u64, K>,

    /// Next recency position to hand out
    next_tick: u64,

    /// Statistics
    stats: CacheStats,
}

impl<K, V> CacheState<K, V>
where
    K: Eq + Hash + Clone,
{
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            recency: BTreeMap::new(),
            next_tick: 0,
            stats: CacheStats {
                capacity,
                ..Default::default()
            },
        }
    }

    fn next_tick(&mut self) -> u64 {
        let tick = self.next_tick;
        self.next_tick += 1;
        tick
    }

    /// Move a key to the most recently used position
    fn touch(&mut self, key: &K) {
        let tick = self.next_tick;
        if let Some(entry) = self.entries.get_mut(key) {
            self.recency.remove(&entry.recency);
            entry.recency = tick;
            self.recency.insert(tick, key.clone());
            self.next_tick += 1;
        }
    }

    /// Insert at the most recently used position. The key must be absent.
    fn insert(&mut self, key: K, value: V) {
        let tick = self.next_tick();
        self.recency.insert(tick, key.clone());
        self.entries.insert(key, CacheEntry { value, recency: tick });
        self.stats.entry_count = self.entries.len();
    }

    fn remove(&mut self, key: &K) -> Option<V> {
        let entry = self.entries.remove(key)?;
        self.recency.remove(&entry.recency);
        self.stats.entry_count = self.entries.len();
        Some(entry.value)
    }

    /// Remove the least recently used entry
    fn pop_lru(&mut self) -> Option<(K, V)> {
        let (_, key) = self.recency.pop_first()?;
        let entry = self.entries.remove(&key)?;
        self.stats.entry_count = self.entries.len();
        Some((key, entry.value))
    }
}

/// Fixed-capacity key/value cache with LRU eviction
///
/// Thread-safe; the internal lock is never held while a release callback
/// runs, so callbacks may safely call back into the cache.
///
/// # Example
///
/// ```
/// use photomap_cache::BoundedCache;
///
/// let cache = BoundedCache::new(2);
/// cache.set("a", 1);
/// cache.set("b", 2);
///
/// // Touch "a" so that "b" becomes the eviction candidate
/// assert_eq!(cache.get(&"a"), Some(1));
/// cache.set("c", 3);
///
/// assert!(cache.has(&"a"));
/// assert!(!cache.has(&"b"));
/// assert!(cache.has(&"c"));
/// ```
pub struct BoundedCache<K, V> {
    capacity: usize,
    state: Mutex<CacheState<K, V>>,
    on_release: Option<ReleaseCallback<K, V>>,
}

impl<K, V> BoundedCache<K, V>
where
    K: Eq + Hash + Clone,
    V: Clone + PartialEq,
{
    /// Create a cache holding at most `capacity` entries.
    ///
    /// Removed values are simply dropped. A capacity of zero is raised to one.
    pub fn new(capacity: usize) -> Self {
        Self::build(capacity, None)
    }

    /// Create a cache that hands every removed value to `on_release`.
    pub fn with_release<F>(capacity: usize, on_release: F) -> Self
    where
        F: Fn(&K, V) + Send + Sync + 'static,
    {
        Self::build(capacity, Some(Arc::new(on_release)))
    }

    fn build(capacity: usize, on_release: Option<ReleaseCallback<K, V>>) -> Self {
        if capacity == 0 {
            log::warn!("bounded cache created with capacity 0; using 1");
        }
        let capacity = capacity.max(1);
        Self {
            capacity,
            state: Mutex::new(CacheState::new(capacity)),
            on_release,
        }
    }

    /// Retrieve a value and mark it most recently used
    pub fn get(&self, key: &K) -> Option<V> {
        let mut state = self.state.lock();

        let value = state.entries.get(key).map(|entry| entry.value.clone());
        match value {
            Some(value) => {
                state.touch(key);
                state.stats.hits += 1;
                Some(value)
            }
            None => {
                state.stats.misses += 1;
                None
            }
        }
    }

    /// Store a value at the most recently used position
    ///
    /// Replacing a key with a different value releases the old value.
    /// Re-inserting the value already stored under the key releases nothing.
    /// Inserting a new key into a full cache evicts and releases the least
    /// recently used entry first.
    pub fn set(&self, key: K, value: V) {
        let mut released = Vec::new();
        // Dropped after the lock is released
        let unchanged;

        {
            let mut state = self.state.lock();

            match state.remove(&key) {
                Some(previous) if previous == value => {
                    unchanged = Some(previous);
                }
                Some(previous) => {
                    unchanged = None;
                    released.push((key.clone(), previous));
                }
                None => {
                    unchanged = None;
                    if state.entries.len() >= self.capacity {
                        if let Some(evicted) = state.pop_lru() {
                            state.stats.evictions += 1;
                            released.push(evicted);
                        }
                    }
                }
            }

            state.insert(key, value);
            state.stats.releases += released.len() as u64;
        }

        drop(unchanged);
        self.release(released);
    }

    /// Return the value resident under `key`, or store `value` if there is none
    ///
    /// The lookup and the insert happen under one lock, so concurrent
    /// callers racing on the same key all end up with the same value. When a
    /// value is already resident, `value` is dropped without going through
    /// the release callback since it never entered the cache.
    pub fn get_or_set(&self, key: K, value: V) -> V {
        let mut released = Vec::new();

        let resident = {
            let mut state = self.state.lock();

            let existing = state.entries.get(&key).map(|entry| entry.value.clone());
            match existing {
                Some(existing) => {
                    state.touch(&key);
                    state.stats.hits += 1;
                    Some(existing)
                }
                None => {
                    state.stats.misses += 1;
                    if state.entries.len() >= self.capacity {
                        if let Some(evicted) = state.pop_lru() {
                            state.stats.evictions += 1;
                            released.push(evicted);
                        }
                    }
                    state.insert(key, value.clone());
                    state.stats.releases += released.len() as u64;
                    None
                }
            }
        };

        self.release(released);
        match resident {
            Some(existing) => {
                drop(value);
                existing
            }
            None => value,
        }
    }

    /// Check if a key is resident without updating recency
    pub fn has(&self, key: &K) -> bool {
        self.state.lock().entries.contains_key(key)
    }

    /// Remove and release the entry for `key`
    ///
    /// Returns `true` if an entry was removed.
    pub fn delete(&self, key: &K) -> bool {
        let removed = {
            let mut state = self.state.lock();
            let removed = state.remove(key);
            if removed.is_some() {
                state.stats.releases += 1;
            }
            removed
        };

        match removed {
            Some(value) => {
                self.release(vec![(key.clone(), value)]);
                true
            }
            None => false,
        }
    }

    /// Release every resident value and empty the cache
    pub fn clear(&self) {
        let released = {
            let mut state = self.state.lock();
            let mut released = Vec::with_capacity(state.entries.len());
            while let Some(entry) = state.pop_lru() {
                released.push(entry);
            }
            state.stats.releases += released.len() as u64;
            released
        };

        self.release(released);
    }

    /// Number of resident entries
    pub fn len(&self) -> usize {
        self.state.lock().entries.len()
    }

    /// Whether the cache holds no entries
    pub fn is_empty(&self) -> bool {
        self.state.lock().entries.is_empty()
    }

    /// Maximum number of resident entries
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Resident keys, least recently used first
    pub fn keys(&self) -> Vec<K> {
        self.state.lock().recency.values().cloned().collect()
    }

    /// Get current cache statistics
    pub fn stats(&self) -> CacheStats {
        self.state.lock().stats
    }

    /// Hand removed values to the release callback, containing panics.
    fn release(&self, removed: Vec<(K, V)>) {
        let Some(on_release) = &self.on_release else {
            return;
        };

        let mut failures = 0u64;
        for (key, value) in removed {
            if panic::catch_unwind(AssertUnwindSafe(|| on_release(&key, value))).is_err() {
                failures += 1;
            }
        }

        if failures > 0 {
            log::warn!("{} release callback(s) panicked; cache state is unaffected", failures);
            self.state.lock().stats.release_failures += failures;
        }
    }
}

impl<K, V> fmt::Debug for BoundedCache<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("BoundedCache")
            .field("capacity", &self.capacity)
            .field("len", &state.entries.len())
            .field("has_release_callback", &self.on_release.is_some())
            .finish()
    }
}
