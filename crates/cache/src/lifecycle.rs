//! Background hygiene across cache tiers
//!
//! The lifecycle manager aggregates occupancy over every registered tier and,
//! on a recurring timer, trims the largest tier when the total crosses a
//! global threshold. Trimming goes through [`BoundedCache::delete`], so the
//! release path runs for every removed entry.

use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::bounded::BoundedCache;
use crate::config::CacheConfig;
use crate::tier::TierSet;

/// A cache tier the lifecycle manager can inspect and trim
pub trait ManagedTier: Send + Sync {
    /// Number of resident entries
    fn resident(&self) -> usize;

    /// Delete up to `count` least recently used entries, returning how many
    /// were removed.
    fn trim_lru(&self, count: usize) -> usize;

    /// Release and remove every entry
    fn clear_tier(&self);
}

impl<K, V> ManagedTier for BoundedCache<K, V>
where
    K: Eq + Hash + Clone + Send + 'static,
    V: Clone + PartialEq + Send + 'static,
{
    fn resident(&self) -> usize {
        self.len()
    }

    fn trim_lru(&self, count: usize) -> usize {
        self.keys()
            .into_iter()
            .take(count)
            .filter(|key| self.delete(key))
            .count()
    }

    fn clear_tier(&self) {
        self.clear();
    }
}

/// When and how hard the periodic sweep trims
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SweepPolicy {
    /// Time between sweeps
    pub interval: Duration,
    /// Total resident entries above which a sweep trims
    pub threshold: usize,
    /// Fraction of the largest tier removed per trim
    pub trim_fraction: f64,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self::from(&CacheConfig::default())
    }
}

impl From<&CacheConfig> for SweepPolicy {
    fn from(config: &CacheConfig) -> Self {
        Self {
            interval: config.sweep_interval,
            threshold: config.sweep_threshold,
            trim_fraction: config.trim_fraction,
        }
    }
}

/// Occupancy snapshot across all managed tiers
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OccupancyStats {
    /// Resident entries per tier, in registration order
    pub tiers: Vec<(String, usize)>,
    /// Sum over all tiers
    pub total: usize,
}

impl OccupancyStats {
    /// Resident entries of the tier called `name`
    pub fn count(&self, name: &str) -> Option<usize> {
        self.tiers
            .iter()
            .find(|(tier, _)| tier == name)
            .map(|(_, count)| *count)
    }
}

/// Entries removed from one tier by a sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimAction {
    /// Tier that was trimmed
    pub tier: String,
    /// Number of entries deleted
    pub removed: usize,
}

/// Outcome of one sweep
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepReport {
    /// Occupancy observed before trimming
    pub occupancy: OccupancyStats,
    /// Trim performed, if the threshold was exceeded
    pub trimmed: Option<TrimAction>,
}

struct ManagedEntry {
    name: String,
    tier: Arc<dyn ManagedTier>,
}

struct ManagerInner {
    tiers: Vec<ManagedEntry>,
    policy: SweepPolicy,
}

impl ManagerInner {
    fn occupancy(&self) -> OccupancyStats {
        let tiers: Vec<(String, usize)> = self
            .tiers
            .iter()
            .map(|entry| (entry.name.clone(), entry.tier.resident()))
            .collect();
        let total = tiers.iter().map(|(_, count)| count).sum();
        OccupancyStats { tiers, total }
    }

    fn sweep(&self) -> SweepReport {
        let occupancy = self.occupancy();

        if occupancy.total <= self.policy.threshold {
            log::debug!(
                "cache sweep: {} entries resident, threshold {}",
                occupancy.total,
                self.policy.threshold
            );
            return SweepReport { occupancy, trimmed: None };
        }

        // Largest tier; ties go to the tier registered first
        let mut largest: Option<(&ManagedEntry, usize)> = None;
        for (entry, (_, count)) in self.tiers.iter().zip(&occupancy.tiers) {
            if largest.map_or(true, |(_, best)| *count > best) {
                largest = Some((entry, *count));
            }
        }

        let trimmed = largest.filter(|(_, count)| *count > 0).map(|(entry, count)| {
            let target = ((count as f64) * self.policy.trim_fraction).ceil() as usize;
            let removed = entry.tier.trim_lru(target.clamp(1, count));
            log::info!(
                "cache sweep: {} entries over threshold {}, trimmed {} from {} tier",
                occupancy.total,
                self.policy.threshold,
                removed,
                entry.name
            );
            TrimAction {
                tier: entry.name.clone(),
                removed,
            }
        });

        SweepReport { occupancy, trimmed }
    }
}

/// Periodic sweeper and occupancy reporter for a set of cache tiers
///
/// Starts in the stopped state. The host starts the sweep on startup and
/// stops it on shutdown; both calls are idempotent. Dropping the manager
/// stops a running sweep.
///
/// # Example
///
/// ```
/// use photomap_cache::{BoundedCache, ResourceLifecycleManager, SweepPolicy};
/// use std::sync::Arc;
///
/// let small: Arc<BoundedCache<u32, u32>> = Arc::new(BoundedCache::new(10));
/// let large: Arc<BoundedCache<u32, u32>> = Arc::new(BoundedCache::new(10));
/// for i in 0..2 {
///     small.set(i, i);
/// }
/// for i in 0..10 {
///     large.set(i, i);
/// }
///
/// let policy = SweepPolicy { threshold: 8, trim_fraction: 0.2, ..SweepPolicy::default() };
/// let manager = ResourceLifecycleManager::new(policy)
///     .with_tier("small", small.clone())
///     .with_tier("large", large.clone());
///
/// let report = manager.sweep_once();
/// assert_eq!(report.occupancy.total, 12);
/// assert_eq!(large.len(), 8);
/// assert_eq!(manager.stats().total, 10);
/// ```
pub struct ResourceLifecycleManager {
    inner: Arc<ManagerInner>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl ResourceLifecycleManager {
    /// Create a manager with no tiers
    pub fn new(policy: SweepPolicy) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                tiers: Vec::new(),
                policy,
            }),
            sweeper: Mutex::new(None),
        }
    }

    /// Manage the three image tiers with the sweep policy from `config`
    pub fn for_tiers(tiers: &TierSet, config: &CacheConfig) -> Self {
        tiers
            .iter()
            .fold(Self::new(SweepPolicy::from(config)), |manager, (tier, cache)| {
                manager.with_tier(tier.name(), cache.clone())
            })
    }

    /// Register a tier under `name`
    ///
    /// Tiers must be registered before the sweep starts; registering on a
    /// running manager restarts nothing and is logged as a mistake.
    pub fn with_tier(mut self, name: impl Into<String>, tier: Arc<dyn ManagedTier>) -> Self {
        let entry = ManagedEntry {
            name: name.into(),
            tier,
        };
        match Arc::get_mut(&mut self.inner) {
            Some(inner) => inner.tiers.push(entry),
            None => log::warn!("tier {} registered while the sweep is running; ignored", entry.name),
        }
        self
    }

    /// The active sweep policy
    pub fn policy(&self) -> SweepPolicy {
        self.inner.policy
    }

    /// Start the recurring sweep on the current tokio runtime.
    ///
    /// Returns `true` if the sweep was started, `false` if it was already
    /// running or no runtime is available.
    pub fn start_periodic_sweep(&self) -> bool {
        let mut sweeper = self.sweeper.lock();
        if sweeper.as_ref().is_some_and(|task| !task.is_finished()) {
            return false;
        }

        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(_) => {
                log::warn!("cannot start cache sweep: no tokio runtime");
                return false;
            }
        };

        let inner = self.inner.clone();
        let period = inner.policy.interval;
        *sweeper = Some(runtime.spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                inner.sweep();
            }
        }));

        log::info!("cache sweep started (every {:?})", period);
        true
    }

    /// Stop the recurring sweep.
    ///
    /// Returns `true` if a running sweep was stopped.
    pub fn stop_periodic_sweep(&self) -> bool {
        match self.sweeper.lock().take() {
            Some(task) => {
                task.abort();
                log::info!("cache sweep stopped");
                true
            }
            None => false,
        }
    }

    /// Whether the recurring sweep is active
    pub fn is_running(&self) -> bool {
        self.sweeper
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Run one sweep now, independent of the timer
    pub fn sweep_once(&self) -> SweepReport {
        self.inner.sweep()
    }

    /// Snapshot of resident entries per tier and in total
    pub fn stats(&self) -> OccupancyStats {
        self.inner.occupancy()
    }

    /// Clear every managed tier, releasing all resident entries
    pub fn clear_all(&self) {
        for entry in &self.inner.tiers {
            entry.tier.clear_tier();
        }
        log::info!("cleared {} cache tiers", self.inner.tiers.len());
    }
}

impl Drop for ResourceLifecycleManager {
    fn drop(&mut self) {
        if let Some(task) = self.sweeper.get_mut().take() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for ResourceLifecycleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self.inner.tiers.iter().map(|entry| entry.name.as_str()).collect();
        f.debug_struct("ResourceLifecycleManager")
            .field("tiers", &names)
            .field("policy", &self.inner.policy)
            .field("running", &self.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    type TestTier = Arc<BoundedCache<u32, u32>>;

    fn counting_tier(capacity: usize, fill: u32) -> (TestTier, Arc<AtomicUsize>) {
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        let tier = Arc::new(BoundedCache::with_release(capacity, move |_key: &u32, _value: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        for i in 0..fill {
            tier.set(i, i);
        }
        (tier, released)
    }

    fn policy(threshold: usize) -> SweepPolicy {
        SweepPolicy {
            interval: Duration::from_secs(300),
            threshold,
            trim_fraction: 0.2,
        }
    }

    #[test]
    fn test_stats_snapshot() {
        let (a, _) = counting_tier(10, 3);
        let (b, _) = counting_tier(10, 5);
        let manager = ResourceLifecycleManager::new(policy(100))
            .with_tier("a", a)
            .with_tier("b", b);

        let stats = manager.stats();
        assert_eq!(stats.count("a"), Some(3));
        assert_eq!(stats.count("b"), Some(5));
        assert_eq!(stats.count("c"), None);
        assert_eq!(stats.total, 8);
    }

    #[test]
    fn test_sweep_under_threshold_does_nothing() {
        let (a, released) = counting_tier(10, 10);
        let manager = ResourceLifecycleManager::new(policy(10)).with_tier("a", a.clone());

        let report = manager.sweep_once();

        assert!(report.trimmed.is_none());
        assert_eq!(a.len(), 10);
        assert_eq!(released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sweep_trims_largest_tier_lru_first() {
        let (small, small_released) = counting_tier(50, 5);
        let (large, large_released) = counting_tier(50, 20);
        // Promote the two oldest keys so they survive the trim
        large.get(&0);
        large.get(&1);

        let manager = ResourceLifecycleManager::new(policy(10))
            .with_tier("small", small.clone())
            .with_tier("large", large.clone());

        let report = manager.sweep_once();

        assert_eq!(
            report.trimmed,
            Some(TrimAction {
                tier: "large".to_string(),
                removed: 4
            })
        );
        assert_eq!(large.len(), 16);
        assert!(large.has(&0));
        assert!(large.has(&1));
        for key in 2..6 {
            assert!(!large.has(&key));
        }
        assert_eq!(large_released.load(Ordering::SeqCst), 4);
        assert_eq!(small.len(), 5);
        assert_eq!(small_released.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_sweep_removes_at_least_one_entry() {
        let (a, _) = counting_tier(10, 2);
        let (b, _) = counting_tier(10, 2);
        let manager = ResourceLifecycleManager::new(policy(3))
            .with_tier("a", a.clone())
            .with_tier("b", b.clone());

        let report = manager.sweep_once();

        // Equal sizes: the first registered tier is trimmed
        assert_eq!(report.trimmed.map(|t| (t.tier, t.removed)), Some(("a".to_string(), 1)));
        assert_eq!(a.len(), 1);
        assert_eq!(b.len(), 2);
    }

    #[test]
    fn test_clear_all_releases_everything() {
        let (a, a_released) = counting_tier(10, 4);
        let (b, b_released) = counting_tier(10, 6);
        let manager = ResourceLifecycleManager::new(policy(100))
            .with_tier("a", a.clone())
            .with_tier("b", b.clone());

        manager.clear_all();

        assert_eq!(manager.stats().total, 0);
        assert_eq!(a_released.load(Ordering::SeqCst), 4);
        assert_eq!(b_released.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn test_for_tiers_registers_image_tiers() {
        let config = CacheConfig::default();
        let tiers = TierSet::new(&config);
        let manager = ResourceLifecycleManager::for_tiers(&tiers, &config);

        let names: Vec<String> = manager.stats().tiers.into_iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["main", "thumbnail", "placeholder"]);
        assert_eq!(manager.policy(), SweepPolicy::from(&config));
    }

    #[test]
    fn test_start_without_runtime_is_refused() {
        let manager = ResourceLifecycleManager::new(policy(10));

        assert!(!manager.start_periodic_sweep());
        assert!(!manager.is_running());
        assert!(!manager.stop_periodic_sweep());
    }

    #[tokio::test]
    async fn test_start_and_stop_are_idempotent() {
        let manager = ResourceLifecycleManager::new(policy(10));

        assert!(!manager.stop_periodic_sweep());
        assert!(manager.start_periodic_sweep());
        assert!(!manager.start_periodic_sweep());
        assert!(manager.is_running());

        assert!(manager.stop_periodic_sweep());
        assert!(!manager.stop_periodic_sweep());
        assert!(!manager.is_running());

        // Can be restarted after stopping
        assert!(manager.start_periodic_sweep());
        assert!(manager.stop_periodic_sweep());
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_sweep_trims_on_tick() {
        let (a, released) = counting_tier(50, 20);
        let manager = ResourceLifecycleManager::new(policy(10)).with_tier("a", a.clone());

        assert!(manager.start_periodic_sweep());

        // Nothing happens before the first interval elapses
        time::sleep(Duration::from_secs(299)).await;
        assert_eq!(a.len(), 20);

        time::sleep(Duration::from_secs(2)).await;
        assert_eq!(a.len(), 16);
        assert_eq!(released.load(Ordering::SeqCst), 4);

        time::sleep(Duration::from_secs(300)).await;
        // 16 entries, ceil(3.2) = 4 removed
        assert_eq!(a.len(), 12);

        manager.stop_periodic_sweep();
        time::sleep(Duration::from_secs(600)).await;
        assert_eq!(a.len(), 12);
    }
}
