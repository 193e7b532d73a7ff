//! Cache tiers for decoded image handles
//!
//! Three independently capacitated caches hold handles by content class.
//! Capacities shrink as per-item size grows: few full-size images, more
//! thumbnails, many tiny placeholders.

use std::fmt;
use std::sync::Arc;

use crate::bounded::{BoundedCache, CacheStats};
use crate::config::CacheConfig;
use crate::handle::ResourceHandle;

/// One class of cached image content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CacheTier {
    /// Full-size images
    Main,

    /// Reduced-size renditions
    Thumbnail,

    /// Tiny blurred previews shown while the real image loads
    Placeholder,
}

impl CacheTier {
    /// All tiers, in registration order
    pub const ALL: [CacheTier; 3] = [CacheTier::Main, CacheTier::Thumbnail, CacheTier::Placeholder];

    /// Stable name used in stats snapshots and log lines
    pub fn name(self) -> &'static str {
        match self {
            CacheTier::Main => "main",
            CacheTier::Thumbnail => "thumbnail",
            CacheTier::Placeholder => "placeholder",
        }
    }

    /// Capacity configured for this tier
    pub fn capacity(self, config: &CacheConfig) -> usize {
        match self {
            CacheTier::Main => config.main_capacity,
            CacheTier::Thumbnail => config.thumbnail_capacity,
            CacheTier::Placeholder => config.placeholder_capacity,
        }
    }
}

impl fmt::Display for CacheTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Cache of image handles keyed by derived cache key
pub type HandleCache = BoundedCache<String, ResourceHandle>;

/// The three handle caches used by the image pipeline
///
/// Every tier releases the handle of an entry it evicts, deletes or clears,
/// so a handle never outlives its cache residency unless a loader still
/// holds a clone for display (in which case the handle is already marked
/// released and its URL is no longer exposed).
///
/// # Example
///
/// ```
/// use photomap_cache::{CacheConfig, CacheTier, ResourceHandle, TierSet};
/// use std::sync::Arc;
///
/// let tiers = TierSet::new(&CacheConfig::default());
/// let handle = ResourceHandle::new("blob:1", Arc::new(|_url: &str| {}));
///
/// tiers.tier(CacheTier::Main).set("photos/1.jpg".to_string(), handle.clone());
/// assert!(tiers.tier(CacheTier::Main).has(&"photos/1.jpg".to_string()));
///
/// tiers.tier(CacheTier::Main).clear();
/// assert!(handle.is_released());
/// ```
#[derive(Debug, Clone)]
pub struct TierSet {
    main: Arc<HandleCache>,
    thumbnail: Arc<HandleCache>,
    placeholder: Arc<HandleCache>,
}

impl TierSet {
    /// Build the tiers with the capacities from `config`
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            main: Arc::new(Self::handle_cache(CacheTier::Main, config)),
            thumbnail: Arc::new(Self::handle_cache(CacheTier::Thumbnail, config)),
            placeholder: Arc::new(Self::handle_cache(CacheTier::Placeholder, config)),
        }
    }

    fn handle_cache(tier: CacheTier, config: &CacheConfig) -> HandleCache {
        BoundedCache::with_release(tier.capacity(config), move |key: &String, handle: ResourceHandle| {
            if handle.release() {
                log::debug!("released {} handle for {}", tier, key);
            }
        })
    }

    /// The cache backing `tier`
    pub fn tier(&self, tier: CacheTier) -> &Arc<HandleCache> {
        match tier {
            CacheTier::Main => &self.main,
            CacheTier::Thumbnail => &self.thumbnail,
            CacheTier::Placeholder => &self.placeholder,
        }
    }

    /// Iterate over all tiers in registration order
    pub fn iter(&self) -> impl Iterator<Item = (CacheTier, &Arc<HandleCache>)> {
        CacheTier::ALL.into_iter().map(move |tier| (tier, self.tier(tier)))
    }

    /// Per-tier statistics
    pub fn stats(&self) -> Vec<(CacheTier, CacheStats)> {
        self.iter().map(|(tier, cache)| (tier, cache.stats())).collect()
    }
}
