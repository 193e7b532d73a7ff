//! Photomap Cache Library
//!
//! Bounded image-handle caches with LRU eviction, exactly-once release of
//! resource handles, and a background sweep that keeps total occupancy in check.

pub mod bounded;
pub mod config;
pub mod handle;
pub mod lifecycle;
pub mod tier;

pub use bounded::{BoundedCache, CacheStats, ReleaseCallback};
pub use config::{CacheConfig, ConfigError};
pub use handle::{Releaser, ResourceHandle};
pub use lifecycle::{
    ManagedTier, OccupancyStats, ResourceLifecycleManager, SweepPolicy, SweepReport, TrimAction,
};
pub use tier::{CacheTier, HandleCache, TierSet};
