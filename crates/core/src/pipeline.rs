//! Host context for the image pipeline
//!
//! Bundles the cache tiers, the lifecycle manager, the visibility gate and
//! the host's resolver. The host constructs one pipeline, calls
//! [`ImagePipeline::start`] at startup and [`ImagePipeline::shutdown`] at
//! scope exit, and creates one loader per display item in between.

use std::sync::Arc;

use photomap_cache::{
    CacheConfig, CacheStats, CacheTier, ConfigError, OccupancyStats, ResourceLifecycleManager,
    TierSet,
};
use photomap_scheduler::{
    ImmediateVisibility, ObserveOptions, Region, VisibilityGate, VisibilityProvider,
};

use crate::descriptor::ResourceId;
use crate::keys::{derive_keys, LoadMode};
use crate::progressive::ProgressiveImageLoader;
use crate::resolver::ResourceResolver;

/// Shared caches, sweep and gating for all display items
///
/// # Example
///
/// ```
/// use async_trait::async_trait;
/// use photomap_cache::CacheConfig;
/// use photomap_core::{ImagePipeline, LoadMode, ResourceId, ResourceResolver, ResolveResult};
/// use std::sync::Arc;
///
/// struct NoContent;
///
/// #[async_trait]
/// impl ResourceResolver for NoContent {
///     async fn resolve_main(&self, _id: &ResourceId, _mode: LoadMode) -> ResolveResult {
///         Ok(None)
///     }
///
///     async fn resolve_placeholder(&self, _id: &ResourceId) -> ResolveResult {
///         Ok(None)
///     }
/// }
///
/// let pipeline = ImagePipeline::headless(CacheConfig::default(), Arc::new(NoContent)).unwrap();
/// assert_eq!(pipeline.stats().total, 0);
/// pipeline.shutdown();
/// ```
pub struct ImagePipeline {
    config: CacheConfig,
    tiers: TierSet,
    lifecycle: ResourceLifecycleManager,
    gate: Arc<VisibilityGate>,
    resolver: Arc<dyn ResourceResolver>,
    options: ObserveOptions,
}

impl ImagePipeline {
    /// Build a pipeline from a validated configuration
    ///
    /// # Errors
    /// Returns [`ConfigError::InvalidValue`] if `config` fails validation.
    pub fn new(
        config: CacheConfig,
        resolver: Arc<dyn ResourceResolver>,
        provider: Arc<dyn VisibilityProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let tiers = TierSet::new(&config);
        let lifecycle = ResourceLifecycleManager::for_tiers(&tiers, &config);

        Ok(Self {
            config,
            tiers,
            lifecycle,
            gate: Arc::new(VisibilityGate::new(provider)),
            resolver,
            options: ObserveOptions::default(),
        })
    }

    /// Build a pipeline for hosts without visibility reporting
    pub fn headless(
        config: CacheConfig,
        resolver: Arc<dyn ResourceResolver>,
    ) -> Result<Self, ConfigError> {
        Self::new(config, resolver, Arc::new(ImmediateVisibility))
    }

    /// Visibility options handed to new loaders
    pub fn with_observe_options(mut self, options: ObserveOptions) -> Self {
        self.options = options;
        self
    }

    /// Start the periodic sweep
    ///
    /// Returns `false` if it was already running or no tokio runtime is
    /// available.
    pub fn start(&self) -> bool {
        let started = self.lifecycle.start_periodic_sweep();
        if started {
            log::info!(
                "image pipeline started ({} main / {} thumbnail / {} placeholder)",
                self.config.main_capacity,
                self.config.thumbnail_capacity,
                self.config.placeholder_capacity
            );
        }
        started
    }

    /// Stop the sweep and release every cached handle
    pub fn shutdown(&self) {
        self.lifecycle.stop_periodic_sweep();
        self.lifecycle.clear_all();
        log::info!("image pipeline shut down");
    }

    /// Create a loader for one display item
    pub fn loader(&self, region: Region, mode: LoadMode) -> ProgressiveImageLoader {
        ProgressiveImageLoader::new(
            self.tiers.clone(),
            self.gate.clone(),
            self.resolver.clone(),
            region,
            mode,
        )
        .with_options(self.options)
    }

    /// Drop every cached rendition of `id`, releasing their handles
    ///
    /// Use after the underlying content changed. Returns the number of
    /// entries removed.
    pub fn invalidate(&self, id: &ResourceId) -> usize {
        let mut removed = 0;
        if self.tiers.tier(CacheTier::Placeholder).delete(&id.as_str().to_string()) {
            removed += 1;
        }
        for mode in LoadMode::ALL {
            let keys = derive_keys(id, mode);
            if self.tiers.tier(keys.tier).delete(&keys.main) {
                removed += 1;
            }
        }

        if removed > 0 {
            log::debug!("invalidated {} cached entries for {}", removed, id);
        }
        removed
    }

    /// Occupancy snapshot across tiers
    pub fn stats(&self) -> OccupancyStats {
        self.lifecycle.stats()
    }

    /// Hit/miss/eviction counters per tier
    pub fn tier_stats(&self) -> Vec<(CacheTier, CacheStats)> {
        self.tiers.stats()
    }

    /// The cache tiers
    pub fn tiers(&self) -> &TierSet {
        &self.tiers
    }

    /// The lifecycle manager
    pub fn lifecycle(&self) -> &ResourceLifecycleManager {
        &self.lifecycle
    }

    /// The shared visibility gate
    pub fn gate(&self) -> &Arc<VisibilityGate> {
        &self.gate
    }

    /// The configuration the pipeline was built from
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("config", &self.config)
            .field("tiers", &self.tiers)
            .field("running", &self.lifecycle.is_running())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::ResolveResult;
    use async_trait::async_trait;
    use photomap_cache::ResourceHandle;

    struct NoContent;

    #[async_trait]
    impl ResourceResolver for NoContent {
        async fn resolve_main(&self, _id: &ResourceId, _mode: LoadMode) -> ResolveResult {
            Ok(None)
        }

        async fn resolve_placeholder(&self, _id: &ResourceId) -> ResolveResult {
            Ok(None)
        }
    }

    fn handle(url: &str) -> ResourceHandle {
        ResourceHandle::new(url, Arc::new(|_url: &str| {}))
    }

    #[test]
    fn test_rejects_invalid_config() {
        let config = CacheConfig::default().with_trim_fraction(0.0);
        assert!(ImagePipeline::headless(config, Arc::new(NoContent)).is_err());
    }

    #[test]
    fn test_invalidate_hits_every_rendition() {
        let pipeline = ImagePipeline::headless(CacheConfig::default(), Arc::new(NoContent)).unwrap();
        let tiers = pipeline.tiers();
        let full = handle("blob:full");
        let thumb = handle("blob:thumb");
        let tiny = handle("blob:tiny");

        tiers.tier(CacheTier::Main).set("a/b.jpg".to_string(), full.clone());
        tiers.tier(CacheTier::Thumbnail).set("a/b.webp".to_string(), thumb.clone());
        tiers.tier(CacheTier::Placeholder).set("a/b.jpg".to_string(), tiny.clone());
        tiers.tier(CacheTier::Main).set("a/c.jpg".to_string(), handle("blob:other"));

        assert_eq!(pipeline.invalidate(&ResourceId::new("a/b.jpg")), 3);
        assert!(full.is_released() && thumb.is_released() && tiny.is_released());
        assert_eq!(pipeline.stats().total, 1);
        assert_eq!(pipeline.invalidate(&ResourceId::new("a/b.jpg")), 0);
    }

    #[test]
    fn test_start_without_runtime() {
        let pipeline = ImagePipeline::headless(CacheConfig::default(), Arc::new(NoContent)).unwrap();
        assert!(!pipeline.start());
        assert!(!pipeline.lifecycle().is_running());
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let pipeline = ImagePipeline::headless(CacheConfig::default(), Arc::new(NoContent)).unwrap();
        let cached = handle("blob:1");
        pipeline.tiers().tier(CacheTier::Main).set("1.jpg".to_string(), cached.clone());

        assert!(pipeline.start());
        assert!(!pipeline.start());

        pipeline.shutdown();

        assert!(!pipeline.lifecycle().is_running());
        assert!(cached.is_released());
        assert_eq!(pipeline.stats().total, 0);
    }
}
