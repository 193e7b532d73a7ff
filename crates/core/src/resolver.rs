//! Resolver contract
//!
//! The host supplies the code that turns identifiers into resource handles
//! (fetching, decoding, allocating object URLs). The loader only calls it.

use async_trait::async_trait;
use photomap_cache::ResourceHandle;

use crate::descriptor::ResourceId;
use crate::keys::LoadMode;

/// Errors a resolver may report
///
/// The loader never propagates these; any failure leaves the item in its
/// skeleton or placeholder state.
#[derive(Debug, thiserror::Error)]
pub enum ResolveError {
    /// No content exists for the identifier
    #[error("resource not found: {0}")]
    NotFound(ResourceId),

    /// Fetching or decoding failed in the host's backend
    #[error("resolver backend failed: {0}")]
    Backend(String),
}

/// Result type for resolver calls
pub type ResolveResult = Result<Option<ResourceHandle>, ResolveError>;

/// Turns photo identifiers into resource handles
///
/// Both calls may return `Ok(None)` when the content is simply not
/// available. Handles returned here are handed to the cache tiers, which
/// own their release from then on.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    /// Resolve the rendition of `id` selected by `mode`
    async fn resolve_main(&self, id: &ResourceId, mode: LoadMode) -> ResolveResult;

    /// Resolve a tiny preview of `id`, shown blurred until the main
    /// rendition arrives
    async fn resolve_placeholder(&self, id: &ResourceId) -> ResolveResult;
}
