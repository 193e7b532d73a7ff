//! Photomap Core Library
//!
//! Progressive, visibility-gated photo loading on top of the shared cache
//! tiers.
//!
//! # Architecture
//!
//! - [`ImagePipeline`] is the host-owned context: cache tiers, the
//!   lifecycle manager running the periodic sweep, the visibility gate and
//!   the host's [`ResourceResolver`].
//! - [`ProgressiveImageLoader`] drives one display item from skeleton to
//!   placeholder to the requested rendition.
//! - [`derive_keys`] is the single source of cache keys for both loading
//!   and invalidation.

pub mod descriptor;
pub mod keys;
pub mod pipeline;
pub mod progressive;
pub mod resolver;

pub use descriptor::{InlinePayload, PhotoDescriptor, ResourceId, INLINE_PREFIX};
pub use keys::{derive_keys, thumbnail_key, CacheKeys, LoadMode, THUMBNAIL_EXTENSION};
pub use pipeline::ImagePipeline;
pub use progressive::{Display, LoadOutcome, LoadState, ProgressiveImageLoader};
pub use resolver::{ResolveError, ResolveResult, ResourceResolver};
