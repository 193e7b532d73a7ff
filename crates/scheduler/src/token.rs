//! Generation tokens for discarding superseded async results
//!
//! Resolver calls cannot be cancelled once issued. Instead, every request is
//! tagged with the generation it was issued under; when the owner moves on
//! (new identifier, teardown) it advances the generation, and results that
//! arrive under an older token are dropped instead of applied.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Monotonic generation counter owned by one item
///
/// # Example
///
/// ```
/// use photomap_scheduler::GenerationCounter;
///
/// let counter = GenerationCounter::new();
/// let first = counter.advance();
/// assert!(first.is_current());
///
/// // A newer request supersedes the first one
/// let second = counter.advance();
/// assert!(!first.is_current());
/// assert!(second.is_current());
///
/// // Teardown invalidates everything in flight
/// counter.invalidate();
/// assert!(!second.is_current());
/// ```
#[derive(Debug, Clone, Default)]
pub struct GenerationCounter {
    current: Arc<AtomicU64>,
}

impl GenerationCounter {
    /// Create a counter at generation zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new generation and return its token
    ///
    /// All previously issued tokens become stale.
    pub fn advance(&self) -> RequestToken {
        let generation = self.current.fetch_add(1, Ordering::AcqRel) + 1;
        RequestToken {
            generation,
            current: self.current.clone(),
        }
    }

    /// Make every issued token stale without issuing a new one
    pub fn invalidate(&self) {
        self.current.fetch_add(1, Ordering::AcqRel);
    }

    /// The current generation number
    pub fn current(&self) -> u64 {
        self.current.load(Ordering::Acquire)
    }
}

/// Proof that a request was issued under a particular generation
#[derive(Debug, Clone)]
pub struct RequestToken {
    generation: u64,
    current: Arc<AtomicU64>,
}

impl RequestToken {
    /// Generation this token was issued under
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Whether no newer generation has started since this token was issued
    pub fn is_current(&self) -> bool {
        self.current.load(Ordering::Acquire) == self.generation
    }

    /// Whether results for this token must be discarded
    pub fn is_stale(&self) -> bool {
        !self.is_current()
    }
}
