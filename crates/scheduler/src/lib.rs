//! Photomap Scheduler Library
//!
//! Decides *when* image loading work runs and whether its results still
//! matter.
//!
//! - [`VisibilityGate`] defers work until a display region is about to be
//!   shown, firing a one-shot callback per region.
//! - [`GenerationCounter`] tags each request with a generation so results
//!   that arrive after the item moved on are discarded.
//!
//! # Example
//!
//! ```
//! use photomap_scheduler::{GenerationCounter, ObserveOptions, Rect, Region, VisibilityGate};
//!
//! let gate = VisibilityGate::immediate();
//! let generations = GenerationCounter::new();
//!
//! let region = Region::new(Rect::new(0.0, 0.0, 320.0, 240.0));
//! let token = generations.advance();
//! gate.observe(&region, ObserveOptions::default(), move || {
//!     // Start resolving here; check token.is_current() before applying results
//!     assert!(token.is_current());
//! });
//! ```

mod token;
mod visibility;

// Re-export public API
pub use token::{GenerationCounter, RequestToken};
pub use visibility::{
    ImmediateVisibility, ObserveOptions, Rect, Region, RegionId, ViewportVisibility,
    VisibilityError, VisibilityGate, VisibilityProvider, VisibleNotifier,
};
