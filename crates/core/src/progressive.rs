//! Progressive image loading
//!
//! Implements a staged loading strategy per display item:
//! 1. Wait until the item's region is about to become visible
//! 2. Show a cached rendition immediately if one is resident
//! 3. Otherwise resolve a blurred placeholder and the requested rendition
//!    concurrently; the placeholder shows until the rendition arrives and is
//!    abandoned once it has
//!
//! Every load runs under a fresh generation token. Loading another photo or
//! tearing the item down advances the generation, so results that arrive
//! late are discarded instead of overwriting newer display state.

use std::fmt;
use std::sync::Arc;

use futures::future::{self, Either};
use parking_lot::Mutex;
use photomap_cache::{CacheTier, ResourceHandle, TierSet};
use photomap_scheduler::{GenerationCounter, ObserveOptions, Region, RequestToken, VisibilityGate};
use tokio::sync::oneshot;

use crate::descriptor::{InlinePayload, PhotoDescriptor, ResourceId};
use crate::keys::{derive_keys, LoadMode};
use crate::resolver::ResourceResolver;

/// Loader state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadState {
    /// Nothing requested yet
    Idle,

    /// Waiting for the region to become visible
    Gated,

    /// Showing inline content
    InlineDisplay,

    /// Resolver calls in flight
    Resolving,

    /// The requested rendition is displayed (final state)
    Ready,

    /// Resolution finished without a rendition; the skeleton or
    /// placeholder stays up
    Unavailable,

    /// The item was torn down
    TornDown,
}

/// What the item currently shows
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Display {
    /// Empty skeleton box
    #[default]
    Skeleton,

    /// Placeholder, rendered blurred
    Placeholder(ResourceHandle),

    /// The requested rendition
    Main(ResourceHandle),

    /// Inline content
    Inline(InlinePayload),
}

impl Display {
    /// Handle backing the current display, if any
    pub fn handle(&self) -> Option<&ResourceHandle> {
        match self {
            Display::Placeholder(handle) | Display::Main(handle) => Some(handle),
            Display::Skeleton | Display::Inline(_) => None,
        }
    }

    /// Whether the host should render this behind a blur
    pub fn is_blurred(&self) -> bool {
        matches!(self, Display::Placeholder(_))
    }
}

/// How a call to [`ProgressiveImageLoader::load`] ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Inline content displayed without touching caches or resolvers
    Inline,

    /// Requested rendition displayed
    Ready {
        /// Served from a cache tier without calling the main resolver
        from_cache: bool,
    },

    /// No rendition available; skeleton or placeholder remains
    Unavailable,

    /// A newer load replaced this one before it finished
    Superseded,

    /// The loader was torn down before this load finished
    Cancelled,
}

struct LoaderState {
    state: LoadState,
    display: Display,
    descriptor: Option<PhotoDescriptor>,
}

/// Per-item progressive loader
///
/// Loaders are cheap; create one per display item via
/// [`ImagePipeline::loader`](crate::ImagePipeline::loader). A loader is
/// usually shared behind an `Arc` so the host can call
/// [`teardown`](Self::teardown) while a load is awaiting.
pub struct ProgressiveImageLoader {
    tiers: TierSet,
    gate: Arc<VisibilityGate>,
    resolver: Arc<dyn ResourceResolver>,
    region: Region,
    mode: LoadMode,
    options: ObserveOptions,
    generations: GenerationCounter,
    state: Mutex<LoaderState>,
}

impl ProgressiveImageLoader {
    /// Create a loader for `region`
    pub fn new(
        tiers: TierSet,
        gate: Arc<VisibilityGate>,
        resolver: Arc<dyn ResourceResolver>,
        region: Region,
        mode: LoadMode,
    ) -> Self {
        Self {
            tiers,
            gate,
            resolver,
            region,
            mode,
            options: ObserveOptions::default(),
            generations: GenerationCounter::new(),
            state: Mutex::new(LoaderState {
                state: LoadState::Idle,
                display: Display::Skeleton,
                descriptor: None,
            }),
        }
    }

    /// Use custom visibility options
    pub fn with_options(mut self, options: ObserveOptions) -> Self {
        self.options = options;
        self
    }

    /// Load and display `descriptor`
    ///
    /// Supersedes any load still in flight on this loader. Switching to a
    /// different photo resets the display to the skeleton; the handle it
    /// showed stays owned by its cache tier.
    pub async fn load(&self, descriptor: PhotoDescriptor) -> LoadOutcome {
        let token = self.generations.advance();

        // Gate calls and descriptor writes only happen under the state lock
        // while this call's token is current
        let reset = {
            let mut state = self.state.lock();
            if token.is_stale() {
                None
            } else {
                self.gate.cancel(self.region.id);
                let changed = state.descriptor.as_ref() != Some(&descriptor);
                state.descriptor = Some(descriptor.clone());
                state.state = LoadState::Idle;
                Some(changed.then(|| std::mem::take(&mut state.display)))
            }
        };
        let Some(previous) = reset else {
            return self.interrupted();
        };
        drop(previous);

        let id = match descriptor {
            PhotoDescriptor::Inline(payload) => {
                return self.finish(
                    &token,
                    LoadState::InlineDisplay,
                    Some(Display::Inline(payload)),
                    LoadOutcome::Inline,
                );
            }
            PhotoDescriptor::Identifier(id) => id,
        };

        let (visible_tx, visible_rx) = oneshot::channel();
        let gated = {
            let mut state = self.state.lock();
            let current = token.is_current();
            if current {
                state.state = LoadState::Gated;
                // The callback only signals the channel, so firing it here
                // under the lock is fine
                self.gate.observe(&self.region, self.options, move || {
                    let _ = visible_tx.send(());
                });
            }
            current
        };
        if !gated {
            return self.interrupted();
        }
        // The sender is dropped unfired when the registration is cancelled
        if visible_rx.await.is_err() || token.is_stale() {
            return self.interrupted();
        }

        self.resolve(&token, &id).await
    }

    async fn resolve(&self, token: &RequestToken, id: &ResourceId) -> LoadOutcome {
        let keys = derive_keys(id, self.mode);
        let rendition = self.tiers.tier(keys.tier);

        if let Some(handle) = rendition.get(&keys.main) {
            log::debug!("{} tier hit for {}, skipping resolvers", keys.tier, keys.main);
            return self.finish(
                token,
                LoadState::Ready,
                Some(Display::Main(handle)),
                LoadOutcome::Ready { from_cache: true },
            );
        }

        if !self.apply(token, LoadState::Resolving, None) {
            return self.interrupted();
        }

        // The placeholder is polled first so a ready one still shows, but it
        // never holds main back; once main resolves it is abandoned
        let placeholder = self.load_placeholder(token, id, &keys.placeholder);
        let main = self.resolver.resolve_main(id, self.mode);
        futures::pin_mut!(placeholder);
        let main = match future::select(placeholder, main).await {
            Either::Left(((), main)) => main.await,
            Either::Right((main, _abandoned)) => main,
        };

        match main {
            Ok(Some(resolved)) => {
                if token.is_stale() {
                    log::debug!("discarding stale {} result for {}", keys.tier, id);
                    return self.interrupted();
                }
                // Another loader may have cached this key meanwhile; keep its
                // handle and let ours release on drop
                let handle = rendition.get_or_set(keys.main, resolved);
                self.finish(
                    token,
                    LoadState::Ready,
                    Some(Display::Main(handle)),
                    LoadOutcome::Ready { from_cache: false },
                )
            }
            Ok(None) => self.finish(token, LoadState::Unavailable, None, LoadOutcome::Unavailable),
            Err(err) => {
                log::warn!("resolving {} failed: {}", id, err);
                self.finish(token, LoadState::Unavailable, None, LoadOutcome::Unavailable)
            }
        }
    }

    async fn load_placeholder(&self, token: &RequestToken, id: &ResourceId, key: &str) {
        let placeholders = self.tiers.tier(CacheTier::Placeholder);
        let key = key.to_string();

        let handle = match placeholders.get(&key) {
            Some(handle) => handle,
            None => match self.resolver.resolve_placeholder(id).await {
                Ok(Some(handle)) => {
                    if token.is_stale() {
                        log::debug!("discarding stale placeholder for {}", id);
                        return;
                    }
                    placeholders.get_or_set(key, handle)
                }
                Ok(None) => return,
                Err(err) => {
                    log::warn!("placeholder for {} failed: {}", id, err);
                    return;
                }
            },
        };

        let replaced = {
            let mut state = self.state.lock();
            let main_shown = matches!(state.display, Display::Main(_));
            if token.is_stale() || state.state != LoadState::Resolving || main_shown {
                return;
            }
            std::mem::replace(&mut state.display, Display::Placeholder(handle))
        };
        drop(replaced);
    }

    /// Move to `next` (and show `display`) if `token` is still current
    fn apply(&self, token: &RequestToken, next: LoadState, display: Option<Display>) -> bool {
        let replaced = {
            let mut state = self.state.lock();
            if token.is_stale() {
                return false;
            }
            state.state = next;
            display.map(|display| std::mem::replace(&mut state.display, display))
        };
        // Dropping a handle may run its releaser; keep that outside the lock
        drop(replaced);
        true
    }

    fn finish(
        &self,
        token: &RequestToken,
        next: LoadState,
        display: Option<Display>,
        outcome: LoadOutcome,
    ) -> LoadOutcome {
        if self.apply(token, next, display) {
            outcome
        } else {
            self.interrupted()
        }
    }

    fn interrupted(&self) -> LoadOutcome {
        if self.state() == LoadState::TornDown {
            LoadOutcome::Cancelled
        } else {
            LoadOutcome::Superseded
        }
    }

    /// Stop the item: pending visibility registrations are cancelled and
    /// in-flight results will be discarded
    pub fn teardown(&self) {
        // Invalidate before locking so a concurrent apply cannot win
        self.generations.invalidate();

        let previous = {
            let mut state = self.state.lock();
            self.gate.cancel(self.region.id);
            state.state = LoadState::TornDown;
            std::mem::take(&mut state.display)
        };
        drop(previous);
    }

    /// Current state
    pub fn state(&self) -> LoadState {
        self.state.lock().state
    }

    /// Current display
    pub fn display(&self) -> Display {
        self.state.lock().display.clone()
    }

    /// Descriptor of the most recent load
    pub fn descriptor(&self) -> Option<PhotoDescriptor> {
        self.state.lock().descriptor.clone()
    }

    /// Identifier of the most recent load, if it was not inline content
    pub fn identifier(&self) -> Option<ResourceId> {
        self.state
            .lock()
            .descriptor
            .as_ref()
            .and_then(|descriptor| descriptor.identifier().cloned())
    }

    /// Region this loader is gated on
    pub fn region(&self) -> &Region {
        &self.region
    }

    /// Rendition this loader requests
    pub fn mode(&self) -> LoadMode {
        self.mode
    }
}

impl Drop for ProgressiveImageLoader {
    fn drop(&mut self) {
        self.generations.invalidate();
        self.gate.cancel(self.region.id);
    }
}

impl fmt::Debug for ProgressiveImageLoader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ProgressiveImageLoader")
            .field("region", &self.region.id)
            .field("mode", &self.mode)
            .field("state", &state.state)
            .field("display", &state.display)
            .finish()
    }
}
