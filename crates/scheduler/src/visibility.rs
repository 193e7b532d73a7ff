//! Visibility gating for display regions
//!
//! Loading work for an item is deferred until its region is about to be
//! shown. A [`VisibilityGate`] registers a one-shot callback per region with
//! a [`VisibilityProvider`]; the callback fires at most once, when the region
//! (checked against the viewport grown by a preload margin) becomes visible
//! enough. Providers that cannot report visibility make the gate fire
//! immediately.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

static NEXT_REGION_ID: AtomicU64 = AtomicU64::new(1);

/// Identifier of a display region
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionId(u64);

impl RegionId {
    /// Allocate a process-unique region id
    pub fn next() -> Self {
        Self(NEXT_REGION_ID.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw id value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for RegionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region#{}", self.0)
    }
}

/// Axis-aligned rectangle in host layout coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    /// Left edge
    pub x: f32,

    /// Top edge
    pub y: f32,

    /// Width (non-negative)
    pub width: f32,

    /// Height (non-negative)
    pub height: f32,
}

impl Rect {
    /// Create a new rectangle
    pub fn new(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            x,
            y,
            width: width.max(0.0),
            height: height.max(0.0),
        }
    }

    /// Area of the rectangle
    pub fn area(&self) -> f32 {
        self.width * self.height
    }

    /// Grow the rectangle by `margin` on every side
    pub fn expand(&self, margin: f32) -> Rect {
        Rect::new(
            self.x - margin,
            self.y - margin,
            self.width + 2.0 * margin,
            self.height + 2.0 * margin,
        )
    }

    /// Whether the point lies inside or on the edge of the rectangle
    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x && x <= self.x + self.width && y >= self.y && y <= self.y + self.height
    }

    /// Area shared with `other`
    pub fn intersection_area(&self, other: &Rect) -> f32 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = (self.x + self.width).min(other.x + other.width);
        let bottom = (self.y + self.height).min(other.y + other.height);

        if right <= left || bottom <= top {
            0.0
        } else {
            (right - left) * (bottom - top)
        }
    }

    /// Fraction of `self` (0.0 to 1.0) covered by `viewport`
    ///
    /// A degenerate (zero-area) rectangle counts as fully visible when its
    /// origin lies within the viewport.
    pub fn visible_fraction(&self, viewport: &Rect) -> f32 {
        let area = self.area();
        if area <= 0.0 {
            return if viewport.contains_point(self.x, self.y) { 1.0 } else { 0.0 };
        }
        (self.intersection_area(viewport) / area).clamp(0.0, 1.0)
    }
}

/// A display region whose visibility gates loading work
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Region {
    /// Stable id used for cancellation
    pub id: RegionId,

    /// Position and size in host layout coordinates
    pub bounds: Rect,
}

impl Region {
    /// Create a region with a fresh id
    pub fn new(bounds: Rect) -> Self {
        Self {
            id: RegionId::next(),
            bounds,
        }
    }
}

/// Tuning for when a region counts as visible
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ObserveOptions {
    /// Distance by which the viewport is grown so loading starts early
    pub preload_margin: f32,

    /// Visible fraction of the region (0.0 to 1.0) that must be exceeded
    /// to fire. A fully visible region always fires.
    pub visibility_threshold: f32,
}

impl Default for ObserveOptions {
    fn default() -> Self {
        Self {
            preload_margin: 50.0,
            visibility_threshold: 0.1,
        }
    }
}

impl ObserveOptions {
    /// Set the preload margin
    pub fn with_preload_margin(mut self, margin: f32) -> Self {
        self.preload_margin = margin.max(0.0);
        self
    }

    /// Set the visibility threshold (0.0 to 1.0)
    pub fn with_visibility_threshold(mut self, threshold: f32) -> Self {
        self.visibility_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    /// Whether `bounds` counts as visible in `viewport` under these options
    ///
    /// The visible fraction must exceed the threshold; reaching it is not
    /// enough.
    pub fn is_visible(&self, bounds: &Rect, viewport: &Rect) -> bool {
        let fraction = bounds.visible_fraction(&viewport.expand(self.preload_margin));
        fraction > 0.0 && (fraction > self.visibility_threshold || fraction >= 1.0)
    }
}

/// Errors reported by a visibility provider
#[derive(Debug, thiserror::Error)]
pub enum VisibilityError {
    /// The platform cannot report visibility for this region
    #[error("visibility reporting is not available")]
    Unsupported,
}

type VisibleCallback = Box<dyn FnOnce() + Send>;

/// One-shot callback shared between a gate and its provider
///
/// Whoever fires or disarms it first wins; the callback runs at most once.
#[derive(Clone)]
pub struct VisibleNotifier {
    callback: Arc<Mutex<Option<VisibleCallback>>>,
}

impl VisibleNotifier {
    /// Wrap a callback
    pub fn new<F>(on_visible: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        Self {
            callback: Arc::new(Mutex::new(Some(Box::new(on_visible)))),
        }
    }

    /// Run the callback if it has not run or been disarmed yet
    ///
    /// Returns `true` if this call ran it.
    pub fn fire(&self) -> bool {
        // Taken under the lock, invoked outside it
        let callback = self.callback.lock().take();
        match callback {
            Some(callback) => {
                callback();
                true
            }
            None => false,
        }
    }

    /// Drop the callback without running it
    ///
    /// Returns `true` if it was still armed.
    pub fn disarm(&self) -> bool {
        self.callback.lock().take().is_some()
    }

    /// Whether the callback can still fire
    pub fn is_armed(&self) -> bool {
        self.callback.lock().is_some()
    }
}

impl fmt::Debug for VisibleNotifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibleNotifier")
            .field("armed", &self.is_armed())
            .finish()
    }
}

/// Platform hook that reports when regions become visible
pub trait VisibilityProvider: Send + Sync {
    /// Fire `notifier` once `region` becomes visible under `options`.
    ///
    /// # Errors
    /// [`VisibilityError::Unsupported`] if visibility cannot be reported; the
    /// gate then treats the region as visible immediately.
    fn observe(
        &self,
        region: &Region,
        options: ObserveOptions,
        notifier: VisibleNotifier,
    ) -> Result<(), VisibilityError>;

    /// Forget a region that has not become visible yet
    fn cancel(&self, region: RegionId);
}

/// Provider for headless hosts: every region is visible immediately
#[derive(Debug, Clone, Copy, Default)]
pub struct ImmediateVisibility;

impl VisibilityProvider for ImmediateVisibility {
    fn observe(
        &self,
        _region: &Region,
        _options: ObserveOptions,
        notifier: VisibleNotifier,
    ) -> Result<(), VisibilityError> {
        notifier.fire();
        Ok(())
    }

    fn cancel(&self, _region: RegionId) {}
}

struct PendingRegion {
    bounds: Rect,
    options: ObserveOptions,
    notifier: VisibleNotifier,
}

#[derive(Default)]
struct ViewportState {
    viewport: Option<Rect>,
    pending: HashMap<RegionId, PendingRegion>,
}

impl ViewportState {
    /// Remove and return the notifiers of every region now visible
    fn take_visible(&mut self) -> Vec<VisibleNotifier> {
        let Some(viewport) = self.viewport else {
            return Vec::new();
        };

        let visible: Vec<RegionId> = self
            .pending
            .iter()
            .filter(|(_, pending)| pending.options.is_visible(&pending.bounds, &viewport))
            .map(|(id, _)| *id)
            .collect();

        visible
            .into_iter()
            .filter_map(|id| self.pending.remove(&id))
            .map(|pending| pending.notifier)
            .collect()
    }
}

/// Host-driven provider: the host reports the viewport as it scrolls
///
/// Regions are evaluated when they are observed, when the viewport changes
/// and when a region moves. Until the first viewport is reported nothing
/// fires.
///
/// # Example
///
/// ```
/// use photomap_scheduler::{ObserveOptions, Rect, Region, ViewportVisibility, VisibilityGate};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let provider = Arc::new(ViewportVisibility::new());
/// let gate = VisibilityGate::new(provider.clone());
///
/// let visible = Arc::new(AtomicBool::new(false));
/// let flag = visible.clone();
/// let region = Region::new(Rect::new(0.0, 2000.0, 100.0, 100.0));
/// gate.observe(&region, ObserveOptions::default(), move || flag.store(true, Ordering::SeqCst));
///
/// provider.set_viewport(Rect::new(0.0, 0.0, 800.0, 600.0));
/// assert!(!visible.load(Ordering::SeqCst));
///
/// provider.set_viewport(Rect::new(0.0, 1500.0, 800.0, 600.0));
/// assert!(visible.load(Ordering::SeqCst));
/// ```
#[derive(Default)]
pub struct ViewportVisibility {
    state: Mutex<ViewportState>,
}

impl ViewportVisibility {
    /// Create a provider with no viewport reported yet
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a provider with an initial viewport
    pub fn with_viewport(viewport: Rect) -> Self {
        let provider = Self::new();
        provider.state.lock().viewport = Some(viewport);
        provider
    }

    /// Report a new viewport; fires regions that became visible
    ///
    /// Returns the number of regions fired.
    pub fn set_viewport(&self, viewport: Rect) -> usize {
        let fired = {
            let mut state = self.state.lock();
            state.viewport = Some(viewport);
            state.take_visible()
        };
        Self::fire_all(fired)
    }

    /// Report that a pending region moved; fires it if now visible
    ///
    /// Returns `false` if the region is not pending.
    pub fn move_region(&self, region: RegionId, bounds: Rect) -> bool {
        let fired = {
            let mut state = self.state.lock();
            match state.pending.get_mut(&region) {
                Some(pending) => pending.bounds = bounds,
                None => return false,
            }
            state.take_visible()
        };
        Self::fire_all(fired);
        true
    }

    /// Number of regions waiting to become visible
    pub fn pending(&self) -> usize {
        self.state.lock().pending.len()
    }

    fn fire_all(notifiers: Vec<VisibleNotifier>) -> usize {
        notifiers.into_iter().filter(|notifier| notifier.fire()).count()
    }
}

impl VisibilityProvider for ViewportVisibility {
    fn observe(
        &self,
        region: &Region,
        options: ObserveOptions,
        notifier: VisibleNotifier,
    ) -> Result<(), VisibilityError> {
        let fired = {
            let mut state = self.state.lock();
            state.pending.insert(
                region.id,
                PendingRegion {
                    bounds: region.bounds,
                    options,
                    notifier,
                },
            );
            state.take_visible()
        };
        Self::fire_all(fired);
        Ok(())
    }

    fn cancel(&self, region: RegionId) {
        self.state.lock().pending.remove(&region);
    }
}

impl fmt::Debug for ViewportVisibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ViewportVisibility")
            .field("viewport", &state.viewport)
            .field("pending", &state.pending.len())
            .finish()
    }
}

/// One-shot "became visible" registrations for display regions
///
/// # Example
///
/// ```
/// use photomap_scheduler::{ObserveOptions, Rect, Region, VisibilityGate};
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let gate = VisibilityGate::immediate();
/// let fired = Arc::new(AtomicUsize::new(0));
/// let counter = fired.clone();
///
/// let region = Region::new(Rect::new(0.0, 0.0, 120.0, 80.0));
/// gate.observe(&region, ObserveOptions::default(), move || {
///     counter.fetch_add(1, Ordering::SeqCst);
/// });
/// assert_eq!(fired.load(Ordering::SeqCst), 1);
/// ```
pub struct VisibilityGate {
    provider: Arc<dyn VisibilityProvider>,
    registrations: Mutex<HashMap<RegionId, VisibleNotifier>>,
}

impl VisibilityGate {
    /// Create a gate backed by `provider`
    pub fn new(provider: Arc<dyn VisibilityProvider>) -> Self {
        Self {
            provider,
            registrations: Mutex::new(HashMap::new()),
        }
    }

    /// Create a gate that treats every region as visible immediately
    pub fn immediate() -> Self {
        Self::new(Arc::new(ImmediateVisibility))
    }

    /// Run `on_visible` once, when `region` becomes visible
    ///
    /// Observing a region that already has a pending registration replaces
    /// it; the earlier callback never runs.
    pub fn observe<F>(&self, region: &Region, options: ObserveOptions, on_visible: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let notifier = VisibleNotifier::new(on_visible);

        let previous = {
            let mut registrations = self.registrations.lock();
            registrations.retain(|_, pending| pending.is_armed());
            registrations.insert(region.id, notifier.clone())
        };
        if let Some(previous) = previous {
            if previous.disarm() {
                self.provider.cancel(region.id);
            }
        }

        if let Err(err) = self.provider.observe(region, options, notifier.clone()) {
            log::warn!("{}: {}; treating as visible", region.id, err);
            notifier.fire();
        }
    }

    /// Unregister `region` before it fires
    ///
    /// Returns `true` if a pending callback was dropped.
    pub fn cancel(&self, region: RegionId) -> bool {
        let removed = self.registrations.lock().remove(&region);
        match removed {
            Some(notifier) => {
                let was_pending = notifier.disarm();
                if was_pending {
                    self.provider.cancel(region);
                }
                was_pending
            }
            None => false,
        }
    }

    /// Number of registrations that have not fired yet
    pub fn pending(&self) -> usize {
        self.registrations
            .lock()
            .values()
            .filter(|notifier| notifier.is_armed())
            .count()
    }
}

impl fmt::Debug for VisibilityGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VisibilityGate")
            .field("pending", &self.pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct NoVisibility;

    impl VisibilityProvider for NoVisibility {
        fn observe(
            &self,
            _region: &Region,
            _options: ObserveOptions,
            _notifier: VisibleNotifier,
        ) -> Result<(), VisibilityError> {
            Err(VisibilityError::Unsupported)
        }

        fn cancel(&self, _region: RegionId) {}
    }

    fn counter() -> (Arc<AtomicUsize>, impl FnOnce() + Send + 'static) {
        let count = Arc::new(AtomicUsize::new(0));
        let inner = count.clone();
        (count, move || {
            inner.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn test_visible_fraction() {
        let region = Rect::new(0.0, 0.0, 100.0, 100.0);

        assert_eq!(region.visible_fraction(&Rect::new(0.0, 0.0, 200.0, 200.0)), 1.0);
        assert_eq!(region.visible_fraction(&Rect::new(50.0, 0.0, 200.0, 200.0)), 0.5);
        assert_eq!(region.visible_fraction(&Rect::new(300.0, 0.0, 100.0, 100.0)), 0.0);
        // Touching edges do not overlap
        assert_eq!(region.visible_fraction(&Rect::new(100.0, 0.0, 100.0, 100.0)), 0.0);
    }

    #[test]
    fn test_degenerate_region() {
        let point = Rect::new(10.0, 10.0, 0.0, 0.0);

        assert_eq!(point.visible_fraction(&Rect::new(0.0, 0.0, 20.0, 20.0)), 1.0);
        assert_eq!(point.visible_fraction(&Rect::new(50.0, 50.0, 20.0, 20.0)), 0.0);
    }

    #[test]
    fn test_preload_margin_starts_early() {
        let options = ObserveOptions::default()
            .with_preload_margin(100.0)
            .with_visibility_threshold(0.5);
        let viewport = Rect::new(0.0, 0.0, 800.0, 600.0);

        // Entirely below the fold but within the margin
        assert!(options.is_visible(&Rect::new(0.0, 620.0, 100.0, 50.0), &viewport));
        // Only a sliver inside the margin
        assert!(!options.is_visible(&Rect::new(0.0, 690.0, 100.0, 100.0), &viewport));
        // Far away
        assert!(!options.is_visible(&Rect::new(0.0, 2000.0, 100.0, 100.0), &viewport));
    }

    #[test]
    fn test_threshold_must_be_exceeded() {
        let options = ObserveOptions::default()
            .with_preload_margin(0.0)
            .with_visibility_threshold(0.5);
        let bounds = Rect::new(0.0, 0.0, 100.0, 100.0);

        // Exactly half inside
        assert!(!options.is_visible(&bounds, &Rect::new(50.0, 0.0, 200.0, 200.0)));
        // Just over half
        assert!(options.is_visible(&bounds, &Rect::new(40.0, 0.0, 200.0, 200.0)));

        // A full threshold still lets fully visible regions through
        let strict = options.with_visibility_threshold(1.0);
        assert!(strict.is_visible(&bounds, &Rect::new(0.0, 0.0, 200.0, 200.0)));
        assert!(!strict.is_visible(&bounds, &Rect::new(10.0, 0.0, 200.0, 200.0)));
    }

    #[test]
    fn test_notifier_fires_once() {
        let (count, callback) = counter();
        let notifier = VisibleNotifier::new(callback);
        let clone = notifier.clone();

        assert!(notifier.fire());
        assert!(!clone.fire());
        assert!(!notifier.disarm());
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_disarmed_notifier_never_fires() {
        let (count, callback) = counter();
        let notifier = VisibleNotifier::new(callback);

        assert!(notifier.disarm());
        assert!(!notifier.fire());
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_immediate_gate_fires_synchronously() {
        let gate = VisibilityGate::immediate();
        let (count, callback) = counter();

        gate.observe(&Region::new(Rect::new(0.0, 0.0, 1.0, 1.0)), ObserveOptions::default(), callback);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending(), 0);
    }

    #[test]
    fn test_unsupported_provider_falls_back_to_visible() {
        let gate = VisibilityGate::new(Arc::new(NoVisibility));
        let (count, callback) = counter();

        gate.observe(&Region::new(Rect::new(0.0, 0.0, 1.0, 1.0)), ObserveOptions::default(), callback);

        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_viewport_gate_fires_once_on_scroll() {
        let provider = Arc::new(ViewportVisibility::with_viewport(Rect::new(0.0, 0.0, 800.0, 600.0)));
        let gate = VisibilityGate::new(provider.clone());
        let (count, callback) = counter();
        let region = Region::new(Rect::new(0.0, 1000.0, 200.0, 200.0));

        gate.observe(&region, ObserveOptions::default(), callback);
        assert_eq!(gate.pending(), 1);
        assert_eq!(provider.pending(), 1);

        assert_eq!(provider.set_viewport(Rect::new(0.0, 800.0, 800.0, 600.0)), 1);
        assert_eq!(provider.set_viewport(Rect::new(0.0, 900.0, 800.0, 600.0)), 0);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(gate.pending(), 0);
        assert_eq!(provider.pending(), 0);
    }

    #[test]
    fn test_region_visible_on_observe() {
        let provider = Arc::new(ViewportVisibility::with_viewport(Rect::new(0.0, 0.0, 800.0, 600.0)));
        let gate = VisibilityGate::new(provider.clone());
        let (count, callback) = counter();

        gate.observe(&Region::new(Rect::new(10.0, 10.0, 50.0, 50.0)), ObserveOptions::default(), callback);

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(provider.pending(), 0);
    }

    #[test]
    fn test_nothing_fires_before_first_viewport() {
        let provider = Arc::new(ViewportVisibility::new());
        let gate = VisibilityGate::new(provider.clone());
        let (count, callback) = counter();

        gate.observe(&Region::new(Rect::new(0.0, 0.0, 50.0, 50.0)), ObserveOptions::default(), callback);
        assert_eq!(count.load(Ordering::SeqCst), 0);

        provider.set_viewport(Rect::new(0.0, 0.0, 800.0, 600.0));
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_moved_region_fires() {
        let provider = Arc::new(ViewportVisibility::with_viewport(Rect::new(0.0, 0.0, 800.0, 600.0)));
        let gate = VisibilityGate::new(provider.clone());
        let (count, callback) = counter();
        let region = Region::new(Rect::new(0.0, 5000.0, 50.0, 50.0));

        gate.observe(&region, ObserveOptions::default(), callback);
        assert!(provider.move_region(region.id, Rect::new(0.0, 100.0, 50.0, 50.0)));

        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert!(!provider.move_region(region.id, Rect::new(0.0, 0.0, 50.0, 50.0)));
    }

    #[test]
    fn test_cancel_before_visible() {
        let provider = Arc::new(ViewportVisibility::with_viewport(Rect::new(0.0, 0.0, 800.0, 600.0)));
        let gate = VisibilityGate::new(provider.clone());
        let (count, callback) = counter();
        let region = Region::new(Rect::new(0.0, 3000.0, 50.0, 50.0));

        gate.observe(&region, ObserveOptions::default(), callback);
        assert!(gate.cancel(region.id));
        assert!(!gate.cancel(region.id));
        assert_eq!(provider.pending(), 0);

        provider.set_viewport(Rect::new(0.0, 2800.0, 800.0, 600.0));
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reobserve_replaces_pending_callback() {
        let provider = Arc::new(ViewportVisibility::with_viewport(Rect::new(0.0, 0.0, 800.0, 600.0)));
        let gate = VisibilityGate::new(provider.clone());
        let (first, first_callback) = counter();
        let (second, second_callback) = counter();
        let region = Region::new(Rect::new(0.0, 3000.0, 50.0, 50.0));

        gate.observe(&region, ObserveOptions::default(), first_callback);
        gate.observe(&region, ObserveOptions::default(), second_callback);
        assert_eq!(gate.pending(), 1);

        provider.set_viewport(Rect::new(0.0, 2800.0, 800.0, 600.0));

        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }
}
