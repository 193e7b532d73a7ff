//! Resource handles with exactly-once release
//!
//! A [`ResourceHandle`] references externally allocated, memory-backed image
//! content (for example a transient object URL). The content must be freed
//! through a [`Releaser`] exactly once: either explicitly via
//! [`ResourceHandle::release`] (the path the cache tiers use on eviction,
//! delete and clear) or implicitly when the last clone of the handle is
//! dropped.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

static NEXT_HANDLE_ID: AtomicU64 = AtomicU64::new(1);

/// Frees the external allocation behind a handle.
///
/// Implemented for any `Fn(&str) + Send + Sync` closure, so hosts can pass
/// a closure that revokes the URL with their platform API.
pub trait Releaser: Send + Sync {
    /// Free the allocation referenced by `url`.
    fn release(&self, url: &str);
}

impl<F> Releaser for F
where
    F: Fn(&str) + Send + Sync,
{
    fn release(&self, url: &str) {
        self(url)
    }
}

struct HandleInner {
    id: u64,
    url: String,
    released: AtomicBool,
    releaser: Arc<dyn Releaser>,
}

impl HandleInner {
    /// Flip the released flag and run the releaser if this call won the flip.
    fn release_once(&self) -> bool {
        if self.released.swap(true, Ordering::AcqRel) {
            return false;
        }

        let releaser = &self.releaser;
        let url = self.url.as_str();
        if panic::catch_unwind(AssertUnwindSafe(|| releaser.release(url))).is_err() {
            log::warn!("releaser panicked while freeing handle {} ({})", self.id, url);
        }
        true
    }
}

impl Drop for HandleInner {
    fn drop(&mut self) {
        if self.release_once() {
            log::debug!("handle {} released on last drop", self.id);
        }
    }
}

/// Shared reference to externally allocated image content
///
/// Clones share the same underlying allocation. Equality is identity:
/// two handles are equal only if they are clones of the same allocation,
/// regardless of their URL text.
///
/// # Example
///
/// ```
/// use photomap_cache::ResourceHandle;
/// use std::sync::Arc;
///
/// let handle = ResourceHandle::new("blob:photo-1", Arc::new(|_url: &str| {}));
/// assert_eq!(handle.url(), Some("blob:photo-1"));
///
/// assert!(handle.release());
/// assert!(handle.is_released());
/// assert_eq!(handle.url(), None);
/// ```
#[derive(Clone)]
pub struct ResourceHandle {
    inner: Arc<HandleInner>,
}

impl ResourceHandle {
    /// Wrap a freshly allocated resource URL together with the releaser
    /// that frees it.
    pub fn new(url: impl Into<String>, releaser: Arc<dyn Releaser>) -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: NEXT_HANDLE_ID.fetch_add(1, Ordering::Relaxed),
                url: url.into(),
                released: AtomicBool::new(false),
                releaser,
            }),
        }
    }

    /// Process-unique id of the underlying allocation
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The resource URL, or `None` once the handle has been released.
    pub fn url(&self) -> Option<&str> {
        if self.is_released() {
            None
        } else {
            Some(&self.inner.url)
        }
    }

    /// Whether the allocation has already been freed
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Free the allocation now.
    ///
    /// Returns `true` if this call performed the release, `false` if the
    /// handle had already been released. Later drops do not release again.
    pub fn release(&self) -> bool {
        self.inner.release_once()
    }

    /// Whether `self` and `other` refer to the same allocation
    pub fn same_allocation(&self, other: &ResourceHandle) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for ResourceHandle {
    fn eq(&self, other: &Self) -> bool {
        self.same_allocation(other)
    }
}

impl Eq for ResourceHandle {}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url)
            .field("released", &self.is_released())
            .finish()
    }
}
