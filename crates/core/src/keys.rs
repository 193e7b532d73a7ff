//! Cache key derivation
//!
//! Keys are derived by one pure function so the loader (which writes
//! entries) and invalidation (which deletes them) always agree.

use photomap_cache::CacheTier;

use crate::descriptor::ResourceId;

/// Extension substituted into thumbnail keys
pub const THUMBNAIL_EXTENSION: &str = "webp";

/// Which rendition of a photo a loader shows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum LoadMode {
    /// Full-size image, cached in the main tier
    #[default]
    Full,

    /// Reduced rendition, cached in the thumbnail tier
    Thumbnail,
}

impl LoadMode {
    /// Both modes, for invalidating every rendition
    pub const ALL: [LoadMode; 2] = [LoadMode::Full, LoadMode::Thumbnail];

    /// Tier holding the rendition for this mode
    pub fn tier(self) -> CacheTier {
        match self {
            LoadMode::Full => CacheTier::Main,
            LoadMode::Thumbnail => CacheTier::Thumbnail,
        }
    }
}

/// Keys under which one identifier is cached
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeys {
    /// Key in the placeholder tier (the raw identifier)
    pub placeholder: String,

    /// Key for the requested rendition
    pub main: String,

    /// Tier the `main` key lives in
    pub tier: CacheTier,
}

/// Derive the cache keys for `id` in `mode`
pub fn derive_keys(id: &ResourceId, mode: LoadMode) -> CacheKeys {
    let main = match mode {
        LoadMode::Full => id.as_str().to_string(),
        LoadMode::Thumbnail => thumbnail_key(id.as_str()),
    };

    CacheKeys {
        placeholder: id.as_str().to_string(),
        main,
        tier: mode.tier(),
    }
}

/// Replace the extension of the last path segment with the thumbnail
/// extension, or append it if there is none
///
/// Query strings and fragments are kept after the rewritten path.
///
/// ```
/// use photomap_core::thumbnail_key;
///
/// assert_eq!(thumbnail_key("albums/beach.JPG"), "albums/beach.webp");
/// assert_eq!(thumbnail_key("photos/42"), "photos/42.webp");
/// assert_eq!(thumbnail_key("a.b/c.png?v=2"), "a.b/c.webp?v=2");
/// ```
pub fn thumbnail_key(id: &str) -> String {
    let split = id.find(['?', '#']).unwrap_or(id.len());
    let (path, suffix) = id.split_at(split);

    let segment_start = path.rfind('/').map(|i| i + 1).unwrap_or(0);
    let stem_end = match path[segment_start..].rfind('.') {
        // A leading dot marks a hidden file, not an extension
        Some(dot) if dot > 0 => segment_start + dot,
        _ => path.len(),
    };

    format!("{}.{}{}", &path[..stem_end], THUMBNAIL_EXTENSION, suffix)
}
