//! Photo descriptors
//!
//! A photo is described either by inline content that can be shown as is,
//! or by an identifier that the resolvers turn into resource handles.

use std::fmt;

/// Prefix marking a self-contained inline payload
pub const INLINE_PREFIX: &str = "data:";

/// Identifier of a photo, used to derive cache keys and to call resolvers
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(String);

impl ResourceId {
    /// Wrap an identifier string
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier text
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ResourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ResourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Ready-to-display payload (a `data:` URI)
#[derive(Clone, PartialEq, Eq)]
pub struct InlinePayload(String);

impl InlinePayload {
    /// Wrap a payload; returns `None` unless it carries the inline prefix
    pub fn new(payload: impl Into<String>) -> Option<Self> {
        let payload = payload.into();
        if payload.starts_with(INLINE_PREFIX) {
            Some(Self(payload))
        } else {
            None
        }
    }

    /// The full payload text
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Media type declared by the payload, if any (`image/png` in
    /// `data:image/png;base64,...`)
    pub fn media_type(&self) -> Option<&str> {
        let header = self.0[INLINE_PREFIX.len()..].split(',').next()?;
        let media_type = header.split(';').next()?;
        if media_type.is_empty() {
            None
        } else {
            Some(media_type)
        }
    }
}

impl fmt::Debug for InlinePayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Payloads can be large; only show the header
        f.debug_struct("InlinePayload")
            .field("media_type", &self.media_type())
            .field("len", &self.0.len())
            .finish()
    }
}

/// What a loader is asked to show
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PhotoDescriptor {
    /// Self-contained content; no cache or resolver involvement
    Inline(InlinePayload),

    /// Identifier resolved through the cache tiers and resolvers
    Identifier(ResourceId),
}

impl PhotoDescriptor {
    /// Classify a source string: `data:` payloads are inline, anything else
    /// is an identifier
    pub fn parse(source: &str) -> Self {
        match InlinePayload::new(source) {
            Some(payload) => PhotoDescriptor::Inline(payload),
            None => PhotoDescriptor::Identifier(ResourceId::new(source)),
        }
    }

    /// The identifier, if this is not inline content
    pub fn identifier(&self) -> Option<&ResourceId> {
        match self {
            PhotoDescriptor::Identifier(id) => Some(id),
            PhotoDescriptor::Inline(_) => None,
        }
    }

    /// Whether this descriptor carries inline content
    pub fn is_inline(&self) -> bool {
        matches!(self, PhotoDescriptor::Inline(_))
    }
}

impl From<&str> for PhotoDescriptor {
    fn from(source: &str) -> Self {
        Self::parse(source)
    }
}

impl From<ResourceId> for PhotoDescriptor {
    fn from(id: ResourceId) -> Self {
        PhotoDescriptor::Identifier(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_identifier() {
        let descriptor = PhotoDescriptor::parse("albums/2024/beach.jpg");

        assert!(!descriptor.is_inline());
        assert_eq!(
            descriptor.identifier(),
            Some(&ResourceId::new("albums/2024/beach.jpg"))
        );
    }

    #[test]
    fn test_parse_inline() {
        let descriptor = PhotoDescriptor::parse("data:image/png;base64,iVBORw0KGgo=");

        assert!(descriptor.is_inline());
        assert_eq!(descriptor.identifier(), None);
        match descriptor {
            PhotoDescriptor::Inline(payload) => {
                assert_eq!(payload.media_type(), Some("image/png"));
            }
            other => panic!("expected inline payload, got {:?}", other),
        }
    }

    #[test]
    fn test_inline_without_media_type() {
        let payload = InlinePayload::new("data:,hello").unwrap();
        assert_eq!(payload.media_type(), None);
        assert!(InlinePayload::new("blob:abc").is_none());
    }
}
