use crate::error::{invalid_path, ApiResult};

/// A slash-joined path below a database's `documents/` root.
///
/// The segment count carries the hierarchy invariant: an odd number of
/// segments addresses a collection (`col`, `col/doc/col`, ...), an even
/// number addresses a document. Paths are never empty; the database root is
/// not addressable through this type.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ResourcePath {
    segments: Vec<String>,
}

impl ResourcePath {
    /// Wraps already-validated segments (the path router checks them for
    /// emptiness before building addresses).
    pub fn new(segments: Vec<String>) -> Self {
        Self { segments }
    }

    pub fn from_string(path: &str) -> ApiResult<Self> {
        let trimmed = path.trim_matches('/');
        if trimmed.is_empty() {
            return Err(invalid_path("Resource path must not be empty"));
        }
        let mut segments = Vec::new();
        for segment in trimmed.split('/') {
            if segment.is_empty() {
                return Err(invalid_path(format!(
                    "Resource path {path:?} contains an empty segment"
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn is_collection(&self) -> bool {
        self.segments.len() % 2 == 1
    }

    pub fn is_document(&self) -> bool {
        !self.segments.is_empty() && self.segments.len() % 2 == 0
    }

    pub fn segment(&self, index: usize) -> Option<&str> {
        self.segments.get(index).map(String::as_str)
    }

    pub fn last_segment(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Appends one segment, flipping collection to document and back.
    pub fn child(&self, segment: impl Into<String>) -> Self {
        let mut segments = self.segments.clone();
        segments.push(segment.into());
        Self { segments }
    }

    /// The containing path: a document's collection, or a subcollection's
    /// parent document.
    pub fn parent(&self) -> Self {
        let mut segments = self.segments.clone();
        segments.pop();
        Self { segments }
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join("/")
    }

    /// Segment-wise prefix match, the containment test behind subcollection
    /// discovery and path-scoped subscriptions.
    pub fn is_prefix_of(&self, other: &Self) -> bool {
        other.segments.starts_with(&self.segments)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_parity_tracks_the_hierarchy() {
        let collection = ResourcePath::from_string("cities/sf/neighborhoods").unwrap();
        assert!(collection.is_collection());
        assert!(!collection.is_document());

        let document = collection.child("downtown");
        assert!(document.is_document());
        assert_eq!(document.len(), 4);
        assert_eq!(document.last_segment(), Some("downtown"));
        assert_eq!(document.canonical_string(), "cities/sf/neighborhoods/downtown");

        assert_eq!(document.parent(), collection);
        assert!(document.parent().parent().is_document());
    }

    #[test]
    fn from_string_trims_surrounding_slashes() {
        let path = ResourcePath::from_string("/cities/sf/").unwrap();
        assert_eq!(path.canonical_string(), "cities/sf");
    }

    #[test]
    fn rejects_empty_paths_and_segments() {
        assert_eq!(ResourcePath::from_string("").unwrap_err().code(), "invalid_path");
        assert_eq!(
            ResourcePath::from_string("cities//sf").unwrap_err().code(),
            "invalid_path"
        );
    }

    #[test]
    fn prefix_matching_is_segment_wise() {
        let parent = ResourcePath::from_string("cities/sf").unwrap();
        let nested = ResourcePath::from_string("cities/sf/neighborhoods/downtown").unwrap();
        let lookalike = ResourcePath::from_string("cities/sfo").unwrap();
        assert!(parent.is_prefix_of(&nested));
        assert!(!nested.is_prefix_of(&parent));
        assert!(!parent.is_prefix_of(&lookalike));
    }
}
