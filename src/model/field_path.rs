use crate::error::{invalid_request_body, ApiResult};

/// The pseudo-field that stands in for the document's own path in orders
/// and filters.
const DOCUMENT_ID_SENTINEL: &str = "__name__";

/// A dot-separated path to a document field, as it appears in
/// `fieldPath` strings, update masks, and projection lists.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    pub fn from_dot_separated(path: &str) -> ApiResult<Self> {
        let path = path.trim();
        if path.is_empty() {
            return Err(invalid_request_body("Field path must not be empty"));
        }
        let mut segments = Vec::new();
        for segment in path.split('.') {
            if segment.is_empty() {
                return Err(invalid_request_body(format!(
                    "Field path {path:?} contains an empty segment"
                )));
            }
            segments.push(segment.to_string());
        }
        Ok(Self { segments })
    }

    /// Parses the comma-separated `updateMask` request parameter. Blank
    /// entries (trailing commas and the like) are skipped.
    pub fn parse_mask(mask: &str) -> ApiResult<Vec<Self>> {
        mask.split(',')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(Self::from_dot_separated)
            .collect()
    }

    /// True for the `__name__` sentinel, which resolves to the document's
    /// full path rather than a stored field.
    pub fn is_document_id(&self) -> bool {
        matches!(self.segments.as_slice(), [only] if only == DOCUMENT_ID_SENTINEL)
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    pub fn canonical_string(&self) -> String {
        self.segments.join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_nested_paths() {
        let field = FieldPath::from_dot_separated("author.name").unwrap();
        assert_eq!(field.segments(), &["author", "name"]);
        assert_eq!(field.canonical_string(), "author.name");
    }

    #[test]
    fn rejects_empty_and_degenerate_paths() {
        assert_eq!(
            FieldPath::from_dot_separated("").unwrap_err().code(),
            "invalid_request_body"
        );
        assert!(FieldPath::from_dot_separated("a..b").is_err());
        assert!(FieldPath::from_dot_separated(".a").is_err());
    }

    #[test]
    fn document_id_sentinel_is_recognized() {
        assert!(FieldPath::from_dot_separated("__name__")
            .unwrap()
            .is_document_id());
        assert!(!FieldPath::from_dot_separated("name").unwrap().is_document_id());
        // Only the bare sentinel counts, not a nested path containing it.
        assert!(!FieldPath::from_dot_separated("outer.__name__")
            .unwrap()
            .is_document_id());
    }

    #[test]
    fn update_masks_split_on_commas() {
        let mask = FieldPath::parse_mask("price, stock.count,").unwrap();
        assert_eq!(mask.len(), 2);
        assert_eq!(mask[0].canonical_string(), "price");
        assert_eq!(mask[1].canonical_string(), "stock.count");

        assert!(FieldPath::parse_mask("price,,..").is_err());
        assert!(FieldPath::parse_mask("").unwrap().is_empty());
    }
}
