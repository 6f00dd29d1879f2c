//! Resolution of hierarchy route parameters and raw paths into canonical
//! collection paths and document ids.
//!
//! Collection paths always have an odd number of `/`-joined segments
//! (`col`, `col/doc/col`, ...). A trailing even segment is the document id.

use crate::error::{invalid_path, ApiResult};
use crate::model::ResourcePath;

/// A resolved document or collection address within one database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentAddress {
    collection_path: ResourcePath,
    document_id: Option<String>,
}

impl DocumentAddress {
    pub fn collection(collection_path: ResourcePath) -> Self {
        Self {
            collection_path,
            document_id: None,
        }
    }

    pub fn document(collection_path: ResourcePath, document_id: impl Into<String>) -> Self {
        Self {
            collection_path,
            document_id: Some(document_id.into()),
        }
    }

    pub fn collection_path(&self) -> &ResourcePath {
        &self.collection_path
    }

    pub fn document_id(&self) -> Option<&str> {
        self.document_id.as_deref()
    }

    pub fn is_document(&self) -> bool {
        self.document_id.is_some()
    }

    /// The full path including the document id when present.
    pub fn full_path(&self) -> ResourcePath {
        match &self.document_id {
            Some(id) => self.collection_path.child(id.clone()),
            None => self.collection_path.clone(),
        }
    }
}

/// Resolves the alternating `col/doc/col/doc/...` route parameters captured
/// by the hierarchy routes. An odd run addresses a (sub)collection, an even
/// run a document inside it.
pub fn resolve_segments(segments: &[&str]) -> ApiResult<DocumentAddress> {
    if segments.is_empty() {
        return Err(invalid_path("Path must contain at least one segment"));
    }
    if segments.iter().any(|segment| segment.is_empty()) {
        return Err(invalid_path("Path segments must not be empty"));
    }

    let path = ResourcePath::new(segments.iter().map(|s| s.to_string()).collect());
    if path.is_collection() {
        Ok(DocumentAddress::collection(path))
    } else {
        let document_id = path.last_segment().expect("non-empty path").to_string();
        Ok(DocumentAddress::document(path.parent(), document_id))
    }
}

/// Splits a raw slash-joined path and resolves it like [`resolve_segments`].
pub fn split_path(path: &str) -> ApiResult<DocumentAddress> {
    let segments: Vec<&str> = path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();
    resolve_segments(&segments)
}

/// A subscription path: `projects/{p}/databases/{d}/documents/{path...}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ListenPath {
    project_id: String,
    database_id: String,
    address: DocumentAddress,
}

impl ListenPath {
    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn database_id(&self) -> &str {
        &self.database_id
    }

    pub fn address(&self) -> &DocumentAddress {
        &self.address
    }
}

pub fn parse_listen_path(full_path: &str) -> ApiResult<ListenPath> {
    let segments: Vec<&str> = full_path
        .split('/')
        .filter(|segment| !segment.is_empty())
        .collect();

    match segments.as_slice() {
        ["projects", project, "databases", database, "documents", rest @ ..]
            if !rest.is_empty() =>
        {
            Ok(ListenPath {
                project_id: project.to_string(),
                database_id: database.to_string(),
                address: resolve_segments(rest)?,
            })
        }
        _ => Err(invalid_path(format!(
            "Subscription path must look like projects/{{p}}/databases/{{d}}/documents/...: {full_path:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn single_collection() {
        let address = resolve_segments(&["cities"]).unwrap();
        assert!(!address.is_document());
        assert_eq!(address.collection_path().canonical_string(), "cities");
    }

    #[test]
    fn standard_document() {
        let address = resolve_segments(&["cities", "sf"]).unwrap();
        assert_eq!(address.document_id(), Some("sf"));
        assert_eq!(address.full_path().canonical_string(), "cities/sf");
    }

    #[test]
    fn subcollection_and_subdocument() {
        let address = resolve_segments(&["cities", "sf", "neighborhoods"]).unwrap();
        assert!(!address.is_document());
        assert_eq!(
            address.collection_path().canonical_string(),
            "cities/sf/neighborhoods"
        );

        let address =
            resolve_segments(&["cities", "sf", "neighborhoods", "downtown"]).unwrap();
        assert_eq!(address.document_id(), Some("downtown"));
        assert_eq!(
            address.collection_path().canonical_string(),
            "cities/sf/neighborhoods"
        );
    }

    #[test]
    fn third_level_nesting() {
        let address =
            resolve_segments(&["cities", "sf", "neighborhoods", "downtown", "shops", "brew"])
                .unwrap();
        assert_eq!(address.document_id(), Some("brew"));
        assert_eq!(
            address.collection_path().canonical_string(),
            "cities/sf/neighborhoods/downtown/shops"
        );
    }

    #[test]
    fn empty_path_is_invalid() {
        assert_eq!(split_path("").unwrap_err().code(), "invalid_path");
        assert_eq!(split_path("///").unwrap_err().code(), "invalid_path");
    }

    #[test]
    fn empty_segment_is_invalid() {
        assert!(resolve_segments(&["cities", ""]).is_err());
    }

    #[test]
    fn listen_path_parses_document_target() {
        let listen = parse_listen_path("projects/p/databases/d/documents/col/docX").unwrap();
        assert_eq!(listen.project_id(), "p");
        assert_eq!(listen.database_id(), "d");
        assert_eq!(listen.address().document_id(), Some("docX"));
    }

    #[test]
    fn listen_path_rejects_database_root() {
        assert!(parse_listen_path("projects/p/databases/d/documents").is_err());
        assert!(parse_listen_path("col/docX").is_err());
    }
}
