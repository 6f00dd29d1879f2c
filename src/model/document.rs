use crate::model::{ResourcePath, Timestamp};
use crate::value::MapValue;

/// A stored document plus its server-side metadata.
///
/// `update_time` never precedes `create_time`; a missing document carries no
/// fields and `exists == false`.
#[derive(Clone, Debug, PartialEq)]
pub struct Document {
    path: ResourcePath,
    fields: MapValue,
    create_time: Timestamp,
    update_time: Timestamp,
    exists: bool,
}

impl Document {
    pub fn new(
        path: ResourcePath,
        fields: MapValue,
        create_time: Timestamp,
        update_time: Timestamp,
    ) -> Self {
        let update_time = update_time.max(create_time);
        Self {
            path,
            fields,
            create_time,
            update_time,
            exists: true,
        }
    }

    pub fn missing(path: ResourcePath) -> Self {
        let now = Timestamp::now();
        Self {
            path,
            fields: MapValue::empty(),
            create_time: now,
            update_time: now,
            exists: false,
        }
    }

    pub fn path(&self) -> &ResourcePath {
        &self.path
    }

    /// The last path segment, i.e. the document id.
    pub fn id(&self) -> &str {
        self.path.last_segment().unwrap_or_default()
    }

    pub fn collection_path(&self) -> ResourcePath {
        self.path.parent()
    }

    pub fn fields(&self) -> &MapValue {
        &self.fields
    }

    pub fn into_fields(self) -> MapValue {
        self.fields
    }

    pub fn create_time(&self) -> Timestamp {
        self.create_time
    }

    pub fn update_time(&self) -> Timestamp {
        self.update_time
    }

    pub fn exists(&self) -> bool {
        self.exists
    }

    pub fn with_fields(&self, fields: MapValue, update_time: Timestamp) -> Self {
        Self {
            path: self.path.clone(),
            fields,
            create_time: self.create_time,
            update_time: update_time.max(self.create_time),
            exists: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn update_time_never_precedes_create_time() {
        let path = ResourcePath::from_string("cities/sf").unwrap();
        let create = Timestamp::new(100, 0);
        let stale = Timestamp::new(50, 0);
        let doc = Document::new(path, MapValue::empty(), create, stale);
        assert_eq!(doc.update_time(), create);
    }

    #[test]
    fn missing_documents_have_no_fields() {
        let path = ResourcePath::from_string("cities/nowhere").unwrap();
        let doc = Document::missing(path);
        assert!(!doc.exists());
        assert!(doc.fields().fields().is_empty());
    }
}
