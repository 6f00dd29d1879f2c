//! In-memory reference implementation of the [`Storage`] contract.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::{self, Debug, Formatter};

use async_lock::Mutex;
use async_trait::async_trait;
use rand::distributions::Alphanumeric;
use rand::{thread_rng, Rng};

use crate::error::{
    conflict, document_not_found, invalid_path, invalid_request_body, validation_failed,
    ApiResult,
};
use crate::model::{Document, FieldPath, ResourcePath, TenantId, Timestamp};
use crate::paths::DocumentAddress;
use crate::query::{apply_query, compare_values, run_aggregations, AggregationQuery, Query};
use crate::query::{Order, OrderDirection};
use crate::storage::{
    BatchWrite, ChangeType, CollectionMeta, DocumentChangeEvent, FieldTransform, IndexDef,
    ListOptions, ListPage, Storage, TransformOperation, WriteOutcome,
};
use crate::value::{MapValue, Value, ValueKind};

const AUTO_ID_LENGTH: usize = 20;

fn generate_auto_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(AUTO_ID_LENGTH)
        .map(char::from)
        .collect()
}

#[derive(Default)]
struct DatabaseState {
    documents: BTreeMap<String, Document>,
    collections: BTreeMap<String, CollectionMeta>,
    indexes: BTreeMap<String, Vec<IndexDef>>,
    open_transactions: BTreeSet<String>,
}

pub struct MemoryStore {
    databases: Mutex<BTreeMap<TenantId, DatabaseState>>,
    events_tx: async_channel::Sender<DocumentChangeEvent>,
    events_rx: async_channel::Receiver<DocumentChangeEvent>,
}

impl Debug for MemoryStore {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryStore").finish()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        let (events_tx, events_rx) = async_channel::unbounded();
        Self {
            databases: Mutex::new(BTreeMap::new()),
            events_tx,
            events_rx,
        }
    }

    fn emit(&self, event: DocumentChangeEvent) {
        // The feed is unbounded; a failed send only means the receiver side
        // has shut down, which is not an error for the writer.
        if let Err(err) = self.events_tx.try_send(event) {
            log::debug!("change event dropped: {err}");
        }
    }

    fn document_address(address: &DocumentAddress) -> ApiResult<(ResourcePath, String)> {
        match address.document_id() {
            Some(id) => Ok((address.collection_path().clone(), id.to_string())),
            None => Err(invalid_path("Operation requires a document path")),
        }
    }

    fn register_collection(state: &mut DatabaseState, collection: &ResourcePath) {
        let id = collection.canonical_string();
        state.collections.entry(id.clone()).or_insert_with(|| CollectionMeta {
            id,
            description: None,
            created_at: Timestamp::now().to_rfc3339(),
        });
    }

    fn put_document(
        &self,
        state: &mut DatabaseState,
        tenant: &TenantId,
        collection: &ResourcePath,
        document_id: &str,
        fields: MapValue,
    ) -> Document {
        let path = collection.child(document_id);
        let key = path.canonical_string();
        let now = Timestamp::now();
        let previous = state.documents.get(&key).cloned();

        let document = match &previous {
            Some(existing) if existing.exists() => existing.with_fields(fields, now),
            _ => Document::new(path.clone(), fields, now, now),
        };
        state.documents.insert(key, document.clone());
        Self::register_collection(state, collection);

        let (change_type, old_fields) = match previous {
            Some(existing) if existing.exists() => {
                (ChangeType::Updated, Some(existing.fields().clone()))
            }
            _ => (ChangeType::Created, None),
        };
        self.emit(DocumentChangeEvent {
            tenant: tenant.clone(),
            change_type,
            path,
            fields: Some(document.fields().clone()),
            old_fields,
            read_time: now,
        });
        document
    }

    fn remove_document(
        &self,
        state: &mut DatabaseState,
        tenant: &TenantId,
        collection: &ResourcePath,
        document_id: &str,
    ) {
        let path = collection.child(document_id);
        let key = path.canonical_string();
        if let Some(existing) = state.documents.remove(&key) {
            self.emit(DocumentChangeEvent {
                tenant: tenant.clone(),
                change_type: ChangeType::Deleted,
                path,
                fields: None,
                old_fields: Some(existing.fields().clone()),
                read_time: Timestamp::now(),
            });
        }
    }

    fn collection_documents(state: &DatabaseState, collection: &ResourcePath) -> Vec<Document> {
        state
            .documents
            .values()
            .filter(|document| &document.collection_path() == collection)
            .cloned()
            .collect()
    }

    /// Candidates for a query: documents whose collection path equals the
    /// query's collection id, or — for collection-group queries — whose
    /// collection ends in that id at any depth.
    fn query_candidates(state: &DatabaseState, query: &Query) -> Vec<Document> {
        state
            .documents
            .values()
            .filter(|document| {
                let collection = document.collection_path();
                if query.all_descendants() {
                    collection.last_segment() == Some(query.collection_id())
                } else {
                    collection.canonical_string() == query.collection_id()
                }
            })
            .cloned()
            .collect()
    }
}

fn parse_order_by(order_by: &str) -> Vec<Order> {
    order_by
        .split(',')
        .filter_map(|clause| {
            let mut parts = clause.split_whitespace();
            let field = parts.next()?;
            let direction = match parts.next() {
                Some(token) if token.eq_ignore_ascii_case("desc") => OrderDirection::Descending,
                Some(token) if token.eq_ignore_ascii_case("descending") => {
                    OrderDirection::Descending
                }
                _ => OrderDirection::Ascending,
            };
            let field = FieldPath::from_dot_separated(field).ok()?;
            Some(Order::new(field, direction))
        })
        .collect()
}

fn apply_transform_value(
    existing: Option<&Value>,
    operation: &TransformOperation,
) -> ApiResult<Value> {
    match operation {
        TransformOperation::Increment(delta) => {
            let current = existing.cloned().unwrap_or_else(|| Value::from_integer(0));
            match (current.kind(), delta.kind()) {
                (ValueKind::Integer(a), ValueKind::Integer(b)) => {
                    Ok(Value::from_integer(a.wrapping_add(*b)))
                }
                _ => {
                    // A non-numeric current value restarts the counter at 0.
                    let base = current.as_f64().unwrap_or(0.0);
                    let step = delta
                        .as_f64()
                        .ok_or_else(|| invalid_request_body("increment delta must be numeric"))?;
                    Ok(Value::from_double(base + step))
                }
            }
        }
        TransformOperation::ArrayUnion(elements) => {
            let mut values = match existing.map(Value::kind) {
                Some(ValueKind::Array(array)) => array.values().to_vec(),
                _ => Vec::new(),
            };
            for element in elements {
                if !values.contains(element) {
                    values.push(element.clone());
                }
            }
            Ok(Value::from_array(values))
        }
        TransformOperation::ArrayRemove(elements) => {
            let values = match existing.map(Value::kind) {
                Some(ValueKind::Array(array)) => array
                    .values()
                    .iter()
                    .filter(|value| !elements.contains(value))
                    .cloned()
                    .collect(),
                _ => Vec::new(),
            };
            Ok(Value::from_array(values))
        }
        TransformOperation::ServerTimestamp => Ok(Value::from_timestamp(Timestamp::now())),
    }
}

#[async_trait]
impl Storage for MemoryStore {
    async fn create_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        fields: MapValue,
    ) -> ApiResult<Document> {
        let collection = address.collection_path().clone();
        let document_id = address
            .document_id()
            .map(|id| id.to_string())
            .unwrap_or_else(generate_auto_id);

        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        let key = collection.child(document_id.clone()).canonical_string();
        if state.documents.get(&key).is_some_and(Document::exists) {
            return Err(conflict(format!("Document already exists: {key}")));
        }
        Ok(self.put_document(state, tenant, &collection, &document_id, fields))
    }

    async fn get_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
    ) -> ApiResult<Document> {
        let (collection, document_id) = Self::document_address(address)?;
        let key = collection.child(document_id).canonical_string();

        let databases = self.databases.lock().await;
        databases
            .get(tenant)
            .and_then(|state| state.documents.get(&key))
            .filter(|document| document.exists())
            .cloned()
            .ok_or_else(|| document_not_found(format!("No document at {key}")))
    }

    async fn update_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        fields: MapValue,
        mask: Option<Vec<FieldPath>>,
    ) -> ApiResult<Document> {
        let (collection, document_id) = Self::document_address(address)?;
        let key = collection.child(document_id.clone()).canonical_string();

        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();

        let merged = match (&mask, state.documents.get(&key)) {
            (Some(paths), Some(existing)) if existing.exists() => {
                let mut merged = existing.fields().clone();
                for path in paths {
                    match fields.get(path) {
                        Some(value) => merged.set(path, value.clone()),
                        None => {
                            merged.remove(path);
                        }
                    }
                }
                merged
            }
            (Some(paths), _) => {
                let mut merged = MapValue::empty();
                for path in paths {
                    if let Some(value) = fields.get(path) {
                        merged.set(path, value.clone());
                    }
                }
                merged
            }
            (None, _) => fields,
        };

        Ok(self.put_document(state, tenant, &collection, &document_id, merged))
    }

    async fn delete_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
    ) -> ApiResult<()> {
        let (collection, document_id) = Self::document_address(address)?;
        let mut databases = self.databases.lock().await;
        if let Some(state) = databases.get_mut(tenant) {
            self.remove_document(state, tenant, &collection, &document_id);
        }
        Ok(())
    }

    async fn list_documents(
        &self,
        tenant: &TenantId,
        collection: &ResourcePath,
        options: &ListOptions,
    ) -> ApiResult<ListPage> {
        let databases = self.databases.lock().await;
        let mut documents = databases
            .get(tenant)
            .map(|state| Self::collection_documents(state, collection))
            .unwrap_or_default();

        if !options.show_missing {
            documents.retain(Document::exists);
        }

        if let Some(order_by) = options.order_by.as_deref().filter(|s| !s.is_empty()) {
            let orders = parse_order_by(order_by);
            documents.sort_by(|left, right| {
                for order in &orders {
                    let lv = crate::query::field_value(left, order.field())
                        .unwrap_or_else(Value::null);
                    let rv = crate::query::field_value(right, order.field())
                        .unwrap_or_else(Value::null);
                    let mut ordering = compare_values(&lv, &rv);
                    if order.direction() == OrderDirection::Descending {
                        ordering = ordering.reverse();
                    }
                    if ordering != std::cmp::Ordering::Equal {
                        return ordering;
                    }
                }
                left.id().cmp(right.id())
            });
        }

        let offset = options
            .page_token
            .as_deref()
            .and_then(|token| token.parse::<usize>().ok())
            .unwrap_or(0);
        let page_size = options.page_size.unwrap_or(i64::MAX).max(0) as usize;

        let total = documents.len();
        let page: Vec<Document> = documents.into_iter().skip(offset).take(page_size).collect();
        let consumed = offset + page.len();
        let next_page_token = (consumed < total).then(|| consumed.to_string());

        Ok(ListPage {
            documents: page,
            next_page_token,
        })
    }

    async fn run_query(&self, tenant: &TenantId, query: &Query) -> ApiResult<Vec<Document>> {
        let databases = self.databases.lock().await;
        let candidates = databases
            .get(tenant)
            .map(|state| Self::query_candidates(state, query))
            .unwrap_or_default();
        Ok(apply_query(candidates, query))
    }

    async fn run_aggregation(
        &self,
        tenant: &TenantId,
        request: &AggregationQuery,
    ) -> ApiResult<Vec<crate::query::AggregationRow>> {
        let documents = self.run_query(tenant, request.query()).await?;
        Ok(run_aggregations(&documents, request))
    }

    async fn batch_write(
        &self,
        tenant: &TenantId,
        writes: Vec<BatchWrite>,
    ) -> ApiResult<Vec<WriteOutcome>> {
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();

        let mut outcomes = Vec::with_capacity(writes.len());
        for write in writes {
            let outcome = match write {
                BatchWrite::Put { address, fields } => match Self::document_address(&address) {
                    Ok((collection, document_id)) => {
                        let document =
                            self.put_document(state, tenant, &collection, &document_id, fields);
                        WriteOutcome {
                            success: true,
                            update_time: Some(document.update_time()),
                            error: None,
                        }
                    }
                    Err(err) => WriteOutcome {
                        success: false,
                        update_time: None,
                        error: Some(err.to_string()),
                    },
                },
                BatchWrite::Delete { address } => match Self::document_address(&address) {
                    Ok((collection, document_id)) => {
                        self.remove_document(state, tenant, &collection, &document_id);
                        WriteOutcome {
                            success: true,
                            update_time: None,
                            error: None,
                        }
                    }
                    Err(err) => WriteOutcome {
                        success: false,
                        update_time: None,
                        error: Some(err.to_string()),
                    },
                },
            };
            outcomes.push(outcome);
        }
        Ok(outcomes)
    }

    async fn begin_transaction(&self, tenant: &TenantId) -> ApiResult<String> {
        let transaction_id = format!("txn-{}", generate_auto_id());
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        state.open_transactions.insert(transaction_id.clone());
        Ok(transaction_id)
    }

    async fn commit_transaction(&self, tenant: &TenantId, transaction_id: &str) -> ApiResult<()> {
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        if !state.open_transactions.remove(transaction_id) {
            return Err(validation_failed(format!(
                "Unknown or already committed transaction: {transaction_id}"
            )));
        }
        Ok(())
    }

    async fn apply_transform(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        transform: FieldTransform,
    ) -> ApiResult<Document> {
        let (collection, document_id) = Self::document_address(address)?;
        let key = collection.child(document_id.clone()).canonical_string();

        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();

        let mut fields = state
            .documents
            .get(&key)
            .filter(|document| document.exists())
            .map(|document| document.fields().clone())
            .unwrap_or_else(MapValue::empty);

        let updated = apply_transform_value(fields.get(transform.field()), transform.operation())?;
        fields.set(transform.field(), updated);

        Ok(self.put_document(state, tenant, &collection, &document_id, fields))
    }

    async fn list_subcollections(
        &self,
        tenant: &TenantId,
        document: &ResourcePath,
    ) -> ApiResult<Vec<String>> {
        let databases = self.databases.lock().await;
        let mut names = BTreeSet::new();
        if let Some(state) = databases.get(tenant) {
            for stored in state.documents.values() {
                let path = stored.path();
                if document.is_prefix_of(path) && path.len() > document.len() {
                    if let Some(name) = path.segment(document.len()) {
                        names.insert(name.to_string());
                    }
                }
            }
        }
        Ok(names.into_iter().collect())
    }

    async fn list_collections(&self, tenant: &TenantId) -> ApiResult<Vec<CollectionMeta>> {
        let databases = self.databases.lock().await;
        Ok(databases
            .get(tenant)
            .map(|state| state.collections.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create_collection(
        &self,
        tenant: &TenantId,
        id: &str,
        description: Option<String>,
    ) -> ApiResult<CollectionMeta> {
        if id.is_empty() {
            return Err(invalid_path("Collection id must not be empty"));
        }
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        if state.collections.contains_key(id) {
            return Err(conflict(format!("Collection already exists: {id}")));
        }
        let meta = CollectionMeta {
            id: id.to_string(),
            description,
            created_at: Timestamp::now().to_rfc3339(),
        };
        state.collections.insert(id.to_string(), meta.clone());
        Ok(meta)
    }

    async fn get_collection(&self, tenant: &TenantId, id: &str) -> ApiResult<CollectionMeta> {
        let databases = self.databases.lock().await;
        databases
            .get(tenant)
            .and_then(|state| state.collections.get(id))
            .cloned()
            .ok_or_else(|| document_not_found(format!("No collection {id}")))
    }

    async fn update_collection(
        &self,
        tenant: &TenantId,
        id: &str,
        description: Option<String>,
    ) -> ApiResult<CollectionMeta> {
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        let meta = state
            .collections
            .get_mut(id)
            .ok_or_else(|| document_not_found(format!("No collection {id}")))?;
        meta.description = description;
        Ok(meta.clone())
    }

    async fn delete_collection(&self, tenant: &TenantId, id: &str) -> ApiResult<()> {
        let mut databases = self.databases.lock().await;
        if let Some(state) = databases.get_mut(tenant) {
            state.collections.remove(id);
            state.indexes.remove(id);
            let collection = ResourcePath::from_string(id)?;
            let doomed: Vec<String> = state
                .documents
                .values()
                .filter(|document| &document.collection_path() == &collection)
                .map(|document| document.id().to_string())
                .collect();
            for document_id in doomed {
                self.remove_document(state, tenant, &collection, &document_id);
            }
        }
        Ok(())
    }

    async fn create_index(
        &self,
        tenant: &TenantId,
        collection_id: &str,
        mut index: IndexDef,
    ) -> ApiResult<IndexDef> {
        if index.fields.is_empty() {
            return Err(invalid_request_body("Index must name at least one field"));
        }
        if index.id.is_empty() {
            index.id = format!("idx-{}", generate_auto_id());
        }
        let mut databases = self.databases.lock().await;
        let state = databases.entry(tenant.clone()).or_default();
        state
            .indexes
            .entry(collection_id.to_string())
            .or_default()
            .push(index.clone());
        Ok(index)
    }

    async fn list_indexes(
        &self,
        tenant: &TenantId,
        collection_id: &str,
    ) -> ApiResult<Vec<IndexDef>> {
        let databases = self.databases.lock().await;
        Ok(databases
            .get(tenant)
            .and_then(|state| state.indexes.get(collection_id))
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_index(
        &self,
        tenant: &TenantId,
        collection_id: &str,
        index_id: &str,
    ) -> ApiResult<()> {
        let mut databases = self.databases.lock().await;
        if let Some(state) = databases.get_mut(tenant) {
            if let Some(indexes) = state.indexes.get_mut(collection_id) {
                indexes.retain(|index| index.id != index_id);
            }
        }
        Ok(())
    }

    fn change_events(&self) -> async_channel::Receiver<DocumentChangeEvent> {
        self.events_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::parse_structured_query;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn tenant() -> TenantId {
        TenantId::new("org", "proj", "db")
    }

    fn fields(entries: Vec<(&str, Value)>) -> MapValue {
        let mut map = BTreeMap::new();
        for (key, value) in entries {
            map.insert(key.to_string(), value);
        }
        MapValue::new(map)
    }

    fn address(path: &str) -> DocumentAddress {
        crate::paths::split_path(path).unwrap()
    }

    #[tokio::test]
    async fn create_get_roundtrip_with_auto_id() {
        let store = MemoryStore::new();
        let created = store
            .create_document(
                &tenant(),
                &address("productos"),
                fields(vec![("name", Value::from_string("mouse"))]),
            )
            .await
            .unwrap();
        assert_eq!(created.id().len(), AUTO_ID_LENGTH);

        let fetched = store
            .get_document(&tenant(), &address(&created.path().canonical_string()))
            .await
            .unwrap();
        assert_eq!(fetched.fields(), created.fields());
    }

    #[tokio::test]
    async fn create_conflicts_on_existing_id() {
        let store = MemoryStore::new();
        store
            .create_document(&tenant(), &address("productos/p1"), fields(vec![]))
            .await
            .unwrap();
        let err = store
            .create_document(&tenant(), &address("productos/p1"), fields(vec![]))
            .await
            .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[tokio::test]
    async fn update_with_mask_merges_and_deletes() {
        let store = MemoryStore::new();
        store
            .create_document(
                &tenant(),
                &address("productos/p1"),
                fields(vec![
                    ("keep", Value::from_integer(1)),
                    ("drop", Value::from_integer(2)),
                ]),
            )
            .await
            .unwrap();

        let mask = vec![
            FieldPath::from_dot_separated("drop").unwrap(),
            FieldPath::from_dot_separated("fresh").unwrap(),
        ];
        let updated = store
            .update_document(
                &tenant(),
                &address("productos/p1"),
                fields(vec![("fresh", Value::from_bool(true))]),
                Some(mask),
            )
            .await
            .unwrap();

        assert!(updated.fields().fields().contains_key("keep"));
        assert!(updated.fields().fields().contains_key("fresh"));
        assert!(!updated.fields().fields().contains_key("drop"));
    }

    #[tokio::test]
    async fn query_scopes_to_collection() {
        let store = MemoryStore::new();
        store
            .create_document(&tenant(), &address("productos/a"), fields(vec![]))
            .await
            .unwrap();
        store
            .create_document(&tenant(), &address("clientes/b"), fields(vec![]))
            .await
            .unwrap();

        let query =
            parse_structured_query(&json!({ "from": [{ "collectionId": "productos" }] })).unwrap();
        let result = store.run_query(&tenant(), &query).await.unwrap();
        assert_eq!(result.len(), 1);
        assert_eq!(result[0].id(), "a");
    }

    #[tokio::test]
    async fn collection_group_query_spans_depths() {
        let store = MemoryStore::new();
        store
            .create_document(&tenant(), &address("cities/sf/reviews/r1"), fields(vec![]))
            .await
            .unwrap();
        store
            .create_document(&tenant(), &address("reviews/r2"), fields(vec![]))
            .await
            .unwrap();

        let query = parse_structured_query(
            &json!({ "from": [{ "collectionId": "reviews", "allDescendants": true }] }),
        )
        .unwrap();
        let result = store.run_query(&tenant(), &query).await.unwrap();
        assert_eq!(result.len(), 2);
    }

    #[tokio::test]
    async fn list_documents_paginates() {
        let store = MemoryStore::new();
        for id in ["a", "b", "c"] {
            store
                .create_document(
                    &tenant(),
                    &address(&format!("productos/{id}")),
                    fields(vec![("n", Value::from_string(id))]),
                )
                .await
                .unwrap();
        }
        let collection = ResourcePath::from_string("productos").unwrap();
        let first = store
            .list_documents(
                &tenant(),
                &collection,
                &ListOptions {
                    page_size: Some(2),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(first.documents.len(), 2);
        let token = first.next_page_token.unwrap();

        let second = store
            .list_documents(
                &tenant(),
                &collection,
                &ListOptions {
                    page_size: Some(2),
                    page_token: Some(token),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        assert_eq!(second.documents.len(), 1);
        assert!(second.next_page_token.is_none());
    }

    #[tokio::test]
    async fn increment_transform_promotes_types() {
        let store = MemoryStore::new();
        store
            .create_document(
                &tenant(),
                &address("counters/c1"),
                fields(vec![("hits", Value::from_integer(2))]),
            )
            .await
            .unwrap();

        let transform = FieldTransform::new(
            FieldPath::from_dot_separated("hits").unwrap(),
            TransformOperation::Increment(Value::from_integer(3)),
        );
        let updated = store
            .apply_transform(&tenant(), &address("counters/c1"), transform)
            .await
            .unwrap();
        assert_eq!(
            updated
                .fields()
                .get(&FieldPath::from_dot_separated("hits").unwrap()),
            Some(&Value::from_integer(5))
        );
    }

    #[tokio::test]
    async fn array_union_dedupes() {
        let store = MemoryStore::new();
        let transform = FieldTransform::new(
            FieldPath::from_dot_separated("tags").unwrap(),
            TransformOperation::ArrayUnion(vec![
                Value::from_string("a"),
                Value::from_string("a"),
                Value::from_string("b"),
            ]),
        );
        let updated = store
            .apply_transform(&tenant(), &address("posts/p1"), transform)
            .await
            .unwrap();
        assert_eq!(
            updated
                .fields()
                .get(&FieldPath::from_dot_separated("tags").unwrap()),
            Some(&Value::from_array(vec![
                Value::from_string("a"),
                Value::from_string("b"),
            ]))
        );
    }

    #[tokio::test]
    async fn change_events_flow_in_mutation_order() {
        let store = MemoryStore::new();
        let events = store.change_events();
        store
            .create_document(&tenant(), &address("productos/p1"), fields(vec![]))
            .await
            .unwrap();
        store
            .update_document(
                &tenant(),
                &address("productos/p1"),
                fields(vec![("x", Value::from_integer(1))]),
                None,
            )
            .await
            .unwrap();
        store
            .delete_document(&tenant(), &address("productos/p1"))
            .await
            .unwrap();

        let kinds: Vec<ChangeType> = vec![
            events.recv().await.unwrap().change_type,
            events.recv().await.unwrap().change_type,
            events.recv().await.unwrap().change_type,
        ];
        assert_eq!(
            kinds,
            vec![ChangeType::Created, ChangeType::Updated, ChangeType::Deleted]
        );
    }

    #[tokio::test]
    async fn subcollections_are_discovered() {
        let store = MemoryStore::new();
        store
            .create_document(&tenant(), &address("cities/sf/shops/s1"), fields(vec![]))
            .await
            .unwrap();
        store
            .create_document(&tenant(), &address("cities/sf/parks/p1"), fields(vec![]))
            .await
            .unwrap();
        let names = store
            .list_subcollections(&tenant(), &ResourcePath::from_string("cities/sf").unwrap())
            .await
            .unwrap();
        assert_eq!(names, vec!["parks".to_string(), "shops".to_string()]);
    }

    #[tokio::test]
    async fn transactions_commit_once() {
        let store = MemoryStore::new();
        let id = store.begin_transaction(&tenant()).await.unwrap();
        store.commit_transaction(&tenant(), &id).await.unwrap();
        assert!(store.commit_transaction(&tenant(), &id).await.is_err());
    }
}
