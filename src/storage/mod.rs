//! The storage contract the request pipeline is built against, plus the
//! change-event feed that drives real-time subscriptions.
//!
//! The service core only ever talks to [`Storage`] as a trait object; the
//! bundled [`MemoryStore`] is the reference engine used in development and
//! tests.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ApiResult;
use crate::model::{Document, FieldPath, ResourcePath, TenantId, Timestamp};
use crate::paths::DocumentAddress;
use crate::query::{AggregationQuery, AggregationRow, Query};
use crate::value::{MapValue, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChangeType {
    Created,
    Updated,
    Deleted,
}

impl ChangeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeType::Created => "created",
            ChangeType::Updated => "updated",
            ChangeType::Deleted => "deleted",
        }
    }
}

/// Emitted by the storage engine whenever a document mutates.
#[derive(Clone, Debug)]
pub struct DocumentChangeEvent {
    pub tenant: TenantId,
    pub change_type: ChangeType,
    pub path: ResourcePath,
    pub fields: Option<MapValue>,
    pub old_fields: Option<MapValue>,
    pub read_time: Timestamp,
}

impl DocumentChangeEvent {
    /// The `projects/{p}/databases/{d}/documents/{path}` form subscriptions
    /// are keyed by.
    pub fn full_path(&self) -> String {
        self.tenant.resource_name(&self.path.canonical_string())
    }
}

#[derive(Clone, Debug, Default)]
pub struct ListOptions {
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
    pub order_by: Option<String>,
    pub show_missing: bool,
}

#[derive(Clone, Debug)]
pub struct ListPage {
    pub documents: Vec<Document>,
    pub next_page_token: Option<String>,
}

/// One entry of a `batchWrite` request.
#[derive(Clone, Debug)]
pub enum BatchWrite {
    Put {
        address: DocumentAddress,
        fields: MapValue,
    },
    Delete {
        address: DocumentAddress,
    },
}

/// Per-write status returned from `batch_write`.
#[derive(Clone, Debug)]
pub struct WriteOutcome {
    pub success: bool,
    pub update_time: Option<Timestamp>,
    pub error: Option<String>,
}

#[derive(Clone, Debug)]
pub enum TransformOperation {
    Increment(Value),
    ArrayUnion(Vec<Value>),
    ArrayRemove(Vec<Value>),
    ServerTimestamp,
}

#[derive(Clone, Debug)]
pub struct FieldTransform {
    field: FieldPath,
    operation: TransformOperation,
}

impl FieldTransform {
    pub fn new(field: FieldPath, operation: TransformOperation) -> Self {
        Self { field, operation }
    }

    pub fn field(&self) -> &FieldPath {
        &self.field
    }

    pub fn operation(&self) -> &TransformOperation {
        &self.operation
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CollectionMeta {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "createdAt")]
    pub created_at: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexField {
    #[serde(rename = "fieldPath")]
    pub field_path: String,
    #[serde(default = "default_index_order")]
    pub order: String,
}

fn default_index_order() -> String {
    "ASCENDING".to_string()
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IndexDef {
    #[serde(default)]
    pub id: String,
    pub fields: Vec<IndexField>,
}

/// The document storage engine. All operations are tenant-scoped; engines
/// must respect caller cancellation by simply being dropped mid-future.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn create_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        fields: MapValue,
    ) -> ApiResult<Document>;

    async fn get_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
    ) -> ApiResult<Document>;

    async fn update_document(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        fields: MapValue,
        mask: Option<Vec<FieldPath>>,
    ) -> ApiResult<Document>;

    async fn delete_document(&self, tenant: &TenantId, address: &DocumentAddress)
        -> ApiResult<()>;

    async fn list_documents(
        &self,
        tenant: &TenantId,
        collection: &ResourcePath,
        options: &ListOptions,
    ) -> ApiResult<ListPage>;

    async fn run_query(&self, tenant: &TenantId, query: &Query) -> ApiResult<Vec<Document>>;

    async fn run_aggregation(
        &self,
        tenant: &TenantId,
        request: &AggregationQuery,
    ) -> ApiResult<Vec<AggregationRow>>;

    async fn batch_write(
        &self,
        tenant: &TenantId,
        writes: Vec<BatchWrite>,
    ) -> ApiResult<Vec<WriteOutcome>>;

    async fn begin_transaction(&self, tenant: &TenantId) -> ApiResult<String>;

    async fn commit_transaction(&self, tenant: &TenantId, transaction_id: &str) -> ApiResult<()>;

    async fn apply_transform(
        &self,
        tenant: &TenantId,
        address: &DocumentAddress,
        transform: FieldTransform,
    ) -> ApiResult<Document>;

    async fn list_subcollections(
        &self,
        tenant: &TenantId,
        document: &ResourcePath,
    ) -> ApiResult<Vec<String>>;

    async fn list_collections(&self, tenant: &TenantId) -> ApiResult<Vec<CollectionMeta>>;

    async fn create_collection(
        &self,
        tenant: &TenantId,
        id: &str,
        description: Option<String>,
    ) -> ApiResult<CollectionMeta>;

    async fn get_collection(&self, tenant: &TenantId, id: &str) -> ApiResult<CollectionMeta>;

    async fn update_collection(
        &self,
        tenant: &TenantId,
        id: &str,
        description: Option<String>,
    ) -> ApiResult<CollectionMeta>;

    async fn delete_collection(&self, tenant: &TenantId, id: &str) -> ApiResult<()>;

    async fn create_index(
        &self,
        tenant: &TenantId,
        collection_id: &str,
        index: IndexDef,
    ) -> ApiResult<IndexDef>;

    async fn list_indexes(&self, tenant: &TenantId, collection_id: &str)
        -> ApiResult<Vec<IndexDef>>;

    async fn delete_index(
        &self,
        tenant: &TenantId,
        collection_id: &str,
        index_id: &str,
    ) -> ApiResult<()>;

    /// The change-event feed. One receiver is expected to drain this (the
    /// subscription registry); events are delivered in mutation order.
    fn change_events(&self) -> async_channel::Receiver<DocumentChangeEvent>;
}
