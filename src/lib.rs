//! emberstore — a Firestore-compatible document database service.
//!
//! The crate exposes the request-processing pipeline that makes a
//! conventional document store speak Firestore's JSON wire contract: the
//! typed-value codec, the structured/aggregation query builders and
//! executors, hierarchical path routing, the document CRUD facade, and the
//! real-time subscription engine behind the WebSocket listen channel. The
//! storage engine, token validator, and security-rules evaluator are trait
//! objects; in-memory reference implementations are bundled for development
//! and tests.

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod logger;
pub mod model;
pub mod paths;
pub mod query;
pub mod realtime;
pub mod storage;
pub mod value;

pub use config::Config;
pub use error::{ApiError, ApiResult, ErrorKind};
pub use http::{build_router, AppState};
pub use model::{Document, FieldPath, ResourcePath, TenantId, Timestamp};
pub use value::{ArrayValue, BytesValue, GeoPoint, MapValue, RawJson, Value, ValueKind};
