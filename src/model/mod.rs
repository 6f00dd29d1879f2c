mod document;
mod field_path;
mod resource_path;
mod tenant;
mod timestamp;

pub use document::Document;
pub use field_path::FieldPath;
pub use resource_path::ResourcePath;
pub use tenant::TenantId;
pub use timestamp::Timestamp;
