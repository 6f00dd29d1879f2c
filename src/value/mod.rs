mod array_value;
mod bytes_value;
pub mod codec;
mod map_value;
mod value;

pub use array_value::ArrayValue;
pub use bytes_value::BytesValue;
pub use map_value::MapValue;
pub use value::{GeoPoint, RawJson, Value, ValueKind};
