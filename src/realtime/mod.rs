pub mod connection;
pub mod message;
pub mod registry;

pub use connection::ConnectionManager;
pub use registry::{
    decode_resume_token, encode_resume_token, EventEnvelope, SubscribeOutcome, SubscribeRequest,
    SubscriptionKey, SubscriptionOptions, SubscriptionRegistry,
};
