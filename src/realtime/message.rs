//! Client and server WebSocket envelopes.

use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::error::ApiError;
use crate::model::Timestamp;
use crate::storage::DocumentChangeEvent;
use crate::value::codec;

/// Inbound message: `{action, fullPath, subscriptionID, resumeToken?,
/// query?, token?}`. The optional `token` authenticates connections that
/// upgraded without credentials.
#[derive(Clone, Debug, Deserialize)]
pub struct ClientMessage {
    pub action: String,
    #[serde(rename = "fullPath", default)]
    pub full_path: Option<String>,
    #[serde(rename = "subscriptionID", default)]
    pub subscription_id: Option<String>,
    #[serde(rename = "resumeToken", default)]
    pub resume_token: Option<String>,
    #[serde(default)]
    pub query: Option<JsonValue>,
    #[serde(default)]
    pub token: Option<String>,
}

fn now() -> String {
    Timestamp::now().to_rfc3339()
}

pub fn subscription_confirmed(subscription_id: &str, data: JsonValue) -> JsonValue {
    json!({
        "type": "subscription_confirmed",
        "subscriptionID": subscription_id,
        "data": data,
        "timestamp": now(),
    })
}

pub fn unsubscription_confirmed(subscription_id: &str) -> JsonValue {
    json!({
        "type": "unsubscription_confirmed",
        "subscriptionID": subscription_id,
        "timestamp": now(),
    })
}

pub fn subscription_error(subscription_id: Option<&str>, error: &ApiError) -> JsonValue {
    json!({
        "type": "subscription_error",
        "subscriptionID": subscription_id,
        "error": {
            "code": error.ws_code(),
            "message": error.message(),
            "status": error.http_status().as_u16(),
        },
        "timestamp": now(),
    })
}

pub fn error_envelope(error: &ApiError) -> JsonValue {
    json!({
        "type": "error",
        "error": {
            "code": error.ws_code(),
            "message": error.message(),
            "status": error.http_status().as_u16(),
        },
        "timestamp": now(),
    })
}

/// Protocol-level errors that have no HTTP analogue, e.g. `invalid_action`.
pub fn error_with_code(code: &str, message: &str) -> JsonValue {
    json!({
        "type": "error",
        "error": {
            "code": code,
            "message": message,
            "status": 400,
        },
        "timestamp": now(),
    })
}

pub fn ping() -> JsonValue {
    json!({
        "type": "ping",
        "timestamp": now(),
    })
}

/// Wraps a change event for one subscription:
/// `{type: "document_change", subscriptionID, data: {event: {...}}}`.
pub fn document_change(
    subscription_id: &str,
    event: &DocumentChangeEvent,
    resume_token: &str,
    include_old_fields: bool,
) -> JsonValue {
    let mut payload = json!({
        "type": event.change_type.as_str(),
        "path": event.full_path(),
        "readTime": event.read_time.to_rfc3339(),
        "resumeToken": resume_token,
    });
    if let Some(fields) = &event.fields {
        payload["fields"] = codec::encode_fields_object(fields);
    }
    if include_old_fields {
        if let Some(old_fields) = &event.old_fields {
            payload["oldFields"] = codec::encode_fields_object(old_fields);
        }
    }
    json!({
        "type": "document_change",
        "subscriptionID": subscription_id,
        "data": { "event": payload },
        "timestamp": now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::unauthorized;
    use crate::model::{ResourcePath, TenantId};
    use crate::storage::ChangeType;
    use crate::value::MapValue;

    #[test]
    fn parses_client_subscribe() {
        let message: ClientMessage = serde_json::from_str(
            r#"{"action":"subscribe","fullPath":"projects/p/databases/d/documents/col/doc","subscriptionID":"s1"}"#,
        )
        .unwrap();
        assert_eq!(message.action, "subscribe");
        assert_eq!(message.subscription_id.as_deref(), Some("s1"));
        assert!(message.resume_token.is_none());
    }

    #[test]
    fn error_envelope_carries_ws_code() {
        let envelope = error_envelope(&unauthorized("no token"));
        assert_eq!(envelope["type"], "error");
        assert_eq!(envelope["error"]["code"], "unauthorized");
        assert_eq!(envelope["error"]["status"], 401);
    }

    #[test]
    fn document_change_encodes_fields() {
        let mut fields = MapValue::empty();
        fields.insert("n", crate::value::Value::from_integer(1));
        let event = DocumentChangeEvent {
            tenant: TenantId::new("o", "p", "d"),
            change_type: ChangeType::Updated,
            path: ResourcePath::from_string("col/doc").unwrap(),
            fields: Some(fields),
            old_fields: Some(MapValue::empty()),
            read_time: crate::model::Timestamp::new(0, 0),
        };
        let envelope = document_change("s1", &event, "tok", true);
        assert_eq!(envelope["type"], "document_change");
        assert_eq!(envelope["subscriptionID"], "s1");
        let inner = &envelope["data"]["event"];
        assert_eq!(inner["type"], "updated");
        assert_eq!(inner["resumeToken"], "tok");
        assert_eq!(inner["fields"]["n"]["integerValue"], "1");
        assert_eq!(inner["path"], "projects/p/databases/d/documents/col/doc");
    }
}
