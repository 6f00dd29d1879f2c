//! Wire codec for Firestore typed values.
//!
//! Decoding maps the single-key `{tagName: payload}` envelopes onto native
//! [`Value`]s. JSON that does not look like an envelope — bare primitives,
//! objects with no recognized tag, unknown single-key objects — passes
//! through untouched as [`RawJson`], which is what configuration payloads
//! rely on. Encoding is the inverse: integers render as decimal strings,
//! doubles as JSON numbers, timestamps as RFC3339 with nanoseconds.

use std::collections::BTreeMap;
use std::str::FromStr;

use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::error::{invalid_request_body, ApiResult};
use crate::model::Timestamp;
use crate::value::{BytesValue, GeoPoint, MapValue, Value, ValueKind};

const RECOGNIZED_KEYS: [&str; 11] = [
    "nullValue",
    "booleanValue",
    "integerValue",
    "doubleValue",
    "timestampValue",
    "stringValue",
    "bytesValue",
    "referenceValue",
    "geoPointValue",
    "arrayValue",
    "mapValue",
];

/// Decodes one wire value. Only malformed payloads inside a recognized
/// envelope fail; everything that is not an envelope passes through.
pub fn decode_value(value: &JsonValue) -> ApiResult<Value> {
    let Some(object) = value.as_object() else {
        return Ok(Value::from_raw(value.clone()));
    };

    if object.len() != 1 {
        return Ok(Value::from_raw(value.clone()));
    }
    let (key, payload) = object.iter().next().expect("single-entry object");
    if !RECOGNIZED_KEYS.contains(&key.as_str()) {
        return Ok(Value::from_raw(value.clone()));
    }

    match key.as_str() {
        "nullValue" => Ok(Value::null()),
        "booleanValue" => {
            let parsed = payload
                .as_bool()
                .ok_or_else(|| invalid_request_body("booleanValue must be a bool"))?;
            Ok(Value::from_bool(parsed))
        }
        "integerValue" => decode_integer(payload),
        "doubleValue" => decode_double(payload),
        "timestampValue" => {
            let raw = payload
                .as_str()
                .ok_or_else(|| invalid_request_body("timestampValue must be a string"))?;
            match Timestamp::parse_rfc3339(raw) {
                Ok(timestamp) => Ok(Value::from_timestamp(timestamp)),
                // Unparseable timestamps keep their raw string form.
                Err(_) => Ok(Value::from_string(raw)),
            }
        }
        "stringValue" => {
            let parsed = payload
                .as_str()
                .ok_or_else(|| invalid_request_body("stringValue must be a string"))?;
            Ok(Value::from_string(parsed))
        }
        "bytesValue" => {
            let raw = payload
                .as_str()
                .ok_or_else(|| invalid_request_body("bytesValue must be a base64 string"))?;
            let decoded = BytesValue::from_base64(raw)
                .map_err(|err| invalid_request_body(format!("Invalid bytesValue: {err}")))?;
            Ok(Value::from_bytes(decoded))
        }
        "referenceValue" => {
            let parsed = payload
                .as_str()
                .ok_or_else(|| invalid_request_body("referenceValue must be a string"))?;
            Ok(Value::from_reference(parsed))
        }
        "geoPointValue" => decode_geo_point(payload),
        "arrayValue" => {
            let decoded = match payload.get("values").and_then(JsonValue::as_array) {
                Some(entries) => entries
                    .iter()
                    .map(decode_value)
                    .collect::<ApiResult<Vec<_>>>()?,
                None => Vec::new(),
            };
            Ok(Value::from_array(decoded))
        }
        "mapValue" => {
            let map = decode_map_payload(payload)?;
            Ok(Value::from_map(map.into_fields()))
        }
        _ => unreachable!("key membership checked above"),
    }
}

fn decode_integer(payload: &JsonValue) -> ApiResult<Value> {
    let parsed = match payload {
        JsonValue::String(value) => i64::from_str(value)
            .map_err(|err| invalid_request_body(format!("Invalid integerValue: {err}")))?,
        JsonValue::Number(number) => match number.as_i64() {
            Some(value) => value,
            // Lenient path: a bare JSON double is coerced.
            None => number
                .as_f64()
                .ok_or_else(|| invalid_request_body("integerValue out of range"))?
                as i64,
        },
        _ => {
            return Err(invalid_request_body(
                "integerValue must be a string or number",
            ))
        }
    };
    Ok(Value::from_integer(parsed))
}

fn decode_double(payload: &JsonValue) -> ApiResult<Value> {
    let parsed = match payload {
        JsonValue::Number(number) => number
            .as_f64()
            .ok_or_else(|| invalid_request_body("Invalid doubleValue"))?,
        JsonValue::String(value) => value
            .parse::<f64>()
            .map_err(|err| invalid_request_body(format!("Invalid doubleValue: {err}")))?,
        _ => {
            return Err(invalid_request_body(
                "doubleValue must be a number or string",
            ))
        }
    };
    Ok(Value::from_double(parsed))
}

fn decode_geo_point(payload: &JsonValue) -> ApiResult<Value> {
    let coordinate = |axis: &str, bound: f64| -> ApiResult<f64> {
        let parsed = payload
            .get(axis)
            .and_then(JsonValue::as_f64)
            .ok_or_else(|| invalid_request_body(format!("geoPointValue.{axis} must be a number")))?;
        if !(-bound..=bound).contains(&parsed) {
            return Err(invalid_request_body(format!(
                "geoPointValue.{axis} must lie within [-{bound}, {bound}]"
            )));
        }
        Ok(parsed)
    };
    Ok(Value::from_geo_point(GeoPoint {
        latitude: coordinate("latitude", 90.0)?,
        longitude: coordinate("longitude", 180.0)?,
    }))
}

fn decode_map_payload(payload: &JsonValue) -> ApiResult<MapValue> {
    let fields_object = match payload.get("fields") {
        Some(fields_value) => fields_value
            .as_object()
            .ok_or_else(|| invalid_request_body("Expected 'fields' to be an object"))?,
        None => return Ok(MapValue::empty()),
    };

    let mut fields = BTreeMap::new();
    for (key, value) in fields_object {
        fields.insert(key.clone(), decode_value(value)?);
    }
    Ok(MapValue::new(fields))
}

/// Decodes the field map of an inbound document body. Accepts both the wire
/// form `{"fields": {name: envelope}}` and a bare `{name: envelope}` object.
pub fn decode_document_fields(value: &JsonValue) -> ApiResult<MapValue> {
    let object = value
        .as_object()
        .ok_or_else(|| invalid_request_body("Document fields must be an object"))?;

    let entries: &JsonMap<String, JsonValue> = match object.get("fields") {
        Some(fields_value) => fields_value
            .as_object()
            .ok_or_else(|| invalid_request_body("Expected 'fields' to be an object"))?,
        None => object,
    };

    let mut fields = BTreeMap::new();
    for (key, entry) in entries {
        fields.insert(key.clone(), decode_value(entry)?);
    }
    Ok(MapValue::new(fields))
}

/// Decodes a cursor vector: either a bare array of typed values or the
/// `{values: [...], before: ...}` object form.
pub fn decode_cursor_values(value: &JsonValue) -> ApiResult<Vec<Value>> {
    let entries = match value {
        JsonValue::Array(entries) => entries.as_slice(),
        JsonValue::Object(object) => match object.get("values").and_then(JsonValue::as_array) {
            Some(entries) => entries.as_slice(),
            None => return Err(invalid_request_body("Cursor must carry a values array")),
        },
        _ => return Err(invalid_request_body("Cursor must be an array of typed values")),
    };
    entries.iter().map(decode_value).collect()
}

/// Lifts pass-through primitives into their typed counterparts. Used where
/// a handler needs a typed value but clients are allowed to send bare JSON
/// (e.g. the atomic-operation bodies).
pub fn lift_raw(value: Value) -> Value {
    let raw = match value.kind() {
        ValueKind::Raw(raw) => raw.0.clone(),
        _ => return value,
    };
    match raw {
        JsonValue::Null => Value::null(),
        JsonValue::Bool(b) => Value::from_bool(b),
        JsonValue::Number(number) => match number.as_i64() {
            Some(integer) => Value::from_integer(integer),
            None => Value::from_double(number.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) => Value::from_string(s),
        _ => value,
    }
}

pub fn encode_value(value: &Value) -> JsonValue {
    match value.kind() {
        ValueKind::Null => json!({ "nullValue": JsonValue::Null }),
        ValueKind::Boolean(boolean) => json!({ "booleanValue": boolean }),
        ValueKind::Integer(integer) => json!({ "integerValue": integer.to_string() }),
        ValueKind::Double(double) => json!({ "doubleValue": double }),
        ValueKind::Timestamp(timestamp) => {
            json!({ "timestampValue": timestamp.to_rfc3339_nanos() })
        }
        ValueKind::String(string) => json!({ "stringValue": string }),
        ValueKind::Bytes(bytes) => json!({ "bytesValue": bytes.to_base64() }),
        ValueKind::Reference(reference) => json!({ "referenceValue": reference }),
        ValueKind::GeoPoint(point) => json!({
            "geoPointValue": {
                "latitude": point.latitude,
                "longitude": point.longitude,
            }
        }),
        ValueKind::Array(array) => {
            let values = array.values().iter().map(encode_value).collect::<Vec<_>>();
            json!({ "arrayValue": { "values": values } })
        }
        ValueKind::Map(map) => json!({
            "mapValue": {
                "fields": encode_field_entries(map)
            }
        }),
        ValueKind::Raw(raw) => raw.0.clone(),
    }
}

fn encode_field_entries(map: &MapValue) -> JsonValue {
    let mut fields = JsonMap::new();
    for (key, value) in map.fields() {
        fields.insert(key.clone(), encode_value(value));
    }
    JsonValue::Object(fields)
}

/// Encodes a field map into the wire form `{"fields": {...}}`.
pub fn encode_document_fields(map: &MapValue) -> JsonValue {
    json!({ "fields": encode_field_entries(map) })
}

/// Encodes a field map as a bare `{name: envelope}` object, the shape used
/// in change-event payloads.
pub fn encode_fields_object(map: &MapValue) -> JsonValue {
    encode_field_entries(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_decode_roundtrip() {
        let mut inner = BTreeMap::new();
        inner.insert("flag".to_string(), Value::from_bool(true));
        let mut map = BTreeMap::new();
        map.insert("name".to_string(), Value::from_string("Ada"));
        map.insert("age".to_string(), Value::from_integer(42));
        map.insert("score".to_string(), Value::from_double(9.5));
        map.insert("nested".to_string(), Value::from_map(inner));
        map.insert(
            "tags".to_string(),
            Value::from_array(vec![Value::from_string("a"), Value::null()]),
        );
        map.insert(
            "blob".to_string(),
            Value::from_bytes(BytesValue::new(vec![1, 2, 3])),
        );
        let map = MapValue::new(map);

        let encoded = encode_document_fields(&map);
        let decoded = decode_document_fields(&encoded).unwrap();
        assert_eq!(decoded, map);
    }

    #[test]
    fn integer_string_roundtrips_exactly() {
        let wire = json!({ "integerValue": "-9223372036854775808" });
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(decoded, Value::from_integer(i64::MIN));
        assert_eq!(encode_value(&decoded), wire);
    }

    #[test]
    fn bare_number_is_coerced_to_integer() {
        let decoded = decode_value(&json!({ "integerValue": 7 })).unwrap();
        assert_eq!(decoded, Value::from_integer(7));
    }

    #[test]
    fn malformed_integer_string_is_rejected() {
        assert!(decode_value(&json!({ "integerValue": "seven" })).is_err());
    }

    #[test]
    fn plain_map_passes_through() {
        let wire = json!({ "retention": "30d", "region": "us-east1" });
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(decoded, Value::from_raw(wire));
    }

    #[test]
    fn unknown_envelope_key_passes_through() {
        let wire = json!({ "vectorValue": [1, 2, 3] });
        let decoded = decode_value(&wire).unwrap();
        assert_eq!(decoded, Value::from_raw(wire));
    }

    #[test]
    fn bare_primitives_pass_through() {
        for wire in [json!("hello"), json!(3), json!(true), JsonValue::Null] {
            assert_eq!(decode_value(&wire).unwrap(), Value::from_raw(wire));
        }
    }

    #[test]
    fn timestamp_parses_offsets() {
        let decoded = decode_value(&json!({ "timestampValue": "2025-04-01T06:00:00-05:00" })).unwrap();
        let expected = Timestamp::parse_rfc3339("2025-04-01T11:00:00Z").unwrap();
        assert_eq!(decoded, Value::from_timestamp(expected));
    }

    #[test]
    fn unparseable_timestamp_keeps_raw_string() {
        let decoded = decode_value(&json!({ "timestampValue": "next tuesday" })).unwrap();
        assert_eq!(decoded, Value::from_string("next tuesday"));
    }

    #[test]
    fn cursor_accepts_both_forms() {
        let bare = json!([{ "integerValue": "10" }]);
        let wrapped = json!({ "values": [{ "integerValue": "10" }], "before": true });
        assert_eq!(decode_cursor_values(&bare).unwrap(), vec![Value::from_integer(10)]);
        assert_eq!(
            decode_cursor_values(&wrapped).unwrap(),
            vec![Value::from_integer(10)]
        );
    }

    #[test]
    fn geo_point_decodes() {
        let decoded =
            decode_value(&json!({ "geoPointValue": { "latitude": 1.0, "longitude": 2.0 } }))
                .unwrap();
        match decoded.kind() {
            ValueKind::GeoPoint(point) => {
                assert_eq!(point.latitude, 1.0);
                assert_eq!(point.longitude, 2.0);
            }
            other => panic!("unexpected kind: {other:?}"),
        }
    }

    #[test]
    fn geo_point_out_of_range_is_rejected() {
        let too_north = json!({ "geoPointValue": { "latitude": 100.0, "longitude": 0.0 } });
        assert_eq!(
            decode_value(&too_north).unwrap_err().code(),
            "invalid_request_body"
        );
        let too_east = json!({ "geoPointValue": { "latitude": 0.0, "longitude": 181.0 } });
        assert!(decode_value(&too_east).is_err());
    }
}
