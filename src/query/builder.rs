//! Translates structured-query JSON into the internal [`Query`].
//!
//! The parser is deliberately permissive about the request root: it accepts
//! a `{structuredQuery: ...}` wrapper, a bare structured query, or a bare
//! `compositeFilter`/`fieldFilter` (for which a `where` clause is
//! synthesized). AND composites are flattened into the top-level filter
//! list; OR composites survive as a single composite filter.

use serde_json::Value as JsonValue;

use crate::error::{
    invalid_request_body, missing_collection, missing_structured_query, unsupported_composite,
    unsupported_operator, ApiResult,
};
use crate::model::FieldPath;
use crate::query::filter::{
    CompositeFilter, CompositeKind, FieldFilter, Filter, FilterOperator, Order, OrderDirection,
};
use crate::value::codec;
use crate::value::Value;

#[derive(Clone, Debug, PartialEq)]
pub struct Query {
    collection_id: String,
    all_descendants: bool,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    select_fields: Option<Vec<FieldPath>>,
    limit: Option<i64>,
    offset: Option<i64>,
    start_at: Option<Vec<Value>>,
    start_after: Option<Vec<Value>>,
    end_at: Option<Vec<Value>>,
    end_before: Option<Vec<Value>>,
}

impl Query {
    pub fn for_collection(collection_id: impl Into<String>) -> Self {
        Self {
            collection_id: collection_id.into(),
            all_descendants: false,
            filters: Vec::new(),
            orders: Vec::new(),
            select_fields: None,
            limit: None,
            offset: None,
            start_at: None,
            start_after: None,
            end_at: None,
            end_before: None,
        }
    }

    pub fn collection_id(&self) -> &str {
        &self.collection_id
    }

    pub fn all_descendants(&self) -> bool {
        self.all_descendants
    }

    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    pub fn select_fields(&self) -> Option<&[FieldPath]> {
        self.select_fields.as_deref()
    }

    pub fn limit(&self) -> Option<i64> {
        self.limit
    }

    pub fn offset(&self) -> Option<i64> {
        self.offset
    }

    pub fn start_at(&self) -> Option<&[Value]> {
        self.start_at.as_deref()
    }

    pub fn start_after(&self) -> Option<&[Value]> {
        self.start_after.as_deref()
    }

    pub fn end_at(&self) -> Option<&[Value]> {
        self.end_at.as_deref()
    }

    pub fn end_before(&self) -> Option<&[Value]> {
        self.end_before.as_deref()
    }
}

/// Entry point for the `documents:runQuery` endpoint: the body must carry a
/// `structuredQuery` key.
pub fn parse_run_query_body(body: &JsonValue) -> ApiResult<Query> {
    let structured = body
        .get("structuredQuery")
        .ok_or_else(missing_structured_query)?;
    parse_query_internal(structured, None)
}

/// Parses a structured query wherever it may sit in the body, applying the
/// permissive root handling.
pub fn parse_structured_query(value: &JsonValue) -> ApiResult<Query> {
    parse_query_internal(value, None)
}

/// Same as [`parse_structured_query`] but with a collection id taken from
/// the route when the body itself has no `from` clause (the legacy
/// `/query/:collectionID` surface).
pub fn parse_query_with_default_collection(
    value: &JsonValue,
    collection_id: &str,
) -> ApiResult<Query> {
    parse_query_internal(value, Some(collection_id))
}

fn parse_query_internal(value: &JsonValue, default_collection: Option<&str>) -> ApiResult<Query> {
    // Unwrap a {structuredQuery: ...} envelope if the caller passed one.
    let root = value.get("structuredQuery").unwrap_or(value);

    // A bare filter becomes the where clause of an otherwise empty query.
    let empty_root = JsonValue::Null;
    let (query_root, synthesized_where): (&JsonValue, Option<&JsonValue>) =
        if root.get("compositeFilter").is_some() || root.get("fieldFilter").is_some() {
            (&empty_root, Some(root))
        } else {
            (root, root.get("where"))
        };

    let (collection_id, all_descendants) = match query_root.get("from") {
        Some(from) => parse_from(from)?,
        None => match default_collection {
            Some(id) => (id.to_string(), false),
            None => {
                return Err(missing_collection(
                    "Structured query must name a collection in 'from'",
                ))
            }
        },
    };

    let mut query = Query::for_collection(collection_id);
    query.all_descendants = all_descendants;

    if let Some(where_clause) = synthesized_where {
        query.filters = convert_filter(where_clause)?;
    }

    if let Some(order_by) = query_root.get("orderBy") {
        query.orders = parse_orders(order_by)?;
    }

    if let Some(select) = query_root.get("select") {
        query.select_fields = Some(parse_projection(select)?);
    }

    query.limit = parse_count_field(query_root.get("limit"), "limit")?;
    query.offset = parse_count_field(query_root.get("offset"), "offset")?;

    query.start_at = parse_cursor(query_root.get("startAt"), query.orders.len(), "startAt")?;
    query.start_after = parse_cursor(query_root.get("startAfter"), query.orders.len(), "startAfter")?;
    query.end_at = parse_cursor(query_root.get("endAt"), query.orders.len(), "endAt")?;
    query.end_before = parse_cursor(query_root.get("endBefore"), query.orders.len(), "endBefore")?;

    Ok(query)
}

fn parse_from(from: &JsonValue) -> ApiResult<(String, bool)> {
    let entries = from
        .as_array()
        .ok_or_else(|| invalid_request_body("'from' must be an array"))?;
    let first = entries
        .first()
        .ok_or_else(|| missing_collection("'from' must name at least one collection"))?;
    let collection_id = first
        .get("collectionId")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| missing_collection("'from' entry must carry a collectionId"))?;
    if collection_id.is_empty() {
        return Err(missing_collection("collectionId must not be empty"));
    }
    let all_descendants = first
        .get("allDescendants")
        .and_then(JsonValue::as_bool)
        .unwrap_or(false);
    Ok((collection_id.to_string(), all_descendants))
}

/// Converts a filter node into the flat filter list. AND composites are
/// dissolved into their children; OR composites are kept as one composite
/// whose children are themselves flattened.
pub(crate) fn convert_filter(value: &JsonValue) -> ApiResult<Vec<Filter>> {
    if let Some(composite) = value.get("compositeFilter") {
        let op = composite
            .get("op")
            .and_then(JsonValue::as_str)
            .unwrap_or_default();
        let kind = CompositeKind::from_wire(op)
            .ok_or_else(|| unsupported_composite(format!("unsupported composite filter operator: {op:?}")))?;
        let children = composite
            .get("filters")
            .and_then(JsonValue::as_array)
            .filter(|entries| !entries.is_empty())
            .ok_or_else(|| unsupported_composite("composite filter must carry sub-filters"))?;

        let mut flattened = Vec::new();
        for child in children {
            flattened.extend(convert_filter(child)?);
        }

        return Ok(match kind {
            CompositeKind::And => flattened,
            CompositeKind::Or => vec![Filter::Composite(CompositeFilter::or(flattened))],
        });
    }

    if let Some(field_filter) = value.get("fieldFilter") {
        return Ok(vec![Filter::Field(convert_field_filter(field_filter)?)]);
    }

    Err(invalid_request_body(
        "Filter must be a compositeFilter or fieldFilter",
    ))
}

fn convert_field_filter(value: &JsonValue) -> ApiResult<FieldFilter> {
    let field_path = value
        .get("field")
        .and_then(|field| field.get("fieldPath"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_request_body("fieldFilter must carry field.fieldPath"))?;
    let field = FieldPath::from_dot_separated(field_path)?;

    let op = value
        .get("op")
        .and_then(JsonValue::as_str)
        .unwrap_or_default();
    let operator = FilterOperator::from_wire(op)
        .ok_or_else(|| unsupported_operator(format!("unsupported filter operator: {op:?}")))?;

    let wire_value = value
        .get("value")
        .ok_or_else(|| invalid_request_body("fieldFilter must carry a value"))?;
    let decoded = codec::decode_value(wire_value)?;

    Ok(FieldFilter::new(field, operator, decoded))
}

fn parse_orders(value: &JsonValue) -> ApiResult<Vec<Order>> {
    let entries = value
        .as_array()
        .ok_or_else(|| invalid_request_body("'orderBy' must be an array"))?;
    let mut orders = Vec::with_capacity(entries.len());
    for entry in entries {
        let field_path = entry
            .get("field")
            .and_then(|field| field.get("fieldPath"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_request_body("orderBy entry must carry field.fieldPath"))?;
        let direction = entry
            .get("direction")
            .and_then(JsonValue::as_str)
            .map(OrderDirection::from_wire)
            .unwrap_or(OrderDirection::Ascending);
        orders.push(Order::new(FieldPath::from_dot_separated(field_path)?, direction));
    }
    Ok(orders)
}

fn parse_projection(value: &JsonValue) -> ApiResult<Vec<FieldPath>> {
    let entries = value
        .get("fields")
        .and_then(JsonValue::as_array)
        .ok_or_else(|| invalid_request_body("'select' must carry a fields array"))?;
    let mut fields = Vec::with_capacity(entries.len());
    for entry in entries {
        let field_path = entry
            .get("fieldPath")
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_request_body("select field must carry fieldPath"))?;
        fields.push(FieldPath::from_dot_separated(field_path)?);
    }
    Ok(fields)
}

fn parse_count_field(value: Option<&JsonValue>, name: &str) -> ApiResult<Option<i64>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let parsed = match value {
        JsonValue::Number(number) => number.as_i64(),
        JsonValue::String(raw) => raw.parse::<i64>().ok(),
        // Int32Value wrapper form.
        JsonValue::Object(object) => object.get("value").and_then(JsonValue::as_i64),
        _ => None,
    };
    match parsed {
        Some(count) if count >= 0 => Ok(Some(count)),
        _ => Err(invalid_request_body(format!("'{name}' must be a non-negative integer"))),
    }
}

fn parse_cursor(
    value: Option<&JsonValue>,
    order_count: usize,
    name: &str,
) -> ApiResult<Option<Vec<Value>>> {
    let Some(value) = value else {
        return Ok(None);
    };
    let values = codec::decode_cursor_values(value)?;
    if values.len() > order_count {
        return Err(invalid_request_body(format!(
            "'{name}' carries {} values but the query orders by {} fields",
            values.len(),
            order_count
        )));
    }
    Ok(Some(values))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn field_eq(path: &str, value: JsonValue) -> JsonValue {
        json!({
            "fieldFilter": {
                "field": { "fieldPath": path },
                "op": "EQUAL",
                "value": value
            }
        })
    }

    #[test]
    fn missing_from_fails() {
        let err = parse_structured_query(&json!({ "orderBy": [] })).unwrap_err();
        assert_eq!(err.code(), "missing_collection");
    }

    #[test]
    fn missing_structured_query_fails_on_run_query() {
        let err = parse_run_query_body(&json!({ "from": [] })).unwrap_err();
        assert_eq!(err.code(), "missing_structured_query");
    }

    #[test]
    fn unwraps_structured_query_envelope() {
        let body = json!({
            "structuredQuery": {
                "from": [{ "collectionId": "productos" }],
                "limit": 5
            }
        });
        let query = parse_structured_query(&body).unwrap();
        assert_eq!(query.collection_id(), "productos");
        assert_eq!(query.limit(), Some(5));
    }

    #[test]
    fn top_level_and_is_flattened() {
        let body = json!({
            "from": [{ "collectionId": "productos" }],
            "where": {
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        {
                            "fieldFilter": {
                                "field": { "fieldPath": "price" },
                                "op": "GREATER_THAN_OR_EQUAL",
                                "value": { "doubleValue": 50 }
                            }
                        },
                        {
                            "fieldFilter": {
                                "field": { "fieldPath": "price" },
                                "op": "LESS_THAN_OR_EQUAL",
                                "value": { "doubleValue": 500 }
                            }
                        }
                    ]
                }
            }
        });
        let query = parse_structured_query(&body).unwrap();
        assert_eq!(query.filters().len(), 2);
        assert!(query
            .filters()
            .iter()
            .all(|filter| matches!(filter, Filter::Field(_))));
    }

    #[test]
    fn nested_or_is_preserved_with_flattened_children() {
        let body = json!({
            "from": [{ "collectionId": "productos" }],
            "where": {
                "compositeFilter": {
                    "op": "AND",
                    "filters": [
                        field_eq("available", json!({ "booleanValue": true })),
                        {
                            "compositeFilter": {
                                "op": "OR",
                                "filters": [
                                    field_eq("brand", json!({ "stringValue": "TechMaster" })),
                                    field_eq("brand", json!({ "stringValue": "MobileGenius" }))
                                ]
                            }
                        }
                    ]
                }
            }
        });
        let query = parse_structured_query(&body).unwrap();
        assert_eq!(query.filters().len(), 2);
        match &query.filters()[0] {
            Filter::Field(filter) => assert_eq!(filter.field().canonical_string(), "available"),
            other => panic!("expected leaf filter, got {other:?}"),
        }
        match &query.filters()[1] {
            Filter::Composite(composite) => {
                assert_eq!(composite.kind(), CompositeKind::Or);
                assert_eq!(composite.filters().len(), 2);
            }
            other => panic!("expected composite filter, got {other:?}"),
        }
    }

    #[test]
    fn bare_field_filter_root_synthesizes_where() {
        let body = field_eq("brand", json!({ "stringValue": "TechMaster" }));
        let query = parse_query_with_default_collection(&body, "productos").unwrap();
        assert_eq!(query.collection_id(), "productos");
        assert_eq!(query.filters().len(), 1);
    }

    #[test]
    fn empty_composite_is_rejected() {
        let body = json!({
            "from": [{ "collectionId": "c" }],
            "where": { "compositeFilter": { "op": "AND", "filters": [] } }
        });
        let err = parse_structured_query(&body).unwrap_err();
        assert_eq!(err.code(), "unsupported_composite");
    }

    #[test]
    fn unknown_composite_kind_is_rejected() {
        let body = json!({
            "from": [{ "collectionId": "c" }],
            "where": {
                "compositeFilter": {
                    "op": "NAND",
                    "filters": [field_eq("a", json!({ "integerValue": "1" }))]
                }
            }
        });
        let err = parse_structured_query(&body).unwrap_err();
        assert_eq!(err.code(), "unsupported_composite");
    }

    #[test]
    fn unknown_operator_is_rejected() {
        let body = json!({
            "from": [{ "collectionId": "c" }],
            "where": {
                "fieldFilter": {
                    "field": { "fieldPath": "a" },
                    "op": "SOUNDS_LIKE",
                    "value": { "stringValue": "x" }
                }
            }
        });
        let err = parse_structured_query(&body).unwrap_err();
        assert_eq!(err.code(), "unsupported_operator");
    }

    #[test]
    fn cursor_with_timestamp_and_descending_order() {
        let body = json!({
            "from": [{ "collectionId": "productos" }],
            "orderBy": [{
                "field": { "fieldPath": "fechaFabricacion" },
                "direction": "DESCENDING"
            }],
            "limit": 10,
            "startAfter": [{ "timestampValue": "2025-04-01T06:00:00-05:00" }]
        });
        let query = parse_structured_query(&body).unwrap();
        assert_eq!(query.limit(), Some(10));
        assert_eq!(query.orders().len(), 1);
        assert_eq!(query.orders()[0].direction(), OrderDirection::Descending);
        let cursor = query.start_after().unwrap();
        let expected = crate::model::Timestamp::parse_rfc3339("2025-04-01T11:00:00Z").unwrap();
        assert_eq!(cursor[0], Value::from_timestamp(expected));
    }

    #[test]
    fn cursor_longer_than_orders_fails() {
        let body = json!({
            "from": [{ "collectionId": "c" }],
            "orderBy": [{ "field": { "fieldPath": "a" } }],
            "startAt": [{ "integerValue": "1" }, { "integerValue": "2" }]
        });
        assert!(parse_structured_query(&body).is_err());
    }

    #[test]
    fn projection_and_collection_group() {
        let body = json!({
            "from": [{ "collectionId": "reviews", "allDescendants": true }],
            "select": { "fields": [{ "fieldPath": "rating" }, { "fieldPath": "author.name" }] }
        });
        let query = parse_structured_query(&body).unwrap();
        assert!(query.all_descendants());
        let fields = query.select_fields().unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[1].canonical_string(), "author.name");
    }
}
