//! Structured-query and aggregation-query handlers. The colon-suffixed
//! endpoints reach these through the dispatcher; the legacy
//! `/query/:collectionID` surface routes here directly.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Map as JsonMap, Value as JsonValue};

use crate::auth::AuthUser;
use crate::error::ApiResult;
use crate::http::documents::{encode_document, parse_json_body, tenant};
use crate::http::state::{AppState, Authenticated};
use crate::model::{TenantId, Timestamp};
use crate::query::{
    parse_query_with_default_collection, parse_run_aggregation_body, parse_run_query_body,
    AggregationRow, Query,
};
use crate::value::codec;

async fn execute_query(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    query: &Query,
) -> ApiResult<Response> {
    state
        .rules
        .validate_read(user, &tenant.resource_name(query.collection_id()))
        .await?;
    let documents = state.storage.run_query(tenant, query).await?;
    let encoded: Vec<JsonValue> = documents
        .iter()
        .map(|document| encode_document(tenant, document))
        .collect();
    Ok(Json(json!({
        "documents": encoded,
        "count": encoded.len(),
    }))
    .into_response())
}

/// `POST .../documents:runQuery`
pub async fn run_query(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    body: &JsonValue,
) -> ApiResult<Response> {
    let query = parse_run_query_body(body)?;
    execute_query(state, user, tenant, &query).await
}

fn encode_aggregation_row(row: &AggregationRow, read_time: &str) -> JsonValue {
    let mut aggregate_fields = JsonMap::new();
    for (field, value) in row.group() {
        aggregate_fields.insert(field.clone(), codec::encode_value(value));
    }
    for (alias, value) in row.aggregates() {
        aggregate_fields.insert(alias.clone(), codec::encode_value(value));
    }
    json!({
        "result": { "aggregateFields": JsonValue::Object(aggregate_fields) },
        "readTime": read_time,
    })
}

/// `POST .../documents:runAggregationQuery`
pub async fn run_aggregation(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    body: &JsonValue,
) -> ApiResult<Response> {
    let request = parse_run_aggregation_body(body)?;
    state
        .rules
        .validate_read(user, &tenant.resource_name(request.query().collection_id()))
        .await?;
    let rows = state.storage.run_aggregation(tenant, &request).await?;

    let read_time = Timestamp::now().to_rfc3339();
    let results: Vec<JsonValue> = rows
        .iter()
        .map(|row| encode_aggregation_row(row, &read_time))
        .collect();
    Ok(Json(json!({ "results": results })).into_response())
}

/// `POST .../query/:collectionID` — the legacy surface: the body may be a
/// wrapped structured query, a bare structured query, or a bare filter; the
/// collection comes from the route when the body has no `from`.
pub async fn legacy_query(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;
    let query = parse_query_with_default_collection(&payload, &collection_id)?;
    execute_query(&state, &user, &tenant, &query).await
}
