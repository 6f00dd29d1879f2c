//! Collection metadata and index administration.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};

use crate::error::{invalid_request_body, ApiResult};
use crate::http::documents::{parse_json_body, tenant};
use crate::http::state::{AppState, Authenticated};
use crate::storage::IndexDef;

pub async fn list_collections(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let collections = state.storage.list_collections(&tenant).await?;
    Ok(Json(json!({
        "collections": collections,
        "count": collections.len(),
    }))
    .into_response())
}

pub async fn create_collection(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;
    let id = payload
        .get("id")
        .or_else(|| payload.get("collectionId"))
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_request_body("Collection creation requires an id"))?;
    let description = payload
        .get("description")
        .and_then(JsonValue::as_str)
        .map(str::to_string);

    let meta = state.storage.create_collection(&tenant, id, description).await?;
    Ok((StatusCode::CREATED, Json(meta)).into_response())
}

pub async fn get_collection(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let meta = state.storage.get_collection(&tenant, &collection_id).await?;
    Ok(Json(meta).into_response())
}

pub async fn update_collection(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;
    let description = payload
        .get("description")
        .and_then(JsonValue::as_str)
        .map(str::to_string);
    let meta = state
        .storage
        .update_collection(&tenant, &collection_id, description)
        .await?;
    Ok(Json(meta).into_response())
}

pub async fn delete_collection(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    state.storage.delete_collection(&tenant, &collection_id).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

pub async fn create_index(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;
    let index: IndexDef = serde_json::from_value(payload)
        .map_err(|err| invalid_request_body(format!("Invalid index definition: {err}")))?;
    let created = state.storage.create_index(&tenant, &collection_id, index).await?;
    Ok((StatusCode::CREATED, Json(created)).into_response())
}

pub async fn list_indexes(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id)): Path<(String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let indexes = state.storage.list_indexes(&tenant, &collection_id).await?;
    Ok(Json(json!({ "indexes": indexes, "count": indexes.len() })).into_response())
}

pub async fn delete_index(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database, collection_id, index_id)): Path<(
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    state
        .storage
        .delete_index(&tenant, &collection_id, &index_id)
        .await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}
