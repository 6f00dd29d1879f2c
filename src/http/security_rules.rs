//! Security-rules administration surface (`/v1/projects/.../securityRules`).
//! The `:validate` action is colon-suffixed and lands in the dispatcher.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};

use crate::error::{document_not_found, invalid_request_body, ApiResult};
use crate::http::documents::parse_json_body;
use crate::http::state::{AppState, Authenticated};

pub async fn get_rules(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((project, database)): Path<(String, String)>,
) -> ApiResult<Response> {
    let rules = state
        .rules_store
        .get(&project, &database)
        .await
        .ok_or_else(|| document_not_found(format!("No security rules for {project}/{database}")))?;
    Ok(Json(json!({
        "source": rules.source,
        "updatedAt": rules.updated_at,
    }))
    .into_response())
}

pub async fn put_rules(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((project, database)): Path<(String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let payload = parse_json_body(&body)?;
    let source = payload
        .get("source")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_request_body("Rules update requires a source string"))?;

    let stored = state
        .rules_store
        .put(&project, &database, source.to_string())
        .await?;
    Ok(Json(json!({
        "source": stored.source,
        "updatedAt": stored.updated_at,
    }))
    .into_response())
}

pub async fn delete_rules(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((project, database)): Path<(String, String)>,
) -> ApiResult<Response> {
    if state.rules_store.delete(&project, &database).await {
        Ok(StatusCode::NO_CONTENT.into_response())
    } else {
        Err(document_not_found(format!(
            "No security rules for {project}/{database}"
        )))
    }
}
