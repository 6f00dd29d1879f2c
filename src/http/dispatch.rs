//! Catch-all dispatcher for colon-suffixed endpoints.
//!
//! `documents:runQuery` and `documents:runAggregationQuery` share a path
//! prefix and differ only in the suffix of one segment, which the routing
//! tree cannot express. The router's fallback lands here; the dispatcher
//! parses the fixed-shape prefix itself, peeks at the raw body for the
//! query-kind marker, and forwards to the right handler. Anything else
//! falls through to a plain 404.

use axum::body::{to_bytes, Body};
use axum::extract::State;
use axum::http::{Method, Request, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::json;

use crate::auth::{validate_rules_source, AuthUser};
use crate::error::{
    invalid_request_body, missing_structured_aggregation_query, missing_structured_query,
    unauthorized, ApiError, ApiResult,
};
use crate::http::documents::{parse_json_body, tenant};
use crate::http::queries;
use crate::http::state::{token_from_parts, AppState};

const MAX_BODY_BYTES: usize = 4 * 1024 * 1024;

pub async fn dispatch(State(state): State<AppState>, request: Request<Body>) -> Response {
    let (parts, body) = request.into_parts();
    let path = parts.uri.path().trim_matches('/').to_string();
    let segments: Vec<&str> = path.split('/').collect();

    match segments.as_slice() {
        ["api", "v1", "organizations", org, "projects", project, "databases", database, last]
            if last.starts_with("documents:") =>
        {
            let suffix = last["documents:".len()..].to_string();
            let org = org.to_string();
            let project = project.to_string();
            let database = database.to_string();
            match dispatch_documents(state, parts, body, &org, &project, &database, &suffix).await
            {
                Ok(response) => response,
                Err(err) => err.into_response(),
            }
        }
        ["v1", "projects", _project, "databases", _database, "securityRules:validate"] => {
            match dispatch_rules_validate(parts, body).await {
                Ok(response) => response,
                Err(err) => err.into_response(),
            }
        }
        _ => not_found(),
    }
}

fn not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({ "error": "not_found", "message": "Unknown route" })),
    )
        .into_response()
}

async fn authenticate(
    state: &AppState,
    parts: &axum::http::request::Parts,
) -> ApiResult<AuthUser> {
    let token = token_from_parts(parts)
        .ok_or_else(|| unauthorized("Request carries no bearer token or auth cookie"))?;
    state.auth.validate_token(&token).await
}

async fn read_body(body: Body) -> ApiResult<Bytes> {
    to_bytes(body, MAX_BODY_BYTES)
        .await
        .map_err(|err| invalid_request_body(format!("Failed to read request body: {err}")))
}

async fn dispatch_documents(
    state: AppState,
    parts: axum::http::request::Parts,
    body: Body,
    org: &str,
    project: &str,
    database: &str,
    suffix: &str,
) -> Result<Response, ApiError> {
    if !matches!(suffix, "runQuery" | "runAggregationQuery") {
        return Ok(not_found());
    }
    if parts.method != Method::POST {
        return Err(invalid_request_body(format!(
            "documents:{suffix} only accepts POST"
        )));
    }

    let user = authenticate(&state, &parts).await?;
    let bytes = read_body(body).await?;

    // Cheap body peek before the full parse: disambiguate by marker.
    let preview = String::from_utf8_lossy(&bytes);
    let has_aggregation = preview.contains("structuredAggregationQuery");
    let has_query = preview.contains("structuredQuery");

    let tenant = tenant(org, project, database);
    match suffix {
        "runQuery" => {
            if has_aggregation {
                return Err(invalid_request_body(
                    "runQuery must not carry a structuredAggregationQuery",
                ));
            }
            if !has_query {
                return Err(missing_structured_query());
            }
            let payload = parse_json_body(&bytes)?;
            queries::run_query(&state, &user, &tenant, &payload).await
        }
        "runAggregationQuery" => {
            if !has_aggregation {
                return Err(missing_structured_aggregation_query());
            }
            let payload = parse_json_body(&bytes)?;
            queries::run_aggregation(&state, &user, &tenant, &payload).await
        }
        _ => unreachable!("suffix checked above"),
    }
}

async fn dispatch_rules_validate(
    parts: axum::http::request::Parts,
    body: Body,
) -> Result<Response, ApiError> {
    if parts.method != Method::POST {
        return Err(invalid_request_body("securityRules:validate only accepts POST"));
    }
    let bytes = read_body(body).await?;
    let payload = parse_json_body(&bytes)?;
    let source = payload
        .get("source")
        .and_then(|value| value.as_str())
        .ok_or_else(|| invalid_request_body("Validation requires a source string"))?;

    match validate_rules_source(source) {
        Ok(()) => Ok(Json(json!({ "valid": true })).into_response()),
        Err(err) => Ok(Json(json!({
            "valid": false,
            "error": err.message(),
        }))
        .into_response()),
    }
}
