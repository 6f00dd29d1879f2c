//! Document CRUD facade: translates the external JSON surface into storage
//! calls, decoding inbound typed values and encoding outbound ones.

use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde::Deserialize;
use serde_json::{json, Value as JsonValue};

use crate::auth::AuthUser;
use crate::error::{invalid_json, invalid_request_body, missing_data, ApiResult};
use crate::http::state::{AppState, Authenticated};
use crate::model::{Document, FieldPath, TenantId};
use crate::paths::{resolve_segments, DocumentAddress};
use crate::storage::{FieldTransform, ListOptions, TransformOperation};
use crate::value::codec;
use crate::value::Value;

pub fn tenant(org: &str, project: &str, database: &str) -> TenantId {
    TenantId::new(org, project, database)
}

pub fn parse_json_body(body: &Bytes) -> ApiResult<JsonValue> {
    if body.is_empty() {
        return Ok(JsonValue::Null);
    }
    serde_json::from_slice(body).map_err(|err| invalid_json(format!("Invalid JSON body: {err}")))
}

pub fn encode_document(tenant: &TenantId, document: &Document) -> JsonValue {
    json!({
        "name": tenant.resource_name(&document.path().canonical_string()),
        "fields": codec::encode_fields_object(document.fields()),
        "createTime": document.create_time().to_rfc3339(),
        "updateTime": document.update_time().to_rfc3339(),
    })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListParams {
    pub page_size: Option<i64>,
    pub page_token: Option<String>,
    pub order_by: Option<String>,
    pub show_missing: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateParams {
    pub document_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateParams {
    pub update_mask: Option<String>,
}

async fn create_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
    params: CreateParams,
    body: Bytes,
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    let address = match (address.document_id(), params.document_id) {
        (None, Some(id)) => DocumentAddress::document(address.collection_path().clone(), id),
        _ => address,
    };
    state
        .rules
        .validate_write(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;

    let payload = parse_json_body(&body)?;
    let fields = codec::decode_document_fields(&payload)?;
    if fields.is_empty() {
        return Err(missing_data("Document fields must not be empty"));
    }

    let document = state.storage.create_document(tenant, &address, fields).await?;
    Ok((StatusCode::CREATED, Json(encode_document(tenant, &document))).into_response())
}

async fn get_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    state
        .rules
        .validate_read(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;
    let document = state.storage.get_document(tenant, &address).await?;
    Ok(Json(encode_document(tenant, &document)).into_response())
}

async fn update_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
    params: UpdateParams,
    body: Bytes,
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    state
        .rules
        .validate_write(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;

    let payload = parse_json_body(&body)?;
    let fields = codec::decode_document_fields(&payload)?;

    let mask = match params.update_mask.as_deref() {
        Some(mask) => {
            let parsed = FieldPath::parse_mask(mask)?;
            // An all-blank mask means no mask at all: replace semantics.
            (!parsed.is_empty()).then_some(parsed)
        }
        None => None,
    };

    let document = state
        .storage
        .update_document(tenant, &address, fields, mask)
        .await?;
    Ok(Json(encode_document(tenant, &document)).into_response())
}

async fn delete_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    state
        .rules
        .validate_write(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;
    state.storage.delete_document(tenant, &address).await?;
    Ok(StatusCode::NO_CONTENT.into_response())
}

async fn list_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
    params: ListParams,
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    state
        .rules
        .validate_read(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;

    let options = ListOptions {
        page_size: params.page_size,
        page_token: params.page_token,
        order_by: params.order_by,
        show_missing: params.show_missing.unwrap_or(false),
    };
    let page = state
        .storage
        .list_documents(tenant, address.collection_path(), &options)
        .await?;

    let documents: Vec<JsonValue> = page
        .documents
        .iter()
        .map(|document| encode_document(tenant, document))
        .collect();
    let mut body = json!({
        "documents": documents,
        "count": documents.len(),
    });
    if let Some(token) = page.next_page_token {
        body["nextPageToken"] = json!(token);
    }
    Ok(Json(body).into_response())
}

fn parse_transform(kind: &str, payload: &JsonValue) -> ApiResult<FieldTransform> {
    let field = payload
        .get("field")
        .and_then(JsonValue::as_str)
        .ok_or_else(|| invalid_request_body("Atomic operation requires a field"))?;
    let field = FieldPath::from_dot_separated(field)?;

    let decoded_value = |key: &str| -> ApiResult<Value> {
        let raw = payload
            .get(key)
            .or_else(|| payload.get("delta"))
            .ok_or_else(|| invalid_request_body(format!("Atomic operation requires {key:?}")))?;
        Ok(codec::lift_raw(codec::decode_value(raw)?))
    };

    let decoded_elements = || -> ApiResult<Vec<Value>> {
        let raw = payload
            .get("elements")
            .or_else(|| payload.get("values"))
            .and_then(JsonValue::as_array)
            .ok_or_else(|| invalid_request_body("Atomic operation requires elements"))?;
        raw.iter()
            .map(|entry| Ok(codec::lift_raw(codec::decode_value(entry)?)))
            .collect()
    };

    let operation = match kind {
        "increment" => TransformOperation::Increment(decoded_value("value")?),
        "arrayUnion" => TransformOperation::ArrayUnion(decoded_elements()?),
        "arrayRemove" => TransformOperation::ArrayRemove(decoded_elements()?),
        "serverTimestamp" => TransformOperation::ServerTimestamp,
        other => {
            return Err(invalid_request_body(format!(
                "Unknown atomic operation {other:?}"
            )))
        }
    };
    Ok(FieldTransform::new(field, operation))
}

async fn atomic_impl(
    state: &AppState,
    user: &AuthUser,
    tenant: &TenantId,
    segments: &[&str],
    kind: &str,
    body: Bytes,
) -> ApiResult<Response> {
    let address = resolve_segments(segments)?;
    state
        .rules
        .validate_write(user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;
    let payload = parse_json_body(&body)?;
    let transform = parse_transform(kind, &payload)?;
    let document = state.storage.apply_transform(tenant, &address, transform).await?;
    Ok(Json(encode_document(tenant, &document)).into_response())
}

// Depth-1 routes: /documents/:c1[...]

pub async fn create_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1)): Path<(String, String, String, String)>,
    UrlQuery(params): UrlQuery<CreateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    create_impl(&state, &user, &tenant, &[&c1], params, body).await
}

pub async fn list_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1)): Path<(String, String, String, String)>,
    UrlQuery(params): UrlQuery<ListParams>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    list_impl(&state, &user, &tenant, &[&c1], params).await
}

pub async fn get_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1)): Path<(String, String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    get_impl(&state, &user, &tenant, &[&c1, &d1]).await
}

pub async fn update_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1)): Path<(String, String, String, String, String)>,
    UrlQuery(params): UrlQuery<UpdateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    update_impl(&state, &user, &tenant, &[&c1, &d1], params, body).await
}

pub async fn delete_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1)): Path<(String, String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    delete_impl(&state, &user, &tenant, &[&c1, &d1]).await
}

// The atomic operations are static path segments (they would otherwise
// collide with the :c2 subcollection parameter), so each gets a thin
// wrapper.

macro_rules! atomic_route {
    ($name:ident, $kind:literal) => {
        pub async fn $name(
            State(state): State<AppState>,
            Authenticated(user): Authenticated,
            Path((org, project, database, c1, d1)): Path<(String, String, String, String, String)>,
            body: Bytes,
        ) -> ApiResult<Response> {
            let tenant = tenant(&org, &project, &database);
            atomic_impl(&state, &user, &tenant, &[&c1, &d1], $kind, body).await
        }
    };
}

atomic_route!(increment_depth1, "increment");
atomic_route!(array_union_depth1, "arrayUnion");
atomic_route!(array_remove_depth1, "arrayRemove");
atomic_route!(server_timestamp_depth1, "serverTimestamp");

pub async fn subcollections_depth1(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1)): Path<(String, String, String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let address = resolve_segments(&[&c1, &d1])?;
    state
        .rules
        .validate_read(&user, &tenant.resource_name(&address.full_path().canonical_string()))
        .await?;
    let names = state
        .storage
        .list_subcollections(&tenant, &address.full_path())
        .await?;
    Ok(Json(json!({ "collections": names, "count": names.len() })).into_response())
}

// Depth-2 routes: /documents/:c1/:d1/:c2[...]

pub async fn create_depth2(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2)): Path<(String, String, String, String, String, String)>,
    UrlQuery(params): UrlQuery<CreateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    create_impl(&state, &user, &tenant, &[&c1, &d1, &c2], params, body).await
}

pub async fn list_depth2(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2)): Path<(String, String, String, String, String, String)>,
    UrlQuery(params): UrlQuery<ListParams>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    list_impl(&state, &user, &tenant, &[&c1, &d1, &c2], params).await
}

pub async fn get_depth2(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    get_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2]).await
}

pub async fn update_depth2(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    UrlQuery(params): UrlQuery<UpdateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    update_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2], params, body).await
}

pub async fn delete_depth2(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    delete_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2]).await
}

// Depth-3 routes: /documents/:c1/:d1/:c2/:d2/:c3[...]

pub async fn create_depth3(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2, c3)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    UrlQuery(params): UrlQuery<CreateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    create_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2, &c3], params, body).await
}

pub async fn list_depth3(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2, c3)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    UrlQuery(params): UrlQuery<ListParams>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    list_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2, &c3], params).await
}

pub async fn get_depth3(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2, c3, d3)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    get_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2, &c3, &d3]).await
}

pub async fn update_depth3(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2, c3, d3)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
    UrlQuery(params): UrlQuery<UpdateParams>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    update_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2, &c3, &d3], params, body).await
}

pub async fn delete_depth3(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database, c1, d1, c2, d2, c3, d3)): Path<(
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
        String,
    )>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    delete_impl(&state, &user, &tenant, &[&c1, &d1, &c2, &d2, &c3, &d3]).await
}
