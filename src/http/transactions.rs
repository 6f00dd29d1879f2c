//! Batch writes and the transaction surface.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use serde_json::{json, Value as JsonValue};

use crate::error::{invalid_request_body, missing_transaction_id, missing_writes, ApiResult};
use crate::http::documents::{parse_json_body, tenant};
use crate::http::state::{AppState, Authenticated};
use crate::paths::split_path;
use crate::storage::BatchWrite;
use crate::value::codec;

/// Accepts both the Firestore wire form (`{update: {name, fields}}` /
/// `{delete: name}`) and the compact `{path, fields}` form. Resource names
/// are stripped down to their database-relative path.
fn relative_path(name: &str) -> &str {
    match name.find("/documents/") {
        Some(index) => &name[index + "/documents/".len()..],
        None => name,
    }
}

fn parse_write(entry: &JsonValue) -> ApiResult<BatchWrite> {
    if let Some(delete) = entry.get("delete").and_then(JsonValue::as_str) {
        let address = split_path(relative_path(delete))?;
        return Ok(BatchWrite::Delete { address });
    }

    let (path, fields_source) = if let Some(update) = entry.get("update") {
        let name = update
            .get("name")
            .or_else(|| update.get("path"))
            .and_then(JsonValue::as_str)
            .ok_or_else(|| invalid_request_body("Write update must carry a document name"))?;
        (name, update)
    } else if let Some(path) = entry.get("path").and_then(JsonValue::as_str) {
        (path, entry)
    } else {
        return Err(invalid_request_body(
            "Write must be an update, a delete, or carry a path",
        ));
    };

    let address = split_path(relative_path(path))?;
    let fields = codec::decode_document_fields(fields_source)?;
    Ok(BatchWrite::Put { address, fields })
}

pub async fn batch_write(
    State(state): State<AppState>,
    Authenticated(user): Authenticated,
    Path((org, project, database)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;

    let entries = payload
        .get("writes")
        .and_then(JsonValue::as_array)
        .filter(|entries| !entries.is_empty())
        .ok_or_else(|| missing_writes("batchWrite requires a non-empty writes array"))?;

    let mut writes = Vec::with_capacity(entries.len());
    for entry in entries {
        let write = parse_write(entry)?;
        let path = match &write {
            BatchWrite::Put { address, .. } | BatchWrite::Delete { address } => {
                address.full_path().canonical_string()
            }
        };
        state
            .rules
            .validate_write(&user, &tenant.resource_name(&path))
            .await?;
        writes.push(write);
    }

    let outcomes = state.storage.batch_write(&tenant, writes).await?;
    let results: Vec<JsonValue> = outcomes
        .iter()
        .map(|outcome| {
            let mut entry = json!({ "success": outcome.success });
            if let Some(update_time) = outcome.update_time {
                entry["updateTime"] = json!(update_time.to_rfc3339());
            }
            if let Some(error) = &outcome.error {
                entry["error"] = json!(error);
            }
            entry
        })
        .collect();
    Ok(Json(json!({ "writeResults": results, "count": results.len() })).into_response())
}

pub async fn begin_transaction(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database)): Path<(String, String, String)>,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let transaction_id = state.storage.begin_transaction(&tenant).await?;
    Ok((
        StatusCode::OK,
        Json(json!({ "transactionID": transaction_id })),
    )
        .into_response())
}

pub async fn commit_transaction(
    State(state): State<AppState>,
    Authenticated(_user): Authenticated,
    Path((org, project, database)): Path<(String, String, String)>,
    body: Bytes,
) -> ApiResult<Response> {
    let tenant = tenant(&org, &project, &database);
    let payload = parse_json_body(&body)?;
    let transaction_id = payload
        .get("transactionID")
        .or_else(|| payload.get("transaction"))
        .and_then(JsonValue::as_str)
        .ok_or_else(missing_transaction_id)?;

    state.storage.commit_transaction(&tenant, transaction_id).await?;
    Ok(Json(json!({
        "transactionID": transaction_id,
        "status": "committed",
    }))
    .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_resource_names_to_relative_paths() {
        assert_eq!(
            relative_path("projects/p/databases/d/documents/col/doc"),
            "col/doc"
        );
        assert_eq!(relative_path("col/doc"), "col/doc");
    }

    #[test]
    fn parses_wire_and_compact_writes() {
        let wire = json!({
            "update": {
                "name": "projects/p/databases/d/documents/col/doc",
                "fields": { "n": { "integerValue": "1" } }
            }
        });
        assert!(matches!(parse_write(&wire).unwrap(), BatchWrite::Put { .. }));

        let compact = json!({ "path": "col/doc", "fields": { "n": { "integerValue": "1" } } });
        assert!(matches!(parse_write(&compact).unwrap(), BatchWrite::Put { .. }));

        let delete = json!({ "delete": "col/doc" });
        assert!(matches!(parse_write(&delete).unwrap(), BatchWrite::Delete { .. }));

        assert!(parse_write(&json!({ "nonsense": true })).is_err());
    }
}
