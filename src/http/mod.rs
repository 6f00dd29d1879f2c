//! Router assembly for the REST and WebSocket surface.

mod collections;
mod dispatch;
mod documents;
mod queries;
mod security_rules;
mod state;
mod transactions;
mod ws;

pub use state::{AppState, Authenticated};

use axum::response::IntoResponse;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::json;
use tower_http::cors::CorsLayer;

use crate::model::Timestamp;

async fn health() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "timestamp": Timestamp::now().to_rfc3339(),
    }))
}

/// The full routing tree. The colon-suffixed endpoints
/// (`documents:runQuery`, `documents:runAggregationQuery`,
/// `securityRules:validate`) cannot be expressed as route patterns, so the
/// fallback dispatcher owns them.
pub fn build_router(state: AppState) -> Router {
    let database_routes = Router::new()
        .route(
            "/documents/:c1",
            post(documents::create_depth1).get(documents::list_depth1),
        )
        .route(
            "/documents/:c1/:d1",
            get(documents::get_depth1)
                .put(documents::update_depth1)
                .delete(documents::delete_depth1),
        )
        .route(
            "/documents/:c1/:d1/subcollections",
            get(documents::subcollections_depth1),
        )
        .route("/documents/:c1/:d1/increment", post(documents::increment_depth1))
        .route("/documents/:c1/:d1/arrayUnion", post(documents::array_union_depth1))
        .route("/documents/:c1/:d1/arrayRemove", post(documents::array_remove_depth1))
        .route(
            "/documents/:c1/:d1/serverTimestamp",
            post(documents::server_timestamp_depth1),
        )
        .route(
            "/documents/:c1/:d1/:c2",
            post(documents::create_depth2).get(documents::list_depth2),
        )
        .route(
            "/documents/:c1/:d1/:c2/:d2",
            get(documents::get_depth2)
                .put(documents::update_depth2)
                .delete(documents::delete_depth2),
        )
        .route(
            "/documents/:c1/:d1/:c2/:d2/:c3",
            post(documents::create_depth3).get(documents::list_depth3),
        )
        .route(
            "/documents/:c1/:d1/:c2/:d2/:c3/:d3",
            get(documents::get_depth3)
                .put(documents::update_depth3)
                .delete(documents::delete_depth3),
        )
        .route(
            "/collections",
            get(collections::list_collections).post(collections::create_collection),
        )
        .route(
            "/collections/:collectionID",
            get(collections::get_collection)
                .put(collections::update_collection)
                .delete(collections::delete_collection),
        )
        .route(
            "/collections/:collectionID/indexes",
            post(collections::create_index).get(collections::list_indexes),
        )
        .route(
            "/collections/:collectionID/indexes/:indexID",
            delete(collections::delete_index),
        )
        .route("/batchWrite", post(transactions::batch_write))
        .route("/beginTransaction", post(transactions::begin_transaction))
        .route("/commit", post(transactions::commit_transaction))
        .route("/query/:collectionID", post(queries::legacy_query))
        .route("/ws/listen", get(ws::listen));

    Router::new()
        .route("/api/v1/health", get(health))
        .nest(
            "/api/v1/organizations/:organizationId/projects/:projectID/databases/:databaseID",
            database_routes,
        )
        .route(
            "/v1/projects/:projectID/databases/:databaseID/securityRules",
            get(security_rules::get_rules)
                .put(security_rules::put_rules)
                .delete(security_rules::delete_rules),
        )
        .fallback(dispatch::dispatch)
        .layer(CorsLayer::permissive())
        .with_state(state)
}
