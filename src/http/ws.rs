//! WebSocket upgrade for the listen channel.

use std::collections::HashMap;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, Query as UrlQuery, State};
use axum::http::HeaderMap;
use axum::response::{IntoResponse, Response};
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{bearer_token, AuthUser};
use crate::http::documents::tenant;
use crate::http::state::AppState;

fn token_from_upgrade(
    headers: &HeaderMap,
    params: &HashMap<String, String>,
) -> Option<String> {
    if let Some(header) = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = bearer_token(header) {
            return Some(token.to_string());
        }
    }
    let jar = CookieJar::from_headers(headers);
    if let Some(cookie) = jar.get("fs_auth_token") {
        return Some(cookie.value().to_string());
    }
    params.get("token").cloned()
}

/// `GET .../ws/listen` — upgrades to the subscription protocol. Credentials
/// may arrive with the upgrade (header, cookie, or `?token=`); connections
/// without any get the in-band authentication window.
pub async fn listen(
    State(state): State<AppState>,
    Path((org, project, database)): Path<(String, String, String)>,
    headers: HeaderMap,
    UrlQuery(params): UrlQuery<HashMap<String, String>>,
    ws: WebSocketUpgrade,
) -> Response {
    let tenant = tenant(&org, &project, &database);

    let user: Option<AuthUser> = match token_from_upgrade(&headers, &params) {
        Some(token) => match state.auth.validate_token(&token).await {
            Ok(user) => Some(user),
            Err(err) => return err.into_response(),
        },
        None => None,
    };

    let connections = state.connections.clone();
    ws.on_upgrade(move |socket| connections.serve(socket, tenant, user))
}
