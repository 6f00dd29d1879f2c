use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum_extra::extract::cookie::CookieJar;

use crate::auth::{bearer_token, AuthProvider, AuthUser, RulesStore, SecurityRules};
use crate::config::Config;
use crate::error::{unauthorized, ApiError};
use crate::realtime::{ConnectionManager, SubscriptionRegistry};
use crate::storage::Storage;

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct AppState {
    pub storage: Arc<dyn Storage>,
    pub auth: Arc<dyn AuthProvider>,
    pub rules: Arc<dyn SecurityRules>,
    pub rules_store: Arc<RulesStore>,
    pub registry: Arc<SubscriptionRegistry>,
    pub connections: Arc<ConnectionManager>,
    pub config: Config,
}

impl AppState {
    pub fn new(
        storage: Arc<dyn Storage>,
        auth: Arc<dyn AuthProvider>,
        rules: Arc<dyn SecurityRules>,
        config: Config,
    ) -> Self {
        let registry = Arc::new(SubscriptionRegistry::new(
            Arc::clone(&storage),
            Arc::clone(&rules),
            config.subscription_channel_capacity,
            config.replay_window,
        ));
        let connections = Arc::new(ConnectionManager::new(
            Arc::clone(&registry),
            Arc::clone(&auth),
            config.clone(),
        ));
        Self {
            storage,
            auth,
            rules,
            rules_store: Arc::new(RulesStore::new()),
            registry,
            connections,
            config,
        }
    }

    /// Wires the storage change feed into the registry and starts the
    /// stale-connection reaper. Must run inside a tokio runtime.
    pub fn start_background_tasks(&self) {
        self.registry.spawn_event_pump(self.storage.change_events());
        self.connections.spawn_reaper();
    }

    /// Graceful shutdown: close every socket and subscription channel.
    pub async fn shutdown(&self) {
        self.connections.shutdown_all().await;
        self.registry.shutdown().await;
    }
}

/// Pulls the caller's token from `Authorization: Bearer` or the
/// `fs_auth_token` cookie.
pub fn token_from_parts(parts: &Parts) -> Option<String> {
    if let Some(header) = parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
    {
        if let Some(token) = bearer_token(header) {
            return Some(token.to_string());
        }
    }
    let jar = CookieJar::from_headers(&parts.headers);
    jar.get("fs_auth_token")
        .map(|cookie| cookie.value().to_string())
}

/// Extractor that rejects unauthenticated requests with 401.
pub struct Authenticated(pub AuthUser);

#[axum::async_trait]
impl FromRequestParts<AppState> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = token_from_parts(parts)
            .ok_or_else(|| unauthorized("Request carries no bearer token or auth cookie"))?;
        let user = state.auth.validate_token(&token).await?;
        Ok(Authenticated(user))
    }
}
