//! Authentication and security-rule contracts.
//!
//! The pipeline only sees two trait objects: an [`AuthProvider`] that turns
//! a bearer token into a principal and a [`SecurityRules`] evaluator asked
//! before reads and writes. The bundled implementations are the permissive
//! development defaults; production deployments supply their own.

use std::collections::HashMap;

use async_lock::RwLock;
use async_trait::async_trait;

use crate::error::{unauthorized, validation_failed, ApiResult};
use crate::model::Timestamp;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AuthUser {
    uid: String,
    email: Option<String>,
}

impl AuthUser {
    pub fn new(uid: impl Into<String>, email: Option<String>) -> Self {
        Self {
            uid: uid.into(),
            email,
        }
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn email(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

#[async_trait]
pub trait AuthProvider: Send + Sync {
    async fn validate_token(&self, token: &str) -> ApiResult<AuthUser>;
}

#[async_trait]
pub trait SecurityRules: Send + Sync {
    async fn validate_read(&self, user: &AuthUser, path: &str) -> ApiResult<()>;
    async fn validate_write(&self, user: &AuthUser, path: &str) -> ApiResult<()>;
}

/// Development auth: any non-empty token is a valid principal whose uid is
/// derived from the token itself.
#[derive(Clone, Debug, Default)]
pub struct StaticTokenAuth;

#[async_trait]
impl AuthProvider for StaticTokenAuth {
    async fn validate_token(&self, token: &str) -> ApiResult<AuthUser> {
        let token = token.trim();
        if token.is_empty() {
            return Err(unauthorized("Empty bearer token"));
        }
        let prefix: String = token.chars().take(12).collect();
        Ok(AuthUser::new(format!("user-{prefix}"), None))
    }
}

/// Development rules: every authenticated principal may read and write.
#[derive(Clone, Debug, Default)]
pub struct OpenRules;

#[async_trait]
impl SecurityRules for OpenRules {
    async fn validate_read(&self, _user: &AuthUser, _path: &str) -> ApiResult<()> {
        Ok(())
    }

    async fn validate_write(&self, _user: &AuthUser, _path: &str) -> ApiResult<()> {
        Ok(())
    }
}

/// Extracts the token from an `Authorization: Bearer ...` header value.
pub fn bearer_token(header_value: &str) -> Option<&str> {
    header_value
        .strip_prefix("Bearer ")
        .or_else(|| header_value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
}

/// A stored security-rules source for one database.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RulesDocument {
    pub source: String,
    pub updated_at: String,
}

/// In-memory registry of security-rules sources keyed by
/// `(project, database)`, backing the admin surface.
#[derive(Default)]
pub struct RulesStore {
    inner: RwLock<HashMap<(String, String), RulesDocument>>,
}

impl RulesStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self, project_id: &str, database_id: &str) -> Option<RulesDocument> {
        let inner = self.inner.read().await;
        inner
            .get(&(project_id.to_string(), database_id.to_string()))
            .cloned()
    }

    pub async fn put(
        &self,
        project_id: &str,
        database_id: &str,
        source: String,
    ) -> ApiResult<RulesDocument> {
        validate_rules_source(&source)?;
        let document = RulesDocument {
            source,
            updated_at: Timestamp::now().to_rfc3339(),
        };
        let mut inner = self.inner.write().await;
        inner.insert(
            (project_id.to_string(), database_id.to_string()),
            document.clone(),
        );
        Ok(document)
    }

    pub async fn delete(&self, project_id: &str, database_id: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner
            .remove(&(project_id.to_string(), database_id.to_string()))
            .is_some()
    }
}

/// Structural validation of a rules source: non-empty and brace-balanced.
/// Rule semantics are the evaluator's concern, not the registry's.
pub fn validate_rules_source(source: &str) -> ApiResult<()> {
    if source.trim().is_empty() {
        return Err(validation_failed("Rules source must not be empty"));
    }
    let mut depth: i64 = 0;
    for ch in source.chars() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth < 0 {
                    return Err(validation_failed("Unbalanced braces in rules source"));
                }
            }
            _ => {}
        }
    }
    if depth != 0 {
        return Err(validation_failed("Unbalanced braces in rules source"));
    }
    Ok(())
}
