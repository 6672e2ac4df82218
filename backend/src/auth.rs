//! Access-token resolution for gateway requests.
//!
//! A Workspace OAuth access token is taken from the `Authorization: Bearer`
//! header, falling back to the token stored in the caller's cookie session.

use async_trait::async_trait;
use axum::{
    http::{header, HeaderMap, StatusCode},
    Json,
};
use chromedash_types::{TokenLoginRequest, TokenLoginResponse};
use std::str::FromStr;
use tower_sessions::cookie::Cookie;
use tower_sessions::session::Id;
use tower_sessions::{MemoryStore, Session, SessionStore};
use tracing::{debug, warn};

/// Session key holding the Workspace access token.
pub const ACCESS_TOKEN_KEY: &str = "access_token";

/// Name of the session cookie set by the session layer.
pub const SESSION_COOKIE_NAME: &str = "id";

/// Resolves the access token a new gateway session acts with.
#[async_trait]
pub trait AccessTokenResolver: Send + Sync {
    async fn resolve(&self, headers: &HeaderMap) -> Option<String>;
}

/// Extract a non-empty bearer token from the `Authorization` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|token| !token.is_empty())
        .map(str::to_string)
}

/// Bearer header first, then the cookie session in the shared store.
#[derive(Clone, Debug)]
pub struct SessionCookieResolver {
    store: MemoryStore,
}

impl SessionCookieResolver {
    pub fn new(store: MemoryStore) -> Self {
        Self { store }
    }

    async fn cookie_token(&self, headers: &HeaderMap) -> Option<String> {
        let session_id = headers
            .get_all(header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| Cookie::split_parse(v.to_string()))
            .filter_map(Result::ok)
            .find(|c| c.name() == SESSION_COOKIE_NAME)
            .map(|c| c.value().to_string())?;

        let id = match Id::from_str(&session_id) {
            Ok(id) => id,
            Err(e) => {
                debug!("Ignoring malformed session cookie: {}", e);
                return None;
            }
        };

        match self.store.load(&id).await {
            Ok(Some(record)) => record
                .data
                .get(ACCESS_TOKEN_KEY)
                .and_then(|v| v.as_str())
                .map(str::to_string),
            Ok(None) => None,
            Err(e) => {
                warn!("Failed to load cookie session: {}", e);
                None
            }
        }
    }
}

#[async_trait]
impl AccessTokenResolver for SessionCookieResolver {
    async fn resolve(&self, headers: &HeaderMap) -> Option<String> {
        if let Some(token) = bearer_token(headers) {
            return Some(token);
        }
        self.cookie_token(headers).await
    }
}

/// Store a Workspace access token in the caller's cookie session.
#[utoipa::path(
    post,
    path = "/auth/token",
    tag = "Auth",
    request_body = TokenLoginRequest,
    responses(
        (status = 200, description = "Token stored", body = TokenLoginResponse)
    )
)]
pub async fn token_login_handler(
    session: Session,
    Json(payload): Json<TokenLoginRequest>,
) -> Result<Json<TokenLoginResponse>, StatusCode> {
    let token = payload.access_token.trim();
    if token.is_empty() {
        return Ok(Json(TokenLoginResponse {
            success: false,
            message: "access_token must not be empty".to_string(),
        }));
    }

    session
        .insert(ACCESS_TOKEN_KEY, token)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(TokenLoginResponse {
        success: true,
        message: "Token stored".to_string(),
    }))
}

/// Drop the caller's cookie session.
#[utoipa::path(
    post,
    path = "/auth/logout",
    tag = "Auth",
    responses(
        (status = 200, description = "Logged out", body = TokenLoginResponse)
    )
)]
pub async fn logout_handler(session: Session) -> Result<Json<TokenLoginResponse>, StatusCode> {
    session
        .delete()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(TokenLoginResponse {
        success: true,
        message: "Logged out successfully".to_string(),
    }))
}
