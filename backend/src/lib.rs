//! Chromedash gateway library.
//!
//! This module exposes the application builder for use in tests.

use axum::http::{header, HeaderName, HeaderValue, Method};
use axum::{
    routing::{get, post},
    Router,
};
use chromedash_types::MCP_SESSION_ID_HEADER;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tower_sessions::{cookie::time::Duration, Expiry, MemoryStore, SessionManagerLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

pub mod api;
pub mod auth;
pub mod config;
pub mod gateway;
pub mod logging;
pub mod openapi;
pub mod state;
pub mod tools;
pub mod workspace;

use state::AppState;

/// Create the Axum application router.
///
/// `session_store` must be the store the state's token resolver reads from,
/// so tokens bound via `/auth/token` are visible to the gateway.
pub fn create_app(state: AppState, session_store: MemoryStore) -> Router {
    create_app_with_config(state, session_store, Vec::new())
}

/// Create the Axum application router with CORS origins.
///
/// If `cors_allowed_origins` is empty, any origin is allowed.
/// Otherwise, only the specified origins are allowed.
pub fn create_app_with_config(
    state: AppState,
    session_store: MemoryStore,
    cors_allowed_origins: Vec<String>,
) -> Router {
    let session_layer = SessionManagerLayer::new(session_store)
        .with_expiry(Expiry::OnInactivity(Duration::hours(24)))
        .with_secure(false);

    // Cookie sessions only back token binding; the gateway resolves them itself
    let auth_router = Router::new()
        .route("/token", post(auth::token_login_handler))
        .route("/logout", post(auth::logout_handler))
        .layer(session_layer);

    let gateway_router = Router::new().route(
        "/gateway",
        post(api::gateway::gateway_post)
            .get(api::gateway::gateway_get)
            .delete(api::gateway::gateway_delete),
    );

    let session_header = HeaderName::from_static(MCP_SESSION_ID_HEADER);
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            session_header.clone(),
        ])
        .expose_headers([session_header]);
    let cors = if cors_allowed_origins.is_empty() {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<HeaderValue> = cors_allowed_origins
            .iter()
            .filter_map(|o| o.parse::<HeaderValue>().ok())
            .collect();
        cors.allow_origin(origins).allow_credentials(true)
    };

    Router::new()
        .route("/health", get(api::health))
        .merge(gateway_router)
        .nest("/auth", auth_router)
        .merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi::ApiDoc::openapi()),
        )
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
