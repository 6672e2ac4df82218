//! OpenAPI documentation configuration.

use chromedash_types::api::{ErrorResponse, HealthResponse, TokenLoginRequest, TokenLoginResponse};
use chromedash_types::jsonrpc::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::api::gateway::gateway_post,
        crate::api::gateway::gateway_get,
        crate::api::gateway::gateway_delete,
        crate::api::health,
        crate::auth::token_login_handler,
        crate::auth::logout_handler,
    ),
    components(
        schemas(
            JsonRpcRequest,
            JsonRpcResponse,
            JsonRpcError,
            ErrorResponse,
            HealthResponse,
            TokenLoginRequest,
            TokenLoginResponse,
        )
    ),
    tags(
        (name = "Gateway", description = "MCP Streamable HTTP session gateway"),
        (name = "Auth", description = "Access token binding for browser clients"),
        (name = "System", description = "System information endpoints")
    ),
    info(
        title = "Chromedash Gateway API",
        version = "0.3.0",
        description = "Stateful MCP gateway exposing Chrome Enterprise and Workspace admin tools",
        license(
            name = "MIT OR Apache-2.0"
        )
    )
)]
pub struct ApiDoc;
