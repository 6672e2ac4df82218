//! Shared types for the Chromedash gateway.
//!
//! This crate contains the JSON-RPC envelope types and HTTP API types
//! shared between the gateway server and its clients and tests.

/// Default port for the Chromedash gateway server.
pub const DEFAULT_PORT: u16 = 8080;

/// MCP protocol version the gateway negotiates.
pub const PROTOCOL_VERSION: &str = "2025-03-26";

/// Header carrying the gateway session identifier.
pub const MCP_SESSION_ID_HEADER: &str = "mcp-session-id";

pub mod api;
pub mod jsonrpc;

pub use api::{ErrorResponse, HealthResponse, TokenLoginRequest, TokenLoginResponse};
pub use jsonrpc::{
    error_codes, IncomingMessage, JsonRpcError, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse,
    JSONRPC_VERSION,
};
