//! MCP JSON-RPC dispatch for a single session.
//!
//! Each session gets its own [`ProtocolServer`], bound to the access token
//! resolved when the session was created. Tool failures are returned as
//! JSON-RPC errors, never as HTTP failures.

use async_trait::async_trait;
use chromedash_types::{
    error_codes, IncomingMessage, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION,
};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Weak};
use tracing::{debug, error, info, warn};

use super::transport::{InboundHandler, StreamableTransport};
use crate::tools::{ToolContext, ToolRegistry};

/// Protocol versions the server will echo back when a client asks for them.
const SUPPORTED_PROTOCOL_VERSIONS: &[&str] = &["2025-06-18", PROTOCOL_VERSION, "2024-11-05"];

const SERVER_NAME: &str = "chromedash";

const INSTRUCTIONS: &str = "Diagnostic tools for Chrome Enterprise administrators. \
Use list_org_units to find org unit ids, then inspect connector policies, DLP rules, \
Chrome activity events and enrolled browsers.";

/// Lifecycle of a protocol session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolState {
    Uninitialized,
    /// `initialize` answered, waiting for `notifications/initialized`.
    Initializing,
    Ready,
    Closed,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InitializeParams {
    #[serde(default)]
    protocol_version: Option<String>,
    #[serde(default)]
    client_info: Option<ClientInfo>,
}

#[derive(Debug, Deserialize)]
struct ClientInfo {
    name: String,
    #[serde(default)]
    version: Option<String>,
}

/// Tool call parameters from MCP.
#[derive(Debug, Deserialize)]
struct ToolCallParams {
    name: String,
    #[serde(default)]
    arguments: Option<Value>,
}

/// JSON-RPC method dispatcher for one session.
pub struct ProtocolServer {
    session_id: String,
    access_token: String,
    tools: Arc<ToolRegistry>,
    transport: Weak<StreamableTransport>,
    state: Mutex<ProtocolState>,
}

impl ProtocolServer {
    pub fn new(
        transport: &Arc<StreamableTransport>,
        access_token: impl Into<String>,
        tools: Arc<ToolRegistry>,
    ) -> Self {
        Self {
            session_id: transport.session_id().to_string(),
            access_token: access_token.into(),
            tools,
            transport: Arc::downgrade(transport),
            state: Mutex::new(ProtocolState::Uninitialized),
        }
    }

    pub fn state(&self) -> ProtocolState {
        *self.state.lock()
    }

    async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        let state = self.state();
        debug!(
            "Session {}: handling {} in state {:?}",
            self.session_id, request.method, state
        );

        if state == ProtocolState::Closed {
            return JsonRpcResponse::error(id, error_codes::INVALID_REQUEST, "Session closed");
        }

        match request.method.as_str() {
            "initialize" => self.handle_initialize(id, request.params),
            "ping" => JsonRpcResponse::success(id, json!({})),
            "tools/list" | "tools/call" if state != ProtocolState::Ready => JsonRpcResponse::error(
                id,
                error_codes::SERVER_NOT_INITIALIZED,
                "Server not initialized",
            ),
            "tools/list" => JsonRpcResponse::success(id, json!({ "tools": self.tools.list() })),
            "tools/call" => self.handle_call_tool(id, request.params).await,
            _ => JsonRpcResponse::error(
                id,
                error_codes::METHOD_NOT_FOUND,
                format!("Method not found: {}", request.method),
            ),
        }
    }

    fn handle_initialize(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: InitializeParams = match params {
            Some(value) => match serde_json::from_value(value) {
                Ok(params) => params,
                Err(e) => {
                    return JsonRpcResponse::error(
                        id,
                        error_codes::INVALID_PARAMS,
                        format!("Invalid initialize params: {}", e),
                    )
                }
            },
            None => InitializeParams::default(),
        };

        {
            let mut state = self.state.lock();
            if *state != ProtocolState::Uninitialized {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_REQUEST,
                    "Session already initialized",
                );
            }
            *state = ProtocolState::Initializing;
        }

        let protocol_version = params
            .protocol_version
            .as_deref()
            .filter(|v| SUPPORTED_PROTOCOL_VERSIONS.contains(v))
            .unwrap_or(PROTOCOL_VERSION)
            .to_string();

        match &params.client_info {
            Some(client) => info!(
                "Session {}: initialize from {} {} (protocol {})",
                self.session_id,
                client.name,
                client.version.as_deref().unwrap_or("?"),
                protocol_version
            ),
            None => info!(
                "Session {}: initialize (protocol {})",
                self.session_id, protocol_version
            ),
        }

        JsonRpcResponse::success(
            id,
            json!({
                "protocolVersion": protocol_version,
                "capabilities": {
                    "tools": { "listChanged": false },
                    "logging": {}
                },
                "serverInfo": {
                    "name": SERVER_NAME,
                    "version": env!("CARGO_PKG_VERSION")
                },
                "instructions": INSTRUCTIONS
            }),
        )
    }

    async fn handle_call_tool(&self, id: Option<Value>, params: Option<Value>) -> JsonRpcResponse {
        let params: ToolCallParams = match serde_json::from_value(params.unwrap_or(json!({}))) {
            Ok(params) => params,
            Err(e) => {
                return JsonRpcResponse::error(
                    id,
                    error_codes::INVALID_PARAMS,
                    format!("Invalid tool call params: {}", e),
                )
            }
        };
        let args = params.arguments.unwrap_or(json!({}));

        let ctx = ToolContext::new(
            self.session_id.clone(),
            self.access_token.clone(),
            self.transport.clone(),
        );
        ctx.log("info", format!("Running tool {}", params.name));

        let outcome = AssertUnwindSafe(self.tools.call(&params.name, &ctx, args))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(value)) => {
                debug!("Session {}: tool {} succeeded", self.session_id, params.name);
                JsonRpcResponse::success(id, tool_result(value))
            }
            Ok(Err(e)) => {
                warn!(
                    "Session {}: tool {} failed: {}",
                    self.session_id, params.name, e
                );
                JsonRpcResponse::error(id, e.code(), e.client_message())
            }
            Err(_) => {
                error!(
                    "Session {}: tool {} panicked",
                    self.session_id, params.name
                );
                JsonRpcResponse::error(
                    id,
                    error_codes::INTERNAL_ERROR,
                    format!("Tool call failed: {} aborted", params.name),
                )
            }
        }
    }

    fn handle_notification(&self, notification: JsonRpcRequest) {
        match notification.method.as_str() {
            "notifications/initialized" => {
                let mut state = self.state.lock();
                match *state {
                    ProtocolState::Initializing => {
                        *state = ProtocolState::Ready;
                        info!("Session {}: ready", self.session_id);
                    }
                    ProtocolState::Ready => {
                        debug!("Session {}: duplicate initialized notification", self.session_id)
                    }
                    other => warn!(
                        "Session {}: initialized notification in state {:?}, ignoring",
                        self.session_id, other
                    ),
                }
            }
            "notifications/cancelled" => {
                debug!("Session {}: client cancelled a request", self.session_id);
            }
            method => {
                debug!("Session {}: ignoring notification {}", self.session_id, method);
            }
        }
    }
}

#[async_trait]
impl InboundHandler for ProtocolServer {
    async fn handle_message(&self, message: IncomingMessage) -> Option<JsonRpcResponse> {
        match message {
            IncomingMessage::Request(request) => Some(self.handle_request(request).await),
            IncomingMessage::Notification(notification) => {
                self.handle_notification(notification);
                None
            }
            IncomingMessage::Response(response) => {
                debug!(
                    "Session {}: ignoring client response {:?}",
                    self.session_id, response.id
                );
                None
            }
        }
    }

    fn on_transport_closed(&self) {
        *self.state.lock() = ProtocolState::Closed;
    }
}

/// Wrap a tool's return value in the MCP tool result envelope.
fn tool_result(value: Value) -> Value {
    let text = serde_json::to_string_pretty(&value).unwrap_or_else(|_| value.to_string());
    json!({
        "content": [{
            "type": "text",
            "text": text
        }],
        "structuredContent": value,
        "isError": false
    })
}
