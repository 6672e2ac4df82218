//! Tool executors exposed over MCP `tools/call`.
//!
//! The registry is fixed at startup. Each built-in tool wraps one or more
//! Google Workspace API calls made with the session's access token.

mod workspace;

pub use workspace::{
    ChromeActivityTool, ConnectorPoliciesTool, DlpRulesTool, EnrolledBrowsersTool, OrgUnitsTool,
};

use async_trait::async_trait;
use chromedash_types::{error_codes, JsonRpcRequest};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::debug;

use crate::gateway::StreamableTransport;
use crate::workspace::{WorkspaceClient, WorkspaceError};

/// Error type for tool execution.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Invalid arguments: {0}")]
    InvalidArguments(String),

    #[error(transparent)]
    Workspace(#[from] WorkspaceError),

    #[error("{0}")]
    Failed(String),
}

impl ToolError {
    /// JSON-RPC error code reported to the client.
    pub fn code(&self) -> i32 {
        match self {
            ToolError::UnknownTool(_) | ToolError::InvalidArguments(_) => {
                error_codes::INVALID_PARAMS
            }
            ToolError::Workspace(_) | ToolError::Failed(_) => error_codes::INTERNAL_ERROR,
        }
    }

    pub fn client_message(&self) -> String {
        match self {
            ToolError::UnknownTool(_) | ToolError::InvalidArguments(_) => self.to_string(),
            _ => format!("Tool call failed: {}", self),
        }
    }
}

/// Per-call context handed to a tool.
pub struct ToolContext {
    session_id: String,
    access_token: String,
    transport: Weak<StreamableTransport>,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        access_token: impl Into<String>,
        transport: Weak<StreamableTransport>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            access_token: access_token.into(),
            transport,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Emit an MCP log notification to the session's open stream, if any.
    pub fn log(&self, level: &str, message: impl Into<String>) {
        let Some(transport) = self.transport.upgrade() else {
            return;
        };
        if !transport.has_outbound_stream() {
            return;
        }
        transport.send(JsonRpcRequest::notification(
            "notifications/message",
            Some(json!({
                "level": level,
                "logger": "chromedash",
                "data": message.into()
            })),
        ));
    }
}

/// A named function callable through `tools/call`.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &'static str;

    fn description(&self) -> &'static str;

    /// JSON Schema of the `arguments` object.
    fn input_schema(&self) -> Value;

    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

/// Fixed set of tools, keyed by name.
pub struct ToolRegistry {
    tools: BTreeMap<&'static str, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new(tools: Vec<Arc<dyn Tool>>) -> Self {
        let tools = tools.into_iter().map(|tool| (tool.name(), tool)).collect();
        Self { tools }
    }

    /// The built-in Chrome Enterprise diagnostic tools.
    pub fn workspace(client: WorkspaceClient) -> Self {
        Self::new(vec![
            Arc::new(ChromeActivityTool::new(client.clone())),
            Arc::new(DlpRulesTool::new(client.clone())),
            Arc::new(ConnectorPoliciesTool::new(client.clone())),
            Arc::new(OrgUnitsTool::new(client.clone())),
            Arc::new(EnrolledBrowsersTool::new(client)),
        ])
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.tools.get(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool descriptors for `tools/list`.
    pub fn list(&self) -> Vec<Value> {
        self.tools
            .values()
            .map(|tool| {
                json!({
                    "name": tool.name(),
                    "description": tool.description(),
                    "inputSchema": tool.input_schema()
                })
            })
            .collect()
    }

    pub async fn call(&self, name: &str, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        debug!("Session {}: calling tool {}", ctx.session_id(), name);
        tool.call(ctx, args).await
    }
}

/// Read a required string argument.
pub(crate) fn required_str<'a>(args: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    args[key]
        .as_str()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ToolError::InvalidArguments(format!("{} is required", key)))
}

/// Read an optional string argument, rejecting non-string values.
pub(crate) fn optional_str<'a>(args: &'a Value, key: &str) -> Result<Option<&'a str>, ToolError> {
    match &args[key] {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s.as_str())),
        _ => Err(ToolError::InvalidArguments(format!("{} must be a string", key))),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Tools with canned behavior for dispatch tests.

    use super::*;

    pub struct StaticTool {
        name: &'static str,
        value: Value,
    }

    impl StaticTool {
        pub fn new(name: &'static str, value: Value) -> Self {
            Self { name, value }
        }
    }

    #[async_trait]
    impl Tool for StaticTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "Returns a fixed value"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn call(&self, _ctx: &ToolContext, _args: Value) -> Result<Value, ToolError> {
            Ok(self.value.clone())
        }
    }

    pub struct FailingTool {
        name: &'static str,
        reason: &'static str,
    }

    impl FailingTool {
        pub fn new(name: &'static str, reason: &'static str) -> Self {
            Self { name, reason }
        }
    }

    #[async_trait]
    impl Tool for FailingTool {
        fn name(&self) -> &'static str {
            self.name
        }

        fn description(&self) -> &'static str {
            "Always fails"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn call(&self, _ctx: &ToolContext, _args: Value) -> Result<Value, ToolError> {
            Err(ToolError::Failed(self.reason.to_string()))
        }
    }

    pub struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn name(&self) -> &'static str {
            "panics"
        }

        fn description(&self) -> &'static str {
            "Panics when called"
        }

        fn input_schema(&self) -> Value {
            json!({ "type": "object", "properties": {} })
        }

        async fn call(&self, _ctx: &ToolContext, _args: Value) -> Result<Value, ToolError> {
            panic!("tool exploded")
        }
    }
}
