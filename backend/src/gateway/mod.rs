//! MCP Streamable HTTP session gateway.
//!
//! Multiplexes JSON-RPC tool calls from the chat assistant over discrete
//! HTTP requests, keyed by the `mcp-session-id` header.
//!
//! ## Endpoints
//!
//! - `POST /gateway` - Initialize a session or send a JSON-RPC message
//! - `GET /gateway` - Open the SSE stream for server-initiated messages
//! - `DELETE /gateway` - Terminate a session
//!
//! ## Components
//!
//! - [`SessionRegistry`] owns every live [`Session`]
//! - [`IdleSweeper`] reclaims sessions idle for longer than the TTL
//! - [`StreamableTransport`] bridges one session to the wire
//! - [`ProtocolServer`] dispatches JSON-RPC methods to tools

pub mod protocol;
pub mod registry;
pub mod sweeper;
pub mod transport;

pub use protocol::{ProtocolServer, ProtocolState};
pub use registry::{new_session_id, RegistryError, Session, SessionRegistry};
pub use sweeper::{IdleSweeper, DEFAULT_SESSION_TTL};
pub use transport::{
    decode_message, DecodeError, InboundHandler, OutboundStream, StreamableTransport,
    TransportError, MESSAGE_EVENT,
};

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::tools::ToolRegistry;

/// Create sessions and route messages to them.
#[derive(Clone)]
pub struct Gateway {
    registry: SessionRegistry,
    sweeper: IdleSweeper,
    tools: Arc<ToolRegistry>,
}

impl Gateway {
    pub fn new(tools: Arc<ToolRegistry>, session_ttl: Duration) -> Self {
        let registry = SessionRegistry::new();
        let sweeper = IdleSweeper::new(registry.clone(), session_ttl);
        Self {
            registry,
            sweeper,
            tools,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn sweeper(&self) -> &IdleSweeper {
        &self.sweeper
    }

    pub fn tools(&self) -> &Arc<ToolRegistry> {
        &self.tools
    }

    /// Create and register a new session bound to `access_token`.
    ///
    /// The transport removes the session from the registry when it closes.
    pub fn create_session(&self, access_token: &str) -> Result<Arc<Session>, GatewayError> {
        let id = new_session_id();
        let transport = StreamableTransport::with_close_hook(id.clone(), self.registry.remover());
        let server = ProtocolServer::new(&transport, access_token, self.tools.clone());
        transport.register_handler(Arc::new(server))?;

        let session = self.registry.register(Session::new(id, transport))?;
        info!("Created gateway session {}", session.id());
        Ok(session)
    }

    /// Look up a session and refresh its activity timestamp.
    pub fn resume_session(&self, id: &str) -> Option<Arc<Session>> {
        let session = self.registry.get(id)?;
        session.touch();
        Some(session)
    }
}

/// Unexpected failures while setting up a session.
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_session_registers_and_close_removes() {
        let gateway = Gateway::new(Arc::new(ToolRegistry::new(vec![])), DEFAULT_SESSION_TTL);
        let session = gateway.create_session("token").unwrap();
        let id = session.id().to_string();

        assert!(gateway.registry().get(&id).is_some());

        session.transport().terminate();
        assert!(gateway.registry().get(&id).is_none());
        assert!(gateway.resume_session(&id).is_none());
    }

    #[test]
    fn test_create_session_generates_distinct_ids() {
        let gateway = Gateway::new(Arc::new(ToolRegistry::new(vec![])), DEFAULT_SESSION_TTL);
        let a = gateway.create_session("t").unwrap();
        let b = gateway.create_session("t").unwrap();
        assert_ne!(a.id(), b.id());
        assert_eq!(gateway.registry().len(), 2);
    }
}
