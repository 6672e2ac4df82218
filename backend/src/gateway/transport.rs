//! Streamable HTTP transport adapter.
//!
//! One [`StreamableTransport`] serves exactly one session. It owns the
//! outbound SSE channel (`event: message` frames carrying one JSON-RPC
//! message each) and forwards inbound messages to the single registered
//! [`InboundHandler`].
//!
//! Transport failures never propagate: a send with no attached stream, to
//! a stream whose client went away, or to a full stream is logged and
//! dropped.

use async_trait::async_trait;
use axum::response::sse::Event;
use chromedash_types::{
    IncomingMessage, JsonRpcMessage, JsonRpcRequest, JsonRpcResponse, JSONRPC_VERSION,
};
use futures::Stream;
use parking_lot::Mutex;
use serde_json::Value;
use std::convert::Infallible;
use std::fmt;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, error, info, warn};

/// SSE event name used for every outbound JSON-RPC message.
pub const MESSAGE_EVENT: &str = "message";

/// Messages buffered for a stream whose reader has fallen behind.
pub const OUTBOUND_CAPACITY: usize = 100;

type CloseHook = Box<dyn FnOnce(&str) + Send>;

/// Errors surfaced by the transport to the gateway layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("An inbound handler is already registered for session {0}")]
    HandlerAlreadyRegistered(String),

    #[error("No inbound handler registered for session {0}")]
    NoHandler(String),

    #[error("Transport for session {0} is closed")]
    Closed(String),
}

/// Reasons a POST body is not a usable JSON-RPC message.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Parse error: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Batch requests are not supported")]
    Batch,

    #[error("Unsupported jsonrpc version")]
    InvalidVersion,

    #[error("Request id must not be null")]
    NullId,

    #[error("Not a JSON-RPC message")]
    NotAMessage,
}

/// Decode and classify one JSON-RPC message from a request body.
pub fn decode_message(body: &[u8]) -> Result<IncomingMessage, DecodeError> {
    let value: Value = serde_json::from_slice(body)?;
    let object = match &value {
        Value::Object(object) => object,
        Value::Array(_) => return Err(DecodeError::Batch),
        _ => return Err(DecodeError::NotAMessage),
    };

    if object.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
        return Err(DecodeError::InvalidVersion);
    }
    let has_method = object.contains_key("method");
    let is_response = object.contains_key("result") || object.contains_key("error");
    // Only an absent id makes a notification
    let has_id = match object.get("id") {
        Some(Value::Null) if has_method => return Err(DecodeError::NullId),
        Some(_) => true,
        None => false,
    };

    if has_method {
        let request: JsonRpcRequest = serde_json::from_value(value)?;
        return Ok(if has_id {
            IncomingMessage::Request(request)
        } else {
            IncomingMessage::Notification(request)
        });
    }

    if is_response {
        return Ok(IncomingMessage::Response(serde_json::from_value(value)?));
    }

    Err(DecodeError::NotAMessage)
}

/// Receiver of inbound messages for a session.
#[async_trait]
pub trait InboundHandler: Send + Sync {
    /// Process one message. Requests yield a response, notifications do not.
    async fn handle_message(&self, message: IncomingMessage) -> Option<JsonRpcResponse>;

    /// Called once when the transport closes.
    fn on_transport_closed(&self) {}
}

struct Outbound {
    generation: u64,
    tx: mpsc::Sender<String>,
}

/// Per-session bridge between JSON-RPC messages and the HTTP wire.
pub struct StreamableTransport {
    session_id: String,
    outbound: Mutex<Option<Outbound>>,
    next_generation: AtomicU64,
    handler: OnceLock<Arc<dyn InboundHandler>>,
    on_close: Mutex<Option<CloseHook>>,
    closed: AtomicBool,
}

impl fmt::Debug for StreamableTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StreamableTransport")
            .field("session_id", &self.session_id)
            .field("stream_attached", &self.has_outbound_stream())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl StreamableTransport {
    pub fn new(session_id: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            session_id: session_id.into(),
            outbound: Mutex::new(None),
            next_generation: AtomicU64::new(0),
            handler: OnceLock::new(),
            on_close: Mutex::new(None),
            closed: AtomicBool::new(false),
        })
    }

    /// Create a transport that runs `hook` with its session id when closed.
    pub fn with_close_hook(
        session_id: impl Into<String>,
        hook: impl FnOnce(&str) + Send + 'static,
    ) -> Arc<Self> {
        let transport = Self::new(session_id);
        *transport.on_close.lock() = Some(Box::new(hook));
        transport
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn has_outbound_stream(&self) -> bool {
        self.outbound.lock().is_some()
    }

    /// Register the protocol-layer handler. Only one may ever be registered.
    pub fn register_handler(&self, handler: Arc<dyn InboundHandler>) -> Result<(), TransportError> {
        self.handler
            .set(handler)
            .map_err(|_| TransportError::HandlerAlreadyRegistered(self.session_id.clone()))
    }

    /// Bind a new outbound stream, replacing and ending any previous one.
    ///
    /// When the returned stream is dropped while it is still the attached
    /// one (the client disconnected), the transport closes.
    pub fn attach_outbound_stream(self: &Arc<Self>) -> Result<OutboundStream, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.session_id.clone()));
        }

        let (tx, rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let previous = self.outbound.lock().replace(Outbound { generation, tx });
        if previous.is_some() {
            debug!(
                "Session {}: replacing previous outbound stream",
                self.session_id
            );
        }
        drop(previous);

        info!("Session {}: outbound stream attached", self.session_id);
        Ok(OutboundStream {
            rx,
            transport: Arc::downgrade(self),
            generation,
        })
    }

    /// Write one message to the attached stream.
    ///
    /// Returns whether the message was handed to a live stream. Never fails.
    pub fn send(&self, message: impl Into<JsonRpcMessage>) -> bool {
        let message = message.into();
        let json = match serde_json::to_string(&message) {
            Ok(json) => json,
            Err(e) => {
                error!("Session {}: failed to encode message: {}", self.session_id, e);
                return false;
            }
        };

        let mut outbound = self.outbound.lock();
        let Some(current) = outbound.as_ref() else {
            error!(
                "Session {}: no outbound stream attached, dropping message",
                self.session_id
            );
            return false;
        };

        match current.tx.try_send(json) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Session {}: outbound stream is not keeping up, dropping message",
                    self.session_id
                );
                false
            }
            Err(TrySendError::Closed(_)) => {
                warn!(
                    "Session {}: outbound stream is gone, dropping message",
                    self.session_id
                );
                *outbound = None;
                false
            }
        }
    }

    /// Forward an inbound message to the registered handler.
    pub async fn dispatch_inbound(
        &self,
        message: IncomingMessage,
    ) -> Result<Option<JsonRpcResponse>, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed(self.session_id.clone()));
        }
        let handler = self
            .handler
            .get()
            .ok_or_else(|| TransportError::NoHandler(self.session_id.clone()))?
            .clone();
        Ok(handler.handle_message(message).await)
    }

    /// Handle a client termination request.
    pub fn terminate(&self) {
        info!("Session {}: termination requested", self.session_id);
        self.close();
    }

    /// Close the outbound stream and run the close hook.
    ///
    /// Infallible and idempotent: later calls are no-ops.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("Session {}: transport already closed", self.session_id);
            return;
        }

        let outbound = self.outbound.lock().take();
        if outbound.is_some() {
            debug!("Session {}: closing outbound stream", self.session_id);
        }
        drop(outbound);

        if let Some(handler) = self.handler.get() {
            handler.on_transport_closed();
        }

        let hook = self.on_close.lock().take();
        if let Some(hook) = hook {
            hook(&self.session_id);
        }

        info!("Session {}: transport closed", self.session_id);
    }

    fn outbound_dropped(&self, generation: u64) {
        let is_current = {
            let mut outbound = self.outbound.lock();
            match outbound.as_ref() {
                Some(current) if current.generation == generation => {
                    *outbound = None;
                    true
                }
                _ => false,
            }
        };

        if is_current {
            info!(
                "Session {}: client disconnected from stream",
                self.session_id
            );
            self.close();
        }
    }
}

/// The read side of an attached outbound channel, as SSE events.
pub struct OutboundStream {
    rx: mpsc::Receiver<String>,
    transport: Weak<StreamableTransport>,
    generation: u64,
}

impl Stream for OutboundStream {
    type Item = Result<Event, Infallible>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx
            .poll_recv(cx)
            .map(|message| message.map(|json| Ok(Event::default().event(MESSAGE_EVENT).data(json))))
    }
}

impl Drop for OutboundStream {
    fn drop(&mut self) {
        if let Some(transport) = self.transport.upgrade() {
            transport.outbound_dropped(self.generation);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    struct EchoHandler {
        closed: AtomicBool,
    }

    #[async_trait]
    impl InboundHandler for EchoHandler {
        async fn handle_message(&self, message: IncomingMessage) -> Option<JsonRpcResponse> {
            match message {
                IncomingMessage::Request(r) => Some(JsonRpcResponse::success(r.id, json!(r.method))),
                _ => None,
            }
        }

        fn on_transport_closed(&self) {
            self.closed.store(true, Ordering::SeqCst);
        }
    }

    fn note(n: u64) -> JsonRpcRequest {
        JsonRpcRequest::notification("notifications/message", Some(json!({ "n": n })))
    }

    #[test]
    fn test_decode_message_classifies() {
        let request = decode_message(br#"{"jsonrpc":"2.0","id":1,"method":"initialize"}"#).unwrap();
        assert!(request.is_initialize());

        let notification =
            decode_message(br#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#).unwrap();
        assert!(matches!(notification, IncomingMessage::Notification(_)));

        let response = decode_message(br#"{"jsonrpc":"2.0","id":3,"result":{}}"#).unwrap();
        assert!(matches!(response, IncomingMessage::Response(_)));
    }

    #[test]
    fn test_decode_message_rejects_malformed() {
        assert!(matches!(
            decode_message(b"{not json"),
            Err(DecodeError::InvalidJson(_))
        ));
        assert!(matches!(
            decode_message(br#"[{"jsonrpc":"2.0","id":1,"method":"ping"}]"#),
            Err(DecodeError::Batch)
        ));
        assert!(matches!(
            decode_message(br#"{"jsonrpc":"1.0","id":1,"method":"ping"}"#),
            Err(DecodeError::InvalidVersion)
        ));
        assert!(matches!(
            decode_message(br#"{"jsonrpc":"2.0","id":1}"#),
            Err(DecodeError::NotAMessage)
        ));
        assert!(matches!(
            decode_message(br#"{"jsonrpc":"2.0","id":1,"method":42}"#),
            Err(DecodeError::InvalidJson(_))
        ));
    }

    #[test]
    fn test_decode_message_null_id() {
        assert!(matches!(
            decode_message(br#"{"jsonrpc":"2.0","id":null,"method":"tools/call"}"#),
            Err(DecodeError::NullId)
        ));

        // Error responses to unparseable requests legitimately carry a null id
        let response = decode_message(
            br#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#,
        )
        .unwrap();
        assert!(matches!(response, IncomingMessage::Response(_)));

        let request = decode_message(br#"{"jsonrpc":"2.0","id":0,"method":"ping"}"#).unwrap();
        assert!(matches!(request, IncomingMessage::Request(_)));
    }

    #[test]
    fn test_send_without_stream_is_dropped() {
        let transport = StreamableTransport::new("s1");
        assert!(!transport.send(note(1)));
        assert!(!transport.is_closed());
    }

    #[tokio::test]
    async fn test_send_preserves_order() {
        let transport = StreamableTransport::new("s1");
        let mut stream = transport.attach_outbound_stream().unwrap();

        for n in 0..5 {
            assert!(transport.send(note(n)));
        }

        for n in 0..5 {
            let json = stream.rx.recv().await.unwrap();
            let value: serde_json::Value = serde_json::from_str(&json).unwrap();
            assert_eq!(value["params"]["n"], n);
        }
    }

    #[tokio::test]
    async fn test_send_drops_when_reader_falls_behind() {
        let transport = StreamableTransport::new("s1");
        let mut stream = transport.attach_outbound_stream().unwrap();

        for n in 0..OUTBOUND_CAPACITY as u64 {
            assert!(transport.send(note(n)));
        }
        assert!(!transport.send(note(999)));
        assert!(transport.has_outbound_stream());
        assert!(!transport.is_closed());

        let json = stream.rx.recv().await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["params"]["n"], 0);

        // Room again once the reader catches up
        assert!(transport.send(note(1000)));
    }

    #[tokio::test]
    async fn test_reattach_replaces_previous_stream() {
        let transport = StreamableTransport::new("s1");
        let mut first = transport.attach_outbound_stream().unwrap();
        let mut second = transport.attach_outbound_stream().unwrap();

        // Old channel has no sender left
        assert!(first.rx.recv().await.is_none());

        // Dropping the stale stream must not close the transport
        drop(first);
        assert!(!transport.is_closed());

        assert!(transport.send(note(7)));
        assert!(second.rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_dropping_current_stream_closes_transport() {
        let removed = Arc::new(AtomicUsize::new(0));
        let counter = removed.clone();
        let transport = StreamableTransport::with_close_hook("s1", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        let stream = transport.attach_outbound_stream().unwrap();
        drop(stream);

        assert!(transport.is_closed());
        assert_eq!(removed.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_second_handler_rejected() {
        let transport = StreamableTransport::new("s1");
        let handler = Arc::new(EchoHandler {
            closed: AtomicBool::new(false),
        });
        transport.register_handler(handler.clone()).unwrap();

        let err = transport.register_handler(handler).unwrap_err();
        assert!(matches!(err, TransportError::HandlerAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn test_dispatch_inbound() {
        let transport = StreamableTransport::new("s1");
        assert!(matches!(
            transport
                .dispatch_inbound(IncomingMessage::Request(JsonRpcRequest::new(
                    json!(1),
                    "ping",
                    None
                )))
                .await,
            Err(TransportError::NoHandler(_))
        ));

        transport
            .register_handler(Arc::new(EchoHandler {
                closed: AtomicBool::new(false),
            }))
            .unwrap();

        let response = transport
            .dispatch_inbound(IncomingMessage::Request(JsonRpcRequest::new(
                json!(1),
                "ping",
                None,
            )))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(response.result, Some(json!("ping")));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let transport = StreamableTransport::with_close_hook("s1", move |id| {
            assert_eq!(id, "s1");
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let handler = Arc::new(EchoHandler {
            closed: AtomicBool::new(false),
        });
        transport.register_handler(handler.clone()).unwrap();
        let mut stream = transport.attach_outbound_stream().unwrap();

        transport.close();
        transport.close();

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(handler.closed.load(Ordering::SeqCst));
        assert!(stream.rx.recv().await.is_none());
        assert!(!transport.send(note(1)));
        assert!(transport.attach_outbound_stream().is_err());
        assert!(matches!(
            transport
                .dispatch_inbound(IncomingMessage::Notification(note(1)))
                .await,
            Err(TransportError::Closed(_))
        ));
    }
}
