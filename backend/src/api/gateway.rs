//! Gateway HTTP endpoint handlers.
//!
//! Implements the MCP Streamable HTTP transport on a single path.
//!
//! ## Endpoints
//!
//! - `POST /gateway` - Initialize a session or send a JSON-RPC message (JSON or SSE reply)
//! - `GET /gateway` - Open the SSE stream for server-initiated messages
//! - `DELETE /gateway` - Terminate a session
//!
//! Every handler first runs the idle sweeper.

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use chromedash_types::{ErrorResponse, JsonRpcRequest, JsonRpcResponse, MCP_SESSION_ID_HEADER};
use std::convert::Infallible;
use tracing::{debug, error, info, warn};

use crate::gateway::{decode_message, TransportError, MESSAGE_EVENT};
use crate::state::AppState;

const SESSION_HEADER: HeaderName = HeaderName::from_static(MCP_SESSION_ID_HEADER);

const EVENT_STREAM: &str = "text/event-stream";

fn error_response(status: StatusCode, message: &str) -> Response {
    (status, Json(ErrorResponse::new(message))).into_response()
}

/// Validate Origin header for DNS rebinding protection.
#[allow(clippy::result_large_err)]
fn validate_origin(state: &AppState, headers: &HeaderMap) -> Result<(), Response> {
    // Non-browser clients send no Origin
    let Some(origin) = headers.get(header::ORIGIN) else {
        return Ok(());
    };
    let Ok(origin) = origin.to_str() else {
        return Err(error_response(StatusCode::FORBIDDEN, "Invalid origin"));
    };

    let is_local = ["http://localhost", "https://localhost", "http://127.0.0.1", "https://127.0.0.1"]
        .iter()
        .any(|prefix| {
            origin == *prefix
                || origin
                    .strip_prefix(prefix)
                    .is_some_and(|rest| rest.starts_with(':'))
        });
    let is_allowed = state
        .options()
        .allowed_origins
        .iter()
        .any(|allowed| allowed == origin);

    if is_local || is_allowed {
        Ok(())
    } else {
        warn!("Rejecting gateway request from origin: {}", origin);
        Err(error_response(StatusCode::FORBIDDEN, "Invalid origin"))
    }
}

/// Extract session ID from headers.
fn get_session_id(headers: &HeaderMap) -> Option<String> {
    headers
        .get(MCP_SESSION_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn accept_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(header::ACCEPT).and_then(|v| v.to_str().ok())
}

/// Whether a POST reply should be an SSE stream rather than JSON.
///
/// JSON is preferred whenever the client accepts it.
#[allow(clippy::result_large_err)]
fn wants_event_stream(headers: &HeaderMap) -> Result<bool, Response> {
    let Some(accept) = accept_header(headers) else {
        return Ok(false);
    };
    let json = accept.contains("application/json")
        || accept.contains("application/*")
        || accept.contains("*/*");
    let sse = accept.contains(EVENT_STREAM);

    match (json, sse) {
        (true, _) => Ok(false),
        (false, true) => Ok(true),
        (false, false) => Err(error_response(
            StatusCode::NOT_ACCEPTABLE,
            "Client must accept application/json or text/event-stream",
        )),
    }
}

fn is_json_content_type(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim_start().starts_with("application/json"))
}

fn with_session_header(mut response: Response, session_id: &str) -> Response {
    if let Ok(hv) = HeaderValue::from_str(session_id) {
        response.headers_mut().insert(SESSION_HEADER, hv);
    }
    response
}

/// Render a single JSON-RPC response as a one-event SSE stream.
fn sse_reply(response: &JsonRpcResponse) -> Response {
    let json = serde_json::to_string(response).unwrap_or_default();
    let stream = futures::stream::once(async move {
        Ok::<_, Infallible>(Event::default().event(MESSAGE_EVENT).data(json))
    });
    Sse::new(stream).into_response()
}

fn render_reply(
    result: Result<Option<JsonRpcResponse>, TransportError>,
    session_id: &str,
    as_event_stream: bool,
) -> Response {
    let response = match result {
        Ok(Some(reply)) if as_event_stream => sse_reply(&reply),
        Ok(Some(reply)) => Json(reply).into_response(),
        Ok(None) => StatusCode::ACCEPTED.into_response(),
        Err(TransportError::Closed(_)) => {
            return error_response(StatusCode::NOT_FOUND, "Session not found")
        }
        Err(e) => {
            error!("Session {}: dispatch failed: {}", session_id, e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    with_session_header(response, session_id)
}

/// POST /gateway - Initialize a session or send a JSON-RPC message.
///
/// Without an `mcp-session-id` header the body must be an `initialize`
/// request and an access token must be resolvable; the new session id is
/// returned in the `mcp-session-id` response header.
#[utoipa::path(
    post,
    path = "/gateway",
    tag = "Gateway",
    request_body = JsonRpcRequest,
    params(
        ("mcp-session-id" = Option<String>, Header, description = "Session id; omit to initialize a new session"),
        ("Authorization" = Option<String>, Header, description = "Bearer <Workspace access token>")
    ),
    responses(
        (status = 200, description = "JSON-RPC response (JSON or text/event-stream)", body = JsonRpcResponse),
        (status = 202, description = "Notification accepted"),
        (status = 400, description = "Malformed message or missing session id", body = ErrorResponse),
        (status = 401, description = "No access token", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn gateway_post(State(state): State<AppState>, headers: HeaderMap, body: Bytes) -> Response {
    state.gateway().sweeper().sweep();

    if let Err(response) = validate_origin(&state, &headers) {
        return response;
    }
    if !is_json_content_type(&headers) {
        return error_response(
            StatusCode::UNSUPPORTED_MEDIA_TYPE,
            "Content-Type must be application/json",
        );
    }
    let as_event_stream = match wants_event_stream(&headers) {
        Ok(v) => v,
        Err(response) => return response,
    };

    let message = match decode_message(&body) {
        Ok(message) => message,
        Err(e) => {
            warn!("Gateway: rejecting malformed message: {}", e);
            return error_response(StatusCode::BAD_REQUEST, &e.to_string());
        }
    };

    let session_id = get_session_id(&headers);
    debug!(
        "Gateway POST: method={:?}, session={:?}",
        message.method(),
        session_id
    );

    if let Some(id) = session_id {
        let Some(session) = state.gateway().resume_session(&id) else {
            return error_response(StatusCode::NOT_FOUND, "Session not found");
        };
        let result = session.transport().dispatch_inbound(message).await;
        return render_reply(result, &id, as_event_stream);
    }

    let Some(token) = state.token_resolver().resolve(&headers).await else {
        warn!("Gateway: no access token for new session");
        return error_response(StatusCode::UNAUTHORIZED, "Authentication required");
    };

    if !message.is_initialize() {
        return error_response(
            StatusCode::BAD_REQUEST,
            "Bad Request: no valid session id provided",
        );
    }

    let session = match state.gateway().create_session(&token) {
        Ok(session) => session,
        Err(e) => {
            error!("Gateway: failed to create session: {}", e);
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal server error");
        }
    };
    let id = session.id().to_string();
    let transport = session.transport().clone();
    drop(session);

    let result = transport.dispatch_inbound(message).await;
    if let Ok(Some(reply)) = &result {
        if reply.is_error() {
            // A failed initialize leaves nothing behind
            warn!("Gateway: initialize failed for session {}, closing", id);
            transport.close();
            return if as_event_stream {
                sse_reply(reply)
            } else {
                Json(reply).into_response()
            };
        }
    }

    info!("Gateway: session {} initialized", id);
    render_reply(result, &id, as_event_stream)
}

/// GET /gateway - Open the SSE stream for server-initiated messages.
#[utoipa::path(
    get,
    path = "/gateway",
    tag = "Gateway",
    params(
        ("mcp-session-id" = String, Header, description = "Session id")
    ),
    responses(
        (status = 200, description = "text/event-stream of JSON-RPC messages"),
        (status = 400, description = "Missing session id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn gateway_get(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.gateway().sweeper().sweep();

    if let Err(response) = validate_origin(&state, &headers) {
        return response;
    }

    let Some(session_id) = get_session_id(&headers) else {
        return error_response(
            StatusCode::BAD_REQUEST,
            "mcp-session-id header required for SSE stream",
        );
    };
    let Some(session) = state.gateway().resume_session(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    };

    if let Some(accept) = accept_header(&headers) {
        if !accept.contains(EVENT_STREAM) && !accept.contains("*/*") {
            return error_response(
                StatusCode::NOT_ACCEPTABLE,
                "Client must accept text/event-stream",
            );
        }
    }

    let stream = match session.transport().attach_outbound_stream() {
        Ok(stream) => stream,
        Err(_) => return error_response(StatusCode::NOT_FOUND, "Session not found"),
    };
    info!("Gateway: SSE stream opened for session {}", session_id);

    let response = Sse::new(stream)
        .keep_alive(KeepAlive::new().interval(state.options().keep_alive))
        .into_response();
    with_session_header(response, &session_id)
}

/// DELETE /gateway - Terminate a session.
#[utoipa::path(
    delete,
    path = "/gateway",
    tag = "Gateway",
    params(
        ("mcp-session-id" = String, Header, description = "Session id")
    ),
    responses(
        (status = 200, description = "Session terminated"),
        (status = 400, description = "Missing session id", body = ErrorResponse),
        (status = 404, description = "Session not found", body = ErrorResponse)
    )
)]
pub async fn gateway_delete(State(state): State<AppState>, headers: HeaderMap) -> Response {
    state.gateway().sweeper().sweep();

    if let Err(response) = validate_origin(&state, &headers) {
        return response;
    }

    let Some(session_id) = get_session_id(&headers) else {
        return error_response(StatusCode::BAD_REQUEST, "mcp-session-id header required");
    };
    let Some(session) = state.gateway().resume_session(&session_id) else {
        return error_response(StatusCode::NOT_FOUND, "Session not found");
    };

    session.transport().terminate();
    info!("Gateway: session terminated: {}", session_id);
    StatusCode::OK.into_response()
}
