//! Session registry.
//!
//! The authoritative in-memory table of live gateway sessions. All
//! operations take the internal lock only for the duration of a map
//! access and never while touching transport I/O.
//!
//! The registry is not durable across restarts and is local to the
//! process. Running more than one gateway instance requires sticky
//! routing by `mcp-session-id` or a shared store behind this same
//! interface.

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::transport::StreamableTransport;

type SessionMap = HashMap<String, Arc<Session>>;

/// Errors returned by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("Session already registered: {0}")]
    DuplicateId(String),
}

/// Generate a new unguessable session identifier.
pub fn new_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// A live conversation between one client and the gateway.
#[derive(Debug)]
pub struct Session {
    id: String,
    created_at: Instant,
    last_seen_at: Mutex<Instant>,
    transport: Arc<StreamableTransport>,
}

impl Session {
    pub fn new(id: impl Into<String>, transport: Arc<StreamableTransport>) -> Self {
        let now = Instant::now();
        Self {
            id: id.into(),
            created_at: now,
            last_seen_at: Mutex::new(now),
            transport,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_seen_at(&self) -> Instant {
        *self.last_seen_at.lock()
    }

    pub fn transport(&self) -> &Arc<StreamableTransport> {
        &self.transport
    }

    /// Refresh the last-activity timestamp. Never moves it backwards.
    pub fn touch(&self) {
        let now = Instant::now();
        let mut last_seen = self.last_seen_at.lock();
        if now > *last_seen {
            *last_seen = now;
        }
    }

    fn idle_for(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_seen_at())
    }
}

/// Concurrency-safe map of session id to [`Session`].
#[derive(Clone, Default)]
pub struct SessionRegistry {
    sessions: Arc<RwLock<SessionMap>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a new session. An id that is already present is left untouched.
    pub fn register(&self, session: Session) -> Result<Arc<Session>, RegistryError> {
        let mut sessions = self.sessions.write();
        if sessions.contains_key(session.id()) {
            warn!("Refusing to register duplicate session id {}", session.id());
            return Err(RegistryError::DuplicateId(session.id().to_string()));
        }
        let session = Arc::new(session);
        sessions.insert(session.id().to_string(), session.clone());
        info!(
            "Registered session {} ({} live)",
            session.id(),
            sessions.len()
        );
        Ok(session)
    }

    pub fn get(&self, id: &str) -> Option<Arc<Session>> {
        self.sessions.read().get(id).cloned()
    }

    /// Refresh a session's last-activity time. Returns false if the id is unknown.
    pub fn touch(&self, id: &str) -> bool {
        match self.sessions.read().get(id) {
            Some(session) => {
                session.touch();
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, id: &str) -> Option<Arc<Session>> {
        let removed = self.sessions.write().remove(id);
        if removed.is_some() {
            debug!("Removed session {} from registry", id);
        }
        removed
    }

    /// Ids of all sessions idle for longer than `ttl` as of `now`.
    ///
    /// Entries are not removed; the sweeper closes each transport first.
    pub fn list_expired(&self, now: Instant, ttl: Duration) -> Vec<String> {
        self.sessions
            .read()
            .values()
            .filter(|session| session.idle_for(now) > ttl)
            .map(|session| session.id().to_string())
            .collect()
    }

    pub fn ids(&self) -> Vec<String> {
        self.sessions.read().keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.sessions.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.read().is_empty()
    }

    /// A close hook that removes the session from this registry.
    ///
    /// Holds only a weak reference so a transport owned by the registry
    /// does not keep the registry alive.
    pub fn remover(&self) -> impl FnOnce(&str) + Send + 'static {
        let sessions: Weak<RwLock<SessionMap>> = Arc::downgrade(&self.sessions);
        move |id: &str| {
            if let Some(sessions) = sessions.upgrade() {
                if sessions.write().remove(id).is_some() {
                    debug!("Session {} removed on transport close", id);
                }
            }
        }
    }
}
