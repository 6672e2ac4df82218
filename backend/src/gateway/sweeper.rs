//! Idle session reclamation.
//!
//! The sweeper runs at the start of every gateway request instead of on a
//! timer, so cleanup only depends on traffic continuing to arrive.
//!
//! A session touched after the scan selected it but before it is closed is
//! still reclaimed. With a TTL of minutes against request latencies of
//! milliseconds this race is accepted.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::time::{Duration, Instant};
use tracing::{error, info};

use super::registry::SessionRegistry;

/// Default idle time before a session is reclaimed.
pub const DEFAULT_SESSION_TTL: Duration = Duration::from_secs(30 * 60);

#[derive(Clone)]
pub struct IdleSweeper {
    registry: SessionRegistry,
    ttl: Duration,
}

impl IdleSweeper {
    pub fn new(registry: SessionRegistry, ttl: Duration) -> Self {
        Self { registry, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Reclaim every session idle for longer than the TTL. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    pub fn sweep_at(&self, now: Instant) -> usize {
        let expired = self.registry.list_expired(now, self.ttl);
        for id in &expired {
            info!("Reclaiming idle session {} (ttl {:?})", id, self.ttl);
            self.reclaim(id);
        }
        expired.len()
    }

    /// Close every live session, e.g. on shutdown.
    pub fn close_all(&self) -> usize {
        let ids = self.registry.ids();
        for id in &ids {
            self.reclaim(id);
        }
        if !ids.is_empty() {
            info!("Closed {} gateway sessions", ids.len());
        }
        ids.len()
    }

    /// Close the transport, then forget the session. A failing close is logged
    /// and never stops the caller from moving on.
    fn reclaim(&self, id: &str) {
        if let Some(session) = self.registry.get(id) {
            let transport = session.transport().clone();
            if catch_unwind(AssertUnwindSafe(|| transport.close())).is_err() {
                error!("Closing transport for session {} failed", id);
            }
        }
        self.registry.remove(id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::registry::Session;
    use crate::gateway::transport::StreamableTransport;

    fn register(registry: &SessionRegistry, id: &str) -> std::sync::Arc<StreamableTransport> {
        let transport = StreamableTransport::with_close_hook(id, registry.remover());
        registry
            .register(Session::new(id, transport.clone()))
            .unwrap();
        transport
    }

    #[test]
    fn test_sweep_keeps_fresh_sessions() {
        let registry = SessionRegistry::new();
        register(&registry, "fresh");
        let sweeper = IdleSweeper::new(registry.clone(), DEFAULT_SESSION_TTL);

        assert_eq!(sweeper.sweep(), 0);
        assert!(registry.get("fresh").is_some());
    }

    #[test]
    fn test_sweep_closes_and_removes_expired() {
        let registry = SessionRegistry::new();
        let transport = register(&registry, "stale");
        let sweeper = IdleSweeper::new(registry.clone(), Duration::from_secs(60));

        let later = Instant::now() + Duration::from_secs(61);
        assert_eq!(sweeper.sweep_at(later), 1);

        assert!(transport.is_closed());
        assert!(registry.get("stale").is_none());
    }

    #[test]
    fn test_sweep_continues_after_failed_close() {
        let registry = SessionRegistry::new();
        let bad = StreamableTransport::with_close_hook("bad", |_| panic!("close failed"));
        registry.register(Session::new("bad", bad)).unwrap();
        let good = register(&registry, "good");
        let sweeper = IdleSweeper::new(registry.clone(), Duration::from_secs(1));

        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(sweeper.sweep_at(later), 2);

        assert!(good.is_closed());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_sweep_is_idempotent() {
        let registry = SessionRegistry::new();
        register(&registry, "a");
        let sweeper = IdleSweeper::new(registry.clone(), Duration::from_secs(1));

        let later = Instant::now() + Duration::from_secs(5);
        assert_eq!(sweeper.sweep_at(later), 1);
        assert_eq!(sweeper.sweep_at(later), 0);
    }

    #[test]
    fn test_close_all() {
        let registry = SessionRegistry::new();
        let a = register(&registry, "a");
        let b = register(&registry, "b");
        let sweeper = IdleSweeper::new(registry.clone(), DEFAULT_SESSION_TTL);

        assert_eq!(sweeper.close_all(), 2);
        assert!(a.is_closed() && b.is_closed());
        assert!(registry.is_empty());
    }
}
