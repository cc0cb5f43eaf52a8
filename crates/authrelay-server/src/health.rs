//! `/health` endpoint.

use serde::Serialize;
use std::time::Instant;

use crate::registry::SessionRegistry;

/// Health check response body.
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// Always `"ok"` when the server is running.
    pub status: &'static str,
    /// Seconds since the server started.
    pub uptime_secs: u64,
    /// Sessions with at least one listener.
    pub sessions: usize,
    /// Registered listeners across all sessions.
    pub listeners: usize,
    /// Command and poll jobs not yet finished.
    pub pending_jobs: usize,
}

/// Build a health response from live registry counters.
pub fn health_check(
    start_time: Instant,
    registry: &SessionRegistry,
    pending_jobs: usize,
) -> HealthResponse {
    HealthResponse {
        status: "ok",
        uptime_secs: start_time.elapsed().as_secs(),
        sessions: registry.session_count(),
        listeners: registry.total_listeners(),
        pending_jobs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use authrelay_core::SessionId;

    use crate::registry::ListenerHandle;

    #[test]
    fn empty_registry() {
        let resp = health_check(Instant::now(), &SessionRegistry::new(), 0);
        assert_eq!(resp.status, "ok");
        assert_eq!(resp.sessions, 0);
        assert_eq!(resp.listeners, 0);
        assert!(resp.uptime_secs < 2);
    }

    #[test]
    fn uptime_increases() {
        let start = Instant::now()
            .checked_sub(std::time::Duration::from_secs(60))
            .unwrap();
        let resp = health_check(start, &SessionRegistry::new(), 0);
        assert!(resp.uptime_secs >= 59);
    }

    #[test]
    fn counts_sessions_and_listeners() {
        let registry = SessionRegistry::new();
        let (a, _ra) = ListenerHandle::channel(1);
        let (b, _rb) = ListenerHandle::channel(1);
        let _ = registry.register(&SessionId::from("s"), Arc::clone(&a));
        let _ = registry.register(&SessionId::from("s"), Arc::clone(&b));

        let resp = health_check(Instant::now(), &registry, 3);
        assert_eq!(resp.sessions, 1);
        assert_eq!(resp.listeners, 2);
        assert_eq!(resp.pending_jobs, 3);
    }

    #[test]
    fn serialization() {
        let resp = health_check(Instant::now(), &SessionRegistry::new(), 0);
        let parsed = serde_json::to_value(&resp).unwrap();
        assert_eq!(parsed["status"], "ok");
        assert!(parsed["uptime_secs"].is_number());
        assert_eq!(parsed["listeners"], 0);
    }
}
