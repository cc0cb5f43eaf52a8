//! Session registry: `SessionId` to the set of listener handles subscribed to it.

mod handle;

pub use handle::{DeliveryError, Frame, ListenerHandle};

use std::collections::HashMap;
use std::sync::Arc;

use authrelay_core::{Event, ListenerId, SessionId};
use metrics::{counter, gauge};
use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::metrics::{BROADCASTS_TOTAL, DELIVERIES_TOTAL, DELIVERY_DROPS_TOTAL, LISTENERS_ACTIVE};

/// Outcome of one [`SessionRegistry::deliver_all`] pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Handles registered for the session at delivery time.
    pub recipients: usize,
    /// Writes that reached a queue (or a pre-bootstrap buffer).
    pub delivered: usize,
    /// Writes that failed on a full or closed queue.
    pub failed: usize,
}

impl DeliveryReport {
    /// Whether the session had no listeners.
    pub fn is_noop(&self) -> bool {
        self.recipients == 0
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<SessionId, HashMap<ListenerId, Arc<ListenerHandle>>>,
    owners: HashMap<ListenerId, SessionId>,
}

impl Inner {
    fn detach(&mut self, session_id: &SessionId, listener_id: &ListenerId) -> bool {
        let Some(set) = self.sessions.get_mut(session_id) else {
            return false;
        };
        let removed = set.remove(listener_id).is_some();
        if set.is_empty() {
            let _ = self.sessions.remove(session_id);
        }
        if removed {
            let _ = self.owners.remove(listener_id);
        }
        removed
    }

    fn listener_total(&self) -> usize {
        self.owners.len()
    }
}

/// Thread-safe map of sessions to their listener sets.
///
/// No session key ever maps to an empty set, and a handle belongs to at
/// most one session at a time.
#[derive(Default)]
pub struct SessionRegistry {
    inner: RwLock<Inner>,
}

impl SessionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handle` to the set for `session_id`.
    ///
    /// Returns `false` if it was already registered there. A handle
    /// registered under another session is moved.
    pub fn register(&self, session_id: &SessionId, handle: Arc<ListenerHandle>) -> bool {
        let listener_id = handle.id().clone();
        let mut inner = self.inner.write();

        match inner.owners.get(&listener_id).cloned() {
            Some(owner) if &owner == session_id => return false,
            Some(previous) => {
                let _ = inner.detach(&previous, &listener_id);
                debug!(%listener_id, from = %previous, to = %session_id, "listener moved between sessions");
            }
            None => {}
        }

        let _ = inner
            .sessions
            .entry(session_id.clone())
            .or_default()
            .insert(listener_id.clone(), handle);
        let _ = inner.owners.insert(listener_id.clone(), session_id.clone());
        record_active(&inner);
        debug!(%session_id, %listener_id, "listener registered");
        true
    }

    /// Remove a handle from the set for `session_id`.
    ///
    /// Returns `false` when it was not registered there.
    pub fn unregister(&self, session_id: &SessionId, listener_id: &ListenerId) -> bool {
        let mut inner = self.inner.write();
        let removed = inner.detach(session_id, listener_id);
        if removed {
            record_active(&inner);
            debug!(%session_id, %listener_id, "listener unregistered");
        }
        removed
    }

    /// Write `event` to every handle registered for `session_id`.
    ///
    /// Serializes once. A failed write is counted and logged; the handle
    /// stays registered until its lifecycle removes it.
    pub fn deliver_all(&self, session_id: &SessionId, event: &Event) -> DeliveryReport {
        let inner = self.inner.read();
        let Some(set) = inner.sessions.get(session_id) else {
            debug!(%session_id, event = %event.kind(), "no listeners for session, skipping broadcast");
            return DeliveryReport::default();
        };

        let frame: Frame = match event.to_json() {
            Ok(json) => Arc::from(json),
            Err(e) => {
                warn!(%session_id, event = %event.kind(), error = %e, "failed to serialize event");
                return DeliveryReport {
                    recipients: set.len(),
                    delivered: 0,
                    failed: set.len(),
                };
            }
        };

        let mut report = DeliveryReport {
            recipients: set.len(),
            ..DeliveryReport::default()
        };
        for handle in set.values() {
            match handle.push(Arc::clone(&frame)) {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(%session_id, listener_id = %handle.id(), error = %e, "failed to deliver event to listener");
                }
            }
        }
        drop(inner);

        counter!(BROADCASTS_TOTAL, "event" => event.kind().to_string()).increment(1);
        counter!(DELIVERIES_TOTAL).increment(report.delivered as u64);
        if report.failed > 0 {
            counter!(DELIVERY_DROPS_TOTAL).increment(report.failed as u64);
        }
        debug!(
            %session_id,
            event = %event.kind(),
            recipients = report.recipients,
            delivered = report.delivered,
            failed = report.failed,
            "broadcast event to session"
        );
        report
    }

    /// Remove every handle that was closed or whose receiver went away.
    ///
    /// Returns the number removed.
    pub fn sweep_closed(&self) -> usize {
        let mut inner = self.inner.write();
        let dead: Vec<(SessionId, ListenerId)> = inner
            .sessions
            .iter()
            .flat_map(|(session_id, set)| {
                set.values()
                    .filter(|h| h.is_closed())
                    .map(move |h| (session_id.clone(), h.id().clone()))
            })
            .collect();
        for (session_id, listener_id) in &dead {
            let _ = inner.detach(session_id, listener_id);
        }
        if !dead.is_empty() {
            record_active(&inner);
        }
        dead.len()
    }

    /// Number of sessions with at least one listener.
    pub fn session_count(&self) -> usize {
        self.inner.read().sessions.len()
    }

    /// Number of listeners registered for `session_id`.
    #[cfg(test)]
    pub(crate) fn listener_count(&self, session_id: &SessionId) -> usize {
        self.inner
            .read()
            .sessions
            .get(session_id)
            .map_or(0, HashMap::len)
    }

    /// Number of listeners across all sessions.
    pub fn total_listeners(&self) -> usize {
        self.inner.read().listener_total()
    }

    /// Whether `session_id` has a live entry.
    #[cfg(test)]
    pub(crate) fn contains_session(&self, session_id: &SessionId) -> bool {
        self.inner.read().sessions.contains_key(session_id)
    }
}

#[allow(clippy::cast_precision_loss)]
fn record_active(inner: &Inner) {
    gauge!(LISTENERS_ACTIVE).set(inner.listener_total() as f64);
}

#[cfg(test)]
mod tests {
    use super::*;
    use authrelay_core::EventKind;
    use tokio::sync::mpsc;

    fn sid(raw: &str) -> SessionId {
        SessionId::from(raw)
    }

    fn listener(capacity: usize) -> (Arc<ListenerHandle>, mpsc::Receiver<Frame>) {
        ListenerHandle::channel(capacity)
    }

    #[test]
    fn deliver_to_unknown_session_is_noop() {
        let registry = SessionRegistry::new();
        let report = registry.deliver_all(&sid("nobody"), &Event::session_complete());
        assert!(report.is_noop());
        assert_eq!(report, DeliveryReport::default());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn register_creates_entry() {
        let registry = SessionRegistry::new();
        let (h, _rx) = listener(4);
        assert!(registry.register(&sid("1"), h));
        assert!(registry.contains_session(&sid("1")));
        assert_eq!(registry.listener_count(&sid("1")), 1);
    }

    #[test]
    fn register_is_idempotent() {
        let registry = SessionRegistry::new();
        let (h, mut rx) = listener(4);
        assert!(registry.register(&sid("1"), Arc::clone(&h)));
        assert!(!registry.register(&sid("1"), Arc::clone(&h)));
        assert_eq!(registry.listener_count(&sid("1")), 1);

        let report = registry.deliver_all(&sid("1"), &Event::session_complete());
        assert_eq!(report.delivered, 1);
        assert!(rx.try_recv().is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unregister_last_listener_removes_session() {
        let registry = SessionRegistry::new();
        let (h, _rx) = listener(4);
        let id = h.id().clone();
        let _ = registry.register(&sid("1"), h);
        assert!(registry.unregister(&sid("1"), &id));
        assert!(!registry.contains_session(&sid("1")));
        assert_eq!(registry.session_count(), 0);
        assert_eq!(registry.total_listeners(), 0);
    }

    #[test]
    fn unregister_absent_is_noop() {
        let registry = SessionRegistry::new();
        let (h, _rx) = listener(4);
        assert!(!registry.unregister(&sid("1"), h.id()));

        let _ = registry.register(&sid("1"), Arc::clone(&h));
        assert!(!registry.unregister(&sid("2"), h.id()));
        assert_eq!(registry.listener_count(&sid("1")), 1);
    }

    #[test]
    fn net_effect_of_mixed_sequence() {
        let registry = SessionRegistry::new();
        let (a, mut ra) = listener(4);
        let (b, mut rb) = listener(4);
        let (c, mut rc) = listener(4);

        let _ = registry.register(&sid("s"), Arc::clone(&a));
        let _ = registry.register(&sid("s"), Arc::clone(&b));
        let _ = registry.unregister(&sid("s"), a.id());
        let _ = registry.register(&sid("s"), Arc::clone(&c));
        let _ = registry.register(&sid("s"), Arc::clone(&a));
        let _ = registry.unregister(&sid("s"), b.id());
        let _ = registry.unregister(&sid("s"), b.id());

        assert_eq!(registry.listener_count(&sid("s")), 2);
        let report = registry.deliver_all(&sid("s"), &Event::session_complete());
        assert_eq!(report.recipients, 2);
        assert!(ra.try_recv().is_ok());
        assert!(rc.try_recv().is_ok());
        assert!(rb.try_recv().is_err());
    }

    #[test]
    fn register_under_new_session_moves_handle() {
        let registry = SessionRegistry::new();
        let (h, _rx) = listener(4);
        let _ = registry.register(&sid("old"), Arc::clone(&h));
        assert!(registry.register(&sid("new"), Arc::clone(&h)));

        assert!(!registry.contains_session(&sid("old")));
        assert_eq!(registry.listener_count(&sid("new")), 1);
        assert!(registry.unregister(&sid("new"), h.id()));
        assert_eq!(registry.total_listeners(), 1);
    }

    #[test]
    fn broadcast_reaches_only_that_session() {
        let registry = SessionRegistry::new();
        let (a1, mut ra1) = listener(4);
        let (a2, mut ra2) = listener(4);
        let (b1, mut rb1) = listener(4);
        let _ = registry.register(&sid("a"), a1);
        let _ = registry.register(&sid("a"), a2);
        let _ = registry.register(&sid("b"), b1);

        let report = registry.deliver_all(&sid("a"), &Event::session_data(serde_json::json!({"n": 1})));
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert_eq!(report.failed, 0);

        let first: Event = serde_json::from_str(&ra1.try_recv().unwrap()).unwrap();
        assert_eq!(first.kind(), &EventKind::SessionData);
        assert!(ra2.try_recv().is_ok());
        assert!(rb1.try_recv().is_err());
    }

    #[test]
    fn failed_write_is_counted_not_removed() {
        let registry = SessionRegistry::new();
        let (live, mut live_rx) = listener(4);
        let (full, _full_rx) = listener(1);
        let (gone, gone_rx) = listener(4);
        drop(gone_rx);
        full.push(Arc::from("occupying")).unwrap();

        let _ = registry.register(&sid("s"), live);
        let _ = registry.register(&sid("s"), Arc::clone(&full));
        let _ = registry.register(&sid("s"), gone);

        let report = registry.deliver_all(&sid("s"), &Event::error("boom"));
        assert_eq!(report.recipients, 3);
        assert_eq!(report.delivered, 1);
        assert_eq!(report.failed, 2);
        assert!(live_rx.try_recv().is_ok());
        assert_eq!(registry.listener_count(&sid("s")), 3);
        assert_eq!(full.drop_count(), 1);
    }

    #[test]
    fn sweep_removes_closed_handles() {
        let registry = SessionRegistry::new();
        let (live, _live_rx) = listener(4);
        let (gone, gone_rx) = listener(4);
        let (closed, _closed_rx) = listener(4);
        drop(gone_rx);
        closed.close();

        let _ = registry.register(&sid("s"), live);
        let _ = registry.register(&sid("s"), gone);
        let _ = registry.register(&sid("t"), closed);

        assert_eq!(registry.sweep_closed(), 2);
        assert_eq!(registry.listener_count(&sid("s")), 1);
        assert!(!registry.contains_session(&sid("t")));
        assert_eq!(registry.sweep_closed(), 0);
    }

    #[test]
    fn concurrent_register_and_deliver() {
        let registry = Arc::new(SessionRegistry::new());
        let mut receivers = Vec::new();
        let mut threads = Vec::new();

        for i in 0..8 {
            let (h, rx) = listener(64);
            receivers.push(rx);
            let registry = Arc::clone(&registry);
            threads.push(std::thread::spawn(move || {
                let _ = registry.register(&sid("shared"), Arc::clone(&h));
                for _ in 0..10 {
                    let _ = registry.deliver_all(&sid("shared"), &Event::session_complete());
                }
                if i % 2 == 0 {
                    let _ = registry.unregister(&sid("shared"), h.id());
                }
            }));
        }
        for t in threads {
            t.join().unwrap();
        }

        assert_eq!(registry.listener_count(&sid("shared")), 4);
        assert_eq!(registry.total_listeners(), 4);
    }
}
