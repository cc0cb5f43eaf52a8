//! Subscription lifecycle: unregister listeners when their transport closes.

use std::sync::Arc;
use std::time::Duration;

use authrelay_core::{ListenerId, RequestId, SessionId};
use futures::Stream;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::metrics::{SUBSCRIPTIONS_CLOSED_TOTAL, SWEEP_REMOVED_TOTAL};
use crate::registry::{Frame, ListenerHandle, SessionRegistry};

/// Unregisters its listener when dropped.
pub struct SubscriptionGuard {
    registry: Arc<SessionRegistry>,
    session_id: SessionId,
    listener_id: ListenerId,
}

impl SubscriptionGuard {
    /// Guard `listener_id` under `session_id`.
    pub fn new(registry: Arc<SessionRegistry>, session_id: SessionId, listener_id: ListenerId) -> Self {
        Self {
            registry,
            session_id,
            listener_id,
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let removed = self.registry.unregister(&self.session_id, &self.listener_id);
        counter!(SUBSCRIPTIONS_CLOSED_TOTAL).increment(1);
        debug!(
            session_id = %self.session_id,
            listener_id = %self.listener_id,
            removed,
            "subscription closed"
        );
    }
}

/// The receiving side of one subscriber connection.
///
/// Dropping it (for example when the HTTP client disconnects and the
/// response stream is dropped) removes the listener from the registry.
pub struct Subscription {
    session_id: SessionId,
    request_id: RequestId,
    handle: Arc<ListenerHandle>,
    rx: mpsc::Receiver<Frame>,
    _guard: SubscriptionGuard,
}

impl Subscription {
    pub(crate) fn new(
        registry: Arc<SessionRegistry>,
        session_id: SessionId,
        request_id: RequestId,
        handle: Arc<ListenerHandle>,
        rx: mpsc::Receiver<Frame>,
    ) -> Self {
        let guard = SubscriptionGuard::new(registry, session_id.clone(), handle.id().clone());
        Self {
            session_id,
            request_id,
            handle,
            rx,
            _guard: guard,
        }
    }

    /// Session this subscription listens to.
    pub fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    /// Correlation ID of the subscribing request.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// Identity of the registered listener.
    pub fn listener_id(&self) -> &ListenerId {
        self.handle.id()
    }

    pub(crate) fn handle(&self) -> &Arc<ListenerHandle> {
        &self.handle
    }

    /// Next serialized event. `None` once the handle is closed and drained.
    pub async fn recv(&mut self) -> Option<Frame> {
        self.rx.recv().await
    }

    /// Next serialized event if one is already queued.
    #[cfg(test)]
    pub(crate) fn try_recv(&mut self) -> Option<Frame> {
        self.rx.try_recv().ok()
    }

    /// Consume into a stream of frames.
    ///
    /// The stream ends when the handle is closed and drained, or as soon as
    /// `shutdown` is cancelled. Dropping the stream ends the subscription.
    pub fn into_stream(self, shutdown: CancellationToken) -> impl Stream<Item = Frame> + Send + 'static {
        let mut subscription = self;
        async_stream::stream! {
            loop {
                let next = tokio::select! {
                    biased;
                    () = shutdown.cancelled() => None,
                    frame = subscription.recv() => frame,
                };
                let Some(frame) = next else { break };
                yield frame;
            }
            debug!(
                session_id = %subscription.session_id,
                listener_id = %subscription.handle.id(),
                shutting_down = shutdown.is_cancelled(),
                "subscription stream ended"
            );
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("session_id", &self.session_id)
            .field("request_id", &self.request_id)
            .field("listener_id", self.handle.id())
            .finish_non_exhaustive()
    }
}

/// Start a background task that periodically removes closed listeners.
pub fn spawn_sweeper(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                () = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let removed = registry.sweep_closed();
                    if removed > 0 {
                        counter!(SWEEP_REMOVED_TOTAL).increment(removed as u64);
                        info!(removed, "closed listener cleanup");
                    }
                }
            }
        }
        debug!("listener sweeper stopped");
    })
}
