//! Event relay: ties subscriptions, commands, and the delayed status poll together.
//!
//! ```text
//! subscribe ──► register (gated) ──► fetch session state ──► prime handle
//! command   ──► ack "received" ──► submit upstream ──► wait poll delay
//!                                       │                    │
//!                                       ▼                    ▼
//!                                 ERROR broadcast    fetch state ──► broadcast
//! ```

use std::sync::Arc;

use authrelay_core::{Event, RequestId, SessionId};
use authrelay_upstream::{DispatchHints, IdentityProvider, UpstreamError};
use metrics::counter;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use crate::config::RelayConfig;
use crate::lifecycle::Subscription;
use crate::metrics::{COMMANDS_ACCEPTED_TOTAL, SUBSCRIPTIONS_OPENED_TOTAL};
use crate::registry::{DeliveryReport, Frame, ListenerHandle, SessionRegistry};
use crate::timer::{DelayScheduler, ScheduledTask};

/// Error code for a request without a session.
pub const MISSING_SESSION_ID: &str = "MISSING_SESSION_ID";
/// Error code for failures inside the relay itself.
pub const INTERNAL_ERROR: &str = "INTERNAL_ERROR";

/// Failure of a synchronous relay operation.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No usable session identifier was supplied.
    #[error("SessionId is required")]
    MissingSessionId,
    /// The identity provider call failed.
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    /// Serialization or another unexpected failure.
    #[error("internal relay error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSessionId => MISSING_SESSION_ID,
            Self::Upstream(e) => e.code(),
            Self::Internal(_) => INTERNAL_ERROR,
        }
    }

    /// Upstream detail, or `null`.
    pub fn detail(&self) -> Value {
        match self {
            Self::Upstream(e) => e.detail(),
            Self::MissingSessionId | Self::Internal(_) => Value::Null,
        }
    }
}

/// Immediate acknowledgement of an asynchronous command.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Accepted {
    /// Always `"received"`.
    pub status: &'static str,
    /// Correlation ID the command was forwarded with.
    pub request_id: RequestId,
}

impl Accepted {
    fn received(request_id: RequestId) -> Self {
        Self {
            status: "received",
            request_id,
        }
    }
}

/// Relay engine shared by every HTTP handler.
#[derive(Clone)]
pub struct EventRelay {
    provider: Arc<dyn IdentityProvider>,
    registry: Arc<SessionRegistry>,
    scheduler: DelayScheduler,
    config: Arc<RelayConfig>,
}

impl EventRelay {
    /// Create a relay over `provider` with a fresh registry.
    pub fn new(provider: Arc<dyn IdentityProvider>, config: RelayConfig) -> Self {
        Self::with_registry(provider, Arc::new(SessionRegistry::new()), config)
    }

    /// Create a relay over an existing registry.
    pub fn with_registry(
        provider: Arc<dyn IdentityProvider>,
        registry: Arc<SessionRegistry>,
        config: RelayConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            scheduler: DelayScheduler::new(),
            config: Arc::new(config),
        }
    }

    /// Session registry.
    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Scheduler running command and poll jobs.
    pub fn scheduler(&self) -> &DelayScheduler {
        &self.scheduler
    }

    /// Relay configuration.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Register a listener for `session_id` and push it the current session state.
    ///
    /// The bootstrap event reaches only the new listener and precedes every
    /// broadcast it sees. A failed bootstrap fetch is pushed as a single
    /// `ERROR` event and the subscription stays open.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn subscribe(
        &self,
        session_id: Option<SessionId>,
        request_id: RequestId,
    ) -> Result<Subscription, RelayError> {
        let session_id = require_session(session_id)?;
        let subscription = self.open(session_id, request_id, "stream");
        self.bootstrap(&subscription).await?;
        Ok(subscription)
    }

    /// Initial-fetch-only flow: bootstrap, then `SESSION_COMPLETE` after the
    /// completion delay, after which the stream ends.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn subscribe_snapshot(
        &self,
        session_id: Option<SessionId>,
        request_id: RequestId,
    ) -> Result<Subscription, RelayError> {
        let session_id = require_session(session_id)?;
        let subscription = self.open(session_id, request_id, "snapshot");
        self.bootstrap(&subscription).await?;

        let handle = Arc::clone(subscription.handle());
        let registry = Arc::clone(&self.registry);
        let session_id = subscription.session_id().clone();
        let _completion = self.scheduler.schedule(self.config.completion_delay, async move {
            complete(&registry, &session_id, &handle);
        });
        Ok(subscription)
    }

    /// Accept a command and process it in the background.
    ///
    /// Returns before any upstream work starts. A failed submission is
    /// broadcast as `ERROR`; a successful one is followed, after the poll
    /// delay, by a session-state fetch broadcast to whoever is subscribed then.
    pub fn submit_command(
        &self,
        session_id: Option<SessionId>,
        request_id: RequestId,
        payload: Value,
    ) -> Result<Accepted, RelayError> {
        let session_id = require_session(session_id)?;
        counter!(COMMANDS_ACCEPTED_TOTAL).increment(1);
        info!(%session_id, %request_id, "command received");

        let accepted = Accepted::received(request_id.clone());
        let relay = self.clone();
        self.scheduler
            .spawn(async move { relay.forward_command(session_id, request_id, payload).await });
        Ok(accepted)
    }

    /// Submit a command and wait for the provider's reply.
    ///
    /// On success the delayed poll is scheduled exactly as for
    /// [`submit_command`](Self::submit_command).
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub async fn submit_command_sync(
        &self,
        session_id: Option<SessionId>,
        request_id: RequestId,
        payload: Value,
    ) -> Result<Value, RelayError> {
        let session_id = require_session(session_id)?;
        counter!(COMMANDS_ACCEPTED_TOTAL).increment(1);
        let reply = self
            .provider
            .submit_command(&payload, &session_id, &request_id)
            .await?;
        let _poll = self.schedule_poll(session_id, request_id);
        Ok(reply)
    }

    /// Attributes offered by one authentication method.
    pub async fn fetch_attributes(
        &self,
        auth_method_guid: &str,
        session_id: Option<SessionId>,
        request_id: RequestId,
    ) -> Result<Value, RelayError> {
        let session_id = require_session(session_id)?;
        Ok(self
            .provider
            .fetch_attributes(auth_method_guid, &session_id, &request_id)
            .await?)
    }

    /// Support status. Missing API key and hints fall back to configured defaults.
    pub async fn fetch_support_status(
        &self,
        session_id: Option<SessionId>,
        request_id: RequestId,
        api_key: Option<String>,
        hints: DispatchHints,
    ) -> Result<Value, RelayError> {
        let session_id = require_session(session_id)?;
        let api_key = api_key.or_else(|| self.config.api_key.clone());
        let hints = hints.over(&self.config.hints);
        Ok(self
            .provider
            .fetch_support_status(&session_id, &request_id, api_key.as_deref(), &hints)
            .await?)
    }

    /// Fetch the session state now and broadcast it (or the failure as `ERROR`).
    pub async fn poll_and_broadcast(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> DeliveryReport {
        let event = match self
            .provider
            .fetch_session_state(&self.config.session_id_type, session_id, request_id)
            .await
        {
            Ok(value) => Event::from_upstream(value),
            Err(e) => {
                warn!(%session_id, %request_id, error = %e, "status poll failed");
                upstream_error_event(&e)
            }
        };
        let report = self.registry.deliver_all(session_id, &event);
        info!(
            %session_id,
            %request_id,
            event = %event.kind(),
            recipients = report.recipients,
            "status poll broadcast"
        );
        report
    }

    fn open(&self, session_id: SessionId, request_id: RequestId, flow: &'static str) -> Subscription {
        let (handle, rx) = ListenerHandle::gated(self.config.listener_queue_capacity);
        let _ = self.registry.register(&session_id, Arc::clone(&handle));
        counter!(SUBSCRIPTIONS_OPENED_TOTAL, "flow" => flow).increment(1);
        info!(%session_id, listener_id = %handle.id(), flow, "subscription opened");
        Subscription::new(Arc::clone(&self.registry), session_id, request_id, handle, rx)
    }

    async fn bootstrap(&self, subscription: &Subscription) -> Result<(), RelayError> {
        let session_id = subscription.session_id();
        let event = match self
            .provider
            .fetch_session_state(
                &self.config.session_id_type,
                session_id,
                subscription.request_id(),
            )
            .await
        {
            Ok(value) => Event::from_upstream(value),
            Err(e) => {
                warn!(%session_id, error = %e, "bootstrap fetch failed");
                upstream_error_event(&e)
            }
        };
        let frame = encode(&event)?;
        if let Err(e) = subscription.handle().prime(frame) {
            warn!(%session_id, listener_id = %subscription.listener_id(), error = %e, "bootstrap push failed");
        }
        Ok(())
    }

    async fn forward_command(self, session_id: SessionId, request_id: RequestId, payload: Value) {
        match self
            .provider
            .submit_command(&payload, &session_id, &request_id)
            .await
        {
            Ok(_) => {
                debug!(%session_id, %request_id, "command submitted, status poll scheduled");
                let _poll = self.schedule_poll(session_id, request_id);
            }
            Err(e) => {
                warn!(%session_id, %request_id, error = %e, "command submission failed");
                let _ = self.registry.deliver_all(&session_id, &upstream_error_event(&e));
            }
        }
    }

    fn schedule_poll(&self, session_id: SessionId, request_id: RequestId) -> ScheduledTask {
        let relay = self.clone();
        self.scheduler.schedule(self.config.poll_delay, async move {
            let _ = relay.poll_and_broadcast(&session_id, &request_id).await;
        })
    }
}

fn require_session(session_id: Option<SessionId>) -> Result<SessionId, RelayError> {
    session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(RelayError::MissingSessionId)
}

fn upstream_error_event(error: &UpstreamError) -> Event {
    Event::error_with_code(error.code(), error.to_string())
}

fn encode(event: &Event) -> Result<Frame, RelayError> {
    event
        .to_json()
        .map(Frame::from)
        .map_err(|e| RelayError::Internal(format!("failed to serialize event: {e}")))
}

fn complete(registry: &SessionRegistry, session_id: &SessionId, handle: &ListenerHandle) {
    match encode(&Event::session_complete()) {
        Ok(frame) => {
            if let Err(e) = handle.push(frame) {
                warn!(%session_id, listener_id = %handle.id(), error = %e, "completion push failed");
            }
        }
        Err(e) => warn!(%session_id, error = %e, "completion event not sent"),
    }
    let _ = registry.unregister(session_id, handle.id());
    handle.close();
    debug!(%session_id, listener_id = %handle.id(), "snapshot subscription completed");
}
