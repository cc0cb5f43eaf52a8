//! In-memory identity provider for relay and router tests.

use std::time::Duration;

use async_trait::async_trait;
use authrelay_core::{RequestId, SessionId};
use authrelay_upstream::{DispatchHints, IdentityProvider, UpstreamError};
use parking_lot::Mutex;
use serde_json::{Value, json};

/// One recorded provider call.
#[derive(Clone, Debug, PartialEq)]
pub(crate) enum Call {
    SessionState {
        session_id: String,
        id_type: String,
    },
    Attributes {
        guid: String,
    },
    Command {
        session_id: String,
        payload: Value,
    },
    SupportStatus {
        api_key: Option<String>,
        hints: DispatchHints,
    },
}

pub(crate) struct FakeProvider {
    state: Mutex<Result<Value, UpstreamError>>,
    command: Mutex<Result<Value, UpstreamError>>,
    state_delay: Duration,
    calls: Mutex<Vec<Call>>,
}

impl FakeProvider {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(Ok(json!({"serviceProvider": "Portal de Teste"}))),
            command: Mutex::new(Ok(json!({"accepted": true}))),
            state_delay: Duration::ZERO,
            calls: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_state(self, reply: Result<Value, UpstreamError>) -> Self {
        *self.state.lock() = reply;
        self
    }

    pub(crate) fn with_command(self, reply: Result<Value, UpstreamError>) -> Self {
        *self.command.lock() = reply;
        self
    }

    pub(crate) fn with_state_delay(mut self, delay: Duration) -> Self {
        self.state_delay = delay;
        self
    }

    pub(crate) fn set_state(&self, reply: Result<Value, UpstreamError>) {
        *self.state.lock() = reply;
    }

    pub(crate) fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub(crate) fn state_fetches(&self) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::SessionState { .. }))
            .count()
    }

    fn record(&self, call: Call) {
        self.calls.lock().push(call);
    }
}

#[async_trait]
impl IdentityProvider for FakeProvider {
    async fn fetch_session_state(
        &self,
        session_id_type: &str,
        session_id: &SessionId,
        _request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        self.record(Call::SessionState {
            session_id: session_id.to_string(),
            id_type: session_id_type.to_string(),
        });
        if !self.state_delay.is_zero() {
            tokio::time::sleep(self.state_delay).await;
        }
        self.state.lock().clone()
    }

    async fn fetch_attributes(
        &self,
        auth_method_guid: &str,
        _session_id: &SessionId,
        _request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        self.record(Call::Attributes {
            guid: auth_method_guid.to_string(),
        });
        Ok(json!({"guid": auth_method_guid, "attributes": []}))
    }

    async fn submit_command(
        &self,
        payload: &Value,
        session_id: &SessionId,
        _request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        self.record(Call::Command {
            session_id: session_id.to_string(),
            payload: payload.clone(),
        });
        self.command.lock().clone()
    }

    async fn fetch_support_status(
        &self,
        _session_id: &SessionId,
        _request_id: &RequestId,
        api_key: Option<&str>,
        hints: &DispatchHints,
    ) -> Result<Value, UpstreamError> {
        self.record(Call::SupportStatus {
            api_key: api_key.map(str::to_string),
            hints: hints.clone(),
        });
        Ok(json!({"supported": true}))
    }
}
