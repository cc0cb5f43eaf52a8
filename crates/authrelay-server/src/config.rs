//! Server and relay configuration.

use std::time::Duration;

use authrelay_settings::AuthRelaySettings;
use authrelay_upstream::DispatchHints;

/// Configuration for the HTTP listener.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Interval between SSE keep-alive comments.
    pub keep_alive: Duration,
    /// Interval of the closed-listener sweep.
    pub sweep_interval: Duration,
    /// Upper bound on shutdown draining.
    pub shutdown_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            keep_alive: Duration::from_secs(15),
            sweep_interval: Duration::from_secs(60),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &AuthRelaySettings) -> Self {
        let server = &settings.server;
        Self {
            host: server.host.clone(),
            port: server.port,
            keep_alive: Duration::from_secs(server.keep_alive_secs.max(1)),
            sweep_interval: Duration::from_secs(server.sweep_interval_secs.max(1)),
            shutdown_timeout: Duration::from_secs(server.shutdown_timeout_secs),
        }
    }

    /// `host:port` bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Timing and defaults for [`EventRelay`](crate::relay::EventRelay).
#[derive(Clone, Debug)]
pub struct RelayConfig {
    /// Wait between a successful command submission and the status poll.
    pub poll_delay: Duration,
    /// Wait before `SESSION_COMPLETE` in the snapshot-only flow.
    pub completion_delay: Duration,
    /// `sessionIdType` sent with every session-state fetch.
    pub session_id_type: String,
    /// Outbound queue capacity of each listener handle.
    pub listener_queue_capacity: usize,
    /// API key used for support-status when the request carries none.
    pub api_key: Option<String>,
    /// Dispatch hints layered under per-request hints.
    pub hints: DispatchHints,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            poll_delay: Duration::from_millis(1_000),
            completion_delay: Duration::from_millis(500),
            session_id_type: "authRequest".into(),
            listener_queue_capacity: 64,
            api_key: None,
            hints: DispatchHints::default(),
        }
    }
}

impl RelayConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &AuthRelaySettings) -> Self {
        let upstream = &settings.upstream;
        let mut hints = upstream
            .dispatch_hints
            .iter()
            .fold(DispatchHints::new(), |hints, (key, value)| {
                hints.with_selector(key.clone(), value.clone())
            });
        hints.labels.clone_from(&upstream.labels);

        Self {
            poll_delay: Duration::from_millis(settings.relay.poll_delay_ms),
            completion_delay: Duration::from_millis(settings.relay.completion_delay_ms),
            session_id_type: settings.relay.session_id_type.clone(),
            listener_queue_capacity: settings.server.listener_queue_capacity.max(1),
            api_key: upstream.api_key.clone(),
            hints,
        }
    }
}
