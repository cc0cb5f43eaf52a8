//! Server, relay, and logging settings.

use serde::{Deserialize, Serialize};

/// HTTP listener and subscription settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Per-listener outbound queue capacity (events).
    pub listener_queue_capacity: usize,
    /// Interval between SSE keep-alive comments, in seconds.
    pub keep_alive_secs: u64,
    /// Interval of the closed-listener sweep, in seconds.
    pub sweep_interval_secs: u64,
    /// How long shutdown waits for pending relay jobs, in seconds.
    pub shutdown_timeout_secs: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8787,
            listener_queue_capacity: 64,
            keep_alive_secs: 15,
            sweep_interval_secs: 60,
            shutdown_timeout_secs: 10,
        }
    }
}

/// Relay flow timing and defaults.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RelaySettings {
    /// Delay between a completed command submission and the status poll.
    pub poll_delay_ms: u64,
    /// Delay before `SESSION_COMPLETE` in the snapshot-only flow.
    pub completion_delay_ms: u64,
    /// Session ID type sent with session-state fetches.
    pub session_id_type: String,
}

impl Default for RelaySettings {
    fn default() -> Self {
        Self {
            poll_delay_ms: 1_000,
            completion_delay_ms: 500,
            session_id_type: "authRequest".to_string(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// `EnvFilter` directive used when `RUST_LOG` is unset.
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_defaults() {
        let s = ServerSettings::default();
        assert_eq!(s.host, "0.0.0.0");
        assert_eq!(s.port, 8787);
        assert_eq!(s.listener_queue_capacity, 64);
    }

    #[test]
    fn relay_defaults_match_flow_timing() {
        let r = RelaySettings::default();
        assert_eq!(r.poll_delay_ms, 1_000);
        assert_eq!(r.completion_delay_ms, 500);
    }

    #[test]
    fn partial_relay_json() {
        let r: RelaySettings = serde_json::from_str(r#"{"pollDelayMs": 250}"#).unwrap();
        assert_eq!(r.poll_delay_ms, 250);
        assert_eq!(r.session_id_type, "authRequest");
    }
}
