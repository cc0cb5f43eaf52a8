//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase", default)]`, so a
//! settings file may be partial: missing fields keep their defaults.

mod server;
mod upstream;

pub use server::*;
pub use upstream::*;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings type.
///
/// ```json
/// {
///   "server": { "port": 8787 },
///   "relay": { "pollDelayMs": 1000 },
///   "upstream": { "baseUrl": "https://idp.example/api" }
/// }
/// ```
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthRelaySettings {
    /// HTTP listener and subscription plumbing.
    pub server: ServerSettings,
    /// Relay timing and defaults.
    pub relay: RelaySettings,
    /// Identity provider connection.
    pub upstream: UpstreamSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl AuthRelaySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.listener_queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "server.listenerQueueCapacity must be at least 1".into(),
            ));
        }
        if self.upstream.base_url.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "upstream.baseUrl must not be empty".into(),
            ));
        }
        if self.relay.session_id_type.trim().is_empty() {
            return Err(SettingsError::InvalidValue(
                "relay.sessionIdType must not be empty".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        AuthRelaySettings::default().validate().unwrap();
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut settings = AuthRelaySettings::default();
        settings.server.listener_queue_capacity = 0;
        assert!(matches!(
            settings.validate(),
            Err(SettingsError::InvalidValue(_))
        ));
    }

    #[test]
    fn empty_base_url_rejected() {
        let mut settings = AuthRelaySettings::default();
        settings.upstream.base_url = "  ".into();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn json_field_names_are_camel_case() {
        let json = serde_json::to_value(AuthRelaySettings::default()).unwrap();
        assert!(json["server"].get("listenerQueueCapacity").is_some());
        assert!(json["relay"].get("pollDelayMs").is_some());
        assert!(json["upstream"].get("baseUrl").is_some());
        assert!(json["logging"].get("level").is_some());
    }
}
