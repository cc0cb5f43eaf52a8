//! The event envelope pushed to subscribers.
//!
//! Wire shape:
//!
//! ```json
//! { "event": "SESSION_DATA", "created": "2026-01-01T00:00:00.000Z", "response": { ... } }
//! { "event": "ERROR", "created": "2026-01-01T00:00:00.000Z", "data": { "error": "..." } }
//! ```
//!
//! `created` carries millisecond precision on the wire, so timestamps are
//! truncated to milliseconds at construction. That keeps encode/decode
//! lossless: a subscriber decodes exactly the kind, timestamp, and payload
//! the server built.

use std::fmt;

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Value, json};

/// Event kind tag.
///
/// Unknown upstream kinds are kept verbatim in [`EventKind::Other`].
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// Session state snapshot or update.
    SessionData,
    /// The session flow finished; no further events follow.
    SessionComplete,
    /// A failure, with the reason in the `data` payload.
    Error,
    /// The user picked an authentication method.
    AuthMethodSelected,
    /// Upstream-defined kind forwarded as-is.
    Other(String),
}

impl EventKind {
    /// Wire string for this kind.
    pub fn as_str(&self) -> &str {
        match self {
            Self::SessionData => "SESSION_DATA",
            Self::SessionComplete => "SESSION_COMPLETE",
            Self::Error => "ERROR",
            Self::AuthMethodSelected => "AUTH_METHOD_SELECTED",
            Self::Other(kind) => kind,
        }
    }

    /// Parse a wire string. Never fails.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "SESSION_DATA" => Self::SessionData,
            "SESSION_COMPLETE" => Self::SessionComplete,
            "ERROR" => Self::Error,
            "AUTH_METHOD_SELECTED" => Self::AuthMethodSelected,
            other => Self::Other(other.to_owned()),
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Ok(Self::parse(&raw))
    }
}

/// Event body, keyed on the wire as `response` or `data`.
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// Upstream reply body (`response` key).
    Response(Value),
    /// Server-originated detail such as an error reason (`data` key).
    Data(Value),
}

/// An immutable, timestamped event.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "WireEvent", into = "WireEvent")]
pub struct Event {
    kind: EventKind,
    created: DateTime<Utc>,
    payload: Option<Payload>,
}

impl Event {
    /// Build an event stamped with the current time.
    pub fn new(kind: EventKind, payload: Option<Payload>) -> Self {
        Self::with_created(kind, Utc::now(), payload)
    }

    /// Build an event with an explicit creation time (truncated to ms).
    pub fn with_created(kind: EventKind, created: DateTime<Utc>, payload: Option<Payload>) -> Self {
        Self {
            kind,
            created: truncate_millis(created),
            payload,
        }
    }

    /// `SESSION_DATA` carrying an upstream session snapshot.
    pub fn session_data(response: Value) -> Self {
        Self::new(EventKind::SessionData, Some(Payload::Response(response)))
    }

    /// `SESSION_COMPLETE` with no payload.
    pub fn session_complete() -> Self {
        Self::new(EventKind::SessionComplete, None)
    }

    /// `ERROR` with `{"error": message}`.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            Some(Payload::Data(json!({ "error": message.into() }))),
        )
    }

    /// `ERROR` with a machine-readable code alongside the reason.
    pub fn error_with_code(code: &str, message: impl Into<String>) -> Self {
        Self::new(
            EventKind::Error,
            Some(Payload::Data(json!({ "error": message.into(), "code": code }))),
        )
    }

    /// `AUTH_METHOD_SELECTED` with the selection detail.
    pub fn auth_method_selected(data: Value) -> Self {
        Self::new(EventKind::AuthMethodSelected, Some(Payload::Data(data)))
    }

    /// Wrap an upstream reply.
    ///
    /// A reply that is already an event envelope (an object with a string
    /// `event` field) is forwarded with its own kind, timestamp, and
    /// payload. Anything else becomes a `SESSION_DATA` response.
    pub fn from_upstream(value: Value) -> Self {
        let kind = value.get("event").and_then(Value::as_str).map(EventKind::parse);
        let Some(kind) = kind else {
            return Self::session_data(value);
        };
        let created = value
            .get("created")
            .and_then(Value::as_str)
            .and_then(|raw| DateTime::parse_from_rfc3339(raw).ok())
            .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc));
        let payload = if let Some(response) = value.get("response") {
            Some(Payload::Response(response.clone()))
        } else {
            value.get("data").cloned().map(Payload::Data)
        };
        Self::with_created(kind, created, payload)
    }

    /// Event kind.
    pub fn kind(&self) -> &EventKind {
        &self.kind
    }

    /// Creation timestamp.
    pub fn created(&self) -> DateTime<Utc> {
        self.created
    }

    /// Event body, if any.
    pub fn payload(&self) -> Option<&Payload> {
        self.payload.as_ref()
    }

    /// Whether this is an `ERROR` event.
    pub fn is_error(&self) -> bool {
        self.kind == EventKind::Error
    }

    /// Serialize to the JSON wire form.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

fn truncate_millis(created: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(created.timestamp_millis()).unwrap_or(created)
}

#[derive(Serialize, Deserialize)]
struct WireEvent {
    event: EventKind,
    created: String,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    response: Option<Value>,
    #[serde(
        default,
        deserialize_with = "present",
        skip_serializing_if = "Option::is_none"
    )]
    data: Option<Value>,
}

/// Keeps an explicit `null` distinct from a missing key.
fn present<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<Value>, D::Error> {
    Value::deserialize(deserializer).map(Some)
}

impl From<Event> for WireEvent {
    fn from(event: Event) -> Self {
        let (response, data) = match event.payload {
            Some(Payload::Response(v)) => (Some(v), None),
            Some(Payload::Data(v)) => (None, Some(v)),
            None => (None, None),
        };
        Self {
            event: event.kind,
            created: event.created.to_rfc3339_opts(SecondsFormat::Millis, true),
            response,
            data,
        }
    }
}

impl TryFrom<WireEvent> for Event {
    type Error = String;

    fn try_from(wire: WireEvent) -> Result<Self, Self::Error> {
        let created = DateTime::parse_from_rfc3339(&wire.created)
            .map_err(|e| format!("invalid created timestamp {:?}: {e}", wire.created))?
            .with_timezone(&Utc);
        let payload = match (wire.response, wire.data) {
            (Some(_), Some(_)) => {
                return Err("event carries both `response` and `data`".to_owned());
            }
            (Some(v), None) => Some(Payload::Response(v)),
            (None, Some(v)) => Some(Payload::Data(v)),
            (None, None) => None,
        };
        Ok(Self {
            kind: wire.event,
            created: truncate_millis(created),
            payload,
        })
    }
}
