//! Branded ID newtypes.
//!
//! Session and request IDs are supplied by callers and carried verbatim.
//! Listener IDs are minted by the relay (UUID v7, time-ordered) and are the
//! set-membership key inside the session registry.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! branded_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create from an existing string value.
            #[must_use]
            pub fn from_string(s: String) -> Self {
                Self(s)
            }

            /// Return the inner string as a slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Consume self and return the inner `String`.
            #[must_use]
            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl std::ops::Deref for $name {
            type Target = str;
            fn deref(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> Self {
                id.0
            }
        }
    };
}

branded_id! {
    /// Externally supplied session correlation key.
    SessionId
}

branded_id! {
    /// Diagnostic correlation ID forwarded upstream as `X-RequestID`.
    RequestId
}

branded_id! {
    /// Identity of one subscribed listener handle.
    ListenerId
}

impl SessionId {
    /// Parse an optional raw value, treating blank strings as absent.
    pub fn parse(raw: Option<&str>) -> Option<Self> {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map(Self::from)
    }
}

impl RequestId {
    /// Generate a fresh request ID (UUID v7).
    #[must_use]
    pub fn generate() -> Self {
        Self(Uuid::now_v7().to_string())
    }

    /// Use the caller's request ID when present, otherwise generate one.
    pub fn or_generate(raw: Option<&str>) -> Self {
        raw.map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(Self::generate, Self::from)
    }
}

impl ListenerId {
    /// Mint a new listener ID (`listener_<uuid v7>`).
    #[must_use]
    pub fn new() -> Self {
        Self(format!("listener_{}", Uuid::now_v7()))
    }
}

impl Default for ListenerId {
    fn default() -> Self {
        Self::new()
    }
}
