//! Upstream failure taxonomy.

/// Upstream failure category: the identity provider could not be reached.
pub const UPSTREAM_UNREACHABLE: &str = "UPSTREAM_UNREACHABLE";
/// Upstream failure category: the reply body was not valid JSON.
pub const UPSTREAM_MALFORMED_RESPONSE: &str = "UPSTREAM_MALFORMED_RESPONSE";
/// Upstream failure category: the provider answered with a non-success status.
pub const UPSTREAM_STATUS_ERROR: &str = "UPSTREAM_STATUS_ERROR";

/// A failed round trip to the identity provider.
#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum UpstreamError {
    /// Connect, TLS, or timeout failure.
    #[error("identity provider unreachable: {0}")]
    Unreachable(String),
    /// 2xx reply whose body is not valid JSON.
    #[error("identity provider returned a malformed response: {0}")]
    MalformedResponse(String),
    /// Non-success status with the reply body.
    #[error("identity provider returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Raw reply body.
        body: String,
    },
}

impl UpstreamError {
    /// Machine-readable category code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => UPSTREAM_UNREACHABLE,
            Self::MalformedResponse(_) => UPSTREAM_MALFORMED_RESPONSE,
            Self::Status { .. } => UPSTREAM_STATUS_ERROR,
        }
    }

    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::Unreachable(_) => "unreachable",
            Self::MalformedResponse(_) => "malformed_response",
            Self::Status { .. } => "status_error",
        }
    }

    /// Upstream detail for structured error bodies.
    pub fn detail(&self) -> serde_json::Value {
        match self {
            Self::Unreachable(reason) | Self::MalformedResponse(reason) => {
                serde_json::Value::String(reason.clone())
            }
            Self::Status { status, body } => serde_json::json!({
                "status": status,
                "body": body,
            }),
        }
    }
}

impl From<reqwest::Error> for UpstreamError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Unreachable(err.to_string())
        }
    }
}
