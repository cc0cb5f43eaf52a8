//! Identity provider client.
//!
//! Every call is one round trip with no retry. The caller decides whether a
//! failure becomes an `ERROR` event or a synchronous error response.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use authrelay_core::{RequestId, SessionId};
use metrics::{counter, histogram};
use reqwest::{RequestBuilder, Url};
use serde_json::Value;
use tracing::{debug, instrument, warn};

use crate::error::UpstreamError;
use crate::hints::DispatchHints;

/// Session correlation header.
pub const SESSION_ID_HEADER: &str = "SessionId";
/// Request correlation header.
pub const REQUEST_ID_HEADER: &str = "X-RequestID";
/// API key header (support-status only).
pub const API_KEY_HEADER: &str = "X-API-Key";
/// Dispatch labels header (support-status only).
pub const LABELS_HEADER: &str = "X-Labels";

/// Upstream requests total (counter, labels: operation).
pub const UPSTREAM_REQUESTS_TOTAL: &str = "upstream_requests_total";
/// Upstream errors total (counter, labels: operation, kind).
pub const UPSTREAM_ERRORS_TOTAL: &str = "upstream_errors_total";
/// Upstream request duration seconds (histogram, labels: operation).
pub const UPSTREAM_REQUEST_DURATION_SECONDS: &str = "upstream_request_duration_seconds";

/// Operations the relay needs from the identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Current state of a session.
    async fn fetch_session_state(
        &self,
        session_id_type: &str,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError>;

    /// Attributes offered by one authentication method.
    async fn fetch_attributes(
        &self,
        auth_method_guid: &str,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError>;

    /// Submit an authentication command.
    async fn submit_command(
        &self,
        payload: &Value,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError>;

    /// Support status, routed by API key and dispatch hints.
    async fn fetch_support_status(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        api_key: Option<&str>,
        hints: &DispatchHints,
    ) -> Result<Value, UpstreamError>;
}

/// Settings for [`HttpIdentityProvider`].
#[derive(Clone, Debug)]
pub struct UpstreamConfig {
    /// Base URL every operation path is appended to.
    pub base_url: String,
    /// Whole-request timeout.
    pub timeout: Duration,
    /// `User-Agent` header value.
    pub user_agent: String,
    /// Skip TLS certificate verification (development providers only).
    pub accept_invalid_certs: bool,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8788/api/idp".into(),
            timeout: Duration::from_secs(10),
            user_agent: concat!("authrelay/", env!("CARGO_PKG_VERSION")).into(),
            accept_invalid_certs: false,
        }
    }
}

/// Failure to construct the client.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// The base URL does not parse or cannot take path segments.
    #[error("invalid upstream base URL {url:?}: {reason}")]
    InvalidBaseUrl {
        /// The rejected value.
        url: String,
        /// Why it was rejected.
        reason: String,
    },
    /// `reqwest` refused the client configuration.
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// [`IdentityProvider`] backed by `reqwest`.
pub struct HttpIdentityProvider {
    client: reqwest::Client,
    base_url: Url,
}

impl HttpIdentityProvider {
    /// Build a client for the configured provider.
    pub fn new(config: &UpstreamConfig) -> Result<Self, BuildError> {
        let base_url = Url::parse(&config.base_url).map_err(|e| BuildError::InvalidBaseUrl {
            url: config.base_url.clone(),
            reason: e.to_string(),
        })?;
        if base_url.cannot_be_a_base() {
            return Err(BuildError::InvalidBaseUrl {
                url: config.base_url.clone(),
                reason: "URL cannot be a base".into(),
            });
        }
        if config.accept_invalid_certs {
            warn!("TLS certificate verification disabled for identity provider");
        }
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(config.accept_invalid_certs)
            .build()?;
        Ok(Self { client, base_url })
    }

    /// Base URL requests are sent to.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, segments: &[&str]) -> Url {
        let mut url = self.base_url.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            let _ = path.pop_if_empty().extend(segments);
        }
        url
    }

    fn correlated(
        &self,
        request: RequestBuilder,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> RequestBuilder {
        request
            .header(SESSION_ID_HEADER, session_id.as_str())
            .header(REQUEST_ID_HEADER, request_id.as_str())
    }

    async fn execute(
        &self,
        operation: &'static str,
        request: RequestBuilder,
    ) -> Result<Value, UpstreamError> {
        let start = Instant::now();
        counter!(UPSTREAM_REQUESTS_TOTAL, "operation" => operation).increment(1);

        let result = async {
            let response = request.send().await?;
            let status = response.status();
            let body = response.text().await?;
            normalize(status.as_u16(), status.is_success(), &body)
        }
        .await;

        histogram!(UPSTREAM_REQUEST_DURATION_SECONDS, "operation" => operation)
            .record(start.elapsed().as_secs_f64());
        match &result {
            Ok(_) => debug!(operation, "upstream request succeeded"),
            Err(e) => {
                counter!(UPSTREAM_ERRORS_TOTAL, "operation" => operation, "kind" => e.error_kind())
                    .increment(1);
                warn!(operation, error = %e, "upstream request failed");
            }
        }
        result
    }
}

/// Map a reply to the single result type.
///
/// Non-2xx is a status error regardless of body; an empty 2xx body is
/// `null`; anything else must be JSON.
pub fn normalize(status: u16, success: bool, body: &str) -> Result<Value, UpstreamError> {
    if !success {
        return Err(UpstreamError::Status {
            status,
            body: body.to_owned(),
        });
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).map_err(|e| UpstreamError::MalformedResponse(e.to_string()))
}

#[async_trait]
impl IdentityProvider for HttpIdentityProvider {
    #[instrument(skip_all, fields(session_id = %session_id, request_id = %request_id))]
    async fn fetch_session_state(
        &self,
        session_id_type: &str,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        let request = self
            .client
            .get(self.endpoint(&["session"]))
            .query(&[("sessionIdType", session_id_type)]);
        let request = self.correlated(request, session_id, request_id);
        self.execute("fetch_session_state", request).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, request_id = %request_id, auth_method_guid = %auth_method_guid))]
    async fn fetch_attributes(
        &self,
        auth_method_guid: &str,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        let request = self
            .client
            .get(self.endpoint(&["attributes", auth_method_guid]));
        let request = self.correlated(request, session_id, request_id);
        self.execute("fetch_attributes", request).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, request_id = %request_id))]
    async fn submit_command(
        &self,
        payload: &Value,
        session_id: &SessionId,
        request_id: &RequestId,
    ) -> Result<Value, UpstreamError> {
        let request = self.client.post(self.endpoint(&["command"])).json(payload);
        let request = self.correlated(request, session_id, request_id);
        self.execute("submit_command", request).await
    }

    #[instrument(skip_all, fields(session_id = %session_id, request_id = %request_id))]
    async fn fetch_support_status(
        &self,
        session_id: &SessionId,
        request_id: &RequestId,
        api_key: Option<&str>,
        hints: &DispatchHints,
    ) -> Result<Value, UpstreamError> {
        let mut request = self
            .client
            .get(self.endpoint(&["support-status"]))
            .query(&hints.query_pairs());
        if let Some(key) = api_key {
            request = request.header(API_KEY_HEADER, key);
        }
        if let Some(labels) = &hints.labels {
            request = request.header(LABELS_HEADER, labels.as_str());
        }
        let request = self.correlated(request, session_id, request_id);
        self.execute("fetch_support_status", request).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider_for(server: &MockServer) -> HttpIdentityProvider {
        let config = UpstreamConfig {
            base_url: format!("{}/api/idp", server.uri()),
            timeout: Duration::from_secs(5),
            ..UpstreamConfig::default()
        };
        HttpIdentityProvider::new(&config).unwrap()
    }

    fn ids() -> (SessionId, RequestId) {
        (SessionId::from("1"), RequestId::from("req-id-123"))
    }

    #[test]
    fn normalize_empty_success_is_null() {
        assert_eq!(normalize(204, true, "").unwrap(), Value::Null);
        assert_eq!(normalize(200, true, "  \n").unwrap(), Value::Null);
    }

    #[test]
    fn normalize_failure_keeps_body() {
        let err = normalize(500, false, "{\"error\":\"boom\"}").unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 500,
                body: "{\"error\":\"boom\"}".into()
            }
        );
    }

    #[test]
    fn rejects_relative_base_url() {
        let config = UpstreamConfig {
            base_url: "not a url".into(),
            ..UpstreamConfig::default()
        };
        assert!(matches!(
            HttpIdentityProvider::new(&config),
            Err(BuildError::InvalidBaseUrl { .. })
        ));
    }

    #[test]
    fn endpoint_appends_to_base_path() {
        let config = UpstreamConfig {
            base_url: "https://idp.example/api/v1/".into(),
            ..UpstreamConfig::default()
        };
        let provider = HttpIdentityProvider::new(&config).unwrap();
        assert_eq!(
            provider.endpoint(&["attributes", "cmd guid"]).as_str(),
            "https://idp.example/api/v1/attributes/cmd%20guid"
        );
    }

    #[tokio::test]
    async fn fetch_session_state_sends_correlation_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/idp/session"))
            .and(query_param("sessionIdType", "authRequest"))
            .and(header("SessionId", "1"))
            .and(header("X-RequestID", "req-id-123"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({"sessionId": "session-id-123"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let (sid, rid) = ids();
        let value = provider_for(&server)
            .fetch_session_state("authRequest", &sid, &rid)
            .await
            .unwrap();
        assert_eq!(value["sessionId"], "session-id-123");
    }

    #[tokio::test]
    async fn status_error_carries_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/idp/attributes/cc-guid"))
            .respond_with(ResponseTemplate::new(404).set_body_string("unknown method"))
            .mount(&server)
            .await;

        let (sid, rid) = ids();
        let err = provider_for(&server)
            .fetch_attributes("cc-guid", &sid, &rid)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            UpstreamError::Status {
                status: 404,
                body: "unknown method".into()
            }
        );
    }

    #[tokio::test]
    async fn malformed_body_is_classified() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/idp/session"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
            .mount(&server)
            .await;

        let (sid, rid) = ids();
        let err = provider_for(&server)
            .fetch_session_state("authRequest", &sid, &rid)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn submit_command_posts_json_body() {
        let server = MockServer::start().await;
        let payload = json!({"authMethod": "cmd", "phone": "+351 900000000"});
        Mock::given(method("POST"))
            .and(path("/api/idp/command"))
            .and(header("SessionId", "1"))
            .and(body_json(payload.clone()))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let (sid, rid) = ids();
        let value = provider_for(&server)
            .submit_command(&payload, &sid, &rid)
            .await
            .unwrap();
        assert_eq!(value, Value::Null);
    }

    #[tokio::test]
    async fn support_status_forwards_key_labels_and_hints() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/idp/support-status"))
            .and(header("X-API-Key", "secret"))
            .and(header("X-Labels", "beta"))
            .and(query_param("scenario", "degraded"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "UP"})))
            .expect(1)
            .mount(&server)
            .await;

        let hints = DispatchHints::new()
            .with_labels("beta")
            .with_selector("scenario", "degraded");
        let (sid, rid) = ids();
        let value = provider_for(&server)
            .fetch_support_status(&sid, &rid, Some("secret"), &hints)
            .await
            .unwrap();
        assert_eq!(value["status"], "UP");
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        // Bind then drop to get a port nothing listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let config = UpstreamConfig {
            base_url: format!("http://127.0.0.1:{port}"),
            timeout: Duration::from_secs(2),
            ..UpstreamConfig::default()
        };
        let provider = HttpIdentityProvider::new(&config).unwrap();
        let (sid, rid) = ids();
        let err = provider
            .fetch_session_state("authRequest", &sid, &rid)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Unreachable(_)));
        assert_eq!(err.code(), "UPSTREAM_UNREACHABLE");
    }

    #[tokio::test]
    async fn slow_upstream_times_out_as_unreachable() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/idp/session"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"sessionId": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let config = UpstreamConfig {
            base_url: format!("{}/api/idp", server.uri()),
            timeout: Duration::from_millis(100),
            ..UpstreamConfig::default()
        };
        let provider = HttpIdentityProvider::new(&config).unwrap();
        let (sid, rid) = ids();
        let err = provider
            .fetch_session_state("authRequest", &sid, &rid)
            .await
            .unwrap_err();
        assert!(matches!(err, UpstreamError::Unreachable(_)));
        assert_eq!(err.error_kind(), "unreachable");
    }
}
