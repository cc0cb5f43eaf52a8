//! HTTP handlers: SSE subscription streams, command intake, pass-through lookups.

use std::collections::HashMap;
use std::convert::Infallible;
use std::time::{Duration, Instant};

use authrelay_core::{Event, RequestId, SessionId};
use authrelay_upstream::DispatchHints;
use authrelay_upstream::client::{API_KEY_HEADER, LABELS_HEADER, REQUEST_ID_HEADER, SESSION_ID_HEADER};
use axum::Json;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use futures::{Stream, StreamExt};
use metrics_exporter_prometheus::PrometheusHandle;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::health::{self, HealthResponse};
use crate::relay::{Accepted, EventRelay, RelayError};

/// Query parameter carrying the session when the header is absent.
pub const SESSION_ID_QUERY: &str = "sessionId";
/// Query parameter carrying the request ID when the header is absent.
pub const REQUEST_ID_QUERY: &str = "requestId";

/// Error code for a request body that is not acceptable JSON.
pub const INVALID_BODY: &str = "INVALID_BODY";

const RESERVED_QUERY: &[&str] = &[SESSION_ID_QUERY, REQUEST_ID_QUERY];

/// Shared state accessible from Axum handlers.
#[derive(Clone)]
pub struct AppState {
    /// Relay engine.
    pub relay: EventRelay,
    /// Prometheus handle, when a recorder is installed.
    pub metrics: Option<PrometheusHandle>,
    /// When the server started.
    pub start_time: Instant,
    /// SSE keep-alive interval.
    pub keep_alive: Duration,
    /// Cancelled when the server starts shutting down; ends open streams.
    pub shutdown: CancellationToken,
}

/// A handler failure rendered as `{"error": {"code", "message", "detail"}}`.
#[derive(Debug)]
pub enum ApiError {
    /// A relay operation failed.
    Relay(RelayError),
    /// The request body was missing, malformed, or not `application/json`.
    InvalidBody(JsonRejection),
}

impl From<RelayError> for ApiError {
    fn from(err: RelayError) -> Self {
        Self::Relay(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::InvalidBody(rejection)
    }
}

impl ApiError {
    /// HTTP status for the error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Relay(RelayError::MissingSessionId) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::Upstream(_)) => StatusCode::BAD_GATEWAY,
            Self::Relay(RelayError::Internal(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::InvalidBody(rejection) => rejection.status(),
        }
    }

    /// Machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Relay(err) => err.code(),
            Self::InvalidBody(_) => INVALID_BODY,
        }
    }

    fn message(&self) -> String {
        match self {
            Self::Relay(err) => err.to_string(),
            Self::InvalidBody(rejection) => rejection.body_text(),
        }
    }

    fn detail(&self) -> Value {
        match self {
            Self::Relay(err) => err.detail(),
            Self::InvalidBody(_) => Value::Null,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "error": {
                "code": self.code(),
                "message": self.message(),
                "detail": self.detail(),
            }
        });
        (self.status(), Json(body)).into_response()
    }
}

#[derive(Clone, Copy, Debug)]
enum Flow {
    Live,
    Snapshot,
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn session_from(headers: &HeaderMap, query: &HashMap<String, String>) -> Option<SessionId> {
    SessionId::parse(header_str(headers, SESSION_ID_HEADER))
        .or_else(|| SessionId::parse(query.get(SESSION_ID_QUERY).map(String::as_str)))
}

fn request_id_from(headers: &HeaderMap, query: &HashMap<String, String>) -> RequestId {
    RequestId::or_generate(
        header_str(headers, REQUEST_ID_HEADER)
            .or_else(|| query.get(REQUEST_ID_QUERY).map(String::as_str)),
    )
}

fn sse_event(event: &Event) -> SseEvent {
    match event.to_json() {
        Ok(json) => SseEvent::default().data(json),
        Err(e) => SseEvent::default().comment(format!("event serialization failed: {e}")),
    }
}

fn rejection_event(err: &RelayError) -> Event {
    match err {
        RelayError::MissingSessionId => Event::error(err.to_string()),
        other => Event::error_with_code(other.code(), other.to_string()),
    }
}

fn event_stream(
    state: AppState,
    flow: Flow,
    session_id: Option<SessionId>,
    request_id: RequestId,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let relay = state.relay;
    let shutdown = state.shutdown;
    let stream = async_stream::stream! {
        let opened = match flow {
            Flow::Live => relay.subscribe(session_id, request_id).await,
            Flow::Snapshot => relay.subscribe_snapshot(session_id, request_id).await,
        };
        match opened {
            Ok(subscription) => {
                let mut frames = Box::pin(subscription.into_stream(shutdown));
                while let Some(frame) = frames.next().await {
                    yield Ok::<_, Infallible>(SseEvent::default().data(&*frame));
                }
            }
            Err(e) => {
                warn!(error = %e, ?flow, "subscription rejected");
                yield Ok::<_, Infallible>(sse_event(&rejection_event(&e)));
            }
        }
    };
    Sse::new(stream).keep_alive(KeepAlive::new().interval(state.keep_alive))
}

/// GET /api/stream
pub(crate) async fn stream(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = session_from(&headers, &query);
    let request_id = request_id_from(&headers, &query);
    event_stream(state, Flow::Live, session_id, request_id)
}

/// GET /api/stream/snapshot
pub(crate) async fn stream_snapshot(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let session_id = session_from(&headers, &query);
    let request_id = request_id_from(&headers, &query);
    event_stream(state, Flow::Snapshot, session_id, request_id)
}

/// POST /api/command
pub(crate) async fn command(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Accepted>, ApiError> {
    let Json(payload) = payload?;
    let accepted = state.relay.submit_command(
        session_from(&headers, &query),
        request_id_from(&headers, &query),
        payload,
    )?;
    Ok(Json(accepted))
}

/// POST /api/command/sync
pub(crate) async fn command_sync(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
    payload: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiError> {
    let Json(payload) = payload?;
    let reply = state
        .relay
        .submit_command_sync(
            session_from(&headers, &query),
            request_id_from(&headers, &query),
            payload,
        )
        .await?;
    Ok(Json(reply))
}

/// GET /api/attributes/{authMethodGuid}
pub(crate) async fn attributes(
    State(state): State<AppState>,
    Path(auth_method_guid): Path<String>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let reply = state
        .relay
        .fetch_attributes(
            &auth_method_guid,
            session_from(&headers, &query),
            request_id_from(&headers, &query),
        )
        .await?;
    Ok(Json(reply))
}

/// GET /api/support-status
pub(crate) async fn support_status(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
    let api_key = header_str(&headers, API_KEY_HEADER)
        .map(str::trim)
        .filter(|k| !k.is_empty())
        .map(str::to_string);
    let mut hints = DispatchHints::from_query(&query, RESERVED_QUERY);
    if let Some(labels) = header_str(&headers, LABELS_HEADER).filter(|l| !l.trim().is_empty()) {
        hints = hints.with_labels(labels);
    }

    let reply = state
        .relay
        .fetch_support_status(
            session_from(&headers, &query),
            request_id_from(&headers, &query),
            api_key,
            hints,
        )
        .await?;
    Ok(Json(reply))
}

/// GET /health
pub(crate) async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(health::health_check(
        state.start_time,
        state.relay.registry(),
        state.relay.scheduler().pending(),
    ))
}

/// GET /metrics
pub(crate) async fn metrics(State(state): State<AppState>) -> Response {
    match state.metrics.as_ref() {
        Some(handle) => crate::metrics::render(handle).into_response(),
        None => (StatusCode::NOT_FOUND, "metrics recorder not installed").into_response(),
    }
}
