//! Web server module for the inbox.
//!
//! Exposes the ingestion endpoint (`POST /inbox`, multipart with a `file`
//! part and optional `from` / `subject` fields) behind per-source rate
//! limiting, plus a liveness probe.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{
        ConnectInfo, DefaultBodyLimit, Multipart, Request, State,
        multipart::{Field, MultipartError},
    },
    http::{Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use serde::Serialize;
use thiserror::Error;
use tower_http::trace::{DefaultMakeSpan, TraceLayer};

use crate::dispatcher::Dispatcher;
use crate::limiter::RateLimiter;
use crate::record::Record;
use crate::store::{RecordStore, StoreError};

/// Default maximum payload size (5 MiB).
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 5 * 1024 * 1024;

/// Extra request body allowance for multipart framing and text fields.
const MULTIPART_OVERHEAD: usize = 64 * 1024;

/// Rate-limit key used when the peer address is unknown.
const UNKNOWN_SOURCE: &str = "unknown";

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn RecordStore>,
    pub dispatcher: Arc<Dispatcher>,
    pub limiter: Arc<RateLimiter>,
    /// Maximum accepted payload in bytes; zero disables the check.
    pub max_payload_size: usize,
}

/// Ingestion failures and their HTTP mapping.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Source exceeded its admission rate.
    #[error("rate limited")]
    RateLimited,

    /// Request has no `file` part.
    #[error("missing file part")]
    MissingFile,

    /// Malformed multipart body.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Payload larger than the configured limit.
    #[error("file size exceeds the limit")]
    PayloadTooLarge,

    /// Persisting the record failed.
    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

impl IngestError {
    fn status(&self) -> StatusCode {
        match self {
            Self::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            Self::MissingFile | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<MultipartError> for IngestError {
    fn from(err: MultipartError) -> Self {
        if err.status() == StatusCode::PAYLOAD_TOO_LARGE {
            Self::PayloadTooLarge
        } else {
            Self::BadRequest(err.body_text())
        }
    }
}

impl IntoResponse for IngestError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Ingestion failed");
        }
        let reason = status.canonical_reason().unwrap_or_default();
        (status, reason).into_response()
    }
}

/// Health check response.
#[derive(Serialize)]
struct HealthResponse {
    status: String,
    plugins: usize,
}

/// Create the Axum router with all routes.
pub fn create_router(state: AppState) -> Router {
    let body_limit = match state.max_payload_size {
        0 => DefaultBodyLimit::disable(),
        max => DefaultBodyLimit::max(max.saturating_add(MULTIPART_OVERHEAD)),
    };
    let app_state = Arc::new(state);

    Router::new()
        .route("/inbox", post(ingest_handler))
        .route("/inbox/", post(ingest_handler))
        .route("/healthz", get(healthz_handler))
        .fallback(fallback_handler)
        .layer(body_limit)
        .layer(middleware::from_fn_with_state(
            Arc::clone(&app_state),
            rate_limit_middleware,
        ))
        .layer(TraceLayer::new_for_http().make_span_with(DefaultMakeSpan::default()))
        .with_state(app_state)
}

/// Reject requests from sources over their admission rate.
async fn rate_limit_middleware(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    let source = request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_else(|| UNKNOWN_SOURCE.to_string());

    if !state.limiter.admit(&source) {
        tracing::warn!(source = %source, "Request rate limited");
        return IngestError::RateLimited.into_response();
    }
    next.run(request).await
}

/// Unknown paths: forbidden for submissions, not allowed otherwise.
async fn fallback_handler(method: Method) -> StatusCode {
    if method == Method::POST {
        StatusCode::FORBIDDEN
    } else {
        StatusCode::METHOD_NOT_ALLOWED
    }
}

/// Liveness probe.
async fn healthz_handler(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        plugins: state.dispatcher.plugin_count().await,
    })
}

/// Accept one submission: validate, persist, then hand off for fan-out.
async fn ingest_handler(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<Response, IngestError> {
    let mut file: Option<(Option<String>, Vec<u8>)> = None;
    let mut from = String::new();
    let mut subject = String::new();

    while let Some(field) = multipart.next_field().await? {
        let name = field.name().map(str::to_owned);
        match name.as_deref() {
            Some("file") if file.is_none() => {
                let filename = field.file_name().map(str::to_owned);
                let payload = read_limited(field, state.max_payload_size).await?;
                file = Some((filename, payload));
            }
            Some("from") => from = field.text().await?,
            Some("subject") => subject = field.text().await?,
            _ => {}
        }
    }

    let (filename, payload) = file.ok_or(IngestError::MissingFile)?;
    let mut record = Record::new(payload)
        .with_sender(&from)
        .with_subject(&subject);
    if let Some(filename) = filename {
        record = record.with_filename(filename);
    }

    if record.is_empty() {
        tracing::debug!("Empty submission ignored");
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let id = state.store.set(&record).await?;
    let size = record.payload().len();

    // Fan-out is best effort; the record is already durable.
    let _ = state.dispatcher.enqueue(Arc::new(record)).await;

    tracing::info!(id = %id, size, "Record accepted");
    Ok((StatusCode::OK, id.to_string()).into_response())
}

/// Read a multipart field, failing once it grows past `max` bytes.
async fn read_limited(mut field: Field<'_>, max: usize) -> Result<Vec<u8>, IngestError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await? {
        if max > 0 && buf.len() + chunk.len() > max {
            return Err(IngestError::PayloadTooLarge);
        }
        buf.extend_from_slice(&chunk);
    }
    Ok(buf)
}
