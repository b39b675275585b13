//! HTTP query service
//!
//! ## Overview
//!
//! Read-only JSON API for chart displays. Handlers never touch the write
//! path; every aggregation runs on the blocking pool so a slow scan cannot
//! stall the runtime or the MQTT subscriber.
//!
//! ## Routes
//!
//! | Route                           | Success | Failure                         |
//! |---------------------------------|---------|---------------------------------|
//! | `GET /bucket/{period}/{count}`  | `200`   | `400` bad input, `500` storage  |
//! | `GET /latest`                   | `200`   |                                 |
//! | `GET /health`                   | `200`   |                                 |
//!
//! Errors are always `{"error": "<message>"}`.
//!
//! A query that exceeds `query_timeout` is answered with a 500 at once, but
//! its blocking task cannot be cancelled. The scan runs to completion in the
//! background and keeps its SQLite reader connection until then, so a burst
//! of timeouts can hold the whole reader pool for the length of one scan.
//!
//! ## Example Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use dhtlog_connectors::HttpConfig;
//!
//! let config = HttpConfig::new()
//!     .with_port(8080)
//!     .with_query_timeout(Duration::from_secs(5));
//! ```

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use dhtlog_store::{AggregateError, BucketAggregator, BucketRow};
use serde_json::json;
use thiserror::Error;
use tokio::sync::watch;

use crate::{ConnectorError, IngestionAdapter, LatestCache};

/// HTTP-specific errors, rendered as JSON bodies
#[derive(Debug, Error)]
pub enum HttpError {
    /// Malformed period or count
    #[error("{0}")]
    BadRequest(String),

    /// Storage failure or panicked query task
    #[error("{0}")]
    Internal(String),

    /// The query outlived the configured timeout
    #[error("query timed out")]
    Timeout,
}

impl HttpError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) | Self::Timeout => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<AggregateError> for HttpError {
    fn from(e: AggregateError) -> Self {
        match e {
            AggregateError::Validation(e) => Self::BadRequest(e.to_string()),
            AggregateError::Storage(e) => Self::Internal(e.to_string()),
        }
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            log::error!("request failed: {self}");
        } else {
            log::debug!("rejected request: {self}");
        }
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

/// Listener settings
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Address to bind
    pub interface: IpAddr,
    /// Port to bind
    pub port: u16,
    /// Upper bound on one aggregation query
    pub query_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            interface: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 8000,
            query_timeout: Duration::from_secs(10),
        }
    }
}

impl HttpConfig {
    /// `0.0.0.0:8000` with a 10s query timeout
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the bind address
    pub fn with_interface(mut self, interface: IpAddr) -> Self {
        self.interface = interface;
        self
    }

    /// Set the bind port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the per-query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }

    /// Address the listener binds to
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.interface, self.port)
    }
}

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    aggregator: BucketAggregator,
    latest: Arc<LatestCache>,
    ingest: Arc<IngestionAdapter>,
    query_timeout: Duration,
}

impl AppState {
    /// State with the default query timeout
    pub fn new(
        aggregator: BucketAggregator,
        latest: Arc<LatestCache>,
        ingest: Arc<IngestionAdapter>,
    ) -> Self {
        Self {
            aggregator,
            latest,
            ingest,
            query_timeout: HttpConfig::default().query_timeout,
        }
    }

    /// Replace the query timeout
    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = timeout;
        self
    }
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/bucket/{period}/{count}", get(bucket))
        .route("/latest", get(latest))
        .route("/health", get(health))
        .with_state(state)
}

/// Bind and serve until `shutdown` flips to `true` or its sender is dropped
pub async fn serve(
    config: HttpConfig,
    state: AppState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ConnectorError> {
    let state = state.with_query_timeout(config.query_timeout);
    let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
    log::info!("HTTP listening on {}", listener.local_addr()?);

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            while !*shutdown.borrow() {
                if shutdown.changed().await.is_err() {
                    break;
                }
            }
        })
        .await?;
    log::info!("HTTP server stopped");
    Ok(())
}

async fn bucket(
    State(state): State<AppState>,
    Path((period, count)): Path<(String, String)>,
) -> Result<Json<Vec<BucketRow>>, HttpError> {
    let aggregator = state.aggregator.clone();
    let query = tokio::task::spawn_blocking(move || aggregator.query_raw(&period, &count));

    match tokio::time::timeout(state.query_timeout, query).await {
        Ok(Ok(rows)) => Ok(Json(rows?)),
        Ok(Err(e)) => Err(HttpError::Internal(format!("query task failed: {e}"))),
        Err(_) => Err(HttpError::Timeout),
    }
}

async fn latest(State(state): State<AppState>) -> impl IntoResponse {
    Json(state.latest.snapshot())
}

async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "version": dhtlog_core::VERSION,
        "ingest": state.ingest.stats(),
    }))
}
