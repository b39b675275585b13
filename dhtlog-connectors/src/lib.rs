//! Transport connectors for dhtlog
//!
//! ## Overview
//!
//! Sensor nodes publish readings over MQTT; chart displays pull history over
//! HTTP. This crate holds both edges plus the adapter between the transport
//! and the measurement store.
//!
//! ```text
//!  sensor nodes ──MQTT──▶ MqttSubscriber ──▶ IngestionAdapter ──▶ MeasurementStore
//!                                                  │                     ▲
//!                                                  ▼                     │
//!                                             LatestCache          BucketAggregator
//!                                                  ▲                     ▲
//!                                                  └──── HTTP service ───┘
//! ```
//!
//! ### MQTT (feature `mqtt`)
//!
//! - Subscribes on every ConnAck, so a reconnect renews the subscription;
//!   a subscribe that cannot be queued is retried after the reconnect delay
//! - One long-lived task performs all inserts (single writer)
//! - A bad message is logged and dropped; the loop keeps running
//!
//! ### HTTP (feature `http`)
//!
//! | Route                      | Response                                   |
//! |----------------------------|--------------------------------------------|
//! | `GET /bucket/{period}/{n}` | newest-first averaged buckets              |
//! | `GET /latest`              | last reading per source, keyed by alias    |
//! | `GET /health`              | liveness plus ingestion counters           |
//!
//! ## Error Handling
//!
//! Nothing in here terminates the process. Validation failures become `400`
//! responses or dropped messages; storage failures become `500` responses or
//! dropped messages. Process-level recovery belongs to the binary.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod ingest;
pub mod latest;

#[cfg(feature = "mqtt")]
pub mod mqtt;

#[cfg(feature = "http")]
pub mod http;

use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::Mutex;
use serde::Serialize;
use thiserror::Error;

// Re-export common types
pub use ingest::{IngestError, IngestionAdapter, SensorPayload};
pub use latest::{LatestCache, LatestEntry};

#[cfg(feature = "mqtt")]
pub use mqtt::{MqttConfig, MqttSubscriber, QoS};

#[cfg(feature = "http")]
pub use http::{AppState, HttpConfig};

/// Common connector errors
#[derive(Debug, Error)]
pub enum ConnectorError {
    /// Settings rejected before connecting
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The MQTT client refused a request
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Socket bind or serve failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Ingestion counters shared between the subscriber and `/health`
#[derive(Debug, Default)]
pub struct IngestCounters {
    received: AtomicU64,
    stored: AtomicU64,
    rejected: AtomicU64,
    failed: AtomicU64,
    last_error: Mutex<Option<String>>,
}

impl IngestCounters {
    pub(crate) fn record_received(&self) {
        self.received.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_stored(&self) {
        self.stored.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self, reason: String) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(reason);
    }

    pub(crate) fn record_failed(&self, reason: String) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        *self.last_error.lock() = Some(reason);
    }

    /// Point-in-time copy
    pub fn snapshot(&self) -> IngestStats {
        IngestStats {
            received: self.received.load(Ordering::Relaxed),
            stored: self.stored.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            last_error: self.last_error.lock().clone(),
        }
    }
}

/// Ingestion statistics
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct IngestStats {
    /// Messages handed to the adapter
    pub received: u64,
    /// Readings durably stored
    pub stored: u64,
    /// Messages dropped as malformed, unknown or implausible
    pub rejected: u64,
    /// Messages dropped because the store failed
    pub failed: u64,
    /// Most recent rejection or failure reason
    pub last_error: Option<String>,
}
