//! Ingestion adapter
//!
//! Turns a raw transport payload into a stored [`Reading`]:
//!
//! ```text
//! bytes ──decode──▶ SensorPayload ──resolve host──▶ known source
//!       ──plausibility──▶ Reading (observed_at = server clock) ──insert──▶ store
//!                                                               └──▶ latest cache
//! ```
//!
//! Every step returns a typed [`IngestError`]; the caller branches on it.
//! Payloads are JSON:
//!
//! ```json
//! { "host": "10.0.0.32", "sensor": 4, "client_id": "esp-in", "temp": 21.5, "hum": 48.0 }
//! ```
//!
//! Only `host` is required. Nodes do not send a timestamp; receipt time is
//! authoritative.

use std::sync::Arc;

use dhtlog_core::{
    MetricValidator, Reading, ReadingBuilder, SourceRegistry, SystemTime, TimeSource,
    ValidationError, HUMIDITY, TEMPERATURE,
};
use dhtlog_store::{MeasurementStore, StoreError};
use serde::Deserialize;
use thiserror::Error;

use crate::{IngestCounters, IngestStats, LatestCache};

/// Decoded sensor message
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SensorPayload {
    /// Publishing node; the reading's source id
    pub host: String,
    /// Sensor channel on the node
    #[serde(default)]
    pub sensor: Option<i64>,
    /// MQTT client id of the node
    #[serde(default)]
    pub client_id: Option<String>,
    /// Temperature in degrees Celsius
    #[serde(default)]
    pub temp: Option<f64>,
    /// Relative humidity in percent
    #[serde(default)]
    pub hum: Option<f64>,
}

/// Why a message was not stored
#[derive(Debug, Error)]
pub enum IngestError {
    /// Not JSON, wrong field types or no `host`
    #[error("malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// `host` is not a registered source
    #[error("unknown source '{0}'")]
    UnknownSource(String),

    /// Payload decoded but failed validation
    #[error("invalid reading: {0}")]
    Validation(#[from] ValidationError),

    /// The store refused the insert
    #[error("storage failure: {0}")]
    Storage(#[from] StoreError),
}

impl IngestError {
    /// Whether the message itself was at fault (as opposed to the store)
    pub fn is_rejection(&self) -> bool {
        !matches!(self, Self::Storage(_))
    }
}

/// Validates payloads and writes readings
pub struct IngestionAdapter {
    store: Arc<dyn MeasurementStore>,
    registry: Arc<SourceRegistry>,
    latest: Arc<LatestCache>,
    validator: MetricValidator,
    clock: Arc<dyn TimeSource>,
    counters: IngestCounters,
}

impl IngestionAdapter {
    /// Adapter using the system clock and default plausibility windows
    pub fn new(
        store: Arc<dyn MeasurementStore>,
        registry: Arc<SourceRegistry>,
        latest: Arc<LatestCache>,
    ) -> Self {
        Self {
            store,
            registry,
            latest,
            validator: MetricValidator::default(),
            clock: Arc::new(SystemTime),
            counters: IngestCounters::default(),
        }
    }

    /// Replace the receipt clock
    pub fn with_clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the plausibility windows
    pub fn with_validator(mut self, validator: MetricValidator) -> Self {
        self.validator = validator;
        self
    }

    /// Decode a JSON payload
    pub fn decode(payload: &[u8]) -> Result<SensorPayload, IngestError> {
        Ok(serde_json::from_slice(payload)?)
    }

    /// Build a reading stamped with the current time
    pub fn to_reading(&self, payload: SensorPayload) -> Result<Reading, IngestError> {
        let source = self
            .registry
            .resolve(&payload.host)
            .ok_or_else(|| IngestError::UnknownSource(payload.host.clone()))?;

        let metrics = [(TEMPERATURE, payload.temp), (HUMIDITY, payload.hum)];
        self.validator
            .check_all(metrics.iter().filter_map(|&(name, value)| Some((name, value?))))?;

        let mut builder = metrics
            .iter()
            .fold(ReadingBuilder::new(&source.id, self.clock.now()), |builder, &(name, value)| {
                builder.maybe_metric(name, value)
            });
        if let Some(sensor) = payload.sensor {
            builder = builder.sensor(sensor);
        }
        if let Some(client_id) = payload.client_id {
            builder = builder.client_id(client_id);
        }
        Ok(builder.build()?)
    }

    /// Decode, validate, store and cache one message
    ///
    /// A failure leaves the store and the cache untouched.
    pub fn handle(&self, payload: &[u8]) -> Result<Reading, IngestError> {
        self.counters.record_received();

        let result = Self::decode(payload)
            .and_then(|decoded| self.to_reading(decoded))
            .and_then(|reading| {
                self.store.insert(&reading)?;
                Ok(reading)
            });

        match &result {
            Ok(reading) => {
                self.counters.record_stored();
                self.latest.update(reading);
            }
            Err(e) if e.is_rejection() => self.counters.record_rejected(e.to_string()),
            Err(e) => self.counters.record_failed(e.to_string()),
        }
        result
    }

    /// Ingestion counters so far
    pub fn stats(&self) -> IngestStats {
        self.counters.snapshot()
    }
}

impl std::fmt::Debug for IngestionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestionAdapter")
            .field("backend", &self.store.backend())
            .field("sources", &self.registry.sources().len())
            .finish_non_exhaustive()
    }
}
