//! Readings
//!
//! A [`Reading`] is one immutable fact: a source reported some metrics and
//! the server received them at `observed_at`. Sources may report different
//! metric sets; a metric that was not reported is simply absent from the
//! map, never zero.
//!
//! Readings are only constructed through [`ReadingBuilder`], which enforces
//! the invariants every store relies on:
//! - the source id is not empty
//! - at least one metric is present
//! - every metric value is finite
//!
//! ```
//! use dhtlog_core::{ReadingBuilder, TEMPERATURE, HUMIDITY};
//!
//! let reading = ReadingBuilder::new("10.0.0.32", 1_000)
//!     .metric(TEMPERATURE, 21.5)
//!     .metric(HUMIDITY, 48.0)
//!     .sensor(4)
//!     .build()?;
//!
//! assert_eq!(reading.metric(TEMPERATURE), Some(21.5));
//! # Ok::<(), dhtlog_core::ValidationError>(())
//! ```

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::{ValidationError, ValidationResult};
use crate::time::Timestamp;

/// Metric name for air temperature in degrees Celsius
pub const TEMPERATURE: &str = "temp";

/// Metric name for relative humidity in percent
pub const HUMIDITY: &str = "hum";

/// Opaque, stable identity of a measurement source
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(String);

impl SourceId {
    /// Wrap a raw identifier
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SourceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// One stored measurement
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Reading {
    source_id: SourceId,
    metrics: BTreeMap<String, f64>,
    observed_at: Timestamp,
    sensor: Option<i64>,
    client_id: Option<String>,
}

impl Reading {
    /// Source that produced the reading
    pub fn source_id(&self) -> &SourceId {
        &self.source_id
    }

    /// All reported metrics
    pub fn metrics(&self) -> &BTreeMap<String, f64> {
        &self.metrics
    }

    /// Value of one metric, `None` when it was not reported
    pub fn metric(&self, name: &str) -> Option<f64> {
        self.metrics.get(name).copied()
    }

    /// Server receipt time
    pub fn observed_at(&self) -> Timestamp {
        self.observed_at
    }

    /// Sensor channel on the node, if reported
    pub fn sensor(&self) -> Option<i64> {
        self.sensor
    }

    /// Transport client id, if reported
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }
}

/// Builder for [`Reading`]
#[derive(Debug, Clone)]
pub struct ReadingBuilder {
    source_id: SourceId,
    observed_at: Timestamp,
    metrics: BTreeMap<String, f64>,
    sensor: Option<i64>,
    client_id: Option<String>,
}

impl ReadingBuilder {
    /// Start a reading for `source_id` received at `observed_at`
    pub fn new(source_id: impl Into<SourceId>, observed_at: Timestamp) -> Self {
        Self {
            source_id: source_id.into(),
            observed_at,
            metrics: BTreeMap::new(),
            sensor: None,
            client_id: None,
        }
    }

    /// Add (or replace) a metric value
    pub fn metric(mut self, name: &str, value: f64) -> Self {
        self.metrics.insert(name.to_string(), value);
        self
    }

    /// Add a metric only when present
    pub fn maybe_metric(self, name: &str, value: Option<f64>) -> Self {
        match value {
            Some(value) => self.metric(name, value),
            None => self,
        }
    }

    /// Sensor channel provenance
    pub fn sensor(mut self, sensor: i64) -> Self {
        self.sensor = Some(sensor);
        self
    }

    /// Transport client id provenance
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    /// Validate and build
    pub fn build(self) -> ValidationResult<Reading> {
        if self.source_id.as_str().is_empty() {
            return Err(ValidationError::EmptySourceId);
        }
        if self.metrics.is_empty() {
            return Err(ValidationError::NoMetrics(self.source_id.to_string()));
        }
        if let Some((name, _)) = self.metrics.iter().find(|(_, v)| !v.is_finite()) {
            return Err(ValidationError::NonFiniteMetric { metric: name.clone() });
        }

        Ok(Reading {
            source_id: self.source_id,
            metrics: self.metrics,
            observed_at: self.observed_at,
            sensor: self.sensor,
            client_id: self.client_id,
        })
    }
}

impl From<String> for SourceId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&SourceId> for SourceId {
    fn from(id: &SourceId) -> Self {
        id.clone()
    }
}
