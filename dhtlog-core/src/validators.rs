//! Plausibility windows for metric values
//!
//! Cheap DHT-class sensors occasionally report values no room or garden
//! can produce (a failed read decoded as 255 %RH, a checksum miss read as
//! -3276.8 degC). Averaging one of those into an hour bucket ruins the
//! chart, so ingestion rejects them before they are stored.
//!
//! | Metric | Window            | Basis                                   |
//! |--------|-------------------|-----------------------------------------|
//! | `temp` | -80 .. 125 degC   | coldest natural air temp, sensor limit  |
//! | `hum`  | 0 .. 100 %RH      | definition of relative humidity         |
//!
//! Metrics without a window only have to be finite.

use std::collections::BTreeMap;

use crate::errors::{ValidationError, ValidationResult};
use crate::reading::{HUMIDITY, TEMPERATURE};

/// Closed interval a metric value must fall in
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Limits {
    /// Lowest plausible value
    pub min: f64,
    /// Highest plausible value
    pub max: f64,
}

/// Range validator for metric values
#[derive(Debug, Clone, PartialEq)]
pub struct MetricValidator {
    limits: BTreeMap<String, Limits>,
}

impl Default for MetricValidator {
    fn default() -> Self {
        Self::permissive()
            .with_limits(TEMPERATURE, -80.0, 125.0)
            .with_limits(HUMIDITY, 0.0, 100.0)
    }
}

impl MetricValidator {
    /// Validator that only requires finite values
    pub fn permissive() -> Self {
        Self {
            limits: BTreeMap::new(),
        }
    }

    /// Set the window for `metric`
    ///
    /// Swapped bounds are put back in order.
    pub fn with_limits(mut self, metric: &str, min: f64, max: f64) -> Self {
        let (min, max) = if min > max { (max, min) } else { (min, max) };
        self.limits.insert(metric.to_string(), Limits { min, max });
        self
    }

    /// Window configured for `metric`
    pub fn limits(&self, metric: &str) -> Option<Limits> {
        self.limits.get(metric).copied()
    }

    /// Check a single value
    pub fn check(&self, metric: &str, value: f64) -> ValidationResult<()> {
        if !value.is_finite() {
            return Err(ValidationError::NonFiniteMetric {
                metric: metric.to_string(),
            });
        }

        match self.limits.get(metric) {
            Some(&Limits { min, max }) if value < min || value > max => {
                Err(ValidationError::MetricOutOfRange {
                    metric: metric.to_string(),
                    value,
                    min,
                    max,
                })
            }
            _ => Ok(()),
        }
    }

    /// Check every `(metric, value)` pair, stopping at the first failure
    pub fn check_all<'a>(
        &self,
        values: impl IntoIterator<Item = (&'a str, f64)>,
    ) -> ValidationResult<()> {
        values
            .into_iter()
            .try_for_each(|(metric, value)| self.check(metric, value))
    }
}
