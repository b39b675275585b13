//! Bucket aggregator
//!
//! Turns a chart request `(period, count)` into response rows:
//!
//! 1. parse the period into a [`BucketWidth`]
//! 2. validate the count against the configured ceiling
//! 3. ask the store for the most recent non-empty buckets
//! 4. flatten each bucket into one column per known `{source, metric}`
//!
//! ```text
//! [ { "at": "2024-05-01 13:00:00", "in_temp": 21.4, "in_humidity": 48.0,
//!     "out_temp": null, "out_humidity": 71.2 }, ... ]
//! ```
//!
//! A column is `null` when that source reported nothing for that metric in
//! the bucket. An empty store yields an empty list, not an error.

use std::collections::BTreeMap;
use std::sync::Arc;

use dhtlog_core::time::format_bucket_start;
use dhtlog_core::{
    parse_period, Bucket, BucketWidth, SourceRegistry, Timestamp, ValidationError, ValidationResult,
};
use serde::Serialize;
use thiserror::Error;

use crate::{MeasurementStore, StoreError};

/// Largest bucket count accepted unless configured otherwise
pub const DEFAULT_MAX_BUCKET_COUNT: usize = 10_000;

/// Why an aggregation request failed
#[derive(Debug, Error)]
pub enum AggregateError {
    /// Malformed period or bucket count; the caller's fault
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The store could not answer
    #[error(transparent)]
    Storage(#[from] StoreError),
}

/// One bucket shaped for the chart client
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BucketRow {
    /// Bucket start, `%Y-%m-%d %H:%M:%S` UTC
    pub at: String,
    /// Bucket start in milliseconds since the epoch
    #[serde(skip)]
    pub start: Timestamp,
    /// `<alias>_<label>` columns
    #[serde(flatten)]
    pub values: BTreeMap<String, Option<f64>>,
}

impl BucketRow {
    /// Value of one column, `None` when absent or null
    pub fn value(&self, column: &str) -> Option<f64> {
        self.values.get(column).copied().flatten()
    }
}

/// Validates chart requests and shapes store buckets into rows
#[derive(Clone)]
pub struct BucketAggregator {
    store: Arc<dyn MeasurementStore>,
    registry: Arc<SourceRegistry>,
    max_bucket_count: usize,
}

impl BucketAggregator {
    /// Aggregator over `store` using `registry` for column naming
    pub fn new(store: Arc<dyn MeasurementStore>, registry: Arc<SourceRegistry>) -> Self {
        Self {
            store,
            registry,
            max_bucket_count: DEFAULT_MAX_BUCKET_COUNT,
        }
    }

    /// Set the bucket count ceiling
    pub fn with_max_bucket_count(mut self, max: usize) -> Self {
        self.max_bucket_count = max;
        self
    }

    /// Configured ceiling
    pub fn max_bucket_count(&self) -> usize {
        self.max_bucket_count
    }

    /// Parse a count taken from a URL segment
    pub fn parse_count(&self, raw: &str) -> ValidationResult<usize> {
        let count: usize = raw
            .trim()
            .parse()
            .map_err(|_| ValidationError::InvalidBucketCount(raw.to_string()))?;
        self.check_count(count)
    }

    /// Reject zero and counts above the ceiling
    pub fn check_count(&self, count: usize) -> ValidationResult<usize> {
        if count == 0 {
            return Err(ValidationError::InvalidBucketCount(count.to_string()));
        }
        if count > self.max_bucket_count {
            return Err(ValidationError::BucketCountOutOfRange {
                count,
                max: self.max_bucket_count,
            });
        }
        Ok(count)
    }

    /// Aggregate with a raw count segment, as received over HTTP
    pub fn query_raw(&self, period: &str, count: &str) -> Result<Vec<BucketRow>, AggregateError> {
        let width = parse_period(period)?;
        let count = self.parse_count(count)?;
        self.run(width, count)
    }

    /// Aggregate the `count` most recent non-empty buckets of `period`
    pub fn query(&self, period: &str, count: usize) -> Result<Vec<BucketRow>, AggregateError> {
        let width = parse_period(period)?;
        let count = self.check_count(count)?;
        self.run(width, count)
    }

    fn run(&self, width: BucketWidth, count: usize) -> Result<Vec<BucketRow>, AggregateError> {
        log::debug!("aggregating {count} buckets of {width} on {}", self.store.backend());
        let buckets = self.store.query_range_aggregated(width, count)?;
        Ok(buckets.iter().map(|bucket| self.shape(bucket)).collect())
    }

    /// Flatten a bucket into the registry's columns
    pub fn shape(&self, bucket: &Bucket) -> BucketRow {
        let values = self
            .registry
            .columns()
            .into_iter()
            .map(|column| {
                let value = bucket.average(&column.source, &column.metric);
                (column.name, value)
            })
            .collect();

        BucketRow {
            at: format_bucket_start(bucket.start),
            start: bucket.start,
            values,
        }
    }
}

impl std::fmt::Debug for BucketAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BucketAggregator")
            .field("backend", &self.store.backend())
            .field("max_bucket_count", &self.max_bucket_count)
            .finish_non_exhaustive()
    }
}
