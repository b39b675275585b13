//! Validation errors
//!
//! Every input that crosses a boundary (a period token from a URL, a bucket
//! count, a decoded sensor payload) is checked before it reaches storage.
//! Failures are reported as a [`ValidationError`], which is always
//! recoverable:
//!
//! - on the query path it becomes a `400` response
//! - on the ingestion path the single message is logged and dropped
//!
//! ## Error Categories
//!
//! ### Period tokens
//! - `MissingPeriodDigits`: `"min"`, `""`, `"-5min"`
//! - `ZeroPeriod`: `"0hours"`
//! - `UnknownUnit`: `"15fortnights"`
//! - `PeriodOverflow`: width in seconds does not fit in a `u64`
//!
//! ### Query shape
//! - `InvalidBucketCount` / `BucketCountOutOfRange`
//!
//! ### Readings
//! - `EmptySourceId`, `NoMetrics`, `NonFiniteMetric`, `MetricOutOfRange`
//!
//! ### Configuration
//! - `InvalidSourceSpec`: a `--source` flag that is not `HOST=ALIAS`

use thiserror::Error;

/// Result type for validation operations
pub type ValidationResult<T> = Result<T, ValidationError>;

/// Validation errors for periods, query shapes and readings
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// Period token does not start with a decimal digit sequence
    #[error("period must start with a number")]
    MissingPeriodDigits,

    /// Period multiplier is zero
    #[error("period must be greater than zero")]
    ZeroPeriod,

    /// Unit suffix is not one of the recognised synonyms
    #[error("unsupported unit '{0}'")]
    UnknownUnit(String),

    /// Multiplier times unit overflows
    #[error("period '{0}' is too large")]
    PeriodOverflow(String),

    /// Bucket count is not a positive integer
    #[error("bucket count '{0}' is not a positive integer")]
    InvalidBucketCount(String),

    /// Bucket count above the configured ceiling
    #[error("bucket count {count} exceeds the limit of {max}")]
    BucketCountOutOfRange {
        /// Requested number of buckets
        count: usize,
        /// Configured ceiling
        max: usize,
    },

    /// Reading has an empty source identity
    #[error("reading has an empty source id")]
    EmptySourceId,

    /// Reading carries no metric values at all
    #[error("reading from '{0}' carries no metrics")]
    NoMetrics(String),

    /// Metric value is NaN or infinite
    #[error("metric '{metric}' is not a finite number")]
    NonFiniteMetric {
        /// Metric name
        metric: String,
    },

    /// Metric value outside its plausibility window
    #[error("metric '{metric}' value {value} outside range [{min}, {max}]")]
    MetricOutOfRange {
        /// Metric name
        metric: String,
        /// The rejected value
        value: f64,
        /// Lower bound of the window
        min: f64,
        /// Upper bound of the window
        max: f64,
    },

    /// Source definition is not of the form `HOST=ALIAS`
    #[error("invalid source definition '{0}', expected HOST=ALIAS")]
    InvalidSourceSpec(String),
}
