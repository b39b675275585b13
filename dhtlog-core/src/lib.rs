//! Core data model for dhtlog
//!
//! Everything here is pure: no I/O, no clocks read implicitly, no storage.
//! The other crates build on these pieces:
//!
//! - [`reading`]: the immutable [`Reading`] fact written by ingestion
//! - [`period`]: free-form period tokens (`"15min"`, `"2days"`) to a [`BucketWidth`]
//! - [`bucket`]: epoch-anchored bucket boundaries and per-source averages
//! - [`sources`]: which hosts are known and how their columns are named
//! - [`validators`]: plausibility windows applied to metric values
//! - [`time`]: clock abstraction so ingestion can be driven by a fixed clock in tests
//!
//! ```
//! use dhtlog_core::{bucket, parse_period};
//!
//! let width = parse_period("15min")?;
//! assert_eq!(width.seconds(), 900);
//!
//! // 00:14:59 and 00:00:00 share the first quarter-hour bucket
//! assert_eq!(bucket::bucket_start(899_000, width), 0);
//! assert_eq!(bucket::bucket_start(900_000, width), 900_000);
//! # Ok::<(), dhtlog_core::ValidationError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod bucket;
pub mod errors;
pub mod period;
pub mod reading;
pub mod sources;
pub mod time;
pub mod validators;

// Public API
pub use bucket::{Bucket, BucketAccumulator, MetricAverage};
pub use errors::{ValidationError, ValidationResult};
pub use period::{parse_period, BucketWidth};
pub use reading::{Reading, ReadingBuilder, SourceId, HUMIDITY, TEMPERATURE};
pub use sources::{Column, Source, SourceRegistry};
pub use time::{FixedTime, SystemTime, TimeSource, Timestamp};
pub use validators::{Limits, MetricValidator};

/// Crate version, reported by the server on start-up
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_exists() {
        assert!(!VERSION.is_empty());
    }
}
