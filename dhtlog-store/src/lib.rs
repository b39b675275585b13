//! Measurement storage and bucketed aggregation
//!
//! ## Overview
//!
//! Readings arrive one at a time from a single ingestion task and are read
//! back by any number of concurrent chart queries. The store is an
//! append-only log: rows are never updated or deleted here.
//!
//! ```text
//!  ingestion ──insert──▶ ┌──────────────────┐ ◀──query_range_aggregated── aggregator ◀── HTTP
//!                        │ MeasurementStore │
//!                        └──────────────────┘
//! ```
//!
//! ## Backends
//!
//! | Backend         | Durable | Read isolation                              |
//! |-----------------|---------|---------------------------------------------|
//! | [`SqliteStore`] | yes     | WAL snapshot per reader connection          |
//! | [`MemoryStore`] | no      | O(1) clone of a persistent vector           |
//!
//! Both keep the writer's critical section to the append itself. An
//! aggregation scan never holds a lock the writer needs.
//!
//! ## Guarantees
//!
//! - Read-after-write: once `insert` returns `Ok`, every later query on the
//!   same store sees the reading.
//! - Atomic inserts: a failed insert leaves no partial row.
//! - Only non-empty buckets are returned, newest first, at most `count`.

#![deny(unsafe_code)]

pub mod aggregator;
pub mod error;
pub mod memory;
pub mod sqlite;

#[cfg(test)]
mod test_suite;

use dhtlog_core::{Bucket, BucketWidth, Reading};

pub use aggregator::{AggregateError, BucketAggregator, BucketRow, DEFAULT_MAX_BUCKET_COUNT};
pub use error::{StoreError, StoreResult};
pub use memory::MemoryStore;
pub use sqlite::{SqliteConfig, SqliteStore};

/// Append-only log of readings with bucketed aggregate queries
pub trait MeasurementStore: Send + Sync {
    /// Append a reading; durable (for durable backends) once this returns `Ok`
    fn insert(&self, reading: &Reading) -> StoreResult<()>;

    /// Up to `bucket_count` most recent non-empty buckets of width `width`,
    /// ordered by start descending
    fn query_range_aggregated(
        &self,
        width: BucketWidth,
        bucket_count: usize,
    ) -> StoreResult<Vec<Bucket>>;

    /// Most recent reading of every source that ever reported
    fn latest_per_source(&self) -> StoreResult<Vec<Reading>>;

    /// Number of stored readings
    fn len(&self) -> StoreResult<u64>;

    /// Whether the store holds no readings
    fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}
