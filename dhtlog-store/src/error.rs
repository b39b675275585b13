//! Storage errors
//!
//! A [`StoreError`] is fatal to the request that hit it, never to the
//! process: the query path answers `500`, the ingestion path drops the one
//! message and keeps subscribing.

use dhtlog_core::ValidationError;
use thiserror::Error;

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Storage-layer failures
#[derive(Debug, Error)]
pub enum StoreError {
    /// SQLite connection, write or query failure
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Stored row could not be turned back into a reading
    #[error("corrupt row: {0}")]
    Corrupt(#[from] ValidationError),

    /// Value does not fit the column type
    #[error("{what} {value} does not fit in a signed 64-bit column")]
    OutOfRange {
        /// What was being converted
        what: &'static str,
        /// The offending value
        value: u64,
    },

    /// Store configuration rejected
    #[error("invalid store configuration: {0}")]
    Config(String),
}

impl StoreError {
    pub(crate) fn to_i64(what: &'static str, value: u64) -> StoreResult<i64> {
        i64::try_from(value).map_err(|_| StoreError::OutOfRange { what, value })
    }
}
