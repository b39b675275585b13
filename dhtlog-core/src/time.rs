//! Time management
//!
//! Sensor nodes do not stamp their own readings; the server receipt time is
//! authoritative. Ingestion therefore asks a [`TimeSource`] for "now":
//! - [`SystemTime`] in production
//! - [`FixedTime`] in tests, shared between the test and the adapter

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

/// Timestamp in milliseconds since the unix epoch
pub type Timestamp = u64;

/// Source of wall-clock time
pub trait TimeSource: Send + Sync {
    /// Current timestamp in milliseconds since the unix epoch
    fn now(&self) -> Timestamp;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemTime;

impl TimeSource for SystemTime {
    fn now(&self) -> Timestamp {
        use std::time::{SystemTime as StdSystemTime, UNIX_EPOCH};

        StdSystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as Timestamp
    }
}

/// Manually driven clock for tests
///
/// Clones share the same instant, so a test can keep one handle and move
/// time forward while another handle sits inside an ingestion adapter.
#[derive(Debug, Clone, Default)]
pub struct FixedTime {
    timestamp: Arc<AtomicU64>,
}

impl FixedTime {
    /// Clock frozen at `timestamp`
    pub fn new(timestamp: Timestamp) -> Self {
        Self {
            timestamp: Arc::new(AtomicU64::new(timestamp)),
        }
    }

    /// Jump to an absolute instant
    pub fn set(&self, timestamp: Timestamp) {
        self.timestamp.store(timestamp, Ordering::SeqCst);
    }

    /// Move forward by `ms` milliseconds
    pub fn advance(&self, ms: u64) {
        self.timestamp.fetch_add(ms, Ordering::SeqCst);
    }
}

impl TimeSource for FixedTime {
    fn now(&self) -> Timestamp {
        self.timestamp.load(Ordering::SeqCst)
    }
}

/// Convert to a UTC datetime, `None` past the year 262143
pub fn to_datetime(timestamp: Timestamp) -> Option<DateTime<Utc>> {
    i64::try_from(timestamp)
        .ok()
        .and_then(DateTime::<Utc>::from_timestamp_millis)
}

/// Bucket start as rendered in aggregation responses (`2024-05-01 13:00:00`)
pub fn format_bucket_start(timestamp: Timestamp) -> String {
    match to_datetime(timestamp) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}

/// Receipt time as rendered by the latest-value endpoint (`2024/05/01, 13:00:00`)
pub fn format_receipt_time(timestamp: Timestamp) -> String {
    match to_datetime(timestamp) {
        Some(dt) => dt.format("%Y/%m/%d, %H:%M:%S").to_string(),
        None => timestamp.to_string(),
    }
}
