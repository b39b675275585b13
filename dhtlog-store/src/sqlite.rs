//! Durable SQLite measurement store
//!
//! ## Layout
//!
//! ```text
//! readings                          reading_metrics
//! ┌────┬───────────┬────────┬─────┐  ┌────────────┬────────┬───────┐
//! │ id │ source_id │ sensor │ ... │◀─│ reading_id │ metric │ value │
//! └────┴───────────┴────────┴─────┘  └────────────┴────────┴───────┘
//! ```
//!
//! One row per reading, one row per reported metric. A metric that was not
//! reported has no row, so `AVG` naturally skips it instead of averaging in
//! a zero or a NULL placeholder.
//!
//! ## Concurrency
//!
//! The database runs in WAL mode with `synchronous=FULL`:
//! - a single writer connection behind a mutex, held only for the insert
//!   transaction
//! - a pool of read-only connections; each aggregation statement reads its
//!   own WAL snapshot and never waits on the writer
//!
//! A committed insert is visible to every statement that starts after the
//! commit returns, which gives read-after-write on one store instance.
//!
//! ## Query
//!
//! Bucket width and count are bound parameters, never formatted into the
//! SQL text, so the statement is prepared once and cached per connection.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dhtlog_core::{Bucket, BucketWidth, MetricAverage, Reading, ReadingBuilder, SourceId};
use parking_lot::{Mutex, MutexGuard};
use rusqlite::{params, Connection, OpenFlags};

use crate::{MeasurementStore, StoreError, StoreResult};

const SCHEMA: &str = r"
CREATE TABLE IF NOT EXISTS readings (
    id          INTEGER PRIMARY KEY,
    source_id   TEXT NOT NULL,
    sensor      INTEGER,
    client_id   TEXT,
    observed_at INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS readings_observed_at ON readings (observed_at);
CREATE INDEX IF NOT EXISTS readings_source ON readings (source_id);
CREATE TABLE IF NOT EXISTS reading_metrics (
    reading_id INTEGER NOT NULL REFERENCES readings (id),
    metric     TEXT NOT NULL,
    value      REAL NOT NULL,
    PRIMARY KEY (reading_id, metric)
) WITHOUT ROWID;
";

const INSERT_READING: &str =
    "INSERT INTO readings (source_id, sensor, client_id, observed_at) VALUES (?1, ?2, ?3, ?4)";

const INSERT_METRIC: &str =
    "INSERT INTO reading_metrics (reading_id, metric, value) VALUES (?1, ?2, ?3)";

// ?1 = bucket width in milliseconds, ?2 = bucket count
const AGGREGATE: &str = r"
WITH recent AS (
    SELECT DISTINCT (observed_at / ?1) * ?1 AS bucket_start
    FROM readings
    ORDER BY bucket_start DESC
    LIMIT ?2
)
SELECT (r.observed_at / ?1) * ?1 AS bucket_start,
       r.source_id,
       m.metric,
       AVG(m.value),
       COUNT(m.value)
FROM readings r
JOIN reading_metrics m ON m.reading_id = r.id
WHERE r.observed_at >= (SELECT MIN(bucket_start) FROM recent)
GROUP BY bucket_start, r.source_id, m.metric
";

// Newest observation per source; the later insert wins a tie
const LATEST_PER_SOURCE: &str = r"
WITH ranked AS (
    SELECT id,
           ROW_NUMBER() OVER (
               PARTITION BY source_id ORDER BY observed_at DESC, id DESC
           ) AS newest
    FROM readings
)
SELECT r.id, r.source_id, r.sensor, r.client_id, r.observed_at, m.metric, m.value
FROM readings r
JOIN reading_metrics m ON m.reading_id = r.id
WHERE r.id IN (SELECT id FROM ranked WHERE newest = 1)
";

const COUNT: &str = "SELECT COUNT(*) FROM readings";

/// SQLite store configuration
#[derive(Debug, Clone)]
pub struct SqliteConfig {
    /// Database file; created when missing
    pub path: PathBuf,
    /// Read-only connections available to concurrent queries
    pub reader_connections: usize,
    /// How long a connection waits on a locked database
    pub busy_timeout: Duration,
}

impl SqliteConfig {
    /// Configuration for the database at `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            reader_connections: 4,
            busy_timeout: Duration::from_secs(5),
        }
    }

    /// Set the reader pool size
    pub fn reader_connections(mut self, count: usize) -> Self {
        self.reader_connections = count;
        self
    }

    /// Set the busy timeout
    pub fn busy_timeout(mut self, timeout: Duration) -> Self {
        self.busy_timeout = timeout;
        self
    }
}

/// Durable store backed by a WAL-mode SQLite file
pub struct SqliteStore {
    path: PathBuf,
    writer: Mutex<Connection>,
    readers: Vec<Mutex<Connection>>,
    next_reader: AtomicUsize,
}

impl SqliteStore {
    /// Open (or create) the database described by `config`
    pub fn open(config: &SqliteConfig) -> StoreResult<Self> {
        if config.reader_connections == 0 {
            return Err(StoreError::Config(
                "at least one reader connection is required".into(),
            ));
        }

        let writer = Connection::open(&config.path)?;
        writer.busy_timeout(config.busy_timeout)?;
        writer.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=FULL; PRAGMA foreign_keys=ON;")?;
        writer.execute_batch(SCHEMA)?;

        let readers = (0..config.reader_connections)
            .map(|_| open_reader(&config.path, config.busy_timeout).map(Mutex::new))
            .collect::<StoreResult<Vec<_>>>()?;

        log::info!(
            "opened sqlite store at {} with {} reader connections",
            config.path.display(),
            readers.len()
        );

        Ok(Self {
            path: config.path.clone(),
            writer: Mutex::new(writer),
            readers,
            next_reader: AtomicUsize::new(0),
        })
    }

    /// Database file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn reader(&self) -> MutexGuard<'_, Connection> {
        let index = self.next_reader.fetch_add(1, Ordering::Relaxed) % self.readers.len();
        self.readers[index].lock()
    }
}

fn open_reader(path: &Path, busy_timeout: Duration) -> StoreResult<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_ONLY | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )?;
    conn.busy_timeout(busy_timeout)?;
    Ok(conn)
}

impl MeasurementStore for SqliteStore {
    fn insert(&self, reading: &Reading) -> StoreResult<()> {
        let observed_at = StoreError::to_i64("timestamp", reading.observed_at())?;

        let mut conn = self.writer.lock();
        let tx = conn.transaction()?;
        tx.prepare_cached(INSERT_READING)?.execute(params![
            reading.source_id().as_str(),
            reading.sensor(),
            reading.client_id(),
            observed_at,
        ])?;
        let reading_id = tx.last_insert_rowid();
        {
            let mut insert_metric = tx.prepare_cached(INSERT_METRIC)?;
            for (metric, value) in reading.metrics() {
                insert_metric.execute(params![reading_id, metric, value])?;
            }
        }
        // Dropping an uncommitted transaction rolls it back
        tx.commit()?;
        Ok(())
    }

    fn query_range_aggregated(
        &self,
        width: BucketWidth,
        bucket_count: usize,
    ) -> StoreResult<Vec<Bucket>> {
        if bucket_count == 0 {
            return Ok(Vec::new());
        }
        let width_ms = StoreError::to_i64("bucket width", width.millis())?;
        let limit = StoreError::to_i64("bucket count", bucket_count as u64)?;

        let conn = self.reader();
        let mut stmt = conn.prepare_cached(AGGREGATE)?;
        let rows = stmt.query_map(params![width_ms, limit], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, i64>(4)?,
            ))
        })?;

        let mut buckets: BTreeMap<i64, Bucket> = BTreeMap::new();
        for row in rows {
            let (start, source, metric, mean, samples) = row?;
            buckets
                .entry(start)
                .or_insert_with(|| Bucket::new(start.max(0) as u64))
                .set_average(
                    SourceId::new(source),
                    metric,
                    MetricAverage {
                        mean,
                        samples: samples.max(0) as u64,
                    },
                );
        }

        let newest_first: Vec<Bucket> = buckets.into_values().rev().collect();
        Ok(newest_first)
    }

    fn latest_per_source(&self) -> StoreResult<Vec<Reading>> {
        let conn = self.reader();
        let mut stmt = conn.prepare_cached(LATEST_PER_SOURCE)?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, f64>(6)?,
            ))
        })?;

        let mut builders: BTreeMap<i64, ReadingBuilder> = BTreeMap::new();
        for row in rows {
            let (id, source, sensor, client_id, observed_at, metric, value) = row?;
            let builder = builders.remove(&id).unwrap_or_else(|| {
                let mut builder = ReadingBuilder::new(source, observed_at.max(0) as u64);
                if let Some(sensor) = sensor {
                    builder = builder.sensor(sensor);
                }
                if let Some(client_id) = client_id {
                    builder = builder.client_id(client_id);
                }
                builder
            });
            builders.insert(id, builder.metric(&metric, value));
        }

        let latest = builders
            .into_values()
            .map(|builder| builder.build().map_err(StoreError::from))
            .collect::<StoreResult<Vec<_>>>()?;
        Ok(latest)
    }

    fn len(&self) -> StoreResult<u64> {
        let conn = self.reader();
        let count: i64 = conn.query_row(COUNT, [], |row| row.get(0))?;
        Ok(count.max(0) as u64)
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

impl std::fmt::Debug for SqliteStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteStore")
            .field("path", &self.path)
            .field("readers", &self.readers.len())
            .finish_non_exhaustive()
    }
}
