//! In-memory measurement store
//!
//! Not durable. Used by tests and by `--storage memory` deployments that
//! only need the chart for the lifetime of the process.
//!
//! The log is an [`imbl::Vector`], a persistent vector whose `clone` is
//! O(1) and shares structure with the original. A query takes the lock
//! just long enough to clone the vector, then scans its private snapshot
//! while the writer keeps appending to the live one.

use std::collections::BTreeMap;

use dhtlog_core::{Bucket, BucketAccumulator, BucketWidth, Reading, SourceId};
use imbl::Vector;
use parking_lot::RwLock;

use crate::{MeasurementStore, StoreResult};

/// Append-only log kept in process memory
#[derive(Debug, Default)]
pub struct MemoryStore {
    log: RwLock<Vector<Reading>>,
}

impl MemoryStore {
    /// Empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Point-in-time copy of the log
    fn snapshot(&self) -> Vector<Reading> {
        self.log.read().clone()
    }
}

impl MeasurementStore for MemoryStore {
    fn insert(&self, reading: &Reading) -> StoreResult<()> {
        self.log.write().push_back(reading.clone());
        Ok(())
    }

    fn query_range_aggregated(
        &self,
        width: BucketWidth,
        bucket_count: usize,
    ) -> StoreResult<Vec<Bucket>> {
        let snapshot = self.snapshot();
        let mut acc = BucketAccumulator::new(width);
        for reading in snapshot.iter() {
            acc.add(reading);
        }
        Ok(acc.finish(bucket_count))
    }

    fn latest_per_source(&self) -> StoreResult<Vec<Reading>> {
        let snapshot = self.snapshot();
        let mut latest: BTreeMap<&SourceId, &Reading> = BTreeMap::new();
        for reading in snapshot.iter() {
            let slot = latest.entry(reading.source_id()).or_insert(reading);
            // Later appends win ties
            if reading.observed_at() >= slot.observed_at() {
                *slot = reading;
            }
        }
        Ok(latest.into_values().cloned().collect())
    }

    fn len(&self) -> StoreResult<u64> {
        Ok(self.log.read().len() as u64)
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_suite;

    test_suite::store_test_suite!(MemoryStore::new());

    #[test]
    fn snapshot_is_isolated_from_later_appends() {
        let store = MemoryStore::new();
        store.insert(&test_suite::temp("A", 0, 1.0)).unwrap();

        let snapshot = store.snapshot();
        store.insert(&test_suite::temp("A", 1, 2.0)).unwrap();

        assert_eq!(snapshot.len(), 1);
        assert_eq!(store.len().unwrap(), 2);
    }
}
