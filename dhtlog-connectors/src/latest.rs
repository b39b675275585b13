//! Most recent reading per source
//!
//! Backs `GET /latest`. Updated by the ingestion adapter after every stored
//! reading and seeded from the store at startup so a restart does not blank
//! the dashboard.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use dhtlog_core::time::format_receipt_time;
use dhtlog_core::{Reading, SourceId, SourceRegistry};
use parking_lot::RwLock;
use serde::Serialize;

/// One `/latest` entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LatestEntry {
    /// Source id the reading came from
    pub source: String,
    /// Host field as the node reported it
    pub host: String,
    /// Sensor channel on the node, if reported
    pub sensor: Option<i64>,
    /// MQTT client id of the node, if reported
    pub client_id: Option<String>,
    /// Metric values under their wire names
    #[serde(flatten)]
    pub metrics: BTreeMap<String, f64>,
    /// Receipt time, `%Y/%m/%d, %H:%M:%S` UTC
    pub at: String,
}

/// Thread-safe map of source to newest reading
pub struct LatestCache {
    entries: RwLock<HashMap<SourceId, Reading>>,
    registry: Arc<SourceRegistry>,
}

impl LatestCache {
    /// Empty cache resolving aliases through `registry`
    pub fn new(registry: Arc<SourceRegistry>) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            registry,
        }
    }

    /// Record a reading unless a newer one is already cached
    pub fn update(&self, reading: &Reading) {
        let mut entries = self.entries.write();
        match entries.get(reading.source_id()) {
            Some(current) if current.observed_at() > reading.observed_at() => {}
            _ => {
                entries.insert(reading.source_id().clone(), reading.clone());
            }
        }
    }

    /// Seed from readings loaded at startup
    pub fn seed(&self, readings: impl IntoIterator<Item = Reading>) {
        for reading in readings {
            self.update(&reading);
        }
    }

    /// Number of sources with a cached reading
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Whether no source has reported yet
    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Cached reading for one source
    pub fn get(&self, source: &SourceId) -> Option<Reading> {
        self.entries.read().get(source).cloned()
    }

    /// Entries keyed by alias, or by source id for unregistered sources
    pub fn snapshot(&self) -> BTreeMap<String, LatestEntry> {
        let entries = self.entries.read();
        entries
            .values()
            .map(|reading| {
                let key = self
                    .registry
                    .alias(reading.source_id())
                    .unwrap_or(reading.source_id().as_str())
                    .to_string();
                let entry = LatestEntry {
                    source: reading.source_id().to_string(),
                    host: reading.source_id().to_string(),
                    sensor: reading.sensor(),
                    client_id: reading.client_id().map(str::to_string),
                    metrics: reading.metrics().clone(),
                    at: format_receipt_time(reading.observed_at()),
                };
                (key, entry)
            })
            .collect()
    }
}

impl std::fmt::Debug for LatestCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LatestCache")
            .field("sources", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dhtlog_core::{ReadingBuilder, HUMIDITY, TEMPERATURE};

    fn cache() -> LatestCache {
        LatestCache::new(Arc::new(SourceRegistry::default()))
    }

    fn reading(source: &str, at: u64, temp: f64) -> Reading {
        ReadingBuilder::new(source, at)
            .metric(TEMPERATURE, temp)
            .build()
            .unwrap()
    }

    #[test]
    fn keeps_newest_per_source() {
        let cache = cache();
        cache.update(&reading("10.0.0.32", 2_000, 22.0));
        cache.update(&reading("10.0.0.32", 1_000, 11.0));
        cache.update(&reading("10.0.0.31", 500, 5.0));

        assert_eq!(cache.len(), 2);
        let current = cache.get(&"10.0.0.32".into()).unwrap();
        assert_eq!(current.metric(TEMPERATURE), Some(22.0));
    }

    #[test]
    fn snapshot_uses_aliases_and_receipt_format() {
        let cache = cache();
        let full = ReadingBuilder::new("10.0.0.31", 1_714_568_400_000)
            .metric(TEMPERATURE, 12.5)
            .metric(HUMIDITY, 80.0)
            .sensor(2)
            .client_id("esp-out")
            .build()
            .unwrap();
        cache.seed([full, reading("10.0.0.77", 0, 1.0)]);

        let json = serde_json::to_value(cache.snapshot()).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "out": {
                    "source": "10.0.0.31",
                    "host": "10.0.0.31",
                    "sensor": 2,
                    "client_id": "esp-out",
                    "temp": 12.5,
                    "hum": 80.0,
                    "at": "2024/05/01, 13:00:00",
                },
                "10.0.0.77": {
                    "source": "10.0.0.77",
                    "host": "10.0.0.77",
                    "sensor": null,
                    "client_id": null,
                    "temp": 1.0,
                    "at": "1970/01/01, 00:00:00",
                },
            })
        );
    }
}
