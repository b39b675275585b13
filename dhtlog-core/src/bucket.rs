//! Epoch-anchored buckets
//!
//! A bucket is the half-open window `[start, start + width)` where `start`
//! is a multiple of the width counted from the unix epoch:
//!
//! ```text
//! width = 60 s
//!
//! epoch                                                      t
//!   |-----------|-----------|-----------|-----------|--- ... -|
//!   0          60k        120k        180k        240k   (ms)
//!                              ^ reading at 130_500 ms
//!                              bucket start = 120_000 ms
//! ```
//!
//! The start depends only on the instant and the width. Two queries with
//! the same width, issued at different times or by different processes,
//! produce identical boundaries.
//!
//! Within a bucket each metric is averaged per source over the readings
//! that actually reported it. A source that reported only humidity in a
//! bucket has no temperature average there; it does not average in a zero.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::period::BucketWidth;
use crate::reading::{Reading, SourceId};
use crate::time::Timestamp;

/// Start of the bucket containing `timestamp`
pub fn bucket_start(timestamp: Timestamp, width: BucketWidth) -> Timestamp {
    let width_ms = width.millis();
    timestamp - timestamp % width_ms
}

/// Mean of one metric for one source in one bucket
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricAverage {
    /// Arithmetic mean of the contributing values
    pub mean: f64,
    /// Number of contributing values
    pub samples: u64,
}

/// Aggregate over one bucket window
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct Bucket {
    /// Inclusive window start, milliseconds since the epoch
    pub start: Timestamp,
    /// Per source, per metric averages; only contributing pairs are present
    pub sources: BTreeMap<SourceId, BTreeMap<String, MetricAverage>>,
}

impl Bucket {
    /// Empty bucket starting at `start`
    pub fn new(start: Timestamp) -> Self {
        Self {
            start,
            sources: BTreeMap::new(),
        }
    }

    /// Record an average computed elsewhere (e.g. by SQL)
    pub fn set_average(&mut self, source: SourceId, metric: String, average: MetricAverage) {
        self.sources.entry(source).or_default().insert(metric, average);
    }

    /// Average of `metric` for `source`, `None` when nothing contributed
    pub fn average(&self, source: &SourceId, metric: &str) -> Option<f64> {
        self.sources
            .get(source)
            .and_then(|metrics| metrics.get(metric))
            .map(|avg| avg.mean)
    }

    /// Whether any source contributed
    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Sum {
    total: f64,
    samples: u64,
}

/// Folds readings into buckets of a fixed width
///
/// Readings can arrive in any order. [`finish`](Self::finish) returns the
/// most recent non-empty buckets, newest first.
#[derive(Debug, Clone)]
pub struct BucketAccumulator {
    width: BucketWidth,
    buckets: BTreeMap<Timestamp, BTreeMap<SourceId, BTreeMap<String, Sum>>>,
}

impl BucketAccumulator {
    /// Accumulator for `width`
    pub fn new(width: BucketWidth) -> Self {
        Self {
            width,
            buckets: BTreeMap::new(),
        }
    }

    /// Add one reading to its bucket
    pub fn add(&mut self, reading: &Reading) {
        let start = bucket_start(reading.observed_at(), self.width);
        let per_metric = self
            .buckets
            .entry(start)
            .or_default()
            .entry(reading.source_id().clone())
            .or_default();

        for (metric, value) in reading.metrics() {
            let sum = per_metric.entry(metric.clone()).or_default();
            sum.total += value;
            sum.samples += 1;
        }
    }

    /// Number of distinct non-empty buckets seen so far
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no reading has been added
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }

    /// Up to `count` most recent buckets, ordered by start descending
    pub fn finish(self, count: usize) -> Vec<Bucket> {
        self.buckets
            .into_iter()
            .rev()
            .take(count)
            .map(|(start, sources)| Bucket {
                start,
                sources: sources
                    .into_iter()
                    .map(|(source, metrics)| {
                        let averages = metrics
                            .into_iter()
                            .map(|(metric, sum)| {
                                let average = MetricAverage {
                                    mean: sum.total / sum.samples as f64,
                                    samples: sum.samples,
                                };
                                (metric, average)
                            })
                            .collect();
                        (source, averages)
                    })
                    .collect(),
            })
            .collect()
    }
}
