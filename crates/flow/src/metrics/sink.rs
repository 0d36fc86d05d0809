//! Shared, concurrency-safe metrics sink
//!
//! All updates are accumulate-only: atomics for counters and rates, a locked
//! append-only sample buffer for latencies. No caller ever reads a total,
//! modifies it and writes it back.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;

use super::snapshot::{MetricsSnapshot, SeriesSnapshot, SeriesValue};
use super::{FinalValues, Tags};

/// Monotonic counter
#[derive(Debug, Default)]
pub struct Counter {
    count: AtomicU64,
}

impl Counter {
    pub fn add(&self, n: u64) {
        self.count.fetch_add(n, Ordering::Relaxed);
    }

    pub fn total(&self) -> u64 {
        self.count.load(Ordering::Relaxed)
    }
}

/// Ratio of passing samples to all samples
#[derive(Debug, Default)]
pub struct Rate {
    passes: AtomicU64,
    total: AtomicU64,
}

impl Rate {
    pub fn add(&self, passed: bool) {
        if passed {
            self.passes.fetch_add(1, Ordering::Relaxed);
        }
        self.total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn passes(&self) -> u64 {
        self.passes.load(Ordering::Relaxed)
    }

    pub fn total(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }
}

/// Latency samples, kept whole so percentiles are exact
///
/// Count, mean and extremes are derived from the sorted samples at snapshot
/// time, so recording is a single push.
#[derive(Debug, Default)]
pub struct Trend {
    samples: Mutex<Vec<Duration>>,
}

impl Trend {
    pub fn record(&self, duration: Duration) {
        self.samples.lock().push(duration);
    }

    pub fn len(&self) -> usize {
        self.samples.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copy of all samples, sorted ascending
    pub fn sorted_samples(&self) -> Vec<Duration> {
        let mut samples = self.samples.lock().clone();
        samples.sort_unstable();
        samples
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    tags: Tags,
}

impl SeriesKey {
    fn new(name: &str, tags: &Tags) -> Self {
        Self {
            name: name.to_string(),
            tags: tags.clone(),
        }
    }
}

/// Shared metrics sink
///
/// One instance lives for the whole run and is handed to every iteration
/// behind an `Arc`.
#[derive(Debug)]
pub struct MetricsSink {
    counters: DashMap<SeriesKey, Arc<Counter>>,
    rates: DashMap<SeriesKey, Arc<Rate>>,
    trends: DashMap<SeriesKey, Arc<Trend>>,
    start: Instant,
}

impl Default for MetricsSink {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsSink {
    pub fn new() -> Self {
        Self {
            counters: DashMap::new(),
            rates: DashMap::new(),
            trends: DashMap::new(),
            start: Instant::now(),
        }
    }

    /// `counter(name).add(n, tags)`
    pub fn add_counter(&self, name: &str, n: u64, tags: &Tags) {
        series(&self.counters, name, tags).add(n);
    }

    /// `rate(name).add(passed, tags)`
    pub fn add_rate(&self, name: &str, passed: bool, tags: &Tags) {
        series(&self.rates, name, tags).add(passed);
    }

    /// `trend(name).add(value, tags)`
    pub fn add_trend(&self, name: &str, value: Duration, tags: &Tags) {
        series(&self.trends, name, tags).record(value);
    }

    /// Time since the sink was created
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Final values of every series named `name`, merged across tags
    pub fn final_values(&self, name: &str) -> Option<FinalValues> {
        self.snapshot().final_values(name)
    }

    /// Final values of the `name` series whose tags contain `tag=value`
    pub fn final_values_where(&self, name: &str, tag: &str, value: &str) -> Option<FinalValues> {
        self.snapshot().final_values_where(name, tag, value)
    }

    /// Freeze the current state into an immutable, ordered snapshot
    pub fn snapshot(&self) -> MetricsSnapshot {
        let mut series =
            Vec::with_capacity(self.counters.len() + self.rates.len() + self.trends.len());

        for entry in self.counters.iter() {
            series.push(SeriesSnapshot {
                name: entry.key().name.clone(),
                tags: entry.key().tags.clone(),
                value: SeriesValue::Counter {
                    count: entry.value().total(),
                },
            });
        }

        for entry in self.rates.iter() {
            series.push(SeriesSnapshot {
                name: entry.key().name.clone(),
                tags: entry.key().tags.clone(),
                value: SeriesValue::Rate {
                    passes: entry.value().passes(),
                    total: entry.value().total(),
                },
            });
        }

        for entry in self.trends.iter() {
            series.push(SeriesSnapshot {
                name: entry.key().name.clone(),
                tags: entry.key().tags.clone(),
                value: SeriesValue::Trend {
                    samples: entry.value().sorted_samples(),
                },
            });
        }

        MetricsSnapshot::new(self.start.elapsed(), series)
    }
}

fn series<T: Default>(map: &DashMap<SeriesKey, Arc<T>>, name: &str, tags: &Tags) -> Arc<T> {
    let key = SeriesKey::new(name, tags);
    if let Some(existing) = map.get(&key) {
        return existing.clone();
    }
    map.entry(key).or_default().clone()
}
