//! Immutable end-of-run view of the metrics sink

use std::collections::BTreeMap;
use std::time::Duration;

use super::Tags;

/// Value held by one series at snapshot time
#[derive(Debug, Clone, PartialEq)]
pub enum SeriesValue {
    Counter { count: u64 },
    Rate { passes: u64, total: u64 },
    /// Samples sorted ascending
    Trend { samples: Vec<Duration> },
}

/// One (name, tags) series
#[derive(Debug, Clone, PartialEq)]
pub struct SeriesSnapshot {
    pub name: String,
    pub tags: Tags,
    pub value: SeriesValue,
}

impl SeriesSnapshot {
    /// `name{k=v,...}`, or just `name` when untagged
    pub fn id(&self) -> String {
        if self.tags.is_empty() {
            return self.name.clone();
        }
        let tags = self
            .tags
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join(",");
        format!("{}{{{}}}", self.name, tags)
    }
}

/// Aggregate values read back for one metric
///
/// Counters report their total as `count` and per-second throughput as
/// `rate`. Rates report the number of samples as `count` and the pass ratio
/// as `rate`. Trends report the sample count and the latency distribution.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FinalValues {
    pub count: u64,
    pub rate: f64,
    pub avg: Duration,
    pub min: Duration,
    pub max: Duration,
    sorted: Vec<Duration>,
}

impl FinalValues {
    /// Percentile (0.0 to 1.0) of the merged samples; zero when there are none
    pub fn p(&self, q: f64) -> Duration {
        if self.sorted.is_empty() {
            return Duration::ZERO;
        }
        let idx = ((self.sorted.len() as f64 * q) as usize).min(self.sorted.len() - 1);
        self.sorted[idx]
    }
}

/// Frozen copy of every series, ordered by name then tags
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsSnapshot {
    elapsed: Duration,
    series: Vec<SeriesSnapshot>,
}

impl MetricsSnapshot {
    pub fn new(elapsed: Duration, mut series: Vec<SeriesSnapshot>) -> Self {
        series.sort_by(|a, b| (&a.name, &a.tags).cmp(&(&b.name, &b.tags)));
        Self { elapsed, series }
    }

    /// Snapshot with no recorded series
    pub fn empty(elapsed: Duration) -> Self {
        Self::new(elapsed, Vec::new())
    }

    /// Run time covered by the snapshot
    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    pub fn series(&self) -> &[SeriesSnapshot] {
        &self.series
    }

    /// Merge every series named `name`; `None` when nothing was recorded
    pub fn final_values(&self, name: &str) -> Option<FinalValues> {
        self.merge(self.series.iter().filter(|s| s.name == name))
    }

    /// Merge the `name` series whose tags contain `tag=value`
    pub fn final_values_where(&self, name: &str, tag: &str, value: &str) -> Option<FinalValues> {
        self.merge(
            self.series
                .iter()
                .filter(|s| s.name == name && s.tags.get(tag).map(String::as_str) == Some(value)),
        )
    }

    /// Distinct values of `tag` across the series named `name`
    pub fn tag_values(&self, name: &str, tag: &str) -> Vec<String> {
        let mut values: Vec<String> = self
            .series
            .iter()
            .filter(|s| s.name == name)
            .filter_map(|s| s.tags.get(tag).cloned())
            .collect();
        values.sort();
        values.dedup();
        values
    }

    /// Flat `series.field -> number` view used for the machine-readable summary
    pub fn key_values(&self) -> BTreeMap<String, f64> {
        let mut out = BTreeMap::new();
        for series in &self.series {
            let id = series.id();
            match &series.value {
                SeriesValue::Counter { count } => {
                    out.insert(format!("{}.count", id), *count as f64);
                    out.insert(format!("{}.rate", id), per_second(*count, self.elapsed));
                }
                SeriesValue::Rate { passes, total } => {
                    out.insert(format!("{}.passes", id), *passes as f64);
                    out.insert(format!("{}.fails", id), (total - passes) as f64);
                    out.insert(format!("{}.rate", id), ratio(*passes, *total));
                }
                SeriesValue::Trend { samples } => {
                    let values = trend_values(samples.clone());
                    out.insert(format!("{}.count", id), values.count as f64);
                    out.insert(format!("{}.avg_ms", id), millis(values.avg));
                    out.insert(format!("{}.min_ms", id), millis(values.min));
                    out.insert(format!("{}.med_ms", id), millis(values.p(0.50)));
                    out.insert(format!("{}.p90_ms", id), millis(values.p(0.90)));
                    out.insert(format!("{}.p95_ms", id), millis(values.p(0.95)));
                    out.insert(format!("{}.p99_ms", id), millis(values.p(0.99)));
                    out.insert(format!("{}.max_ms", id), millis(values.max));
                }
            }
        }
        out
    }

    fn merge<'a>(&self, matching: impl Iterator<Item = &'a SeriesSnapshot>) -> Option<FinalValues> {
        let mut found = false;
        let mut counter_total = 0u64;
        let mut passes = 0u64;
        let mut total = 0u64;
        let mut samples: Vec<Duration> = Vec::new();
        let mut kind = None;

        for series in matching {
            found = true;
            match &series.value {
                SeriesValue::Counter { count } => {
                    counter_total += count;
                    kind.get_or_insert("counter");
                }
                SeriesValue::Rate {
                    passes: p,
                    total: t,
                } => {
                    passes += p;
                    total += t;
                    kind.get_or_insert("rate");
                }
                SeriesValue::Trend { samples: s } => {
                    samples.extend_from_slice(s);
                    kind.get_or_insert("trend");
                }
            }
        }

        if !found {
            return None;
        }

        Some(match kind {
            Some("counter") => FinalValues {
                count: counter_total,
                rate: per_second(counter_total, self.elapsed),
                ..FinalValues::default()
            },
            Some("rate") => FinalValues {
                count: total,
                rate: ratio(passes, total),
                ..FinalValues::default()
            },
            _ => {
                samples.sort();
                trend_values(samples)
            }
        })
    }
}

fn trend_values(sorted: Vec<Duration>) -> FinalValues {
    if sorted.is_empty() {
        return FinalValues::default();
    }
    let count = sorted.len() as u64;
    let sum: Duration = sorted.iter().sum();
    FinalValues {
        count,
        rate: 0.0,
        avg: sum / count as u32,
        min: sorted[0],
        max: sorted[sorted.len() - 1],
        sorted,
    }
}

fn ratio(passes: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        passes as f64 / total as f64
    }
}

fn per_second(count: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs == 0.0 {
        0.0
    } else {
        count as f64 / secs
    }
}

pub(crate) fn millis(d: Duration) -> f64 {
    d.as_secs_f64() * 1000.0
}
