//! Metrics collection for load runs
//!
//! Counters, rates and latency trends keyed by name and tags. Every
//! iteration writes into one shared [`MetricsSink`]; the report side only
//! ever reads an immutable [`MetricsSnapshot`] taken at teardown.

mod sink;
mod snapshot;

pub use sink::{Counter, MetricsSink, Rate, Trend};
pub use snapshot::{FinalValues, MetricsSnapshot, SeriesSnapshot, SeriesValue};
pub(crate) use snapshot::millis;

use std::collections::BTreeMap;

/// Tag set attached to a metric sample
pub type Tags = BTreeMap<String, String>;

/// Build a tag set from key/value pairs
pub fn tags<const N: usize>(pairs: [(&str, &str); N]) -> Tags {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

/// Metric and tag names recorded by steps and flows
pub mod names {
    /// Counter: one increment per step attempt
    pub const STEP_ATTEMPTS: &str = "step_attempts";
    /// Trend: one response-time sample per step attempt
    pub const STEP_DURATION: &str = "step_duration";
    /// Rate: one pass/fail sample per step attempt
    pub const STEP_SUCCESS: &str = "step_success";

    /// Counter: flows that reached DONE
    pub const FLOW_SUCCESS: &str = "flow_success";
    /// Counter: flows that ended ABORTED, tagged with `aborted_at`
    pub const FLOW_FAILURE: &str = "flow_failure";
    /// Rate: one sample per finished flow
    pub const FLOW_OK: &str = "flow_ok";
    /// Trend: end-to-end flow duration
    pub const FLOW_DURATION: &str = "flow_duration";

    pub const TAG_FLOW: &str = "flow";
    pub const TAG_STEP: &str = "step";
    pub const TAG_ABORTED_AT: &str = "aborted_at";
}
