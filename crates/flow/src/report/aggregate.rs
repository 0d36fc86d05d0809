//! End-of-run aggregation of the metrics snapshot

use std::collections::BTreeMap;

use serde::Serialize;

use crate::flow::FlowDefinition;
use crate::metrics::{millis, names, FinalValues, MetricsSnapshot};
use crate::thresholds::ThresholdResult;

/// One row per declared step, in chain order
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct StepRow {
    pub name: String,
    pub state: String,
    /// Attempts
    pub count: u64,
    /// Attempts per second over the run
    pub rate_per_sec: f64,
    /// Share of attempts that passed, `0` when the step was never attempted
    pub success_pct: f64,
    /// `100 - success_pct` once attempted; `0` (not `100`) for a step that was
    /// never reached, so unreached steps do not read as failing
    pub failure_pct: f64,
    pub avg_ms: f64,
    pub min_ms: f64,
    pub p90_ms: f64,
    pub p95_ms: f64,
    pub p99_ms: f64,
    pub max_ms: f64,
}

/// Aggregate row for the whole business flow
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct FlowRow {
    pub name: String,
    /// Iterations that reached DONE or ABORTED
    pub count: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub success_pct: f64,
    /// `100 - success_pct`, or `0` when no iteration finished
    pub failure_pct: f64,
    pub avg_ms: f64,
    pub p95_ms: f64,
    /// Aborted iterations per state label
    pub aborted_at: BTreeMap<String, u64>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AggregateReport {
    pub title: String,
    pub duration_secs: f64,
    pub flow: FlowRow,
    pub steps: Vec<StepRow>,
    pub thresholds: Vec<ThresholdResult>,
}

impl AggregateReport {
    /// Build the report for `definition` from a frozen snapshot
    ///
    /// Steps that never ran show zeros. Pure: the same inputs always give the
    /// same report.
    pub fn from_snapshot(
        title: impl Into<String>,
        definition: &FlowDefinition,
        snapshot: &MetricsSnapshot,
    ) -> Self {
        let steps = definition
            .steps()
            .iter()
            .map(|step| {
                let by_step = |metric: &str| {
                    snapshot
                        .final_values_where(metric, names::TAG_STEP, step.name())
                        .unwrap_or_default()
                };
                let attempts = by_step(names::STEP_ATTEMPTS);
                let success = by_step(names::STEP_SUCCESS);
                let duration = by_step(names::STEP_DURATION);
                let (success_pct, failure_pct) = percentages(attempts.count, success.rate);

                StepRow {
                    name: step.name().to_string(),
                    state: step.state().to_string(),
                    count: attempts.count,
                    rate_per_sec: round2(attempts.rate),
                    success_pct,
                    failure_pct,
                    avg_ms: ms(duration.avg),
                    min_ms: ms(duration.min),
                    p90_ms: ms(duration.p(0.90)),
                    p95_ms: ms(duration.p(0.95)),
                    p99_ms: ms(duration.p(0.99)),
                    max_ms: ms(duration.max),
                }
            })
            .collect();

        Self {
            title: title.into(),
            duration_secs: round2(snapshot.elapsed().as_secs_f64()),
            flow: flow_row(definition.name(), snapshot),
            steps,
            thresholds: Vec::new(),
        }
    }

    pub fn with_thresholds(mut self, thresholds: Vec<ThresholdResult>) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepRow> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// True when no threshold failed (or none were configured)
    pub fn thresholds_passed(&self) -> bool {
        self.thresholds.iter().all(|t| t.passed)
    }

    /// Deterministic pretty JSON
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

fn flow_row(name: &str, snapshot: &MetricsSnapshot) -> FlowRow {
    let get = |metric: &str| snapshot.final_values(metric).unwrap_or_default();
    let ok = get(names::FLOW_OK);
    let duration: FinalValues = get(names::FLOW_DURATION);
    let (success_pct, failure_pct) = percentages(ok.count, ok.rate);

    let aborted_at = snapshot
        .tag_values(names::FLOW_FAILURE, names::TAG_ABORTED_AT)
        .into_iter()
        .map(|state| {
            let count = snapshot
                .final_values_where(names::FLOW_FAILURE, names::TAG_ABORTED_AT, &state)
                .map(|v| v.count)
                .unwrap_or(0);
            (state, count)
        })
        .collect();

    FlowRow {
        name: name.to_string(),
        count: ok.count,
        success_count: get(names::FLOW_SUCCESS).count,
        failure_count: get(names::FLOW_FAILURE).count,
        success_pct,
        failure_pct,
        avg_ms: ms(duration.avg),
        p95_ms: ms(duration.p(0.95)),
        aborted_at,
    }
}

/// Success and failure percentages; both zero when nothing was sampled
fn percentages(count: u64, success_rate: f64) -> (f64, f64) {
    if count == 0 {
        return (0.0, 0.0);
    }
    let success = round2(success_rate * 100.0);
    (success, round2(100.0 - success))
}

fn ms(d: std::time::Duration) -> f64 {
    round2(millis(d))
}

pub(crate) fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::http::HttpRequest;
    use crate::metrics::{tags, MetricsSink};
    use crate::step::StepDefinition;

    fn definition() -> FlowDefinition {
        let step = |name: &str, state: &str| {
            StepDefinition::new(name, |_| Ok(HttpRequest::post("http://api"))).with_state(state)
        };
        FlowDefinition::new(
            "basic",
            vec![
                step("get_token", "TOKEN"),
                step("upload_file", "UPLOAD"),
                step("request_sign", "SIGNATURE"),
            ],
        )
    }

    fn record_attempt(sink: &MetricsSink, step: &str, ok: bool, ms: u64) {
        let t = tags([(names::TAG_FLOW, "basic"), (names::TAG_STEP, step)]);
        sink.add_counter(names::STEP_ATTEMPTS, 1, &t);
        sink.add_trend(names::STEP_DURATION, Duration::from_millis(ms), &t);
        sink.add_rate(names::STEP_SUCCESS, ok, &t);
    }

    #[test]
    fn test_unreached_steps_report_zero() {
        let sink = MetricsSink::new();
        record_attempt(&sink, "get_token", false, 40);

        let report = AggregateReport::from_snapshot("t", &definition(), &sink.snapshot());

        let token = report.step("get_token").unwrap();
        assert_eq!(token.count, 1);
        assert_eq!(token.success_pct, 0.0);
        assert_eq!(token.failure_pct, 100.0);
        assert_eq!(token.avg_ms, 40.0);

        let upload = report.step("upload_file").unwrap();
        assert_eq!(upload.count, 0);
        assert_eq!(upload.rate_per_sec, 0.0);
        assert_eq!(upload.avg_ms, 0.0);
        assert_eq!(upload.failure_pct, 0.0);
    }

    #[test]
    fn test_flow_row_counts_and_drop_off() {
        let sink = MetricsSink::new();
        let flow = tags([(names::TAG_FLOW, "basic")]);
        for ok in [true, true, true, false] {
            sink.add_rate(names::FLOW_OK, ok, &flow);
            sink.add_trend(names::FLOW_DURATION, Duration::from_millis(100), &flow);
        }
        sink.add_counter(names::FLOW_SUCCESS, 3, &flow);
        sink.add_counter(
            names::FLOW_FAILURE,
            1,
            &tags([(names::TAG_FLOW, "basic"), (names::TAG_ABORTED_AT, "UPLOAD")]),
        );

        let report = AggregateReport::from_snapshot("t", &definition(), &sink.snapshot());

        assert_eq!(report.flow.count, 4);
        assert_eq!(report.flow.success_count, 3);
        assert_eq!(report.flow.failure_count, 1);
        assert_eq!(report.flow.success_pct, 75.0);
        assert_eq!(report.flow.failure_pct, 25.0);
        assert_eq!(report.flow.aborted_at.get("UPLOAD"), Some(&1));
    }

    #[test]
    fn test_report_json_is_deterministic() {
        let sink = MetricsSink::new();
        for (i, step) in ["get_token", "upload_file", "request_sign"].iter().enumerate() {
            record_attempt(&sink, step, i != 2, 10 * (i as u64 + 1));
        }
        let snapshot = sink.snapshot();

        let a = AggregateReport::from_snapshot("t", &definition(), &snapshot).to_json().unwrap();
        let b = AggregateReport::from_snapshot("t", &definition(), &snapshot).to_json().unwrap();
        assert_eq!(a, b);
    }
}
