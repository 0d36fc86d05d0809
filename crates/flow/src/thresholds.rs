//! Run pass/fail gates
//!
//! Expressions look like `upload_file:p95<800`, `get_token:error_rate<0.05`
//! or `flow:success_rate>0.95`. Latencies are in milliseconds, rates are
//! ratios in `[0, 1]`. They are evaluated once, against the final report.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;
use thiserror::Error;

use crate::report::AggregateReport;

/// Target name that addresses the whole business flow instead of a step
pub const FLOW_TARGET: &str = "flow";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ThresholdError {
    #[error("threshold '{0}' must look like '<step>:<metric><op><value>'")]
    Malformed(String),

    #[error("unknown metric '{metric}' in threshold '{expression}'")]
    UnknownMetric { expression: String, metric: String },

    #[error("invalid limit in threshold '{0}'")]
    InvalidLimit(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdMetric {
    Count,
    Avg,
    Min,
    Max,
    P90,
    P95,
    P99,
    ErrorRate,
    SuccessRate,
}

impl ThresholdMetric {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "count" => ThresholdMetric::Count,
            "avg" => ThresholdMetric::Avg,
            "min" => ThresholdMetric::Min,
            "max" => ThresholdMetric::Max,
            "p90" => ThresholdMetric::P90,
            "p95" => ThresholdMetric::P95,
            "p99" => ThresholdMetric::P99,
            "error_rate" => ThresholdMetric::ErrorRate,
            "success_rate" => ThresholdMetric::SuccessRate,
            _ => return None,
        })
    }

    /// Metrics the flow row carries
    fn available_for_flow(self) -> bool {
        matches!(
            self,
            ThresholdMetric::Count
                | ThresholdMetric::Avg
                | ThresholdMetric::P95
                | ThresholdMetric::ErrorRate
                | ThresholdMetric::SuccessRate
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Lt,
    Le,
    Gt,
    Ge,
}

impl Comparison {
    fn holds(self, observed: f64, limit: f64) -> bool {
        match self {
            Comparison::Lt => observed < limit,
            Comparison::Le => observed <= limit,
            Comparison::Gt => observed > limit,
            Comparison::Ge => observed >= limit,
        }
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Comparison::Lt => "<",
            Comparison::Le => "<=",
            Comparison::Gt => ">",
            Comparison::Ge => ">=",
        };
        f.write_str(op)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Threshold {
    pub target: String,
    pub metric: ThresholdMetric,
    pub comparison: Comparison,
    pub limit: f64,
    expression: String,
}

/// Verdict for one threshold
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ThresholdResult {
    pub expression: String,
    pub observed: f64,
    pub passed: bool,
}

impl FromStr for Threshold {
    type Err = ThresholdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let expression: String = s.chars().filter(|c| !c.is_whitespace()).collect();
        let malformed = || ThresholdError::Malformed(s.trim().to_string());

        let (target, condition) = expression.split_once(':').ok_or_else(malformed)?;
        let op_at = condition.find(['<', '>']).ok_or_else(malformed)?;
        let (metric, rest) = condition.split_at(op_at);

        let (comparison, limit) = match rest.split_at(1) {
            ("<", limit) => match limit.strip_prefix('=') {
                Some(limit) => (Comparison::Le, limit),
                None => (Comparison::Lt, limit),
            },
            (_, limit) => match limit.strip_prefix('=') {
                Some(limit) => (Comparison::Ge, limit),
                None => (Comparison::Gt, limit),
            },
        };

        if target.is_empty() || metric.is_empty() {
            return Err(malformed());
        }

        let unknown = || ThresholdError::UnknownMetric {
            expression: expression.clone(),
            metric: metric.to_string(),
        };
        let parsed_metric = ThresholdMetric::parse(metric).ok_or_else(unknown)?;
        if target == FLOW_TARGET && !parsed_metric.available_for_flow() {
            return Err(unknown());
        }

        let limit: f64 = limit
            .parse()
            .map_err(|_| ThresholdError::InvalidLimit(expression.clone()))?;
        if !limit.is_finite() {
            return Err(ThresholdError::InvalidLimit(expression));
        }

        Ok(Threshold {
            target: target.to_string(),
            metric: parsed_metric,
            comparison,
            limit,
            expression,
        })
    }
}

impl Threshold {
    pub fn expression(&self) -> &str {
        &self.expression
    }

    /// Observed value; zero when the target has no data
    pub fn observe(&self, report: &AggregateReport) -> f64 {
        if self.target == FLOW_TARGET {
            let flow = &report.flow;
            return match self.metric {
                ThresholdMetric::Count => flow.count as f64,
                ThresholdMetric::Avg => flow.avg_ms,
                ThresholdMetric::P95 => flow.p95_ms,
                ThresholdMetric::ErrorRate => flow.failure_pct / 100.0,
                ThresholdMetric::SuccessRate => flow.success_pct / 100.0,
                _ => 0.0,
            };
        }

        let Some(step) = report.step(&self.target) else {
            return 0.0;
        };
        match self.metric {
            ThresholdMetric::Count => step.count as f64,
            ThresholdMetric::Avg => step.avg_ms,
            ThresholdMetric::Min => step.min_ms,
            ThresholdMetric::Max => step.max_ms,
            ThresholdMetric::P90 => step.p90_ms,
            ThresholdMetric::P95 => step.p95_ms,
            ThresholdMetric::P99 => step.p99_ms,
            ThresholdMetric::ErrorRate => step.failure_pct / 100.0,
            ThresholdMetric::SuccessRate => step.success_pct / 100.0,
        }
    }

    pub fn evaluate(&self, report: &AggregateReport) -> ThresholdResult {
        let observed = self.observe(report);
        ThresholdResult {
            expression: self.expression.clone(),
            observed,
            passed: self.comparison.holds(observed, self.limit),
        }
    }
}

/// Parse a comma-separated list; blank entries are skipped
pub fn parse_thresholds(list: &str) -> Result<Vec<Threshold>, ThresholdError> {
    list.split(',')
        .filter(|part| !part.trim().is_empty())
        .map(str::parse)
        .collect()
}

pub fn evaluate_all(thresholds: &[Threshold], report: &AggregateReport) -> Vec<ThresholdResult> {
    thresholds.iter().map(|t| t.evaluate(report)).collect()
}
