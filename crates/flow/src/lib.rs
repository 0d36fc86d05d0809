//! # Signload flow core
//!
//! Business-flow orchestration and metrics aggregation for load testing a
//! document-signing API.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                        LoadRunner                            │
//! │  (fixed concurrency, iteration count and/or deadline)       │
//! └─────────────────────────────────────────────────────────────┘
//!                              │ one call per iteration
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     FlowOrchestrator                         │
//! │  (START → step… → DONE | ABORTED(at), fail-fast)            │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//! ┌──────────────────────────┐      ┌──────────────────────────┐
//! │      StepExecutor        │ ───▶ │       HttpClient         │
//! │ (predicate, repeat, poll)│      │ (reqwest, or scripted)   │
//! └──────────────────────────┘      └──────────────────────────┘
//!                              │
//!                              ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  MetricsSink ──snapshot──▶ AggregateReport ──▶ ReportWriter  │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```ignore
//! use signload_flow::prelude::*;
//!
//! let config = SignloadConfig::from_env()?;
//! let signing = config.signing_config(config.load_document()?);
//! let definition = Arc::new(flow_for(config.flow, signing));
//! let client = Arc::new(ReqwestClient::new(config.request_timeout)?);
//! let sink = Arc::new(MetricsSink::new());
//!
//! let orchestrator = Arc::new(FlowOrchestrator::new(definition.clone(), client, sink));
//! let summary = LoadRunner::new(config.load).run(orchestrator).await;
//! let report = AggregateReport::from_snapshot("Signing load", &definition, &summary.snapshot);
//! ```

pub mod config;
pub mod context;
pub mod flow;
pub mod http;
pub mod journal;
pub mod metrics;
pub mod report;
pub mod runner;
pub mod signing;
pub mod step;
pub mod testing;
pub mod thresholds;

/// Prelude for common imports
pub mod prelude {
    pub use crate::config::{ConfigError, SignloadConfig};
    pub use crate::context::FlowContext;
    pub use crate::flow::{
        FlowDefinition, FlowOrchestrator, FlowOutcome, FlowState, ThinkTime,
    };
    pub use crate::http::{
        FileAttachment, HttpClient, HttpRequest, HttpResponse, ReqwestClient, TransportError,
    };
    pub use crate::journal::ResponseJournal;
    pub use crate::metrics::{names, FinalValues, MetricsSink, MetricsSnapshot};
    pub use crate::report::{
        AggregateReport, ReportArtifacts, ReportConfig, ReportWriter, REPORT_TEMPLATE,
    };
    pub use crate::runner::{LoadProfile, LoadRunner, RunHooks, RunSummary};
    pub use crate::signing::{basic_flow, flow_for, full_flow, FlowVariant, SigningConfig};
    pub use crate::step::{PollPolicy, StepDefinition, StepError, StepExecutor, StepResult};
    pub use crate::thresholds::{evaluate_all, parse_thresholds, Threshold, ThresholdResult};
}
