//! Business flow orchestration
//!
//! A flow is an ordered chain of [`StepDefinition`]s driven by one generic
//! state machine:
//!
//! ```text
//! START ──▶ step[0] ──▶ step[1] ──▶ … ──▶ step[n-1] ──▶ DONE
//!              │           │                 │
//!              └───────────┴────── fail ─────┴──────▶ ABORTED(at)
//! ```
//!
//! Failure is fail-fast: the first failed step aborts the iteration and the
//! remaining steps never run, so their attempt counters never move.

mod think;

pub use think::{InvalidThinkTime, ThinkTime};

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::context::FlowContext;
use crate::http::HttpClient;
use crate::journal::ResponseJournal;
use crate::metrics::{names, tags, MetricsSink};
use crate::step::{StepDefinition, StepExecutor, StepResult};

/// Ordered, immutable step chain
#[derive(Debug, Clone)]
pub struct FlowDefinition {
    name: String,
    steps: Vec<StepDefinition>,
    auth_step: Option<usize>,
    user_identifier: Option<String>,
}

impl FlowDefinition {
    pub fn new(name: impl Into<String>, steps: Vec<StepDefinition>) -> Self {
        Self {
            name: name.into(),
            steps,
            auth_step: None,
            user_identifier: None,
        }
    }

    /// Step re-run to refresh the token when a step flagged
    /// `refresh_on_unauthorized` gets HTTP 401. Unknown names are ignored.
    pub fn with_auth_step(mut self, step: &str) -> Self {
        self.auth_step = self.steps.iter().position(|s| s.name() == step);
        self
    }

    /// User every iteration acts on behalf of
    pub fn with_user_identifier(mut self, user: impl Into<String>) -> Self {
        self.user_identifier = Some(user.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn steps(&self) -> &[StepDefinition] {
        &self.steps
    }

    pub fn auth_step(&self) -> Option<&StepDefinition> {
        self.auth_step.and_then(|i| self.steps.get(i))
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(StepDefinition::name).collect()
    }

    /// Human-readable name of a state (`START`, a step's state, `DONE`, `ABORTED`)
    pub fn state_label(&self, state: &FlowState) -> String {
        match state {
            FlowState::Start => "START".to_string(),
            FlowState::Running(i) => self
                .steps
                .get(*i)
                .map(|s| s.state().to_string())
                .unwrap_or_else(|| "UNKNOWN".to_string()),
            FlowState::Done => "DONE".to_string(),
            FlowState::Aborted { .. } => "ABORTED".to_string(),
        }
    }

    /// Fresh per-iteration context
    pub fn new_context(&self, iteration: u64) -> FlowContext {
        FlowContext::new(iteration, &self.step_names())
            .with_user_identifier(self.user_identifier.clone())
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    Start,
    /// Running the step at this index
    Running(usize),
    Done,
    /// Absorbing failure state; `at` is the index of the failed step
    Aborted { at: usize },
}

impl FlowState {
    /// Transition after the current step finished (or, from `Start`, on entry)
    pub fn advance(self, step_count: usize, success: bool) -> FlowState {
        match self {
            FlowState::Start if step_count == 0 => FlowState::Done,
            FlowState::Start => FlowState::Running(0),
            FlowState::Running(i) if !success => FlowState::Aborted { at: i },
            FlowState::Running(i) if i + 1 >= step_count => FlowState::Done,
            FlowState::Running(i) => FlowState::Running(i + 1),
            terminal => terminal,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, FlowState::Done | FlowState::Aborted { .. })
    }
}

/// What one iteration achieved
#[derive(Debug, Clone, PartialEq)]
pub struct FlowOutcome {
    pub iteration: u64,
    /// One flag per step, in chain order
    pub flags: Vec<(String, bool)>,
    pub state: FlowState,
    /// State label of the failed step when aborted
    pub aborted_at: Option<String>,
    /// Result of the last step that ran
    pub last_result: Option<StepResult>,
    pub duration: Duration,
}

impl FlowOutcome {
    /// True iff every step in the chain succeeded
    pub fn overall_ok(&self) -> bool {
        self.flags.iter().all(|(_, ok)| *ok)
    }

    pub fn step_ok(&self, step: &str) -> bool {
        self.flags.iter().any(|(name, ok)| name == step && *ok)
    }
}

/// Drives one flow per iteration
///
/// Holds nothing between iterations except the shared sink (and journal).
pub struct FlowOrchestrator {
    definition: Arc<FlowDefinition>,
    client: Arc<dyn HttpClient>,
    sink: Arc<MetricsSink>,
    journal: Option<Arc<ResponseJournal>>,
    think_time: ThinkTime,
}

impl FlowOrchestrator {
    pub fn new(
        definition: Arc<FlowDefinition>,
        client: Arc<dyn HttpClient>,
        sink: Arc<MetricsSink>,
    ) -> Self {
        Self {
            definition,
            client,
            sink,
            journal: None,
            think_time: ThinkTime::None,
        }
    }

    pub fn with_journal(mut self, journal: Arc<ResponseJournal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn with_think_time(mut self, think_time: ThinkTime) -> Self {
        self.think_time = think_time;
        self
    }

    pub fn definition(&self) -> &FlowDefinition {
        &self.definition
    }

    pub fn sink(&self) -> &Arc<MetricsSink> {
        &self.sink
    }

    /// Run one end-to-end flow, record its outcome, then apply think-time
    ///
    /// Never fails: every problem ends up as an `ABORTED` outcome and metrics.
    pub async fn run_iteration(&self, iteration: u64) -> FlowOutcome {
        let definition = &*self.definition;
        let steps = definition.steps();
        let executor = StepExecutor::new(&*self.client, &self.sink, definition.name())
            .with_auth_step(definition.auth_step())
            .with_journal(self.journal.as_deref());

        let mut ctx = definition.new_context(iteration);
        let started = Instant::now();
        let mut last_result = None;
        let mut state = FlowState::Start.advance(steps.len(), true);

        while let FlowState::Running(i) = state {
            let step = &steps[i];
            let result = executor.execute(step, &mut ctx).await;
            ctx.mark(step.name(), result.success);

            let next = state.advance(steps.len(), result.success);
            debug!(
                flow = definition.name(),
                iteration,
                from = %definition.state_label(&state),
                to = %definition.state_label(&next),
                "flow transition"
            );
            state = next;
            last_result = Some(result);
        }

        let aborted_at = match state {
            FlowState::Aborted { at } => Some(definition.state_label(&FlowState::Running(at))),
            _ => None,
        };

        let outcome = FlowOutcome {
            iteration,
            flags: ctx.into_flags(),
            state,
            aborted_at,
            last_result,
            duration: started.elapsed(),
        };

        self.record(&outcome);
        self.think_time.pause().await;
        outcome
    }

    fn record(&self, outcome: &FlowOutcome) {
        let flow = self.definition.name();
        let flow_tags = tags([(names::TAG_FLOW, flow)]);

        self.sink
            .add_rate(names::FLOW_OK, outcome.overall_ok(), &flow_tags);
        self.sink
            .add_trend(names::FLOW_DURATION, outcome.duration, &flow_tags);

        match &outcome.aborted_at {
            None => {
                self.sink.add_counter(names::FLOW_SUCCESS, 1, &flow_tags);
                info!(
                    flow,
                    iteration = outcome.iteration,
                    duration_ms = outcome.duration.as_secs_f64() * 1000.0,
                    "business flow succeeded"
                );
            }
            Some(at) => {
                let failure_tags = tags([
                    (names::TAG_FLOW, flow),
                    (names::TAG_ABORTED_AT, at.as_str()),
                ]);
                self.sink.add_counter(names::FLOW_FAILURE, 1, &failure_tags);
                let last = outcome.last_result.as_ref();
                warn!(
                    flow,
                    iteration = outcome.iteration,
                    aborted_at = %at,
                    flags = ?outcome.flags,
                    status = last.map(|r| r.http_status),
                    error = last.and_then(|r| r.error_message.as_deref()),
                    "business flow aborted"
                );
            }
        }
    }
}
