//! Flow steps
//!
//! A [`StepDefinition`] describes one named HTTP interaction declaratively:
//! how to build the request from the context, what counts as success, and
//! what to keep from a successful response. [`StepExecutor`] runs it.
//!
//! Every attempt records exactly one attempt-counter increment, one
//! response-time sample and one success-rate sample, whatever happened.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::context::FlowContext;
use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
use crate::journal::ResponseJournal;
use crate::metrics::{names, tags, MetricsSink};

/// Why a step attempt failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A value an earlier step should have stored is absent
    #[error("missing context value: {0}")]
    MissingContext(&'static str),

    #[error("unexpected response (HTTP {status})")]
    UnexpectedResponse { status: u16 },

    /// The predicate passed but the expected value could not be extracted
    #[error("could not extract {0} from response")]
    Extraction(String),

    #[error("still pending after {checks} status checks (last HTTP {last_status})")]
    PollExhausted { checks: u32, last_status: u16 },
}

impl StepError {
    /// HTTP status associated with the failure, `0` when none was received
    pub fn http_status(&self) -> u16 {
        match self {
            StepError::UnexpectedResponse { status } => *status,
            StepError::PollExhausted { last_status, .. } => *last_status,
            _ => 0,
        }
    }
}

pub type RequestFn = Arc<dyn Fn(&FlowContext) -> Result<HttpRequest, StepError> + Send + Sync>;
pub type PredicateFn = Arc<dyn Fn(&HttpResponse) -> bool + Send + Sync>;
pub type OnSuccessFn =
    Arc<dyn Fn(&mut FlowContext, &HttpResponse) -> Result<(), StepError> + Send + Sync>;

/// Re-issue the request until `done` matches
#[derive(Clone)]
pub struct PollPolicy {
    pub interval: Duration,
    pub max_checks: u32,
    pub done: PredicateFn,
}

impl PollPolicy {
    pub fn new(
        interval: Duration,
        max_checks: u32,
        done: impl Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            interval,
            max_checks: max_checks.max(1),
            done: Arc::new(done),
        }
    }
}

impl fmt::Debug for PollPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PollPolicy")
            .field("interval", &self.interval)
            .field("max_checks", &self.max_checks)
            .finish_non_exhaustive()
    }
}

/// One named HTTP interaction
#[derive(Clone)]
pub struct StepDefinition {
    name: String,
    state: String,
    request: RequestFn,
    success_predicate: PredicateFn,
    on_success: OnSuccessFn,
    repeat: u32,
    poll: Option<PollPolicy>,
    refresh_on_unauthorized: bool,
}

impl StepDefinition {
    /// Step succeeding on any 2xx response and storing nothing
    pub fn new(
        name: impl Into<String>,
        request: impl Fn(&FlowContext) -> Result<HttpRequest, StepError> + Send + Sync + 'static,
    ) -> Self {
        let name = name.into();
        Self {
            state: name.to_uppercase(),
            name,
            request: Arc::new(request),
            success_predicate: Arc::new(HttpResponse::is_success),
            on_success: Arc::new(|_, _| Ok(())),
            repeat: 1,
            poll: None,
            refresh_on_unauthorized: false,
        }
    }

    /// Name of the orchestrator state this step runs in (defaults to the upper-cased name)
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = state.into();
        self
    }

    pub fn with_success_predicate(
        mut self,
        predicate: impl Fn(&HttpResponse) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.success_predicate = Arc::new(predicate);
        self
    }

    pub fn on_success(
        mut self,
        f: impl Fn(&mut FlowContext, &HttpResponse) -> Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        self.on_success = Arc::new(f);
        self
    }

    /// Run the request `times` times in sequence; each run is its own attempt
    pub fn with_repeat(mut self, times: u32) -> Self {
        self.repeat = times.max(1);
        self
    }

    pub fn with_poll(mut self, poll: PollPolicy) -> Self {
        self.poll = Some(poll);
        self
    }

    /// On HTTP 401, re-run the flow's auth step once and retry this step once
    pub fn refresh_on_unauthorized(mut self) -> Self {
        self.refresh_on_unauthorized = true;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> &str {
        &self.state
    }

    pub fn repeat(&self) -> u32 {
        self.repeat
    }

    pub fn poll(&self) -> Option<&PollPolicy> {
        self.poll.as_ref()
    }

    pub fn refreshes_on_unauthorized(&self) -> bool {
        self.refresh_on_unauthorized
    }
}

impl fmt::Debug for StepDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepDefinition")
            .field("name", &self.name)
            .field("state", &self.state)
            .field("repeat", &self.repeat)
            .field("poll", &self.poll)
            .field("refresh_on_unauthorized", &self.refresh_on_unauthorized)
            .finish_non_exhaustive()
    }
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq)]
pub struct StepResult {
    pub success: bool,
    /// `0` when no response was received
    pub http_status: u16,
    pub response_time: Duration,
    pub error_message: Option<String>,
}

impl StepResult {
    pub fn is_unauthorized(&self) -> bool {
        self.http_status == 401
    }

    pub fn response_time_ms(&self) -> f64 {
        self.response_time.as_secs_f64() * 1000.0
    }
}

/// Runs step definitions against an HTTP client and records their metrics
pub struct StepExecutor<'a> {
    client: &'a dyn HttpClient,
    sink: &'a MetricsSink,
    flow: &'a str,
    auth_step: Option<&'a StepDefinition>,
    journal: Option<&'a ResponseJournal>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(client: &'a dyn HttpClient, sink: &'a MetricsSink, flow: &'a str) -> Self {
        Self {
            client,
            sink,
            flow,
            auth_step: None,
            journal: None,
        }
    }

    /// Step re-run to obtain a fresh token when a step gets HTTP 401
    pub fn with_auth_step(mut self, auth_step: Option<&'a StepDefinition>) -> Self {
        self.auth_step = auth_step;
        self
    }

    pub fn with_journal(mut self, journal: Option<&'a ResponseJournal>) -> Self {
        self.journal = journal;
        self
    }

    /// Execute every repetition of `step`, stopping at the first failure
    pub async fn execute(&self, step: &StepDefinition, ctx: &mut FlowContext) -> StepResult {
        let mut result = self.attempt_with_refresh(step, ctx).await;
        for _ in 1..step.repeat {
            if !result.success {
                break;
            }
            result = self.attempt_with_refresh(step, ctx).await;
        }
        result
    }

    async fn attempt_with_refresh(&self, step: &StepDefinition, ctx: &mut FlowContext) -> StepResult {
        let result = self.attempt(step, ctx).await;
        if result.success || !result.is_unauthorized() || !step.refresh_on_unauthorized {
            return result;
        }

        let Some(auth) = self.auth_step.filter(|auth| auth.name != step.name) else {
            return result;
        };

        warn!(
            flow = self.flow,
            step = %step.name,
            iteration = ctx.iteration,
            "got 401, refreshing token and retrying once"
        );

        let refreshed = self.attempt(auth, ctx).await;
        if !refreshed.success {
            return result;
        }
        self.attempt(step, ctx).await
    }

    /// One attempt: build, send (or poll), evaluate, record
    pub async fn attempt(&self, step: &StepDefinition, ctx: &mut FlowContext) -> StepResult {
        let started = Instant::now();
        let exchange = self.exchange(step, ctx).await;
        let response_time = started.elapsed();

        let result = match exchange {
            Ok(response) => {
                let verdict = if (step.success_predicate)(&response) {
                    (step.on_success)(ctx, &response)
                } else {
                    Err(StepError::UnexpectedResponse {
                        status: response.status,
                    })
                };
                StepResult {
                    success: verdict.is_ok(),
                    http_status: response.status,
                    response_time,
                    error_message: verdict.err().map(|e| e.to_string()),
                }
            }
            Err(err) => StepResult {
                success: false,
                http_status: err.http_status(),
                response_time,
                error_message: Some(err.to_string()),
            },
        };

        self.record(step, &result);

        debug!(
            flow = self.flow,
            step = %step.name,
            iteration = ctx.iteration,
            success = result.success,
            status = result.http_status,
            duration_ms = result.response_time_ms(),
            error = result.error_message.as_deref(),
            "step attempt finished"
        );

        result
    }

    async fn exchange(
        &self,
        step: &StepDefinition,
        ctx: &FlowContext,
    ) -> Result<HttpResponse, StepError> {
        let request = (step.request)(ctx)?;

        let Some(poll) = &step.poll else {
            return self.send(step, ctx, request).await;
        };

        let mut last_status = 0;
        for check in 1..=poll.max_checks {
            let response = self.send(step, ctx, request.clone()).await?;
            if !(step.success_predicate)(&response) || (poll.done)(&response) {
                debug!(step = %step.name, check, "status polling finished");
                return Ok(response);
            }
            last_status = response.status;
            if check < poll.max_checks {
                tokio::time::sleep(poll.interval).await;
            }
        }

        Err(StepError::PollExhausted {
            checks: poll.max_checks,
            last_status,
        })
    }

    async fn send(
        &self,
        step: &StepDefinition,
        ctx: &FlowContext,
        request: HttpRequest,
    ) -> Result<HttpResponse, StepError> {
        let url = request.url.clone();
        let response = self.client.send(request).await?;
        if let Some(journal) = self.journal {
            journal.record(ctx.iteration, &step.name, &url, &response);
        }
        Ok(response)
    }

    fn record(&self, step: &StepDefinition, result: &StepResult) {
        let tags = tags([(names::TAG_FLOW, self.flow), (names::TAG_STEP, step.name.as_str())]);
        self.sink.add_counter(names::STEP_ATTEMPTS, 1, &tags);
        self.sink
            .add_trend(names::STEP_DURATION, result.response_time, &tags);
        self.sink.add_rate(names::STEP_SUCCESS, result.success, &tags);
    }
}
