//! Fixed-concurrency load driver
//!
//! Runs the orchestrator once per iteration with at most `vus` iterations in
//! flight, until the iteration count is reached or the run deadline passes.
//! Iterations still running at the deadline are cancelled.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::flow::FlowOrchestrator;
use crate::metrics::MetricsSnapshot;

const PROGRESS_EVERY: u64 = 100;

/// Shape of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadProfile {
    /// Concurrent virtual users
    pub vus: usize,
    /// Total iterations; unlimited when `None` (requires `max_duration`)
    pub iterations: Option<u64>,
    pub max_duration: Option<Duration>,
}

impl Default for LoadProfile {
    fn default() -> Self {
        Self {
            vus: 1,
            iterations: Some(1),
            max_duration: None,
        }
    }
}

impl LoadProfile {
    /// A run with neither an iteration count nor a duration does one iteration
    pub fn new(vus: usize, iterations: Option<u64>, max_duration: Option<Duration>) -> Self {
        let iterations = match (iterations, max_duration) {
            (None, None) => Some(1),
            (iterations, _) => iterations,
        };
        Self {
            vus: vus.max(1),
            iterations,
            max_duration,
        }
    }
}

/// Setup and teardown around a run
#[async_trait]
pub trait RunHooks: Send + Sync {
    async fn setup(&self) {}

    async fn teardown(&self, _summary: &RunSummary) {}
}

/// Hooks that do nothing
pub struct NoHooks;

impl RunHooks for NoHooks {}

/// What a run did
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub iterations_started: u64,
    pub iterations_completed: u64,
    pub flows_succeeded: u64,
    pub elapsed: Duration,
    /// Iterations were cancelled at the run deadline
    pub cancelled_at_deadline: bool,
    pub snapshot: MetricsSnapshot,
}

impl RunSummary {
    pub fn flows_failed(&self) -> u64 {
        self.iterations_completed - self.flows_succeeded
    }
}

#[derive(Default)]
struct Progress {
    completed: AtomicU64,
    succeeded: AtomicU64,
}

pub struct LoadRunner {
    profile: LoadProfile,
}

impl LoadRunner {
    pub fn new(profile: LoadProfile) -> Self {
        Self { profile }
    }

    pub fn profile(&self) -> &LoadProfile {
        &self.profile
    }

    pub async fn run(&self, orchestrator: Arc<FlowOrchestrator>) -> RunSummary {
        self.run_with_hooks(orchestrator, &NoHooks).await
    }

    pub async fn run_with_hooks(
        &self,
        orchestrator: Arc<FlowOrchestrator>,
        hooks: &dyn RunHooks,
    ) -> RunSummary {
        let profile = self.profile;
        info!(
            flow = orchestrator.definition().name(),
            vus = profile.vus,
            iterations = ?profile.iterations,
            max_duration = ?profile.max_duration,
            "starting load run"
        );

        hooks.setup().await;

        let started = Instant::now();
        let deadline = profile.max_duration.map(|d| started + d);
        let semaphore = Arc::new(Semaphore::new(profile.vus));
        let progress = Arc::new(Progress::default());
        let mut tasks = JoinSet::new();
        let mut iteration: u64 = 0;

        loop {
            if profile.iterations.is_some_and(|limit| iteration >= limit) {
                break;
            }
            if deadline.is_some_and(|d| Instant::now() >= d) {
                break;
            }

            let acquire = semaphore.clone().acquire_owned();
            let permit = match deadline {
                Some(d) => match tokio::time::timeout_at(d, acquire).await {
                    Ok(Ok(permit)) => permit,
                    _ => break,
                },
                None => match acquire.await {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let task_orchestrator = orchestrator.clone();
            let task_progress = progress.clone();
            tasks.spawn(async move {
                let outcome = task_orchestrator.run_iteration(iteration).await;
                task_progress.completed.fetch_add(1, Ordering::Relaxed);
                if outcome.overall_ok() {
                    task_progress.succeeded.fetch_add(1, Ordering::Relaxed);
                }
                drop(permit);
            });

            iteration += 1;
            if iteration % PROGRESS_EVERY == 0 {
                let completed = progress.completed.load(Ordering::Relaxed);
                let secs = started.elapsed().as_secs_f64();
                info!(
                    started = iteration,
                    completed,
                    per_sec = if secs > 0.0 { completed as f64 / secs } else { 0.0 },
                    "load run progress"
                );
            }
        }

        let drained = match deadline {
            Some(d) => tokio::time::timeout_at(d, drain(&mut tasks)).await.is_ok(),
            None => {
                drain(&mut tasks).await;
                true
            }
        };
        if !drained {
            warn!(
                in_flight = tasks.len(),
                "run deadline reached, cancelling in-flight iterations"
            );
            tasks.abort_all();
            drain(&mut tasks).await;
        }

        let summary = RunSummary {
            iterations_started: iteration,
            iterations_completed: progress.completed.load(Ordering::Relaxed),
            flows_succeeded: progress.succeeded.load(Ordering::Relaxed),
            elapsed: started.elapsed(),
            cancelled_at_deadline: !drained,
            snapshot: orchestrator.sink().snapshot(),
        };

        info!(
            started = summary.iterations_started,
            completed = summary.iterations_completed,
            succeeded = summary.flows_succeeded,
            failed = summary.flows_failed(),
            elapsed_secs = summary.elapsed.as_secs_f64(),
            "load run finished"
        );

        hooks.teardown(&summary).await;
        summary
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(result) = tasks.join_next().await {
        if let Err(e) = result {
            if !e.is_cancelled() {
                warn!(error = %e, "iteration task failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::flow::FlowDefinition;
    use crate::http::{HttpClient, HttpRequest, HttpResponse, TransportError};
    use crate::metrics::{names, MetricsSink};
    use crate::step::StepDefinition;
    use crate::testing::ScriptedClient;

    fn one_step_flow() -> Arc<FlowDefinition> {
        Arc::new(FlowDefinition::new(
            "ping",
            vec![StepDefinition::new("ping", |_| {
                Ok(HttpRequest::get("http://api/ping"))
            })],
        ))
    }

    /// Answers after a delay and remembers the highest concurrency seen
    #[derive(Default)]
    struct SlowClient {
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl HttpClient for SlowClient {
        async fn send(&self, _request: HttpRequest) -> Result<HttpResponse, TransportError> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            Ok(HttpResponse::new(200, "{}"))
        }
    }

    #[derive(Default)]
    struct CountingHooks {
        setup: AtomicU64,
        teardown_completed: AtomicU64,
    }

    #[async_trait]
    impl RunHooks for CountingHooks {
        async fn setup(&self) {
            self.setup.fetch_add(1, Ordering::SeqCst);
        }

        async fn teardown(&self, summary: &RunSummary) {
            self.teardown_completed
                .store(summary.iterations_completed, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_profile_defaults_to_one_iteration() {
        let profile = LoadProfile::new(0, None, None);
        assert_eq!(profile.vus, 1);
        assert_eq!(profile.iterations, Some(1));

        let timed = LoadProfile::new(4, None, Some(Duration::from_secs(5)));
        assert_eq!(timed.iterations, None);
    }

    #[tokio::test]
    async fn test_runs_every_iteration() {
        let client = Arc::new(ScriptedClient::new().route("/ping", 200, "{}"));
        let sink = Arc::new(MetricsSink::new());
        let orchestrator = Arc::new(FlowOrchestrator::new(one_step_flow(), client, sink.clone()));
        let hooks = CountingHooks::default();

        let runner = LoadRunner::new(LoadProfile::new(3, Some(10), None));
        let summary = runner.run_with_hooks(orchestrator, &hooks).await;

        assert_eq!(summary.iterations_started, 10);
        assert_eq!(summary.iterations_completed, 10);
        assert_eq!(summary.flows_succeeded, 10);
        assert_eq!(summary.flows_failed(), 0);
        assert!(!summary.cancelled_at_deadline);
        assert_eq!(hooks.setup.load(Ordering::SeqCst), 1);
        assert_eq!(hooks.teardown_completed.load(Ordering::SeqCst), 10);
        assert_eq!(
            summary.snapshot.final_values(names::FLOW_SUCCESS).unwrap().count,
            10
        );
    }

    #[tokio::test]
    async fn test_long_run_counts_every_outcome() {
        let client = Arc::new(
            ScriptedClient::new()
                .respond(500, "{}")
                .route("/ping", 200, "{}"),
        );
        let sink = Arc::new(MetricsSink::new());
        let orchestrator = Arc::new(FlowOrchestrator::new(one_step_flow(), client, sink));
        let total = PROGRESS_EVERY * 2 + 5;

        let summary = LoadRunner::new(LoadProfile::new(8, Some(total), None))
            .run(orchestrator)
            .await;

        assert_eq!(summary.iterations_started, total);
        assert_eq!(summary.iterations_completed, total);
        assert_eq!(summary.flows_succeeded, total - 1);
        assert_eq!(summary.flows_failed(), 1);
        assert_eq!(
            summary.snapshot.final_values(names::STEP_ATTEMPTS).unwrap().count,
            total
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_is_bounded_by_vus() {
        let client = Arc::new(SlowClient::default());
        let sink = Arc::new(MetricsSink::new());
        let orchestrator = Arc::new(FlowOrchestrator::new(
            one_step_flow(),
            client.clone(),
            sink,
        ));

        let summary = LoadRunner::new(LoadProfile::new(2, Some(6), None))
            .run(orchestrator)
            .await;

        assert_eq!(summary.iterations_completed, 6);
        assert_eq!(client.peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_cancels_in_flight_iterations() {
        let client = Arc::new(SlowClient::default());
        let sink = Arc::new(MetricsSink::new());
        let orchestrator = Arc::new(FlowOrchestrator::new(one_step_flow(), client, sink));

        let summary = LoadRunner::new(LoadProfile::new(
            1,
            Some(100),
            Some(Duration::from_millis(250)),
        ))
        .run(orchestrator)
        .await;

        assert!(summary.iterations_completed < 100);
        assert!(summary.iterations_completed >= 2);
        assert!(summary.iterations_started <= summary.iterations_completed + 1);
    }
}
