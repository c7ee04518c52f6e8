//! Orchestrator - walks graph batches, launches services and verifies health

use crate::runtime::cancel::{CancelSignal, CancelTrigger};
use crate::runtime::dependency::DependencyGraph;
use crate::runtime::health::{HealthChecker, HealthError, PollPolicy};
use crate::runtime::launcher::{LaunchError, Launcher};
use crate::runtime::probe::Probe;
use crate::runtime::report::RunReport;
use crate::runtime::retry::RetryPolicy;
use crate::runtime::service::ServiceSpec;
use crate::runtime::state::{RunState, ServiceEvent, ServiceOutcome, ServiceStatus};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio::time::Instant;

/// Orchestrator configuration
#[derive(Debug, Clone, Default)]
pub struct OrchestratorConfig {
    /// Retry policy for services that do not declare their own
    pub retry: RetryPolicy,
    /// Probe polling cadence
    pub poll: PollPolicy,
    /// Treat every service as healthy as soon as its launch returns
    pub skip_health_checks: bool,
}

type EventSender = mpsc::UnboundedSender<(String, ServiceEvent)>;

/// Brings a dependency graph up batch by batch
pub struct Orchestrator {
    launcher: Arc<dyn Launcher>,
    checker: HealthChecker,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(launcher: Arc<dyn Launcher>, config: OrchestratorConfig) -> Self {
        Self {
            launcher,
            checker: HealthChecker::new(config.poll),
            config,
        }
    }

    /// Run every batch in order and report.
    ///
    /// Per-service failures never surface as errors: they end up in the report.
    /// Firing `shutdown` aborts the run the same way a critical failure does.
    pub async fn run(&self, graph: &DependencyGraph, mut shutdown: CancelSignal) -> RunReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        let mut state = RunState::new(graph);
        let (abort, abort_signal) = CancelSignal::pair();
        state.start();

        let total = graph.batches().len();
        log::info!("Starting {} services in {} batches", graph.len(), total);

        let preflight = tokio::select! {
            biased;
            _ = shutdown.cancelled() => Ok(()),
            result = self.launcher.preflight() => result,
        };
        if let Err(e) = preflight {
            log::error!("Runtime pre-flight check failed: {}", e);
            state.abort(format!("runtime pre-flight failed: {}", e));
        }

        for (index, batch) in graph.batches().iter().enumerate() {
            if shutdown.is_cancelled() {
                state.abort("shutdown requested");
            }
            if state.is_aborted() {
                break;
            }

            log::info!("Batch {}/{}: {}", index + 1, total, batch.join(", "));
            self.run_batch(graph, batch, &mut state, &abort, &abort_signal, &mut shutdown)
                .await;
        }

        if state.is_aborted() {
            let reason = format!(
                "run aborted: {}",
                state.abort_reason().unwrap_or("unknown reason")
            );
            state.skip_pending(&reason);
        }
        state.complete();

        let report = state.into_report(started_at, clock.elapsed());
        log::info!(
            "Run finished: {} ({} healthy, {} failed, {} skipped)",
            report.outcome,
            report.count(ServiceStatus::Healthy),
            report.count(ServiceStatus::Failed),
            report.count(ServiceStatus::Skipped)
        );
        report
    }

    /// Launch one batch concurrently and wait until every member is terminal
    async fn run_batch(
        &self,
        graph: &DependencyGraph,
        batch: &[String],
        state: &mut RunState,
        abort: &CancelTrigger,
        abort_signal: &CancelSignal,
        shutdown: &mut CancelSignal,
    ) {
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        let mut tasks: JoinSet<(String, Result<ServiceOutcome, JoinError>)> = JoinSet::new();

        for name in batch {
            let Some(spec) = graph.get(name) else {
                continue;
            };

            let blocked = spec.depends_on.iter().find_map(|dep| match state.status(dep) {
                Some(ServiceStatus::Healthy) => None,
                status => Some((dep, status)),
            });
            if let Some((dep, status)) = blocked {
                let status = status.map(|s| s.to_string()).unwrap_or_else(|| "unknown".into());
                state.mark_skipped(name, format!("dependency '{}' is {}", dep, status));
                continue;
            }

            let task = self.service_task(spec, abort_signal.clone(), event_tx.clone());
            let name = name.clone();
            // Inner spawn turns a panic into a JoinError we can attribute to `name`
            tasks.spawn(async move {
                let result = tokio::spawn(task.run()).await;
                (name, result)
            });
        }
        drop(event_tx);

        let mut shutdown_seen = false;
        loop {
            tokio::select! {
                biased;

                Some((name, event)) = event_rx.recv() => state.apply(&name, event),

                _ = shutdown.cancelled(), if !shutdown_seen => {
                    shutdown_seen = true;
                    log::warn!("Shutdown requested, cancelling in-flight services");
                    state.abort("shutdown requested");
                    abort.cancel();
                }

                joined = tasks.join_next() => {
                    let Some(joined) = joined else {
                        break;
                    };
                    match joined {
                        Ok((name, result)) => {
                            while let Ok((name, event)) = event_rx.try_recv() {
                                state.apply(&name, event);
                            }
                            let outcome = match result {
                                Ok(outcome) => outcome,
                                Err(error) => {
                                    let attempts = state
                                        .record(&name)
                                        .map(|r| r.attempts)
                                        .unwrap_or_default();
                                    crashed_outcome(name, attempts, error)
                                }
                            };
                            Self::record_outcome(graph, state, abort, outcome);
                        }
                        Err(e) => log::error!("Service supervisor task failed: {}", e),
                    }
                }
            }
        }
    }

    fn record_outcome(
        graph: &DependencyGraph,
        state: &mut RunState,
        abort: &CancelTrigger,
        outcome: ServiceOutcome,
    ) {
        let name = outcome.name.clone();
        let critical = graph.get(&name).map(|s| s.critical).unwrap_or(false);
        let failed = outcome.status == ServiceStatus::Failed;

        if failed {
            log::error!(
                "[{}] Failed after {} attempt(s): {}",
                name,
                outcome.attempts,
                outcome.error.as_deref().unwrap_or("unknown error")
            );
        } else {
            log::info!(
                "[{}] Healthy after {} attempt(s) in {:.1}s",
                name,
                outcome.attempts,
                outcome.elapsed.as_secs_f64()
            );
        }

        state.finish(outcome);

        if failed && critical && !state.is_aborted() {
            state.abort(format!("critical service '{}' failed", name));
            abort.cancel();
        }
    }

    fn service_task(
        &self,
        spec: &ServiceSpec,
        cancel: CancelSignal,
        events: EventSender,
    ) -> ServiceTask {
        ServiceTask {
            name: spec.name.clone(),
            launcher: Arc::clone(&self.launcher),
            checker: self.checker.clone(),
            probe: if self.config.skip_health_checks {
                None
            } else {
                spec.health_probe.clone()
            },
            start_timeout: spec.start_timeout,
            retry: spec.retry.unwrap_or(self.config.retry),
            cancel,
            events,
        }
    }

    /// Stop every service in reverse launch order, collecting per-service results
    pub async fn teardown(&self, graph: &DependencyGraph) -> Vec<(String, Result<(), LaunchError>)> {
        log::info!("Stopping {} services...", graph.len());
        let mut results = Vec::with_capacity(graph.len());
        for spec in graph.shutdown_order() {
            let result = self.launcher.stop(&spec.name).await;
            if let Err(e) = &result {
                log::error!("[{}] Error stopping service: {}", spec.name, e);
            }
            results.push((spec.name.clone(), result));
        }
        log::info!("All services stopped");
        results
    }
}

fn crashed_outcome(name: String, attempts: u32, error: JoinError) -> ServiceOutcome {
    let message = if error.is_panic() {
        let payload = error.into_panic();
        if let Some(text) = payload.downcast_ref::<&str>() {
            text.to_string()
        } else if let Some(text) = payload.downcast_ref::<String>() {
            text.clone()
        } else {
            "unknown panic".to_string()
        }
    } else {
        error.to_string()
    };

    ServiceOutcome {
        name,
        status: ServiceStatus::Failed,
        attempts: attempts.max(1),
        elapsed: Duration::ZERO,
        error: Some(format!("unexpected failure: service task panicked: {}", message)),
        last_signal: None,
    }
}

enum AttemptFailure {
    Cancelled,
    Retryable {
        error: String,
        signal: Option<String>,
    },
    Fatal(String),
}

/// Everything one service needs to run its launch/verify loop on its own task
struct ServiceTask {
    name: String,
    launcher: Arc<dyn Launcher>,
    checker: HealthChecker,
    probe: Option<Arc<dyn Probe>>,
    start_timeout: Duration,
    retry: RetryPolicy,
    cancel: CancelSignal,
    events: EventSender,
}

impl ServiceTask {
    async fn run(mut self) -> ServiceOutcome {
        let started = Instant::now();
        let mut last_signal: Option<String> = None;
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            self.emit(ServiceEvent::Launching { attempt });

            let (error, retryable) = match self.attempt(attempt).await {
                Ok(_) => {
                    return self.outcome(ServiceStatus::Healthy, attempt, started, None, last_signal);
                }
                Err(AttemptFailure::Cancelled) => {
                    return self.cancelled(attempt, started, last_signal);
                }
                Err(AttemptFailure::Fatal(error)) => (error, false),
                Err(AttemptFailure::Retryable { error, signal }) => {
                    if signal.is_some() {
                        last_signal = signal;
                    }
                    (error, true)
                }
            };

            if !retryable || !self.retry.has_attempts_left(attempt) {
                return self.outcome(
                    ServiceStatus::Failed,
                    attempt,
                    started,
                    Some(error),
                    last_signal,
                );
            }

            let delay = self.retry.backoff(attempt);
            log::warn!(
                "[{}] Attempt {}/{} failed: {}; retrying in {:?}",
                self.name,
                attempt,
                self.retry.max_attempts,
                error,
                delay
            );
            self.emit(ServiceEvent::AttemptFailed {
                attempt,
                error,
                signal: last_signal.clone(),
            });

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return self.cancelled(attempt, started, last_signal);
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One launch plus health verification, bounded by `start_timeout`
    async fn attempt(&mut self, attempt: u32) -> Result<Duration, AttemptFailure> {
        let started = Instant::now();

        let launched = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(AttemptFailure::Cancelled),
            result = tokio::time::timeout(self.start_timeout, self.launcher.launch(&self.name)) => result,
        };

        match launched {
            Ok(Ok(handle)) => match handle.detail {
                Some(detail) => log::info!("[{}] Launched (attempt {}): {}", self.name, attempt, detail),
                None => log::info!("[{}] Launched (attempt {})", self.name, attempt),
            },
            Ok(Err(e)) if e.is_retryable() => {
                return Err(AttemptFailure::Retryable {
                    error: e.to_string(),
                    signal: None,
                });
            }
            Ok(Err(e)) => return Err(AttemptFailure::Fatal(e.to_string())),
            Err(_) => {
                return Err(AttemptFailure::Retryable {
                    error: LaunchError::TimedOut(self.start_timeout).to_string(),
                    signal: None,
                });
            }
        }

        self.emit(ServiceEvent::WaitingHealthy { attempt });
        let remaining = self.start_timeout.saturating_sub(started.elapsed());

        match self
            .checker
            .wait_until_healthy(self.probe.as_deref(), remaining, &mut self.cancel)
            .await
        {
            Ok(elapsed) => Ok(elapsed),
            Err(HealthError::Cancelled { .. }) => Err(AttemptFailure::Cancelled),
            Err(e) => Err(AttemptFailure::Retryable {
                signal: e.last_signal().map(str::to_string),
                error: e.to_string(),
            }),
        }
    }

    fn emit(&self, event: ServiceEvent) {
        // The orchestrator outlives every task in its batch; a closed channel only
        // means the run is being torn down
        let _ = self.events.send((self.name.clone(), event));
    }

    fn cancelled(&self, attempt: u32, started: Instant, last_signal: Option<String>) -> ServiceOutcome {
        log::warn!("[{}] Cancelled: run aborted", self.name);
        self.outcome(
            ServiceStatus::Failed,
            attempt,
            started,
            Some("cancelled: run aborted".to_string()),
            last_signal,
        )
    }

    fn outcome(
        &self,
        status: ServiceStatus,
        attempts: u32,
        started: Instant,
        error: Option<String>,
        last_signal: Option<String>,
    ) -> ServiceOutcome {
        ServiceOutcome {
            name: self.name.clone(),
            status,
            attempts,
            elapsed: started.elapsed(),
            error,
            last_signal,
        }
    }
}
