//! Per-run mutable state, owned by the orchestrator

use crate::runtime::dependency::DependencyGraph;
use crate::runtime::report::{RunOutcome, RunReport, ServiceReport};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::Serialize;
use std::time::Duration;

/// Per-service lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStatus {
    /// Not attempted yet
    Pending,
    /// Launch requested
    Launching,
    /// Launched, probe polling in progress
    WaitingHealthy,
    /// Probe succeeded
    Healthy,
    /// Gave up after retries, or cancelled mid-flight
    Failed,
    /// Never attempted
    Skipped,
}

impl ServiceStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Healthy | ServiceStatus::Failed | ServiceStatus::Skipped
        )
    }

    /// Allowed transitions; `WaitingHealthy -> Launching` is a relaunch after a health timeout
    pub fn can_transition_to(&self, next: ServiceStatus) -> bool {
        use ServiceStatus::*;
        matches!(
            (*self, next),
            (Pending, Launching)
                | (Pending, Skipped)
                | (Launching, Launching)
                | (Launching, WaitingHealthy)
                | (WaitingHealthy, Launching)
                | (WaitingHealthy, Healthy)
                | (Launching | WaitingHealthy, Failed)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Launching => "launching",
            ServiceStatus::WaitingHealthy => "waiting_healthy",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Failed => "failed",
            ServiceStatus::Skipped => "skipped",
        }
    }
}

impl std::fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Run-level phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunPhase {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// Progress message sent from a service task to the orchestrator
#[derive(Debug, Clone)]
pub enum ServiceEvent {
    /// Attempt `attempt` is calling the launcher
    Launching { attempt: u32 },
    /// Launch returned; waiting on the probe
    WaitingHealthy { attempt: u32 },
    /// Attempt failed and will be retried
    AttemptFailed {
        attempt: u32,
        error: String,
        signal: Option<String>,
    },
}

/// Final result of one service task
#[derive(Debug, Clone)]
pub struct ServiceOutcome {
    pub name: String,
    /// `Healthy` or `Failed`
    pub status: ServiceStatus,
    pub attempts: u32,
    pub elapsed: Duration,
    pub error: Option<String>,
    pub last_signal: Option<String>,
}

/// Bookkeeping for one service
#[derive(Debug, Clone)]
pub struct ServiceRecord {
    pub status: ServiceStatus,
    pub critical: bool,
    pub batch: usize,
    pub attempts: u32,
    pub elapsed: Duration,
    pub last_error: Option<String>,
    pub last_signal: Option<String>,
}

/// Status map for one run. Only the orchestrator mutates it.
#[derive(Debug)]
pub struct RunState {
    phase: RunPhase,
    records: IndexMap<String, ServiceRecord>,
    abort_reason: Option<String>,
}

impl RunState {
    /// All services `Pending`, recorded in launch order
    pub fn new(graph: &DependencyGraph) -> Self {
        let records = graph
            .launch_order()
            .map(|spec| {
                (
                    spec.name.clone(),
                    ServiceRecord {
                        status: ServiceStatus::Pending,
                        critical: spec.critical,
                        batch: graph.batch_index(&spec.name).unwrap_or_default(),
                        attempts: 0,
                        elapsed: Duration::ZERO,
                        last_error: None,
                        last_signal: None,
                    },
                )
            })
            .collect();

        Self {
            phase: RunPhase::NotStarted,
            records,
            abort_reason: None,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn is_aborted(&self) -> bool {
        self.phase == RunPhase::Aborted
    }

    pub fn abort_reason(&self) -> Option<&str> {
        self.abort_reason.as_deref()
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.records.get(name).map(|r| r.status)
    }

    pub fn record(&self, name: &str) -> Option<&ServiceRecord> {
        self.records.get(name)
    }

    pub fn start(&mut self) {
        if self.phase == RunPhase::NotStarted {
            self.phase = RunPhase::Running;
        }
    }

    /// Move to `Aborted`; the first reason wins
    pub fn abort(&mut self, reason: impl Into<String>) {
        if self.phase == RunPhase::Aborted {
            return;
        }
        let reason = reason.into();
        log::error!("Run aborted: {}", reason);
        self.phase = RunPhase::Aborted;
        self.abort_reason = Some(reason);
    }

    /// `Running -> Completed` unless already aborted
    pub fn complete(&mut self) {
        if self.phase == RunPhase::Running {
            self.phase = RunPhase::Completed;
        }
    }

    fn transition(&mut self, name: &str, next: ServiceStatus) -> bool {
        let Some(record) = self.records.get_mut(name) else {
            log::warn!("[{}] Ignoring transition to {} for unknown service", name, next);
            return false;
        };
        if !record.status.can_transition_to(next) {
            log::debug!(
                "[{}] Ignoring transition {} -> {}",
                name,
                record.status,
                next
            );
            return false;
        }
        record.status = next;
        true
    }

    pub fn apply(&mut self, name: &str, event: ServiceEvent) {
        match event {
            ServiceEvent::Launching { attempt } => {
                if self.transition(name, ServiceStatus::Launching) {
                    if let Some(record) = self.records.get_mut(name) {
                        record.attempts = attempt;
                    }
                }
            }
            ServiceEvent::WaitingHealthy { .. } => {
                self.transition(name, ServiceStatus::WaitingHealthy);
            }
            ServiceEvent::AttemptFailed {
                attempt,
                error,
                signal,
            } => {
                if let Some(record) = self.records.get_mut(name) {
                    record.attempts = record.attempts.max(attempt);
                    record.last_error = Some(error);
                    if signal.is_some() {
                        record.last_signal = signal;
                    }
                }
            }
        }
    }

    /// Record a task's final outcome
    pub fn finish(&mut self, outcome: ServiceOutcome) {
        let Some(record) = self.records.get_mut(&outcome.name) else {
            return;
        };
        if record.status.is_terminal() {
            return;
        }
        record.status = outcome.status;
        record.attempts = record.attempts.max(outcome.attempts);
        record.elapsed = outcome.elapsed;
        if outcome.error.is_some() {
            record.last_error = outcome.error;
        }
        if outcome.last_signal.is_some() {
            record.last_signal = outcome.last_signal;
        }
    }

    /// `Pending -> Skipped` for a single service
    pub fn mark_skipped(&mut self, name: &str, reason: impl Into<String>) {
        if self.transition(name, ServiceStatus::Skipped) {
            let reason = reason.into();
            log::warn!("[{}] Skipped: {}", name, reason);
            if let Some(record) = self.records.get_mut(name) {
                record.last_error = Some(reason);
            }
        }
    }

    /// Skip every service that never left `Pending`
    pub fn skip_pending(&mut self, reason: &str) {
        let pending: Vec<String> = self
            .records
            .iter()
            .filter(|(_, r)| r.status == ServiceStatus::Pending)
            .map(|(name, _)| name.clone())
            .collect();
        for name in pending {
            self.mark_skipped(&name, reason);
        }
    }

    pub fn outcome(&self) -> RunOutcome {
        if self.phase == RunPhase::Aborted {
            RunOutcome::Aborted
        } else if self
            .records
            .values()
            .all(|r| r.status == ServiceStatus::Healthy)
        {
            RunOutcome::AllHealthy
        } else {
            RunOutcome::PartialFailure
        }
    }

    /// Consume the state into the final report
    pub fn into_report(self, started_at: DateTime<Utc>, elapsed: Duration) -> RunReport {
        let outcome = self.outcome();
        let services = self
            .records
            .into_iter()
            .map(|(name, record)| ServiceReport {
                name,
                status: record.status,
                critical: record.critical,
                batch: record.batch,
                attempts: record.attempts,
                elapsed_ms: millis(record.elapsed),
                last_error: record.last_error,
                last_signal: record.last_signal,
            })
            .collect();

        RunReport {
            outcome,
            started_at,
            elapsed_ms: millis(elapsed),
            abort_reason: self.abort_reason,
            services,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}
