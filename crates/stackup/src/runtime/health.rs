//! Poll-until-healthy with bounded timeout and cancellation

use crate::runtime::cancel::CancelSignal;
use crate::runtime::probe::{HealthProbeResult, Probe};
use std::time::Duration;
use tokio::time::Instant;

/// Floor for any polling interval so a target is never hammered
pub const MIN_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Polling cadence: start at `initial_interval`, double up to `max_interval`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    pub initial_interval: Duration,
    pub max_interval: Duration,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            initial_interval: Duration::from_secs(2),
            max_interval: Duration::from_secs(10),
        }
    }
}

impl PollPolicy {
    pub fn new(initial_interval: Duration, max_interval: Duration) -> Self {
        let initial_interval = initial_interval.max(MIN_POLL_INTERVAL);
        Self {
            initial_interval,
            max_interval: max_interval.max(initial_interval),
        }
    }

    /// Fixed interval, no growth
    pub fn fixed(interval: Duration) -> Self {
        Self::new(interval, interval)
    }

    fn next_interval(&self, current: Duration) -> Duration {
        current.saturating_mul(2).min(self.max_interval)
    }
}

/// Polls probes until they report healthy
#[derive(Debug, Clone, Default)]
pub struct HealthChecker {
    policy: PollPolicy,
}

impl HealthChecker {
    pub fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> PollPolicy {
        self.policy
    }

    /// Wait until `probe` succeeds, `timeout` elapses, or `cancel` fires.
    ///
    /// Unsuccessful evaluations are not errors; they only count as "not yet".
    /// The wait never outlives `timeout` by more than one polling interval.
    pub async fn wait_until_healthy(
        &self,
        probe: Option<&dyn Probe>,
        timeout: Duration,
        cancel: &mut CancelSignal,
    ) -> Result<Duration, HealthError> {
        let Some(probe) = probe else {
            return Ok(Duration::ZERO);
        };

        let started = Instant::now();
        // None when the timeout is too large to represent: wait without a deadline
        let deadline = started.checked_add(timeout);
        let mut interval = self.policy.initial_interval;
        let mut polls: u32 = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(HealthError::Cancelled {
                    elapsed: started.elapsed(),
                });
            }

            let mut budget = probe.invocation_timeout();
            if let Some(deadline) = deadline {
                budget = budget.min(deadline.saturating_duration_since(Instant::now()));
            }
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HealthError::Cancelled { elapsed: started.elapsed() });
                }
                result = Self::evaluate(probe, budget) => result,
            };
            polls += 1;

            if result.success {
                log::debug!(
                    "Probe {} healthy after {} poll(s): {}",
                    probe.describe(),
                    polls,
                    result.observed_signal
                );
                return Ok(started.elapsed());
            }

            log::trace!(
                "Probe {} not healthy yet: {}",
                probe.describe(),
                result.observed_signal
            );

            let mut pause = interval;
            if let Some(deadline) = deadline {
                let now = Instant::now();
                if now >= deadline {
                    return Err(HealthError::Timeout {
                        timeout,
                        elapsed: started.elapsed(),
                        last: Some(result),
                    });
                }
                pause = pause.min(deadline - now);
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(HealthError::Cancelled { elapsed: started.elapsed() });
                }
                _ = tokio::time::sleep(pause) => {}
            }
            interval = self.policy.next_interval(interval);
        }
    }

    async fn evaluate(probe: &dyn Probe, budget: Duration) -> HealthProbeResult {
        let started = Instant::now();
        match tokio::time::timeout(budget, probe.check()).await {
            Ok(result) => result,
            Err(_) => HealthProbeResult::unhealthy(
                format!("probe timed out after {:?}", budget),
                started.elapsed(),
            ),
        }
    }
}

fn describe_last(last: &Option<HealthProbeResult>) -> String {
    match last {
        Some(result) => result.observed_signal.clone(),
        None => "no probe result".to_string(),
    }
}

/// Errors returned by [`HealthChecker::wait_until_healthy`]
#[derive(Debug, Clone, thiserror::Error)]
pub enum HealthError {
    #[error("not healthy within {timeout:?} (last signal: {})", describe_last(.last))]
    Timeout {
        timeout: Duration,
        elapsed: Duration,
        last: Option<HealthProbeResult>,
    },

    #[error("health wait cancelled after {elapsed:?}")]
    Cancelled { elapsed: Duration },
}

impl HealthError {
    /// Last observed probe signal, if any
    pub fn last_signal(&self) -> Option<&str> {
        match self {
            HealthError::Timeout { last, .. } => {
                last.as_ref().map(|r| r.observed_signal.as_str())
            }
            HealthError::Cancelled { .. } => None,
        }
    }
}
