//! Scripted launcher and probe doubles for orchestrator tests

#![allow(dead_code)]

use async_trait::async_trait;
use stackup::runtime::{HealthProbeResult, LaunchError, LaunchHandle, Launcher, Probe};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// What one `launch` call does
#[derive(Debug, Clone)]
pub enum LaunchStep {
    Succeed,
    /// Succeed after a delay
    Slow(Duration),
    Reject,
    Unexpected,
    Panic,
    /// Never return
    Hang,
}

/// Launcher following a per-service script; unscripted calls succeed
#[derive(Debug)]
pub struct ScriptedLauncher {
    epoch: Instant,
    scripts: Mutex<HashMap<String, VecDeque<LaunchStep>>>,
    calls: Mutex<Vec<(String, Duration)>>,
    stops: Mutex<Vec<String>>,
    preflight: Option<LaunchError>,
}

impl ScriptedLauncher {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
            scripts: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            stops: Mutex::new(Vec::new()),
            preflight: None,
        }
    }

    /// Make the runtime pre-flight check fail with `error`
    pub fn failing_preflight(mut self, error: LaunchError) -> Self {
        self.preflight = Some(error);
        self
    }

    pub fn script(self, service: &str, steps: impl IntoIterator<Item = LaunchStep>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(service.to_string(), steps.into_iter().collect());
        self
    }

    /// Service names in call order
    pub fn calls(&self) -> Vec<String> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Virtual time of each launch call for `service`
    pub fn call_times(&self, service: &str) -> Vec<Duration> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(name, _)| name == service)
            .map(|(_, at)| *at)
            .collect()
    }

    pub fn launch_count(&self, service: &str) -> usize {
        self.call_times(service).len()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.stops.lock().unwrap().clone()
    }
}

#[async_trait]
impl Launcher for ScriptedLauncher {
    async fn launch(&self, service: &str) -> Result<LaunchHandle, LaunchError> {
        self.calls
            .lock()
            .unwrap()
            .push((service.to_string(), self.epoch.elapsed()));
        let step = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(service)
            .and_then(VecDeque::pop_front)
            .unwrap_or(LaunchStep::Succeed);

        match step {
            LaunchStep::Succeed => Ok(LaunchHandle::new(service)),
            LaunchStep::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(LaunchHandle::new(service))
            }
            LaunchStep::Reject => Err(LaunchError::Rejected("exit code 1: no such service".into())),
            LaunchStep::Unexpected => Err(LaunchError::Unexpected("runtime binary missing".into())),
            LaunchStep::Panic => panic!("launcher exploded for {}", service),
            LaunchStep::Hang => std::future::pending().await,
        }
    }

    async fn preflight(&self) -> Result<(), LaunchError> {
        match &self.preflight {
            Some(error) => Err(error.clone()),
            None => Ok(()),
        }
    }

    async fn stop(&self, service: &str) -> Result<(), LaunchError> {
        self.stops.lock().unwrap().push(service.to_string());
        Ok(())
    }
}

/// Probe whose answers depend on the poll count or on virtual time
#[derive(Debug)]
pub struct ScriptedProbe {
    epoch: Instant,
    healthy_from_poll: Option<u32>,
    healthy_at: Option<Duration>,
    polls: AtomicU32,
}

impl ScriptedProbe {
    pub fn healthy() -> Self {
        Self::from_poll(1)
    }

    /// Never succeeds
    pub fn never() -> Self {
        Self {
            epoch: Instant::now(),
            healthy_from_poll: None,
            healthy_at: None,
            polls: AtomicU32::new(0),
        }
    }

    /// Succeeds from the `n`th evaluation on (1-based, counted across attempts)
    pub fn from_poll(n: u32) -> Self {
        Self {
            healthy_from_poll: Some(n),
            ..Self::never()
        }
    }

    /// Succeeds once `at` of virtual time has passed since creation
    pub fn from_time(at: Duration) -> Self {
        Self {
            healthy_at: Some(at),
            ..Self::never()
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn check(&self) -> HealthProbeResult {
        let poll = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        let healthy = self.healthy_from_poll.is_some_and(|n| poll >= n)
            || self.healthy_at.is_some_and(|at| self.epoch.elapsed() >= at);
        if healthy {
            HealthProbeResult::healthy("HTTP 200", Duration::ZERO)
        } else {
            HealthProbeResult::unhealthy("HTTP 503", Duration::ZERO)
        }
    }

    fn describe(&self) -> String {
        "scripted".to_string()
    }
}
