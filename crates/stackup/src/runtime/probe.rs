//! Liveness probes
//!
//! A probe is a cheap, repeatable check answering "is this service up yet?".
//! Failures are reported as an unsuccessful [`HealthProbeResult`], never as an
//! error: the health checker decides what an unhealthy answer means.

use crate::runtime::command::{run_command, CommandSpec};
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::Instant;

/// Per-invocation timeout for HTTP and TCP probes
pub const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Per-invocation timeout for command probes
pub const DEFAULT_COMMAND_PROBE_TIMEOUT: Duration = Duration::from_secs(10);

/// HTTP status codes accepted by default.
///
/// 401 and 403 mean the service answered and only wants credentials, so it is up.
pub const DEFAULT_ACCEPTED_STATUS: &[u16] = &[200, 201, 204, 302, 401, 403];

/// Outcome of a single probe evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthProbeResult {
    pub success: bool,
    /// Status code, exit code or error message
    pub observed_signal: String,
    pub elapsed: Duration,
}

impl HealthProbeResult {
    pub fn healthy(signal: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: true,
            observed_signal: signal.into(),
            elapsed,
        }
    }

    pub fn unhealthy(signal: impl Into<String>, elapsed: Duration) -> Self {
        Self {
            success: false,
            observed_signal: signal.into(),
            elapsed,
        }
    }
}

/// A liveness check that can be invoked repeatedly
#[async_trait]
pub trait Probe: Send + Sync + std::fmt::Debug {
    /// Evaluate once
    async fn check(&self) -> HealthProbeResult;

    /// Upper bound for a single [`Probe::check`] call
    fn invocation_timeout(&self) -> Duration {
        DEFAULT_PROBE_TIMEOUT
    }

    /// Short human-readable description used in launch plans
    fn describe(&self) -> String;
}

/// GET a URL and accept a configured set of status codes
#[derive(Debug, Clone)]
pub struct HttpProbe {
    url: String,
    accept: Vec<u16>,
    timeout: Duration,
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new(url: impl Into<String>) -> Result<Self, reqwest::Error> {
        // Redirects are not followed so a 302 from a login page counts as an answer
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()?;
        Ok(Self {
            url: url.into(),
            accept: DEFAULT_ACCEPTED_STATUS.to_vec(),
            timeout: DEFAULT_PROBE_TIMEOUT,
            client,
        })
    }

    pub fn with_accept(mut self, accept: Vec<u16>) -> Self {
        self.accept = accept;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl Probe for HttpProbe {
    async fn check(&self) -> HealthProbeResult {
        let started = Instant::now();
        match self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => {
                let code = response.status().as_u16();
                let signal = format!("HTTP {}", code);
                if self.accept.contains(&code) {
                    HealthProbeResult::healthy(signal, started.elapsed())
                } else {
                    HealthProbeResult::unhealthy(signal, started.elapsed())
                }
            }
            Err(e) => HealthProbeResult::unhealthy(e.to_string(), started.elapsed()),
        }
    }

    fn invocation_timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        let codes: Vec<String> = self.accept.iter().map(u16::to_string).collect();
        format!("http GET {} (accept {})", self.url, codes.join(","))
    }
}

/// Succeeds once a TCP connection to `address` can be opened
#[derive(Debug, Clone)]
pub struct TcpProbe {
    address: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            timeout: DEFAULT_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Probe for TcpProbe {
    async fn check(&self) -> HealthProbeResult {
        let started = Instant::now();
        match tokio::net::TcpStream::connect(&self.address).await {
            Ok(_) => HealthProbeResult::healthy(
                format!("connected to {}", self.address),
                started.elapsed(),
            ),
            Err(e) => HealthProbeResult::unhealthy(e.to_string(), started.elapsed()),
        }
    }

    fn invocation_timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        format!("tcp connect {}", self.address)
    }
}

/// Runs a readiness command (e.g. `pg_isready`); exit code 0 means healthy
#[derive(Debug, Clone)]
pub struct CommandProbe {
    command: CommandSpec,
    timeout: Duration,
}

impl CommandProbe {
    pub fn new(command: CommandSpec) -> Self {
        Self {
            command,
            timeout: DEFAULT_COMMAND_PROBE_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl Probe for CommandProbe {
    async fn check(&self) -> HealthProbeResult {
        let started = Instant::now();
        match run_command(&self.command, self.timeout).await {
            Ok(output) if output.success() => {
                HealthProbeResult::healthy(output.summary(), started.elapsed())
            }
            Ok(output) => HealthProbeResult::unhealthy(output.summary(), started.elapsed()),
            Err(e) => HealthProbeResult::unhealthy(e.to_string(), started.elapsed()),
        }
    }

    fn invocation_timeout(&self) -> Duration {
        self.timeout
    }

    fn describe(&self) -> String {
        format!("command `{}`", self.command.display())
    }
}
