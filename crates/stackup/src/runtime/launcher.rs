//! Launcher collaborator: brings one named service up through the service runtime

use crate::runtime::command::{run_command, CommandError, CommandSpec, CommandTemplate};
use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Default timeout for one launch or stop command
pub const DEFAULT_LAUNCH_TIMEOUT: Duration = Duration::from_secs(120);

/// Returned by a successful launch
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchHandle {
    pub service: String,
    /// Runtime-specific detail (container id, command output, ...)
    pub detail: Option<String>,
}

impl LaunchHandle {
    pub fn new(service: impl Into<String>) -> Self {
        Self {
            service: service.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }
}

/// Launch failure classification
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LaunchError {
    /// The runtime refused or failed the request; worth retrying
    #[error("runtime rejected launch: {0}")]
    Rejected(String),

    /// The runtime did not answer in time; worth retrying
    #[error("launch timed out after {0:?}")]
    TimedOut(Duration),

    /// Anything outside the launcher contract; never retried
    #[error("unexpected launcher failure: {0}")]
    Unexpected(String),
}

impl LaunchError {
    pub fn is_retryable(&self) -> bool {
        !matches!(self, LaunchError::Unexpected(_))
    }
}

/// Starts services on the external runtime.
///
/// `launch` may be invoked more than once for the same service when a previous
/// attempt failed to become healthy, so implementations must tolerate repeats.
#[async_trait]
pub trait Launcher: Send + Sync {
    async fn launch(&self, service: &str) -> Result<LaunchHandle, LaunchError>;

    /// Confirm the runtime is usable before anything is launched
    async fn preflight(&self) -> Result<(), LaunchError> {
        Ok(())
    }

    /// Stop a service during teardown
    async fn stop(&self, _service: &str) -> Result<(), LaunchError> {
        Ok(())
    }
}

/// Launches services by running a command template such as
/// `docker compose -p localai up -d {service}`
#[derive(Debug, Clone)]
pub struct CommandLauncher {
    launch: CommandTemplate,
    stop: Option<CommandTemplate>,
    check: Option<CommandSpec>,
    env: HashMap<String, String>,
    working_dir: Option<PathBuf>,
    timeout: Duration,
}

impl CommandLauncher {
    pub fn new(launch: CommandTemplate) -> Self {
        Self {
            launch,
            stop: None,
            check: None,
            env: HashMap::new(),
            working_dir: None,
            timeout: DEFAULT_LAUNCH_TIMEOUT,
        }
    }

    pub fn with_stop(mut self, stop: CommandTemplate) -> Self {
        self.stop = Some(stop);
        self
    }

    /// Command run once by [`Launcher::preflight`], e.g. `docker compose version`
    pub fn with_check(mut self, check: CommandSpec) -> Self {
        self.check = Some(check);
        self
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Resolved launch command for `service`
    pub fn launch_command(&self, service: &str) -> CommandSpec {
        self.prepare(&self.launch, service)
    }

    /// Resolved stop command for `service`, if a stop template is configured
    pub fn stop_command(&self, service: &str) -> Option<CommandSpec> {
        self.stop.as_ref().map(|t| self.prepare(t, service))
    }

    /// Resolved pre-flight command, if one is configured
    pub fn check_command(&self) -> Option<CommandSpec> {
        self.check.as_ref().map(|spec| {
            spec.clone()
                .with_env(self.env.clone())
                .with_working_dir(self.working_dir.clone())
        })
    }

    fn prepare(&self, template: &CommandTemplate, service: &str) -> CommandSpec {
        template
            .render(service)
            .with_env(self.env.clone())
            .with_working_dir(self.working_dir.clone())
    }

    async fn execute(&self, spec: CommandSpec) -> Result<String, LaunchError> {
        match run_command(&spec, self.timeout).await {
            Ok(output) if output.success() => Ok(output.summary()),
            Ok(output) => Err(LaunchError::Rejected(output.summary())),
            Err(CommandError::TimedOut { timeout, .. }) => Err(LaunchError::TimedOut(timeout)),
            Err(e) => Err(LaunchError::Unexpected(e.to_string())),
        }
    }
}

#[async_trait]
impl Launcher for CommandLauncher {
    async fn launch(&self, service: &str) -> Result<LaunchHandle, LaunchError> {
        let spec = self.launch_command(service);
        log::info!("[{}] Starting: {}", service, spec.display());
        let detail = self.execute(spec).await?;
        Ok(LaunchHandle::new(service).with_detail(detail))
    }

    async fn preflight(&self) -> Result<(), LaunchError> {
        let Some(spec) = self.check_command() else {
            return Ok(());
        };
        log::info!("Checking runtime: {}", spec.display());
        let detail = self.execute(spec).await?;
        log::debug!("Runtime available: {}", detail);
        Ok(())
    }

    async fn stop(&self, service: &str) -> Result<(), LaunchError> {
        let Some(spec) = self.stop_command(service) else {
            return Ok(());
        };
        log::info!("[{}] Stopping: {}", service, spec.display());
        self.execute(spec).await.map(|_| ())
    }
}
