//! Service definition registered with the dependency graph

use crate::runtime::probe::Probe;
use crate::runtime::retry::RetryPolicy;
use std::sync::Arc;
use std::time::Duration;

/// Start timeout applied when a service does not declare one
pub const DEFAULT_START_TIMEOUT: Duration = Duration::from_secs(90);

/// Identity and startup requirements of one deployable unit
#[derive(Debug, Clone)]
pub struct ServiceSpec {
    /// Unique service name
    pub name: String,
    /// Services that must be healthy before this one starts (deduplicated, declaration order)
    pub depends_on: Vec<String>,
    /// Budget from launch request to healthy, per attempt
    pub start_timeout: Duration,
    /// Liveness probe; `None` means healthy as soon as launch returns
    pub health_probe: Option<Arc<dyn Probe>>,
    /// Whether a failure of this service aborts the run
    pub critical: bool,
    /// Retry policy override (falls back to the orchestrator default)
    pub retry: Option<RetryPolicy>,
    /// Group label, informational only
    pub group: Option<String>,
}

impl ServiceSpec {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            depends_on: Vec::new(),
            start_timeout: DEFAULT_START_TIMEOUT,
            health_probe: None,
            critical: false,
            retry: None,
            group: None,
        }
    }

    /// Add dependencies, ignoring names already present
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.depends_on.contains(&dep) {
                self.depends_on.push(dep);
            }
        }
        self
    }

    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    pub fn probe(self, probe: impl Probe + 'static) -> Self {
        self.with_probe(Arc::new(probe))
    }

    pub fn with_probe(mut self, probe: Arc<dyn Probe>) -> Self {
        self.health_probe = Some(probe);
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    pub fn group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}
