//! Stack resolution - turns a parsed stack file into runnable pieces

use crate::config::{
    ArgValue, EnabledValue, ProbeConfig, ServiceConfig, StackFile, SubstitutionError, Substitutor,
};
use crate::runtime::{
    CommandLauncher, CommandProbe, CommandSpec, CommandTemplate, DependencyError, DependencyGraph,
    HttpProbe, OrchestratorConfig, Probe, ServiceSpec, TcpProbe,
};
use indexmap::IndexSet;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

/// Which services of the stack take part in a run
#[derive(Debug, Clone, Default)]
pub struct Selection {
    /// Groups to include (None = all groups)
    pub include_groups: Option<HashSet<String>>,
    /// Services to enable regardless of their `enabled` field
    pub enable: HashSet<String>,
    /// Services to leave out
    pub disable: HashSet<String>,
    /// Skip probes entirely
    pub skip_health_checks: bool,
}

/// A stack file bound to argument values and a selection
#[derive(Debug, Clone)]
pub struct Stack {
    file: StackFile,
    selection: Selection,
    subst: Substitutor,
}

/// Launch plan for dry-run mode
#[derive(Debug)]
pub struct LaunchPlan {
    /// Resolved arguments, sorted by name
    pub args: BTreeMap<String, String>,
    pub batches: Vec<Vec<PlanEntry>>,
}

/// A service in the launch plan
#[derive(Debug)]
pub struct PlanEntry {
    pub name: String,
    pub command: String,
    pub probe: Option<String>,
    pub depends_on: Vec<String>,
    pub critical: bool,
    pub start_timeout: Duration,
}

impl Stack {
    /// Bind arguments; overrides must name an argument the stack declares
    pub fn new(
        file: StackFile,
        selection: Selection,
        overrides: HashMap<String, String>,
    ) -> Result<Self, StackError> {
        let mut args: HashMap<String, String> = file
            .args
            .iter()
            .map(|(name, def)| (name.clone(), def.default.to_string()))
            .collect();

        for (name, value) in overrides {
            if !file.args.contains_key(&name) {
                return Err(StackError::UnknownArgument(name));
            }
            args.insert(name, value);
        }

        let subst = Substitutor::new()
            .with_args(args)
            .with_env(file.env.clone());

        Ok(Self {
            file,
            selection,
            subst,
        })
    }

    pub fn file(&self) -> &StackFile {
        &self.file
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    /// Enabled services in declaration order
    pub fn resolve_enabled(&self) -> Result<IndexSet<String>, StackError> {
        let mut enabled = IndexSet::new();

        for (name, service) in &self.file.services {
            if let Some(groups) = &self.selection.include_groups {
                // Ungrouped services are left out once a group filter is active
                match &service.group {
                    Some(group) if groups.contains(group) => {}
                    _ => continue,
                }
            }

            if self.selection.disable.contains(name) {
                continue;
            }

            if self.selection.enable.contains(name) || self.is_enabled(name, service)? {
                enabled.insert(name.clone());
            }
        }

        for name in &enabled {
            for dep in &self.file.services[name].depends_on {
                if !enabled.contains(dep) {
                    return Err(StackError::DisabledDependency {
                        service: name.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(enabled)
    }

    fn is_enabled(&self, name: &str, service: &ServiceConfig) -> Result<bool, StackError> {
        match &service.enabled {
            EnabledValue::Bool(b) => Ok(*b),
            EnabledValue::String(s) => {
                let resolved = self.substitute(s, || format!("service '{}' enabled field", name))?;
                Ok(ArgValue::parse(&resolved).is_truthy())
            }
        }
    }

    /// Service specs for every enabled service, probes resolved
    pub fn service_specs(&self) -> Result<Vec<ServiceSpec>, StackError> {
        let defaults = &self.file.defaults;
        let env = self.resolved_env()?;

        self.resolve_enabled()?
            .into_iter()
            .map(|name| {
                let service = &self.file.services[&name];
                let timeout = service
                    .start_timeout_secs
                    .unwrap_or(defaults.start_timeout_secs);

                let mut spec = ServiceSpec::new(name.clone())
                    .depends_on(service.depends_on.iter().cloned())
                    .start_timeout(Duration::from_secs(timeout))
                    .critical(service.critical);
                if let Some(group) = &service.group {
                    spec = spec.group(group.clone());
                }
                if let Some(retry) = &service.retry {
                    spec = spec.retry(retry.to_policy());
                }
                if let Some(probe) = &service.health {
                    spec = spec.with_probe(self.build_probe(&name, probe, &env)?);
                }
                Ok(spec)
            })
            .collect()
    }

    fn build_probe(
        &self,
        service: &str,
        config: &ProbeConfig,
        env: &HashMap<String, String>,
    ) -> Result<Arc<dyn Probe>, StackError> {
        let context = || format!("service '{}' health probe", service);
        let timeout = config.timeout();

        let probe: Arc<dyn Probe> = match config {
            ProbeConfig::Http { url, accept, .. } => {
                let url = self.substitute(url, context)?;
                let mut probe = HttpProbe::new(url)
                    .map_err(|e| StackError::Probe {
                        service: service.to_string(),
                        message: e.to_string(),
                    })?
                    .with_accept(accept.clone());
                if let Some(timeout) = timeout {
                    probe = probe.with_timeout(timeout);
                }
                Arc::new(probe)
            }
            ProbeConfig::Tcp { address, .. } => {
                let mut probe = TcpProbe::new(self.substitute(address, context)?);
                if let Some(timeout) = timeout {
                    probe = probe.with_timeout(timeout);
                }
                Arc::new(probe)
            }
            ProbeConfig::Command { command, .. } => {
                let argv = self
                    .subst
                    .substitute_all(command)
                    .map_err(|source| StackError::Substitution {
                        context: context(),
                        source,
                    })?;
                let template = CommandTemplate::new(argv).map_err(|e| StackError::Probe {
                    service: service.to_string(),
                    message: e.to_string(),
                })?;
                let mut probe = CommandProbe::new(template.render(service).with_env(env.clone()));
                if let Some(timeout) = timeout {
                    probe = probe.with_timeout(timeout);
                }
                Arc::new(probe)
            }
        };

        Ok(probe)
    }

    /// Build the dependency graph of enabled services
    pub fn build_graph(&self) -> Result<DependencyGraph, StackError> {
        Ok(DependencyGraph::from_services(self.service_specs()?)?)
    }

    /// Command launcher configured from the `runtime` section
    pub fn launcher(&self) -> Result<CommandLauncher, StackError> {
        let runtime = &self.file.runtime;
        let template = |argv: &[String], field: &str| -> Result<CommandTemplate, StackError> {
            let argv = self
                .subst
                .substitute_all(argv)
                .map_err(|source| StackError::Substitution {
                    context: format!("runtime.{}", field),
                    source,
                })?;
            CommandTemplate::new(argv)
                .map_err(|e| StackError::InvalidRuntime(format!("runtime.{}: {}", field, e)))
        };

        let mut launcher = CommandLauncher::new(template(&runtime.launch, "launch")?)
            .with_env(self.resolved_env()?)
            .with_timeout(Duration::from_secs(runtime.timeout_secs));
        if let Some(stop) = &runtime.stop {
            launcher = launcher.with_stop(template(stop, "stop")?);
        }
        if let Some(check) = &runtime.check {
            let argv = self
                .subst
                .substitute_all(check)
                .map_err(|source| StackError::Substitution {
                    context: "runtime.check".to_string(),
                    source,
                })?;
            let spec = CommandSpec::from_argv(&argv)
                .map_err(|e| StackError::InvalidRuntime(format!("runtime.check: {}", e)))?;
            launcher = launcher.with_check(spec);
        }
        if let Some(dir) = &runtime.working_dir {
            launcher = launcher.with_working_dir(self.substitute(dir, || {
                "runtime.working_dir".to_string()
            })?);
        }
        Ok(launcher)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            retry: self.file.defaults.retry.to_policy(),
            poll: self.file.defaults.poll.to_policy(),
            skip_health_checks: self.selection.skip_health_checks,
        }
    }

    /// Generate a launch plan (for dry-run mode)
    pub fn plan(&self) -> Result<LaunchPlan, StackError> {
        let graph = self.build_graph()?;
        let launcher = self.launcher()?;

        let batches = graph
            .batches()
            .iter()
            .map(|batch| {
                batch
                    .iter()
                    .filter_map(|name| graph.get(name))
                    .map(|spec| PlanEntry {
                        name: spec.name.clone(),
                        command: launcher.launch_command(&spec.name).display(),
                        probe: spec.health_probe.as_ref().map(|p| p.describe()),
                        depends_on: spec.depends_on.clone(),
                        critical: spec.critical,
                        start_timeout: spec.start_timeout,
                    })
                    .collect()
            })
            .collect();

        Ok(LaunchPlan {
            args: self
                .subst
                .args()
                .iter()
                .map(|(k, v)| (k.clone(), v.clone()))
                .collect(),
            batches,
        })
    }

    fn resolved_env(&self) -> Result<HashMap<String, String>, StackError> {
        self.file
            .env
            .iter()
            .map(|(key, value)| {
                let resolved = self.substitute(value, || format!("env '{}'", key))?;
                Ok((key.clone(), resolved))
            })
            .collect()
    }

    fn substitute(
        &self,
        input: &str,
        context: impl FnOnce() -> String,
    ) -> Result<String, StackError> {
        self.subst
            .substitute(input)
            .map_err(|source| StackError::Substitution {
                context: context(),
                source,
            })
    }
}

/// Errors that can occur while resolving a stack
#[derive(Debug, thiserror::Error)]
pub enum StackError {
    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Substitution failed in {context}: {source}")]
    Substitution {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Service '{service}' depends on '{dependency}', which is disabled")]
    DisabledDependency { service: String, dependency: String },

    #[error("Dependency error: {0}")]
    Graph(#[from] DependencyError),

    #[error("Invalid health probe for service '{service}': {message}")]
    Probe { service: String, message: String },

    #[error("Invalid runtime configuration: {0}")]
    InvalidRuntime(String),
}

/// Display the launch plan in a human-readable format
impl std::fmt::Display for LaunchPlan {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Launch Plan")?;
        writeln!(f, "===========")?;

        if !self.args.is_empty() {
            writeln!(f)?;
            writeln!(f, "Arguments:")?;
            for (key, value) in &self.args {
                writeln!(f, "  {}: {}", key, value)?;
            }
        }

        for (index, batch) in self.batches.iter().enumerate() {
            writeln!(f)?;
            writeln!(f, "Batch {}:", index + 1)?;
            for entry in batch {
                writeln!(
                    f,
                    "  - {}{} (timeout {}s)",
                    entry.name,
                    if entry.critical { " [critical]" } else { "" },
                    entry.start_timeout.as_secs()
                )?;
                writeln!(f, "      Command: {}", entry.command)?;
                if let Some(probe) = &entry.probe {
                    writeln!(f, "      Health: {}", probe)?;
                }
                if !entry.depends_on.is_empty() {
                    writeln!(f, "      Depends on: {}", entry.depends_on.join(", "))?;
                }
            }
        }

        Ok(())
    }
}
