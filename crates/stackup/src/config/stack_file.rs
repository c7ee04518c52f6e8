//! Stack file YAML schema

use crate::runtime::{PollPolicy, RetryPolicy};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

/// Root stack file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StackFile {
    /// Stack file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument definitions with defaults, overridable with `-a name:=value`
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment passed to runtime commands and visible to `$(env ...)`
    #[serde(default)]
    pub env: HashMap<String, String>,

    #[serde(default)]
    pub defaults: Defaults,

    pub runtime: RuntimeConfig,

    /// Services in declaration order
    pub services: IndexMap<String, ServiceConfig>,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument definition with default value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    pub default: ArgValue,
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Interpret a command line or substituted string
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("true") {
            return ArgValue::Bool(true);
        }
        if s.eq_ignore_ascii_case("false") {
            return ArgValue::Bool(false);
        }
        if let Ok(i) = s.parse::<i64>() {
            return ArgValue::Int(i);
        }
        if let Ok(f) = s.parse::<f64>() {
            return ArgValue::Float(f);
        }
        ArgValue::String(s.to_string())
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            ArgValue::Bool(b) => *b,
            ArgValue::Int(i) => *i != 0,
            ArgValue::Float(f) => *f != 0.0,
            ArgValue::String(s) => {
                let s = s.trim();
                !s.is_empty()
                    && !s.eq_ignore_ascii_case("false")
                    && !s.eq_ignore_ascii_case("no")
                    && !s.eq_ignore_ascii_case("off")
                    && s != "0"
            }
        }
    }
}

impl std::fmt::Display for ArgValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ArgValue::Bool(b) => write!(f, "{}", b),
            ArgValue::Int(i) => write!(f, "{}", i),
            ArgValue::Float(v) => write!(f, "{}", v),
            ArgValue::String(s) => f.write_str(s),
        }
    }
}

/// Stack-wide defaults applied to services that do not override them
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Defaults {
    pub start_timeout_secs: u64,
    pub retry: RetryConfig,
    pub poll: PollConfig,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            start_timeout_secs: 90,
            retry: RetryConfig::default(),
            poll: PollConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 1000,
            max_backoff_ms: 10_000,
        }
    }
}

impl RetryConfig {
    pub fn to_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollConfig {
    pub initial_interval_ms: u64,
    pub max_interval_ms: u64,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            initial_interval_ms: 2000,
            max_interval_ms: 10_000,
        }
    }
}

impl PollConfig {
    pub fn to_policy(&self) -> PollPolicy {
        PollPolicy::new(
            Duration::from_millis(self.initial_interval_ms),
            Duration::from_millis(self.max_interval_ms),
        )
    }
}

/// How services are started and stopped on the external runtime
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Launch argv template; `{service}` is replaced by the service name
    pub launch: Vec<String>,

    /// Stop argv template used by `--down`
    #[serde(default)]
    pub stop: Option<Vec<String>>,

    /// Argv run once before the first launch to confirm the runtime is usable
    #[serde(default)]
    pub check: Option<Vec<String>>,

    /// Timeout for a single launch or stop command
    #[serde(default = "default_runtime_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default)]
    pub working_dir: Option<String>,
}

fn default_runtime_timeout_secs() -> u64 {
    120
}

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    #[serde(default)]
    pub description: Option<String>,

    /// Services that must be healthy before this one is launched
    #[serde(default)]
    pub depends_on: Vec<String>,

    /// Group name for filtering
    #[serde(default)]
    pub group: Option<String>,

    /// A critical failure aborts the whole run
    #[serde(default)]
    pub critical: bool,

    /// Overrides `defaults.start_timeout_secs`
    #[serde(default)]
    pub start_timeout_secs: Option<u64>,

    /// Without a probe the service counts as healthy once launched
    #[serde(default)]
    pub health: Option<ProbeConfig>,

    /// Overrides `defaults.retry`
    #[serde(default)]
    pub retry: Option<RetryConfig>,

    /// Can be a boolean or a string like "$(arg enable_n8n)"
    #[serde(default = "default_enabled")]
    pub enabled: EnabledValue,
}

fn default_enabled() -> EnabledValue {
    EnabledValue::Bool(true)
}

/// Enabled value can be a direct boolean or a substitution string
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EnabledValue {
    Bool(bool),
    String(String),
}

/// Health probe declaration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeConfig {
    Http {
        url: String,
        #[serde(default = "default_accept")]
        accept: Vec<u16>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Tcp {
        address: String,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    Command {
        command: Vec<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
}

fn default_accept() -> Vec<u16> {
    crate::runtime::DEFAULT_ACCEPTED_STATUS.to_vec()
}

impl ProbeConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            ProbeConfig::Http { .. } => "http",
            ProbeConfig::Tcp { .. } => "tcp",
            ProbeConfig::Command { .. } => "command",
        }
    }

    pub fn timeout(&self) -> Option<Duration> {
        let ms = match self {
            ProbeConfig::Http { timeout_ms, .. }
            | ProbeConfig::Tcp { timeout_ms, .. }
            | ProbeConfig::Command { timeout_ms, .. } => *timeout_ms,
        };
        ms.map(Duration::from_millis)
    }
}

impl StackFile {
    /// Load a stack file from disk
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, StackFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| StackFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a stack file from a YAML string
    pub fn from_yaml(content: &str) -> Result<Self, StackFileError> {
        let stack: StackFile = serde_yaml::from_str(content)?;
        stack.validate()?;
        Ok(stack)
    }

    /// Structural checks that do not need argument values
    pub fn validate(&self) -> Result<(), StackFileError> {
        if self.runtime.launch.is_empty() {
            return Err(StackFileError::Validation(
                "runtime.launch must not be empty".into(),
            ));
        }
        if matches!(&self.runtime.stop, Some(stop) if stop.is_empty()) {
            return Err(StackFileError::Validation(
                "runtime.stop must not be empty when present".into(),
            ));
        }
        if self.defaults.retry.max_attempts == 0 {
            return Err(StackFileError::Validation(
                "defaults.retry.max_attempts must be at least 1".into(),
            ));
        }

        for (name, service) in &self.services {
            for dep in &service.depends_on {
                if !self.services.contains_key(dep) {
                    return Err(StackFileError::Validation(format!(
                        "service '{}': depends on unknown service '{}'",
                        name, dep
                    )));
                }
            }

            if matches!(&service.retry, Some(retry) if retry.max_attempts == 0) {
                return Err(StackFileError::Validation(format!(
                    "service '{}': retry.max_attempts must be at least 1",
                    name
                )));
            }

            match &service.health {
                Some(ProbeConfig::Http { accept, .. }) if accept.is_empty() => {
                    return Err(StackFileError::Validation(format!(
                        "service '{}': http probe accepts no status codes",
                        name
                    )));
                }
                Some(ProbeConfig::Command { command, .. }) if command.is_empty() => {
                    return Err(StackFileError::Validation(format!(
                        "service '{}': command probe is empty",
                        name
                    )));
                }
                _ => {}
            }
        }

        Ok(())
    }

    /// All unique group names, sorted
    pub fn groups(&self) -> Vec<String> {
        let mut groups: Vec<String> = self
            .services
            .values()
            .filter_map(|s| s.group.clone())
            .collect();
        groups.sort();
        groups.dedup();
        groups
    }
}

/// Errors that can occur when loading a stack file
#[derive(Debug, thiserror::Error)]
pub enum StackFileError {
    #[error("Failed to read stack file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse stack file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Invalid stack file: {0}")]
    Validation(String),
}
