//! One-shot subprocess execution shared by the command launcher and probes

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Placeholder replaced by the service name in command templates
pub const SERVICE_PLACEHOLDER: &str = "{service}";

/// A fully resolved command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Executable path or name looked up on `PATH`
    pub program: String,
    /// Command line arguments
    pub args: Vec<String>,
    /// Extra environment variables
    pub env: HashMap<String, String>,
    /// Working directory
    pub working_dir: Option<PathBuf>,
}

impl CommandSpec {
    /// Build from an argv vector; the first element is the program
    pub fn from_argv(argv: &[String]) -> Result<Self, CommandError> {
        let (program, args) = argv.split_first().ok_or(CommandError::Empty)?;
        Ok(Self {
            program: program.clone(),
            args: args.to_vec(),
            env: HashMap::new(),
            working_dir: None,
        })
    }

    pub fn with_env(mut self, env: HashMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn with_working_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.working_dir = dir;
        self
    }

    /// Render as a shell-like string for logs and plans
    pub fn display(&self) -> String {
        std::iter::once(self.program.as_str())
            .chain(self.args.iter().map(String::as_str))
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// An argv template containing [`SERVICE_PLACEHOLDER`] markers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandTemplate {
    argv: Vec<String>,
}

impl CommandTemplate {
    pub fn new(argv: Vec<String>) -> Result<Self, CommandError> {
        if argv.is_empty() || argv[0].trim().is_empty() {
            return Err(CommandError::Empty);
        }
        Ok(Self { argv })
    }

    /// Substitute the service name into every argument
    pub fn render(&self, service: &str) -> CommandSpec {
        let argv: Vec<String> = self
            .argv
            .iter()
            .map(|arg| arg.replace(SERVICE_PLACEHOLDER, service))
            .collect();
        CommandSpec {
            program: argv[0].clone(),
            args: argv[1..].to_vec(),
            env: HashMap::new(),
            working_dir: None,
        }
    }
}

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    /// Exit code (`None` when terminated by a signal)
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Last meaningful output line, preferring stderr
    pub fn summary(&self) -> String {
        let last_line = |text: &str| {
            text.lines()
                .rev()
                .map(str::trim)
                .find(|line| !line.is_empty())
                .map(str::to_string)
        };
        let code = match self.code {
            Some(code) => format!("exit code {}", code),
            None => "terminated by signal".to_string(),
        };
        match last_line(&self.stderr).or_else(|| last_line(&self.stdout)) {
            Some(line) => format!("{}: {}", code, line),
            None => code,
        }
    }
}

/// Run a command to completion, killing it if `timeout` elapses
pub async fn run_command(spec: &CommandSpec, timeout: Duration) -> Result<CommandOutput, CommandError> {
    log::debug!("Running: {}", spec.display());

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .envs(&spec.env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    if let Some(dir) = &spec.working_dir {
        cmd.current_dir(dir);
    }

    let child = cmd.spawn().map_err(|e| CommandError::SpawnFailed {
        program: spec.program.clone(),
        source: e,
    })?;

    // Dropping the wait future on timeout drops the child, which kills it
    match tokio::time::timeout(timeout, child.wait_with_output()).await {
        Ok(Ok(output)) => Ok(CommandOutput {
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }),
        Ok(Err(e)) => Err(CommandError::Wait {
            program: spec.program.clone(),
            source: e,
        }),
        Err(_) => Err(CommandError::TimedOut {
            program: spec.program.clone(),
            timeout,
        }),
    }
}

/// Errors that can occur when running a command
#[derive(Debug, thiserror::Error)]
pub enum CommandError {
    #[error("Command line is empty")]
    Empty,

    #[error("Failed to spawn '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed waiting for '{program}': {source}")]
    Wait {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{program}' did not finish within {timeout:?}")]
    TimedOut { program: String, timeout: Duration },
}
