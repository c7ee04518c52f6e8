//! Command-line interface for stackup

use crate::stack::Selection;
use argh::FromArgs;
use std::collections::{HashMap, HashSet};

/// Bring a service stack up in dependency order and verify it is healthy
#[derive(FromArgs, Debug)]
pub struct StackupArgs {
    /// path to the stack file (default: stack.yaml)
    #[argh(positional, default = "String::from(\"stack.yaml\")")]
    pub stack_file: String,

    /// override stack arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// only start services in these groups (comma-separated)
    #[argh(option, short = 'g', from_str_fn(parse_list))]
    pub groups: Option<Vec<String>>,

    /// explicitly enable these services (comma-separated)
    #[argh(option, from_str_fn(parse_list))]
    pub enable: Option<Vec<String>>,

    /// explicitly disable these services (comma-separated)
    #[argh(option, from_str_fn(parse_list))]
    pub disable: Option<Vec<String>>,

    /// show the launch plan without starting anything
    #[argh(switch)]
    pub dry_run: bool,

    /// validate the stack file and exit
    #[argh(switch)]
    pub validate: bool,

    /// stop services in reverse launch order
    #[argh(switch)]
    pub down: bool,

    /// treat services as healthy as soon as they are launched
    #[argh(switch)]
    pub skip_health_check: bool,

    /// print the run report as JSON
    #[argh(switch)]
    pub json: bool,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    match s.split_once(":=") {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        )),
    }
}

/// Parse comma-separated list, dropping empty entries
fn parse_list(s: &str) -> Result<Vec<String>, String> {
    Ok(s.split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect())
}

impl StackupArgs {
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    pub fn selection(&self) -> Selection {
        let set = |items: &Option<Vec<String>>| -> HashSet<String> {
            items.iter().flatten().cloned().collect()
        };
        Selection {
            include_groups: self.groups.as_ref().map(|g| g.iter().cloned().collect()),
            enable: set(&self.enable),
            disable: set(&self.disable),
            skip_health_checks: self.skip_health_check,
        }
    }

    /// Normalized `env_logger` filter
    pub fn log_filter(&self) -> &'static str {
        match self.log_level.to_lowercase().as_str() {
            "error" => "error",
            "warn" => "warn",
            "debug" => "debug",
            "trace" => "trace",
            _ => "info",
        }
    }
}
