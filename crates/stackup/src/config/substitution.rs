//! `$(arg name)` and `$(env NAME [fallback])` expansion

use regex::{Captures, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

/// `$(kind)` or `$(kind operand...)`
static PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)(?:\s+([^)]*))?\)").unwrap());

/// Argument values may themselves contain substitutions; this bounds the chain
const MAX_DEPTH: usize = 8;

/// Values available to substitution
#[derive(Debug, Clone, Default)]
pub struct Substitutor {
    args: HashMap<String, String>,
    env: HashMap<String, String>,
}

impl Substitutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = (String, String)>) -> Self {
        self.args.extend(args);
        self
    }

    /// Stack-level environment, consulted before the process environment
    pub fn with_env(mut self, env: impl IntoIterator<Item = (String, String)>) -> Self {
        self.env.extend(env);
        self
    }

    pub fn args(&self) -> &HashMap<String, String> {
        &self.args
    }

    /// Expand every pattern in `input`
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        self.expand(input, 0)
    }

    /// Expand every element of an argv template
    pub fn substitute_all(&self, inputs: &[String]) -> Result<Vec<String>, SubstitutionError> {
        inputs.iter().map(|s| self.substitute(s)).collect()
    }

    fn expand(&self, input: &str, depth: usize) -> Result<String, SubstitutionError> {
        if depth > MAX_DEPTH {
            return Err(SubstitutionError::TooDeep(input.to_string()));
        }

        let mut output = String::with_capacity(input.len());
        let mut cursor = 0;
        for caps in PATTERN.captures_iter(input) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            output.push_str(&input[cursor..whole.start()]);
            let value = self.resolve(&caps)?;
            output.push_str(&self.expand(&value, depth + 1)?);
            cursor = whole.end();
        }
        output.push_str(&input[cursor..]);

        Ok(output)
    }

    fn resolve(&self, caps: &Captures) -> Result<String, SubstitutionError> {
        let kind = &caps[1];
        let operand = caps.get(2).map(|m| m.as_str().trim()).unwrap_or("");

        match kind {
            "arg" if operand.is_empty() => Err(SubstitutionError::MissingOperand(kind.into())),
            "arg" => self
                .args
                .get(operand)
                .cloned()
                .ok_or_else(|| SubstitutionError::UndefinedArg(operand.to_string())),
            "env" if operand.is_empty() => Err(SubstitutionError::MissingOperand(kind.into())),
            "env" => {
                let (name, fallback) = match operand.split_once(char::is_whitespace) {
                    Some((name, fallback)) => (name, Some(fallback.trim())),
                    None => (operand, None),
                };
                self.env
                    .get(name)
                    .cloned()
                    .or_else(|| std::env::var(name).ok())
                    .or_else(|| fallback.map(str::to_string))
                    .ok_or_else(|| SubstitutionError::UndefinedEnv(name.to_string()))
            }
            _ => Err(SubstitutionError::UnknownKind(kind.to_string())),
        }
    }
}

/// Errors that can occur during substitution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubstitutionError {
    #[error("unknown substitution '$({0} ...)'")]
    UnknownKind(String),

    #[error("'$({0})' needs a name")]
    MissingOperand(String),

    #[error("undefined argument '{0}'")]
    UndefinedArg(String),

    #[error("environment variable '{0}' is not set and has no fallback")]
    UndefinedEnv(String),

    #[error("substitution nested too deeply in '{0}'")]
    TooDeep(String),
}
