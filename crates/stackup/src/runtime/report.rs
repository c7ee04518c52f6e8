//! Final run report

use crate::runtime::state::ServiceStatus;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// Overall result of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Every service reached `Healthy`
    AllHealthy,
    /// Some non-critical services failed or were skipped
    PartialFailure,
    /// A critical failure or shutdown request stopped the run
    Aborted,
}

impl RunOutcome {
    /// Process exit code for the CLI
    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::AllHealthy => 0,
            RunOutcome::Aborted => 1,
            RunOutcome::PartialFailure => 2,
        }
    }
}

impl std::fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            RunOutcome::AllHealthy => "all healthy",
            RunOutcome::PartialFailure => "partial failure",
            RunOutcome::Aborted => "aborted",
        };
        f.write_str(text)
    }
}

/// Terminal state of one service
#[derive(Debug, Clone, Serialize)]
pub struct ServiceReport {
    pub name: String,
    pub status: ServiceStatus,
    pub critical: bool,
    pub batch: usize,
    pub attempts: u32,
    pub elapsed_ms: u64,
    pub last_error: Option<String>,
    pub last_signal: Option<String>,
}

/// Structured summary of a run, services in launch order
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub abort_reason: Option<String>,
    pub services: Vec<ServiceReport>,
}

impl RunReport {
    pub fn service(&self, name: &str) -> Option<&ServiceReport> {
        self.services.iter().find(|s| s.name == name)
    }

    pub fn status(&self, name: &str) -> Option<ServiceStatus> {
        self.service(name).map(|s| s.status)
    }

    pub fn with_status(&self, status: ServiceStatus) -> impl Iterator<Item = &ServiceReport> {
        self.services.iter().filter(move |s| s.status == status)
    }

    pub fn count(&self, status: ServiceStatus) -> usize {
        self.with_status(status).count()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

impl std::fmt::Display for RunReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Run Report")?;
        writeln!(f, "==========")?;
        writeln!(
            f,
            "Outcome: {} ({} healthy, {} failed, {} skipped) in {:.1}s",
            self.outcome,
            self.count(ServiceStatus::Healthy),
            self.count(ServiceStatus::Failed),
            self.count(ServiceStatus::Skipped),
            self.elapsed_ms as f64 / 1000.0
        )?;
        if let Some(reason) = &self.abort_reason {
            writeln!(f, "Aborted: {}", reason)?;
        }
        writeln!(f)?;

        let width = self
            .services
            .iter()
            .map(|s| s.name.len())
            .max()
            .unwrap_or(0)
            .max("SERVICE".len());
        writeln!(
            f,
            "  {:<width$}  {:<5}  {:<15}  {:>8}  {:>9}",
            "SERVICE", "BATCH", "STATUS", "ATTEMPTS", "ELAPSED"
        )?;
        for service in &self.services {
            let status = if service.critical {
                format!("{}*", service.status)
            } else {
                service.status.to_string()
            };
            writeln!(
                f,
                "  {:<width$}  {:<5}  {:<15}  {:>8}  {:>8.1}s",
                service.name,
                service.batch,
                status,
                service.attempts,
                service.elapsed_ms as f64 / 1000.0
            )?;
            if service.status != ServiceStatus::Healthy {
                if let Some(error) = &service.last_error {
                    writeln!(f, "  {:<width$}    error: {}", "", error)?;
                }
                if let Some(signal) = &service.last_signal {
                    writeln!(f, "  {:<width$}    last signal: {}", "", signal)?;
                }
            }
        }

        if self.services.iter().any(|s| s.critical) {
            writeln!(f)?;
            writeln!(f, "  * critical service")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> RunReport {
        RunReport {
            outcome: RunOutcome::PartialFailure,
            started_at: Utc::now(),
            elapsed_ms: 12_500,
            abort_reason: None,
            services: vec![
                ServiceReport {
                    name: "shared-postgres".into(),
                    status: ServiceStatus::Healthy,
                    critical: true,
                    batch: 0,
                    attempts: 1,
                    elapsed_ms: 4_000,
                    last_error: None,
                    last_signal: None,
                },
                ServiceReport {
                    name: "flowise".into(),
                    status: ServiceStatus::Failed,
                    critical: false,
                    batch: 0,
                    attempts: 3,
                    elapsed_ms: 9_000,
                    last_error: Some("not healthy within 30s".into()),
                    last_signal: Some("HTTP 502".into()),
                },
            ],
        }
    }

    #[test]
    fn test_display_lists_failures_with_detail() {
        let text = report().to_string();
        assert!(text.contains("Outcome: partial failure (1 healthy, 1 failed, 0 skipped)"));
        assert!(text.contains("healthy*"));
        assert!(text.contains("error: not healthy within 30s"));
        assert!(text.contains("last signal: HTTP 502"));
    }

    #[test]
    fn test_json_uses_snake_case() {
        let json = report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["outcome"], "partial_failure");
        assert_eq!(value["services"][1]["status"], "failed");
        assert_eq!(value["services"][1]["attempts"], 3);
    }

    #[test]
    fn test_exit_codes_distinguish_outcomes() {
        assert_eq!(RunOutcome::AllHealthy.exit_code(), 0);
        assert_eq!(RunOutcome::Aborted.exit_code(), 1);
        assert_eq!(RunOutcome::PartialFailure.exit_code(), 2);
    }
}
