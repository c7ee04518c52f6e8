//! Stackup
//!
//! Dependency-ordered startup of a multi-service stack with health verification.
//!
//! # Overview
//!
//! - Declare services, their dependencies and health probes in a YAML stack file
//! - Services start in batches: everything in a batch only depends on earlier batches
//! - Each service must pass its probe before its dependents are launched
//! - Failed launches are retried with exponential backoff
//! - A failing critical service aborts the run; everything not yet started is skipped
//!
//! # Example Stack File
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   project:
//!     default: localai
//!
//! runtime:
//!   launch: [docker, compose, -p, "$(arg project)", up, -d, "{service}"]
//!
//! services:
//!   shared-postgres:
//!     critical: true
//!     start_timeout_secs: 60
//!     health: { type: command, command: [docker, exec, shared-postgres, pg_isready] }
//!
//!   n8n:
//!     depends_on: [shared-postgres]
//!     health: { type: http, url: "http://localhost:5678/healthz" }
//! ```

pub mod cli;
pub mod config;
pub mod runtime;
pub mod stack;

pub use cli::StackupArgs;
pub use config::{StackFile, StackFileError, SubstitutionError, Substitutor};
pub use runtime::{
    CancelSignal, CancelTrigger, DependencyError, DependencyGraph, HealthChecker, HealthError,
    LaunchError, Launcher, Orchestrator, OrchestratorConfig, Probe, RunOutcome, RunReport,
    ServiceSpec, ServiceStatus,
};
pub use stack::{LaunchPlan, Selection, Stack, StackError};
