//! Runtime components: graph, health verification and the orchestrator

pub mod cancel;
pub mod command;
pub mod dependency;
pub mod health;
pub mod launcher;
pub mod orchestrator;
pub mod probe;
pub mod report;
pub mod retry;
pub mod service;
pub mod state;

pub use cancel::*;
pub use command::*;
pub use dependency::*;
pub use health::*;
pub use launcher::*;
pub use orchestrator::*;
pub use probe::*;
pub use report::*;
pub use retry::*;
pub use service::*;
pub use state::*;
