pub mod config;
pub mod core;
pub mod error;
pub mod native;
pub mod store;

#[cfg(test)]
mod stubs;


pub use crate::config::Config;
pub use crate::core::domain::{
    BatchReport, CompilationResult, Problem, RunEvent, RunResult, TestCase, TestCaseId, Verdict,
};
pub use crate::core::orchestrator::{CancelHandle, JudgeSettings, Orchestrator, RunHandle};
pub use crate::error::JudgeError;
pub use crate::store::ProblemStore;
