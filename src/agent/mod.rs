//! Everything that invokes the external agent executable.

pub mod bead;
pub mod code_agent;
pub mod executor;
pub mod git;
pub mod pipeline;
pub mod prompt;
pub mod run_log;
pub mod runner;

pub use code_agent::{derive_summary, describe_run, run_code_agent};
pub use executor::AgentTaskExecutor;
pub use pipeline::{Outcome, PipelineResult};
pub use runner::AgentRunner;
