//! Installation engine: resolution, decisions, execution and recovery.
pub mod backup;
pub mod context;
pub mod decision;
pub mod graph;
pub mod prompts;
pub mod rollback;
pub mod runner;

pub use context::{Context, RunFlags};
pub use graph::{ExecutionPlan, resolve};
pub use runner::{RunReport, run_plan};
