//! Run Execution Module
//!
//! Runs definitions step by step and keeps a record of every run.
//!
//! # Architecture
//!
//! - [`engine`]: Driver loop, branching, cancellation
//! - [`context`]: Per-run state and the status machine
//! - [`condition`]: Branch rule evaluation
//! - [`executor`]: The step executor capability
//! - [`registry`]: Step type catalog and config resolution
//! - [`store`]: Execution storage

pub mod condition;
pub mod context;
pub mod engine;
pub mod executor;
pub mod registry;
pub mod store;

pub use context::{
    can_transition, progress_percent, Execution, RunContext, RunStatus, RunSummary, StepState,
    StepStatus,
};
pub use engine::{Engine, EngineConfig, RunHandle};
pub use executor::{DefaultExecutor, StepExecutor, StepOutcome};
pub use registry::{StepRegistry, StepTypeInfo};
pub use store::{ExecutionFilter, ExecutionStore, MemoryExecutionStore};
