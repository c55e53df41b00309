//! Task Module
//!
//! Goal-driven task plans with dependency gating, pause-for-decision on
//! failure, cancellation, retry and aggregate statistics.
//!
//! - [`model`]: Task, plan steps, priorities, filters and outcomes
//! - [`manager`]: Task lifecycle and execution
//! - [`stats`]: Aggregate statistics

pub mod manager;
pub mod model;
pub mod stats;

pub use manager::TaskManager;
pub use model::{
    Goal, PlanStep, Priority, StepResult, Task, TaskDecision, TaskFilter, TaskOptions,
    TaskOutcome, TaskUpdate,
};
pub use stats::TaskStatistics;
