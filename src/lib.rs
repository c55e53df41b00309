//! StepRunner - Step-Based Workflow and Task Engine
//!
//! Runs user-defined definitions as an ordered sequence of typed steps with
//! conditional branching, a shared per-run context and a full audit trail.
//! A task manager variant drives goal-derived plans with dependency gating,
//! pause-for-decision on failure, cancellation and retry.
//!
//! # Architecture
//!
//! - [`workflow`]: Definitions, parsing, validation, storage and templates
//! - [`execution`]: Run engine, conditions, step executors and run storage
//! - [`task`]: Task plans, lifecycle and statistics
//! - [`monitoring`]: Append-only run logs and timing reports
//! - [`api`]: Response envelope and service facade for hosting layers
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use serde_json::json;
//! use steprunner::execution::DefaultExecutor;
//! use steprunner::{load_definition, Engine};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = Engine::in_memory(Arc::new(DefaultExecutor::new()));
//!
//!     let definition = load_definition("lead-followup.yaml")?;
//!     let id = engine.definitions().create(definition)?;
//!
//!     let run_id = engine.start_run(&id, json!({ "score": 85 }))?;
//!     println!("{}", engine.get_run(&run_id)?.status);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod error;
pub mod execution;
pub mod ids;
pub mod monitoring;
pub mod task;
pub mod workflow;

pub use error::{EngineError, StepError};
pub use execution::engine::Engine;
pub use task::TaskManager;
pub use workflow::model::{Definition, Step};
pub use workflow::parser::load_definition;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = "StepRunner";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_library_version() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_app_name() {
        assert_eq!(APP_NAME, "StepRunner");
    }

    #[test]
    fn test_module_exports_step() {
        let step = Step::new("fetch", "data-fetch");
        assert_eq!(step.id, "fetch");
        assert_eq!(step.step_type, "data-fetch");
    }

    #[test]
    fn test_module_exports_definition() {
        let definition = Definition::from_steps("empty", vec![]);
        assert!(definition.steps.is_empty());
        assert!(definition.enabled);
    }
}
