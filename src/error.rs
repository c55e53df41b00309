//! Error Types
//!
//! Two layers of failure exist in the engine:
//!
//! - [`EngineError`]: request-level problems (bad id, disabled definition,
//!   invalid state transition). These are returned to the caller and no
//!   state is mutated.
//! - [`StepError`]: a single step failed. These are recorded on the
//!   execution or task as data and never escape the run loop.

use thiserror::Error;

/// Call-level failures returned by stores, the engine and the task manager.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("{kind} '{id}' not found")]
    NotFound { kind: &'static str, id: String },

    #[error("Definition '{0}' is disabled")]
    Disabled(String),

    #[error("Cannot {action} while status is '{status}'")]
    InvalidState { action: &'static str, status: String },

    #[error("Failed to parse definition: {0}")]
    Parse(String),

    #[error("I/O error: {0}")]
    Io(String),
}

impl EngineError {
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind,
            id: id.into(),
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Step-level failures, captured on the step and on its run.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum StepError {
    #[error("{0}")]
    Execution(String),

    #[error("unknown step type '{0}'")]
    UnknownStepType(String),

    #[error("step '{step}' has invalid config: {message}")]
    InvalidConfig { step: String, message: String },

    #[error("step '{step}' branches to unknown step '{target}'")]
    UnknownBranchTarget { step: String, target: String },

    #[error("step executor panicked: {0}")]
    Panicked(String),

    #[error("step limit exceeded ({0} steps)")]
    StepLimitExceeded(usize),
}

/// Convenience alias used across the crate.
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_display() {
        let err = EngineError::not_found("Definition", "wf_1");
        assert_eq!(err.to_string(), "Definition 'wf_1' not found");
    }

    #[test]
    fn test_unknown_step_type_display() {
        let err = StepError::UnknownStepType("teleport".to_string());
        assert!(err.to_string().contains("unknown step type"));
        assert!(err.to_string().contains("teleport"));
    }

    #[test]
    fn test_invalid_state_display() {
        let err = EngineError::InvalidState {
            action: "cancel",
            status: "completed".to_string(),
        };
        assert_eq!(err.to_string(), "Cannot cancel while status is 'completed'");
    }

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: EngineError = io.into();
        assert!(matches!(err, EngineError::Io(_)));
    }
}
