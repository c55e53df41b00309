//! Step Executor
//!
//! The capability that performs a step's actual work. The engine never
//! talks to AI models, webhooks or notification channels itself; it hands
//! each non-control step to an executor and records what comes back.

use std::any::Any;
use std::error::Error;
use std::panic::{self, AssertUnwindSafe};
use std::thread;
use std::time::Duration;

use chrono::Utc;
use log::debug;
use serde_json::{json, Value};

use super::context::RunContext;
use super::registry::StepRegistry;
use crate::error::StepError;
use crate::workflow::model::{Definition, Step, StepKind};

/// Result of running one step.
pub type StepOutcome = Result<Value, Box<dyn Error + Send + Sync>>;

/// Performs the work of a single step.
///
/// Implementations must be safe to call again for the same step, since
/// callers may retry failed steps. The engine does not retry on its own.
pub trait StepExecutor: Send + Sync {
    fn execute(&self, definition: &Definition, step: &Step, context: &RunContext) -> StepOutcome;
}

impl<F> StepExecutor for F
where
    F: Fn(&Definition, &Step, &RunContext) -> StepOutcome + Send + Sync,
{
    fn execute(&self, definition: &Definition, step: &Step, context: &RunContext) -> StepOutcome {
        self(definition, step, context)
    }
}

/// Runs `executor` for one step, converting errors and panics into
/// [`StepError`]s so they never unwind through a run loop.
pub fn invoke(
    executor: &dyn StepExecutor,
    definition: &Definition,
    step: &Step,
    context: &RunContext,
) -> Result<Value, StepError> {
    match panic::catch_unwind(AssertUnwindSafe(|| {
        executor.execute(definition, step, context)
    })) {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) => Err(StepError::Execution(e.to_string())),
        Err(payload) => Err(StepError::Panicked(panic_message(&*payload))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Executor that simulates work and echoes step metadata.
///
/// Used when no real integrations are wired in, e.g. by the CLI.
#[derive(Debug, Clone, Default)]
pub struct DefaultExecutor {
    registry: StepRegistry,
    latency: Duration,
}

impl DefaultExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulated time spent on every step.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }
}

impl StepExecutor for DefaultExecutor {
    fn execute(&self, definition: &Definition, step: &Step, _context: &RunContext) -> StepOutcome {
        let kind = self.registry.resolve(step)?;

        if !self.latency.is_zero() {
            thread::sleep(self.latency);
        }
        debug!("Simulated step '{}' of '{}'", step.id, definition.name);

        let mut output = json!({
            "success": true,
            "step_id": step.id,
            "step_name": step.label(),
            "step_type": step.step_type,
            "result": format!("Step '{}' finished", step.label()),
            "timestamp": Utc::now().timestamp_millis(),
        });

        let detail = match kind {
            StepKind::AiInvoke(cfg) => json!({ "prompt": cfg.prompt, "model": cfg.model }),
            StepKind::Analysis(cfg) => json!({ "criteria": cfg.criteria }),
            StepKind::Approval(cfg) => json!({ "approved": true, "approvers": cfg.approvers }),
            StepKind::Notify(cfg) => json!({ "delivered": cfg.channels }),
            StepKind::Webhook(cfg) => json!({ "url": cfg.url, "method": cfg.method }),
            StepKind::DataFetch(cfg) => json!({ "sources": cfg.sources }),
            StepKind::Delay(cfg) => json!({ "seconds": cfg.seconds }),
            StepKind::Condition(_) | StepKind::End => Value::Null,
        };
        if let (Value::Object(out), Value::Object(extra)) = (&mut output, detail) {
            out.extend(extra);
        }

        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn definition() -> Definition {
        Definition::from_steps("demo", vec![Step::new("a", "notify")])
    }

    #[test]
    fn test_default_executor_echoes_metadata() {
        let def = definition();
        let step = Step::new("hook", "webhook")
            .named("Call CRM")
            .with_config(json!({ "url": "https://crm.invalid/hook" }));
        let out = DefaultExecutor::new()
            .execute(&def, &step, &RunContext::default())
            .unwrap();

        assert_eq!(out["step_id"], "hook");
        assert_eq!(out["step_name"], "Call CRM");
        assert_eq!(out["method"], "POST");
        assert_eq!(out["url"], "https://crm.invalid/hook");
    }

    #[test]
    fn test_default_executor_latency() {
        let executor = DefaultExecutor::new().with_latency(Duration::from_millis(20));
        let started = std::time::Instant::now();
        executor
            .execute(&definition(), &Step::new("a", "notify"), &RunContext::default())
            .unwrap();
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn test_default_executor_rejects_unknown_type() {
        let err = DefaultExecutor::new()
            .execute(&definition(), &Step::new("x", "teleport"), &RunContext::default())
            .unwrap_err();
        assert!(err.to_string().contains("unknown step type"));
    }

    #[test]
    fn test_invoke_converts_errors() {
        let failing = |_: &Definition, _: &Step, _: &RunContext| -> StepOutcome {
            Err("boom".into())
        };
        let err = invoke(&failing, &definition(), &Step::new("a", "notify"), &RunContext::default())
            .unwrap_err();
        assert_eq!(err, StepError::Execution("boom".to_string()));
    }

    #[test]
    fn test_invoke_catches_panics() {
        let panicking = |_: &Definition, _: &Step, _: &RunContext| -> StepOutcome {
            panic!("executor blew up")
        };
        let err = invoke(&panicking, &definition(), &Step::new("a", "notify"), &RunContext::default())
            .unwrap_err();
        assert_eq!(err, StepError::Panicked("executor blew up".to_string()));
    }

    #[test]
    fn test_closure_is_an_executor() {
        let executor = |_: &Definition, step: &Step, _: &RunContext| -> StepOutcome {
            Ok(json!({ "seen": step.id }))
        };
        let out = executor
            .execute(&definition(), &Step::new("a", "notify"), &RunContext::default())
            .unwrap();
        assert_eq!(out["seen"], "a");
    }
}
