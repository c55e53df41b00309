//! Run Engine
//!
//! Drives a run of a definition from its first step to a terminal state:
//! - Request checks before any run exists (unknown, disabled, unrunnable)
//! - Sequential step execution through the [`StepExecutor`] capability
//! - Condition branching through an explicit next-step pointer
//! - Cooperative cancellation between steps
//! - A step budget that stops runaway branch loops

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};
use serde_json::{json, Value};

use super::condition::first_match;
use super::context::Execution;
use super::executor::{invoke, StepExecutor};
use super::registry::StepRegistry;
use super::store::{ExecutionFilter, ExecutionStore, MemoryExecutionStore, DEFAULT_LIST_LIMIT};
use crate::error::{EngineError, Result, StepError};
use crate::monitoring::EventType;
use crate::workflow::model::{Definition, Step, StepKind, END_TARGET};
use crate::workflow::store::{DefinitionStore, MemoryDefinitionStore};
use crate::workflow::validator::validate_runnable;

/// Default upper bound on steps executed by a single run.
pub const DEFAULT_MAX_STEPS: usize = 100;

/// User id recorded on runs started without one.
pub const SYSTEM_USER: &str = "system";

/// Engine tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Runs that would execute more steps than this fail
    pub max_steps: usize,
    /// Limit applied by [`Engine::list_runs`] when the filter sets none
    pub default_list_limit: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            default_list_limit: DEFAULT_LIST_LIMIT,
        }
    }
}

impl EngineConfig {
    pub fn with_max_steps(mut self, max_steps: usize) -> Self {
        self.max_steps = max_steps.max(1);
        self
    }

    pub fn with_default_list_limit(mut self, limit: usize) -> Self {
        self.default_list_limit = limit;
        self
    }
}

/// What the driver loop does after a step succeeds.
enum Flow {
    /// Continue with the next step in definition order
    Next(Value),
    /// Jump to the step at this index
    Jump(Value, usize),
    /// Complete the run now
    Finish(Value),
}

/// Handle to a run executing on its own thread.
pub struct RunHandle {
    run_id: String,
    handle: JoinHandle<Execution>,
}

impl RunHandle {
    pub fn id(&self) -> &str {
        &self.run_id
    }

    /// Waits for the run to reach a terminal state.
    pub fn join(self) -> Result<Execution> {
        self.handle
            .join()
            .map_err(|_| EngineError::Io(format!("run thread for {} panicked", self.run_id)))
    }
}

/// Workflow run engine.
///
/// Cheap to clone; clones share stores, executor and cancellation requests.
///
/// # Example
///
/// ```rust
/// use std::sync::Arc;
/// use serde_json::json;
/// use steprunner::execution::{DefaultExecutor, Engine, RunStatus};
/// use steprunner::workflow::{Definition, Step};
///
/// let engine = Engine::in_memory(Arc::new(DefaultExecutor::new()));
/// let id = engine
///     .definitions()
///     .create(Definition::from_steps("demo", vec![Step::new("ping", "notify")]))
///     .unwrap();
///
/// let run_id = engine.start_run(&id, json!({})).unwrap();
/// assert_eq!(engine.get_run(&run_id).unwrap().status, RunStatus::Completed);
/// ```
#[derive(Clone)]
pub struct Engine {
    definitions: Arc<dyn DefinitionStore>,
    executions: Arc<dyn ExecutionStore>,
    executor: Arc<dyn StepExecutor>,
    registry: StepRegistry,
    config: EngineConfig,
    cancel_requests: Arc<Mutex<HashSet<String>>>,
}

impl Engine {
    /// Creates an engine over the given stores and executor.
    pub fn new(
        definitions: Arc<dyn DefinitionStore>,
        executions: Arc<dyn ExecutionStore>,
        executor: Arc<dyn StepExecutor>,
    ) -> Self {
        Self {
            definitions,
            executions,
            executor,
            registry: StepRegistry::new(),
            config: EngineConfig::default(),
            cancel_requests: Arc::new(Mutex::new(HashSet::new())),
        }
    }

    /// Creates an engine backed by fresh in-memory stores.
    pub fn in_memory(executor: Arc<dyn StepExecutor>) -> Self {
        Self::new(
            Arc::new(MemoryDefinitionStore::new()),
            Arc::new(MemoryExecutionStore::new()),
            executor,
        )
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn definitions(&self) -> &Arc<dyn DefinitionStore> {
        &self.definitions
    }

    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }

    pub fn registry(&self) -> &StepRegistry {
        &self.registry
    }

    /// Runs `definition_id` to completion on the calling thread.
    ///
    /// Step failures are recorded on the run and still return `Ok`; only
    /// request problems (unknown or disabled definition, unrunnable steps)
    /// are errors.
    pub fn start_run(&self, definition_id: &str, input: Value) -> Result<String> {
        self.start_run_as(definition_id, input, SYSTEM_USER)
    }

    /// Like [`start_run`](Self::start_run), recording `user_id` on the run.
    pub fn start_run_as(&self, definition_id: &str, input: Value, user_id: &str) -> Result<String> {
        let (definition, execution) = self.prepare(definition_id, input, user_id)?;
        let finished = self.drive(&definition, execution);
        Ok(finished.id)
    }

    /// Starts a run on its own thread.
    ///
    /// Request checks happen before the thread starts, so the returned
    /// error is the same as for [`start_run`](Self::start_run).
    pub fn spawn_run(&self, definition_id: &str, input: Value) -> Result<RunHandle> {
        let (definition, execution) = self.prepare(definition_id, input, SYSTEM_USER)?;
        let run_id = execution.id.clone();
        let engine = self.clone();
        let handle = thread::spawn(move || engine.drive(&definition, execution));
        Ok(RunHandle { run_id, handle })
    }

    /// Requests cancellation of a run.
    ///
    /// The request is honoured before the next step starts; a step already
    /// executing is never interrupted.
    pub fn cancel_run(&self, run_id: &str) -> Result<()> {
        // Held across the status check so a run cannot finish in between.
        let mut requests = self
            .cancel_requests
            .lock()
            .map_err(|_| EngineError::Io("cancel set lock poisoned".to_string()))?;
        let execution = self.executions.get(run_id)?;
        if execution.status.is_terminal() {
            return Err(EngineError::InvalidState {
                action: "cancel",
                status: execution.status.to_string(),
            });
        }
        requests.insert(run_id.to_string());
        info!("Cancellation requested for run {}", run_id);
        Ok(())
    }

    pub fn get_run(&self, run_id: &str) -> Result<Execution> {
        self.executions.get(run_id)
    }

    /// Lists runs, applying the configured default limit.
    pub fn list_runs(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let mut filter = filter.clone();
        if filter.limit.is_none() {
            filter.limit = Some(self.config.default_list_limit);
        }
        self.executions.list(&filter)
    }

    /// Loads and checks the definition, then records a pending execution.
    fn prepare(
        &self,
        definition_id: &str,
        input: Value,
        user_id: &str,
    ) -> Result<(Definition, Execution)> {
        if definition_id.trim().is_empty() {
            return Err(EngineError::Validation(
                "Definition id is required".to_string(),
            ));
        }

        let definition = self.definitions.get(definition_id)?;
        if !definition.enabled {
            return Err(EngineError::Disabled(definition_id.to_string()));
        }
        validate_runnable(&definition)?;

        let execution = Execution::new(&definition, input, user_id);
        self.executions.record(&execution)?;
        Ok((definition, execution))
    }

    /// The driver loop. Always returns the execution in a terminal state.
    fn drive(&self, definition: &Definition, mut execution: Execution) -> Execution {
        info!(
            "Run {} of '{}' started ({} steps)",
            execution.id,
            definition.name,
            definition.steps.len()
        );
        execution.start();
        self.persist(&execution);

        let mut next = Some(0);
        let mut executed = 0;

        while let Some(index) = next {
            let Some(step) = definition.steps.get(index) else {
                break;
            };

            if self.take_cancel_request(&execution.id) {
                execution.cancel();
                info!("Run {} cancelled before step '{}'", execution.id, step.id);
                self.publish_terminal(&execution);
                return execution;
            }

            if executed >= self.config.max_steps {
                let err = StepError::StepLimitExceeded(self.config.max_steps);
                error!("Run {} stopped: {}", execution.id, err);
                execution.fail(err.to_string());
                self.publish_terminal(&execution);
                return execution;
            }
            executed += 1;

            execution.current_step_index = Some(index);
            execution.current_step_id = Some(step.id.clone());
            if let Some(state) = execution.steps.get_mut(&step.id) {
                state.mark_running();
            }
            execution.logs.push_step(
                &step.id,
                EventType::StepStart,
                format!("Starting step: {}", step.label()),
            );
            debug!("Run {} step '{}' ({})", execution.id, step.id, step.step_type);

            match self.run_step(definition, step, &execution) {
                Ok(flow) => {
                    let (output, following) = match flow {
                        Flow::Next(output) => (output, Some(index + 1)),
                        Flow::Jump(output, target) => (output, Some(target)),
                        Flow::Finish(output) => (output, None),
                    };
                    execution.record_success(&step.id, output);
                    execution.logs.push_step(
                        &step.id,
                        EventType::StepComplete,
                        format!("Step complete: {}", step.label()),
                    );
                    next = following;
                }
                Err(err) => {
                    error!("Run {} step '{}' failed: {}", execution.id, step.id, err);
                    if let Some(state) = execution.steps.get_mut(&step.id) {
                        state.mark_failed(err.to_string());
                    }
                    execution.logs.push_step(
                        &step.id,
                        EventType::Error,
                        format!("Step '{}' failed: {}", step.id, err),
                    );
                    execution.fail(err.to_string());
                    self.publish_terminal(&execution);
                    return execution;
                }
            }

            self.persist(&execution);
        }

        execution.complete();
        info!(
            "Run {} completed ({}/{} steps)",
            execution.id, execution.completed_steps, execution.total_steps
        );
        self.publish_terminal(&execution);
        execution
    }

    /// Executes one step and decides where the run goes next.
    fn run_step(
        &self,
        definition: &Definition,
        step: &Step,
        execution: &Execution,
    ) -> std::result::Result<Flow, StepError> {
        match self.registry.resolve(step)? {
            StepKind::Condition(config) => {
                let Some(matched) = first_match(&config.conditions, &execution.context) else {
                    debug!("Condition '{}' matched nothing; continuing", step.id);
                    return Ok(Flow::Next(json!({ "matched": null })));
                };

                let output = json!({ "matched": matched, "next_step": matched.next_step });
                if matched.next_step == END_TARGET {
                    return Ok(Flow::Finish(output));
                }
                match definition.step_index(&matched.next_step) {
                    Some(target) => Ok(Flow::Jump(output, target)),
                    None => {
                        warn!(
                            "Condition '{}' targets unknown step '{}'",
                            step.id, matched.next_step
                        );
                        Err(StepError::UnknownBranchTarget {
                            step: step.id.clone(),
                            target: matched.next_step.clone(),
                        })
                    }
                }
            }
            StepKind::End => Ok(Flow::Finish(json!({ "ended": true }))),
            _ => invoke(self.executor.as_ref(), definition, step, &execution.context).map(Flow::Next),
        }
    }

    fn persist(&self, execution: &Execution) {
        if let Err(e) = self.executions.record(execution) {
            error!("Failed to record run {}: {}", execution.id, e);
        }
    }

    fn take_cancel_request(&self, run_id: &str) -> bool {
        self.cancel_requests
            .lock()
            .map(|mut requests| requests.remove(run_id))
            .unwrap_or(false)
    }

    /// Records a terminal execution and drops any pending cancel request,
    /// under the same lock `cancel_run` checks status with.
    fn publish_terminal(&self, execution: &Execution) {
        match self.cancel_requests.lock() {
            Ok(mut requests) => {
                self.persist(execution);
                requests.remove(&execution.id);
            }
            Err(_) => self.persist(execution),
        }
    }
}
