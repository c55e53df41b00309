//! Task Manager
//!
//! Creates tasks and drives their plans. Execution differs from a workflow
//! run in three ways:
//! - A step runs only once all of its `depends_on` steps have completed;
//!   blocked steps are marked waiting and the scan moves on
//! - Scans repeat while they make progress, so plan order does not need to
//!   match dependency order
//! - A failing step pauses the task until the caller decides

use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use chrono::Utc;
use log::{debug, error, info, warn};

use super::model::{
    Goal, StepResult, Task, TaskDecision, TaskFilter, TaskOptions, TaskOutcome, TaskUpdate,
};
use super::stats::{local_midnight, TaskStatistics};
use crate::error::{EngineError, Result};
use crate::execution::context::{RunStatus, StepStatus};
use crate::execution::executor::{invoke, StepExecutor};
use crate::monitoring::EventType;
use crate::workflow::model::Step;

type ResultKey = (String, String);

/// In-memory task manager.
///
/// Safe to share between threads. Step executors run without any lock held,
/// so a task can be cancelled while one of its steps is executing; the
/// step's result is then discarded.
#[derive(Debug, Default)]
pub struct TaskManager {
    tasks: RwLock<HashMap<String, Task>>,
    results: RwLock<HashMap<ResultKey, StepResult>>,
}

fn poisoned() -> EngineError {
    EngineError::Io("task store lock poisoned".to_string())
}

fn invalid_state(action: &'static str, status: RunStatus) -> EngineError {
    EngineError::InvalidState {
        action,
        status: status.to_string(),
    }
}

impl TaskManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a pending task for `goal` with the given plan.
    pub fn create_task(&self, goal: Goal, steps: Vec<Step>, options: TaskOptions) -> Result<Task> {
        if goal.text.trim().is_empty() {
            return Err(EngineError::Validation("Goal text is required".to_string()));
        }
        let mut seen = HashSet::new();
        for step in &steps {
            if step.id.trim().is_empty() {
                return Err(EngineError::Validation(
                    "Step has empty or whitespace-only ID".to_string(),
                ));
            }
            if !seen.insert(step.id.as_str()) {
                return Err(EngineError::Validation(format!(
                    "Duplicate step ID: '{}'",
                    step.id
                )));
            }
        }

        let task = Task::new(goal, steps, options);
        info!(
            "Created task {} '{}' ({} steps, priority {})",
            task.id, task.goal.text, task.total_steps, task.priority
        );
        self.tasks
            .write()
            .map_err(|_| poisoned())?
            .insert(task.id.clone(), task.clone());
        Ok(task)
    }

    /// Moves a pending or waiting task to running.
    pub fn start_task(&self, id: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;

        if !matches!(task.status, RunStatus::Pending | RunStatus::Waiting) {
            return Err(invalid_state("start", task.status));
        }

        let now = Utc::now();
        task.status = RunStatus::Running;
        task.attempt += 1;
        task.started_at.get_or_insert(now);
        task.updated_at = now;
        task.logs.push(EventType::Info, "Task started");
        debug!("Task {} started", id);
        Ok(task.clone())
    }

    /// Starts the task and runs its plan with `executor`.
    pub fn execute_task(&self, id: &str, executor: &dyn StepExecutor) -> Result<TaskOutcome> {
        let task = self.start_task(id)?;
        self.drive(id, task.attempt, executor)
    }

    /// Resolves a task paused on a failed step.
    pub fn decide(
        &self,
        id: &str,
        decision: TaskDecision,
        executor: &dyn StepExecutor,
    ) -> Result<TaskOutcome> {
        let attempt = {
            let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
            let task = tasks
                .get_mut(id)
                .ok_or_else(|| EngineError::not_found("Task", id))?;

            if task.status != RunStatus::Paused {
                return Err(invalid_state("decide", task.status));
            }

            let failed = task
                .plan
                .iter()
                .position(|s| s.status() == StepStatus::Failed);
            task.decision_required = false;
            task.updated_at = Utc::now();

            match decision {
                TaskDecision::Abort => {
                    task.status = RunStatus::Failed;
                    task.completed_at.get_or_insert_with(Utc::now);
                    task.logs.push(EventType::Error, "Task aborted after step failure");
                    info!("Task {} aborted", id);
                    return Ok(TaskOutcome::Failed {
                        error: task.error.clone().unwrap_or_default(),
                    });
                }
                TaskDecision::RetryStep => {
                    if let Some(index) = failed {
                        task.plan[index].state.reset();
                    }
                }
                TaskDecision::SkipStep => {
                    if let Some(index) = failed {
                        let step_id = task.plan[index].id().to_string();
                        task.plan[index].state.status = StepStatus::Skipped;
                        task.logs
                            .push_step(&step_id, EventType::Info, "Step skipped by decision");
                    }
                }
            }

            task.error = None;
            task.status = RunStatus::Running;
            task.attempt += 1;
            debug!("Task {} resumed with {:?}", id, decision);
            task.attempt
        };

        self.drive(id, attempt, executor)
    }

    /// Cancels a task and every step that has not completed.
    pub fn cancel_task(&self, id: &str, reason: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;

        if task.status == RunStatus::Completed {
            return Err(invalid_state("cancel", task.status));
        }

        let now = Utc::now();
        task.status = RunStatus::Cancelled;
        task.completed_at.get_or_insert(now);
        task.cancelled_at.get_or_insert(now);
        task.cancel_reason = Some(reason.to_string());
        task.decision_required = false;
        task.updated_at = now;
        for step in &mut task.plan {
            if step.status() != StepStatus::Completed {
                step.state.status = StepStatus::Cancelled;
            }
        }
        task.logs
            .push(EventType::Info, format!("Task cancelled: {}", reason));
        info!("Task {} cancelled ({})", id, reason);
        Ok(task.clone())
    }

    /// Resets a failed or cancelled task to pristine pending.
    pub fn retry_task(&self, id: &str) -> Result<Task> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;

        if !matches!(task.status, RunStatus::Failed | RunStatus::Cancelled) {
            return Err(invalid_state("retry", task.status));
        }

        task.reset();
        task.updated_at = Utc::now();
        task.logs.push(EventType::Info, "Task reset for retry");
        info!("Task {} reset for retry", id);
        Ok(task.clone())
    }

    pub fn get_task(&self, id: &str) -> Result<Task> {
        self.tasks
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Task", id))
    }

    /// Merges descriptive fields and bumps `updated_at`.
    pub fn update_task(&self, id: &str, update: TaskUpdate) -> Result<Task> {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;
        update.apply(task);
        task.updated_at = Utc::now();
        Ok(task.clone())
    }

    /// Deletes a task and its saved step results.
    pub fn delete_task(&self, id: &str) -> Result<()> {
        self.tasks
            .write()
            .map_err(|_| poisoned())?
            .remove(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;
        self.results
            .write()
            .map_err(|_| poisoned())?
            .retain(|(task_id, _), _| task_id != id);
        info!("Deleted task {}", id);
        Ok(())
    }

    /// Matching tasks, most urgent first, newest first within a priority.
    pub fn list_tasks(&self, filter: &TaskFilter) -> Vec<Task> {
        let Ok(tasks) = self.tasks.read() else {
            return Vec::new();
        };
        let mut matching: Vec<Task> = tasks
            .values()
            .filter(|t| filter.matches(t))
            .cloned()
            .collect();
        matching.sort_by(|a, b| {
            a.priority
                .cmp(&b.priority)
                .then_with(|| b.created_at.cmp(&a.created_at))
        });
        if let Some(limit) = filter.limit {
            matching.truncate(limit);
        }
        matching
    }

    /// The saved result of a completed step.
    pub fn step_result(&self, task_id: &str, step_id: &str) -> Result<StepResult> {
        self.results
            .read()
            .map_err(|_| poisoned())?
            .get(&(task_id.to_string(), step_id.to_string()))
            .cloned()
            .ok_or_else(|| EngineError::not_found("Step result", format!("{}/{}", task_id, step_id)))
    }

    /// Aggregate statistics, optionally for one user.
    pub fn get_statistics(&self, user_id: Option<&str>) -> TaskStatistics {
        let tasks: Vec<Task> = self
            .tasks
            .read()
            .map(|tasks| {
                tasks
                    .values()
                    .filter(|t| user_id.map_or(true, |u| t.user_id() == u))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        TaskStatistics::from_tasks(&tasks, local_midnight())
    }

    /// Applies `f` to the task if it is still running the given attempt.
    ///
    /// Returns `None` when the task left `running` concurrently (cancelled)
    /// or was restarted since, in which case nothing is written.
    fn update_running<F>(&self, id: &str, attempt: u32, f: F) -> Result<Option<Task>>
    where
        F: FnOnce(&mut Task),
    {
        let mut tasks = self.tasks.write().map_err(|_| poisoned())?;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Task", id))?;
        if task.status != RunStatus::Running || task.attempt != attempt {
            return Ok(None);
        }
        f(task);
        task.updated_at = Utc::now();
        Ok(Some(task.clone()))
    }

    /// Dependency-gated scans over a running task's plan.
    fn drive(&self, id: &str, attempt: u32, executor: &dyn StepExecutor) -> Result<TaskOutcome> {
        let mut snapshot = self.get_task(id)?;
        let definition = snapshot.as_definition();

        loop {
            let mut progressed = false;

            for index in 0..snapshot.plan.len() {
                if snapshot.plan[index].is_settled() {
                    continue;
                }
                let step = snapshot.plan[index].step.clone();

                if !snapshot.dependencies_met(&step) {
                    match self.update_running(id, attempt, |t| {
                        t.plan[index].state.status = StepStatus::Waiting;
                    })? {
                        Some(task) => snapshot = task,
                        None => return Ok(TaskOutcome::Cancelled),
                    }
                    debug!("Task {} step '{}' waiting on {:?}", id, step.id, step.depends_on);
                    continue;
                }

                match self.update_running(id, attempt, |t| {
                    t.plan[index].state.mark_running();
                    t.logs.push_step(
                        &step.id,
                        EventType::StepStart,
                        format!("Starting step: {}", step.label()),
                    );
                })? {
                    Some(task) => snapshot = task,
                    None => return Ok(TaskOutcome::Cancelled),
                }

                match invoke(executor, &definition, &step, &snapshot.context) {
                    Ok(output) => {
                        let written = self.update_running(id, attempt, |t| {
                            t.record_success(index, output.clone());
                            t.logs.push_step(
                                &step.id,
                                EventType::StepComplete,
                                format!("Step complete: {}", step.label()),
                            );
                        })?;
                        let Some(task) = written else {
                            debug!("Task {} cancelled during step '{}'; result dropped", id, step.id);
                            return Ok(TaskOutcome::Cancelled);
                        };
                        snapshot = task;
                        self.save_step_result(id, &step.id, output)?;
                        progressed = true;
                    }
                    Err(err) => {
                        let message = err.to_string();
                        error!("Task {} step '{}' failed: {}", id, step.id, message);
                        let written = self.update_running(id, attempt, |t| {
                            t.plan[index].state.mark_failed(message.clone());
                            t.logs.push_step(
                                &step.id,
                                EventType::Error,
                                format!("Step '{}' failed: {}", step.id, message),
                            );
                            t.status = RunStatus::Paused;
                            t.error = Some(message.clone());
                            t.decision_required = true;
                        })?;
                        if written.is_none() {
                            return Ok(TaskOutcome::Cancelled);
                        }
                        warn!("Task {} paused; a decision is required", id);
                        return Ok(TaskOutcome::PausedForDecision {
                            step_id: step.id.clone(),
                            error: message,
                        });
                    }
                }
            }

            let unsettled = snapshot.plan.iter().any(|s| !s.is_settled());
            if !progressed || !unsettled {
                break;
            }
        }

        self.finish(id, attempt)
    }

    /// Ends a scan: waiting when steps remain blocked, completed otherwise.
    fn finish(&self, id: &str, attempt: u32) -> Result<TaskOutcome> {
        let mut outcome = TaskOutcome::Cancelled;
        self.update_running(id, attempt, |t| {
            let waiting = t.waiting_steps();
            if !waiting.is_empty() {
                t.status = RunStatus::Waiting;
                t.logs.push(
                    EventType::Info,
                    format!("Waiting on dependencies: {}", waiting.join(", ")),
                );
                info!("Task {} waiting on {} steps", t.id, waiting.len());
                outcome = TaskOutcome::Waiting { steps: waiting };
                return;
            }

            let now = Utc::now();
            t.status = RunStatus::Completed;
            t.completed_at.get_or_insert(now);
            t.progress = 100;
            let summary = t.summarize(now);
            t.output = Some(summary.clone());
            t.logs.push(EventType::Complete, "Task completed");
            info!(
                "Task {} completed ({}/{} steps)",
                t.id, t.completed_steps, t.total_steps
            );
            outcome = TaskOutcome::Completed { summary };
        })?;
        Ok(outcome)
    }

    fn save_step_result(&self, task_id: &str, step_id: &str, result: serde_json::Value) -> Result<()> {
        let entry = StepResult {
            task_id: task_id.to_string(),
            step_id: step_id.to_string(),
            result,
            saved_at: Utc::now(),
        };
        self.results
            .write()
            .map_err(|_| poisoned())?
            .insert((task_id.to_string(), step_id.to_string()), entry);
        Ok(())
    }
}
