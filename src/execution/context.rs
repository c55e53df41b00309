//! Execution Context
//!
//! Mutable per-run state: status machine, per-step state, accumulated
//! variables and outputs, and the run log.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ids::generate_id;
use crate::monitoring::{EventType, RunLog};
use crate::workflow::model::Definition;

/// Lifecycle status shared by workflow runs and tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Waiting,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub const ALL: [RunStatus; 7] = [
        RunStatus::Pending,
        RunStatus::Running,
        RunStatus::Waiting,
        RunStatus::Paused,
        RunStatus::Completed,
        RunStatus::Failed,
        RunStatus::Cancelled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Waiting => "waiting",
            RunStatus::Paused => "paused",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        }
    }

    pub fn from_status(value: &str) -> Option<Self> {
        RunStatus::ALL.iter().copied().find(|s| s.as_str() == value)
    }

    /// Completed, failed and cancelled are terminal.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunStatus::Completed | RunStatus::Failed | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether `from -> to` is an allowed status transition.
///
/// `failed`/`cancelled -> pending` is the explicit retry reset.
pub fn can_transition(from: RunStatus, to: RunStatus) -> bool {
    use RunStatus::*;
    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Cancelled)
            | (Running, Waiting)
            | (Running, Paused)
            | (Running, Completed)
            | (Running, Failed)
            | (Running, Cancelled)
            | (Waiting, Running)
            | (Waiting, Cancelled)
            | (Paused, Running)
            | (Paused, Pending)
            | (Paused, Failed)
            | (Paused, Cancelled)
            | (Failed, Pending)
            | (Failed, Cancelled)
            | (Cancelled, Pending)
    )
}

/// Status of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Step has not run yet
    #[default]
    Pending,
    /// Step is blocked on unmet dependencies
    Waiting,
    /// Step is currently executing
    Running,
    /// Step completed successfully
    Completed,
    /// Step failed
    Failed,
    /// Step was skipped by a caller decision
    Skipped,
    /// Step was cancelled with its run
    Cancelled,
}

/// Execution state for a single step.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StepState {
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl StepState {
    pub fn mark_running(&mut self) {
        self.status = StepStatus::Running;
        self.started_at = Some(Utc::now());
        self.completed_at = None;
        self.error = None;
    }

    pub fn mark_completed(&mut self, result: Value) {
        self.status = StepStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.result = Some(result);
    }

    pub fn mark_failed(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }

    /// Back to pristine.
    pub fn reset(&mut self) {
        *self = StepState::default();
    }

    /// Duration in milliseconds, when both ends are known.
    pub fn duration_ms(&self) -> Option<i64> {
        match (self.started_at, self.completed_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        }
    }
}

/// Data visible to steps and condition evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunContext {
    pub user_id: String,
    /// Caller-supplied input fields (top-level context)
    #[serde(default)]
    pub input: Map<String, Value>,
    /// Step id -> that step's output
    #[serde(default)]
    pub variables: Map<String, Value>,
}

impl RunContext {
    pub fn new(user_id: impl Into<String>, input: Value) -> Self {
        let input = match input {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other);
                map
            }
        };
        Self {
            user_id: user_id.into(),
            input,
            variables: Map::new(),
        }
    }

    /// Resolves `field` for condition evaluation.
    ///
    /// Lookup order: a variable named `field`, a dotted path into the
    /// variables (`step.score`), then the top-level context (input fields
    /// and `user_id`). Null values count as absent.
    pub fn lookup(&self, field: &str) -> Option<&Value> {
        let present = |v: &&Value| !v.is_null();

        if let Some(value) = self.variables.get(field).filter(present) {
            return Some(value);
        }
        if let Some(value) = lookup_path(&self.variables, field).filter(present) {
            return Some(value);
        }
        if let Some(value) = self.input.get(field).filter(present) {
            return Some(value);
        }
        if let Some(value) = lookup_path(&self.input, field).filter(present) {
            return Some(value);
        }
        None
    }

    /// Top-level user id as a JSON value, for conditions on `user_id`.
    pub fn user_value(&self) -> Value {
        Value::String(self.user_id.clone())
    }
}

fn lookup_path<'a>(root: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let first = parts.next()?;
    let mut current = root.get(first)?;
    let mut walked = false;
    for part in parts {
        walked = true;
        current = match current {
            Value::Object(map) => map.get(part)?,
            Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    walked.then_some(current)
}

/// Integer percentage of completed steps, rounded, capped at 100.
pub fn progress_percent(completed: usize, total: usize) -> u8 {
    if total == 0 {
        return 0;
    }
    let pct = (completed as f64 / total as f64 * 100.0).round();
    pct.min(100.0) as u8
}

/// Summary produced when a run or task completes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub completed_steps: usize,
    pub total_steps: usize,
    /// Entries collected from every `files` array in step outputs
    pub files: Vec<Value>,
    /// Elapsed seconds, only when the start time was recorded
    pub duration_secs: Option<i64>,
    pub success_rate: u8,
    pub text: String,
}

impl RunSummary {
    pub fn build<'a>(
        results: impl IntoIterator<Item = &'a Value>,
        completed_steps: usize,
        total_steps: usize,
        started_at: Option<DateTime<Utc>>,
        completed_at: DateTime<Utc>,
    ) -> Self {
        let mut files = Vec::new();
        for result in results {
            if let Some(Value::Array(items)) = result.get("files") {
                files.extend(items.iter().cloned());
            }
        }

        let duration_secs =
            started_at.map(|start| ((completed_at - start).num_milliseconds() as f64 / 1000.0).round() as i64);

        Self {
            completed_steps,
            total_steps,
            files,
            duration_secs,
            success_rate: progress_percent(completed_steps, total_steps),
            text: format!(
                "Finished: {} of {} steps completed",
                completed_steps, total_steps
            ),
        }
    }
}

/// One run of a definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Execution {
    pub id: String,
    pub definition_id: String,
    pub definition_name: String,
    pub status: RunStatus,
    pub current_step_index: Option<usize>,
    pub current_step_id: Option<String>,
    pub input: Value,
    pub context: RunContext,
    /// Step id -> raw step result
    pub output: Map<String, Value>,
    pub steps: HashMap<String, StepState>,
    pub logs: RunLog,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub progress: u8,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
    pub summary: Option<RunSummary>,
}

impl Execution {
    /// Creates a pending execution for `definition`.
    pub fn new(definition: &Definition, input: Value, user_id: &str) -> Self {
        Self {
            id: generate_id("exec"),
            definition_id: definition.id.clone(),
            definition_name: definition.name.clone(),
            status: RunStatus::Pending,
            current_step_index: None,
            current_step_id: None,
            context: RunContext::new(user_id, input.clone()),
            input,
            output: Map::new(),
            steps: definition
                .steps
                .iter()
                .map(|s| (s.id.clone(), StepState::default()))
                .collect(),
            logs: RunLog::new(),
            completed_steps: 0,
            total_steps: definition.steps.len(),
            progress: 0,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            error: None,
            summary: None,
        }
    }

    /// Moves to `to` if the state machine allows it.
    ///
    /// Sets `completed_at` exactly once, on the first terminal status.
    pub fn transition(&mut self, to: RunStatus) -> bool {
        if !can_transition(self.status, to) {
            return false;
        }
        self.status = to;
        if to.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    pub fn start(&mut self) -> bool {
        if !self.transition(RunStatus::Running) {
            return false;
        }
        self.started_at = Some(Utc::now());
        self.logs.push(EventType::Info, "Run started");
        true
    }

    /// Records a successful step output.
    pub fn record_success(&mut self, step_id: &str, output: Value) {
        self.context
            .variables
            .insert(step_id.to_string(), output.clone());
        self.output.insert(step_id.to_string(), output.clone());
        self.steps
            .entry(step_id.to_string())
            .or_default()
            .mark_completed(output);
        self.completed_steps += 1;
        self.progress = progress_percent(self.completed_steps, self.total_steps);
    }

    /// Marks the run completed and builds its summary.
    pub fn complete(&mut self) {
        if !self.transition(RunStatus::Completed) {
            return;
        }
        self.progress = 100;
        self.logs.push(EventType::Complete, "Run completed");
        let completed_at = self.completed_at.unwrap_or_else(Utc::now);
        self.summary = Some(RunSummary::build(
            self.output.values(),
            self.completed_steps,
            self.total_steps,
            self.started_at,
            completed_at,
        ));
    }

    /// Marks the run failed with `error`.
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        if !self.transition(RunStatus::Failed) {
            return;
        }
        self.logs
            .push(EventType::Error, format!("Run failed: {}", error));
        self.error = Some(error);
    }

    /// Cancels the run; steps that never finished are marked cancelled.
    pub fn cancel(&mut self) -> bool {
        if !self.transition(RunStatus::Cancelled) {
            return false;
        }
        for state in self.steps.values_mut() {
            if state.status != StepStatus::Completed {
                state.status = StepStatus::Cancelled;
            }
        }
        self.logs.push(EventType::Info, "Run cancelled");
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Step;
    use serde_json::json;

    fn definition() -> Definition {
        Definition::from_steps(
            "d",
            vec![Step::new("a", "notify"), Step::new("b", "notify")],
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(can_transition(RunStatus::Pending, RunStatus::Running));
        assert!(can_transition(RunStatus::Running, RunStatus::Completed));
        assert!(can_transition(RunStatus::Running, RunStatus::Paused));
        assert!(can_transition(RunStatus::Paused, RunStatus::Running));
    }

    #[test]
    fn test_completed_is_final() {
        for to in RunStatus::ALL {
            assert!(
                !can_transition(RunStatus::Completed, to),
                "completed -> {:?} must be rejected",
                to
            );
        }
    }

    #[test]
    fn test_retry_transitions() {
        assert!(can_transition(RunStatus::Failed, RunStatus::Pending));
        assert!(can_transition(RunStatus::Cancelled, RunStatus::Pending));
        assert!(!can_transition(RunStatus::Running, RunStatus::Pending));
    }

    #[test]
    fn test_status_round_trip_names() {
        for status in RunStatus::ALL {
            assert_eq!(RunStatus::from_status(status.as_str()), Some(status));
        }
        assert_eq!(RunStatus::from_status("exploded"), None);
    }

    #[test]
    fn test_progress_percent_rounds() {
        assert_eq!(progress_percent(1, 3), 33);
        assert_eq!(progress_percent(2, 3), 67);
        assert_eq!(progress_percent(4, 3), 100);
        assert_eq!(progress_percent(0, 0), 0);
    }

    #[test]
    fn test_lookup_order() {
        let mut ctx = RunContext::new("u1", json!({ "score": 10, "region": "eu" }));
        ctx.variables.insert("score".to_string(), json!(90));
        ctx.variables
            .insert("analyse".to_string(), json!({ "rating": { "value": 4 } }));

        assert_eq!(ctx.lookup("score"), Some(&json!(90)));
        assert_eq!(ctx.lookup("analyse.rating.value"), Some(&json!(4)));
        assert_eq!(ctx.lookup("region"), Some(&json!("eu")));
        assert_eq!(ctx.lookup("missing"), None);
    }

    #[test]
    fn test_lookup_null_falls_back_to_input() {
        let mut ctx = RunContext::new("u1", json!({ "score": 55 }));
        ctx.variables.insert("score".to_string(), Value::Null);
        assert_eq!(ctx.lookup("score"), Some(&json!(55)));
    }

    #[test]
    fn test_non_object_input_is_wrapped() {
        let ctx = RunContext::new("u1", json!(7));
        assert_eq!(ctx.lookup("input"), Some(&json!(7)));
    }

    #[test]
    fn test_execution_lifecycle() {
        let mut exec = Execution::new(&definition(), json!({}), "u1");
        assert_eq!(exec.status, RunStatus::Pending);
        assert_eq!(exec.total_steps, 2);

        assert!(exec.start());
        exec.record_success("a", json!({ "files": ["a.txt"] }));
        assert_eq!(exec.progress, 50);

        exec.complete();
        assert_eq!(exec.status, RunStatus::Completed);
        assert_eq!(exec.progress, 100);
        let summary = exec.summary.as_ref().unwrap();
        assert_eq!(summary.completed_steps, 1);
        assert_eq!(summary.files, vec![json!("a.txt")]);
        assert!(summary.duration_secs.is_some());
    }

    #[test]
    fn test_completed_at_set_once() {
        let mut exec = Execution::new(&definition(), json!({}), "u1");
        exec.start();
        exec.fail("boom");
        let first = exec.completed_at;
        assert!(first.is_some());

        // Cancelling a failed run is allowed but must not move completed_at
        assert!(exec.cancel());
        assert_eq!(exec.completed_at, first);
        assert_eq!(exec.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_fail_ignored_after_completion() {
        let mut exec = Execution::new(&definition(), json!({}), "u1");
        exec.start();
        exec.complete();
        exec.fail("late");
        assert_eq!(exec.status, RunStatus::Completed);
        assert!(exec.error.is_none());
    }

    #[test]
    fn test_summary_without_start_has_no_duration() {
        let summary = RunSummary::build(std::iter::empty(), 0, 2, None, Utc::now());
        assert!(summary.duration_secs.is_none());
        assert_eq!(summary.success_rate, 0);
    }

    #[test]
    fn test_step_state_reset() {
        let mut state = StepState::default();
        state.mark_running();
        state.mark_failed("x");
        assert!(state.duration_ms().is_some());
        state.reset();
        assert_eq!(state, StepState::default());
    }
}
