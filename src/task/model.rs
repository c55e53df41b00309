//! Task Data Model
//!
//! A task is a goal plus a plan of steps. Unlike a workflow run, plan steps
//! are gated on their `depends_on` steps and a failing step pauses the task
//! until the caller decides what to do.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::execution::context::{progress_percent, RunContext, RunStatus, RunSummary, StepState, StepStatus};
use crate::ids::generate_id;
use crate::monitoring::RunLog;
use crate::workflow::model::{Definition, Step};

/// Task urgency. Lower number means more urgent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Priority {
    Critical = 1,
    High = 2,
    #[default]
    Medium = 3,
    Low = 4,
}

impl Priority {
    pub const ALL: [Priority; 4] = [
        Priority::Critical,
        Priority::High,
        Priority::Medium,
        Priority::Low,
    ];

    pub fn level(self) -> u8 {
        self as u8
    }
}

impl From<Priority> for u8 {
    fn from(priority: Priority) -> Self {
        priority.level()
    }
}

impl TryFrom<u8> for Priority {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Priority::ALL
            .iter()
            .copied()
            .find(|p| p.level() == value)
            .ok_or_else(|| format!("invalid priority {} (expected 1-4)", value))
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Critical => "critical",
            Priority::High => "high",
            Priority::Medium => "medium",
            Priority::Low => "low",
        };
        f.write_str(name)
    }
}

/// What the task is meant to achieve.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Goal {
    pub text: String,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub goal_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
}

impl Goal {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }
}

/// A plan step together with its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanStep {
    #[serde(flatten)]
    pub step: Step,
    #[serde(flatten)]
    pub state: StepState,
}

impl PlanStep {
    pub fn new(step: Step) -> Self {
        Self {
            step,
            state: StepState::default(),
        }
    }

    pub fn id(&self) -> &str {
        &self.step.id
    }

    pub fn status(&self) -> StepStatus {
        self.state.status
    }

    /// Completed and skipped steps never run again.
    pub fn is_settled(&self) -> bool {
        matches!(self.state.status, StepStatus::Completed | StepStatus::Skipped)
    }
}

/// Optional settings for a new task.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskOptions {
    pub priority: Priority,
    pub deadline: Option<DateTime<Utc>>,
    /// Ids of other tasks this one relates to
    pub dependencies: Vec<String>,
    pub parent_task_id: Option<String>,
    pub user_id: String,
    pub channel: String,
    pub session_id: Option<String>,
    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            priority: Priority::default(),
            deadline: None,
            dependencies: Vec::new(),
            parent_task_id: None,
            user_id: "default".to_string(),
            channel: "web".to_string(),
            session_id: None,
            tags: Vec::new(),
            metadata: Map::new(),
        }
    }
}

impl TaskOptions {
    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn for_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = user_id.into();
        self
    }
}

/// A goal-driven plan of steps and its execution state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub goal: Goal,
    pub plan: Vec<PlanStep>,
    pub status: RunStatus,
    pub priority: Priority,
    /// Bumped every time the task is started or resumed
    #[serde(default)]
    pub attempt: u32,

    pub progress: u8,
    pub completed_steps: usize,
    pub total_steps: usize,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,

    pub dependencies: Vec<String>,
    pub parent_task_id: Option<String>,

    pub context: RunContext,
    pub channel: String,
    pub session_id: Option<String>,

    pub output: Option<RunSummary>,
    pub error: Option<String>,
    /// Set while paused on a failed step
    pub decision_required: bool,
    pub cancel_reason: Option<String>,
    pub cancelled_at: Option<DateTime<Utc>>,

    pub tags: Vec<String>,
    pub metadata: Map<String, Value>,
    pub logs: RunLog,
}

impl Task {
    pub fn new(goal: Goal, steps: Vec<Step>, options: TaskOptions) -> Self {
        let now = Utc::now();
        let total_steps = steps.len();
        Self {
            id: generate_id("task"),
            goal,
            plan: steps.into_iter().map(PlanStep::new).collect(),
            status: RunStatus::Pending,
            priority: options.priority,
            attempt: 0,
            progress: 0,
            completed_steps: 0,
            total_steps,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
            deadline: options.deadline,
            dependencies: options.dependencies,
            parent_task_id: options.parent_task_id,
            context: RunContext::new(options.user_id, Value::Null),
            channel: options.channel,
            session_id: options.session_id,
            output: None,
            error: None,
            decision_required: false,
            cancel_reason: None,
            cancelled_at: None,
            tags: options.tags,
            metadata: options.metadata,
            logs: RunLog::new(),
        }
    }

    pub fn user_id(&self) -> &str {
        &self.context.user_id
    }

    pub fn plan_step(&self, step_id: &str) -> Option<&PlanStep> {
        self.plan.iter().find(|s| s.id() == step_id)
    }

    /// Whether every `depends_on` step of `step` has completed.
    ///
    /// Skipped steps count as satisfied; unknown ids never are.
    pub fn dependencies_met(&self, step: &Step) -> bool {
        step.depends_on
            .iter()
            .all(|dep| self.plan_step(dep).map(|s| s.is_settled()).unwrap_or(false))
    }

    /// Ids of steps left waiting on dependencies.
    pub fn waiting_steps(&self) -> Vec<String> {
        self.plan
            .iter()
            .filter(|s| s.status() == StepStatus::Waiting)
            .map(|s| s.id().to_string())
            .collect()
    }

    pub(crate) fn record_success(&mut self, index: usize, output: Value) {
        let step_id = self.plan[index].id().to_string();
        self.plan[index].state.mark_completed(output.clone());
        self.context.variables.insert(step_id, output);
        self.completed_steps += 1;
        self.progress = progress_percent(self.completed_steps, self.total_steps);
    }

    /// Builds the summary from completed step results.
    pub(crate) fn summarize(&self, completed_at: DateTime<Utc>) -> RunSummary {
        let results: Vec<&Value> = self
            .plan
            .iter()
            .filter(|s| s.status() == StepStatus::Completed)
            .filter_map(|s| s.state.result.as_ref())
            .collect();
        RunSummary::build(
            results,
            self.completed_steps,
            self.total_steps,
            self.started_at,
            completed_at,
        )
    }

    /// Returns every step and counter to pristine and the task to pending.
    pub(crate) fn reset(&mut self) {
        self.status = RunStatus::Pending;
        self.attempt += 1;
        self.started_at = None;
        self.completed_at = None;
        self.error = None;
        self.output = None;
        self.decision_required = false;
        self.cancel_reason = None;
        self.cancelled_at = None;
        for step in &mut self.plan {
            step.state.reset();
        }
        self.context.variables.clear();
        self.completed_steps = 0;
        self.progress = 0;
    }

    /// The task's plan seen as a definition, for step executors.
    pub fn as_definition(&self) -> Definition {
        let mut definition = Definition::from_steps(
            self.goal.text.clone(),
            self.plan.iter().map(|s| s.step.clone()).collect(),
        );
        definition.id = self.id.clone();
        definition.description = self.goal.summary.clone().unwrap_or_default();
        definition.category = "task".to_string();
        definition
    }
}

/// Partial update of a task's descriptive fields.
///
/// Status and step state only change through the lifecycle operations.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskUpdate {
    pub goal: Option<Goal>,
    pub priority: Option<Priority>,
    pub deadline: Option<DateTime<Utc>>,
    pub tags: Option<Vec<String>>,
    pub metadata: Option<Map<String, Value>>,
    pub dependencies: Option<Vec<String>>,
}

impl TaskUpdate {
    pub(crate) fn apply(self, task: &mut Task) {
        if let Some(goal) = self.goal {
            task.goal = goal;
        }
        if let Some(priority) = self.priority {
            task.priority = priority;
        }
        if let Some(deadline) = self.deadline {
            task.deadline = Some(deadline);
        }
        if let Some(tags) = self.tags {
            task.tags = tags;
        }
        if let Some(metadata) = self.metadata {
            task.metadata = metadata;
        }
        if let Some(dependencies) = self.dependencies {
            task.dependencies = dependencies;
        }
    }
}

/// Filters for listing tasks.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskFilter {
    /// Any of these statuses; empty means all
    pub statuses: Vec<RunStatus>,
    pub user_id: Option<String>,
    pub priority: Option<Priority>,
    /// Created at or after
    pub from: Option<DateTime<Utc>>,
    /// Created at or before
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl TaskFilter {
    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.statuses.push(status);
        self
    }

    pub(crate) fn matches(&self, task: &Task) -> bool {
        if !self.statuses.is_empty() && !self.statuses.contains(&task.status) {
            return false;
        }
        if let Some(user_id) = &self.user_id {
            if task.user_id() != user_id {
                return false;
            }
        }
        if let Some(priority) = self.priority {
            if task.priority != priority {
                return false;
            }
        }
        if let Some(from) = self.from {
            if task.created_at < from {
                return false;
            }
        }
        if let Some(to) = self.to {
            if task.created_at > to {
                return false;
            }
        }
        true
    }
}

/// Caller decision for a task paused on a failed step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskDecision {
    /// Run the failed step again
    RetryStep,
    /// Mark the failed step skipped and carry on
    SkipStep,
    /// Give up; the task fails
    Abort,
}

/// How a call to execute or resume a task ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TaskOutcome {
    Completed { summary: RunSummary },
    /// A step failed; the task is paused until [`TaskDecision`]
    PausedForDecision { step_id: String, error: String },
    /// These steps still wait on dependencies
    Waiting { steps: Vec<String> },
    Cancelled,
    Failed { error: String },
}

/// A saved step result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub task_id: String,
    pub step_id: String,
    pub result: Value,
    pub saved_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_priority_order_and_serde() {
        assert!(Priority::Critical < Priority::High);
        assert!(Priority::Medium < Priority::Low);
        assert_eq!(Priority::default(), Priority::Medium);
        assert_eq!(serde_json::to_value(Priority::High).unwrap(), json!(2));
        assert_eq!(serde_json::from_value::<Priority>(json!(4)).unwrap(), Priority::Low);
        assert!(serde_json::from_value::<Priority>(json!(9)).is_err());
    }

    #[test]
    fn test_new_task_defaults() {
        let task = Task::new(
            Goal::new("Write report"),
            vec![Step::new("a", "data-fetch"), Step::new("b", "ai-invoke")],
            TaskOptions::default(),
        );
        assert!(task.id.starts_with("task_"));
        assert_eq!(task.status, RunStatus::Pending);
        assert_eq!(task.priority, Priority::Medium);
        assert_eq!(task.total_steps, 2);
        assert_eq!(task.user_id(), "default");
        assert_eq!(task.channel, "web");
    }

    #[test]
    fn test_dependencies_met() {
        let mut task = Task::new(
            Goal::new("g"),
            vec![
                Step::new("a", "notify"),
                Step::new("b", "notify").depends_on("a"),
                Step::new("c", "notify").depends_on("ghost"),
            ],
            TaskOptions::default(),
        );
        let b = task.plan[1].step.clone();
        let c = task.plan[2].step.clone();
        assert!(!task.dependencies_met(&b));
        task.record_success(0, json!({}));
        assert!(task.dependencies_met(&b));
        assert!(!task.dependencies_met(&c));
    }

    #[test]
    fn test_plan_step_serializes_flat() {
        let step = PlanStep::new(Step::new("a", "notify").depends_on("z"));
        let value = serde_json::to_value(&step).unwrap();
        assert_eq!(value["id"], "a");
        assert_eq!(value["type"], "notify");
        assert_eq!(value["status"], "pending");

        let back: PlanStep = serde_json::from_value(value).unwrap();
        assert_eq!(back, step);
    }

    #[test]
    fn test_filter_matches() {
        let task = Task::new(
            Goal::new("g"),
            vec![],
            TaskOptions::default().with_priority(Priority::High).for_user("u1"),
        );
        assert!(TaskFilter::default().matches(&task));
        assert!(TaskFilter::default().with_status(RunStatus::Pending).matches(&task));
        assert!(!TaskFilter::default().with_status(RunStatus::Running).matches(&task));
        assert!(!TaskFilter {
            user_id: Some("u2".to_string()),
            ..TaskFilter::default()
        }
        .matches(&task));
        assert!(!TaskFilter {
            priority: Some(Priority::Low),
            ..TaskFilter::default()
        }
        .matches(&task));
    }
}
