//! Workflow Data Model
//!
//! Core data structures representing definitions and their steps.
//!
//! # Example YAML Format
//!
//! ```yaml
//! name: Lead follow-up
//! category: sales
//! triggers: [new-lead]
//! steps:
//!   - id: score
//!     name: Score the lead
//!     type: analysis
//!     config:
//!       criteria: [source, behaviour]
//!
//!   - id: route
//!     type: condition
//!     config:
//!       conditions:
//!         - { field: score.score, operator: ">=", value: 80, next_step: hot }
//!         - { field: score.score, operator: "<", value: 80, next_step: end }
//!
//!   - id: hot
//!     type: notify
//!     config:
//!       channels: [immediate]
//! ```

use chrono::{DateTime, Utc};
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Represents a single step in a definition.
///
/// The `step_type` tag and the untyped `config` bag are resolved into a
/// [`StepKind`] by the step registry right before execution.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Step {
    /// Unique identifier within the owning definition
    pub id: String,

    /// Display name
    #[serde(default)]
    pub name: String,

    /// Step type tag (e.g. "ai-invoke", "condition", "notify")
    #[serde(rename = "type")]
    pub step_type: String,

    /// Type-specific configuration
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub config: Value,

    /// IDs of steps that must complete first (task plans only)
    #[serde(
        default,
        alias = "dependsOn",
        deserialize_with = "single_or_vec",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub depends_on: Vec<String>,
}

/// Deserializes either a single string or array of strings into Vec<String>
pub(crate) fn single_or_vec<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let val = Value::deserialize(deserializer)?;
    match val {
        Value::Null => Ok(Vec::new()),
        Value::String(s) if s.is_empty() => Ok(Vec::new()),
        Value::String(s) => Ok(vec![s]),
        Value::Array(arr) => arr
            .into_iter()
            .map(|v| match v {
                Value::String(s) => Ok(s),
                _ => Err(de::Error::custom("Expected string in array")),
            })
            .collect(),
        _ => Err(de::Error::custom("Expected string or array of strings")),
    }
}

impl Step {
    /// Creates a new Step with the given id and type tag.
    ///
    /// # Example
    ///
    /// ```
    /// use steprunner::workflow::Step;
    /// use serde_json::json;
    ///
    /// let step = Step::new("draft", "ai-invoke")
    ///     .named("Draft the article")
    ///     .with_config(json!({ "prompt": "Write about Rust" }));
    /// ```
    pub fn new(id: impl Into<String>, step_type: impl Into<String>) -> Self {
        let id = id.into().trim().to_string();
        Self {
            name: id.clone(),
            id,
            step_type: step_type.into().trim().to_string(),
            config: Value::Null,
            depends_on: Vec::new(),
        }
    }

    /// Creates a condition step from an ordered list of conditions.
    pub fn condition(id: impl Into<String>, conditions: Vec<Condition>) -> Self {
        let config = serde_json::json!({ "conditions": conditions });
        Self::new(id, "condition").with_config(config)
    }

    /// Sets the display name.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the type-specific config.
    pub fn with_config(mut self, config: Value) -> Self {
        self.config = config;
        self
    }

    /// Adds a dependency on another step.
    pub fn depends_on(mut self, step_id: impl Into<String>) -> Self {
        self.depends_on.push(step_id.into());
        self
    }

    /// Display label, falling back to the id.
    pub fn label(&self) -> &str {
        if self.name.trim().is_empty() {
            &self.id
        } else {
            &self.name
        }
    }
}

/// One branching rule of a condition step.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Condition {
    pub field: String,
    pub operator: String,
    #[serde(default)]
    pub value: Value,
    /// Step id to jump to, or `"end"`
    #[serde(alias = "nextStep")]
    pub next_step: String,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: impl Into<String>,
        value: impl Into<Value>,
        next_step: impl Into<String>,
    ) -> Self {
        Self {
            field: field.into(),
            operator: operator.into(),
            value: value.into(),
            next_step: next_step.into(),
        }
    }
}

/// Sentinel branch target that ends a run.
pub const END_TARGET: &str = "end";

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AiInvokeConfig {
    pub prompt: String,
    pub model: Option<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct AnalysisConfig {
    pub model: Option<String>,
    pub criteria: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ApprovalConfig {
    pub approvers: Vec<String>,
    #[serde(alias = "timeout")]
    pub timeout_secs: Option<u64>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ConditionConfig {
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct NotifyConfig {
    #[serde(alias = "channel", deserialize_with = "single_or_vec")]
    pub channels: Vec<String>,
    pub template: Option<String>,
}

#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct WebhookConfig {
    pub url: String,
    pub method: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            method: "POST".to_string(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DataFetchConfig {
    pub sources: Vec<String>,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct DelayConfig {
    pub seconds: u64,
}

/// A step's resolved behavior, each variant carrying its own config shape.
#[derive(Debug, Clone, PartialEq)]
pub enum StepKind {
    AiInvoke(AiInvokeConfig),
    Analysis(AnalysisConfig),
    Approval(ApprovalConfig),
    Condition(ConditionConfig),
    Notify(NotifyConfig),
    Webhook(WebhookConfig),
    DataFetch(DataFetchConfig),
    Delay(DelayConfig),
    End,
}

/// What starts a definition. Informational only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum Trigger {
    Manual,
    Schedule,
    Event(String),
}

impl From<String> for Trigger {
    fn from(value: String) -> Self {
        match value.as_str() {
            "manual" => Trigger::Manual,
            "schedule" => Trigger::Schedule,
            _ => Trigger::Event(value),
        }
    }
}

impl From<Trigger> for String {
    fn from(trigger: Trigger) -> Self {
        match trigger {
            Trigger::Manual => "manual".to_string(),
            Trigger::Schedule => "schedule".to_string(),
            Trigger::Event(name) => name,
        }
    }
}

fn default_category() -> String {
    "custom".to_string()
}

fn default_icon() -> String {
    "📋".to_string()
}

fn default_triggers() -> Vec<Trigger> {
    vec![Trigger::Manual]
}

fn default_enabled() -> bool {
    true
}

/// A reusable, ordered template of steps.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Definition {
    /// Assigned by the definition store
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default = "default_icon")]
    pub icon: String,

    /// Ordered steps; insertion order is execution order unless a condition jumps
    #[serde(default)]
    pub steps: Vec<Step>,

    #[serde(default = "default_triggers")]
    pub triggers: Vec<Trigger>,

    /// Declared variable names
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub variables: Vec<String>,

    /// A disabled definition cannot start new runs
    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_by: Option<String>,
}

impl Definition {
    /// Creates a new, enabled, empty definition.
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: String::new(),
            name: name.into(),
            description: String::new(),
            category: default_category(),
            icon: default_icon(),
            steps: Vec::new(),
            triggers: default_triggers(),
            variables: Vec::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
            created_by: None,
        }
    }

    /// Creates a definition from a list of steps.
    pub fn from_steps(name: impl Into<String>, steps: Vec<Step>) -> Self {
        let mut definition = Self::new(name);
        definition.steps = steps;
        definition
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = category.into();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Adds a step to the definition.
    pub fn add_step(&mut self, step: Step) -> Result<(), String> {
        if self.steps.iter().any(|s| s.id == step.id) {
            return Err(format!("Step '{}' already exists", step.id));
        }
        self.steps.push(step);
        Ok(())
    }

    /// Removes a step and any dependency references to it.
    pub fn remove_step(&mut self, id: &str) -> Result<(), String> {
        let index = self
            .step_index(id)
            .ok_or_else(|| format!("Step '{}' not found", id))?;

        for step in &mut self.steps {
            step.depends_on.retain(|s| s != id);
        }

        self.steps.remove(index);
        Ok(())
    }

    /// Gets a step by ID.
    pub fn get_step(&self, id: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.id == id)
    }

    /// Position of a step in execution order.
    pub fn step_index(&self, id: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.id == id)
    }

    /// Returns the number of steps in the definition.
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    /// Returns true if the definition has no steps.
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_step_creation() {
        let step = Step::new(" draft ", "ai-invoke")
            .named("Draft")
            .with_config(json!({ "prompt": "hi" }))
            .depends_on("research");

        assert_eq!(step.id, "draft");
        assert_eq!(step.step_type, "ai-invoke");
        assert_eq!(step.label(), "Draft");
        assert_eq!(step.depends_on, vec!["research"]);
    }

    #[test]
    fn test_step_label_falls_back_to_id() {
        let step = Step::new("notify", "notify").named("  ");
        assert_eq!(step.label(), "notify");
    }

    #[test]
    fn test_condition_step_builder() {
        let step = Step::condition("route", vec![Condition::new("score", ">=", 80, "hot")]);
        assert_eq!(step.step_type, "condition");
        assert_eq!(step.config["conditions"][0]["next_step"], "hot");
    }

    #[test]
    fn test_depends_on_accepts_single_string() {
        let step: Step = serde_json::from_value(json!({
            "id": "b", "type": "notify", "dependsOn": "a"
        }))
        .unwrap();
        assert_eq!(step.depends_on, vec!["a"]);
    }

    #[test]
    fn test_condition_accepts_camel_case_next_step() {
        let cond: Condition = serde_json::from_value(json!({
            "field": "score", "operator": ">", "value": 1, "nextStep": "x"
        }))
        .unwrap();
        assert_eq!(cond.next_step, "x");
    }

    #[test]
    fn test_definition_defaults_from_json() {
        let def: Definition = serde_json::from_value(json!({ "name": "Minimal" })).unwrap();
        assert!(def.enabled);
        assert_eq!(def.category, "custom");
        assert_eq!(def.triggers, vec![Trigger::Manual]);
        assert!(def.is_empty());
    }

    #[test]
    fn test_definition_explicitly_disabled() {
        let def: Definition =
            serde_json::from_value(json!({ "name": "Off", "enabled": false })).unwrap();
        assert!(!def.enabled);
    }

    #[test]
    fn test_trigger_conversion() {
        assert_eq!(Trigger::from("schedule".to_string()), Trigger::Schedule);
        assert_eq!(
            Trigger::from("new-lead".to_string()),
            Trigger::Event("new-lead".to_string())
        );
        let s: String = Trigger::Event("x".to_string()).into();
        assert_eq!(s, "x");
    }

    #[test]
    fn test_definition_add_step_rejects_duplicates() {
        let mut def = Definition::new("d");
        assert!(def.add_step(Step::new("a", "notify")).is_ok());
        assert!(def.add_step(Step::new("a", "notify")).is_err());
        assert_eq!(def.len(), 1);
    }

    #[test]
    fn test_definition_remove_cleans_references() {
        let mut def = Definition::from_steps(
            "d",
            vec![
                Step::new("a", "notify"),
                Step::new("b", "notify").depends_on("a"),
            ],
        );
        def.remove_step("a").unwrap();
        assert_eq!(def.len(), 1);
        assert!(def.steps[0].depends_on.is_empty());
        assert!(def.remove_step("missing").is_err());
    }

    #[test]
    fn test_definition_step_index() {
        let def = Definition::from_steps(
            "d",
            vec![Step::new("a", "notify"), Step::new("b", "notify")],
        );
        assert_eq!(def.step_index("b"), Some(1));
        assert!(def.get_step("c").is_none());
    }

    #[test]
    fn test_notify_config_single_channel() {
        let cfg: NotifyConfig = serde_json::from_value(json!({ "channel": "daily" })).unwrap();
        assert_eq!(cfg.channels, vec!["daily"]);
    }

    #[test]
    fn test_webhook_config_default_method() {
        let cfg: WebhookConfig = serde_json::from_value(json!({ "url": "/hook" })).unwrap();
        assert_eq!(cfg.method, "POST");
    }
}
