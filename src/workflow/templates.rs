//! Built-in Templates
//!
//! Ready-made definitions callers can instantiate and then edit.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::model::{Condition, Definition, Step, Trigger};

/// A named, reusable starting point for a definition.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct Template {
    pub id: &'static str,
    pub name: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub category: &'static str,
    pub steps: Vec<Step>,
    pub triggers: Vec<Trigger>,
}

/// Fields that replace the template's own when instantiating.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct TemplateOverrides {
    pub name: Option<String>,
    pub description: Option<String>,
    pub icon: Option<String>,
    pub category: Option<String>,
}

impl Template {
    /// Builds a fresh, enabled definition from this template.
    ///
    /// Empty override strings fall back to the template's own value.
    pub fn instantiate(&self, overrides: TemplateOverrides) -> Definition {
        let pick = |value: Option<String>, fallback: &str| {
            value
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| fallback.to_string())
        };
        let mut definition =
            Definition::from_steps(pick(overrides.name, self.name), self.steps.clone())
                .with_description(pick(overrides.description, self.description))
                .with_category(pick(overrides.category, self.category));
        definition.icon = pick(overrides.icon, self.icon);
        definition.triggers = self.triggers.clone();
        definition
    }
}

static TEMPLATES: Lazy<Vec<Template>> = Lazy::new(|| {
    vec![
        Template {
            id: "content-publishing",
            name: "Content publishing",
            description: "Draft, review, polish and publish an article",
            icon: "📝",
            category: "productivity",
            steps: vec![
                Step::new("step-1", "ai-invoke")
                    .named("Draft")
                    .with_config(json!({ "prompt": "Write a quality article on the topic" })),
                Step::new("step-2", "approval")
                    .named("Review")
                    .with_config(json!({ "approvers": ["user"], "timeout": 86400 })),
                Step::new("step-3", "ai-invoke")
                    .named("Polish formatting")
                    .with_config(json!({ "prompt": "Improve formatting, add title and tags" })),
                Step::new("step-4", "webhook")
                    .named("Publish")
                    .with_config(json!({ "url": "/api/publish", "method": "POST" })),
            ],
            triggers: vec![Trigger::Manual, Trigger::Schedule],
        },
        Template {
            id: "lead-followup",
            name: "Lead follow-up",
            description: "Score incoming leads and schedule follow-ups",
            icon: "🎯",
            category: "sales",
            steps: vec![
                Step::new("step-1", "analysis")
                    .named("Score lead")
                    .with_config(json!({ "criteria": ["source", "behaviour", "engagement"] })),
                Step::condition(
                    "step-2",
                    vec![
                        Condition::new("score", ">=", 80, "step-3"),
                        Condition::new("score", ">=", 50, "step-4"),
                        Condition::new("score", "<", 50, "end"),
                    ],
                )
                .named("Route by score"),
                Step::new("step-3", "notify")
                    .named("Priority follow-up")
                    .with_config(json!({ "channels": ["immediate"], "template": "high-priority" })),
                Step::new("step-4", "notify")
                    .named("Standard follow-up")
                    .with_config(json!({ "channels": ["daily"], "template": "standard" })),
            ],
            triggers: vec![Trigger::Event("new-lead".to_string())],
        },
        Template {
            id: "daily-report",
            name: "Daily report",
            description: "Collect the day's data and send a summary report",
            icon: "📊",
            category: "productivity",
            steps: vec![
                Step::new("step-1", "data-fetch")
                    .named("Collect data")
                    .with_config(json!({ "sources": ["chat", "tokens", "users"] })),
                Step::new("step-2", "ai-invoke")
                    .named("Write report")
                    .with_config(json!({ "prompt": "Summarise today's key metrics and trends" })),
                Step::new("step-3", "notify")
                    .named("Send report")
                    .with_config(json!({ "channels": ["chat", "email"] })),
            ],
            triggers: vec![Trigger::Schedule],
        },
    ]
});

/// All built-in templates.
pub fn builtin_templates() -> &'static [Template] {
    &TEMPLATES
}

/// Finds a built-in template by id.
pub fn find_template(id: &str) -> Option<&'static Template> {
    TEMPLATES.iter().find(|t| t.id == id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::validator::validate_definition;

    #[test]
    fn test_builtin_templates_are_valid() {
        assert_eq!(builtin_templates().len(), 3);
        for template in builtin_templates() {
            let def = template.instantiate(TemplateOverrides::default());
            assert!(
                validate_definition(&def).is_empty(),
                "template '{}' has problems: {:?}",
                template.id,
                validate_definition(&def)
            );
        }
    }

    #[test]
    fn test_find_template() {
        assert_eq!(find_template("daily-report").unwrap().steps.len(), 3);
        assert!(find_template("nope").is_none());
    }

    #[test]
    fn test_instantiate_with_overrides() {
        let template = find_template("lead-followup").unwrap();
        let def = template.instantiate(TemplateOverrides {
            name: Some("EU leads".to_string()),
            ..TemplateOverrides::default()
        });
        assert_eq!(def.name, "EU leads");
        assert_eq!(def.category, "sales");
        assert_eq!(def.icon, "🎯");
        assert!(def.enabled);
        assert_eq!(def.triggers, vec![Trigger::Event("new-lead".to_string())]);
    }

    #[test]
    fn test_empty_overrides_fall_back_to_template() {
        let template = find_template("daily-report").unwrap();
        let def = template.instantiate(TemplateOverrides {
            name: Some(String::new()),
            description: Some(String::new()),
            icon: Some(String::new()),
            category: Some("ops".to_string()),
        });
        assert_eq!(def.name, "Daily report");
        assert_eq!(def.description, template.description);
        assert_eq!(def.icon, "📊");
        assert_eq!(def.category, "ops");
    }
}
