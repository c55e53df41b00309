//! Step Registry
//!
//! Maps a step type tag to its display metadata and resolves a step's
//! untyped config into a typed [`StepKind`]. Execution behavior itself lives
//! behind the [`StepExecutor`](super::executor::StepExecutor) capability.

use once_cell::sync::Lazy;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};

use crate::error::StepError;
use crate::workflow::model::{Step, StepKind};

/// Display metadata for a step type.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct StepTypeInfo {
    pub tag: &'static str,
    pub name: &'static str,
    pub icon: &'static str,
    pub description: &'static str,
}

static STEP_TYPES: Lazy<Vec<StepTypeInfo>> = Lazy::new(|| {
    vec![
        StepTypeInfo {
            tag: "ai-invoke",
            name: "AI Invoke",
            icon: "🤖",
            description: "Call an AI model to process the task",
        },
        StepTypeInfo {
            tag: "analysis",
            name: "AI Analysis",
            icon: "📈",
            description: "Analyse data and produce insights",
        },
        StepTypeInfo {
            tag: "approval",
            name: "Approval",
            icon: "✅",
            description: "Requires a human decision",
        },
        StepTypeInfo {
            tag: "condition",
            name: "Condition",
            icon: "🔀",
            description: "Branch to another step based on conditions",
        },
        StepTypeInfo {
            tag: "notify",
            name: "Notify",
            icon: "📱",
            description: "Send a notification",
        },
        StepTypeInfo {
            tag: "webhook",
            name: "Webhook",
            icon: "🔗",
            description: "Call an external API",
        },
        StepTypeInfo {
            tag: "data-fetch",
            name: "Fetch Data",
            icon: "📥",
            description: "Load data from a source",
        },
        StepTypeInfo {
            tag: "delay",
            name: "Delay",
            icon: "⏰",
            description: "Wait before continuing",
        },
        StepTypeInfo {
            tag: "end",
            name: "End",
            icon: "🏁",
            description: "Finish the workflow",
        },
    ]
});

/// Legacy tags accepted as synonyms.
const ALIASES: &[(&str, &str)] = &[
    ("ai-chat", "ai-invoke"),
    ("ai-analysis", "analysis"),
    ("notification", "notify"),
];

/// Resolves step type tags.
#[derive(Debug, Clone, Copy, Default)]
pub struct StepRegistry;

impl StepRegistry {
    pub fn new() -> Self {
        Self
    }

    /// All known step types in display order.
    pub fn catalog(&self) -> &'static [StepTypeInfo] {
        &STEP_TYPES
    }

    /// Canonical tag for `tag`, following aliases.
    pub fn canonical<'a>(&self, tag: &'a str) -> &'a str {
        ALIASES
            .iter()
            .find(|(alias, _)| *alias == tag)
            .map(|(_, canonical)| *canonical)
            .unwrap_or(tag)
    }

    pub fn lookup(&self, tag: &str) -> Option<&'static StepTypeInfo> {
        let tag = self.canonical(tag);
        STEP_TYPES.iter().find(|info| info.tag == tag)
    }

    /// Resolves a step into its typed behavior.
    pub fn resolve(&self, step: &Step) -> Result<StepKind, StepError> {
        let kind = match self.canonical(step.step_type.as_str()) {
            "ai-invoke" => StepKind::AiInvoke(parse_config(step)?),
            "analysis" => StepKind::Analysis(parse_config(step)?),
            "approval" => StepKind::Approval(parse_config(step)?),
            "condition" => StepKind::Condition(parse_config(step)?),
            "notify" => StepKind::Notify(parse_config(step)?),
            "webhook" => StepKind::Webhook(parse_config(step)?),
            "data-fetch" => StepKind::DataFetch(parse_config(step)?),
            "delay" => StepKind::Delay(parse_config(step)?),
            "end" => StepKind::End,
            _ => return Err(StepError::UnknownStepType(step.step_type.clone())),
        };
        Ok(kind)
    }
}

fn parse_config<T: DeserializeOwned>(step: &Step) -> Result<T, StepError> {
    let config = match &step.config {
        Value::Null => Value::Object(Map::new()),
        other => other.clone(),
    };
    serde_json::from_value(config).map_err(|e| StepError::InvalidConfig {
        step: step.id.clone(),
        message: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Condition;
    use serde_json::json;

    #[test]
    fn test_catalog_covers_all_tags() {
        let registry = StepRegistry::new();
        let tags: Vec<_> = registry.catalog().iter().map(|t| t.tag).collect();
        assert_eq!(
            tags,
            vec![
                "ai-invoke",
                "analysis",
                "approval",
                "condition",
                "notify",
                "webhook",
                "data-fetch",
                "delay",
                "end"
            ]
        );
    }

    #[test]
    fn test_lookup_follows_aliases() {
        let registry = StepRegistry::new();
        assert_eq!(registry.lookup("ai-chat").unwrap().tag, "ai-invoke");
        assert_eq!(registry.lookup("notification").unwrap().tag, "notify");
        assert!(registry.lookup("teleport").is_none());
    }

    #[test]
    fn test_resolve_typed_config() {
        let registry = StepRegistry::new();
        let step = Step::new("wait", "delay").with_config(json!({ "seconds": 5 }));
        match registry.resolve(&step).unwrap() {
            StepKind::Delay(cfg) => assert_eq!(cfg.seconds, 5),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_missing_config_uses_defaults() {
        let registry = StepRegistry::new();
        let step = Step::new("fetch", "data-fetch");
        assert!(matches!(
            registry.resolve(&step).unwrap(),
            StepKind::DataFetch(_)
        ));
        assert_eq!(registry.resolve(&Step::new("e", "end")).unwrap(), StepKind::End);
    }

    #[test]
    fn test_resolve_condition() {
        let registry = StepRegistry::new();
        let step = Step::condition("c", vec![Condition::new("score", ">=", 80, "a")]);
        match registry.resolve(&step).unwrap() {
            StepKind::Condition(cfg) => assert_eq!(cfg.conditions.len(), 1),
            other => panic!("unexpected kind: {:?}", other),
        }
    }

    #[test]
    fn test_resolve_unknown_type() {
        let registry = StepRegistry::new();
        let err = registry.resolve(&Step::new("x", "teleport")).unwrap_err();
        assert_eq!(err, StepError::UnknownStepType("teleport".to_string()));
    }

    #[test]
    fn test_resolve_invalid_config() {
        let registry = StepRegistry::new();
        let step = Step::new("wait", "delay").with_config(json!({ "seconds": "soon" }));
        assert!(matches!(
            registry.resolve(&step),
            Err(StepError::InvalidConfig { .. })
        ));
    }
}
