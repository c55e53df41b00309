//! Definition Parser
//!
//! Loads definitions from YAML or JSON files. Files ending in `.json` are
//! read as JSON, everything else as YAML.

use std::fs;
use std::path::Path;

use log::{debug, info, warn};

use super::model::Definition;
use super::validator::validate_definition;
use crate::error::{EngineError, Result};

/// Parses a definition from YAML text and validates it.
///
/// Fatal validation problems are returned as [`EngineError::Validation`];
/// the rest are logged as warnings.
pub fn parse_definition(content: &str) -> Result<Definition> {
    let definition: Definition = serde_yaml::from_str(content)
        .map_err(|e| EngineError::Parse(format!("{}. Check the file format.", e)))?;
    check(definition)
}

/// Parses a definition from JSON text and validates it.
pub fn parse_definition_json(content: &str) -> Result<Definition> {
    let definition: Definition =
        serde_json::from_str(content).map_err(|e| EngineError::Parse(e.to_string()))?;
    check(definition)
}

/// Loads a definition from a file.
///
/// # Example
///
/// ```rust,no_run
/// use steprunner::workflow::load_definition;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let definition = load_definition("lead-followup.yaml")?;
///     println!("Loaded {} steps", definition.steps.len());
///     Ok(())
/// }
/// ```
pub fn load_definition(path: impl AsRef<Path>) -> Result<Definition> {
    let path = path.as_ref();
    info!("Loading definition from: {}", path.display());

    let content = fs::read_to_string(path).map_err(|e| {
        EngineError::Io(format!(
            "Failed to read definition file '{}': {}. Check that the file exists and is readable.",
            path.display(),
            e
        ))
    })?;
    debug!("Definition content loaded ({} bytes)", content.len());

    let is_json = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    let definition = if is_json {
        parse_definition_json(&content)?
    } else {
        parse_definition(&content)?
    };

    info!(
        "Parsed definition '{}' with {} steps",
        definition.name,
        definition.steps.len()
    );
    Ok(definition)
}

/// Saves a definition as YAML.
pub fn save_definition(definition: &Definition, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let yaml = serde_yaml::to_string(definition).map_err(|e| EngineError::Parse(e.to_string()))?;
    fs::write(path, yaml)?;
    info!("Definition saved to: {}", path.display());
    Ok(())
}

fn check(definition: Definition) -> Result<Definition> {
    let (fatal, warnings): (Vec<_>, Vec<_>) = validate_definition(&definition)
        .into_iter()
        .partition(|e| e.is_fatal());

    for problem in &warnings {
        warn!("{}", problem);
    }

    if !fatal.is_empty() {
        let messages: Vec<String> = fatal.iter().map(|e| e.to_string()).collect();
        return Err(EngineError::Validation(messages.join("; ")));
    }

    Ok(definition)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Step, Trigger};
    use tempfile::tempdir;

    const LEAD_YAML: &str = r#"
name: Lead follow-up
category: sales
triggers: [manual, new-lead]
steps:
  - id: score
    name: Score the lead
    type: analysis
    config:
      criteria: [source, behaviour]
  - id: route
    type: condition
    config:
      conditions:
        - { field: score.score, operator: ">=", value: 80, nextStep: hot }
        - { field: score.score, operator: "<", value: 80, next_step: end }
  - id: hot
    type: notify
    dependsOn: score
    config:
      channel: immediate
"#;

    #[test]
    fn test_parse_yaml_definition() {
        let def = parse_definition(LEAD_YAML).unwrap();
        assert_eq!(def.name, "Lead follow-up");
        assert_eq!(def.category, "sales");
        assert_eq!(def.steps.len(), 3);
        assert_eq!(def.steps[1].step_type, "condition");
        assert_eq!(def.steps[2].depends_on, vec!["score"]);
        assert_eq!(
            def.triggers,
            vec![Trigger::Manual, Trigger::Event("new-lead".to_string())]
        );
        assert!(def.enabled);
    }

    #[test]
    fn test_parse_rejects_duplicate_ids() {
        let yaml = r#"
name: dup
steps:
  - { id: a, type: notify }
  - { id: a, type: notify }
"#;
        let err = parse_definition(yaml).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("Duplicate"));
    }

    #[test]
    fn test_parse_keeps_dangling_branch_as_warning() {
        let yaml = r#"
name: dangling
steps:
  - id: route
    type: condition
    config:
      conditions:
        - { field: x, operator: "==", value: 1, next_step: ghost }
"#;
        assert!(parse_definition(yaml).is_ok());
    }

    #[test]
    fn test_parse_invalid_yaml() {
        let err = parse_definition("this is not valid yaml: [[[").unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));
    }

    #[test]
    fn test_load_definition_file_not_found() {
        let result = load_definition("/nonexistent/path/definition.yaml");
        assert!(matches!(result, Err(EngineError::Io(_))));
    }

    #[test]
    fn test_load_yaml_and_json_files() {
        let temp_dir = tempdir().unwrap();

        let yaml_path = temp_dir.path().join("lead.yaml");
        std::fs::write(&yaml_path, LEAD_YAML).unwrap();
        assert_eq!(load_definition(&yaml_path).unwrap().steps.len(), 3);

        let json_path = temp_dir.path().join("ping.json");
        std::fs::write(
            &json_path,
            r#"{ "name": "ping", "steps": [ { "id": "p", "type": "notify" } ] }"#,
        )
        .unwrap();
        let def = load_definition(&json_path).unwrap();
        assert_eq!(def.name, "ping");
        assert_eq!(def.category, "custom");
    }

    #[test]
    fn test_save_then_load() {
        let temp_dir = tempdir().unwrap();
        let path = temp_dir.path().join("saved.yaml");

        let def = Definition::from_steps("saved", vec![Step::new("a", "delay")])
            .with_category("ops");
        save_definition(&def, &path).unwrap();
        assert!(path.exists());

        let loaded = load_definition(&path).unwrap();
        assert_eq!(loaded.name, "saved");
        assert_eq!(loaded.category, "ops");
        assert_eq!(loaded.steps[0].id, "a");
    }
}
