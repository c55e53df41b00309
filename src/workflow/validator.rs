//! Definition Validation
//!
//! Provides validation for definitions including:
//! - Runnability checks (non-empty, unique step ids)
//! - Reference integrity for `depends_on` and branch targets
//! - Dependency cycle detection

use std::collections::{HashMap, HashSet, VecDeque};

use log::{debug, warn};

use super::model::{ConditionConfig, Definition, Step, END_TARGET};
use crate::error::EngineError;
use crate::execution::registry::StepRegistry;

/// Validation error types for user-friendly error messages.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    EmptyDefinition,
    EmptyName,
    DuplicateStepId(String),
    EmptyStepId,
    EmptyStepType(String),
    UnknownStepType { step: String, step_type: String },
    InvalidReference { step: String, reference: String },
    DanglingBranch { step: String, target: String },
    CyclicDependency,
}

impl ValidationError {
    /// Whether the problem makes the definition unusable.
    ///
    /// Unknown types, unknown dependencies and dangling branch targets only
    /// surface when the affected step runs, so they are warnings.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            Self::UnknownStepType { .. } | Self::InvalidReference { .. } | Self::DanglingBranch { .. }
        )
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyDefinition => write!(f, "Definition has no steps"),
            Self::EmptyName => write!(f, "Definition has no name"),
            Self::DuplicateStepId(id) => write!(f, "Duplicate step ID: '{}'", id),
            Self::EmptyStepId => write!(f, "Step has empty or whitespace-only ID"),
            Self::EmptyStepType(step) => write!(f, "Step '{}' has no type specified", step),
            Self::UnknownStepType { step, step_type } => {
                write!(f, "Step '{}' uses unknown type '{}'", step, step_type)
            }
            Self::InvalidReference { step, reference } => {
                write!(f, "Step '{}' depends on unknown step '{}'", step, reference)
            }
            Self::DanglingBranch { step, target } => {
                write!(f, "Step '{}' branches to unknown step '{}'", step, target)
            }
            Self::CyclicDependency => {
                write!(f, "Steps depend on each other in a loop")
            }
        }
    }
}

/// Checks the invariants a definition must hold to start a run:
/// at least one step, no blank step ids, no duplicate step ids.
pub fn validate_runnable(definition: &Definition) -> Result<(), EngineError> {
    if definition.steps.is_empty() {
        return Err(EngineError::Validation(
            ValidationError::EmptyDefinition.to_string(),
        ));
    }

    let mut seen_ids: HashSet<&str> = HashSet::new();
    for step in &definition.steps {
        if step.id.trim().is_empty() {
            return Err(EngineError::Validation(ValidationError::EmptyStepId.to_string()));
        }
        if !seen_ids.insert(step.id.as_str()) {
            return Err(EngineError::Validation(
                ValidationError::DuplicateStepId(step.id.clone()).to_string(),
            ));
        }
    }

    Ok(())
}

/// Validates a definition fully, returning every problem found.
///
/// Runnability problems come first. Reference problems (unknown
/// dependencies, dangling branch targets, unknown step types, cycles)
/// do not stop a run from being created but are reported here so that
/// loaders can refuse or warn.
pub fn validate_definition(definition: &Definition) -> Vec<ValidationError> {
    let mut errors = Vec::new();

    if definition.name.trim().is_empty() {
        errors.push(ValidationError::EmptyName);
    }

    if definition.steps.is_empty() {
        errors.push(ValidationError::EmptyDefinition);
        return errors;
    }

    let registry = StepRegistry::new();
    let mut seen_ids: HashSet<&str> = HashSet::new();

    for step in &definition.steps {
        if step.id.trim().is_empty() {
            errors.push(ValidationError::EmptyStepId);
            continue;
        }
        if !seen_ids.insert(step.id.as_str()) {
            errors.push(ValidationError::DuplicateStepId(step.id.clone()));
        }
        if step.step_type.trim().is_empty() {
            errors.push(ValidationError::EmptyStepType(step.id.clone()));
        } else if registry.lookup(&step.step_type).is_none() {
            errors.push(ValidationError::UnknownStepType {
                step: step.id.clone(),
                step_type: step.step_type.clone(),
            });
        }
    }

    for step in &definition.steps {
        for dep in &step.depends_on {
            if !seen_ids.contains(dep.as_str()) {
                errors.push(ValidationError::InvalidReference {
                    step: step.id.clone(),
                    reference: dep.clone(),
                });
            }
        }

        for target in branch_targets(step) {
            if target != END_TARGET && !seen_ids.contains(target.as_str()) {
                errors.push(ValidationError::DanglingBranch {
                    step: step.id.clone(),
                    target,
                });
            }
        }
    }

    if dependency_order(&definition.steps).is_err() {
        errors.push(ValidationError::CyclicDependency);
    }

    errors
}

/// Returns the branch targets named by a condition step's config.
fn branch_targets(step: &Step) -> Vec<String> {
    if step.step_type != "condition" || step.config.is_null() {
        return Vec::new();
    }
    match serde_json::from_value::<ConditionConfig>(step.config.clone()) {
        Ok(config) => config.conditions.into_iter().map(|c| c.next_step).collect(),
        Err(e) => {
            warn!("Step '{}': unreadable condition config: {}", step.id, e);
            Vec::new()
        }
    }
}

/// Orders steps so that dependencies come before dependents (Kahn's algorithm).
///
/// Dependencies on unknown step ids are ignored here; they are reported
/// separately as invalid references. Returns an error on cycles.
pub fn dependency_order(steps: &[Step]) -> Result<Vec<String>, ValidationError> {
    let known: HashSet<&str> = steps.iter().map(|s| s.id.as_str()).collect();

    let mut in_degree: HashMap<&str, usize> = HashMap::new();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();
    for step in steps {
        let deps: Vec<&str> = step
            .depends_on
            .iter()
            .map(String::as_str)
            .filter(|d| known.contains(d))
            .collect();
        in_degree.insert(step.id.as_str(), deps.len());
        for dep in deps {
            dependents.entry(dep).or_default().push(step.id.as_str());
        }
    }

    // Seed in definition order so the result is stable
    let mut queue: VecDeque<&str> = steps
        .iter()
        .map(|s| s.id.as_str())
        .filter(|id| in_degree.get(id) == Some(&0))
        .collect();

    let mut sorted: Vec<String> = Vec::new();
    while let Some(current) = queue.pop_front() {
        sorted.push(current.to_string());
        for next in dependents.get(current).cloned().unwrap_or_default() {
            if let Some(degree) = in_degree.get_mut(next) {
                *degree -= 1;
                if *degree == 0 {
                    queue.push_back(next);
                }
            }
        }
    }

    if sorted.len() != in_degree.len() {
        return Err(ValidationError::CyclicDependency);
    }

    debug!("Dependency order: {:?}", sorted);
    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::Condition;

    fn linear() -> Definition {
        Definition::from_steps(
            "linear",
            vec![Step::new("a", "ai-invoke"), Step::new("b", "notify")],
        )
    }

    #[test]
    fn test_valid_definition() {
        assert!(validate_runnable(&linear()).is_ok());
        assert!(validate_definition(&linear()).is_empty());
    }

    #[test]
    fn test_empty_definition_not_runnable() {
        let def = Definition::new("empty");
        let err = validate_runnable(&def).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(err.to_string().contains("no steps"));
    }

    #[test]
    fn test_duplicate_ids_not_runnable() {
        let mut def = linear();
        def.steps.push(Step::new("a", "notify"));
        let err = validate_runnable(&def).unwrap_err();
        assert!(err.to_string().contains("Duplicate step ID"));
    }

    #[test]
    fn test_blank_step_id_not_runnable() {
        let def = Definition::from_steps("d", vec![Step::new("  ", "notify")]);
        assert!(validate_runnable(&def).is_err());
    }

    #[test]
    fn test_unknown_type_reported() {
        let def = Definition::from_steps("d", vec![Step::new("a", "teleport")]);
        let errors = validate_definition(&def);
        assert!(errors
            .iter()
            .any(|e| matches!(e, ValidationError::UnknownStepType { .. })));
        // Unknown types are a step-level failure, not a runnability problem
        assert!(validate_runnable(&def).is_ok());
    }

    #[test]
    fn test_dangling_branch_reported() {
        let def = Definition::from_steps(
            "d",
            vec![
                Step::condition("route", vec![Condition::new("x", "==", 1, "ghost")]),
                Step::condition("route2", vec![Condition::new("x", "==", 1, "end")]),
            ],
        );
        let errors = validate_definition(&def);
        assert_eq!(
            errors,
            vec![ValidationError::DanglingBranch {
                step: "route".to_string(),
                target: "ghost".to_string()
            }]
        );
    }

    #[test]
    fn test_invalid_reference_reported() {
        let def = Definition::from_steps("d", vec![Step::new("a", "notify").depends_on("ghost")]);
        let errors = validate_definition(&def);
        assert!(errors
            .iter()
            .any(|e| e.to_string().contains("unknown step 'ghost'")));
    }

    #[test]
    fn test_cycle_detected() {
        let steps = vec![
            Step::new("a", "notify").depends_on("b"),
            Step::new("b", "notify").depends_on("a"),
        ];
        assert_eq!(dependency_order(&steps), Err(ValidationError::CyclicDependency));
    }

    #[test]
    fn test_dependency_order_sorts_dependents_last() {
        let steps = vec![
            Step::new("c", "notify").depends_on("b"),
            Step::new("a", "notify"),
            Step::new("b", "notify").depends_on("a"),
        ];
        assert_eq!(dependency_order(&steps).unwrap(), vec!["a", "b", "c"]);
    }

    #[test]
    fn test_empty_name_reported() {
        let def = Definition::from_steps("  ", vec![Step::new("a", "notify")]);
        assert!(validate_definition(&def).contains(&ValidationError::EmptyName));
    }

    #[test]
    fn test_fatal_classification() {
        assert!(ValidationError::EmptyDefinition.is_fatal());
        assert!(ValidationError::CyclicDependency.is_fatal());
        assert!(!ValidationError::DanglingBranch {
            step: "a".into(),
            target: "b".into()
        }
        .is_fatal());
    }

    #[test]
    fn test_validation_error_display() {
        assert_eq!(
            ValidationError::EmptyDefinition.to_string(),
            "Definition has no steps"
        );
        assert!(ValidationError::DuplicateStepId("x".into())
            .to_string()
            .contains("x"));
        assert!(ValidationError::CyclicDependency.to_string().contains("loop"));
    }
}
