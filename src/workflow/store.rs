//! Definition Store
//!
//! Create/read/update/delete/filter for definitions. The engine only talks to
//! the [`DefinitionStore`] trait; [`MemoryDefinitionStore`] is the bundled
//! in-process implementation.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::Utc;
use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{Definition, Step, Trigger};
use crate::error::{EngineError, Result};
use crate::ids::generate_id;

/// Partial update merged into an existing definition.
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DefinitionUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub category: Option<String>,
    pub icon: Option<String>,
    pub steps: Option<Vec<Step>>,
    pub triggers: Option<Vec<Trigger>>,
    pub variables: Option<Vec<String>>,
    pub enabled: Option<bool>,
}

impl DefinitionUpdate {
    /// Merges present fields into `definition`.
    fn apply(self, definition: &mut Definition) {
        if let Some(name) = self.name {
            definition.name = name;
        }
        if let Some(description) = self.description {
            definition.description = description;
        }
        if let Some(category) = self.category {
            definition.category = category;
        }
        if let Some(icon) = self.icon {
            definition.icon = icon;
        }
        if let Some(steps) = self.steps {
            definition.steps = steps;
        }
        if let Some(triggers) = self.triggers {
            definition.triggers = triggers;
        }
        if let Some(variables) = self.variables {
            definition.variables = variables;
        }
        if let Some(enabled) = self.enabled {
            definition.enabled = enabled;
        }
    }
}

/// Filters for [`DefinitionStore::list`].
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
#[serde(default)]
pub struct DefinitionFilter {
    /// Exact category; `"all"` disables the filter
    pub category: Option<String>,
    pub enabled_only: bool,
    /// Case-insensitive substring of name or description
    pub search: Option<String>,
}

impl DefinitionFilter {
    fn matches(&self, definition: &Definition) -> bool {
        if let Some(category) = &self.category {
            if category != "all" && &definition.category != category {
                return false;
            }
        }
        if self.enabled_only && !definition.enabled {
            return false;
        }
        if let Some(search) = &self.search {
            let needle = search.to_lowercase();
            if !definition.name.to_lowercase().contains(&needle)
                && !definition.description.to_lowercase().contains(&needle)
            {
                return false;
            }
        }
        true
    }
}

/// Storage contract for definitions.
pub trait DefinitionStore: Send + Sync {
    /// Stores a new definition under a fresh id and returns that id.
    fn create(&self, definition: Definition) -> Result<String>;

    fn get(&self, id: &str) -> Result<Definition>;

    /// Merges `update` and bumps `updated_at`.
    fn update(&self, id: &str, update: DefinitionUpdate) -> Result<Definition>;

    fn delete(&self, id: &str) -> Result<()>;

    /// Matching definitions, most recently updated first.
    fn list(&self, filter: &DefinitionFilter) -> Vec<Definition>;
}

/// In-memory definition table.
#[derive(Debug, Default)]
pub struct MemoryDefinitionStore {
    definitions: RwLock<HashMap<String, Definition>>,
}

impl MemoryDefinitionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.definitions.read().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EngineError {
    EngineError::Io("definition store lock poisoned".to_string())
}

impl DefinitionStore for MemoryDefinitionStore {
    fn create(&self, mut definition: Definition) -> Result<String> {
        if definition.name.trim().is_empty() {
            return Err(EngineError::Validation(
                "Definition name is required".to_string(),
            ));
        }

        let id = generate_id("wf");
        let now = Utc::now();
        definition.id = id.clone();
        definition.created_at = now;
        definition.updated_at = now;

        info!("Created definition '{}' ({})", definition.name, id);
        self.definitions
            .write()
            .map_err(|_| poisoned())?
            .insert(id.clone(), definition);
        Ok(id)
    }

    fn get(&self, id: &str) -> Result<Definition> {
        self.definitions
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Definition", id))
    }

    fn update(&self, id: &str, update: DefinitionUpdate) -> Result<Definition> {
        let mut definitions = self.definitions.write().map_err(|_| poisoned())?;
        let definition = definitions
            .get_mut(id)
            .ok_or_else(|| EngineError::not_found("Definition", id))?;

        update.apply(definition);
        definition.updated_at = Utc::now();
        debug!("Updated definition {}", id);
        Ok(definition.clone())
    }

    fn delete(&self, id: &str) -> Result<()> {
        self.definitions
            .write()
            .map_err(|_| poisoned())?
            .remove(id)
            .map(|_| info!("Deleted definition {}", id))
            .ok_or_else(|| EngineError::not_found("Definition", id))
    }

    fn list(&self, filter: &DefinitionFilter) -> Vec<Definition> {
        let Ok(definitions) = self.definitions.read() else {
            return Vec::new();
        };
        let mut matching: Vec<Definition> = definitions
            .values()
            .filter(|d| filter.matches(d))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        matching
    }
}
