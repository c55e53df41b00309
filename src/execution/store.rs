//! Execution Store
//!
//! Indexed collection of past and active runs.

use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

use super::context::{Execution, RunStatus};
use crate::error::{EngineError, Result};

/// Default number of runs returned by [`ExecutionStore::list`].
pub const DEFAULT_LIST_LIMIT: usize = 20;

/// Filters for [`ExecutionStore::list`].
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
#[serde(default)]
pub struct ExecutionFilter {
    pub definition_id: Option<String>,
    pub status: Option<RunStatus>,
    /// Maximum number of runs; `None` means [`DEFAULT_LIST_LIMIT`]
    pub limit: Option<usize>,
}

impl ExecutionFilter {
    pub fn for_definition(definition_id: impl Into<String>) -> Self {
        Self {
            definition_id: Some(definition_id.into()),
            ..Self::default()
        }
    }

    pub fn with_status(mut self, status: RunStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn matches(&self, execution: &Execution) -> bool {
        if let Some(definition_id) = &self.definition_id {
            if &execution.definition_id != definition_id {
                return false;
            }
        }
        if let Some(status) = self.status {
            if execution.status != status {
                return false;
            }
        }
        true
    }
}

/// Storage contract for executions.
pub trait ExecutionStore: Send + Sync {
    /// Inserts or replaces the execution with the same id.
    fn record(&self, execution: &Execution) -> Result<()>;

    fn get(&self, id: &str) -> Result<Execution>;

    /// Matching runs, newest first, truncated to the filter's limit.
    fn list(&self, filter: &ExecutionFilter) -> Vec<Execution>;
}

/// In-memory execution table.
#[derive(Debug, Default)]
pub struct MemoryExecutionStore {
    executions: RwLock<HashMap<String, Execution>>,
}

impl MemoryExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.executions.read().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn poisoned() -> EngineError {
    EngineError::Io("execution store lock poisoned".to_string())
}

impl ExecutionStore for MemoryExecutionStore {
    fn record(&self, execution: &Execution) -> Result<()> {
        self.executions
            .write()
            .map_err(|_| poisoned())?
            .insert(execution.id.clone(), execution.clone());
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Execution> {
        self.executions
            .read()
            .map_err(|_| poisoned())?
            .get(id)
            .cloned()
            .ok_or_else(|| EngineError::not_found("Execution", id))
    }

    fn list(&self, filter: &ExecutionFilter) -> Vec<Execution> {
        let Ok(executions) = self.executions.read() else {
            return Vec::new();
        };
        let mut matching: Vec<Execution> = executions
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        matching.truncate(filter.limit.unwrap_or(DEFAULT_LIST_LIMIT));
        matching
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::model::{Definition, Step};
    use chrono::Duration;
    use serde_json::json;

    fn execution(definition_id: &str, age_secs: i64) -> Execution {
        let mut def = Definition::from_steps("d", vec![Step::new("a", "notify")]);
        def.id = definition_id.to_string();
        let mut exec = Execution::new(&def, json!({}), "u1");
        exec.created_at = exec.created_at - Duration::seconds(age_secs);
        exec
    }

    #[test]
    fn test_record_is_upsert() {
        let store = MemoryExecutionStore::new();
        let mut exec = execution("wf_a", 0);
        store.record(&exec).unwrap();

        exec.start();
        store.record(&exec).unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&exec.id).unwrap().status, RunStatus::Running);
    }

    #[test]
    fn test_get_missing() {
        let store = MemoryExecutionStore::new();
        assert!(matches!(
            store.get("exec_nope"),
            Err(EngineError::NotFound { .. })
        ));
    }

    #[test]
    fn test_list_newest_first_and_filtered() {
        let store = MemoryExecutionStore::new();
        let old = execution("wf_a", 30);
        let new = execution("wf_a", 1);
        let mut other = execution("wf_b", 5);
        other.start();
        for e in [&old, &new, &other] {
            store.record(e).unwrap();
        }

        let all = store.list(&ExecutionFilter::default());
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].id, new.id);
        assert_eq!(all[2].id, old.id);

        let only_a = store.list(&ExecutionFilter::for_definition("wf_a"));
        assert_eq!(only_a.len(), 2);

        let running = store.list(&ExecutionFilter::default().with_status(RunStatus::Running));
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].id, other.id);
    }

    #[test]
    fn test_list_default_limit() {
        let store = MemoryExecutionStore::new();
        for i in 0..25 {
            store.record(&execution("wf_a", i)).unwrap();
        }
        assert_eq!(store.list(&ExecutionFilter::default()).len(), DEFAULT_LIST_LIMIT);
        assert_eq!(store.list(&ExecutionFilter::default().with_limit(3)).len(), 3);
    }
}
