//! Service Facade
//!
//! Upward interface for a hosting layer (HTTP handlers, bots, the CLI).
//! Every call returns the uniform [`ApiResponse`] envelope; mapping errors
//! to transport status codes is left to the host.

use std::sync::Arc;

use serde::Serialize;
use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::execution::engine::Engine;
use crate::execution::executor::StepExecutor;
use crate::execution::registry::StepTypeInfo;
use crate::execution::store::ExecutionFilter;
use crate::execution::context::Execution;
use crate::workflow::model::Definition;
use crate::workflow::store::{DefinitionFilter, DefinitionUpdate};
use crate::workflow::templates::{builtin_templates, find_template, Template, TemplateOverrides};

/// Uniform result envelope.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn err(error: impl ToString) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.to_string()),
        }
    }
}

impl<T> From<Result<T>> for ApiResponse<T> {
    fn from(result: Result<T>) -> Self {
        match result {
            Ok(data) => ApiResponse::ok(data),
            Err(e) => ApiResponse::err(e),
        }
    }
}

/// Reply to a started run.
#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct RunStarted {
    pub run_id: String,
    pub status: String,
}

/// Workflow service over a run engine.
#[derive(Clone)]
pub struct WorkflowService {
    engine: Engine,
}

impl WorkflowService {
    pub fn new(engine: Engine) -> Self {
        Self { engine }
    }

    /// Service over fresh in-memory stores.
    pub fn in_memory(executor: Arc<dyn StepExecutor>) -> Self {
        Self::new(Engine::in_memory(executor))
    }

    pub fn engine(&self) -> &Engine {
        &self.engine
    }

    pub fn create_definition(&self, definition: Definition) -> ApiResponse<String> {
        self.engine.definitions().create(definition).into()
    }

    pub fn get_definition(&self, id: &str) -> ApiResponse<Definition> {
        self.engine.definitions().get(id).into()
    }

    pub fn update_definition(&self, id: &str, update: DefinitionUpdate) -> ApiResponse<Definition> {
        self.engine.definitions().update(id, update).into()
    }

    pub fn delete_definition(&self, id: &str) -> ApiResponse<()> {
        self.engine.definitions().delete(id).into()
    }

    pub fn list_definitions(&self, filter: &DefinitionFilter) -> ApiResponse<Vec<Definition>> {
        ApiResponse::ok(self.engine.definitions().list(filter))
    }

    /// Runs the definition and reports the run's final status.
    pub fn start_run(&self, definition_id: &str, input: Value) -> ApiResponse<RunStarted> {
        self.engine
            .start_run(definition_id, input)
            .and_then(|run_id| {
                let run = self.engine.get_run(&run_id)?;
                Ok(RunStarted {
                    run_id,
                    status: run.status.to_string(),
                })
            })
            .into()
    }

    pub fn get_run(&self, run_id: &str) -> ApiResponse<Execution> {
        self.engine.get_run(run_id).into()
    }

    pub fn list_runs(&self, filter: &ExecutionFilter) -> ApiResponse<Vec<Execution>> {
        ApiResponse::ok(self.engine.list_runs(filter))
    }

    pub fn cancel_run(&self, run_id: &str) -> ApiResponse<()> {
        self.engine.cancel_run(run_id).into()
    }

    pub fn get_step_type_catalog(&self) -> ApiResponse<&'static [StepTypeInfo]> {
        ApiResponse::ok(self.engine.registry().catalog())
    }

    pub fn get_templates(&self) -> ApiResponse<&'static [Template]> {
        ApiResponse::ok(builtin_templates())
    }

    /// Creates a definition from a built-in template and returns its id.
    pub fn create_from_template(
        &self,
        template_id: &str,
        overrides: TemplateOverrides,
    ) -> ApiResponse<String> {
        find_template(template_id)
            .ok_or_else(|| EngineError::not_found("Template", template_id))
            .and_then(|template| {
                self.engine
                    .definitions()
                    .create(template.instantiate(overrides))
            })
            .into()
    }
}
