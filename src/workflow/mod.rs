//! Workflow Definition Module
//!
//! Provides data structures and utilities for defining, storing, loading and
//! validating workflow definitions.
//!
//! # Structure
//!
//! - [`model`]: Core data structures (Step, Definition, StepKind)
//! - [`store`]: Definition storage contract and in-memory store
//! - [`parser`]: YAML/JSON loading
//! - [`validator`]: Validation rules and dependency checking
//! - [`templates`]: Built-in templates

pub mod model;
pub mod parser;
pub mod store;
pub mod templates;
pub mod validator;

pub use model::{Condition, Definition, Step, StepKind, Trigger, END_TARGET};
pub use parser::{load_definition, parse_definition, save_definition};
pub use store::{DefinitionFilter, DefinitionStore, DefinitionUpdate, MemoryDefinitionStore};
pub use templates::{builtin_templates, find_template, Template, TemplateOverrides};
pub use validator::{validate_definition, validate_runnable, ValidationError};
