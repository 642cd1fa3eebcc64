//! Engine-independent workflow domain: graph model, node schema,
//! validation, saved workflow files and built-in templates.

pub mod error;
pub mod graph;
pub mod schema;
pub mod templates;
pub mod types;
pub mod validation;
pub mod workflow_store;
