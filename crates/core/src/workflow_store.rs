//! Saved workflow files.
//!
//! Workflows are stored as pretty-printed API-format JSON documents in a
//! single directory. `load(save(g)) == g` holds for every graph.

use std::path::{Path, PathBuf};

use crate::error::CoreError;
use crate::graph::Graph;

/// File extension of saved workflows.
pub const WORKFLOW_EXTENSION: &str = "json";

/// Directory of saved workflow documents.
#[derive(Debug, Clone)]
pub struct WorkflowStore {
    dir: PathBuf,
}

impl WorkflowStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Sorted file names of all `*.json` files. A missing directory
    /// lists as empty.
    pub fn list(&self) -> Result<Vec<String>, CoreError> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.is_file()
                && path.extension().and_then(|e| e.to_str()) == Some(WORKFLOW_EXTENSION)
            {
                if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();
        Ok(names)
    }

    /// Load a workflow by file name (with or without `.json`).
    pub fn load(&self, name: &str) -> Result<Graph, CoreError> {
        load_path(&self.path_for(name)?)
    }

    /// Save `graph` under `name`, appending `.json` when missing.
    /// Returns the written path.
    pub fn save(&self, name: &str, graph: &Graph) -> Result<PathBuf, CoreError> {
        let path = self.path_for(name)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = serde_json::to_string_pretty(graph)?;
        std::fs::write(&path, text)?;
        Ok(path)
    }

    fn path_for(&self, name: &str) -> Result<PathBuf, CoreError> {
        let name = name.trim();
        if name.is_empty() || name.contains(|c| c == '/' || c == '\\') || name.starts_with('.') {
            return Err(CoreError::Validation(format!(
                "Invalid workflow name '{name}'"
            )));
        }
        let file = if name.ends_with(".json") {
            name.to_string()
        } else {
            format!("{name}.{WORKFLOW_EXTENSION}")
        };
        Ok(self.dir.join(file))
    }
}

/// Load a workflow document from an explicit path.
pub fn load_path(path: &Path) -> Result<Graph, CoreError> {
    let text = match std::fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(CoreError::NotFound {
                entity: "workflow",
                id: path.display().to_string(),
            })
        }
        Err(e) => return Err(e.into()),
    };
    let value: serde_json::Value = serde_json::from_str(&text)?;
    Graph::from_json(value)
}
