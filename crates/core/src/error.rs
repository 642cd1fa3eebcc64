#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Duplicate node id: {0}")]
    DuplicateNodeId(String),

    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid workflow JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl CoreError {
    /// Shorthand for a missing node in a graph.
    pub fn node_not_found(node_id: &str) -> Self {
        Self::NotFound {
            entity: "node",
            id: node_id.to_string(),
        }
    }
}
