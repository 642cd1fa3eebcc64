use std::time::Duration;

use comfyflow_core::error::CoreError;
use comfyflow_core::validation::Finding;
use serde_json::{json, Value};

use crate::api::ComfyUIApiError;
use crate::config::ConfigError;

/// Failure classification for every engine-facing operation.
#[derive(Debug, thiserror::Error)]
pub enum ComfyError {
    /// The graph failed validation and was not submitted.
    #[error("Workflow has {} validation finding(s)", findings.len())]
    Validation { findings: Vec<Finding> },

    /// A graph operation or workflow file failed.
    #[error(transparent)]
    Graph(#[from] CoreError),

    /// The engine answered but refused the request.
    #[error("ComfyUI rejected the request ({status})")]
    RemoteRejected { status: u16, payload: Value },

    /// The engine could not be reached, or answered with a 5xx.
    ///
    /// `status` and `payload` are set when the engine did answer.
    #[error("Cannot connect to ComfyUI: {message}")]
    RemoteUnreachable {
        message: String,
        status: Option<u16>,
        payload: Option<Value>,
    },

    /// The poll budget ran out. The job keeps running on the engine.
    #[error("Prompt {prompt_id} did not finish within {}s", elapsed.as_secs_f64())]
    TimedOut { prompt_id: String, elapsed: Duration },

    /// The engine ran the prompt and recorded an error.
    #[error("Prompt {prompt_id} failed: {}", diagnostic.as_deref().unwrap_or("no diagnostic"))]
    ExecutionFailed {
        prompt_id: String,
        diagnostic: Option<String>,
    },

    /// The prompt was interrupted or removed from the queue.
    #[error("Prompt {prompt_id} was interrupted")]
    Interrupted { prompt_id: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("Output node {node_id} produced an unsupported artifact kind '{kind}'")]
    UnsupportedArtifact { node_id: String, kind: String },

    /// An operation was attempted in a run state that does not allow it.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not configured: {0}")]
    Config(#[from] ConfigError),

    /// The engine returned a body that could not be interpreted.
    #[error("Cannot decode ComfyUI response: {0}")]
    Decode(String),
}

pub type ComfyResult<T> = Result<T, ComfyError>;

impl ComfyError {
    /// Stable machine-readable error code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "VALIDATION_ERROR",
            Self::Graph(core) => match core {
                CoreError::NotFound { .. } => "NOT_FOUND",
                CoreError::Io(_) => "IO_ERROR",
                _ => "VALIDATION_ERROR",
            },
            Self::RemoteRejected { .. } => "REMOTE_REJECTED",
            Self::RemoteUnreachable { .. } => "COMFY_UNAVAILABLE",
            Self::TimedOut { .. } => "TIMED_OUT",
            Self::ExecutionFailed { .. } => "EXECUTION_FAILED",
            Self::Interrupted { .. } => "INTERRUPTED",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::UnsupportedArtifact { .. } => "UNSUPPORTED_ARTIFACT",
            Self::InvalidState(_) => "INVALID_STATE",
            Self::Config(_) => "NOT_CONFIGURED",
            Self::Decode(_) => "DECODE_ERROR",
        }
    }

    /// A next step for the caller, when one is obvious.
    pub fn suggestion(&self) -> Option<String> {
        match self {
            Self::RemoteUnreachable { .. } => {
                Some("Ensure ComfyUI is running at the configured URL".into())
            }
            Self::TimedOut { prompt_id, .. } => Some(format!(
                "The job may still finish; poll {prompt_id} again or raise POLL_TIMEOUT"
            )),
            Self::Validation { .. } => {
                Some("Fix the listed findings or refresh the node schema".into())
            }
            Self::NotFound {
                entity: "output node",
                ..
            } => Some("Check OUTPUT_NODE_ID against the workflow's output nodes".into()),
            Self::Graph(CoreError::NotFound {
                entity: "workflow",
                ..
            }) => Some("Use `workflows` to see available workflows".into()),
            Self::Config(err) => Some(format!("Set the {} environment variable", err.var())),
            _ => None,
        }
    }

    fn details(&self) -> Option<Value> {
        match self {
            Self::Validation { findings } => serde_json::to_value(findings).ok(),
            Self::RemoteRejected { payload, .. } => Some(payload.clone()),
            Self::RemoteUnreachable {
                status: Some(status),
                payload,
                ..
            } => Some(json!({
                "status": status,
                "payload": payload,
            })),
            Self::TimedOut { prompt_id, elapsed } => Some(json!({
                "prompt_id": prompt_id,
                "elapsed_secs": elapsed.as_secs_f64(),
            })),
            Self::ExecutionFailed {
                prompt_id,
                diagnostic,
            } => Some(json!({
                "prompt_id": prompt_id,
                "diagnostic": diagnostic,
            })),
            _ => None,
        }
    }

    /// Render as `{error, code, details, suggestion}`.
    pub fn to_json(&self) -> Value {
        json!({
            "error": self.to_string(),
            "code": self.code(),
            "details": self.details(),
            "suggestion": self.suggestion(),
        })
    }

    /// Unreachable without an engine answer (connection refused, timeout).
    pub fn unreachable(message: impl Into<String>) -> Self {
        Self::RemoteUnreachable {
            message: message.into(),
            status: None,
            payload: None,
        }
    }

    pub(crate) fn output_node_not_found(node_id: &str) -> Self {
        Self::NotFound {
            entity: "output node",
            id: node_id.to_string(),
        }
    }

    /// Whether a poll should retry after this error.
    pub(crate) fn is_transient(&self) -> bool {
        matches!(self, Self::RemoteUnreachable { .. })
    }
}

/// Engine bodies are kept as JSON when they parse, else as a string.
fn parse_payload(body: String) -> Value {
    serde_json::from_str(&body).unwrap_or(Value::String(body))
}

impl From<ComfyUIApiError> for ComfyError {
    fn from(err: ComfyUIApiError) -> Self {
        let message = err.to_string();
        match err {
            ComfyUIApiError::ApiError { status, body } if status >= 500 => {
                Self::RemoteUnreachable {
                    message,
                    status: Some(status),
                    payload: Some(parse_payload(body)),
                }
            }
            ComfyUIApiError::ApiError { status, body } => Self::RemoteRejected {
                status,
                payload: parse_payload(body),
            },
            ComfyUIApiError::Request(_) => Self::unreachable(message),
        }
    }
}
