//! Typed views of submitted jobs, their artifacts and the queue.
//!
//! Values here are produced by [`crate::compat`] from raw engine JSON;
//! nothing in this module talks to the network.

use chrono::{DateTime, Utc};
use comfyflow_core::types::{NodeId, PromptId};
use indexmap::IndexMap;
use serde::Serialize;

/// Lifecycle status of a prompt on the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Interrupted,
}

impl JobStatus {
    /// Whether the engine will not change this status again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Interrupted)
    }
}

/// What kind of artifact an output entry is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ArtifactKind {
    Image,
    /// Any other output key (`gifs`, `audio`, `text`, ...).
    Other(String),
}

impl ArtifactKind {
    /// Output-map key used by the engine for image artifacts.
    pub const IMAGES_KEY: &'static str = "images";

    pub fn from_output_key(key: &str) -> Self {
        if key == Self::IMAGES_KEY {
            Self::Image
        } else {
            Self::Other(key.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Image => "image",
            Self::Other(tag) => tag,
        }
    }
}

/// One produced output, addressed the way `/view` expects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArtifactDescriptor {
    pub kind: ArtifactKind,
    pub filename: String,
    pub subfolder: String,
    /// Storage area on the engine: `output`, `temp` or `input`.
    pub folder_type: String,
}

/// One submitted execution as last seen on the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Job {
    pub prompt_id: PromptId,
    pub status: JobStatus,
    /// Artifacts per output node, in engine order.
    pub outputs: IndexMap<NodeId, Vec<ArtifactDescriptor>>,
    /// Engine error text for failed or interrupted jobs.
    pub diagnostic: Option<String>,
}

impl Job {
    /// A job known only from the queue (no outputs yet).
    pub fn pending(prompt_id: impl Into<PromptId>, status: JobStatus) -> Self {
        Self {
            prompt_id: prompt_id.into(),
            status,
            outputs: IndexMap::new(),
            diagnostic: None,
        }
    }
}

/// Receipt for a workflow accepted by the engine.
#[derive(Debug, Clone, Serialize)]
pub struct SubmittedJob {
    pub prompt_id: PromptId,
    /// Queue number assigned by the engine.
    pub number: i64,
    pub client_id: String,
    pub submitted_at: DateTime<Utc>,
    /// Non-fatal per-node errors echoed by the engine.
    pub node_errors: serde_json::Value,
}

/// One entry of the running or pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueEntry {
    pub number: i64,
    pub prompt_id: PromptId,
}

/// Where a prompt sits in the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueuePosition {
    Running,
    /// Zero-based position among pending prompts.
    Pending(usize),
}

/// Snapshot of the engine queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSnapshot {
    pub running: Vec<QueueEntry>,
    /// Sorted by queue number (execution order).
    pub pending: Vec<QueueEntry>,
}

impl QueueSnapshot {
    pub fn running_count(&self) -> usize {
        self.running.len()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.running.is_empty() && self.pending.is_empty()
    }

    pub fn position(&self, prompt_id: &str) -> Option<QueuePosition> {
        if self.running.iter().any(|e| e.prompt_id == prompt_id) {
            return Some(QueuePosition::Running);
        }
        self.pending
            .iter()
            .position(|e| e.prompt_id == prompt_id)
            .map(QueuePosition::Pending)
    }

    pub fn is_running(&self, prompt_id: &str) -> bool {
        self.position(prompt_id) == Some(QueuePosition::Running)
    }

    pub fn is_pending(&self, prompt_id: &str) -> bool {
        matches!(self.position(prompt_id), Some(QueuePosition::Pending(_)))
    }
}
