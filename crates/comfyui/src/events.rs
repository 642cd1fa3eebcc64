//! Progress events emitted while jobs move through the engine.
//!
//! Events are broadcast over a [`tokio::sync::broadcast`] channel owned
//! by [`crate::manager::ComfyUIManager`]. Sending never blocks a run; a
//! run with no subscribers simply drops them.

use serde::Serialize;
use tokio::sync::broadcast;

use crate::job::{JobStatus, QueuePosition};

/// Broadcast channel capacity for execution events.
pub const EVENT_CHANNEL_CAPACITY: usize = 256;

/// A state change observed for a job or the schema cache.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ExecutionEvent {
    /// The engine accepted a workflow.
    JobSubmitted { prompt_id: String, number: i64 },

    /// A poll iteration saw the job waiting or executing.
    JobProgress {
        prompt_id: String,
        status: JobStatus,
        /// `None` once the job has left the queue.
        position: Option<QueuePosition>,
    },

    JobCompleted { prompt_id: String, elapsed_ms: u64 },

    JobFailed {
        prompt_id: String,
        /// Engine error text, when it recorded one.
        diagnostic: Option<String>,
    },

    JobInterrupted { prompt_id: String },

    /// The poll budget ran out; the job may still finish.
    JobTimedOut { prompt_id: String, elapsed_ms: u64 },

    SchemaRefreshed { version: u64, node_count: usize },
}

/// Sending half shared by the cache and the orchestrator.
pub type EventSender = broadcast::Sender<ExecutionEvent>;

/// A sender with no subscribers, for runs nobody observes.
pub fn detached_sender() -> EventSender {
    broadcast::channel(EVENT_CHANNEL_CAPACITY).0
}

/// Send without caring whether anyone listens.
pub(crate) fn emit(tx: &EventSender, event: ExecutionEvent) {
    let _ = tx.send(event);
}
