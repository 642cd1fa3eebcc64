//! Submit → poll state machine.
//!
//! An [`ExecutionRun`] moves through
//! `Built → Submitted → Polling → {Completed | Failed | TimedOut | Interrupted}`.
//! [`ExecutionOrchestrator`] drives runs against an [`EngineApi`] and
//! also owns the queue-management operations (interrupt, clear queue,
//! delete history), which need the same queue view.

use std::fmt;
use std::sync::Arc;

use chrono::Utc;
use comfyflow_core::graph::Graph;
use comfyflow_core::types::{NodeId, PromptId};
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::json;
use tokio::time::Instant;

use crate::api::EngineApi;
use crate::compat;
use crate::config::PollConfig;
use crate::error::{ComfyError, ComfyResult};
use crate::events::{emit, EventSender, ExecutionEvent};
use crate::job::{Job, JobStatus, QueuePosition, SubmittedJob};

// ---------------------------------------------------------------------------
// Run state
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Built,
    Submitted,
    Polling,
    Completed,
    Failed,
    TimedOut,
    Interrupted,
}

impl ExecutionState {
    fn can_become(self, next: Self) -> bool {
        use ExecutionState::*;
        matches!(
            (self, next),
            (Built, Submitted | Failed)
                | (Submitted, Polling)
                // A timed-out or unreachable poll may be resumed.
                | (Polling | TimedOut, Polling)
                | (Polling, Completed | Failed | TimedOut | Interrupted)
        )
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Built => "built",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::TimedOut => "timed_out",
            Self::Interrupted => "interrupted",
        };
        f.write_str(name)
    }
}

/// One orchestration of one workflow.
///
/// The graph is handed over at submission; afterwards the run only
/// remembers the prompt id.
#[derive(Debug)]
pub struct ExecutionRun {
    state: ExecutionState,
    graph: Option<Graph>,
    output_node_id: NodeId,
    prompt_id: Option<PromptId>,
    job: Option<Job>,
}

impl ExecutionRun {
    pub fn new(graph: Graph, output_node_id: impl Into<NodeId>) -> Self {
        Self {
            state: ExecutionState::Built,
            graph: Some(graph),
            output_node_id: output_node_id.into(),
            prompt_id: None,
            job: None,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn output_node_id(&self) -> &str {
        &self.output_node_id
    }

    pub fn prompt_id(&self) -> Option<&str> {
        self.prompt_id.as_deref()
    }

    /// The last terminal job observed by a poll.
    pub fn job(&self) -> Option<&Job> {
        self.job.as_ref()
    }

    fn transition(&mut self, next: ExecutionState) -> ComfyResult<()> {
        if !self.state.can_become(next) {
            return Err(ComfyError::InvalidState(format!(
                "cannot move a {} run to {next}",
                self.state
            )));
        }
        self.state = next;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Queue management types
// ---------------------------------------------------------------------------

/// Which entries a queue or history deletion targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    All,
    Ids(Vec<PromptId>),
}

impl Selection {
    /// `All` for an empty id list.
    pub fn from_ids(ids: Vec<PromptId>) -> Self {
        if ids.is_empty() {
            Self::All
        } else {
            Self::Ids(ids)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeletionStatus {
    Removed,
    NotFound,
    /// Executing entries cannot be dequeued; interrupt them instead.
    Running,
}

/// Per-id outcome of a queue or history deletion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DeletionReport {
    pub results: IndexMap<PromptId, DeletionStatus>,
}

impl DeletionReport {
    pub fn status(&self, prompt_id: &str) -> Option<DeletionStatus> {
        self.results.get(prompt_id).copied()
    }

    pub fn count(&self, status: DeletionStatus) -> usize {
        self.results.values().filter(|s| **s == status).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InterruptOutcome {
    Interrupted { prompt_id: PromptId },
    NothingRunning,
}

/// What one poll iteration saw.
enum Observation {
    Finished(Job),
    Queued(QueuePosition),
    Absent,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ExecutionOrchestrator<A> {
    api: Arc<A>,
    events: EventSender,
    /// Identifies this process to the engine on every submission.
    client_id: String,
}

impl<A: EngineApi> ExecutionOrchestrator<A> {
    pub fn new(api: Arc<A>, events: EventSender) -> Self {
        Self {
            api,
            events,
            client_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    /// Submit a built run. Rejection leaves the run `Failed`.
    pub async fn submit(&self, run: &mut ExecutionRun) -> ComfyResult<SubmittedJob> {
        let graph = match (run.state, run.graph.take()) {
            (ExecutionState::Built, Some(graph)) => graph,
            (state, _) => {
                return Err(ComfyError::InvalidState(format!(
                    "cannot submit a {state} run"
                )))
            }
        };
        match self.submit_graph(&graph).await {
            Ok(submitted) => {
                run.transition(ExecutionState::Submitted)?;
                run.prompt_id = Some(submitted.prompt_id.clone());
                Ok(submitted)
            }
            Err(e) => {
                run.transition(ExecutionState::Failed)?;
                Err(e)
            }
        }
    }

    /// Fire-and-forget submission of a graph. Never retried.
    pub async fn submit_graph(&self, graph: &Graph) -> ComfyResult<SubmittedJob> {
        let response = self
            .api
            .submit_workflow(&graph.to_json(), &self.client_id)
            .await
            .inspect_err(|e| tracing::warn!(error = %e, "Workflow submission failed"))?;

        if response.prompt_id.is_empty() {
            return Err(ComfyError::RemoteRejected {
                status: 200,
                payload: json!({
                    "error": "no prompt id returned",
                    "node_errors": response.node_errors,
                }),
            });
        }

        tracing::info!(
            prompt_id = %response.prompt_id,
            number = response.number,
            nodes = graph.len(),
            "Workflow submitted to ComfyUI",
        );
        emit(
            &self.events,
            ExecutionEvent::JobSubmitted {
                prompt_id: response.prompt_id.clone(),
                number: response.number,
            },
        );

        Ok(SubmittedJob {
            prompt_id: response.prompt_id,
            number: response.number,
            client_id: self.client_id.clone(),
            submitted_at: Utc::now(),
            node_errors: response.node_errors,
        })
    }

    /// Poll a submitted run to a terminal state.
    ///
    /// A run that failed submission is refused without touching the
    /// network.
    pub async fn poll(&self, run: &mut ExecutionRun, config: &PollConfig) -> ComfyResult<Job> {
        let prompt_id = match (&run.prompt_id, run.state) {
            (Some(id), ExecutionState::Submitted | ExecutionState::Polling | ExecutionState::TimedOut) => {
                id.clone()
            }
            (_, state) => {
                return Err(ComfyError::InvalidState(format!("cannot poll a {state} run")))
            }
        };
        run.transition(ExecutionState::Polling)?;

        match self.poll_prompt(&prompt_id, config).await {
            Ok(job) => {
                run.transition(match job.status {
                    JobStatus::Failed => ExecutionState::Failed,
                    JobStatus::Interrupted => ExecutionState::Interrupted,
                    _ => ExecutionState::Completed,
                })?;
                run.job = Some(job.clone());
                Ok(job)
            }
            Err(e @ ComfyError::TimedOut { .. }) => {
                run.transition(ExecutionState::TimedOut)?;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll one prompt until it reaches a terminal status or the budget
    /// runs out. Returns the terminal [`Job`] whatever its status.
    pub async fn poll_prompt(&self, prompt_id: &str, config: &PollConfig) -> ComfyResult<Job> {
        let started = Instant::now();
        let mut seen_in_queue = false;
        let mut last_position = None;
        let mut failures = 0u32;

        loop {
            match self.observe(prompt_id).await {
                Ok(Observation::Finished(job)) => {
                    self.report_finished(&job, started.elapsed().as_millis() as u64);
                    return Ok(job);
                }
                Ok(Observation::Queued(position)) => {
                    failures = 0;
                    seen_in_queue = true;
                    if last_position != Some(position) {
                        last_position = Some(position);
                        let status = match position {
                            QueuePosition::Running => JobStatus::Running,
                            QueuePosition::Pending(_) => JobStatus::Queued,
                        };
                        tracing::debug!(prompt_id, ?position, "Prompt in queue");
                        emit(
                            &self.events,
                            ExecutionEvent::JobProgress {
                                prompt_id: prompt_id.to_string(),
                                status,
                                position: Some(position),
                            },
                        );
                    }
                }
                Ok(Observation::Absent) if seen_in_queue => {
                    // Left the queue without reaching history: cleared.
                    let job = Job {
                        diagnostic: Some("Removed from the queue before finishing".into()),
                        ..Job::pending(prompt_id, JobStatus::Interrupted)
                    };
                    self.report_finished(&job, started.elapsed().as_millis() as u64);
                    return Ok(job);
                }
                Ok(Observation::Absent) => {
                    failures = 0;
                    tracing::debug!(prompt_id, "Prompt not visible yet");
                }
                Err(e) if e.is_transient() => {
                    failures += 1;
                    tracing::warn!(
                        prompt_id,
                        attempt = failures,
                        max = config.max_transport_retries,
                        error = %e,
                        "Poll request failed",
                    );
                    if failures >= config.max_transport_retries {
                        return Err(e);
                    }
                }
                Err(e) => return Err(e),
            }

            let elapsed = started.elapsed();
            if elapsed >= config.timeout {
                tracing::info!(
                    prompt_id,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Poll timed out, job left running",
                );
                emit(
                    &self.events,
                    ExecutionEvent::JobTimedOut {
                        prompt_id: prompt_id.to_string(),
                        elapsed_ms: elapsed.as_millis() as u64,
                    },
                );
                return Err(ComfyError::TimedOut {
                    prompt_id: prompt_id.to_string(),
                    elapsed,
                });
            }
            tokio::time::sleep(config.interval.min(config.timeout - elapsed)).await;
        }
    }

    async fn observe(&self, prompt_id: &str) -> ComfyResult<Observation> {
        let queue = compat::normalize_queue(&self.api.get_queue().await?);
        let history = self.api.get_history(prompt_id).await?;
        if let Some(job) = compat::history_job(&history, prompt_id) {
            if job.status.is_terminal() {
                return Ok(Observation::Finished(job));
            }
        }
        Ok(match queue.position(prompt_id) {
            Some(position) => Observation::Queued(position),
            None => Observation::Absent,
        })
    }

    fn report_finished(&self, job: &Job, elapsed_ms: u64) {
        let prompt_id = job.prompt_id.clone();
        tracing::info!(prompt_id = %prompt_id, status = ?job.status, elapsed_ms, "Prompt finished");
        let event = match job.status {
            JobStatus::Failed => ExecutionEvent::JobFailed {
                prompt_id,
                diagnostic: job.diagnostic.clone(),
            },
            JobStatus::Interrupted => ExecutionEvent::JobInterrupted { prompt_id },
            _ => ExecutionEvent::JobCompleted {
                prompt_id,
                elapsed_ms,
            },
        };
        emit(&self.events, event);
    }

    /// Interrupt the running prompt (or the named one, if it is the one
    /// running). A no-op when nothing matches.
    pub async fn interrupt(&self, prompt_id: Option<&str>) -> ComfyResult<InterruptOutcome> {
        let queue = compat::normalize_queue(&self.api.get_queue().await?);
        let target = match prompt_id {
            Some(id) if queue.is_running(id) => id.to_string(),
            Some(_) => return Ok(InterruptOutcome::NothingRunning),
            None => match queue.running.first() {
                Some(entry) => entry.prompt_id.clone(),
                None => return Ok(InterruptOutcome::NothingRunning),
            },
        };
        self.api.interrupt(prompt_id).await?;
        tracing::info!(prompt_id = %target, "Interrupt sent");
        Ok(InterruptOutcome::Interrupted { prompt_id: target })
    }

    /// Remove pending entries. Reported per id, never all-or-nothing.
    pub async fn clear_queue(&self, selection: Selection) -> ComfyResult<DeletionReport> {
        let queue = compat::normalize_queue(&self.api.get_queue().await?);
        let mut report = DeletionReport::default();

        match selection {
            Selection::All => {
                self.api.clear_queue().await?;
                for entry in &queue.pending {
                    report
                        .results
                        .insert(entry.prompt_id.clone(), DeletionStatus::Removed);
                }
                for entry in &queue.running {
                    report
                        .results
                        .insert(entry.prompt_id.clone(), DeletionStatus::Running);
                }
            }
            Selection::Ids(ids) => {
                let mut to_delete = Vec::new();
                for id in ids {
                    let status = match queue.position(&id) {
                        Some(QueuePosition::Running) => DeletionStatus::Running,
                        Some(QueuePosition::Pending(_)) => {
                            to_delete.push(id.clone());
                            DeletionStatus::Removed
                        }
                        None => DeletionStatus::NotFound,
                    };
                    report.results.insert(id, status);
                }
                if !to_delete.is_empty() {
                    self.api.delete_queued(&to_delete).await?;
                }
            }
        }

        tracing::info!(
            removed = report.count(DeletionStatus::Removed),
            not_found = report.count(DeletionStatus::NotFound),
            running = report.count(DeletionStatus::Running),
            "Queue cleared",
        );
        Ok(report)
    }

    /// Delete history entries. Reported per id.
    pub async fn delete_history(&self, selection: Selection) -> ComfyResult<DeletionReport> {
        let history = self.api.list_history(None).await?;
        let known: Vec<&String> = history
            .as_object()
            .map(|obj| obj.keys().collect())
            .unwrap_or_default();
        let mut report = DeletionReport::default();

        match selection {
            Selection::All => {
                self.api.clear_history().await?;
                for id in known {
                    report.results.insert(id.clone(), DeletionStatus::Removed);
                }
            }
            Selection::Ids(ids) => {
                let mut to_delete = Vec::new();
                for id in ids {
                    let status = if known.contains(&&id) {
                        to_delete.push(id.clone());
                        DeletionStatus::Removed
                    } else {
                        DeletionStatus::NotFound
                    };
                    report.results.insert(id, status);
                }
                if !to_delete.is_empty() {
                    self.api.delete_history(&to_delete).await?;
                }
            }
        }

        tracing::info!(
            removed = report.count(DeletionStatus::Removed),
            not_found = report.count(DeletionStatus::NotFound),
            "History entries deleted",
        );
        Ok(report)
    }
}
