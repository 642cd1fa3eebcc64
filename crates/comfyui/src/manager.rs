//! Caller-facing facade over one ComfyUI instance.
//!
//! [`ComfyUIManager`] composes the REST client, the schema cache, the
//! execution orchestrator and the result assembler into the operations
//! callers use: validate, submit, poll, run, fetch results, manage the
//! queue and history, and browse models, nodes and saved workflows.
//!
//! Progress events are broadcast via a [`tokio::sync::broadcast`]
//! channel. Call [`ComfyUIManager::subscribe`] to receive them.

use std::path::Path;
use std::sync::Arc;

use comfyflow_core::graph::{Graph, InputValue};
use comfyflow_core::schema::{NodeFilter, SchemaEntry, SchemaSnapshot};
use comfyflow_core::validation::ValidationReport;
use comfyflow_core::workflow_store::{self, WorkflowStore};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::api::{ComfyUIApi, EngineApi};
use crate::assembler::{AssembledOutput, ResultAssembler};
use crate::compat;
use crate::config::{ComfyConfig, ConfigError, PollConfig};
use crate::error::{ComfyError, ComfyResult};
use crate::events::{ExecutionEvent, EVENT_CHANNEL_CAPACITY};
use crate::job::{Job, JobStatus, QueueSnapshot, SubmittedJob};
use crate::models::SystemStats;
use crate::orchestrator::{
    DeletionReport, ExecutionOrchestrator, ExecutionRun, InterruptOutcome, Selection,
};
use crate::schema_cache::SchemaCache;

/// Input of the prompt node that receives simple-prompt text.
pub const PROMPT_INPUT: &str = "text";

/// Result of a connection check. Never an error.
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionStatus {
    pub connected: bool,
    pub url: String,
    pub version: Option<String>,
    pub error: Option<String>,
}

/// Operations against one ComfyUI instance.
///
/// Created once per process; share it behind an `Arc` for concurrent
/// runs.
pub struct ComfyUIManager<A = ComfyUIApi> {
    config: ComfyConfig,
    api: Arc<A>,
    schema: SchemaCache,
    orchestrator: ExecutionOrchestrator<A>,
    assembler: ResultAssembler,
    event_tx: broadcast::Sender<ExecutionEvent>,
}

impl ComfyUIManager<ComfyUIApi> {
    /// Manager talking HTTP to `config.base_url`.
    pub fn from_config(config: ComfyConfig) -> Self {
        let api = ComfyUIApi::new(config.base_url.clone());
        Self::with_api(config, api)
    }
}

impl<A: EngineApi> ComfyUIManager<A> {
    pub fn with_api(config: ComfyConfig, api: A) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let api = Arc::new(api);
        Self {
            schema: SchemaCache::new(event_tx.clone()),
            orchestrator: ExecutionOrchestrator::new(Arc::clone(&api), event_tx.clone()),
            assembler: ResultAssembler::new(config.output_mode, config.public_base_url()),
            api,
            config,
            event_tx,
        }
    }

    pub fn config(&self) -> &ComfyConfig {
        &self.config
    }

    pub fn api(&self) -> &A {
        &self.api
    }

    pub fn schema(&self) -> &SchemaCache {
        &self.schema
    }

    /// Subscribe to job and schema events.
    pub fn subscribe(&self) -> broadcast::Receiver<ExecutionEvent> {
        self.event_tx.subscribe()
    }

    // ---- graphs ----

    /// Validate against the node catalog, fetching it on first use.
    pub async fn validate(&self, graph: &Graph) -> ComfyResult<ValidationReport> {
        let snapshot = self.schema.ensure_loaded(self.api.as_ref()).await?;
        Ok(ValidationReport::new(graph, &snapshot))
    }

    /// Submit without waiting. Graphs with findings are not sent.
    pub async fn submit(&self, graph: &Graph) -> ComfyResult<SubmittedJob> {
        self.ensure_valid(graph).await?;
        self.orchestrator.submit_graph(graph).await
    }

    /// Submit, wait for completion and assemble the output node.
    ///
    /// `output_node_id` defaults to `OUTPUT_NODE_ID`.
    pub async fn run(
        &self,
        graph: Graph,
        output_node_id: Option<&str>,
    ) -> ComfyResult<AssembledOutput> {
        let node_id = match output_node_id {
            Some(id) => id.to_string(),
            None => self.required(&self.config.output_node_id, "OUTPUT_NODE_ID")?,
        };
        self.ensure_valid(&graph).await?;

        let mut run = ExecutionRun::new(graph, node_id);
        self.orchestrator.submit(&mut run).await?;
        let job = self.orchestrator.poll(&mut run, &self.config.poll).await?;
        self.assemble_finished(&job, run.output_node_id()).await
    }

    /// Run the configured workflow with `prompt` as the prompt node's text.
    pub async fn generate_image(&self, prompt: &str) -> ComfyResult<AssembledOutput> {
        let file = self
            .config
            .workflow_file
            .as_deref()
            .ok_or(ConfigError::Missing {
                var: "COMFY_WORKFLOW_JSON_FILE",
            })?;
        let prompt_node = self.required(&self.config.prompt_node_id, "PROMPT_NODE_ID")?;
        let output_node = self.required(&self.config.output_node_id, "OUTPUT_NODE_ID")?;

        let graph = workflow_store::load_path(file)?.update_node_input(
            &prompt_node,
            PROMPT_INPUT,
            InputValue::literal(prompt),
        )?;
        tracing::info!(
            workflow = %file.display(),
            prompt_node = %prompt_node,
            "Generating image from prompt",
        );
        self.run(graph, Some(&output_node)).await
    }

    // ---- jobs ----

    /// Poll with the configured budget.
    pub async fn poll(&self, prompt_id: &str) -> ComfyResult<Job> {
        self.poll_with(prompt_id, &self.config.poll).await
    }

    pub async fn poll_with(&self, prompt_id: &str, config: &PollConfig) -> ComfyResult<Job> {
        self.orchestrator.poll_prompt(prompt_id, config).await
    }

    /// Current view of one prompt: history first, then the queue.
    pub async fn job(&self, prompt_id: &str) -> ComfyResult<Job> {
        let history = self.api.get_history(prompt_id).await?;
        if let Some(job) = compat::history_job(&history, prompt_id) {
            return Ok(job);
        }
        let queue = self.queue_status().await?;
        if queue.is_running(prompt_id) {
            return Ok(Job::pending(prompt_id, JobStatus::Running));
        }
        if queue.is_pending(prompt_id) {
            return Ok(Job::pending(prompt_id, JobStatus::Queued));
        }
        Err(ComfyError::NotFound {
            entity: "prompt",
            id: prompt_id.to_string(),
        })
    }

    /// Assemble the outputs of an already finished prompt.
    pub async fn get_result(
        &self,
        prompt_id: &str,
        output_node_id: Option<&str>,
    ) -> ComfyResult<AssembledOutput> {
        let node_id = match output_node_id {
            Some(id) => id.to_string(),
            None => self.required(&self.config.output_node_id, "OUTPUT_NODE_ID")?,
        };
        let history = self.api.get_history(prompt_id).await?;
        let job = compat::history_job(&history, prompt_id).ok_or_else(|| ComfyError::NotFound {
            entity: "prompt",
            id: prompt_id.to_string(),
        })?;
        self.assemble_finished(&job, &node_id).await
    }

    pub async fn interrupt(&self, prompt_id: Option<&str>) -> ComfyResult<InterruptOutcome> {
        self.orchestrator.interrupt(prompt_id).await
    }

    pub async fn clear_queue(&self, selection: Selection) -> ComfyResult<DeletionReport> {
        self.orchestrator.clear_queue(selection).await
    }

    pub async fn delete_history(&self, selection: Selection) -> ComfyResult<DeletionReport> {
        self.orchestrator.delete_history(selection).await
    }

    pub async fn history(&self, limit: Option<u32>) -> ComfyResult<Vec<Job>> {
        Ok(compat::history_jobs(&self.api.list_history(limit).await?))
    }

    pub async fn queue_status(&self) -> ComfyResult<QueueSnapshot> {
        Ok(compat::normalize_queue(&self.api.get_queue().await?))
    }

    // ---- server ----

    pub async fn system_stats(&self) -> ComfyResult<SystemStats> {
        compat::normalize_system_stats(self.api.get_system_stats().await?)
            .map_err(|e| ComfyError::Decode(format!("system_stats: {e}")))
    }

    pub async fn check_connection(&self) -> ConnectionStatus {
        let url = self.config.base_url.clone();
        match self.system_stats().await {
            Ok(stats) => ConnectionStatus {
                connected: true,
                url,
                version: Some(stats.version().to_string()),
                error: None,
            },
            Err(e) => {
                tracing::warn!(url = %url, error = %e, "ComfyUI connection check failed");
                ConnectionStatus {
                    connected: false,
                    url,
                    version: None,
                    error: Some(e.to_string()),
                }
            }
        }
    }

    /// Model folders, or the files of one folder.
    pub async fn list_models(&self, folder: Option<&str>) -> ComfyResult<Vec<String>> {
        let raw = self.api.list_models(folder).await?;
        serde_json::from_value(raw).map_err(|e| ComfyError::Decode(format!("models: {e}")))
    }

    pub async fn list_extensions(&self) -> ComfyResult<Vec<String>> {
        let raw = self.api.list_extensions().await?;
        serde_json::from_value(raw).map_err(|e| ComfyError::Decode(format!("extensions: {e}")))
    }

    // ---- node catalog ----

    pub async fn refresh_schema(&self) -> ComfyResult<Arc<SchemaSnapshot>> {
        self.schema.refresh(self.api.as_ref()).await
    }

    /// Search (when `query` is set) or list the node catalog.
    pub async fn nodes(
        &self,
        query: Option<&str>,
        filter: &NodeFilter,
    ) -> ComfyResult<Vec<SchemaEntry>> {
        self.schema.ensure_loaded(self.api.as_ref()).await?;
        Ok(match query {
            Some(q) => self.schema.search(q),
            None => self.schema.list(filter),
        })
    }

    // ---- saved workflows ----

    pub fn store(&self) -> ComfyResult<WorkflowStore> {
        match &self.config.workflows_dir {
            Some(dir) => Ok(WorkflowStore::new(dir)),
            None => Err(ConfigError::Missing {
                var: "COMFY_WORKFLOWS_DIR",
            }
            .into()),
        }
    }

    pub fn workflows(&self) -> ComfyResult<Vec<String>> {
        Ok(self.store()?.list()?)
    }

    /// Load a workflow by path, or by name from the workflow directory.
    pub fn load_workflow(&self, name_or_path: &str) -> ComfyResult<Graph> {
        let path = Path::new(name_or_path);
        if path.is_file() {
            return Ok(workflow_store::load_path(path)?);
        }
        Ok(self.store()?.load(name_or_path)?)
    }

    // ---- private helpers ----

    async fn ensure_valid(&self, graph: &Graph) -> ComfyResult<()> {
        let report = self.validate(graph).await?;
        if !report.valid {
            tracing::warn!(
                findings = report.findings.len(),
                schema_version = report.schema_version,
                "Workflow failed validation, not submitted",
            );
            return Err(ComfyError::Validation {
                findings: report.findings,
            });
        }
        Ok(())
    }

    async fn assemble_finished(&self, job: &Job, node_id: &str) -> ComfyResult<AssembledOutput> {
        match job.status {
            JobStatus::Completed => {
                self.assembler
                    .assemble(self.api.as_ref(), job, node_id)
                    .await
            }
            JobStatus::Interrupted => Err(ComfyError::Interrupted {
                prompt_id: job.prompt_id.clone(),
            }),
            _ => Err(ComfyError::ExecutionFailed {
                prompt_id: job.prompt_id.clone(),
                diagnostic: job.diagnostic.clone(),
            }),
        }
    }

    fn required(&self, value: &Option<String>, var: &'static str) -> ComfyResult<String> {
        value.clone().ok_or(ComfyError::Config(ConfigError::Missing { var }))
    }
}
