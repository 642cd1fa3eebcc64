//! Executes one parsed [`Command`] against a manager.
//!
//! Every command produces a JSON value; the binary prints it. Failures
//! come back as [`ComfyError`] so the caller can render `to_json()`.

use std::path::{Path, PathBuf};

use comfyflow_comfyui::assembler::AssembledOutput;
use comfyflow_comfyui::orchestrator::Selection;
use comfyflow_comfyui::{ComfyError, ComfyResult, ComfyUIManager, EngineApi, PollConfig};
use comfyflow_core::error::CoreError;
use comfyflow_core::schema::{NodeFilter, SchemaSnapshot};
use comfyflow_core::templates;
use comfyflow_core::validation::ValidationReport;
use serde::Serialize;
use serde_json::{json, Value};

use crate::cli::Command;

pub async fn execute<A: EngineApi>(
    manager: &ComfyUIManager<A>,
    command: Command,
) -> ComfyResult<Value> {
    match command {
        Command::Stats => to_json(&manager.system_stats().await?),
        Command::Check => to_json(&manager.check_connection().await),
        Command::Queue => to_json(&manager.queue_status().await?),
        Command::History {
            prompt_id: Some(id),
            ..
        } => to_json(&manager.job(&id).await?),
        Command::History {
            limit,
            prompt_id: None,
        } => to_json(&manager.history(limit).await?),

        Command::Nodes {
            search,
            category,
            output_only,
            include_deprecated,
            refresh,
        } => {
            if refresh {
                manager.refresh_schema().await?;
            }
            let filter = NodeFilter {
                category,
                output_nodes_only: output_only,
                include_deprecated,
            };
            to_json(&manager.nodes(search.as_deref(), &filter).await?)
        }
        Command::Models { folder } => to_json(&manager.list_models(folder.as_deref()).await?),
        Command::Extensions => to_json(&manager.list_extensions().await?),

        Command::Workflows => to_json(&manager.workflows()?),
        Command::Templates { name: None, .. } => to_json(&templates::list_templates()),
        Command::Templates {
            name: Some(name),
            save,
        } => {
            let graph = templates::template(&name)?;
            match save {
                Some(target) => {
                    let path = manager.store()?.save(&target, &graph)?;
                    tracing::info!(template = %name, path = %path.display(), "Saved template");
                    Ok(json!({ "saved": path }))
                }
                None => Ok(graph.to_json()),
            }
        }

        Command::Validate { workflow, offline } => {
            let graph = manager.load_workflow(&workflow)?;
            let report = if offline {
                ValidationReport::new(&graph, &SchemaSnapshot::empty())
            } else {
                manager.validate(&graph).await?
            };
            to_json(&report)
        }
        Command::Submit { workflow } => {
            let graph = manager.load_workflow(&workflow)?;
            to_json(&manager.submit(&graph).await?)
        }
        Command::Poll {
            prompt_id,
            timeout,
            interval,
        } => {
            let defaults = manager.config().poll;
            let config = PollConfig::from_secs(
                timeout.unwrap_or(defaults.timeout.as_secs_f64()),
                interval.unwrap_or(defaults.interval.as_secs_f64()),
            )?
            .with_max_transport_retries(defaults.max_transport_retries);
            to_json(&manager.poll_with(&prompt_id, &config).await?)
        }
        Command::Run {
            workflow,
            output_node,
            out,
        } => {
            let graph = manager.load_workflow(&workflow)?;
            let output = manager.run(graph, output_node.as_deref()).await?;
            render_output(&output, out.as_deref()).await
        }
        Command::Generate { prompt, out } => {
            let output = manager.generate_image(&prompt.join(" ")).await?;
            render_output(&output, out.as_deref()).await
        }
        Command::GetResult {
            prompt_id,
            node,
            out,
        } => {
            let output = manager.get_result(&prompt_id, node.as_deref()).await?;
            render_output(&output, out.as_deref()).await
        }

        Command::Interrupt { prompt_id } => to_json(&manager.interrupt(prompt_id.as_deref()).await?),
        Command::ClearQueue { ids, .. } => {
            to_json(&manager.clear_queue(Selection::from_ids(ids)).await?)
        }
        Command::DeleteHistory { ids, .. } => {
            to_json(&manager.delete_history(Selection::from_ids(ids)).await?)
        }
    }
}

/// Write every fetched image into `dir`, returning the written paths.
///
/// URL-mode artifacts carry no bytes and are skipped. Only the final
/// path component of the engine's filename is used.
pub async fn save_artifacts(output: &AssembledOutput, dir: &Path) -> ComfyResult<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir).await.map_err(CoreError::Io)?;

    let mut saved = Vec::new();
    for artifact in &output.artifacts {
        let Some(bytes) = artifact.bytes() else {
            continue;
        };
        let name = Path::new(&artifact.descriptor.filename)
            .file_name()
            .ok_or_else(|| {
                ComfyError::Decode(format!(
                    "artifact has no usable filename: '{}'",
                    artifact.descriptor.filename
                ))
            })?;
        let path = dir.join(name);
        tokio::fs::write(&path, bytes).await.map_err(CoreError::Io)?;
        tracing::info!(path = %path.display(), size = bytes.len(), "Saved artifact");
        saved.push(path);
    }
    Ok(saved)
}

async fn render_output(output: &AssembledOutput, out: Option<&Path>) -> ComfyResult<Value> {
    let mut value = to_json(output)?;
    if let Some(dir) = out {
        let saved = save_artifacts(output, dir).await?;
        value["saved"] = json!(saved);
    }
    Ok(value)
}

fn to_json<T: Serialize + ?Sized>(value: &T) -> ComfyResult<Value> {
    Ok(serde_json::to_value(value).map_err(CoreError::Json)?)
}
