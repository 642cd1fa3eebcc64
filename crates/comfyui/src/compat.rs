//! Normalization of raw engine responses.
//!
//! Engine releases add, rename and drop fields in `/history`, `/queue`
//! and `/object_info`. Every function here is pure: raw JSON in, typed
//! value out, so version drift stays out of the orchestrator.

use comfyflow_core::schema::{InputSpec, SchemaEntry, COMBO_TYPE};
use indexmap::IndexMap;
use serde_json::Value;

use crate::job::{ArtifactDescriptor, ArtifactKind, Job, JobStatus, QueueEntry, QueueSnapshot};
use crate::models::SystemStats;

/// Status message the engine records when a prompt was interrupted.
const MSG_INTERRUPTED: &str = "execution_interrupted";

/// Status message carrying the exception of a failed prompt.
const MSG_ERROR: &str = "execution_error";

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

/// Extract one prompt from a `/history/{id}` response (`{id: entry}`).
///
/// Returns `None` when the engine has no record of the prompt yet.
pub fn history_job(response: &Value, prompt_id: &str) -> Option<Job> {
    response
        .get(prompt_id)
        .map(|entry| normalize_history_entry(prompt_id, entry))
}

/// Convert every entry of a `/history` response, most recent last.
pub fn history_jobs(response: &Value) -> Vec<Job> {
    response
        .as_object()
        .map(|obj| {
            obj.iter()
                .map(|(id, entry)| normalize_history_entry(id, entry))
                .collect()
        })
        .unwrap_or_default()
}

/// Convert a single history entry.
///
/// Presence in history means the engine finished with the prompt, so
/// an entry without a `status` block (older engines) is Completed.
pub fn normalize_history_entry(prompt_id: &str, entry: &Value) -> Job {
    let outputs = normalize_outputs(entry.get("outputs"));
    let (status, diagnostic) = match entry.get("status") {
        None | Some(Value::Null) => (JobStatus::Completed, None),
        Some(status) => classify_status(status),
    };
    Job {
        prompt_id: prompt_id.to_string(),
        status,
        outputs,
        diagnostic,
    }
}

fn classify_status(status: &Value) -> (JobStatus, Option<String>) {
    let messages: Vec<(&str, &Value)> = status
        .get("messages")
        .and_then(Value::as_array)
        .map(|msgs| {
            msgs.iter()
                .filter_map(|m| {
                    let pair = m.as_array()?;
                    Some((pair.first()?.as_str()?, pair.get(1).unwrap_or(&Value::Null)))
                })
                .collect()
        })
        .unwrap_or_default();

    if let Some((_, data)) = messages.iter().find(|(kind, _)| *kind == MSG_INTERRUPTED) {
        let node = data
            .get("node_id")
            .and_then(Value::as_str)
            .map(|n| format!(" at node {n}"))
            .unwrap_or_default();
        return (
            JobStatus::Interrupted,
            Some(format!("Execution interrupted{node}")),
        );
    }

    let status_str = status.get("status_str").and_then(Value::as_str);
    let completed = status.get("completed").and_then(Value::as_bool);

    if status_str == Some("error") {
        let diagnostic = messages
            .iter()
            .find(|(kind, _)| *kind == MSG_ERROR)
            .map(|(_, data)| describe_exception(data))
            .unwrap_or_else(|| "Execution failed".to_string());
        return (JobStatus::Failed, Some(diagnostic));
    }

    match (status_str, completed) {
        (Some("success"), _) | (None, Some(true)) | (None, None) => (JobStatus::Completed, None),
        (Some(other), _) => (
            JobStatus::Failed,
            Some(format!("Execution ended with status '{other}'")),
        ),
        (None, Some(false)) => (
            JobStatus::Failed,
            Some("Execution did not complete".to_string()),
        ),
    }
}

fn describe_exception(data: &Value) -> String {
    let field = |name: &str| data.get(name).and_then(Value::as_str).unwrap_or("");
    let node = match (field("node_type"), field("node_id")) {
        ("", "") => String::new(),
        (node_type, "") => format!("{node_type}: "),
        ("", node_id) => format!("node {node_id}: "),
        (node_type, node_id) => format!("{node_type} (node {node_id}): "),
    };
    match (field("exception_type"), field("exception_message")) {
        ("", message) => format!("{node}{}", message.trim()),
        (kind, message) => format!("{node}{kind}: {}", message.trim()),
    }
}

fn normalize_outputs(outputs: Option<&Value>) -> IndexMap<String, Vec<ArtifactDescriptor>> {
    let Some(obj) = outputs.and_then(Value::as_object) else {
        return IndexMap::new();
    };
    obj.iter()
        .map(|(node_id, node_output)| (node_id.clone(), node_artifacts(node_output)))
        .collect()
}

fn node_artifacts(node_output: &Value) -> Vec<ArtifactDescriptor> {
    let Some(obj) = node_output.as_object() else {
        return Vec::new();
    };
    let mut artifacts = Vec::new();
    for (key, items) in obj {
        let Some(items) = items.as_array() else {
            continue;
        };
        let kind = ArtifactKind::from_output_key(key);
        artifacts.extend(
            items
                .iter()
                .filter_map(|item| artifact_descriptor(kind.clone(), item)),
        );
    }
    artifacts
}

/// A file entry, or `None` for flags and metadata (`"animated": [true]`,
/// `"text": ["..."]`) that name no file.
fn artifact_descriptor(kind: ArtifactKind, item: &Value) -> Option<ArtifactDescriptor> {
    let obj = item.as_object()?;
    let field = |name: &str| {
        obj.get(name)
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string()
    };
    let filename = field("filename");
    if filename.is_empty() {
        return None;
    }
    Some(ArtifactDescriptor {
        kind,
        filename,
        subfolder: field("subfolder"),
        folder_type: match field("type") {
            t if t.is_empty() => "output".to_string(),
            t => t,
        },
    })
}

// ---------------------------------------------------------------------------
// Queue
// ---------------------------------------------------------------------------

/// Convert a `/queue` response.
///
/// Entries are arrays `[number, prompt_id, prompt, extra, outputs]`;
/// object-shaped entries carrying `number`/`prompt_id` are accepted too.
pub fn normalize_queue(response: &Value) -> QueueSnapshot {
    let entries = |key: &str| -> Vec<QueueEntry> {
        response
            .get(key)
            .and_then(Value::as_array)
            .map(|items| items.iter().filter_map(queue_entry).collect())
            .unwrap_or_default()
    };
    let running = entries("queue_running");
    let mut pending = entries("queue_pending");
    pending.sort_by_key(|e| e.number);
    QueueSnapshot { running, pending }
}

fn queue_entry(item: &Value) -> Option<QueueEntry> {
    match item {
        Value::Array(fields) => Some(QueueEntry {
            number: fields.first().and_then(Value::as_i64).unwrap_or_default(),
            prompt_id: fields.get(1)?.as_str()?.to_string(),
        }),
        Value::Object(fields) => Some(QueueEntry {
            number: fields.get("number").and_then(Value::as_i64).unwrap_or_default(),
            prompt_id: fields.get("prompt_id")?.as_str()?.to_string(),
        }),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Object info
// ---------------------------------------------------------------------------

/// Convert an `/object_info` response into schema entries.
///
/// Malformed entries are skipped rather than failing the whole catalog.
pub fn normalize_object_info(response: &Value) -> Vec<SchemaEntry> {
    response
        .as_object()
        .map(|obj| {
            obj.iter()
                .filter(|(_, info)| info.is_object())
                .map(|(name, info)| normalize_node_info(name, info))
                .collect()
        })
        .unwrap_or_default()
}

fn normalize_node_info(name: &str, info: &Value) -> SchemaEntry {
    let text = |field: &str| {
        info.get(field)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    };
    let flag = |field: &str| info.get(field).and_then(Value::as_bool).unwrap_or(false);

    let mut inputs = section_inputs(info, "required", true);
    inputs.extend(section_inputs(info, "optional", false));

    let outputs: Vec<String> = info
        .get("output")
        .and_then(Value::as_array)
        .map(|outs| outs.iter().map(output_type_tag).collect())
        .unwrap_or_default();

    let output_names = info
        .get("output_name")
        .and_then(Value::as_array)
        .map(|names| {
            names
                .iter()
                .filter_map(|n| n.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_else(|| outputs.clone());

    SchemaEntry {
        name: text("name").unwrap_or_else(|| name.to_string()),
        display_name: text("display_name"),
        category: text("category"),
        description: text("description"),
        inputs,
        outputs,
        output_names,
        output_node: flag("output_node"),
        deprecated: flag("deprecated"),
        experimental: flag("experimental"),
    }
}

fn section_inputs(info: &Value, section: &str, required: bool) -> Vec<InputSpec> {
    let Some(declared) = info
        .get("input")
        .and_then(|i| i.get(section))
        .and_then(Value::as_object)
    else {
        return Vec::new();
    };

    // `input_order` (newer engines) wins over map order when present.
    let order: Vec<&str> = info
        .get("input_order")
        .and_then(|o| o.get(section))
        .and_then(Value::as_array)
        .map(|names| names.iter().filter_map(Value::as_str).collect())
        .unwrap_or_else(|| declared.keys().map(String::as_str).collect());

    order
        .into_iter()
        .filter_map(|name| declared.get(name).map(|spec| (name, spec)))
        .map(|(name, spec)| input_spec(name, spec, required))
        .collect()
}

fn input_spec(name: &str, spec: &Value, required: bool) -> InputSpec {
    let first = spec.as_array().and_then(|s| s.first());
    let (type_tag, choices) = match first {
        Some(Value::String(tag)) if tag == COMBO_TYPE => {
            let options = spec
                .get(1)
                .and_then(|o| o.get("options"))
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            (Some(COMBO_TYPE.to_string()), options)
        }
        Some(Value::String(tag)) => (Some(tag.clone()), Vec::new()),
        Some(Value::Array(options)) => (Some(COMBO_TYPE.to_string()), options.clone()),
        _ => (None, Vec::new()),
    };
    InputSpec {
        name: name.to_string(),
        required,
        type_tag,
        choices,
    }
}

fn output_type_tag(output: &Value) -> String {
    match output {
        Value::String(tag) => tag.clone(),
        _ => COMBO_TYPE.to_string(),
    }
}

// ---------------------------------------------------------------------------
// System stats
// ---------------------------------------------------------------------------

/// Convert a `/system_stats` response.
pub fn normalize_system_stats(response: Value) -> Result<SystemStats, serde_json::Error> {
    serde_json::from_value(response)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    // -- History ------------------------------------------------------------

    #[test]
    fn successful_entry_is_completed_with_outputs() {
        let response = json!({
            "abc": {
                "prompt": [3, "abc", {}, {}, ["9"]],
                "outputs": {"9": {"images": [
                    {"filename": "ComfyUI_0001.png", "subfolder": "", "type": "output"},
                    {"filename": "ComfyUI_0002.png", "subfolder": "batch", "type": "output"}
                ]}},
                "status": {"status_str": "success", "completed": true, "messages": [
                    ["execution_start", {"prompt_id": "abc"}],
                    ["execution_success", {"prompt_id": "abc"}]
                ]}
            }
        });
        let job = history_job(&response, "abc").unwrap();
        assert_eq!(job.status, JobStatus::Completed);
        assert!(job.diagnostic.is_none());
        let images = &job.outputs["9"];
        assert_eq!(images.len(), 2);
        assert_eq!(images[1].subfolder, "batch");
        assert_eq!(images[0].kind, ArtifactKind::Image);
    }

    #[test]
    fn unknown_prompt_is_none() {
        assert!(history_job(&json!({}), "abc").is_none());
    }

    #[test]
    fn error_entry_carries_exception_text() {
        let entry = json!({
            "outputs": {},
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_error", {"node_id": "4", "node_type": "CheckpointLoaderSimple",
                    "exception_type": "FileNotFoundError", "exception_message": "model missing\n"}]
            ]}
        });
        let job = normalize_history_entry("abc", &entry);
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(
            job.diagnostic.as_deref(),
            Some("CheckpointLoaderSimple (node 4): FileNotFoundError: model missing")
        );
    }

    #[test]
    fn interrupted_entry_detected_from_messages() {
        let entry = json!({
            "outputs": {},
            "status": {"status_str": "error", "completed": false, "messages": [
                ["execution_start", {}],
                ["execution_interrupted", {"node_id": "3", "executed": []}]
            ]}
        });
        let job = normalize_history_entry("abc", &entry);
        assert_eq!(job.status, JobStatus::Interrupted);
        assert_eq!(job.diagnostic.as_deref(), Some("Execution interrupted at node 3"));
    }

    #[test]
    fn legacy_entry_without_status_is_completed() {
        let entry = json!({"outputs": {"9": {"images": [{"filename": "a.png"}]}}});
        let job = normalize_history_entry("abc", &entry);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.outputs["9"][0].folder_type, "output");
    }

    #[test]
    fn non_image_files_are_other_kind() {
        let entry = json!({"outputs": {"5": {
            "gifs": [{"filename": "a.gif", "type": "temp"}],
            "audio": [{"filename": "a.flac", "subfolder": "audio"}]
        }}});
        let job = normalize_history_entry("abc", &entry);
        let artifacts = &job.outputs["5"];
        assert_eq!(artifacts.len(), 2);
        assert_eq!(artifacts[0].kind, ArtifactKind::Other("gifs".into()));
        assert_eq!(artifacts[0].folder_type, "temp");
        assert_eq!(artifacts[1].kind, ArtifactKind::Other("audio".into()));
        assert_eq!(artifacts[1].folder_type, "output");
    }

    #[test]
    fn scalar_flags_and_text_are_not_artifacts() {
        let entry = json!({"outputs": {
            "9": {
                "images": [{"filename": "a.webp", "subfolder": "", "type": "output"}],
                "animated": [true]
            },
            "5": {"text": ["hello"], "meta": [{"seed": 3}]}
        }});
        let job = normalize_history_entry("abc", &entry);
        assert_eq!(job.outputs["9"].len(), 1);
        assert_eq!(job.outputs["9"][0].kind, ArtifactKind::Image);
        assert_eq!(job.outputs["9"][0].filename, "a.webp");
        assert!(job.outputs["5"].is_empty());
    }

    #[test]
    fn history_list_converts_every_entry() {
        let response = json!({
            "a": {"outputs": {}, "status": {"status_str": "success", "completed": true}},
            "b": {"outputs": {}, "status": {"status_str": "error", "completed": false}}
        });
        let jobs = history_jobs(&response);
        assert_eq!(jobs.len(), 2);
        assert_eq!(jobs[1].status, JobStatus::Failed);
        assert_eq!(jobs[1].diagnostic.as_deref(), Some("Execution failed"));
    }

    // -- Queue --------------------------------------------------------------

    #[test]
    fn queue_arrays_are_parsed_and_pending_sorted() {
        let response = json!({
            "queue_running": [[5, "run", {}, {}, ["9"]]],
            "queue_pending": [[8, "late", {}, {}, []], [6, "early", {}, {}, []]]
        });
        let queue = normalize_queue(&response);
        assert_eq!(queue.running[0].prompt_id, "run");
        let pending: Vec<_> = queue.pending.iter().map(|e| e.prompt_id.as_str()).collect();
        assert_eq!(pending, vec!["early", "late"]);
    }

    #[test]
    fn queue_tolerates_missing_sections_and_objects() {
        let queue = normalize_queue(&json!({"queue_pending": [{"number": 1, "prompt_id": "x"}]}));
        assert!(queue.running.is_empty());
        assert_eq!(queue.pending[0].prompt_id, "x");
        assert!(normalize_queue(&json!({})).is_empty());
    }

    // -- Object info --------------------------------------------------------

    #[test]
    fn object_info_inputs_outputs_and_flags() {
        let response = json!({
            "KSampler": {
                "input": {
                    "required": {
                        "model": ["MODEL"],
                        "seed": ["INT", {"default": 0}],
                        "sampler_name": [["euler", "dpmpp_2m"]]
                    },
                    "optional": {"noise": ["NOISE"]}
                },
                "output": ["LATENT"],
                "output_name": ["LATENT"],
                "name": "KSampler",
                "display_name": "KSampler",
                "category": "sampling",
                "output_node": false
            }
        });
        let entries = normalize_object_info(&response);
        assert_eq!(entries.len(), 1);
        let ks = &entries[0];
        assert_eq!(ks.category.as_deref(), Some("sampling"));
        assert_eq!(ks.outputs, vec!["LATENT"]);
        let names: Vec<_> = ks.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["model", "seed", "sampler_name", "noise"]);
        let sampler = ks.input("sampler_name").unwrap();
        assert_eq!(sampler.type_tag.as_deref(), Some(COMBO_TYPE));
        assert_eq!(sampler.choices.len(), 2);
        assert!(!ks.input("noise").unwrap().required);
    }

    #[test]
    fn input_order_overrides_map_order() {
        let response = json!({
            "N": {
                "input": {"required": {"b": ["INT"], "a": ["INT"]}},
                "input_order": {"required": ["a", "b"]},
                "output": []
            }
        });
        let entry = &normalize_object_info(&response)[0];
        let names: Vec<_> = entry.inputs.iter().map(|i| i.name.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn new_style_combo_and_legacy_defaults() {
        let response = json!({
            "Loader": {
                "input": {"required": {"ckpt": ["COMBO", {"options": ["a.safetensors"]}]}},
                "output": ["MODEL", ["x", "y"]]
            }
        });
        let entry = &normalize_object_info(&response)[0];
        assert_eq!(entry.name, "Loader");
        assert!(entry.display_name.is_none());
        assert_eq!(entry.input("ckpt").unwrap().choices, vec![json!("a.safetensors")]);
        assert_eq!(entry.outputs, vec!["MODEL", COMBO_TYPE]);
        assert_eq!(entry.output_names, entry.outputs);
    }
}
