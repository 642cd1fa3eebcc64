//! Scripted in-memory engine for unit tests.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::api::{ComfyUIApiError, EngineApi, SubmitResponse};

/// A scripted reply: JSON body or an HTTP status with a body.
pub(crate) type Reply = Result<Value, (u16, String)>;

/// Replies are consumed in order; the last one repeats forever.
#[derive(Default)]
struct Script(Mutex<VecDeque<Reply>>);

impl Script {
    fn set(&self, replies: impl IntoIterator<Item = Reply>) {
        *self.0.lock().unwrap() = replies.into_iter().collect();
    }

    fn next(&self) -> Result<Value, ComfyUIApiError> {
        let mut replies = self.0.lock().unwrap();
        let reply = if replies.len() > 1 {
            replies.pop_front().unwrap()
        } else {
            replies.front().cloned().unwrap_or_else(|| Ok(json!({})))
        };
        reply.map_err(|(status, body)| ComfyUIApiError::ApiError { status, body })
    }
}

#[derive(Default)]
pub(crate) struct FakeEngine {
    submit: Script,
    queue: Script,
    history: Script,
    object_info: Script,
    views: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<&'static str>>,
    /// Arguments of submit/delete/interrupt calls, in order.
    pub(crate) submitted: Mutex<Vec<Value>>,
    pub(crate) deleted_queue: Mutex<Vec<String>>,
    pub(crate) deleted_history: Mutex<Vec<String>>,
    pub(crate) interrupts: Mutex<Vec<Option<String>>>,
}

impl FakeEngine {
    pub(crate) fn new() -> Self {
        let engine = Self::default();
        engine.submit.set([Ok(json!({"prompt_id": "p-1", "number": 1, "node_errors": {}}))]);
        engine
    }

    pub(crate) fn with_submit(self, reply: Reply) -> Self {
        self.submit.set([reply]);
        self
    }

    pub(crate) fn with_queue(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.queue.set(replies);
        self
    }

    pub(crate) fn with_history(self, replies: impl IntoIterator<Item = Reply>) -> Self {
        self.history.set(replies);
        self
    }

    pub(crate) fn with_object_info(self, info: Value) -> Self {
        self.object_info.set([Ok(info)]);
        self
    }

    pub(crate) fn with_view(self, filename: &str, bytes: &[u8]) -> Self {
        self.views
            .lock()
            .unwrap()
            .insert(filename.to_string(), bytes.to_vec());
        self
    }

    /// Number of calls made to one endpoint.
    pub(crate) fn calls(&self, endpoint: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| **c == endpoint)
            .count()
    }

    fn record(&self, endpoint: &'static str) {
        self.calls.lock().unwrap().push(endpoint);
    }
}

/// Queue body with the given running and pending prompt ids.
pub(crate) fn queue_body(running: &[&str], pending: &[&str]) -> Value {
    let entry = |(i, id): (usize, &&str)| json!([i, id, {}, {}, []]);
    json!({
        "queue_running": running.iter().enumerate().map(entry).collect::<Vec<_>>(),
        "queue_pending": pending.iter().enumerate().map(entry).collect::<Vec<_>>(),
    })
}

/// History body for one finished prompt with image outputs on `node_id`.
pub(crate) fn history_body(prompt_id: &str, node_id: &str, files: &[&str]) -> Value {
    let images: Vec<Value> = files
        .iter()
        .map(|f| json!({"filename": f, "subfolder": "", "type": "output"}))
        .collect();
    json!({
        (prompt_id): {
            "outputs": {(node_id): {"images": images}},
            "status": {"status_str": "success", "completed": true, "messages": []}
        }
    })
}

impl EngineApi for FakeEngine {
    async fn submit_workflow(
        &self,
        workflow: &Value,
        _client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        self.record("submit");
        self.submitted.lock().unwrap().push(workflow.clone());
        let body = self.submit.next()?;
        Ok(serde_json::from_value(body).unwrap())
    }

    async fn get_queue(&self) -> Result<Value, ComfyUIApiError> {
        self.record("queue");
        self.queue.next()
    }

    async fn get_history(&self, _prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        self.record("history");
        self.history.next()
    }

    async fn list_history(&self, _max_items: Option<u32>) -> Result<Value, ComfyUIApiError> {
        self.record("list_history");
        self.history.next()
    }

    async fn interrupt(&self, prompt_id: Option<&str>) -> Result<(), ComfyUIApiError> {
        self.record("interrupt");
        self.interrupts
            .lock()
            .unwrap()
            .push(prompt_id.map(str::to_string));
        Ok(())
    }

    async fn delete_queued(&self, prompt_ids: &[String]) -> Result<(), ComfyUIApiError> {
        self.record("delete_queued");
        self.deleted_queue
            .lock()
            .unwrap()
            .extend(prompt_ids.iter().cloned());
        Ok(())
    }

    async fn clear_queue(&self) -> Result<(), ComfyUIApiError> {
        self.record("clear_queue");
        Ok(())
    }

    async fn delete_history(&self, prompt_ids: &[String]) -> Result<(), ComfyUIApiError> {
        self.record("delete_history");
        self.deleted_history
            .lock()
            .unwrap()
            .extend(prompt_ids.iter().cloned());
        Ok(())
    }

    async fn clear_history(&self) -> Result<(), ComfyUIApiError> {
        self.record("clear_history");
        Ok(())
    }

    async fn get_object_info(&self) -> Result<Value, ComfyUIApiError> {
        self.record("object_info");
        self.object_info.next()
    }

    async fn get_system_stats(&self) -> Result<Value, ComfyUIApiError> {
        self.record("system_stats");
        Ok(json!({
            "system": {"os": "posix", "comfyui_version": "0.3.40"},
            "devices": []
        }))
    }

    async fn list_models(&self, folder: Option<&str>) -> Result<Value, ComfyUIApiError> {
        self.record("models");
        Ok(match folder {
            Some(_) => json!(["a.safetensors"]),
            None => json!(["checkpoints", "loras"]),
        })
    }

    async fn list_extensions(&self) -> Result<Value, ComfyUIApiError> {
        self.record("extensions");
        Ok(json!(["/extensions/core/a.js"]))
    }

    async fn view(
        &self,
        filename: &str,
        _subfolder: &str,
        _folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        self.record("view");
        self.views
            .lock()
            .unwrap()
            .get(filename)
            .cloned()
            .ok_or_else(|| ComfyUIApiError::ApiError {
                status: 404,
                body: "404: Not Found".into(),
            })
    }
}
