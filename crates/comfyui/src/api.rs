//! REST API client for the ComfyUI HTTP endpoints.
//!
//! [`EngineApi`] is the request surface the rest of the crate depends
//! on; [`ComfyUIApi`] implements it over [`reqwest`]. Responses are
//! returned as raw JSON and normalized by [`crate::compat`]. No
//! business logic lives here.

use std::future::Future;

use serde::Deserialize;
use serde_json::Value;

/// Response returned by the ComfyUI `/prompt` endpoint after
/// successfully queuing a workflow.
#[derive(Debug, Clone, Deserialize)]
pub struct SubmitResponse {
    /// Server-assigned identifier for the queued prompt. Empty when
    /// the engine refused every output node.
    #[serde(default)]
    pub prompt_id: String,
    /// Position in the execution queue.
    #[serde(default)]
    pub number: i64,
    /// Per-node errors the engine tolerated (output nodes it skipped).
    #[serde(default)]
    pub node_errors: Value,
}

/// Errors from the ComfyUI REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum ComfyUIApiError {
    /// The HTTP request itself failed (network, DNS, TLS, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// ComfyUI returned a non-2xx status code.
    #[error("ComfyUI API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },
}

impl ComfyUIApiError {
    /// Whether the failure happened below HTTP (connection refused,
    /// timeout, broken body) or was a 5xx from the engine.
    pub fn is_transport(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::ApiError { status, .. } => *status >= 500,
        }
    }
}

/// The engine endpoints consumed by the orchestrator, schema cache and
/// result assembler.
pub trait EngineApi: Send + Sync {
    /// `POST /prompt`.
    fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> impl Future<Output = Result<SubmitResponse, ComfyUIApiError>> + Send;

    /// `GET /queue`.
    fn get_queue(&self) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /history/{prompt_id}`. Unknown prompts yield `{}`.
    fn get_history(
        &self,
        prompt_id: &str,
    ) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /history?max_items=N`.
    fn list_history(
        &self,
        max_items: Option<u32>,
    ) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `POST /interrupt`, optionally scoped to one prompt.
    fn interrupt(
        &self,
        prompt_id: Option<&str>,
    ) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;

    /// `POST /queue {"delete": [...]}`.
    fn delete_queued(
        &self,
        prompt_ids: &[String],
    ) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;

    /// `POST /queue {"clear": true}`.
    fn clear_queue(&self) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;

    /// `POST /history {"delete": [...]}`.
    fn delete_history(
        &self,
        prompt_ids: &[String],
    ) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;

    /// `POST /history {"clear": true}`.
    fn clear_history(&self) -> impl Future<Output = Result<(), ComfyUIApiError>> + Send;

    /// `GET /object_info`.
    fn get_object_info(&self) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /system_stats`.
    fn get_system_stats(&self) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /models` or `GET /models/{folder}`.
    fn list_models(
        &self,
        folder: Option<&str>,
    ) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /extensions`.
    fn list_extensions(&self) -> impl Future<Output = Result<Value, ComfyUIApiError>> + Send;

    /// `GET /view` -- raw artifact bytes.
    fn view(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> impl Future<Output = Result<Vec<u8>, ComfyUIApiError>> + Send;
}

/// HTTP client for a single ComfyUI instance.
#[derive(Debug, Clone)]
pub struct ComfyUIApi {
    client: reqwest::Client,
    api_url: String,
}

impl ComfyUIApi {
    /// Create a new API client for a ComfyUI instance.
    ///
    /// * `api_url` - Base HTTP URL, e.g. `http://host:8188`.
    pub fn new(api_url: String) -> Self {
        Self::with_client(reqwest::Client::new(), api_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling and per-request timeouts).
    pub fn with_client(client: reqwest::Client, api_url: String) -> Self {
        Self {
            client,
            api_url: api_url.trim_end_matches('/').to_string(),
        }
    }

    /// Base HTTP API URL.
    pub fn api_url(&self) -> &str {
        &self.api_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.api_url, path)
    }

    async fn get_json(&self, path: &str) -> Result<Value, ComfyUIApiError> {
        let response = self.client.get(self.url(path)).send().await?;
        Self::parse_response(response).await
    }

    async fn post_json(&self, path: &str, body: &Value) -> Result<(), ComfyUIApiError> {
        let response = self.client.post(self.url(path)).json(body).send().await?;
        Self::check_status(response).await
    }

    // ---- private helpers ----

    /// Ensure the response has a success status code. Returns the
    /// response unchanged on success, or a [`ComfyUIApiError::ApiError`]
    /// containing the status and body text on failure.
    async fn ensure_success(
        response: reqwest::Response,
    ) -> Result<reqwest::Response, ComfyUIApiError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(ComfyUIApiError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, ComfyUIApiError> {
        let response = Self::ensure_success(response).await?;
        Ok(response.json::<T>().await?)
    }

    /// Assert the response has a success status code, discarding the body.
    async fn check_status(response: reqwest::Response) -> Result<(), ComfyUIApiError> {
        Self::ensure_success(response).await?;
        Ok(())
    }
}

impl EngineApi for ComfyUIApi {
    async fn submit_workflow(
        &self,
        workflow: &Value,
        client_id: &str,
    ) -> Result<SubmitResponse, ComfyUIApiError> {
        let body = serde_json::json!({
            "prompt": workflow,
            "client_id": client_id,
        });

        let response = self.client.post(self.url("/prompt")).json(&body).send().await?;

        Self::parse_response(response).await
    }

    async fn get_queue(&self) -> Result<Value, ComfyUIApiError> {
        self.get_json("/queue").await
    }

    async fn get_history(&self, prompt_id: &str) -> Result<Value, ComfyUIApiError> {
        self.get_json(&format!("/history/{prompt_id}")).await
    }

    async fn list_history(&self, max_items: Option<u32>) -> Result<Value, ComfyUIApiError> {
        let mut request = self.client.get(self.url("/history"));
        if let Some(max) = max_items {
            request = request.query(&[("max_items", max)]);
        }
        let response = request.send().await?;
        Self::parse_response(response).await
    }

    /// This does not cancel queued prompts, only the one executing now.
    async fn interrupt(&self, prompt_id: Option<&str>) -> Result<(), ComfyUIApiError> {
        let mut request = self.client.post(self.url("/interrupt"));
        if let Some(id) = prompt_id {
            request = request.json(&serde_json::json!({ "prompt_id": id }));
        }
        let response = request.send().await?;
        Self::check_status(response).await
    }

    async fn delete_queued(&self, prompt_ids: &[String]) -> Result<(), ComfyUIApiError> {
        self.post_json("/queue", &serde_json::json!({ "delete": prompt_ids }))
            .await
    }

    async fn clear_queue(&self) -> Result<(), ComfyUIApiError> {
        self.post_json("/queue", &serde_json::json!({ "clear": true }))
            .await
    }

    async fn delete_history(&self, prompt_ids: &[String]) -> Result<(), ComfyUIApiError> {
        self.post_json("/history", &serde_json::json!({ "delete": prompt_ids }))
            .await
    }

    async fn clear_history(&self) -> Result<(), ComfyUIApiError> {
        self.post_json("/history", &serde_json::json!({ "clear": true }))
            .await
    }

    async fn get_object_info(&self) -> Result<Value, ComfyUIApiError> {
        self.get_json("/object_info").await
    }

    async fn get_system_stats(&self) -> Result<Value, ComfyUIApiError> {
        self.get_json("/system_stats").await
    }

    async fn list_models(&self, folder: Option<&str>) -> Result<Value, ComfyUIApiError> {
        match folder {
            Some(folder) => self.get_json(&format!("/models/{folder}")).await,
            None => self.get_json("/models").await,
        }
    }

    async fn list_extensions(&self) -> Result<Value, ComfyUIApiError> {
        self.get_json("/extensions").await
    }

    async fn view(
        &self,
        filename: &str,
        subfolder: &str,
        folder_type: &str,
    ) -> Result<Vec<u8>, ComfyUIApiError> {
        let response = self
            .client
            .get(self.url("/view"))
            .query(&[
                ("filename", filename),
                ("subfolder", subfolder),
                ("type", folder_type),
            ])
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        Ok(response.bytes().await?.to_vec())
    }
}
