//! Integration tests for the HTTP client against a fake ComfyUI server.
//!
//! The server is a small axum router bound to an ephemeral local port.
//! It records what the client sent so the tests can check request
//! shapes as well as response handling.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use assert_matches::assert_matches;
use axum::extract::{Path, Query, RawQuery, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use comfyflow_comfyui::api::ComfyUIApiError;
use comfyflow_comfyui::{ComfyConfig, ComfyError, ComfyUIApi, ComfyUIManager, EngineApi};
use comfyflow_core::graph::Graph;
use serde_json::{json, Value};

// ---------------------------------------------------------------------------
// Fake server
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Recorded {
    prompts: Vec<Value>,
    history_queries: Vec<Option<String>>,
    view_queries: Vec<HashMap<String, String>>,
    interrupts: Vec<String>,
}

type Shared = Arc<Mutex<Recorded>>;

const IMAGE_BYTES: &[u8] = b"\x89PNG\r\n\x1a\nfake";

async fn submit(State(state): State<Shared>, Json(body): Json<Value>) -> Response {
    state.lock().unwrap().prompts.push(body.clone());
    let has_bad_node = body["prompt"]
        .as_object()
        .is_some_and(|nodes| nodes.values().any(|n| n["class_type"] == "Broken"));
    if has_bad_node {
        let error = json!({
            "error": {"type": "prompt_outputs_failed_validation", "message": "Prompt outputs failed validation"},
            "node_errors": {"1": {"errors": [{"type": "invalid_class"}]}}
        });
        return (StatusCode::BAD_REQUEST, Json(error)).into_response();
    }
    Json(json!({"prompt_id": "p-1", "number": 3, "node_errors": {}})).into_response()
}

async fn queue() -> Json<Value> {
    Json(json!({"queue_running": [], "queue_pending": []}))
}

async fn history_one(Path(prompt_id): Path<String>) -> Json<Value> {
    if prompt_id != "p-1" {
        return Json(json!({}));
    }
    Json(json!({
        "p-1": {
            "outputs": {"9": {"images": [{"filename": "out.png", "subfolder": "", "type": "output"}]}},
            "status": {"status_str": "success", "completed": true, "messages": []}
        }
    }))
}

async fn history_list(State(state): State<Shared>, RawQuery(query): RawQuery) -> Json<Value> {
    state.lock().unwrap().history_queries.push(query);
    Json(json!({}))
}

async fn view(
    State(state): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let found = params.get("filename").map(String::as_str) == Some("out.png");
    state.lock().unwrap().view_queries.push(params);
    if found {
        IMAGE_BYTES.into_response()
    } else {
        (StatusCode::NOT_FOUND, "404: Not Found").into_response()
    }
}

async fn interrupt(State(state): State<Shared>, body: String) -> StatusCode {
    state.lock().unwrap().interrupts.push(body);
    StatusCode::OK
}

async fn object_info() -> Json<Value> {
    Json(json!({
        "LoadImage": {
            "input": {"required": {"image": [["a.png", "b.png"], {"image_upload": true}]}},
            "output": ["IMAGE", "MASK"],
            "output_name": ["IMAGE", "MASK"],
            "category": "image"
        },
        "SaveImage": {
            "input": {"required": {
                "images": ["IMAGE"],
                "filename_prefix": ["STRING", {"default": "ComfyUI"}]
            }},
            "output": [],
            "category": "image",
            "output_node": true
        }
    }))
}

async fn models(Path(folder): Path<String>) -> Json<Value> {
    Json(json!([format!("{folder}-a.safetensors")]))
}

async fn overloaded() -> StatusCode {
    StatusCode::SERVICE_UNAVAILABLE
}

/// Start the fake server and return its base URL and request log.
async fn spawn_server() -> (String, Shared) {
    let state = Shared::default();
    let app = Router::new()
        .route("/prompt", post(submit))
        .route("/queue", get(queue))
        .route("/history", get(history_list))
        .route("/history/{prompt_id}", get(history_one))
        .route("/view", get(view))
        .route("/interrupt", post(interrupt))
        .route("/object_info", get(object_info))
        .route("/models/{folder}", get(models))
        .route("/extensions", get(overloaded))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}"), state)
}

fn graph() -> Graph {
    Graph::from_json(json!({
        "1": {"class_type": "LoadImage", "inputs": {"image": "a.png"}},
        "9": {"class_type": "SaveImage", "inputs": {"images": ["1", 0], "filename_prefix": "run"}}
    }))
    .unwrap()
}

// ---------------------------------------------------------------------------
// Client
// ---------------------------------------------------------------------------

/// The prompt is posted alongside the client id and the reply is decoded.
#[tokio::test]
async fn submit_posts_prompt_with_client_id() {
    let (url, state) = spawn_server().await;
    let api = ComfyUIApi::new(url);

    let response = api
        .submit_workflow(&graph().to_json(), "client-1")
        .await
        .unwrap();
    assert_eq!(response.prompt_id, "p-1");
    assert_eq!(response.number, 3);

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.prompts.len(), 1);
    assert_eq!(recorded.prompts[0]["client_id"], "client-1");
    assert_eq!(recorded.prompts[0]["prompt"]["9"]["class_type"], "SaveImage");
}

/// A 400 keeps its status and body, and maps to a structured rejection.
#[tokio::test]
async fn rejected_prompt_keeps_status_and_payload() {
    let (url, _) = spawn_server().await;
    let api = ComfyUIApi::new(url);

    let err = api
        .submit_workflow(&json!({"1": {"class_type": "Broken", "inputs": {}}}), "c")
        .await
        .unwrap_err();
    assert_matches!(&err, ComfyUIApiError::ApiError { status: 400, body } if body.contains("node_errors"));
    assert!(!err.is_transport());

    let err = ComfyError::from(err);
    assert_matches!(
        &err,
        ComfyError::RemoteRejected { status: 400, payload }
            if payload["error"]["type"] == "prompt_outputs_failed_validation"
    );
    assert_eq!(err.code(), "REMOTE_REJECTED");
}

/// `max_items` is sent only when a limit is given.
#[tokio::test]
async fn list_history_sends_limit_as_query() {
    let (url, state) = spawn_server().await;
    let api = ComfyUIApi::new(url);

    api.list_history(Some(5)).await.unwrap();
    api.list_history(None).await.unwrap();

    let recorded = state.lock().unwrap();
    assert_eq!(
        recorded.history_queries,
        vec![Some("max_items=5".to_string()), None]
    );
}

/// `/view` receives decoded query values and returns the raw bytes.
#[tokio::test]
async fn view_returns_bytes_and_reports_missing_files() {
    let (url, state) = spawn_server().await;
    let api = ComfyUIApi::new(url);

    let bytes = api.view("out.png", "sub dir/x", "output").await.unwrap();
    assert_eq!(bytes, IMAGE_BYTES);

    let err = api.view("gone.png", "", "temp").await.unwrap_err();
    assert_matches!(err, ComfyUIApiError::ApiError { status: 404, .. });

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.view_queries[0]["subfolder"], "sub dir/x");
    assert_eq!(recorded.view_queries[0]["type"], "output");
    assert_eq!(recorded.view_queries[1]["type"], "temp");
}

/// A targeted interrupt carries the prompt id; a bare one has no body.
#[tokio::test]
async fn interrupt_sends_optional_prompt_id() {
    let (url, state) = spawn_server().await;
    let api = ComfyUIApi::new(url);

    api.interrupt(Some("p-7")).await.unwrap();
    api.interrupt(None).await.unwrap();

    let recorded = state.lock().unwrap();
    let targeted: Value = serde_json::from_str(&recorded.interrupts[0]).unwrap();
    assert_eq!(targeted, json!({"prompt_id": "p-7"}));
    assert!(recorded.interrupts[1].is_empty());
}

/// Folder names become path segments.
#[tokio::test]
async fn list_models_for_folder() {
    let (url, _) = spawn_server().await;
    let api = ComfyUIApi::new(url);
    assert_eq!(
        api.list_models(Some("loras")).await.unwrap(),
        json!(["loras-a.safetensors"])
    );
}

/// Engine-side 5xx answers count as transport failures.
#[tokio::test]
async fn server_error_is_unavailable() {
    let (url, _) = spawn_server().await;
    let manager = ComfyUIManager::from_config(ComfyConfig {
        base_url: url,
        ..ComfyConfig::default()
    });
    let err = manager.list_extensions().await.unwrap_err();
    assert_matches!(err, ComfyError::RemoteUnreachable { status: Some(503), .. });
    assert_eq!(err.code(), "COMFY_UNAVAILABLE");
    assert_eq!(err.to_json()["details"]["status"], 503);
}

// ---------------------------------------------------------------------------
// Manager over HTTP
// ---------------------------------------------------------------------------

/// Validate, submit, poll and fetch the image end to end.
#[tokio::test]
async fn manager_runs_workflow_to_image_bytes() {
    let (url, state) = spawn_server().await;
    let manager = ComfyUIManager::from_config(ComfyConfig {
        base_url: url,
        ..ComfyConfig::default()
    });

    let output = manager.run(graph(), Some("9")).await.unwrap();
    assert_eq!(output.prompt_id, "p-1");
    assert_eq!(output.node_id, "9");
    assert_eq!(output.first().unwrap().bytes(), Some(IMAGE_BYTES));
    assert_eq!(manager.schema().version(), 1);

    let recorded = state.lock().unwrap();
    assert_eq!(recorded.prompts.len(), 1);
    assert_eq!(recorded.view_queries[0]["filename"], "out.png");
}

/// URL mode hands back a link built from the external base URL.
#[tokio::test]
async fn manager_url_mode_uses_external_base() {
    let (url, state) = spawn_server().await;
    let manager = ComfyUIManager::from_config(ComfyConfig {
        base_url: url,
        external_url: Some("https://comfy.example.com".into()),
        output_mode: comfyflow_comfyui::OutputMode::Url,
        ..ComfyConfig::default()
    });

    let output = manager.get_result("p-1", Some("9")).await.unwrap();
    assert_eq!(
        output.first().unwrap().url(),
        Some("https://comfy.example.com/view?filename=out.png&subfolder=&type=output")
    );
    assert!(state.lock().unwrap().view_queries.is_empty());
}

/// A graph failing validation never reaches `/prompt`.
#[tokio::test]
async fn manager_rejects_invalid_graph_before_submit() {
    let (url, state) = spawn_server().await;
    let manager = ComfyUIManager::from_config(ComfyConfig {
        base_url: url,
        ..ComfyConfig::default()
    });
    let broken = Graph::from_json(json!({
        "9": {"class_type": "SaveImage", "inputs": {"filename_prefix": "x"}}
    }))
    .unwrap();

    let err = manager.submit(&broken).await.unwrap_err();
    assert_matches!(err, ComfyError::Validation { ref findings } if findings.len() == 1);
    assert!(state.lock().unwrap().prompts.is_empty());
}
