//! Shared fixtures: a scripted completion client and an OpenAPI backend.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use agent_runtime::{
    completion::{ChatResponse, CompletionRequest, DeltaStream, TokenUsage, ToolCall},
    ChatCompletion, CompletionFactory, Error, Result,
};
use async_trait::async_trait;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use parking_lot::Mutex;
use serde_json::{json, Value};

/// Completion client that replays queued responses, then answers every
/// request with `result:<task>` taken from the prompt's context block.
#[derive(Default)]
pub struct Scripted {
    queue: Mutex<VecDeque<ChatResponse>>,
    pub requests: Mutex<Vec<CompletionRequest>>,
    pub delay: Option<Duration>,
}

impl Scripted {
    pub fn new(responses: Vec<ChatResponse>) -> Self {
        Self {
            queue: Mutex::new(responses.into()),
            ..Self::default()
        }
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }
}

pub fn usage(total: u64) -> TokenUsage {
    TokenUsage {
        prompt_tokens: total / 2,
        completion_tokens: total - total / 2,
        total_tokens: total,
    }
}

pub fn tool_call(id: &str, name: &str, arguments: Value) -> ChatResponse {
    ChatResponse {
        content: String::new(),
        usage: usage(2),
        tool_calls: vec![ToolCall {
            id: id.into(),
            name: name.into(),
            arguments: arguments.to_string(),
        }],
    }
}

pub fn answer(content: &str) -> ChatResponse {
    ChatResponse {
        content: content.into(),
        usage: usage(2),
        tool_calls: Vec::new(),
    }
}

/// Context object the agent appended to its last user message
pub fn prompt_context(request: &CompletionRequest) -> Value {
    request
        .messages
        .iter()
        .rev()
        .find_map(|m| m.content.as_deref().and_then(|c| c.split_once("Context:\n")))
        .and_then(|(_, json)| serde_json::from_str(json).ok())
        .unwrap_or(Value::Null)
}

#[async_trait]
impl ChatCompletion for Scripted {
    async fn complete(&self, request: &CompletionRequest) -> Result<ChatResponse> {
        self.requests.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(response) = self.queue.lock().pop_front() {
            return Ok(response);
        }
        let context = prompt_context(request);
        let task = context["task"].as_str().unwrap_or("?");
        if task == "explode" {
            return Err(Error::Completion("model refused".into()));
        }
        Ok(answer(&format!("result:{task}")))
    }

    async fn complete_stream(&self, _request: &CompletionRequest) -> Result<DeltaStream> {
        Err(Error::Completion("streaming not scripted".into()))
    }
}

/// Hands the same scripted client to every agent
pub struct ScriptedFactory(pub Arc<Scripted>);

impl CompletionFactory for ScriptedFactory {
    fn client_for(&self, _model: &str) -> Result<Arc<dyn ChatCompletion>> {
        Ok(self.0.clone())
    }
}

pub fn openapi_document(server_url: &str) -> Value {
    json!({
        "openapi": "3.0.0",
        "info": { "title": "Items", "description": "Inventory of items" },
        "servers": [{ "url": server_url }],
        "paths": {
            "/items/{id}": {
                "parameters": [
                    { "name": "id", "in": "path", "schema": { "type": "integer" } }
                ],
                "get": {
                    "operationId": "getItem",
                    "summary": "Fetch one item",
                    "parameters": [
                        { "name": "verbose", "in": "query", "schema": { "type": "boolean" } }
                    ]
                },
                "delete": {
                    "summary": "Unnamed operation"
                }
            },
            "/items": {
                "post": {
                    "operationId": "createItem",
                    "description": "Create an item",
                    "requestBody": {
                        "content": {
                            "application/json": {
                                "schema": {
                                    "type": "object",
                                    "required": ["name"],
                                    "properties": {
                                        "name": { "type": "string" },
                                        "price": { "type": "number" }
                                    }
                                }
                            }
                        }
                    }
                }
            }
        }
    })
}

async fn serve_document(State(addr): State<SocketAddr>) -> Json<Value> {
    Json(openapi_document(&format!("http://{addr}")))
}

async fn get_item(Path(id): Path<i64>) -> Response {
    if id == 0 {
        return (StatusCode::NOT_FOUND, "missing").into_response();
    }
    Json(json!({ "id": id, "name": "widget" })).into_response()
}

async fn create_item(Json(mut body): Json<Value>) -> Response {
    body["id"] = json!(7);
    (StatusCode::CREATED, Json(body)).into_response()
}

async fn delete_item() -> StatusCode {
    StatusCode::NO_CONTENT
}

/// Answers long after any test would wait; not listed in the document
async fn slow_item() -> Json<Value> {
    tokio::time::sleep(Duration::from_secs(10)).await;
    Json(json!({ "late": true }))
}

/// Start the OpenAPI backend on an ephemeral port
pub async fn spawn_backend() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let router = Router::new()
        .route("/openapi.json", get(serve_document))
        .route("/items/:id", get(get_item).delete(delete_item))
        .route("/items", axum::routing::post(create_item))
        .route("/slow", get(slow_item))
        .with_state(addr);
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    addr
}
