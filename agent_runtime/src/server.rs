//! HTTP server exposing the orchestrator as unary, SSE and WebSocket endpoints.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, Query, State, WebSocketUpgrade},
    http::StatusCode,
    middleware,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Extension, Router,
};
use futures::StreamExt;
use serde::Serialize;
use serde_json::{json, Map, Value};
use tower_http::trace::TraceLayer;
use tracing::{error, info, instrument, warn};

use crate::{
    context::CallContext,
    error::{Error, ErrorKind},
    middleware::{create_body_limit_layer, create_cors_layer, request_id_middleware, RequestId},
    orchestrator::SequentialOrchestrator,
    settings::ServerConfig,
    stream::{sse_body_stream, sse_response},
    websocket,
};

/// Application state shared across HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub orchestrator: Arc<SequentialOrchestrator>,
    pub service_name: String,
    pub version: String,
    pub request_timeout: Duration,
    pub stream_timeout: Duration,
    pub cors_origins: Vec<String>,
    pub max_request_body_bytes: usize,
}

impl AppState {
    pub fn new(
        orchestrator: Arc<SequentialOrchestrator>,
        service_name: impl Into<String>,
        version: impl Into<String>,
        config: &ServerConfig,
    ) -> Self {
        Self {
            orchestrator,
            service_name: service_name.into(),
            version: version.into(),
            request_timeout: config.request_timeout(),
            stream_timeout: config.stream_timeout(),
            cors_origins: config.cors_origins.clone(),
            max_request_body_bytes: config.max_request_body_bytes,
        }
    }

    /// Route prefix `/{service_name}/{version}`
    pub fn base_path(&self) -> String {
        format!("/{}/{}", self.service_name, self.version)
    }

    /// Fresh call context that cancels itself after `timeout`
    pub(crate) fn call_context(request_id: RequestId, timeout: Duration) -> CallContext {
        let ctx = CallContext::with_request_id(request_id.0);
        ctx.cancel_after(timeout);
        ctx
    }
}

/// JSON error body returned by every failing endpoint
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    status: StatusCode,
    error: String,
    kind: String,
    request_id: String,
}

impl ApiError {
    pub fn from_error(err: &Error, request_id: RequestId) -> Self {
        let kind = err.kind();
        Self {
            status: status_for(kind),
            error: err.to_string(),
            kind: serde_json::to_value(kind)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default(),
            request_id: request_id.0.to_string(),
        }
    }

    pub fn bad_request(message: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            error: message.into(),
            kind: "invalid_request".to_string(),
            request_id: request_id.0.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::NotFound => StatusCode::NOT_FOUND,
        ErrorKind::Transport => StatusCode::BAD_GATEWAY,
        ErrorKind::Cancelled => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::Configuration
        | ErrorKind::Registry
        | ErrorKind::Parse
        | ErrorKind::Invocation => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Create the HTTP router with all endpoints and middleware
pub fn create_router(state: AppState) -> Router {
    let base = state.base_path();
    let cors_layer = create_cors_layer(&state.cors_origins);
    let body_limit_layer = create_body_limit_layer(state.max_request_body_bytes);

    // nested "/" answers on the bare base path
    let service_routes = Router::new()
        .route("/", post(invoke))
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .route("/sse", get(invoke_sse).post(invoke_sse))
        .route("/ws", get(invoke_ws))
        .route("/functions", get(list_functions));

    Router::new()
        .route("/health", get(health_check))
        .route("/health/ready", get(readiness_check))
        .nest(&base, service_routes)
        .with_state(state)
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(cors_layer)
        .layer(body_limit_layer)
}

fn status_body(state: &AppState, status: &str, request_id: RequestId) -> Json<Value> {
    Json(json!({
        "status": status,
        "service": state.service_name,
        "version": state.version,
        "request_id": request_id.0.to_string(),
    }))
}

async fn health_check(State(state): State<AppState>, Extension(request_id): Extension<RequestId>) -> Json<Value> {
    status_body(&state, "healthy", request_id)
}

async fn readiness_check(State(state): State<AppState>, Extension(request_id): Extension<RequestId>) -> Json<Value> {
    status_body(&state, "ready", request_id)
}

/// Unary invocation: the JSON body is the inputs object
#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn invoke(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    body: Result<Json<Map<String, Value>>, JsonRejection>,
) -> Response {
    let Json(inputs) = match body {
        Ok(body) => body,
        Err(rejection) => {
            warn!(error = %rejection, "Invalid invoke request body");
            return ApiError::bad_request(format!("invalid request body: {rejection}"), request_id).into_response();
        }
    };

    let ctx = AppState::call_context(request_id, state.request_timeout);
    let outcome = state.orchestrator.invoke(&ctx, inputs).await;
    ctx.cancel();

    match outcome {
        Ok(response) => {
            info!("Invoke request completed");
            Json(response).into_response()
        }
        Err(e) => {
            error!(error = %e, "Invoke request failed");
            ApiError::from_error(&e, request_id).into_response()
        }
    }
}

/// Inputs from the query string, or from a JSON body when the query is empty
fn stream_inputs(query: HashMap<String, String>, body: &Bytes) -> Result<Map<String, Value>, String> {
    if !query.is_empty() {
        return Ok(query.into_iter().map(|(k, v)| (k, Value::String(v))).collect());
    }
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(body).map_err(|e| format!("invalid request body: {e}"))
}

#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn invoke_sse(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    Query(query): Query<HashMap<String, String>>,
    body: Bytes,
) -> Response {
    let inputs = match stream_inputs(query, &body) {
        Ok(inputs) => inputs,
        Err(message) => return ApiError::bad_request(message, request_id).into_response(),
    };

    let ctx = AppState::call_context(request_id, state.stream_timeout);
    let rx = state.orchestrator.invoke_stream(ctx.clone(), inputs);

    // the producer is cancelled once the response body is dropped
    let guard = ctx.token().clone().drop_guard();
    let frames = sse_body_stream(rx).map(move |frame| {
        let _keep = &guard;
        frame
    });
    sse_response(frames)
}

async fn invoke_ws(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    ws: WebSocketUpgrade,
) -> Response {
    ws.on_upgrade(move |socket| websocket::handle_socket(socket, state, request_id))
}

#[instrument(skip_all, fields(request_id = %request_id.0))]
async fn list_functions(State(state): State<AppState>, Extension(request_id): Extension<RequestId>) -> Response {
    let ctx = AppState::call_context(request_id, state.request_timeout);
    let outcome = state.orchestrator.describe_functions(&ctx).await;
    ctx.cancel();

    match outcome {
        Ok(functions) => Json(functions).into_response(),
        Err(e) => {
            error!(error = %e, "Listing functions failed");
            ApiError::from_error(&e, request_id).into_response()
        }
    }
}

/// Bind `addr` and serve until Ctrl-C
pub async fn serve(state: AppState, addr: SocketAddr) -> anyhow::Result<()> {
    let base = state.base_path();
    let router = create_router(state);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, base = %base, "Server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!(error = %e, "Failed to listen for shutdown signal");
            }
            info!("Shutdown signal received");
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_map_to_statuses() {
        assert_eq!(status_for(ErrorKind::NotFound), StatusCode::NOT_FOUND);
        assert_eq!(status_for(ErrorKind::Transport), StatusCode::BAD_GATEWAY);
        assert_eq!(status_for(ErrorKind::Cancelled), StatusCode::GATEWAY_TIMEOUT);
        assert_eq!(status_for(ErrorKind::Configuration), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn api_error_carries_kind() {
        let id = RequestId(uuid::Uuid::nil());
        let err = ApiError::from_error(&Error::PluginNotFoundInCatalog("w".into()), id);
        assert_eq!(err.status, StatusCode::NOT_FOUND);
        assert_eq!(err.kind, "not_found");
        assert_eq!(err.request_id, uuid::Uuid::nil().to_string());
    }

    #[test]
    fn stream_inputs_prefer_query() {
        let mut query = HashMap::new();
        query.insert("topic".to_string(), "rust".to_string());
        let inputs = stream_inputs(query, &Bytes::from_static(b"{\"ignored\":1}")).unwrap();
        assert_eq!(inputs["topic"], json!("rust"));
        assert!(!inputs.contains_key("ignored"));

        let inputs = stream_inputs(HashMap::new(), &Bytes::from_static(b"{\"n\":1}")).unwrap();
        assert_eq!(inputs["n"], json!(1));

        assert!(stream_inputs(HashMap::new(), &Bytes::new()).unwrap().is_empty());
        assert!(stream_inputs(HashMap::new(), &Bytes::from_static(b"[1]")).is_err());
    }
}
