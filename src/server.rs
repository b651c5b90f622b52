//! HTTP JSON tool server.
//!
//! Exposes the query service to agents and editors as a small tool API.
//! Every tool in the [`ToolRegistry`] is dispatched through the same
//! `POST /tools/{name}` handler.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a registered tool by name |
//! | `GET`  | `/health` | Version, row counts, and cache statistics |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "missing required parameter: prompt" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `tool_error` (500).
//!
//! A retrieval failure is not an HTTP error: `api_doc_query` answers `200`
//! with `{"result": {"success": false, "error": "..."}}`.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted.

use apidoc_rag_core::cache::CacheStats;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::service::QueryService;
use crate::traits::{validate_params, ToolContext, ToolInfo, ToolRegistry};

/// Shared application state passed to all route handlers.
#[derive(Clone)]
pub struct AppState {
    service: Arc<QueryService>,
    tools: Arc<ToolRegistry>,
}

impl AppState {
    pub fn new(service: Arc<QueryService>, tools: ToolRegistry) -> Self {
        Self {
            service,
            tools: Arc::new(tools),
        }
    }
}

/// Load the knowledge base and serve the built-in tools on `[server].bind`.
///
/// Runs until the process is terminated. Fails before binding if the
/// knowledge base cannot be loaded.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    run_server_with_extensions(config, ToolRegistry::new()).await
}

/// Like [`run_server`], with extra Rust tools served after the built-ins.
pub async fn run_server_with_extensions(
    config: &Config,
    extra_tools: ToolRegistry,
) -> anyhow::Result<()> {
    let service = Arc::new(QueryService::load(config)?);

    let mut registry = ToolRegistry::with_builtins();
    for tool in extra_tools.into_tools() {
        registry.register(tool);
    }
    for t in registry.tools() {
        let tag = if t.is_builtin() { "builtin" } else { "rust" };
        tracing::info!(tool = t.name(), kind = tag, "registered tool");
    }

    let app = router(AppState::new(service, registry));

    let listener = tokio::net::TcpListener::bind(&config.server.bind).await?;
    println!("apidoc server listening on http://{}", listener.local_addr()?);
    axum::serve(listener, app).await?;

    Ok(())
}

/// The route table. Split out so tests can serve it on an ephemeral port.
pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(state)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn not_found(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::NOT_FOUND,
        code: "not_found".to_string(),
        message: message.into(),
    }
}

fn tool_error(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "tool_error".to_string(),
        message: message.into(),
    }
}

/// Map a tool failure to a status. Tools signal bad input through the
/// wording of their error, since the `Tool` trait returns `anyhow`.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    let msg = err.to_string();
    if msg.contains("invalid") || msg.contains("must not be empty") {
        bad_request(format!("{}: {}", tool_name, msg))
    } else {
        tool_error(format!("{}: {}", tool_name, msg))
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
    rows: RowCounts,
    cache: CacheReport,
}

#[derive(Serialize)]
struct RowCounts {
    classes: usize,
    methods: usize,
}

#[derive(Serialize)]
struct CacheReport {
    embedding: CacheStats,
    query: CacheStats,
}

async fn handle_health(State(state): State<AppState>) -> Json<HealthResponse> {
    let (classes, methods) = state.service.row_counts();
    let (embedding, query) = state.service.cache_stats();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        rows: RowCounts { classes, methods },
        cache: CacheReport { embedding, query },
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    let tools = state
        .tools
        .tools()
        .iter()
        .map(|t| ToolInfo::from_tool(t.as_ref()))
        .collect();
    Json(ToolListResponse { tools })
}

// ============ POST /tools/{name} ============

/// Look up the tool, validate the parameters against its schema, run it.
///
/// `404` for an unknown tool, `400` for parameter errors, `500` when the
/// tool itself fails.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    Json(params): Json<serde_json::Value>,
) -> Result<Json<serde_json::Value>, AppError> {
    let tool = state
        .tools
        .find(&name)
        .ok_or_else(|| not_found(format!("no tool registered with name: {}", name)))?;

    let validated = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| bad_request(e.to_string()))?;

    let ctx = ToolContext::new(state.service.clone());
    let result = tool
        .execute(validated, &ctx)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(serde_json::json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_tool_error() {
        let e = classify_tool_error("api_doc_query", anyhow::anyhow!("invalid class_top_k"));
        assert_eq!(e.status, StatusCode::BAD_REQUEST);
        assert_eq!(e.code, "bad_request");

        let e = classify_tool_error("api_doc_query", anyhow::anyhow!("socket closed"));
        assert_eq!(e.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(e.message.starts_with("api_doc_query: "));
    }
}
