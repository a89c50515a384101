//! JSON HTTP API over the tool registry.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/tools/list` | List all registered tools with schemas |
//! | `POST` | `/tools/{name}` | Call a tool by name |
//! | `GET`  | `/health` | Health check (returns version) |
//!
//! # Authentication
//!
//! Nothing is cached between requests. Each call builds its own
//! [`RequestContext`] from the headers:
//!
//! - `Authorization: Bearer <token>` → bearer token
//! - `X-Registry: s3://bucket` → registry override
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "package not found: team/x", "resource": "package", "id": "team/x" } }
//! ```
//!
//! | Code | Status |
//! |------|--------|
//! | `authentication_error` | 401 |
//! | `unsupported_operation` | 501 |
//! | `not_found` | 404 |
//! | `validation_error`, `bad_request` | 400 |
//! | `backend_error`, `search_unavailable` | 502 |
//! | `tool_error` | 500 |

use axum::{
    extract::{Path, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::Instrument;

use crate::error::OpsError;
use crate::resolver::{RequestContext, Resolver};
use crate::tools::{validate_params, ToolContext, ToolInfo, ToolRegistry};

pub const REGISTRY_HEADER: &str = "x-registry";

#[derive(Clone)]
struct AppState {
    resolver: Arc<Resolver>,
    tools: Arc<ToolRegistry>,
}

/// Serve the built-in tools on `[server].bind` until the process exits.
pub async fn run_server(resolver: Arc<Resolver>) -> anyhow::Result<()> {
    run_server_with_tools(resolver, ToolRegistry::with_builtins()).await
}

/// Serve an explicit tool registry.
pub async fn run_server_with_tools(resolver: Arc<Resolver>, tools: ToolRegistry) -> anyhow::Result<()> {
    let bind_addr = resolver.config().server.bind.clone();
    for t in tools.tools() {
        tracing::debug!(tool = t.name(), "registered tool");
    }
    let app = router(resolver, Arc::new(tools));

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    tracing::info!(bind = %bind_addr, "tool server listening");
    axum::serve(listener, app).await?;
    Ok(())
}

/// The application router, without binding a socket.
pub fn router(resolver: Arc<Resolver>, tools: Arc<ToolRegistry>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/tools/list", get(handle_list_tools))
        .route("/tools/{name}", post(handle_tool_call))
        .route("/health", get(handle_health))
        .layer(cors)
        .with_state(AppState { resolver, tools })
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: Value,
}

struct AppError {
    status: StatusCode,
    detail: Value,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.detail })).into_response()
    }
}

fn plain_error(status: StatusCode, code: &str, message: impl Into<String>) -> AppError {
    AppError {
        status,
        detail: json!({ "code": code, "message": message.into() }),
    }
}

fn status_for(err: &OpsError) -> StatusCode {
    match err {
        OpsError::Authentication { .. } => StatusCode::UNAUTHORIZED,
        OpsError::UnsupportedOperation { .. } => StatusCode::NOT_IMPLEMENTED,
        OpsError::NotFound { .. } => StatusCode::NOT_FOUND,
        OpsError::Validation { .. } => StatusCode::BAD_REQUEST,
        OpsError::Backend { .. } | OpsError::SearchUnavailable { .. } => StatusCode::BAD_GATEWAY,
    }
}

/// Map a tool failure to a response. Typed operation errors keep their
/// code and detail; anything else is a generic tool error.
fn classify_tool_error(tool_name: &str, err: anyhow::Error) -> AppError {
    match err.downcast_ref::<OpsError>() {
        Some(ops) => {
            if matches!(ops, OpsError::Backend { .. } | OpsError::SearchUnavailable { .. }) {
                tracing::warn!(tool = tool_name, error = %ops, "tool call failed");
            }
            AppError {
                status: status_for(ops),
                detail: ops.to_json(),
            }
        }
        None => {
            tracing::error!(tool = tool_name, error = %err, "tool call failed");
            plain_error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "tool_error",
                format!("{}: {}", tool_name, err),
            )
        }
    }
}

/// Per-request auth inputs from headers. Blank values count as absent.
pub fn request_context(headers: &HeaderMap) -> RequestContext {
    let bearer_token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| {
            v.strip_prefix("Bearer ")
                .or_else(|| v.strip_prefix("bearer "))
        })
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(String::from);
    let registry_override = headers
        .get(REGISTRY_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|r| !r.is_empty())
        .map(String::from);
    RequestContext {
        bearer_token,
        registry_override,
        ..RequestContext::default()
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ GET /tools/list ============

#[derive(Serialize)]
struct ToolListResponse {
    tools: Vec<ToolInfo>,
}

async fn handle_list_tools(State(state): State<AppState>) -> Json<ToolListResponse> {
    Json(ToolListResponse {
        tools: state.tools.info(),
    })
}

// ============ POST /tools/{name} ============

/// Returns `404` for an unknown tool, `400` for parameters that do not
/// match the schema, and the mapped status of any operation error.
async fn handle_tool_call(
    State(state): State<AppState>,
    Path(name): Path<String>,
    headers: HeaderMap,
    Json(params): Json<Value>,
) -> Result<Json<Value>, AppError> {
    let tool = state.tools.find(&name).ok_or_else(|| {
        plain_error(
            StatusCode::NOT_FOUND,
            "not_found",
            format!("no tool registered with name: {}", name),
        )
    })?;

    let params = validate_params(&tool.parameters_schema(), &params)
        .map_err(|e| plain_error(StatusCode::BAD_REQUEST, "bad_request", e.to_string()))?;

    let ctx = ToolContext::new(state.resolver.clone(), request_context(&headers));
    let span = tracing::info_span!("tool_call", tool = %name, request_id = %uuid::Uuid::new_v4());
    let result = tool
        .execute(params, &ctx)
        .instrument(span)
        .await
        .map_err(|e| classify_tool_error(&name, e))?;

    Ok(Json(json!({ "result": result })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackendKind;
    use axum::http::HeaderValue;

    #[test]
    fn test_request_context_from_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        headers.insert(REGISTRY_HEADER, HeaderValue::from_static("s3://team"));
        let ctx = request_context(&headers);
        assert_eq!(ctx.bearer_token.as_deref(), Some("abc.def"));
        assert_eq!(ctx.registry_override.as_deref(), Some("s3://team"));
    }

    #[test]
    fn test_blank_headers_are_absent() {
        let mut headers = HeaderMap::new();
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer   "));
        headers.insert(REGISTRY_HEADER, HeaderValue::from_static(""));
        let ctx = request_context(&headers);
        assert!(ctx.bearer_token.is_none());
        assert!(ctx.registry_override.is_none());
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            status_for(&OpsError::unsupported(BackendKind::CredentialOnly, "x")),
            StatusCode::NOT_IMPLEMENTED
        );
        assert_eq!(
            status_for(&OpsError::not_found("package", "a/b")),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_for(&OpsError::SearchUnavailable { failures: vec![] }),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn test_classify_keeps_ops_detail() {
        let err = anyhow::Error::new(OpsError::validation("query", "empty"));
        let app = classify_tool_error("search_catalog", err);
        assert_eq!(app.status, StatusCode::BAD_REQUEST);
        assert_eq!(app.detail["field"], "query");

        let app = classify_tool_error("x", anyhow::anyhow!("boom"));
        assert_eq!(app.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(app.detail["code"], "tool_error");
    }
}
