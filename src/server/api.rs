//! HTTP API server implementation

use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde_json::Value;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use utoipa::OpenApi;

use crate::core::engine::SharedEngine;
use crate::core::models::{ErrorResponse, HealthResponse, TranslationRequest, TranslationResponse};

/// Application state
#[derive(Clone)]
pub struct AppState {
    engine: SharedEngine,
    model_name: Arc<str>,
}

impl AppState {
    pub fn new(engine: SharedEngine) -> Self {
        let model_name = Arc::from(engine.model_name());
        Self { engine, model_name }
    }
}

/// Everything `/translate` can answer with besides a translation
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("No JSON data provided")]
    NoJsonData,

    #[error("Missing text field")]
    MissingText,

    #[error("Text must be a string")]
    TextNotString,

    #[error("Text cannot be empty")]
    EmptyText,

    /// Raw message of whatever went wrong during inference
    #[error("{0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!("Translation failed: {}", self);
        } else {
            debug!("Rejected request: {}", self);
        }
        (status, Json(ErrorResponse { error: self.to_string() })).into_response()
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(health_check, translate),
    components(schemas(HealthResponse, TranslationRequest, TranslationResponse, ErrorResponse))
)]
struct ApiDoc;

/// JSON the way a lenient form handler sees it: empty values count as no data
fn is_empty_json(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

/// Validate a raw request body and return the text to translate
pub fn validate_body(body: &[u8]) -> Result<String, ApiError> {
    let value: Value = serde_json::from_slice(body).map_err(|_| ApiError::NoJsonData)?;
    if is_empty_json(&value) {
        return Err(ApiError::NoJsonData);
    }

    let text = value
        .as_object()
        .and_then(|object| object.get("text"))
        .ok_or(ApiError::MissingText)?;

    let text = text.as_str().ok_or(ApiError::TextNotString)?;
    if text.trim().is_empty() {
        return Err(ApiError::EmptyText);
    }

    Ok(text.to_string())
}

/// Health check handler
#[utoipa::path(
    get,
    path = "/health",
    responses((status = 200, description = "Server is up", body = HealthResponse))
)]
async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse::healthy(state.model_name.as_ref()))
}

/// Translation handler
#[utoipa::path(
    post,
    path = "/translate",
    request_body = TranslationRequest,
    responses(
        (status = 200, description = "Translated text", body = TranslationResponse),
        (status = 400, description = "Invalid request body", body = ErrorResponse),
        (status = 500, description = "Inference failed", body = ErrorResponse)
    )
)]
async fn translate(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<TranslationResponse>, ApiError> {
    let source_text = validate_body(&body)?;
    debug!("Translating {} chars", source_text.chars().count());

    let engine = state.engine.clone();
    let text = source_text.clone();
    let translated_text = tokio::task::spawn_blocking(move || engine.translate(&text))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    Ok(Json(TranslationResponse {
        source_text,
        translated_text,
    }))
}

/// OpenAPI document handler
async fn openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route("/translate", post(translate))
        .route("/api-docs/openapi.json", get(openapi))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server
pub async fn run_server(engine: SharedEngine, host: &str, port: u16) -> anyhow::Result<()> {
    let app = router(AppState::new(engine));

    // Bind address
    let addr: SocketAddr = format!("{}:{}", host, port).parse()?;

    info!("Starting server on {}", addr);

    // Start server
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
