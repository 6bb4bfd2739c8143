use crate::backend::{BackendError, CompletionBackend};
use crate::config::AppConfig;
use crate::summarizer::{BatchSummarizer, SummarizeError};
use anyhow::{Context, Result};
use axum::{
    body::Bytes,
    extract::{Request, State},
    http::{header, HeaderMap, HeaderName, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

#[derive(Clone)]
pub struct AppState {
    pub config: AppConfig,
    pub backend: Arc<dyn CompletionBackend>,
    pub summarizer: BatchSummarizer,
}

impl AppState {
    pub fn new(config: AppConfig, backend: Arc<dyn CompletionBackend>) -> Self {
        let summarizer = BatchSummarizer::new(
            backend.clone(),
            config.system_prompt.clone(),
            config.max_tokens,
            config.batch_concurrency,
        );
        Self {
            config,
            backend,
            summarizer,
        }
    }
}

pub fn routes(state: AppState) -> Router {
    Router::new()
        // generation (both route names are served for the older frontends)
        .route("/api/generate", post(generate))
        .route("/api/proxy", post(generate))
        // misc
        .route("/health", get(health))
        .with_state(Arc::new(state))
}

/// The full middleware stack around [`routes`], shared by `main` and the
/// handler tests so both see identical CORS and OPTIONS behavior.
pub fn app(state: AppState) -> Result<Router> {
    let cors = cors_layer(&state.config)?;
    Ok(routes(state)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(middleware::from_fn(preflight_no_content)))
}

pub fn cors_layer(config: &AppConfig) -> Result<CorsLayer> {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            HeaderName::from_static("x-api-key"),
        ]);
    if config.cors_origin.trim() == "*" {
        return Ok(cors.allow_origin(Any));
    }
    let origins = config
        .cors_origin
        .split(',')
        .map(|origin| origin.trim().parse::<HeaderValue>())
        .collect::<Result<Vec<_>, _>>()
        .context("CORS_ORIGIN contains an invalid origin")?;
    Ok(cors.allow_origin(AllowOrigin::list(origins)))
}

// The CORS layer answers OPTIONS itself with 200; the deployed frontends
// expect 204, so the outermost layer rewrites the status.
async fn preflight_no_content(request: Request, next: Next) -> Response {
    let preflight = request.method() == Method::OPTIONS;
    let mut response = next.run(request).await;
    if preflight {
        *response.status_mut() = StatusCode::NO_CONTENT;
    }
    response
}

// -------------------------------------------------------------------
// Handlers

// The body is parsed by hand rather than through the `Json` extractor so
// that malformed JSON gets the same `{ text, error }` payload as every
// other client-facing failure.
async fn generate(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<GenerateResponse>, ApiError> {
    authorize(&state.config, &headers)?;
    let body: Value = serde_json::from_slice(&body).map_err(|err| {
        warn!("request rejected: body is not valid JSON: {err}");
        ApiError::validation("❌ El cuerpo debe ser un objeto JSON válido.")
    })?;
    let request = validate(&body)?;
    info!("received prompt: {}", prompt_preview(&request.prompt));

    let outcome = match &request.records {
        Some(records) => state.summarizer.summarize(&request.prompt, records).await,
        None => forward_prompt(&state, &request.prompt).await,
    };

    match outcome {
        Ok(text) => Ok(Json(GenerateResponse { text })),
        Err(err) => {
            error!("generation failed for prompt '{}': {err}", prompt_preview(&request.prompt));
            Err(ApiError::from(err))
        }
    }
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        model: state.config.model.clone(),
    })
}

// Plain proxy path for requests without records: one completion call.
async fn forward_prompt(state: &AppState, prompt: &str) -> Result<String, SummarizeError> {
    let text = state
        .backend
        .complete(&state.config.system_prompt, prompt, state.config.max_tokens)
        .await?;
    if text.is_empty() {
        return Err(SummarizeError::EmptyResult);
    }
    Ok(text)
}

// -------------------------------------------------------------------
// Validation & auth

struct GenerateRequest {
    prompt: String,
    records: Option<Vec<Value>>,
}

fn validate(body: &Value) -> Result<GenerateRequest, ApiError> {
    let prompt = body
        .get("prompt")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|prompt| !prompt.is_empty())
        .ok_or_else(|| {
            warn!("request rejected: missing or empty prompt");
            ApiError::validation("❌ El campo \"prompt\" es obligatorio.")
        })?;

    let records = match body.get("datos") {
        None | Some(Value::Null) => None,
        Some(Value::Array(items)) if items.is_empty() => {
            warn!("request rejected: empty records array");
            return Err(ApiError::validation("❌ El campo \"datos\" no puede estar vacío."));
        }
        Some(Value::Array(items)) => Some(items.clone()),
        Some(_) => {
            warn!("request rejected: records field is not a list");
            return Err(ApiError::validation("❌ El campo \"datos\" debe ser una lista."));
        }
    };

    Ok(GenerateRequest {
        prompt: prompt.to_string(),
        records,
    })
}

// No SECRET_TOKEN configured means the endpoint is open.
fn authorize(config: &AppConfig, headers: &HeaderMap) -> Result<(), ApiError> {
    let Some(expected) = config.secret_token.as_deref() else {
        return Ok(());
    };
    let provided = headers.get("x-api-key").and_then(|value| value.to_str().ok());
    if provided == Some(expected) {
        Ok(())
    } else {
        warn!("request rejected: missing or invalid x-api-key header");
        Err(ApiError::unauthorized())
    }
}

fn prompt_preview(prompt: &str) -> String {
    const LIMIT: usize = 200;
    match prompt.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &prompt[..cut]),
        None => prompt.to_string(),
    }
}

// -------------------------------------------------------------------
// DTOs & errors

#[derive(Serialize)]
pub struct GenerateResponse {
    pub text: String,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    model: String,
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    text: String,
    error: &'a str,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    kind: &'static str,
    text: String,
}

impl ApiError {
    fn new(status: StatusCode, kind: &'static str, text: impl Into<String>) -> Self {
        Self { status, kind, text: text.into() }
    }
    fn validation(msg: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "validation_error", msg)
    }
    fn unauthorized() -> Self {
        Self::new(StatusCode::UNAUTHORIZED, "auth_error", "Access denied")
    }
    // The upstream status is passed through when it is a real error code;
    // the message keeps the raw number either way.
    fn backend_status(status: u16) -> Self {
        let code = StatusCode::from_u16(status)
            .ok()
            .filter(|code| code.is_client_error() || code.is_server_error())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::new(code, "backend_error", format!("❌ Error del API: {status}"))
    }
    fn backend_unreachable() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "backend_error",
            "❌ Error al consultar la IA.",
        )
    }
    fn empty_result() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "empty_result",
            "⚠️ No se recibió una respuesta válida de la IA.",
        )
    }
    fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            "internal_error",
            "❌ Error al consultar la IA.",
        )
    }
}

impl From<BackendError> for ApiError {
    fn from(err: BackendError) -> Self {
        match err {
            BackendError::Status { status, .. } => ApiError::backend_status(status),
            BackendError::Transport(_) => ApiError::backend_unreachable(),
        }
    }
}

impl From<SummarizeError> for ApiError {
    fn from(err: SummarizeError) -> Self {
        match err {
            SummarizeError::Batch { source, .. }
            | SummarizeError::Combine { source, .. }
            | SummarizeError::Backend(source) => ApiError::from(source),
            SummarizeError::EmptyResult => ApiError::empty_result(),
            SummarizeError::Serialize(_) => ApiError::internal(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = Json(ErrorBody { text: self.text, error: self.kind });
        (self.status, body).into_response()
    }
}
