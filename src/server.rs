use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use crate::chat::ChatService;
use crate::config::AppConfig;
use crate::models::{ChatRequest, ChatResponse, HealthResponse};

pub const PUBLIC_DIR: &str = "public";

#[derive(Clone)]
struct AppState {
    config: Arc<AppConfig>,
    chat: ChatService,
}

pub async fn run_server(config: AppConfig, chat: ChatService) -> Result<()> {
    let public_dir = PathBuf::from(PUBLIC_DIR);
    tokio::fs::create_dir_all(&public_dir)
        .await
        .with_context(|| format!("failed to create {}", public_dir.display()))?;

    let listener = bind(&config).await?;
    tracing::info!("listening on http://{}", listener.local_addr()?);

    let app = router(config, chat, &public_dir);
    axum::serve(listener, app).await?;
    Ok(())
}

/// Binds `HOST:PORT`; host names and IPv6 literals are resolved by the OS.
pub async fn bind(config: &AppConfig) -> Result<TcpListener> {
    TcpListener::bind((config.host.as_str(), config.port))
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr()))
}

pub fn router(config: AppConfig, chat: ChatService, public_dir: &Path) -> Router {
    let state = AppState {
        config: Arc::new(config),
        chat,
    };

    Router::new()
        .route("/health", get(health))
        .route("/chat", post(chat_handler))
        .fallback_service(ServeDir::new(public_dir))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    let provider = state.config.provider_name.clone();

    match state.chat.index().get().await {
        Ok(_) => Json(HealthResponse::Ok {
            provider,
            llm: state.config.llm_model().to_string(),
            embed: state.config.embed_model().to_string(),
        }),
        Err(err) => {
            tracing::warn!("health check failed: {}", err);
            Json(HealthResponse::Error {
                detail: err.to_string(),
                provider,
            })
        }
    }
}

async fn chat_handler(
    State(state): State<AppState>,
    Json(request): Json<ChatRequest>,
) -> Result<Json<ChatResponse>, ApiError> {
    let response = state.chat.answer(request).await?;
    Ok(Json(response))
}

#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl From<anyhow::Error> for ApiError {
    fn from(value: anyhow::Error) -> Self {
        tracing::error!("chat request failed: {:#}", value);
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: value.to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": self.message });
        (self.status, Json(body)).into_response()
    }
}
