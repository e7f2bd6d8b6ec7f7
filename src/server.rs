use axum::extract::rejection::JsonRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Path, State};
use axum::http::HeaderValue;
use axum::response::IntoResponse;
use axum::{routing::{get, post}, Json, Router};
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, sync::Arc};
use tower_http::cors::{AllowOrigin, Any, CorsLayer};

use crate::error::AppError;
use crate::gateway::ChatGateway;
use crate::models::CompletionService;
use crate::persona::{PersonaCatalog, PersonaRecord};
use crate::prompt::PromptBuilder;
use crate::session::{Message, SessionStore};
use crate::summary::SummaryService;

#[derive(Clone)]
pub struct AppState {
    pub catalog: Arc<PersonaCatalog>,
    pub prompts: PromptBuilder,
    pub sessions: Arc<SessionStore>,
    pub completion: Arc<dyn CompletionService>,
    pub summaries: SummaryService,
}

impl AppState {
    pub fn new(catalog: PersonaCatalog, completion: Arc<dyn CompletionService>) -> Self {
        Self {
            catalog: Arc::new(catalog),
            prompts: PromptBuilder,
            sessions: Arc::new(SessionStore::new()),
            summaries: SummaryService::new(completion.clone()),
            completion,
        }
    }
}

async fn list_characters(State(state): State<AppState>) -> Json<Vec<PersonaRecord>> {
    Json(state.catalog.list().to_vec())
}

#[derive(Debug, Deserialize)]
pub struct SummaryRequest {
    pub history: Vec<Message>,
    /// Accepted for client compatibility; summaries do not depend on the persona.
    #[serde(default)]
    pub character_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SummaryResponse {
    pub summary: String,
}

async fn create_chat_summary(
    State(state): State<AppState>,
    payload: Result<Json<SummaryRequest>, JsonRejection>,
) -> Result<Json<SummaryResponse>, AppError> {
    let Json(body) = payload?;
    tracing::debug!(character = body.character_id.as_deref().unwrap_or("-"), messages = body.history.len(), "summary requested");
    let summary = state.summaries.summarize(&body.history).await;
    Ok(Json(SummaryResponse { summary }))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    sessions: usize,
}

async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok", sessions: state.sessions.len() })
}

async fn chat_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path(character_id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| ChatGateway::new(character_id, state).run(socket))
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/characters", get(list_characters))
        .route("/chat/summary", post(create_chat_summary))
        .route("/health", get(health))
        .route("/ws/:character_id", get(chat_socket))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let allowed: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(v) => Some(v),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(allowed))
        .allow_methods(Any)
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "could not install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

pub async fn serve(addr: SocketAddr, state: AppState, origins: &[String]) -> anyhow::Result<()> {
    let app = router(state).layer(cors_layer(origins));

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "listening");
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    Ok(())
}
