use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Failures talking to the completion backend.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("model call failed: {status}: {body}")]
    Status { status: reqwest::StatusCode, body: String },
    #[error("could not decode response: {0}")]
    Decode(String),
    #[error("stream interrupted: {0}")]
    Stream(String),
    #[error("model returned no content")]
    Empty,
}

/// A persona record cannot be rendered into a system prompt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("persona '{persona_id}' is missing required field '{field}'")]
pub struct ConfigurationError {
    pub persona_id: String,
    pub field: &'static str,
}

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("persona not found: {0}")]
    PersonaNotFound(String),
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("upstream failure: {0}")]
    Upstream(#[from] CompletionError),
}

/// HTTP-facing error, reported as a 500 with a `detail` body.
#[derive(Debug)]
pub struct AppError(pub String);

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError(rejection.body_text())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({ "detail": format!("An error occurred: {}", self.0) });
        (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
    }
}
