pub mod assistants;
pub mod cors;
pub mod history;

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Serialize;

use va_domain::error::Error;

use crate::state::AppState;

/// Build the full API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health))
        // Assistants
        .route(
            "/api/voice-robot/v1/assistant",
            get(assistants::list).post(assistants::create),
        )
        .route(
            "/api/voice-robot/v1/assistant/:id",
            patch(assistants::update).delete(assistants::delete),
        )
        // History
        .route(
            "/api/voice-robot/v1/history/:assistant_id",
            get(history::read)
                .post(history::save)
                .delete(history::reset),
        )
        // Turns
        .route(
            "/api/voice-robot/v1/history/:assistant_id/stream-process",
            post(history::stream_process),
        )
        .route(
            "/api/voice-robot/v1/history/:assistant_id/process",
            post(history::process),
        )
        .route(
            "/api/voice-robot/v1/history/:assistant_id/stop",
            post(history::stop),
        )
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Response envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// `{success, msg, code, data}`; `data` is null on failure.
#[derive(Debug, Serialize)]
pub struct Envelope<T> {
    pub success: bool,
    pub msg: String,
    pub code: u16,
    pub data: Option<T>,
}

pub type ApiResult<T> = Result<Json<Envelope<T>>, ApiError>;

pub fn ok<T: Serialize>(data: T) -> Json<Envelope<T>> {
    Json(Envelope {
        success: true,
        msg: "success".into(),
        code: StatusCode::OK.as_u16(),
        data: Some(data),
    })
}

/// A domain error on its way out of a handler.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match &self.0 {
            Error::AssistantNotFound(_) => StatusCode::NOT_FOUND,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        self.0.to_string()
    }
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        Self(e)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::Validation(rejection.body_text()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        } else {
            tracing::debug!(error = %self.0, status = status.as_u16(), "request rejected");
        }
        let body = Envelope::<()> {
            success: false,
            msg: self.message(),
            code: status.as_u16(),
            data: None,
        };
        (status, Json(body)).into_response()
    }
}

/// Ids in paths must be UUIDs. Returns the canonical hyphenated form.
pub fn parse_id(raw: &str) -> Result<String, ApiError> {
    uuid::Uuid::parse_str(raw)
        .map(|id| id.to_string())
        .map_err(|_| ApiError(Error::Validation(format!("invalid id: {raw}"))))
}
