//! Assistant CRUD endpoints.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;

use va_domain::assistant::{Assistant, AssistantDraft};

use super::{ok, parse_id, ApiResult};
use crate::service;
use crate::state::AppState;

/// Most recently active first.
pub async fn list(State(state): State<AppState>) -> ApiResult<Vec<Assistant>> {
    Ok(ok(state.assistants.list()))
}

pub async fn create(
    State(state): State<AppState>,
    body: Result<Json<AssistantDraft>, JsonRejection>,
) -> ApiResult<Assistant> {
    let Json(draft) = body?;
    let assistant = service::create_assistant(&state, draft).await?;
    tracing::info!(assistant_id = %assistant.id, name = %assistant.name, "assistant created");
    Ok(ok(assistant))
}

pub async fn update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<AssistantDraft>, JsonRejection>,
) -> ApiResult<Assistant> {
    let id = parse_id(&raw_id)?;
    let Json(draft) = body?;
    Ok(ok(service::update_assistant(&state, &id, draft)?))
}

pub async fn delete(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Assistant> {
    let id = parse_id(&raw_id)?;
    let removed = service::delete_assistant(&state, &id).await?;
    tracing::info!(assistant_id = %id, "assistant deleted");
    Ok(ok(removed))
}
