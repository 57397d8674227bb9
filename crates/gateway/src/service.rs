//! Assistant and history flows that span both stores.

use serde::Deserialize;

use va_domain::assistant::{Assistant, AssistantDraft};
use va_domain::error::{Error, Result};
use va_domain::history::{StoredTurn, TokenUsage, TurnInput, TurnOutput};
use va_domain::trace::TraceEvent;

use crate::state::AppState;

/// A turn saved by the caller rather than produced by the orchestrator.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualTurn {
    #[serde(default)]
    pub input: TurnInput,
    #[serde(default)]
    pub output: TurnOutput,
    /// Estimated from the texts when absent.
    #[serde(default)]
    pub usage: Option<TokenUsage>,
}

fn welcome_message(name: &str) -> String {
    format!("欢迎使用{name}！我已准备好为你提供帮助~")
}

fn reset_message(name: &str) -> String {
    format!("对话已重置，欢迎再次使用{name}！")
}

// ── Assistants ────────────────────────────────────────────────────────

/// Create an assistant and seed its history with a welcome turn.
pub async fn create_assistant(state: &AppState, draft: AssistantDraft) -> Result<Assistant> {
    let assistant = state.assistants.create(draft)?;

    let greeting = StoredTurn::greeting(&assistant.prompt, welcome_message(&assistant.name));
    state.history.append(&assistant.id, greeting).await?;

    TraceEvent::AssistantCreated {
        assistant_id: assistant.id.clone(),
        name: assistant.name.clone(),
    }
    .emit();
    Ok(assistant)
}

pub fn update_assistant(state: &AppState, id: &str, draft: AssistantDraft) -> Result<Assistant> {
    state.assistants.update(id, draft)
}

/// Delete an assistant and its history. A turn still streaming for it is
/// cancelled first; its finalizer will find the assistant gone and skip
/// the write.
pub async fn delete_assistant(state: &AppState, id: &str) -> Result<Assistant> {
    if state.cancel_map.cancel(id) {
        tracing::info!(assistant_id = %id, "cancelled in-flight turn of deleted assistant");
    }
    let removed = state.assistants.delete(id)?;
    state.history.delete_all(id).await?;

    TraceEvent::AssistantDeleted {
        assistant_id: id.to_owned(),
    }
    .emit();
    Ok(removed)
}

// ── History ───────────────────────────────────────────────────────────

pub async fn read_history(state: &AppState, id: &str) -> Result<Vec<StoredTurn>> {
    if !state.assistants.exists(id) {
        return Err(Error::AssistantNotFound(id.to_owned()));
    }
    state.history.get(id).await
}

/// Replace the whole history with a single reset greeting.
pub async fn reset_history(state: &AppState, id: &str) -> Result<Vec<StoredTurn>> {
    let name = state.assistants.get_name(id)?;
    let prompt = state.assistants.get_prompt(id)?;

    let greeting = StoredTurn::greeting(&prompt, reset_message(&name));
    let timestamp = greeting.created_at.clone();
    let removed = state.history.replace_all(id, greeting.clone()).await?;
    state.assistants.touch(id, &timestamp)?;

    tracing::info!(assistant_id = %id, removed, "history reset");
    Ok(vec![greeting])
}

/// Append a caller-supplied turn. The timestamp is always assigned here.
pub async fn save_turn(state: &AppState, id: &str, turn: ManualTurn) -> Result<StoredTurn> {
    if !state.assistants.exists(id) {
        return Err(Error::AssistantNotFound(id.to_owned()));
    }
    if turn.input.user_text.trim().is_empty() && turn.output.content.trim().is_empty() {
        return Err(Error::Validation(
            "a saved turn needs user text or assistant content".into(),
        ));
    }

    let usage = turn
        .usage
        .map(|u| TokenUsage::new(u.input_tokens, u.output_tokens))
        .unwrap_or_else(|| TokenUsage::estimate(&turn.input.user_text, &turn.output.content));
    let stored = StoredTurn::new(turn.input, turn.output, usage);
    let timestamp = stored.created_at.clone();

    state.history.append(id, stored.clone()).await?;
    state.assistants.touch(id, &timestamp)?;
    Ok(stored)
}
