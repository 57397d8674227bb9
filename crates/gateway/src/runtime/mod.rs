//! Core runtime: the streaming conversation orchestrator and its parts.
//!
//! Entry point: [`Orchestrator::start_turn`] builds the prompt for one user
//! input and returns a channel of [`TurnEvent`]s suitable for SSE or
//! non-streaming aggregation.

pub mod accumulator;
pub mod cancel;
pub mod finalize;
pub mod merge;
pub mod orchestrator;

use serde_json::{json, Value};

use va_domain::history::{FinishReason, StoredTurn};

pub use cancel::CancelMap;
pub use orchestrator::{Orchestrator, TurnHandle, TurnRequest};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// TurnEvent
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events emitted during one turn. `Finished` is always the last event.
#[derive(Debug, Clone)]
pub enum TurnEvent {
    /// A fragment of assistant text, in the order the model produced it.
    Content { text: String },
    Finished(TurnOutcome),
}

/// The end state of a turn.
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The record handed to the finalizer.
    pub turn: StoredTurn,
    /// Set when generation failed.
    pub error: Option<String>,
    /// Whether the record reached the history store.
    pub persisted: bool,
}

impl TurnEvent {
    /// The JSON payload of this event on the streaming endpoint.
    pub fn to_wire(&self) -> Value {
        match self {
            TurnEvent::Content { text } => json!({ "content": text }),
            TurnEvent::Finished(outcome) => match &outcome.error {
                Some(message) => json!({ "error": message }),
                None => json!({ "done": true, "usage": outcome.turn.usage }),
            },
        }
    }
}

impl TurnOutcome {
    pub fn finish_reason(&self) -> FinishReason {
        self.turn.output.finish_reason
    }
}
