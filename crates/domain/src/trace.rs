use serde::Serialize;

/// Structured trace events emitted across all voiceassistant crates.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event")]
pub enum TraceEvent {
    LlmRequest {
        model: String,
        phase: u8,
        with_tools: bool,
        messages: usize,
    },
    SearchAttempt {
        query: String,
        attempt: u32,
        results: usize,
        error: Option<String>,
    },
    ToolExecuted {
        tool_name: String,
        call_id: String,
        output_chars: usize,
    },
    TurnFinalized {
        assistant_id: String,
        finish_reason: String,
        content_chars: usize,
        total_tokens: u32,
    },
    HistoryAppend {
        assistant_id: String,
        turns: usize,
    },
    HistoryReset {
        assistant_id: String,
        removed: usize,
    },
    AssistantCreated {
        assistant_id: String,
        name: String,
    },
    AssistantDeleted {
        assistant_id: String,
    },
}

impl TraceEvent {
    pub fn emit(&self) {
        let json = serde_json::to_string(self).unwrap_or_default();
        tracing::info!(trace_event = %json, "va_event");
    }
}
