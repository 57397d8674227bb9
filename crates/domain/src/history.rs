//! Persisted conversation history.
//!
//! A [`StoredTurn`] is written once by the finalizer and never edited.
//! Field names on the wire match what the web client reads
//! (`send`, `gmt_create`, ...).

use serde::{Deserialize, Serialize};

use crate::stream::Usage;

/// Timestamp layout used for every persisted record.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Current local time in [`TIMESTAMP_FORMAT`].
pub fn now_timestamp() -> String {
    chrono::Local::now().format(TIMESTAMP_FORMAT).to_string()
}

/// What the caller sent for one turn.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnInput {
    /// System prompt override. Empty means "use the assistant's prompt".
    #[serde(default)]
    pub prompt: String,
    #[serde(default, rename = "send")]
    pub user_text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FinishReason {
    #[default]
    Stop,
    Abort,
    Error,
}

impl FinishReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FinishReason::Stop => "stop",
            FinishReason::Abort => "abort",
            FinishReason::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TurnOutput {
    #[serde(default)]
    pub finish_reason: FinishReason,
    #[serde(default)]
    pub content: String,
}

/// Token counters persisted with a turn. `total_tokens` is always
/// `input_tokens + output_tokens` when built through [`TokenUsage::new`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u32,
    #[serde(default)]
    pub output_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
            total_tokens: input_tokens + output_tokens,
        }
    }

    /// Rough estimate of four bytes per token, used when the endpoint
    /// reported nothing.
    pub fn estimate(input_text: &str, output_text: &str) -> Self {
        Self::new(estimate_tokens(input_text), estimate_tokens(output_text))
    }
}

impl From<Usage> for TokenUsage {
    fn from(u: Usage) -> Self {
        Self::new(u.prompt_tokens, u.completion_tokens)
    }
}

pub fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.len() / 4).unwrap_or(u32::MAX)
}

/// One persisted turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredTurn {
    pub input: TurnInput,
    pub output: TurnOutput,
    #[serde(default)]
    pub usage: TokenUsage,
    #[serde(rename = "gmt_create")]
    pub created_at: String,
}

impl StoredTurn {
    pub fn new(input: TurnInput, output: TurnOutput, usage: TokenUsage) -> Self {
        Self {
            input,
            output,
            usage,
            created_at: now_timestamp(),
        }
    }

    /// A greeting turn with no user text, used when an assistant is created
    /// or its history is reset.
    pub fn greeting(prompt: &str, content: impl Into<String>) -> Self {
        Self::new(
            TurnInput {
                prompt: prompt.to_owned(),
                user_text: String::new(),
            },
            TurnOutput {
                finish_reason: FinishReason::Stop,
                content: content.into(),
            },
            TokenUsage::default(),
        )
    }
}

/// The full history of one assistant, oldest turn first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct History {
    pub assistant_id: String,
    pub messages: Vec<StoredTurn>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_usage_total_is_sum() {
        let u = TokenUsage::new(12, 30);
        assert_eq!(u.total_tokens, 42);
    }

    #[test]
    fn estimate_is_quarter_of_bytes() {
        let u = TokenUsage::estimate("12345678", "abcd");
        assert_eq!(u.input_tokens, 2);
        assert_eq!(u.output_tokens, 1);
        assert_eq!(u.total_tokens, 3);
    }

    #[test]
    fn provider_usage_recomputes_total() {
        let u: TokenUsage = Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 99,
        }
        .into();
        assert_eq!(u.total_tokens, 15);
    }

    #[test]
    fn stored_turn_uses_client_field_names() {
        let turn = StoredTurn::greeting("be nice", "hello");
        let json = serde_json::to_value(&turn).unwrap();
        assert_eq!(json["input"]["send"], "");
        assert_eq!(json["output"]["finish_reason"], "stop");
        assert!(json["gmt_create"].is_string());
    }

    #[test]
    fn timestamp_has_expected_layout() {
        let ts = now_timestamp();
        assert!(chrono::NaiveDateTime::parse_from_str(&ts, TIMESTAMP_FORMAT).is_ok());
    }
}
