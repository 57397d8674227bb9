use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// One server-sent unit exactly as the endpoint delivered it (the payload of
/// a `data:` line). Transports never interpret frames.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawFrame(pub String);

impl RawFrame {
    pub fn new(data: impl Into<String>) -> Self {
        Self(data.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// A decoded piece of one streamed model turn.
///
/// A single frame may decode to several deltas (e.g. content plus a
/// tool-call fragment), or to none at all (keep-alives, the end sentinel).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatDelta {
    /// Literal assistant text.
    Content { text: String },

    /// Part of a tool call. `id` and `name` are usually present only on the
    /// first fragment for a given `index`.
    ToolCallFragment {
        index: usize,
        id: Option<String>,
        name: Option<String>,
        arguments: String,
    },

    /// Token accounting reported by the endpoint.
    Usage(Usage),

    /// An in-band error object sent by the endpoint.
    Error { message: String },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    /// Sum two phases of the same turn.
    pub fn merge(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}
