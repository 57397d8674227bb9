use tokio_util::sync::CancellationToken;
use va_domain::error::Result;
use va_domain::stream::{BoxStream, ChatDelta, RawFrame};
use va_domain::tool::{Message, ToolDefinition};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A streaming chat completion request.
#[derive(Debug, Clone, Default)]
pub struct ChatRequest {
    /// The conversation messages to send. Must not be empty.
    pub messages: Vec<Message>,
    /// Tool definitions the model may invoke.
    pub tools: Vec<ToolDefinition>,
    /// Maximum tokens in the response. `None` uses the configured limit.
    pub max_tokens: Option<u32>,
    /// Model identifier override. `None` uses the configured model.
    pub model: Option<String>,
}

/// Raw frames of one completion.
///
/// The stream yields frames in arrival order and at most one `Err`, after
/// which it ends. A cancelled stream ends with `Err(Error::Cancelled)`.
pub type FrameStream = BoxStream<'static, Result<RawFrame>>;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Opens streaming completions against an LLM endpoint.
///
/// Transports are protocol-only: they hand out frames verbatim and leave
/// interpretation to [`ChatTransport::decode`].
#[async_trait::async_trait]
pub trait ChatTransport: Send + Sync {
    /// Open one streaming completion.
    ///
    /// Fails up front when the endpoint rejects the request (non-2xx, with
    /// the response body in the error) or when `cancel` fires before the
    /// response headers arrive.
    async fn stream_completion(
        &self,
        req: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<FrameStream>;

    /// Decode one frame into deltas. An `Err` means the frame is malformed
    /// and should be skipped.
    fn decode(&self, frame: &RawFrame) -> Result<Vec<ChatDelta>> {
        crate::openai_compat::decode_frame(frame.as_str())
    }

    /// The model requests are sent to when [`ChatRequest::model`] is unset.
    fn default_model(&self) -> &str;
}
