//! Chat transport for OpenAI-compatible streaming endpoints.

pub mod openai_compat;
pub mod traits;
pub(crate) mod sse;
pub(crate) mod util;

// Re-exports for convenience.
pub use openai_compat::{decode_frame, OpenAiCompatTransport};
pub use traits::{ChatRequest, ChatTransport, FrameStream};
pub use util::from_reqwest;
