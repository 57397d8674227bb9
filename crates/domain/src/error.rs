/// Shared error type used across all voiceassistant crates.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP: {0}")]
    Http(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("provider {provider}: {message}")]
    Provider { provider: String, message: String },

    #[error("search: {0}")]
    Search(String),

    /// The caller's cancellation signal fired before the operation finished.
    #[error("cancelled")]
    Cancelled,

    #[error("assistant not found: {0}")]
    AssistantNotFound(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("storage: {0}")]
    Storage(String),

    #[error("config: {0}")]
    Config(String),

    #[error("auth: {0}")]
    Auth(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}

pub type Result<T> = std::result::Result<T, Error>;
