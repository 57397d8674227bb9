mod chat;
mod llm;
mod search;
mod server;
mod storage;

pub use chat::*;
pub use llm::*;
pub use search::*;
pub use server::*;
pub use storage::*;

use serde::{Deserialize, Serialize};
use std::fmt;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Process configuration, loaded once at startup and shared as `Arc<Config>`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(default)]
    pub chat: ChatConfig,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Config validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl ConfigError {
    fn error(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Error,
            field: field.into(),
            message: message.into(),
        }
    }

    fn warning(field: &str, message: impl Into<String>) -> Self {
        Self {
            severity: ConfigSeverity::Warning,
            field: field.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError::error("server.port", "port must be greater than 0"));
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError::error("server.host", "host must not be empty"));
        }
        if self.server.max_concurrent_requests == 0 {
            errors.push(ConfigError::error(
                "server.max_concurrent_requests",
                "must be greater than 0",
            ));
        }

        if self.llm.base_url.is_empty() {
            errors.push(ConfigError::error("llm.base_url", "base_url must not be empty"));
        }
        if self.llm.model.is_empty() {
            errors.push(ConfigError::error("llm.model", "model must not be empty"));
        }
        if !self.llm.auth.is_configured() {
            errors.push(ConfigError::warning(
                "llm.auth",
                "no credential configured; chat requests will be sent unauthenticated",
            ));
        }

        if self.search.max_attempts == 0 {
            errors.push(ConfigError::error(
                "search.max_attempts",
                "at least one attempt is required",
            ));
        }
        if self.search.default_count == 0 {
            errors.push(ConfigError::error(
                "search.default_count",
                "must be greater than 0",
            ));
        }
        if !self.search.auth.is_configured() {
            errors.push(ConfigError::warning(
                "search.auth",
                "no credential configured; web search calls will fail",
            ));
        }

        if self.chat.heartbeat_secs == 0 {
            errors.push(ConfigError::error(
                "chat.heartbeat_secs",
                "heartbeat interval must be at least 1 second",
            ));
        }
        if self.chat.persist_timeout_secs == 0 {
            errors.push(ConfigError::error(
                "chat.persist_timeout_secs",
                "persistence deadline must be at least 1 second",
            ));
        }

        if !self.chat.query_rewrite_instruction.contains("{question}") {
            errors.push(ConfigError::warning(
                "chat.query_rewrite_instruction",
                "no {question} placeholder; the user text is appended to the instruction",
            ));
        }

        if self.server.cors.is_wildcard() {
            errors.push(ConfigError::warning(
                "server.cors.allowed_origins",
                "wildcard \"*\" allows all origins (not recommended for production)",
            ));
        }

        errors
    }
}
