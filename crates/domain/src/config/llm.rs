use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM endpoint
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The single OpenAI-compatible chat-completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL; `/chat/completions` is appended.
    #[serde(default = "d_llm_base_url")]
    pub base_url: String,
    #[serde(default = "d_model")]
    pub model: String,
    #[serde(default = "d_2000")]
    pub max_tokens: u32,
    /// Whole-request timeout for one streaming call.
    #[serde(default = "d_120")]
    pub timeout_sec: u64,
    #[serde(default)]
    pub auth: AuthConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_base_url(),
            model: d_model(),
            max_tokens: d_2000(),
            timeout_sec: d_120(),
            auth: AuthConfig::default(),
        }
    }
}

/// Where to find a bearer credential.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AuthConfig {
    /// Env var containing the key.
    #[serde(default)]
    pub env: Option<String>,
    /// Direct key. `${VAR}` placeholders are substituted from the environment.
    #[serde(default)]
    pub key: Option<String>,
}

impl AuthConfig {
    pub fn is_configured(&self) -> bool {
        self.env.is_some() || self.key.is_some()
    }

    /// Resolve the credential.
    ///
    /// Precedence:
    /// 1. `key` field, with `${VAR}` placeholders expanded
    /// 2. `env` field (reads environment variable)
    /// 3. Error
    pub fn resolve(&self) -> Result<String> {
        if let Some(ref key) = self.key {
            let expanded = expand_env_placeholders(key);
            if expanded.is_empty() {
                return Err(Error::Auth(format!(
                    "key '{key}' expanded to an empty value"
                )));
            }
            if expanded == *key && !key.contains("${") {
                tracing::warn!(
                    "API key loaded from plaintext config field 'key', prefer 'env' instead"
                );
            }
            return Ok(expanded);
        }

        if let Some(ref env_var) = self.env {
            return std::env::var(env_var).map_err(|_| {
                Error::Auth(format!(
                    "environment variable '{env_var}' not set or not valid UTF-8"
                ))
            });
        }

        Err(Error::Auth(
            "no API key configured: set 'key' or 'env' in the auth table".into(),
        ))
    }
}

/// Replace every `${VAR}` with the value of `VAR`. Unset variables expand
/// to the empty string.
pub fn expand_env_placeholders(raw: &str) -> String {
    static PLACEHOLDER: OnceLock<Option<Regex>> = OnceLock::new();
    let re = PLACEHOLDER.get_or_init(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());
    match re {
        Some(re) => re
            .replace_all(raw, |caps: &regex::Captures<'_>| {
                std::env::var(&caps[1]).unwrap_or_default()
            })
            .into_owned(),
        None => raw.to_owned(),
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_llm_base_url() -> String {
    "https://api.openai.com/v1".into()
}
fn d_model() -> String {
    "gpt-4o-mini".into()
}
fn d_2000() -> u32 {
    2000
}
fn d_120() -> u64 {
    120
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
