use serde::{Deserialize, Serialize};

use super::llm::AuthConfig;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Web search tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Time window a search is restricted to. Serialized the way the
/// search endpoint expects (`oneDay`, `oneWeek`, `oneMonth`).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Freshness {
    OneDay,
    #[default]
    OneWeek,
    OneMonth,
}

impl Freshness {
    pub fn as_str(self) -> &'static str {
        match self {
            Freshness::OneDay => "oneDay",
            Freshness::OneWeek => "oneWeek",
            Freshness::OneMonth => "oneMonth",
        }
    }

    /// Lenient parse for model-supplied arguments; unknown values yield `None`.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim() {
            "oneDay" | "day" => Some(Freshness::OneDay),
            "oneWeek" | "week" => Some(Freshness::OneWeek),
            "oneMonth" | "month" => Some(Freshness::OneMonth),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    #[serde(default = "d_search_url")]
    pub base_url: String,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub default_freshness: Freshness,
    #[serde(default = "d_10")]
    pub default_count: u32,
    /// Attempts per tool call; an attempt that errors or finds nothing is retried.
    #[serde(default = "d_3")]
    pub max_attempts: u32,
    #[serde(default = "d_1000")]
    pub retry_delay_ms: u64,
    #[serde(default = "d_30")]
    pub timeout_sec: u64,
    /// Substrings of the user text that force a search when the model
    /// did not request one.
    #[serde(default = "d_force_keywords")]
    pub force_keywords: Vec<String>,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            base_url: d_search_url(),
            auth: AuthConfig::default(),
            default_freshness: Freshness::default(),
            default_count: d_10(),
            max_attempts: d_3(),
            retry_delay_ms: d_1000(),
            timeout_sec: d_30(),
            force_keywords: d_force_keywords(),
        }
    }
}

impl SearchConfig {
    pub fn forces_search(&self, user_text: &str) -> bool {
        self.force_keywords
            .iter()
            .any(|kw| !kw.is_empty() && user_text.contains(kw.as_str()))
    }
}

// ── serde default helpers ───────────────────────────────────────────

fn d_search_url() -> String {
    "https://api.bochaai.com/v1/web-search".into()
}
fn d_10() -> u32 {
    10
}
fn d_3() -> u32 {
    3
}
fn d_1000() -> u64 {
    1000
}
fn d_30() -> u64 {
    30
}
fn d_force_keywords() -> Vec<String> {
    ["最新", "现在", "当前", "正在", "近况", "近期", "这周", "本月", "今天", "昨日"]
        .iter()
        .map(|s| (*s).to_owned())
        .collect()
}
