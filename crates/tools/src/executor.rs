//! Executes `web_search` tool calls issued by the model.
//!
//! Every outcome is a tool-result [`Message`]. Bad arguments, unknown tools
//! and exhausted retries become text the model can read and react to; the
//! executor itself never fails.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::Instrument;

use va_domain::config::{Freshness, SearchConfig};
use va_domain::tool::{Message, ToolCallRequest, ToolDefinition};
use va_domain::trace::TraceEvent;

use crate::format;
use crate::search::{SearchBackend, SearchQuery};

pub const WEB_SEARCH_TOOL: &str = "web_search";

/// Arguments as the model sends them. Everything is optional here so that
/// missing fields turn into defaults or readable errors.
#[derive(Debug, Default, Deserialize)]
struct SearchArgs {
    #[serde(default)]
    query: Option<String>,
    #[serde(default)]
    freshness: Option<String>,
    #[serde(default)]
    count: Option<i64>,
}

pub struct SearchToolExecutor {
    backend: Arc<dyn SearchBackend>,
    default_freshness: Freshness,
    default_count: u32,
    max_attempts: u32,
    retry_delay: Duration,
}

impl SearchToolExecutor {
    pub fn new(backend: Arc<dyn SearchBackend>, cfg: &SearchConfig) -> Self {
        Self {
            backend,
            default_freshness: cfg.default_freshness,
            default_count: cfg.default_count.max(1),
            max_attempts: cfg.max_attempts.max(1),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }

    /// The tool declaration sent to the model.
    pub fn definition() -> ToolDefinition {
        ToolDefinition {
            name: WEB_SEARCH_TOOL.into(),
            description: "搜索互联网获取最新信息。当用户询问新闻、天气、实时数据或任何可能在训练数据之后发生变化的内容时使用。".into(),
            parameters: serde_json::json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "搜索关键词"
                    },
                    "freshness": {
                        "type": "string",
                        "enum": ["oneDay", "oneWeek", "oneMonth"],
                        "description": "结果的时间范围"
                    },
                    "count": {
                        "type": "integer",
                        "description": "返回结果数量"
                    }
                },
                "required": ["query"]
            }),
        }
    }

    /// Run one tool call and return the tool-result message for it.
    pub async fn execute(&self, call: &ToolCallRequest) -> Message {
        let span = tracing::info_span!("tool.call", tool = %call.name, call_id = %call.id);
        let content = self.run(call).instrument(span).await;

        TraceEvent::ToolExecuted {
            tool_name: call.name.clone(),
            call_id: call.id.clone(),
            output_chars: content.chars().count(),
        }
        .emit();

        Message::tool_result(call.id.clone(), content)
    }

    async fn run(&self, call: &ToolCallRequest) -> String {
        if call.name != WEB_SEARCH_TOOL {
            tracing::warn!(tool = %call.name, "model requested an unsupported tool");
            return format!("不支持的工具：{}", call.name);
        }

        let query = match self.parse_args(&call.arguments_json) {
            Ok(q) => q,
            Err(msg) => {
                tracing::warn!(arguments = %call.arguments_json, "rejecting tool arguments: {msg}");
                return msg;
            }
        };

        self.search_with_retry(&query).await
    }

    fn parse_args(&self, raw: &str) -> Result<SearchQuery, String> {
        let args: SearchArgs = if raw.trim().is_empty() {
            SearchArgs::default()
        } else {
            serde_json::from_str(raw).map_err(|e| format!("工具参数解析失败：{e}"))?
        };

        let query = args
            .query
            .map(|q| q.trim().to_owned())
            .filter(|q| !q.is_empty())
            .ok_or_else(|| "缺少搜索关键词（query），请提供要搜索的内容。".to_owned())?;

        let freshness = args
            .freshness
            .as_deref()
            .and_then(Freshness::parse)
            .unwrap_or(self.default_freshness);

        let result_count = match args.count {
            Some(n) if n > 0 => u32::try_from(n).unwrap_or(self.default_count),
            _ => self.default_count,
        };

        Ok(SearchQuery {
            query,
            freshness,
            result_count,
            want_summary: true,
        })
    }

    /// An attempt is retried when it errors or finds nothing.
    async fn search_with_retry(&self, query: &SearchQuery) -> String {
        let mut last_error: Option<String> = None;

        for attempt in 1..=self.max_attempts {
            if attempt > 1 {
                tokio::time::sleep(self.retry_delay).await;
            }

            match self.backend.search(query).await {
                Ok(hits) => {
                    TraceEvent::SearchAttempt {
                        query: query.query.clone(),
                        attempt,
                        results: hits.len(),
                        error: None,
                    }
                    .emit();
                    if !hits.is_empty() {
                        return format::format_hits(&hits);
                    }
                    tracing::debug!(attempt, query = %query.query, "search returned no results");
                    last_error = None;
                }
                Err(e) => {
                    TraceEvent::SearchAttempt {
                        query: query.query.clone(),
                        attempt,
                        results: 0,
                        error: Some(e.to_string()),
                    }
                    .emit();
                    tracing::warn!(attempt, query = %query.query, error = %e, "search attempt failed");
                    last_error = Some(e.to_string());
                }
            }
        }

        match last_error {
            Some(e) => format::search_failed(&query.query, self.max_attempts, &e),
            None => format::no_results(&query.query, self.max_attempts),
        }
    }
}
