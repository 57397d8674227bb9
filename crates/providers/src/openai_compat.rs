//! OpenAI-compatible streaming adapter.
//!
//! Works with OpenAI, DashScope compatible mode, DeepSeek, Ollama, vLLM and
//! any other endpoint that follows the chat completions contract.

use serde_json::Value;
use tokio_util::sync::CancellationToken;
use va_domain::config::LlmConfig;
use va_domain::error::{Error, Result};
use va_domain::stream::{ChatDelta, Usage};
use va_domain::tool::{Message, Role, ToolDefinition};

use crate::traits::{ChatRequest, ChatTransport, FrameStream};
use crate::util::{from_reqwest, truncate_body};

const PROVIDER_ID: &str = "openai_compat";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Transport struct
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A [`ChatTransport`] for any OpenAI-compatible `/chat/completions` endpoint.
pub struct OpenAiCompatTransport {
    base_url: String,
    api_key: Option<String>,
    model: String,
    max_tokens: u32,
    client: reqwest::Client,
}

impl OpenAiCompatTransport {
    /// Build the transport from the `[llm]` config section.
    ///
    /// A configured but unresolvable credential is an error; no credential
    /// at all sends requests without an `Authorization` header.
    pub fn from_config(cfg: &LlmConfig) -> Result<Self> {
        let api_key = if cfg.auth.is_configured() {
            Some(cfg.auth.resolve()?)
        } else {
            None
        };

        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(cfg.timeout_sec))
            .build()
            .map_err(from_reqwest)?;

        Ok(Self {
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            api_key,
            model: cfg.model.clone(),
            max_tokens: cfg.max_tokens,
            client,
        })
    }

    fn chat_url(&self) -> String {
        format!("{}/chat/completions", self.base_url)
    }

    // ── Internal: build authenticated request builder ──────────────

    fn authed_post(&self, url: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .post(url)
            .header("Content-Type", "application/json")
            .header("Accept", "text/event-stream");
        match &self.api_key {
            Some(key) => builder.bearer_auth(key),
            None => builder,
        }
    }

    // ── Internal: build the JSON body ─────────────────────────────

    fn build_chat_body(&self, req: &ChatRequest) -> Value {
        let messages: Vec<Value> = req.messages.iter().map(msg_to_openai).collect();
        let model = req.model.clone().unwrap_or_else(|| self.model.clone());

        let mut body = serde_json::json!({
            "model": model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(self.max_tokens),
            "stream": true,
            "stream_options": {"include_usage": true},
        });

        if !req.tools.is_empty() {
            let tools: Vec<Value> = req.tools.iter().map(tool_to_openai).collect();
            body["tools"] = Value::Array(tools);
        }
        body
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message serialization helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn msg_to_openai(msg: &Message) -> Value {
    match msg.role {
        Role::Assistant if !msg.tool_calls.is_empty() => assistant_tool_calls_to_openai(msg),
        Role::Tool => serde_json::json!({
            "role": "tool",
            "tool_call_id": msg.tool_call_id.as_deref().unwrap_or(""),
            "content": msg.content,
        }),
        _ => serde_json::json!({
            "role": msg.role.as_str(),
            "content": msg.content,
        }),
    }
}

fn assistant_tool_calls_to_openai(msg: &Message) -> Value {
    let tool_calls: Vec<Value> = msg
        .tool_calls
        .iter()
        .map(|tc| {
            serde_json::json!({
                "id": tc.id,
                "type": "function",
                "function": {
                    "name": tc.name,
                    "arguments": tc.arguments_json,
                }
            })
        })
        .collect();

    let content = if msg.content.is_empty() {
        Value::Null
    } else {
        Value::String(msg.content.clone())
    };

    serde_json::json!({
        "role": "assistant",
        "content": content,
        "tool_calls": tool_calls,
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    serde_json::json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        }
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Frame decoding
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Decode one streamed frame into deltas.
///
/// Returns `Err` only when the frame is not valid JSON. An in-band error
/// object becomes [`ChatDelta::Error`]; frames carrying nothing of interest
/// (role-only deltas, keep-alives, the `[DONE]` sentinel) decode to an
/// empty vec.
pub fn decode_frame(data: &str) -> Result<Vec<ChatDelta>> {
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(Vec::new());
    }

    let v: Value = serde_json::from_str(data)?;
    let mut deltas = Vec::new();

    if let Some(err) = v.get("error").filter(|e| !e.is_null()) {
        let message = err
            .get("message")
            .and_then(|m| m.as_str())
            .map(String::from)
            .unwrap_or_else(|| err.to_string());
        deltas.push(ChatDelta::Error { message });
        return Ok(deltas);
    }

    let choice = v
        .get("choices")
        .and_then(|c| c.as_array())
        .and_then(|a| a.first());

    if let Some(delta) = choice.and_then(|c| c.get("delta")) {
        if let Some(text) = delta.get("content").and_then(|v| v.as_str()) {
            if !text.is_empty() {
                deltas.push(ChatDelta::Content {
                    text: text.to_string(),
                });
            }
        }

        if let Some(tc_arr) = delta.get("tool_calls").and_then(|v| v.as_array()) {
            for (position, tc) in tc_arr.iter().enumerate() {
                let index = tc
                    .get("index")
                    .and_then(|v| v.as_u64())
                    .map(|i| i as usize)
                    .unwrap_or(position);
                let func = tc.get("function");
                deltas.push(ChatDelta::ToolCallFragment {
                    index,
                    id: non_empty_str(tc.get("id")),
                    name: non_empty_str(func.and_then(|f| f.get("name"))),
                    arguments: func
                        .and_then(|f| f.get("arguments"))
                        .and_then(|v| v.as_str())
                        .unwrap_or("")
                        .to_string(),
                });
            }
        }
    }

    if let Some(usage) = v.get("usage").and_then(parse_openai_usage) {
        deltas.push(ChatDelta::Usage(usage));
    }

    Ok(deltas)
}

fn non_empty_str(v: Option<&Value>) -> Option<String> {
    v.and_then(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .map(String::from)
}

fn parse_openai_usage(v: &Value) -> Option<Usage> {
    let prompt_tokens = v.get("prompt_tokens")?.as_u64()? as u32;
    let completion_tokens = v.get("completion_tokens")?.as_u64()? as u32;
    let total_tokens = v
        .get("total_tokens")
        .and_then(|t| t.as_u64())
        .map(|t| t as u32)
        .unwrap_or(prompt_tokens + completion_tokens);
    Some(Usage {
        prompt_tokens,
        completion_tokens,
        total_tokens,
    })
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait implementation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
impl ChatTransport for OpenAiCompatTransport {
    async fn stream_completion(
        &self,
        req: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<FrameStream> {
        if req.messages.is_empty() {
            return Err(Error::Validation(
                "a completion needs at least one message".into(),
            ));
        }

        let url = self.chat_url();
        let body = self.build_chat_body(req);

        tracing::debug!(
            url = %url,
            messages = req.messages.len(),
            tools = req.tools.len(),
            "openai_compat stream request"
        );

        let send = self.authed_post(&url).json(&body).send();
        let resp = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            resp = send => resp.map_err(from_reqwest)?,
        };

        let status = resp.status();
        if !status.is_success() {
            let err_text = resp.text().await.unwrap_or_default();
            return Err(Error::Provider {
                provider: PROVIDER_ID.into(),
                message: format!("HTTP {} - {}", status.as_u16(), truncate_body(&err_text, 2000)),
            });
        }

        Ok(crate::sse::frame_stream(resp, cancel))
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[cfg(test)]
mod tests {
    use super::*;
    use va_domain::tool::ToolCallRequest;

    fn transport() -> OpenAiCompatTransport {
        let cfg = LlmConfig {
            base_url: "http://127.0.0.1:9/v1/".into(),
            ..LlmConfig::default()
        };
        OpenAiCompatTransport::from_config(&cfg).unwrap()
    }

    #[test]
    fn decodes_content_delta() {
        let deltas =
            decode_frame(r#"{"choices":[{"index":0,"delta":{"content":"你好"}}]}"#).unwrap();
        assert_eq!(
            deltas,
            vec![ChatDelta::Content {
                text: "你好".into()
            }]
        );
    }

    #[test]
    fn decodes_first_tool_fragment_with_id_and_name() {
        let frame = r#"{"choices":[{"delta":{"tool_calls":[{"index":0,"id":"call_a","type":"function","function":{"name":"web_search","arguments":""}}]}}]}"#;
        let deltas = decode_frame(frame).unwrap();
        assert_eq!(
            deltas,
            vec![ChatDelta::ToolCallFragment {
                index: 0,
                id: Some("call_a".into()),
                name: Some("web_search".into()),
                arguments: String::new(),
            }]
        );
    }

    #[test]
    fn decodes_argument_only_fragment() {
        let frame = r#"{"choices":[{"delta":{"tool_calls":[{"index":1,"function":{"arguments":"{\"que"}}]}}]}"#;
        let deltas = decode_frame(frame).unwrap();
        assert_eq!(
            deltas,
            vec![ChatDelta::ToolCallFragment {
                index: 1,
                id: None,
                name: None,
                arguments: "{\"que".into(),
            }]
        );
    }

    #[test]
    fn decodes_usage_only_frame() {
        let frame = r#"{"choices":[],"usage":{"prompt_tokens":9,"completion_tokens":3,"total_tokens":12}}"#;
        let deltas = decode_frame(frame).unwrap();
        assert_eq!(
            deltas,
            vec![ChatDelta::Usage(Usage {
                prompt_tokens: 9,
                completion_tokens: 3,
                total_tokens: 12,
            })]
        );
    }

    #[test]
    fn in_band_error_object() {
        let deltas =
            decode_frame(r#"{"error":{"message":"rate limited","code":"429"}}"#).unwrap();
        assert_eq!(
            deltas,
            vec![ChatDelta::Error {
                message: "rate limited".into()
            }]
        );
    }

    #[test]
    fn role_only_and_done_frames_are_empty() {
        assert!(decode_frame(r#"{"choices":[{"delta":{"role":"assistant"}}]}"#)
            .unwrap()
            .is_empty());
        assert!(decode_frame("[DONE]").unwrap().is_empty());
    }

    #[test]
    fn malformed_frame_is_error() {
        assert!(matches!(decode_frame("{\"choices\":["), Err(Error::Json(_))));
    }

    #[test]
    fn body_contains_stream_flag_and_tools() {
        let t = transport();
        let req = ChatRequest {
            messages: vec![Message::system("be brief"), Message::user("hi")],
            tools: vec![ToolDefinition {
                name: "web_search".into(),
                description: "search".into(),
                parameters: serde_json::json!({"type": "object"}),
            }],
            max_tokens: None,
            model: None,
        };
        let body = t.build_chat_body(&req);
        assert_eq!(body["stream"], true);
        assert_eq!(body["model"], LlmConfig::default().model);
        assert_eq!(body["max_tokens"], 2000);
        assert_eq!(body["messages"].as_array().unwrap().len(), 2);
        assert_eq!(body["tools"][0]["function"]["name"], "web_search");
    }

    #[test]
    fn body_omits_empty_tools() {
        let req = ChatRequest {
            messages: vec![Message::user("hi")],
            ..ChatRequest::default()
        };
        assert!(transport().build_chat_body(&req).get("tools").is_none());
    }

    #[test]
    fn tool_round_messages_serialize() {
        let call = ToolCallRequest {
            index: 0,
            id: "call_a".into(),
            name: "web_search".into(),
            arguments_json: r#"{"query":"weather"}"#.into(),
        };
        let assistant = msg_to_openai(&Message::assistant_tool_calls("", vec![call]));
        assert!(assistant["content"].is_null());
        assert_eq!(assistant["tool_calls"][0]["id"], "call_a");
        assert_eq!(
            assistant["tool_calls"][0]["function"]["arguments"],
            r#"{"query":"weather"}"#
        );

        let result = msg_to_openai(&Message::tool_result("call_a", "sunny"));
        assert_eq!(result["role"], "tool");
        assert_eq!(result["tool_call_id"], "call_a");
        assert_eq!(result["content"], "sunny");
    }
}
