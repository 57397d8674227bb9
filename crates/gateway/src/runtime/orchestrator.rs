//! The streaming conversation orchestrator.
//!
//! One turn moves through:
//!
//! ```text
//! BuildingPrompt -> Phase 1 -> no tool call ------------------------> Finalizing
//!                            \-> tool call(s) -> ExecutingTool -> Phase 2 -/
//! ```
//!
//! Generation runs on its own task and feeds a content channel and a
//! one-shot terminal result. [`merge_generation`] forwards the content to
//! the caller and decides how the turn ended. Finalization then runs
//! exactly once, whichever way that was.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use va_domain::config::Config;
use va_domain::error::{Error, Result};
use va_domain::history::{FinishReason, StoredTurn, TokenUsage, TurnInput, TurnOutput};
use va_domain::stream::Usage;
use va_domain::tool::{Message, ToolCallRequest, ToolDefinition};
use va_domain::trace::TraceEvent;
use va_providers::{ChatRequest, ChatTransport};
use va_sessions::{AssistantStore, HistoryStore};
use va_tools::{SearchToolExecutor, WEB_SEARCH_TOOL};

use super::accumulator::{accumulate, collect, AccumulatedTurn};
use super::cancel::CancelMap;
use super::finalize::spawn_finalizer;
use super::merge::{merge_generation, MergeOutcome};
use super::{TurnEvent, TurnOutcome};

const EVENT_BUFFER: usize = 64;
const CONTENT_BUFFER: usize = 64;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Types
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// One user input for one assistant.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub assistant_id: String,
    pub input: TurnInput,
}

/// A running turn.
pub struct TurnHandle {
    pub turn_id: String,
    /// Content events followed by exactly one [`TurnEvent::Finished`].
    pub events: mpsc::Receiver<TurnEvent>,
    /// Cancelling aborts the turn; the partial content is still persisted.
    pub cancel: CancellationToken,
}

/// A turn whose prompt has been built.
struct PreparedTurn {
    assistant_id: String,
    /// `prompt` is resolved to the prompt actually used.
    input: TurnInput,
    messages: Vec<Message>,
}

pub struct Orchestrator {
    config: Arc<Config>,
    transport: Arc<dyn ChatTransport>,
    search: Arc<SearchToolExecutor>,
    assistants: Arc<AssistantStore>,
    history: HistoryStore,
    cancel_map: Arc<CancelMap>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Orchestrator
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Orchestrator {
    pub fn new(
        config: Arc<Config>,
        transport: Arc<dyn ChatTransport>,
        search: Arc<SearchToolExecutor>,
        assistants: Arc<AssistantStore>,
        history: HistoryStore,
        cancel_map: Arc<CancelMap>,
    ) -> Self {
        Self {
            config,
            transport,
            search,
            assistants,
            history,
            cancel_map,
        }
    }

    /// Build the prompt and start generating.
    ///
    /// Fails without persisting anything when the assistant does not exist
    /// or the input is empty. Once this returns `Ok`, exactly one turn will
    /// be handed to the history store.
    pub async fn start_turn(self: &Arc<Self>, req: TurnRequest) -> Result<TurnHandle> {
        let prepared = self.build_prompt(req).await?;

        let turn_id = uuid::Uuid::new_v4().to_string();
        let cancel = self.cancel_map.register(&prepared.assistant_id, &turn_id);
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);

        let span = tracing::info_span!(
            "turn",
            assistant_id = %prepared.assistant_id,
            turn_id = %turn_id,
        );
        let this = Arc::clone(self);
        let run_turn_id = turn_id.clone();
        let run_cancel = cancel.clone();
        tokio::spawn(
            async move { this.run(prepared, run_turn_id, run_cancel, tx).await }.instrument(span),
        );

        Ok(TurnHandle {
            turn_id,
            events: rx,
            cancel,
        })
    }

    async fn build_prompt(&self, req: TurnRequest) -> Result<PreparedTurn> {
        let TurnRequest {
            assistant_id,
            mut input,
        } = req;

        if input.user_text.trim().is_empty() {
            return Err(Error::Validation("send must not be empty".into()));
        }

        let assistant = self
            .assistants
            .get(&assistant_id)
            .ok_or_else(|| Error::AssistantNotFound(assistant_id.clone()))?;
        let history = self.history.get(&assistant_id).await?;

        if input.prompt.trim().is_empty() {
            input.prompt = assistant.prompt;
        }
        let system_prompt = if input.prompt.trim().is_empty() {
            self.config.chat.default_system_prompt.as_str()
        } else {
            input.prompt.as_str()
        };
        let messages = build_messages(system_prompt, &history, &input.user_text);

        tracing::debug!(
            assistant_id = %assistant_id,
            history_turns = history.len(),
            messages = messages.len(),
            "prompt built"
        );

        Ok(PreparedTurn {
            assistant_id,
            input,
            messages,
        })
    }

    /// Drive one prepared turn to its single finalization.
    async fn run(
        self: Arc<Self>,
        turn: PreparedTurn,
        turn_id: String,
        cancel: CancellationToken,
        out: mpsc::Sender<TurnEvent>,
    ) {
        tracing::debug!("turn started");

        let prompt_text = turn
            .messages
            .iter()
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        let (content_tx, content_rx) = mpsc::channel::<String>(CONTENT_BUFFER);
        let (terminal_tx, terminal_rx) = oneshot::channel();
        let generation_cancel = cancel.child_token();

        let mut generation = {
            let this = Arc::clone(&self);
            let gen_cancel = generation_cancel.clone();
            let messages = turn.messages.clone();
            let user_text = turn.input.user_text.clone();
            tokio::spawn(
                async move {
                    // Dropping the generate future on cancel drops any open
                    // frame stream, which closes its connection.
                    let result = tokio::select! {
                        biased;
                        _ = gen_cancel.cancelled() => Err(Error::Cancelled),
                        r = this.generate(messages, &user_text, &gen_cancel, content_tx) => r,
                    };
                    let _ = terminal_tx.send(result);
                }
                .in_current_span(),
            )
        };

        let mut forwarded = String::new();
        let outcome =
            merge_generation(content_rx, terminal_rx, &cancel, &out, &mut forwarded).await;

        // Wait for the generation task to let go of its stream before
        // persisting, but never indefinitely.
        generation_cancel.cancel();
        let close_timeout = Duration::from_millis(self.config.chat.stream_close_timeout_ms);
        if tokio::time::timeout(close_timeout, &mut generation).await.is_err() {
            tracing::warn!(
                timeout_ms = self.config.chat.stream_close_timeout_ms,
                "generation did not stop in time, aborting it"
            );
            generation.abort();
        }

        let (finish_reason, content, reported_usage, error) = match outcome {
            MergeOutcome::Completed(usage) => (FinishReason::Stop, forwarded, usage, None),
            MergeOutcome::Cancelled => {
                tracing::info!(content_chars = forwarded.chars().count(), "turn aborted");
                let mut content = forwarded;
                content.push_str(&self.config.chat.abort_marker);
                (FinishReason::Abort, content, None, None)
            }
            MergeOutcome::Failed(e) => {
                tracing::warn!(error = %e, "turn failed");
                (FinishReason::Error, forwarded, None, Some(e.to_string()))
            }
        };

        let usage = match reported_usage {
            Some(u) => TokenUsage::from(u),
            None => TokenUsage::estimate(&prompt_text, &content),
        };

        let stored = StoredTurn::new(
            turn.input,
            TurnOutput {
                finish_reason,
                content,
            },
            usage,
        );

        let persisted = spawn_finalizer(
            self.history.clone(),
            Arc::clone(&self.assistants),
            turn.assistant_id.clone(),
            stored.clone(),
            Duration::from_secs(self.config.chat.persist_timeout_secs),
        )
        .await
        .unwrap_or_else(|e| {
            tracing::error!(error = %e, "finalizer task panicked");
            false
        });

        TraceEvent::TurnFinalized {
            assistant_id: turn.assistant_id.clone(),
            finish_reason: finish_reason.as_str().into(),
            content_chars: stored.output.content.chars().count(),
            total_tokens: stored.usage.total_tokens,
        }
        .emit();

        self.cancel_map.remove(&turn.assistant_id, &turn_id);

        let _ = out
            .send(TurnEvent::Finished(TurnOutcome {
                turn: stored,
                error,
                persisted,
            }))
            .await;
    }

    /// Phase 1, then (if a tool is needed) the tool round and phase 2.
    /// Returns endpoint-reported usage when every phase reported it.
    async fn generate(
        &self,
        mut messages: Vec<Message>,
        user_text: &str,
        cancel: &CancellationToken,
        sink: mpsc::Sender<String>,
    ) -> Result<Option<Usage>> {
        let tools = vec![SearchToolExecutor::definition()];

        let AccumulatedTurn {
            text: first_text,
            tool_calls: mut calls,
            usage: first_usage,
        } = self.stream_phase(1, &messages, &tools, cancel, &sink).await?;

        if calls.is_empty() {
            if !self.config.search.forces_search(user_text) {
                tracing::debug!("no tool call requested");
                return Ok(first_usage);
            }
            let query = self.forced_search_query(user_text, cancel).await?;
            tracing::info!(query = %query, "user text asks for recent information, forcing a web search");
            calls.push(forced_search_call(&query));
        }

        tracing::info!(calls = calls.len(), "executing tool calls");
        let results =
            futures_util::future::join_all(calls.iter().map(|call| self.search.execute(call)))
                .await;

        messages.push(Message::assistant_tool_calls(first_text, calls));
        messages.extend(results);
        messages.push(Message::system(self.config.chat.answer_instruction.clone()));

        let second = self.stream_phase(2, &messages, &tools, cancel, &sink).await?;

        if !second.tool_calls.is_empty() {
            // Only one tool round per turn.
            tracing::debug!(
                ignored = second.tool_calls.len(),
                "ignoring tool calls requested in the answer phase"
            );
        }
        if second.text.trim().is_empty() {
            tracing::warn!("answer phase produced no text, sending fallback reply");
            sink.send(self.config.chat.fallback_reply.clone())
                .await
                .map_err(|_| Error::Cancelled)?;
        }

        Ok(match (first_usage, second.usage) {
            (Some(a), Some(b)) => Some(a.merge(b)),
            _ => None,
        })
    }

    /// Query for a search the model did not ask for. The model rewrites the
    /// user's words first; a failed, late or blank rewrite falls back to
    /// [`clean_query`]. Only cancellation is returned as an error.
    async fn forced_search_query(&self, user_text: &str, cancel: &CancellationToken) -> Result<String> {
        let chat = &self.config.chat;
        let instruction = &chat.query_rewrite_instruction;
        let prompt = if instruction.contains("{question}") {
            instruction.replace("{question}", user_text)
        } else {
            format!("{instruction}\n{user_text}")
        };
        let req = ChatRequest {
            messages: vec![Message::user(prompt)],
            ..ChatRequest::default()
        };

        let rewrite = async {
            let frames = self.transport.stream_completion(&req, cancel.clone()).await?;
            collect(frames, |frame| self.transport.decode(frame)).await
        }
        .instrument(tracing::info_span!("llm.query_rewrite"));

        let deadline = Duration::from_millis(chat.query_rewrite_timeout_ms);
        let rewritten = match tokio::time::timeout(deadline, rewrite).await {
            Ok(Ok(turn)) => turn.text,
            Ok(Err(e)) if e.is_cancelled() => return Err(e),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "query rewrite failed, cleaning user text instead");
                String::new()
            }
            Err(_) => {
                tracing::warn!(timeout_ms = chat.query_rewrite_timeout_ms, "query rewrite timed out");
                String::new()
            }
        };
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let rewritten = rewritten.trim().trim_matches(|c: char| matches!(c, '"' | '“' | '”'));
        if rewritten.is_empty() {
            Ok(clean_query(user_text))
        } else {
            Ok(rewritten.to_owned())
        }
    }

    async fn stream_phase(
        &self,
        phase: u8,
        messages: &[Message],
        tools: &[ToolDefinition],
        cancel: &CancellationToken,
        sink: &mpsc::Sender<String>,
    ) -> Result<AccumulatedTurn> {
        TraceEvent::LlmRequest {
            model: self.transport.default_model().to_owned(),
            phase,
            with_tools: !tools.is_empty(),
            messages: messages.len(),
        }
        .emit();

        let req = ChatRequest {
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            ..ChatRequest::default()
        };

        let span = tracing::info_span!("llm.call", phase);
        async {
            let frames = self.transport.stream_completion(&req, cancel.clone()).await?;
            accumulate(frames, |frame| self.transport.decode(frame), sink).await
        }
        .instrument(span)
        .await
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Helpers
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// System prompt, then the replayed history, then the new user message.
/// Empty history fields are skipped.
pub fn build_messages(system_prompt: &str, history: &[StoredTurn], user_text: &str) -> Vec<Message> {
    let mut messages = Vec::with_capacity(history.len() * 2 + 2);
    messages.push(Message::system(system_prompt));
    for turn in history {
        if !turn.input.user_text.trim().is_empty() {
            messages.push(Message::user(turn.input.user_text.clone()));
        }
        if !turn.output.content.trim().is_empty() {
            messages.push(Message::assistant(turn.output.content.clone()));
        }
    }
    messages.push(Message::user(user_text));
    messages
}

/// Conversational filler stripped by [`clean_query`].
const FILLERS: [&str; 5] = ["你知道", "请问", "吗", "？", "?"];

/// Rule-based search query: the user text without conversational filler.
/// Falls back to the trimmed text if nothing else is left.
pub fn clean_query(user_text: &str) -> String {
    let cleaned = FILLERS
        .iter()
        .fold(user_text.to_owned(), |text, filler| text.replace(filler, ""));
    match cleaned.trim() {
        "" => user_text.trim().to_owned(),
        rest => rest.to_owned(),
    }
}

/// A search the model did not ask for.
fn forced_search_call(query: &str) -> ToolCallRequest {
    ToolCallRequest {
        index: 0,
        id: format!("call_forced_{}", uuid::Uuid::new_v4().simple()),
        name: WEB_SEARCH_TOOL.into(),
        arguments_json: serde_json::json!({ "query": query }).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use va_domain::history::TurnInput;
    use va_domain::tool::Role;

    fn stored(user: &str, reply: &str) -> StoredTurn {
        StoredTurn::new(
            TurnInput {
                prompt: String::new(),
                user_text: user.into(),
            },
            TurnOutput {
                finish_reason: FinishReason::Stop,
                content: reply.into(),
            },
            TokenUsage::default(),
        )
    }

    #[test]
    fn messages_replay_history_in_order() {
        let history = vec![
            StoredTurn::greeting("p", "欢迎"),
            stored("q1", "a1"),
            stored("", ""),
            stored("q2", "a2"),
        ];
        let messages = build_messages("sys", &history, "now");

        let roles: Vec<Role> = messages.iter().map(|m| m.role).collect();
        let texts: Vec<&str> = messages.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(
            roles,
            vec![
                Role::System,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
                Role::Assistant,
                Role::User,
            ]
        );
        assert_eq!(texts, vec!["sys", "欢迎", "q1", "a1", "q2", "a2", "now"]);
    }

    #[test]
    fn forced_call_carries_the_query() {
        let call = forced_search_call("今天的新闻");
        assert_eq!(call.name, WEB_SEARCH_TOOL);
        let args: serde_json::Value = serde_json::from_str(&call.arguments_json).unwrap();
        assert_eq!(args["query"], "今天的新闻");
        assert!(call.id.starts_with("call_forced_"));
    }

    #[test]
    fn filler_is_stripped_from_queries() {
        assert_eq!(clean_query("你知道今天北京天气吗？"), "今天北京天气");
        assert_eq!(clean_query("请问 最新的油价?"), "最新的油价");
        assert_eq!(clean_query(" 吗？ "), "吗？");
    }
}
