#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio_util::sync::CancellationToken;

use va_domain::assistant::AssistantDraft;
use va_domain::config::Config;
use va_domain::error::{Error, Result};
use va_domain::history::TurnInput;
use va_domain::stream::RawFrame;
use va_gateway::runtime::{TurnEvent, TurnOutcome, TurnRequest};
use va_gateway::service;
use va_gateway::state::AppState;
use va_providers::{ChatRequest, ChatTransport, FrameStream};
use va_tools::{SearchBackend, SearchHit, SearchQuery};

// ── Scripted chat transport ─────────────────────────────────────────

/// What one `stream_completion` call does.
pub enum Script {
    /// Yield the frames, then end.
    Frames(Vec<String>),
    /// Yield the frames, then stall until cancelled.
    Hang(Vec<String>),
    /// Yield the frames, then fail.
    FramesThenError(Vec<String>, String),
    /// Fail before any frame.
    OpenError(String),
}

#[derive(Default)]
pub struct ScriptedTransport {
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedTransport {
    pub fn new(scripts: Vec<Script>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<ChatRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ChatTransport for ScriptedTransport {
    async fn stream_completion(
        &self,
        req: &ChatRequest,
        cancel: CancellationToken,
    ) -> Result<FrameStream> {
        self.requests.lock().unwrap().push(req.clone());
        let script = self
            .scripts
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Other("no scripted completion left".into()))?;

        match script {
            Script::Frames(frames) => Ok(Box::pin(futures_util::stream::iter(
                frames.into_iter().map(|f| Ok(RawFrame::new(f))),
            ))),
            Script::Hang(frames) => Ok(Box::pin(async_stream::stream! {
                for f in frames {
                    yield Ok(RawFrame::new(f));
                }
                cancel.cancelled().await;
                yield Err(Error::Cancelled);
            })),
            Script::FramesThenError(frames, message) => Ok(Box::pin(async_stream::stream! {
                for f in frames {
                    yield Ok(RawFrame::new(f));
                }
                yield Err(Error::Http(message));
            })),
            Script::OpenError(message) => Err(Error::Http(message)),
        }
    }

    fn default_model(&self) -> &str {
        "scripted"
    }
}

pub fn content(text: &str) -> String {
    json!({ "choices": [{ "delta": { "content": text } }] }).to_string()
}

pub fn tool_fragment(index: usize, id: Option<&str>, name: Option<&str>, args: &str) -> String {
    let mut call = json!({ "index": index, "function": { "arguments": args } });
    if let Some(id) = id {
        call["id"] = json!(id);
    }
    if let Some(name) = name {
        call["function"]["name"] = json!(name);
    }
    json!({ "choices": [{ "delta": { "tool_calls": [call] } }] }).to_string()
}

pub fn usage(prompt: u32, completion: u32) -> String {
    json!({
        "choices": [],
        "usage": {
            "prompt_tokens": prompt,
            "completion_tokens": completion,
            "total_tokens": prompt + completion
        }
    })
    .to_string()
}

// ── Counting search backend ─────────────────────────────────────────

#[derive(Default)]
pub struct CountingSearch {
    hits: Vec<SearchHit>,
    queries: Mutex<Vec<String>>,
}

impl CountingSearch {
    pub fn returning(hits: Vec<SearchHit>) -> Self {
        Self {
            hits,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl SearchBackend for CountingSearch {
    async fn search(&self, query: &SearchQuery) -> Result<Vec<SearchHit>> {
        self.queries.lock().unwrap().push(query.query.clone());
        Ok(self.hits.clone())
    }
}

pub fn hit(title: &str) -> SearchHit {
    SearchHit {
        title: title.into(),
        url: "https://example.com/a".into(),
        snippet: "晴，25度".into(),
        published_at: "2024-05-01".into(),
    }
}

// ── Harness ─────────────────────────────────────────────────────────

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub state: AppState,
    pub transport: Arc<ScriptedTransport>,
    pub search: Arc<CountingSearch>,
}

/// Boot the full state against stubs. Forced search is off and retries
/// do not wait unless `tweak` says otherwise.
pub fn harness_with(
    scripts: Vec<Script>,
    hits: Vec<SearchHit>,
    tweak: impl FnOnce(&mut Config),
) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let mut config = Config::default();
    config.storage.state_path = dir.path().to_path_buf();
    config.search.retry_delay_ms = 0;
    config.search.force_keywords = Vec::new();
    config.chat.stream_close_timeout_ms = 500;
    tweak(&mut config);

    let transport = Arc::new(ScriptedTransport::new(scripts));
    let search = Arc::new(CountingSearch::returning(hits));
    let state = va_gateway::bootstrap::assemble(
        Arc::new(config),
        transport.clone(),
        search.clone(),
    )
    .unwrap();

    Harness {
        dir,
        state,
        transport,
        search,
    }
}

pub fn harness(scripts: Vec<Script>, hits: Vec<SearchHit>) -> Harness {
    harness_with(scripts, hits, |_| {})
}

impl Harness {
    pub async fn assistant(&self) -> String {
        service::create_assistant(
            &self.state,
            AssistantDraft {
                name: "小助手".into(),
                description: String::new(),
                prompt: "你是测试助手".into(),
            },
        )
        .await
        .unwrap()
        .id
    }

    pub fn request(assistant_id: &str, text: &str) -> TurnRequest {
        TurnRequest {
            assistant_id: assistant_id.to_owned(),
            input: TurnInput {
                prompt: String::new(),
                user_text: text.into(),
            },
        }
    }

    /// Run a turn to the end. Returns the forwarded chunks and the outcome.
    pub async fn run(&self, assistant_id: &str, text: &str) -> (Vec<String>, TurnOutcome) {
        let handle = self
            .state
            .orchestrator
            .start_turn(Self::request(assistant_id, text))
            .await
            .unwrap();
        drain(handle.events).await
    }
}

pub async fn drain(
    mut events: tokio::sync::mpsc::Receiver<TurnEvent>,
) -> (Vec<String>, TurnOutcome) {
    let mut chunks = Vec::new();
    while let Some(event) = events.recv().await {
        match event {
            TurnEvent::Content { text } => chunks.push(text),
            TurnEvent::Finished(outcome) => return (chunks, outcome),
        }
    }
    panic!("turn ended without a Finished event");
}
