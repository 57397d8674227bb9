//! Reassembly of one streamed model turn.
//!
//! Text deltas are forwarded as soon as they are decoded. Tool-call
//! fragments are collected into an arena indexed by the call's position in
//! the turn, since a turn rarely carries more than a couple of calls.

use futures_util::StreamExt;
use tokio::sync::mpsc;

use va_domain::error::{Error, Result};
use va_domain::stream::{ChatDelta, RawFrame, Usage};
use va_domain::tool::ToolCallRequest;
use va_providers::FrameStream;

/// Indexes past this are treated as garbage rather than grown into.
const MAX_TOOL_CALLS: usize = 64;

/// What one model turn produced once its stream ended.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccumulatedTurn {
    /// Every content delta, concatenated in arrival order.
    pub text: String,
    /// Calls whose name arrived, ordered by index.
    pub tool_calls: Vec<ToolCallRequest>,
    pub usage: Option<Usage>,
}

#[derive(Debug, Default)]
struct CallBuilder {
    seen: bool,
    id: String,
    name: String,
    arguments: String,
}

#[derive(Debug, Default)]
pub struct ToolCallAccumulator {
    slots: Vec<CallBuilder>,
    text: String,
    usage: Option<Usage>,
}

impl ToolCallAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one delta. Returns text that should be forwarded to the caller.
    ///
    /// An in-band error object from the endpoint ends the turn.
    pub fn apply(&mut self, delta: ChatDelta) -> Result<Option<String>> {
        match delta {
            ChatDelta::Content { text } => {
                if text.is_empty() {
                    return Ok(None);
                }
                self.text.push_str(&text);
                Ok(Some(text))
            }
            ChatDelta::ToolCallFragment {
                index,
                id,
                name,
                arguments,
            } => {
                if index >= MAX_TOOL_CALLS {
                    tracing::warn!(index, "ignoring tool-call fragment with out-of-range index");
                    return Ok(None);
                }
                while self.slots.len() <= index {
                    self.slots.push(CallBuilder::default());
                }
                let slot = &mut self.slots[index];
                slot.seen = true;
                if let Some(id) = id.filter(|s| !s.is_empty()) {
                    if slot.id.is_empty() {
                        slot.id = id;
                    }
                }
                if let Some(name) = name.filter(|s| !s.is_empty()) {
                    if slot.name.is_empty() {
                        slot.name = name;
                    }
                }
                slot.arguments.push_str(&arguments);
                Ok(None)
            }
            // Endpoints report cumulative usage; the last report wins.
            ChatDelta::Usage(usage) => {
                self.usage = Some(usage);
                Ok(None)
            }
            ChatDelta::Error { message } => Err(Error::Provider {
                provider: "stream".into(),
                message,
            }),
        }
    }

    /// Close the turn. Entries whose name never arrived are dropped.
    pub fn finish(self) -> AccumulatedTurn {
        let mut tool_calls = Vec::new();
        for (index, slot) in self.slots.into_iter().enumerate() {
            if !slot.seen {
                continue;
            }
            if slot.name.is_empty() {
                tracing::debug!(index, "dropping tool call without a name");
                continue;
            }
            let id = if slot.id.is_empty() {
                format!("call_{index}")
            } else {
                slot.id
            };
            tool_calls.push(ToolCallRequest {
                index,
                id,
                name: slot.name,
                arguments_json: slot.arguments,
            });
        }

        AccumulatedTurn {
            text: self.text,
            tool_calls,
            usage: self.usage,
        }
    }
}

/// Drain a frame stream into an [`AccumulatedTurn`], sending text to `sink`
/// as it arrives.
///
/// Frames `decode` rejects are logged and skipped. A closed `sink` means
/// the turn is no longer being listened to and ends it as cancelled.
pub async fn accumulate<D>(
    mut frames: FrameStream,
    decode: D,
    sink: &mpsc::Sender<String>,
) -> Result<AccumulatedTurn>
where
    D: Fn(&RawFrame) -> Result<Vec<ChatDelta>>,
{
    let mut acc = ToolCallAccumulator::new();

    while let Some(item) = frames.next().await {
        for delta in decode_or_skip(&decode, &item?) {
            if let Some(text) = acc.apply(delta)? {
                sink.send(text).await.map_err(|_| Error::Cancelled)?;
            }
        }
    }

    Ok(acc.finish())
}

/// Like [`accumulate`], but keeps the text to itself.
pub async fn collect<D>(mut frames: FrameStream, decode: D) -> Result<AccumulatedTurn>
where
    D: Fn(&RawFrame) -> Result<Vec<ChatDelta>>,
{
    let mut acc = ToolCallAccumulator::new();
    while let Some(item) = frames.next().await {
        for delta in decode_or_skip(&decode, &item?) {
            acc.apply(delta)?;
        }
    }
    Ok(acc.finish())
}

fn decode_or_skip<D>(decode: &D, frame: &RawFrame) -> Vec<ChatDelta>
where
    D: Fn(&RawFrame) -> Result<Vec<ChatDelta>>,
{
    decode(frame).unwrap_or_else(|e| {
        let preview: String = frame.as_str().chars().take(200).collect();
        tracing::warn!(error = %e, frame = %preview, "skipping malformed frame");
        Vec::new()
    })
}
