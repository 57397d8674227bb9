//! History endpoints and the two ways of running a turn.
//!
//! - `POST .../stream-process`: server-sent events, one JSON object per event
//! - `POST .../process`: waits for the turn and returns the persisted record

use std::convert::Infallible;
use std::time::Duration;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_core::Stream;
use serde_json::{json, Value};
use tokio::time::{Instant, MissedTickBehavior};

use va_domain::error::Error;
use va_domain::history::{StoredTurn, TurnInput};

use super::{ok, parse_id, ApiError, ApiResult};
use crate::runtime::{TurnEvent, TurnHandle, TurnRequest};
use crate::service::{self, ManualTurn};
use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// History
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn read(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Vec<StoredTurn>> {
    let id = parse_id(&raw_id)?;
    Ok(ok(service::read_history(&state, &id).await?))
}

pub async fn reset(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Vec<StoredTurn>> {
    let id = parse_id(&raw_id)?;
    Ok(ok(service::reset_history(&state, &id).await?))
}

pub async fn save(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<ManualTurn>, JsonRejection>,
) -> ApiResult<StoredTurn> {
    let id = parse_id(&raw_id)?;
    let Json(turn) = body?;
    Ok(ok(service::save_turn(&state, &id, turn).await?))
}

pub async fn stop(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> ApiResult<Value> {
    let id = parse_id(&raw_id)?;
    if !state.assistants.exists(&id) {
        return Err(Error::AssistantNotFound(id).into());
    }
    let stopped = state.cancel_map.cancel(&id);
    tracing::info!(assistant_id = %id, stopped, "stop requested");
    Ok(ok(json!({ "stopped": stopped })))
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Turns
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

async fn start(
    state: &AppState,
    raw_id: &str,
    body: Result<Json<TurnInput>, JsonRejection>,
) -> Result<TurnHandle, ApiError> {
    let assistant_id = parse_id(raw_id)?;
    let Json(input) = body?;
    let handle = state
        .orchestrator
        .start_turn(TurnRequest {
            assistant_id,
            input,
        })
        .await?;
    Ok(handle)
}

pub async fn stream_process(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<TurnInput>, JsonRejection>,
) -> Response {
    match start(&state, &raw_id, body).await {
        Ok(handle) => {
            let heartbeat = Duration::from_secs(state.config.chat.heartbeat_secs.max(1));
            sse_response(turn_stream(handle, heartbeat))
        }
        Err(e) => {
            tracing::warn!(assistant_id = %raw_id, error = %e.0, "turn rejected");
            // The client expects an event stream either way.
            let event = data_event(&json!({ "error": e.message() }));
            sse_response(futures_util::stream::once(async move {
                Ok::<_, Infallible>(event)
            }))
        }
    }
}

pub async fn process(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    body: Result<Json<TurnInput>, JsonRejection>,
) -> ApiResult<StoredTurn> {
    let TurnHandle {
        mut events, cancel, ..
    } = start(&state, &raw_id, body).await?;
    // A client that hangs up aborts the turn, like the streaming path.
    let _guard = cancel.drop_guard();

    while let Some(event) = events.recv().await {
        if let TurnEvent::Finished(outcome) = event {
            return match outcome.error {
                Some(message) => Err(Error::Other(message).into()),
                None => Ok(ok(outcome.turn)),
            };
        }
    }
    Err(Error::Other("turn ended without a result".into()).into())
}

// ── SSE plumbing ──────────────────────────────────────────────────────

enum Tick {
    Turn(TurnEvent),
    Heartbeat,
}

fn data_event(payload: &Value) -> Event {
    Event::default().data(payload.to_string())
}

/// Turn events interleaved with heartbeats, ending after the terminal
/// event. Dropping the stream cancels the turn.
fn turn_stream(
    handle: TurnHandle,
    heartbeat: Duration,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let TurnHandle {
        mut events, cancel, ..
    } = handle;
    // Armed now so that a body dropped before its first poll still cancels.
    let guard = cancel.drop_guard();

    async_stream::stream! {
        let _guard = guard;
        let mut ticker = tokio::time::interval_at(Instant::now() + heartbeat, heartbeat);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let tick = tokio::select! {
                biased;
                event = events.recv() => match event {
                    Some(event) => Tick::Turn(event),
                    None => break,
                },
                _ = ticker.tick() => Tick::Heartbeat,
            };

            match tick {
                Tick::Turn(event) => {
                    let last = matches!(event, TurnEvent::Finished(_));
                    yield Ok(data_event(&event.to_wire()));
                    if last {
                        break;
                    }
                }
                Tick::Heartbeat => {
                    yield Ok(data_event(&json!({ "heartbeat": true })));
                }
            }
        }
    }
}

fn sse_response<S>(stream: S) -> Response
where
    S: Stream<Item = Result<Event, Infallible>> + Send + 'static,
{
    let mut response = Sse::new(stream).into_response();
    let headers = response.headers_mut();
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use tokio::sync::mpsc;
    use tokio_util::sync::CancellationToken;
    use va_domain::history::{TokenUsage, TurnOutput};

    use crate::runtime::TurnOutcome;

    fn handle() -> (mpsc::Sender<TurnEvent>, CancellationToken, TurnHandle) {
        let (tx, rx) = mpsc::channel(8);
        let cancel = CancellationToken::new();
        let handle = TurnHandle {
            turn_id: "t".into(),
            events: rx,
            cancel: cancel.clone(),
        };
        (tx, cancel, handle)
    }

    fn finished() -> TurnEvent {
        TurnEvent::Finished(TurnOutcome {
            turn: StoredTurn::new(
                TurnInput::default(),
                TurnOutput::default(),
                TokenUsage::new(1, 1),
            ),
            error: None,
            persisted: true,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_fill_idle_gaps() {
        let (tx, _cancel, handle) = handle();
        let mut stream = Box::pin(turn_stream(handle, Duration::from_secs(5)));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(12)).await;
            tx.send(TurnEvent::Content { text: "hi".into() }).await.unwrap();
            tx.send(finished()).await.unwrap();
        });

        let mut count = 0;
        while stream.next().await.is_some() {
            count += 1;
        }
        // Two heartbeats (5s, 10s), one content event, one terminal event.
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn dropping_the_stream_cancels_the_turn() {
        let (_tx, cancel, handle) = handle();
        let stream = turn_stream(handle, Duration::from_secs(5));
        let mut stream = Box::pin(stream);
        let _ = tokio::time::timeout(Duration::from_millis(10), stream.next()).await;
        drop(stream);
        assert!(cancel.is_cancelled());
    }

    #[test]
    fn dropping_an_unpolled_stream_cancels_the_turn() {
        let (_tx, cancel, handle) = handle();
        let stream = turn_stream(handle, Duration::from_secs(5));
        assert!(!cancel.is_cancelled());
        drop(stream);
        assert!(cancel.is_cancelled());
    }
}
