//! Fan-in of a turn's generation into its outbound event channel.
//!
//! Three sources feed the loop: content chunks from the generation task,
//! the task's terminal result, and the turn's cancellation token. When
//! several are ready at once the loop takes content first, then the
//! terminal result, then cancellation, so no forwarded chunk can trail
//! the end of the turn. The HTTP layer adds its own heartbeat on top.

use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use va_domain::error::{Error, Result};
use va_domain::stream::Usage;

use super::TurnEvent;

/// How the generation side of a turn ended.
#[derive(Debug)]
pub enum MergeOutcome {
    /// Generation finished; carries endpoint-reported usage, if any.
    Completed(Option<Usage>),
    Failed(Error),
    Cancelled,
}

/// Forward content to `out` until the turn ends. Everything forwarded is
/// also appended to `forwarded`.
///
/// A closed `out` is not an error here: the client going away is reported
/// through `cancel`.
pub async fn merge_generation(
    mut content: mpsc::Receiver<String>,
    mut terminal: oneshot::Receiver<Result<Option<Usage>>>,
    cancel: &CancellationToken,
    out: &mpsc::Sender<TurnEvent>,
    forwarded: &mut String,
) -> MergeOutcome {
    let mut content_open = true;

    loop {
        tokio::select! {
            biased;

            chunk = content.recv(), if content_open => match chunk {
                Some(text) => {
                    forwarded.push_str(&text);
                    let _ = out.send(TurnEvent::Content { text }).await;
                }
                None => content_open = false,
            },

            result = &mut terminal => {
                return match result {
                    Ok(Ok(usage)) => MergeOutcome::Completed(usage),
                    Ok(Err(e)) if e.is_cancelled() => MergeOutcome::Cancelled,
                    Ok(Err(e)) => MergeOutcome::Failed(e),
                    Err(_) => MergeOutcome::Failed(Error::Other(
                        "generation ended without reporting a result".into(),
                    )),
                };
            }

            _ = cancel.cancelled() => return MergeOutcome::Cancelled,
        }
    }
}
