//! SSE framing for streaming completions.
//!
//! The endpoint sends `data:` lines separated by blank lines. Frames are cut
//! out of a byte buffer as soon as they are complete and handed out verbatim;
//! the `[DONE]` sentinel ends the stream.

use tokio_util::sync::CancellationToken;
use va_domain::error::Error;
use va_domain::stream::RawFrame;

use crate::traits::FrameStream;
use crate::util::from_reqwest;

const DONE_SENTINEL: &str = "[DONE]";

/// Extract complete `data:` payloads from an SSE byte buffer.
///
/// Events are delimited by a blank line. Only `data:` lines are kept;
/// `event:`, `id:`, `retry:` and comment lines are dropped. Consumed bytes
/// are removed and a trailing partial event stays for the next call, so a
/// UTF-8 sequence split across network reads is decoded only once whole.
/// An event that is not valid UTF-8 is logged and skipped.
pub(crate) fn drain_data_lines(buffer: &mut Vec<u8>) -> Vec<String> {
    let mut data_lines = Vec::new();
    while let Some((pos, delim)) = find_event_end(buffer) {
        let block: Vec<u8> = buffer.drain(..pos).collect();
        buffer.drain(..delim);

        let block = match String::from_utf8(block) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "skipping SSE event with invalid UTF-8");
                continue;
            }
        };
        for line in block.lines() {
            if let Some(data) = line.trim().strip_prefix("data:") {
                let data = data.trim();
                if !data.is_empty() {
                    data_lines.push(data.to_string());
                }
            }
        }
    }
    data_lines
}

/// Position and length of the first blank-line delimiter (`\n\n` or
/// `\r\n\r\n`).
fn find_event_end(buffer: &[u8]) -> Option<(usize, usize)> {
    let lf = buffer.windows(2).position(|w| w == b"\n\n").map(|p| (p, 2));
    let crlf = buffer
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .map(|p| (p, 4));
    match (lf, crlf) {
        (Some(a), Some(b)) => Some(if b.0 < a.0 { b } else { a }),
        (a, b) => a.or(b),
    }
}

/// Turn an SSE response into a [`FrameStream`].
///
/// When `cancel` fires the response is dropped, which closes the
/// connection, and the stream ends with `Err(Error::Cancelled)`.
pub(crate) fn frame_stream(response: reqwest::Response, cancel: CancellationToken) -> FrameStream {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer: Vec<u8> = Vec::new();
        let mut cancelled = false;
        let mut failure: Option<Error> = None;

        'read: loop {
            let chunk = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    cancelled = true;
                    break 'read;
                }
                chunk = response.chunk() => chunk,
            };

            match chunk {
                Ok(Some(bytes)) => {
                    buffer.extend_from_slice(&bytes);
                    for data in drain_data_lines(&mut buffer) {
                        if data == DONE_SENTINEL {
                            break 'read;
                        }
                        yield Ok(RawFrame::new(data));
                    }
                }
                Ok(None) => {
                    // Body closed: flush a final event that lacked its blank line.
                    if !buffer.iter().all(u8::is_ascii_whitespace) {
                        buffer.extend_from_slice(b"\n\n");
                        for data in drain_data_lines(&mut buffer) {
                            if data == DONE_SENTINEL {
                                break 'read;
                            }
                            yield Ok(RawFrame::new(data));
                        }
                    }
                    break 'read;
                }
                Err(e) => {
                    failure = Some(from_reqwest(e));
                    break 'read;
                }
            }
        }

        drop(response);

        if cancelled {
            tracing::debug!("completion stream cancelled, connection closed");
            yield Err(Error::Cancelled);
        } else if let Some(e) = failure {
            yield Err(e);
        }
    };

    Box::pin(stream)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
