use std::pin::Pin;
use std::task::{Context, Poll};

use eventsource_stream::{EventStream, Eventsource};
use futures_util::Stream;
use serde::Deserialize;

use super::error::{StreamError, StreamErrorKind};

/// One server-sent event from the chat endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WireEvent {
    ChunksInfo(u64),
    Content(String),
    End,
    Error(String),
    /// Keep-alives and event types this client does not know.
    Ignored,
}

#[derive(Deserialize)]
struct ChunksInfoData {
    count: u64,
}

#[derive(Deserialize)]
struct ContentData {
    text: String,
}

#[derive(Deserialize)]
struct ErrorData {
    message: String,
}

/// SSE parser that converts a byte stream into `WireEvent`s.
pub struct SseParser<S> {
    inner: EventStream<S>,
}

impl<S> SseParser<S> {
    pub fn new(stream: S) -> Self
    where
        S: Eventsource,
    {
        Self {
            inner: stream.eventsource(),
        }
    }
}

impl<S, E> Stream for SseParser<S>
where
    S: Stream<Item = Result<bytes::Bytes, E>> + Unpin,
    E: std::error::Error + Send + Sync + 'static,
{
    type Item = Result<WireEvent, StreamError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        match Pin::new(&mut self.inner).poll_next(cx) {
            Poll::Ready(Some(Ok(event))) => {
                Poll::Ready(Some(parse_event_fields(&event.event, &event.data)))
            }
            Poll::Ready(Some(Err(e))) => Poll::Ready(Some(Err(StreamError::new(
                StreamErrorKind::Transport,
                format!("SSE stream error: {e}"),
            )))),
            Poll::Ready(None) => Poll::Ready(None),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Maps an event name and its data payload to a `WireEvent`.
///
/// # Errors
/// Returns a parse error when a `chunks_info` payload is malformed.
pub fn parse_event_fields(event_type: &str, data: &str) -> Result<WireEvent, StreamError> {
    match event_type {
        "chunks_info" => serde_json::from_str::<ChunksInfoData>(data)
            .map(|d| WireEvent::ChunksInfo(d.count))
            .map_err(|err| {
                StreamError::new(
                    StreamErrorKind::Parse,
                    format!("Failed to parse chunks_info: {err}"),
                )
            }),
        // Servers that send bare `data:` lines get the default event name.
        "content" | "message" | "" => {
            if data.is_empty() {
                return Ok(WireEvent::Ignored);
            }
            Ok(WireEvent::Content(
                serde_json::from_str::<ContentData>(data).map_or_else(|_| data.to_string(), |d| d.text),
            ))
        }
        "end" => Ok(WireEvent::End),
        "error" => Ok(WireEvent::Error(
            serde_json::from_str::<ErrorData>(data)
                .map(|d| d.message)
                .unwrap_or_else(|_| {
                    if data.trim().is_empty() {
                        "server reported an error".to_string()
                    } else {
                        data.to_string()
                    }
                }),
        )),
        other => {
            tracing::trace!(event = other, "ignoring SSE event");
            Ok(WireEvent::Ignored)
        }
    }
}
