use std::future::Future;
use std::time::Duration;

use anyhow::{Context, Result};
use dockchat_types::{ChatRequest, StreamEvent};
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::{CancellationTimeout, StreamError, StreamErrorKind};
use super::sse::{SseParser, WireEvent};
use crate::config::Config;

const USER_AGENT: &str = concat!("dockchat/", env!("CARGO_PKG_VERSION"));

/// Path of the streaming endpoint, relative to the base URL.
pub const STREAM_PATH: &str = "/api/chat/stream";

/// Default capacity of the event channel between stream task and consumer.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 64;

/// Sending half handed to a stream producer.
///
/// Every send awaits channel capacity; chunks are never dropped.
#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::Sender<StreamEvent>,
}

impl EventSender {
    /// Returns false once the consumer has gone away.
    pub async fn send(&self, event: StreamEvent) -> bool {
        self.tx.send(event).await.is_ok()
    }
}

/// Anything that can start a chat stream.
pub trait ChatStreamClient: Send + Sync {
    fn start(&self, request: ChatRequest) -> StreamHandle;
}

/// Consumer side of a running stream: ordered events plus cancellation.
pub struct StreamHandle {
    events: mpsc::Receiver<StreamEvent>,
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

impl StreamHandle {
    /// Spawns `producer` on its own task with a fresh channel and token.
    pub fn spawn<F, Fut>(capacity: usize, producer: F) -> Self
    where
        F: FnOnce(EventSender, CancellationToken) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (tx, events) = mpsc::channel(capacity.max(1));
        let cancel = CancellationToken::new();
        let task = tokio::spawn(producer(EventSender { tx }, cancel.clone()));
        Self {
            events,
            cancel,
            task: Some(task),
        }
    }

    /// Next event in emission order; `None` once the producer is gone.
    pub async fn next_event(&mut self) -> Option<StreamEvent> {
        self.events.recv().await
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancels the stream and waits up to `wait` for its task to exit.
    ///
    /// On timeout the task is aborted and the caller carries on.
    ///
    /// # Errors
    /// Returns `CancellationTimeout` if the task outlived `wait`.
    pub async fn stop(&mut self, wait: Duration) -> Result<(), CancellationTimeout> {
        self.cancel.cancel();
        self.events.close();

        let Some(mut task) = self.task.take() else {
            return Ok(());
        };
        if tokio::time::timeout(wait, &mut task).await.is_ok() {
            tracing::debug!("chat stream stopped");
            Ok(())
        } else {
            tracing::warn!(
                wait_ms = wait.as_millis() as u64,
                "chat stream did not stop in time; abandoning it"
            );
            task.abort();
            Err(CancellationTimeout { waited: wait })
        }
    }
}

impl Drop for StreamHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Streams answers from the knowledge-base chat service over SSE.
#[derive(Clone)]
pub struct HttpChatStreamClient {
    http: reqwest::Client,
    endpoint: String,
    capacity: usize,
}

impl HttpChatStreamClient {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(base_url: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("build chat HTTP client")?;
        Ok(Self {
            http,
            endpoint: format!("{}{STREAM_PATH}", base_url.trim_end_matches('/')),
            capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
        })
    }

    /// # Errors
    /// Returns an error if the configured base URL is invalid.
    pub fn from_config(config: &Config) -> Result<Self> {
        Self::new(&config.effective_base_url()?)
    }

    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

impl ChatStreamClient for HttpChatStreamClient {
    fn start(&self, request: ChatRequest) -> StreamHandle {
        let http = self.http.clone();
        let endpoint = self.endpoint.clone();
        StreamHandle::spawn(self.capacity, move |sender, cancel| async move {
            tokio::select! {
                biased;
                () = cancel.cancelled() => {
                    tracing::debug!("chat stream cancelled");
                }
                () = run_stream(http, endpoint, request, sender) => {}
            }
        })
    }
}

async fn run_stream(
    http: reqwest::Client,
    endpoint: String,
    request: ChatRequest,
    sender: EventSender,
) {
    let terminal = match pump(&http, &endpoint, &request, &sender).await {
        Ok(chunk_count) => StreamEvent::Ended { chunk_count },
        Err(err) => {
            tracing::warn!(kind = %err.kind, error = %err, "chat stream failed");
            StreamEvent::Error {
                message: err.to_string(),
            }
        }
    };
    sender.send(terminal).await;
}

/// Forwards events until the stream ends; returns the chunk count.
async fn pump(
    http: &reqwest::Client,
    endpoint: &str,
    request: &ChatRequest,
    sender: &EventSender,
) -> Result<u64, StreamError> {
    tracing::info!(endpoint, db = %request.db_name, "opening chat stream");
    let response = http
        .post(endpoint)
        .header("Accept", "text/event-stream")
        .json(request)
        .send()
        .await
        .map_err(|e| StreamError::transport(&e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(StreamError::http_status(status.as_u16(), &body));
    }

    let mut chunk_count = 0u64;
    let mut parser = SseParser::new(response.bytes_stream());
    while let Some(event) = parser.next().await {
        let forwarded = match event? {
            WireEvent::Content(text) => {
                chunk_count += 1;
                StreamEvent::Chunk { text }
            }
            WireEvent::ChunksInfo(count) => StreamEvent::ChunksInfo { count },
            WireEvent::End => return Ok(chunk_count),
            WireEvent::Error(message) => {
                return Err(StreamError::new(StreamErrorKind::Server, message));
            }
            WireEvent::Ignored => continue,
        };
        if !sender.send(forwarded).await {
            tracing::debug!("stream consumer dropped");
            return Ok(chunk_count);
        }
    }

    // Closed without an `end` event.
    Ok(chunk_count)
}

#[cfg(test)]
mod tests {
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;

    fn request() -> ChatRequest {
        ChatRequest {
            prompt: "How do I clip a layer?".to_string(),
            history: Vec::new(),
            db_name: "QGIS".to_string(),
            similarity_threshold: 0.5,
            chunk_cnt: 5,
            email: "me@example.com".to_string(),
            version: "0.3".to_string(),
        }
    }

    fn sse(body: &str) -> ResponseTemplate {
        ResponseTemplate::new(200)
            .insert_header("content-type", "text/event-stream")
            .set_body_string(body.to_string())
    }

    async fn drain(handle: &mut StreamHandle) -> Vec<StreamEvent> {
        let mut events = Vec::new();
        while let Some(event) = handle.next_event().await {
            let terminal = event.is_terminal();
            events.push(event);
            if terminal {
                break;
            }
        }
        events
    }

    #[tokio::test]
    async fn streams_events_in_order() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .and(header("accept", "text/event-stream"))
            .and(body_partial_json(serde_json::json!({
                "prompt": "How do I clip a layer?",
                "db_name": "QGIS",
                "chunk_cnt": 5,
                "email": "me@example.com",
                "version": "0.3"
            })))
            .respond_with(sse(
                "event: chunks_info\ndata: {\"count\": 2}\n\n\
                 event: content\ndata: {\"text\": \"Hello \"}\n\n\
                 event: content\ndata: {\"text\": \"world\"}\n\n\
                 event: end\ndata: {}\n\n",
            ))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpChatStreamClient::new(&server.uri()).unwrap();
        let mut handle = client.start(request());
        assert_eq!(
            drain(&mut handle).await,
            vec![
                StreamEvent::ChunksInfo { count: 2 },
                StreamEvent::Chunk {
                    text: "Hello ".to_string()
                },
                StreamEvent::Chunk {
                    text: "world".to_string()
                },
                StreamEvent::Ended { chunk_count: 2 },
            ]
        );
    }

    #[tokio::test]
    async fn missing_end_event_still_ends() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(sse("data: {\"text\": \"only\"}\n\n"))
            .mount(&server)
            .await;

        let client = HttpChatStreamClient::new(&format!("{}/", server.uri())).unwrap();
        let mut handle = client.start(request());
        let events = drain(&mut handle).await;
        assert_eq!(events.last(), Some(&StreamEvent::Ended { chunk_count: 1 }));
    }

    #[tokio::test]
    async fn server_error_event_is_terminal() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(sse(
                "event: content\ndata: {\"text\": \"Part\"}\n\n\
                 event: error\ndata: {\"message\": \"quota exceeded\"}\n\n\
                 event: content\ndata: {\"text\": \"ignored\"}\n\n",
            ))
            .mount(&server)
            .await;

        let client = HttpChatStreamClient::new(&server.uri()).unwrap();
        let mut handle = client.start(request());
        let events = drain(&mut handle).await;
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1],
            StreamEvent::Error {
                message: "quota exceeded".to_string()
            }
        );
    }

    #[tokio::test]
    async fn http_status_becomes_error_event() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(
                ResponseTemplate::new(503).set_body_string(r#"{"message":"maintenance"}"#),
            )
            .mount(&server)
            .await;

        let client = HttpChatStreamClient::new(&server.uri()).unwrap();
        let mut handle = client.start(request());
        assert_eq!(
            drain(&mut handle).await,
            vec![StreamEvent::Error {
                message: "HTTP 503: maintenance".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn unreachable_server_becomes_error_event() {
        let client = HttpChatStreamClient::new("http://127.0.0.1:9").unwrap();
        let mut handle = client.start(request());
        let events = drain(&mut handle).await;
        assert!(matches!(
            events.as_slice(),
            [StreamEvent::Error { message }] if message.starts_with("Unable to reach the server")
        ));
    }

    #[tokio::test]
    async fn stop_cancels_a_slow_stream() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(STREAM_PATH))
            .respond_with(sse("event: end\ndata: {}\n\n").set_delay(Duration::from_secs(10)))
            .mount(&server)
            .await;

        let client = HttpChatStreamClient::new(&server.uri()).unwrap();
        let mut handle = client.start(request());
        let started = std::time::Instant::now();
        handle.stop(Duration::from_secs(3)).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(3));
        assert!(handle.is_cancelled());
    }

    #[tokio::test]
    async fn stop_times_out_on_uncooperative_producer() {
        let mut handle = StreamHandle::spawn(4, |_sender, _cancel| async {
            // Ignores cancellation entirely.
            tokio::time::sleep(Duration::from_secs(30)).await;
        });
        let err = handle.stop(Duration::from_millis(50)).await.unwrap_err();
        assert_eq!(err.waited, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn producer_sends_are_never_dropped() {
        let mut handle = StreamHandle::spawn(1, |sender, _cancel| async move {
            for i in 0..100 {
                sender
                    .send(StreamEvent::Chunk {
                        text: i.to_string(),
                    })
                    .await;
            }
            sender.send(StreamEvent::Ended { chunk_count: 100 }).await;
        });
        let events = drain(&mut handle).await;
        assert_eq!(events.len(), 101);
        assert_eq!(
            events[99],
            StreamEvent::Chunk {
                text: "99".to_string()
            }
        );
    }
}
