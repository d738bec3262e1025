//! Turn lifecycle: question in, streamed answer rendered, exchange stored.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Result;
use dockchat_types::{ChatRequest, HistoryMessage, StreamEvent};
use tokio::sync::OwnedMutexGuard;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::buffer::StreamingRenderBuffer;
use crate::config::TurnSettings;
use crate::history::HistoryStore;
use crate::links::{HostSignal, LinkAction, route_link};
use crate::markdown::{ANSWER_SEPARATOR, feedback_prompt};
use crate::stream::{ChatStreamClient, StreamHandle};

const DEFAULT_STOP_WAIT: Duration = Duration::from_secs(3);

type LinkOpener = Box<dyn Fn(&str) -> std::io::Result<()> + Send + Sync>;

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnEnd {
    Completed { chunk_count: u64 },
    Failed { message: String },
    Stopped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TurnOutcome {
    pub end: TurnEnd,
    /// Reference count announced by the server, if any.
    pub references: Option<u64>,
    /// History key of the stored exchange; `None` if storing failed.
    pub timestamp: Option<i64>,
}

/// One chat conversation bound to a render buffer and a history store.
pub struct ChatSession {
    buffer: Arc<StreamingRenderBuffer>,
    client: Arc<dyn ChatStreamClient>,
    history: Arc<dyn HistoryStore>,
    settings: TurnSettings,
    stop_wait: Duration,
    signals: UnboundedSender<HostSignal>,
    opener: LinkOpener,
    turn_gate: Arc<tokio::sync::Mutex<()>>,
    active_stop: Mutex<Option<CancellationToken>>,
    exchanges: Mutex<Vec<(String, String)>>,
    last_timestamp: Mutex<Option<i64>>,
}

impl ChatSession {
    pub fn new(
        buffer: Arc<StreamingRenderBuffer>,
        client: Arc<dyn ChatStreamClient>,
        history: Arc<dyn HistoryStore>,
        settings: TurnSettings,
        signals: UnboundedSender<HostSignal>,
    ) -> Self {
        Self {
            buffer,
            client,
            history,
            settings,
            stop_wait: DEFAULT_STOP_WAIT,
            signals,
            opener: Box::new(|url: &str| open::that(url)),
            turn_gate: Arc::new(tokio::sync::Mutex::new(())),
            active_stop: Mutex::new(None),
            exchanges: Mutex::new(Vec::new()),
            last_timestamp: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn with_stop_wait(mut self, wait: Duration) -> Self {
        self.stop_wait = wait;
        self
    }

    /// Replaces the system browser launcher used for http(s) links.
    #[must_use]
    pub fn with_link_opener(
        mut self,
        opener: impl Fn(&str) -> std::io::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.opener = Box::new(opener);
        self
    }

    pub fn buffer(&self) -> &Arc<StreamingRenderBuffer> {
        &self.buffer
    }

    pub fn settings(&self) -> &TurnSettings {
        &self.settings
    }

    /// Starts a turn once the previous one has been finalized.
    ///
    /// The returned handle must be driven with [`TurnHandle::run`].
    pub async fn submit(&self, question: &str) -> TurnHandle<'_> {
        let gate = Arc::clone(&self.turn_gate).lock_owned().await;
        // Stoppable from here on, even while the preamble renders.
        let stop = CancellationToken::new();
        *self.lock_active_stop() = Some(stop.clone());

        let question = question.trim().to_string();
        self.buffer.begin_turn();
        self.buffer
            .append(&format!("**Question: {question}**\n\n"), true)
            .await;
        self.buffer.append("**Answer:**\n\n", true).await;
        let answer_start = self.buffer.get_raw_content().len();

        let request = self.build_request(&question);
        tracing::info!(
            db = %request.db_name,
            history = request.history.len(),
            "turn started"
        );
        let stream = self.client.start(request);

        TurnHandle {
            session: self,
            stream,
            stop,
            question,
            answer_start,
            _gate: gate,
        }
    }

    /// Submits `question` and drives the turn to completion.
    ///
    /// # Errors
    /// See [`TurnHandle::run`].
    pub async fn ask(&self, question: &str) -> Result<TurnOutcome> {
        self.submit(question).await.run().await
    }

    /// Stops the running turn, if any, and waits until it is finalized.
    ///
    /// Must be called from a different task than the one driving the turn.
    pub async fn stop(&self) {
        let token = self.lock_active_stop().clone();
        if let Some(token) = token {
            token.cancel();
        }
        let _finished = self.turn_gate.lock().await;
    }

    /// Routes an activated link. Counts as user interaction for scrolling.
    pub fn activate_link(&self, url: &str) -> LinkAction {
        self.buffer.mark_user_scrolled();
        let action = route_link(url);
        match &action {
            LinkAction::OpenSettings => self.signal(HostSignal::OpenSettings),
            LinkAction::Feedback(score) => {
                tracing::info!(score, "feedback submitted");
                self.signal(HostSignal::FeedbackSubmitted(*score));
            }
            LinkAction::OpenExternal(target) => {
                if let Err(err) = (self.opener)(target) {
                    tracing::warn!(url = %target, error = %err, "failed to open link");
                    self.signal(HostSignal::Notice(format!("Could not open {target}: {err}")));
                }
            }
            LinkAction::Ignored => tracing::debug!(url, "ignoring link"),
        }
        action
    }

    /// URL of the link or image at a rendered position.
    pub fn link_at(&self, line: usize, column: usize) -> Option<String> {
        self.buffer
            .document()
            .hit_test(line, column)
            .map(|hit| hit.url().to_string())
    }

    /// Shows a stored exchange. Returns false if `timestamp` is unknown.
    ///
    /// # Errors
    /// Fails if the history store cannot be read.
    pub async fn show_history(&self, timestamp: i64) -> Result<bool> {
        let Some(record) = self.history.get(timestamp)? else {
            return Ok(false);
        };
        let _idle = self.turn_gate.lock().await;
        self.buffer
            .load(&format!(
                "**Question: {}**\n\n**Answer:**\n\n{}",
                record.question, record.answer
            ))
            .await;
        Ok(true)
    }

    /// Empties the view, the image cache and the multi-turn context.
    pub async fn clear(&self) {
        let _idle = self.turn_gate.lock().await;
        self.buffer.clear().await;
        self.exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    fn build_request(&self, question: &str) -> ChatRequest {
        let history = if self.settings.multi_turn {
            self.exchanges
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .iter()
                .flat_map(|(q, a)| [HistoryMessage::user(q.clone()), HistoryMessage::assistant(a.clone())])
                .collect()
        } else {
            Vec::new()
        };

        ChatRequest {
            prompt: question.to_string(),
            history,
            db_name: self.settings.db_name.clone(),
            similarity_threshold: self.settings.similarity_threshold,
            chunk_cnt: self.settings.chunk_cnt,
            email: self.settings.email.clone(),
            version: self.settings.version.clone(),
        }
    }

    fn signal(&self, signal: HostSignal) {
        // The host may have stopped listening; signals are advisory.
        let _ = self.signals.send(signal);
    }

    fn lock_active_stop(&self) -> std::sync::MutexGuard<'_, Option<CancellationToken>> {
        self.active_stop
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a finished exchange under a strictly increasing timestamp.
    fn record(&self, question: &str, answer: &str) -> Result<i64> {
        let mut last = self
            .last_timestamp
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if last.is_none() {
            *last = self.history.latest_timestamp()?;
        }
        let now = chrono::Utc::now().timestamp();
        let timestamp = last.map_or(now, |prev| now.max(prev + 1));
        self.history.put(timestamp, question, answer)?;
        *last = Some(timestamp);
        Ok(timestamp)
    }
}

/// A running turn. Dropping it without `run` cancels the stream.
pub struct TurnHandle<'a> {
    session: &'a ChatSession,
    stream: StreamHandle,
    stop: CancellationToken,
    question: String,
    answer_start: usize,
    _gate: OwnedMutexGuard<()>,
}

impl TurnHandle<'_> {
    /// Token that stops this turn when cancelled.
    pub fn stopper(&self) -> CancellationToken {
        self.stop.clone()
    }

    /// Consumes stream events in order until the terminal one (or a stop),
    /// finalizes the answer and stores the exchange.
    ///
    /// # Errors
    /// Currently infallible; a failed history write is logged and reported
    /// through `HostSignal::Notice` instead.
    pub async fn run(mut self) -> Result<TurnOutcome> {
        let session = self.session;
        let buffer = &session.buffer;
        let mut references = None;
        let mut chunks = 0u64;

        let end = loop {
            let event = tokio::select! {
                biased;
                () = self.stop.cancelled() => None,
                event = self.stream.next_event() => Some(event),
            };

            let Some(event) = event else {
                if let Err(timeout) = self.stream.stop(session.stop_wait).await {
                    tracing::warn!(error = %timeout, "cancellation timeout");
                }
                // Chunks already delivered stay part of the answer.
                while let Some(event) = self.stream.next_event().await {
                    if let StreamEvent::Chunk { text } = event {
                        chunks += 1;
                        buffer.append(&text, true).await;
                    }
                }
                tracing::info!("turn stopped by user");
                break TurnEnd::Stopped;
            };

            match event {
                Some(StreamEvent::Chunk { text }) => {
                    chunks += 1;
                    buffer.append(&text, true).await;
                }
                Some(StreamEvent::ChunksInfo { count }) => {
                    tracing::info!(count, "answer references");
                    references = Some(count);
                }
                Some(StreamEvent::Ended { chunk_count }) => {
                    break TurnEnd::Completed { chunk_count };
                }
                Some(StreamEvent::Error { message }) => {
                    buffer.append(&message, true).await;
                    break TurnEnd::Failed { message };
                }
                // Producer vanished without a terminal event.
                None => break TurnEnd::Completed { chunk_count: chunks },
            }
        };

        buffer.finalize(session.settings.show_feedback).await;
        *session.lock_active_stop() = None;

        let raw = buffer.get_raw_content();
        let tail = raw.get(self.answer_start..).unwrap_or_default();
        let answer = tail.strip_suffix(&feedback_prompt()).unwrap_or(tail);

        let timestamp = match session.record(&self.question, answer) {
            Ok(ts) => Some(ts),
            Err(err) => {
                tracing::warn!(error = %err, "failed to store history");
                session.signal(HostSignal::Notice(format!("History not saved: {err:#}")));
                None
            }
        };

        session
            .exchanges
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((
                self.question.clone(),
                answer.strip_suffix(ANSWER_SEPARATOR).unwrap_or(answer).to_string(),
            ));

        tracing::info!(?end, ?timestamp, "turn finished");
        Ok(TurnOutcome {
            end,
            references,
            timestamp,
        })
    }
}
