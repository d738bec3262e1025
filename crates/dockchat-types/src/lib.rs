//! Shared wire and persistence types for dockchat.
//!
//! `StreamEvent` is the contract between the chat stream client and the
//! render consumer. `HistoryRecord` is the persisted form of one finished turn.

use serde::{Deserialize, Serialize};

/// Events emitted by the chat stream client, in emission order.
///
/// A well-formed stream is zero or more `ChunksInfo`, interleaved `Chunk`s,
/// then exactly one terminal `Ended` or `Error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Incremental answer text.
    Chunk { text: String },

    /// Number of knowledge-base references backing the answer.
    ChunksInfo { count: u64 },

    /// Stream finished normally after `chunk_count` text chunks.
    Ended { chunk_count: u64 },

    /// Stream failed; no further events follow.
    Error { message: String },
}

impl StreamEvent {
    /// Returns true for `Ended` and `Error`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamEvent::Ended { .. } | StreamEvent::Error { .. })
    }
}

/// One prior exchange sent as context when multi-turn chat is enabled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: String,
}

impl HistoryMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request body for the streaming chat endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
    #[serde(default)]
    pub history: Vec<HistoryMessage>,
    pub db_name: String,
    pub similarity_threshold: f32,
    pub chunk_cnt: u32,
    pub email: String,
    pub version: String,
}

/// A finished question/answer exchange. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryRecord {
    /// Unix timestamp in seconds; unique key within a store.
    pub timestamp: i64,
    pub question: String,
    /// Raw markdown as streamed, before post-processing.
    pub answer: String,
}

/// Listing entry for a stored exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistorySummary {
    pub timestamp: i64,
    pub question_preview: String,
}

/// Longest question preview shown in history listings (in chars).
pub const QUESTION_PREVIEW_CHARS: usize = 48;

impl HistoryRecord {
    /// Builds the listing entry: first line of the question, truncated.
    pub fn summary(&self) -> HistorySummary {
        let first_line = self.question.lines().next().unwrap_or("").trim();
        let mut preview: String = first_line.chars().take(QUESTION_PREVIEW_CHARS).collect();
        if first_line.chars().count() > QUESTION_PREVIEW_CHARS {
            preview.push('…');
        }
        HistorySummary {
            timestamp: self.timestamp,
            question_preview: preview,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn stream_event_serializes_with_type_tag() {
        let value = serde_json::to_value(StreamEvent::Chunk {
            text: "hi".to_string(),
        })
        .unwrap();
        assert_eq!(value, json!({"type": "chunk", "text": "hi"}));

        let value = serde_json::to_value(StreamEvent::Ended { chunk_count: 3 }).unwrap();
        assert_eq!(value, json!({"type": "ended", "chunk_count": 3}));
    }

    #[test]
    fn terminal_events() {
        assert!(StreamEvent::Ended { chunk_count: 0 }.is_terminal());
        assert!(
            StreamEvent::Error {
                message: "x".to_string()
            }
            .is_terminal()
        );
        assert!(!StreamEvent::ChunksInfo { count: 2 }.is_terminal());
        assert!(
            !StreamEvent::Chunk {
                text: String::new()
            }
            .is_terminal()
        );
    }

    #[test]
    fn chat_request_body_shape() {
        let request = ChatRequest {
            prompt: "How do I reproject a layer?".to_string(),
            history: vec![],
            db_name: "QGIS".to_string(),
            similarity_threshold: 0.5,
            chunk_cnt: 5,
            email: String::new(),
            version: "0.3".to_string(),
        };

        assert_eq!(
            serde_json::to_value(&request).unwrap(),
            json!({
                "prompt": "How do I reproject a layer?",
                "history": [],
                "db_name": "QGIS",
                "similarity_threshold": 0.5,
                "chunk_cnt": 5,
                "email": "",
                "version": "0.3",
            })
        );
    }

    #[test]
    fn summary_uses_first_line_and_truncates() {
        let record = HistoryRecord {
            timestamp: 7,
            question: format!("{}\nsecond line", "a".repeat(60)),
            answer: String::new(),
        };
        let summary = record.summary();
        assert_eq!(summary.timestamp, 7);
        assert_eq!(summary.question_preview.chars().count(), QUESTION_PREVIEW_CHARS + 1);
        assert!(summary.question_preview.ends_with('…'));

        let short = HistoryRecord {
            timestamp: 8,
            question: "short one".to_string(),
            answer: String::new(),
        };
        assert_eq!(short.summary().question_preview, "short one");
    }
}
