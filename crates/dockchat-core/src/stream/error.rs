use std::fmt;
use std::time::Duration;

use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamErrorKind {
    /// Non-success HTTP status.
    HttpStatus,
    /// Connect failure, reset, or a broken SSE stream.
    Transport,
    /// Payload the client could not understand.
    Parse,
    /// The server sent an `error` event.
    Server,
}

impl fmt::Display for StreamErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamErrorKind::HttpStatus => write!(f, "http_status"),
            StreamErrorKind::Transport => write!(f, "transport"),
            StreamErrorKind::Parse => write!(f, "parse"),
            StreamErrorKind::Server => write!(f, "server"),
        }
    }
}

/// Failure of a chat stream. Its `Display` text is what ends up in the
/// answer buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamError {
    pub kind: StreamErrorKind,
    pub message: String,
}

impl StreamError {
    pub fn new(kind: StreamErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Builds an HTTP status error, lifting `message`/`detail` out of a JSON
    /// body when there is one.
    pub fn http_status(status: u16, body: &str) -> Self {
        if let Ok(json) = serde_json::from_str::<Value>(body)
            && let Some(msg) = json
                .get("message")
                .or_else(|| json.get("detail"))
                .and_then(Value::as_str)
        {
            return Self::new(StreamErrorKind::HttpStatus, format!("HTTP {status}: {msg}"));
        }
        Self::new(StreamErrorKind::HttpStatus, format!("HTTP {status}"))
    }

    pub fn transport(err: &reqwest::Error) -> Self {
        let message = if err.is_connect() {
            format!("Unable to reach the server: {err}")
        } else if err.is_timeout() {
            format!("Request timed out: {err}")
        } else {
            format!("Connection error: {err}")
        };
        Self::new(StreamErrorKind::Transport, message)
    }
}

impl fmt::Display for StreamError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for StreamError {}

/// The stream task did not exit within the stop wait. Never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CancellationTimeout {
    pub waited: Duration,
}

impl fmt::Display for CancellationTimeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "stream did not stop within {} ms",
            self.waited.as_millis()
        )
    }
}

impl std::error::Error for CancellationTimeout {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_prefers_json_message() {
        let err = StreamError::http_status(503, r#"{"message": "maintenance"}"#);
        assert_eq!(err.to_string(), "HTTP 503: maintenance");
        assert_eq!(err.kind, StreamErrorKind::HttpStatus);

        let err = StreamError::http_status(422, r#"{"detail": "bad db_name"}"#);
        assert_eq!(err.to_string(), "HTTP 422: bad db_name");

        assert_eq!(StreamError::http_status(500, "<html/>").to_string(), "HTTP 500");
    }

    #[test]
    fn cancellation_timeout_message() {
        let err = CancellationTimeout {
            waited: Duration::from_millis(3000),
        };
        assert_eq!(err.to_string(), "stream did not stop within 3000 ms");
    }
}
