//! Streaming chat client.
//!
//! The client runs on its own task and hands `StreamEvent`s to the consumer
//! over a bounded channel, in order. Text chunks, then exactly one terminal
//! `Ended` or `Error`. Cancellation is cooperative through a
//! `CancellationToken`, with a bounded wait on stop.

pub mod client;
pub mod error;
pub mod sse;

pub use client::{
    ChatStreamClient, DEFAULT_EVENT_CHANNEL_CAPACITY, EventSender, HttpChatStreamClient,
    STREAM_PATH, StreamHandle,
};
pub use error::{CancellationTimeout, StreamError, StreamErrorKind};
