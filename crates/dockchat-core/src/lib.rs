//! Core dockchat library (stream client, render buffer, history, session).

pub mod buffer;
pub mod config;
pub mod history;
pub mod images;
pub mod links;
pub mod logging;
pub mod markdown;
pub mod session;
pub mod stream;
pub mod view;

pub use buffer::StreamingRenderBuffer;
pub use config::{Config, TurnSettings};
pub use history::{HistoryStore, JsonlHistoryStore, MemoryHistoryStore};
pub use links::{HostSignal, LinkAction};
pub use session::{ChatSession, TurnEnd, TurnHandle, TurnOutcome};
pub use stream::{ChatStreamClient, HttpChatStreamClient, StreamHandle};
pub use view::{HeadlessView, RenderView, Viewport};
