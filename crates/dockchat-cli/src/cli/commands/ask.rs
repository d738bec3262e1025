//! Ask command handler.

use std::io::{self, Stdout};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context, Result, bail};
use dockchat_core::config::{Config, TurnSettings};
use dockchat_core::history::{HistoryStore, JsonlHistoryStore};
use dockchat_core::images::ImageResourceCache;
use dockchat_core::{
    ChatSession, HostSignal, HttpChatStreamClient, StreamingRenderBuffer, TurnEnd, Viewport,
};
use tokio::sync::mpsc::{UnboundedReceiver, unbounded_channel};

use crate::view::TerminalView;

/// Cell width assumed when fitting images to the terminal.
const CELL_WIDTH_PX: u32 = 8;

pub struct AskOptions<'a> {
    pub question: &'a str,
    pub config: &'a Config,
    pub show_feedback: bool,
    pub width: usize,
}

pub async fn run(options: AskOptions<'_>) -> Result<()> {
    let question = options.question.trim();
    if question.is_empty() {
        bail!("Question must not be empty");
    }

    let mut settings = options.config.turn_settings();
    settings.show_feedback &= options.show_feedback;

    let mut terminal = TerminalSession::open(options.config, settings, options.width)?;
    let turn = terminal.session.submit(question).await;

    let stopper = turn.stopper();
    let interrupt = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received; stopping turn");
            stopper.cancel();
        }
    });
    let outcome = turn.run().await.context("run turn")?;
    interrupt.abort();
    tracing::info!(end = ?outcome.end, "ask finished");

    terminal.finish()?;

    match outcome.end {
        TurnEnd::Completed { .. } => Ok(()),
        TurnEnd::Stopped => {
            eprintln!("Stopped.");
            Ok(())
        }
        TurnEnd::Failed { message } => bail!("Answer failed: {message}"),
    }
}

/// A chat session printing to stdout.
pub(super) struct TerminalSession {
    pub session: ChatSession,
    view: Arc<Mutex<TerminalView<Stdout>>>,
    signals: UnboundedReceiver<HostSignal>,
}

impl TerminalSession {
    pub fn open(config: &Config, settings: TurnSettings, width: usize) -> Result<Self> {
        let columns = width.max(20);
        let viewport = Viewport {
            width_px: u32::try_from(columns).unwrap_or(u32::MAX / CELL_WIDTH_PX) * CELL_WIDTH_PX,
            columns,
            line_height_px: 0,
            ..Viewport::default()
        };
        let view = Arc::new(Mutex::new(TerminalView::new(io::stdout(), viewport)));

        let (tx, signals) = unbounded_channel();
        let images =
            Arc::new(ImageResourceCache::new(&config.images).context("create image cache")?);
        let buffer = StreamingRenderBuffer::new(Box::new(Arc::clone(&view)), images)
            .with_signals(tx.clone());
        let client = HttpChatStreamClient::from_config(config).context("create chat client")?;
        let history: Arc<dyn HistoryStore> = Arc::new(JsonlHistoryStore::open_default());

        let session = ChatSession::new(Arc::new(buffer), Arc::new(client), history, settings, tx)
            .with_stop_wait(config.stop_wait());

        Ok(Self {
            session,
            view,
            signals,
        })
    }

    /// Prints what is still held back, the answer's web links and any
    /// notices raised along the way.
    pub fn finish(&mut self) -> Result<()> {
        self.view
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .finish()
            .context("write answer")?;

        let document = self.session.buffer().document();
        let mut urls: Vec<&str> = Vec::new();
        for link in &document.links {
            let url = link.url.as_str();
            if url.starts_with("http") && !urls.contains(&url) {
                urls.push(url);
            }
        }
        if !urls.is_empty() {
            println!("Links:");
            for (i, url) in urls.iter().enumerate() {
                println!("  [{}] {url}", i + 1);
            }
        }

        while let Ok(signal) = self.signals.try_recv() {
            if let HostSignal::Notice(text) = signal {
                eprintln!("note: {text}");
            }
        }
        Ok(())
    }
}
