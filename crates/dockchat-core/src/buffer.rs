//! The streaming render buffer.
//!
//! One raw markdown buffer per turn, appended to by the stream consumer and
//! re-rendered in full after every append. Two locks are involved:
//!
//! - `content` (`std::sync::Mutex`): held only to push text or copy it out.
//! - `gate` (`tokio::sync::Mutex`): owns the view and serializes render
//!   passes. It is only ever taken with `try_lock`; a caller that loses the
//!   race marks the render stale and returns, and whoever holds the gate
//!   runs another pass after releasing it. Every appended byte therefore
//!   reaches the view without appends ever waiting on a render.

use std::ops::Range;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures_util::future::join_all;
use tokio::sync::mpsc::UnboundedSender;

use crate::images::ImageResourceCache;
use crate::links::HostSignal;
use crate::markdown::postprocess::normalize_inline_previews;
use crate::markdown::{
    ANSWER_SEPARATOR, RenderedDocument, collect_image_urls, feedback_prompt, post_process,
    render_markdown,
};
use crate::view::RenderView;

/// Append-only text with fragment boundaries.
#[derive(Debug, Default, Clone)]
pub struct MarkdownBuffer {
    content: String,
    fragments: Vec<Range<usize>>,
}

impl MarkdownBuffer {
    pub fn push(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let start = self.content.len();
        self.content.push_str(text);
        self.fragments.push(start..self.content.len());
    }

    pub fn reset(&mut self) {
        self.content.clear();
        self.fragments.clear();
    }

    pub fn as_str(&self) -> &str {
        &self.content
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn fragment_count(&self) -> usize {
        self.fragments.len()
    }

    pub fn fragments(&self) -> impl Iterator<Item = &str> {
        self.fragments.iter().map(|r| &self.content[r.clone()])
    }
}

#[derive(Debug, Default)]
struct Content {
    raw: MarkdownBuffer,
    /// Post-processed display text, set by finalize/load.
    finalized: Option<String>,
}

struct RenderState {
    view: Box<dyn RenderView>,
}

pub struct StreamingRenderBuffer {
    content: Mutex<Content>,
    gate: tokio::sync::Mutex<RenderState>,
    stale: AtomicBool,
    stale_scroll: AtomicBool,
    auto_scroll: AtomicBool,
    /// Next render starts from the top instead of the saved offset.
    rewind: AtomicBool,
    document: Mutex<Arc<RenderedDocument>>,
    images: Arc<ImageResourceCache>,
    signals: Option<UnboundedSender<HostSignal>>,
}

impl StreamingRenderBuffer {
    pub fn new(view: Box<dyn RenderView>, images: Arc<ImageResourceCache>) -> Self {
        Self {
            content: Mutex::new(Content::default()),
            gate: tokio::sync::Mutex::new(RenderState { view }),
            stale: AtomicBool::new(false),
            stale_scroll: AtomicBool::new(false),
            auto_scroll: AtomicBool::new(true),
            rewind: AtomicBool::new(false),
            document: Mutex::new(Arc::new(RenderedDocument::default())),
            images,
            signals: None,
        }
    }

    /// Forwards image failure notices to the host.
    pub fn with_signals(mut self, signals: UnboundedSender<HostSignal>) -> Self {
        self.signals = Some(signals);
        self
    }

    pub fn images(&self) -> &Arc<ImageResourceCache> {
        &self.images
    }

    /// Starts a new turn: empty buffer, auto-scroll back on.
    pub fn begin_turn(&self) {
        self.reset_content();
        self.auto_scroll.store(true, Ordering::SeqCst);
    }

    /// Appends streamed text and re-renders.
    ///
    /// When a render is already running this only records the text; the
    /// running render picks it up before it lets go of the gate.
    pub async fn append(&self, text: &str, request_scroll: bool) {
        {
            let mut content = self.lock_content();
            content.raw.push(text);
            content.finalized = None;
        }
        self.render_latest(request_scroll).await;
    }

    /// Closes the answer: separator, optional feedback prompt, then the
    /// post-processed text becomes what is displayed.
    pub async fn finalize(&self, show_feedback: bool) {
        {
            let mut content = self.lock_content();
            content.raw.push(ANSWER_SEPARATOR);
            if show_feedback {
                content.raw.push(&feedback_prompt());
            }
        }
        self.seal().await;
        tracing::debug!(bytes = self.lock_content().raw.len(), "answer finalized");
    }

    /// Replaces the buffer with a stored answer and shows it from the top.
    pub async fn load(&self, markdown: &str) {
        self.reset_content();
        self.lock_content().raw.push(markdown);
        self.auto_scroll.store(false, Ordering::SeqCst);
        self.seal().await;
    }

    /// Any user scroll or click during a turn stops auto-scrolling until
    /// the next `begin_turn`.
    pub fn mark_user_scrolled(&self) {
        self.auto_scroll.store(false, Ordering::SeqCst);
    }

    pub fn auto_scroll(&self) -> bool {
        self.auto_scroll.load(Ordering::SeqCst)
    }

    pub fn get_raw_content(&self) -> String {
        self.lock_content().raw.as_str().to_string()
    }

    /// Text the view shows: post-processed once finalized, raw before.
    pub fn display_content(&self) -> String {
        let content = self.lock_content();
        content
            .finalized
            .clone()
            .unwrap_or_else(|| content.raw.as_str().to_string())
    }

    pub fn is_finalized(&self) -> bool {
        self.lock_content().finalized.is_some()
    }

    /// Empties the buffer and the image cache and re-renders.
    pub async fn clear(&self) {
        self.reset_content();
        self.images.clear();
        self.auto_scroll.store(true, Ordering::SeqCst);
        self.render_latest(false).await;
    }

    /// The last document handed to the view.
    pub fn document(&self) -> Arc<RenderedDocument> {
        self.document
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Runs `f` against the view once no render is in progress.
    pub async fn with_view<R>(&self, f: impl FnOnce(&mut dyn RenderView) -> R) -> R {
        let mut state = self.gate.lock().await;
        f(state.view.as_mut())
    }

    fn lock_content(&self) -> MutexGuard<'_, Content> {
        self.content.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn reset_content(&self) {
        let mut content = self.lock_content();
        content.raw.reset();
        content.finalized = None;
        self.rewind.store(true, Ordering::SeqCst);
    }

    async fn seal(&self) {
        let raw = self.get_raw_content();
        // Image outcomes must be known before failed images are rewritten.
        self.resolve_images(&normalize_inline_previews(&raw)).await;
        let finalized = post_process(&raw, |url| self.images.is_failed(url));
        {
            let mut content = self.lock_content();
            // Text appended while images resolved reopens the answer.
            if content.raw.len() == raw.len() {
                content.finalized = Some(finalized);
            }
        }
        self.render_latest(true).await;
    }

    async fn resolve_images(&self, markdown: &str) {
        let urls = collect_image_urls(markdown);
        if urls.is_empty() {
            return;
        }
        join_all(urls.iter().map(|url| self.images.resolve(url))).await;
        if let Some(signals) = &self.signals {
            for notice in self.images.take_notices() {
                let _ = signals.send(HostSignal::Notice(notice));
            }
        }
    }

    async fn render_latest(&self, request_scroll: bool) {
        let mut request_scroll = request_scroll;
        loop {
            let mut state = match self.gate.try_lock() {
                Ok(state) => state,
                Err(_) => {
                    self.stale_scroll.fetch_or(request_scroll, Ordering::SeqCst);
                    self.stale.store(true, Ordering::SeqCst);
                    // The holder may have checked `stale` just before we set
                    // it; one retry closes that window.
                    match self.gate.try_lock() {
                        Ok(state) => state,
                        Err(_) => return,
                    }
                }
            };

            self.stale.store(false, Ordering::SeqCst);
            let scroll = request_scroll || self.stale_scroll.swap(false, Ordering::SeqCst);
            self.render_pass(&mut state, scroll).await;
            drop(state);

            if !self.stale.load(Ordering::SeqCst) {
                return;
            }
            tracing::trace!("catch-up render");
            request_scroll = false;
        }
    }

    async fn render_pass(&self, state: &mut RenderState, request_scroll: bool) {
        let viewport = state.view.viewport();
        self.images.set_viewport_width(viewport.width_px);

        let markdown = self.display_content();
        self.resolve_images(&markdown).await;

        let document = render_markdown(&markdown, &viewport.render_options(), |url| {
            self.images.lookup(url)
        });

        let saved = if self.rewind.swap(false, Ordering::SeqCst) {
            0
        } else {
            state.view.scroll_offset()
        };
        state.view.present(&document);
        if request_scroll && self.auto_scroll() {
            let bottom = state.view.max_scroll_offset();
            state.view.set_scroll_offset(bottom);
        } else {
            state.view.set_scroll_offset(saved);
        }

        *self.document.lock().unwrap_or_else(PoisonError::into_inner) = Arc::new(document);
    }
}
