//! The seam between the render pipeline and whatever displays it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::markdown::{RenderOptions, RenderedDocument};

/// Geometry a view reports before each render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    /// Pixel width images are fitted to. 0 disables image scaling.
    pub width_px: u32,
    /// Text wrap width in columns.
    pub columns: usize,
    /// Pixel height of one text line. 0 renders images as single lines.
    pub line_height_px: u32,
    /// Visible height in lines.
    pub height_lines: usize,
}

impl Viewport {
    pub fn render_options(&self) -> RenderOptions {
        RenderOptions {
            columns: self.columns,
            line_height_px: self.line_height_px,
        }
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Self {
            width_px: 0,
            columns: 80,
            line_height_px: 0,
            height_lines: 24,
        }
    }
}

/// A display surface for rendered answers.
///
/// Offsets are in lines from the top of the document. `present` replaces
/// the whole document; the buffer applies the scroll policy right after.
pub trait RenderView: Send {
    fn viewport(&self) -> Viewport;

    fn present(&mut self, document: &RenderedDocument);

    fn scroll_offset(&self) -> usize;

    fn max_scroll_offset(&self) -> usize;

    /// Moves the visible window. Implementations clamp to `max_scroll_offset`.
    fn set_scroll_offset(&mut self, offset: usize);
}

/// In-memory view with terminal-like scroll math.
#[derive(Debug, Clone, Default)]
pub struct HeadlessView {
    viewport: Viewport,
    line_count: usize,
    offset: usize,
    presented: usize,
    last_text: String,
}

impl HeadlessView {
    pub fn new(viewport: Viewport) -> Self {
        Self {
            viewport,
            ..Self::default()
        }
    }

    /// Number of `present` calls so far.
    pub fn presented(&self) -> usize {
        self.presented
    }

    /// Plain text of the last presented document.
    pub fn last_text(&self) -> &str {
        &self.last_text
    }
}

impl RenderView for HeadlessView {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn present(&mut self, document: &RenderedDocument) {
        self.line_count = document.line_count();
        self.last_text = document.plain_text();
        self.presented += 1;
        self.offset = self.offset.min(self.max_scroll_offset());
    }

    fn scroll_offset(&self) -> usize {
        self.offset
    }

    fn max_scroll_offset(&self) -> usize {
        self.line_count.saturating_sub(self.viewport.height_lines)
    }

    fn set_scroll_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.max_scroll_offset());
    }
}

/// Lets the host keep a handle on a view it hands to the buffer.
impl<V: RenderView> RenderView for Arc<Mutex<V>> {
    fn viewport(&self) -> Viewport {
        lock(self).viewport()
    }

    fn present(&mut self, document: &RenderedDocument) {
        lock(self).present(document);
    }

    fn scroll_offset(&self) -> usize {
        lock(self).scroll_offset()
    }

    fn max_scroll_offset(&self) -> usize {
        lock(self).max_scroll_offset()
    }

    fn set_scroll_offset(&mut self, offset: usize) {
        lock(self).set_scroll_offset(offset);
    }
}

fn lock<V>(view: &Mutex<V>) -> MutexGuard<'_, V> {
    view.lock().unwrap_or_else(PoisonError::into_inner)
}
