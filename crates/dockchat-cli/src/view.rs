//! Line-oriented terminal output for rendered answers.
//!
//! A terminal cannot rewrite what it already printed, so lines are written
//! once they are settled. The last line of a streaming document may still
//! grow and is held back until the next render or `finish`.

use std::io::{self, Write};

use dockchat_core::markdown::RenderedDocument;
use dockchat_core::{RenderView, Viewport};

pub struct TerminalView<W: Write + Send> {
    out: W,
    viewport: Viewport,
    lines: Vec<String>,
    printed: usize,
    offset: usize,
    error: Option<io::Error>,
}

impl<W: Write + Send> TerminalView<W> {
    pub fn new(out: W, viewport: Viewport) -> Self {
        Self {
            out,
            viewport,
            lines: Vec::new(),
            printed: 0,
            offset: 0,
            error: None,
        }
    }

    /// Prints every line not yet written, including the held-back one.
    pub fn finish(&mut self) -> io::Result<()> {
        self.flush_until(self.lines.len());
        self.error.take().map_or(Ok(()), Err)
    }

    #[cfg(test)]
    pub fn into_inner(self) -> W {
        self.out
    }

    fn flush_until(&mut self, end: usize) {
        if self.error.is_some() || end <= self.printed {
            return;
        }
        let result = self.lines[self.printed..end]
            .iter()
            .try_for_each(|line| writeln!(self.out, "{}", line.trim_end()))
            .and_then(|()| self.out.flush());
        match result {
            Ok(()) => self.printed = end,
            Err(err) => self.error = Some(err),
        }
    }
}

impl<W: Write + Send> RenderView for TerminalView<W> {
    fn viewport(&self) -> Viewport {
        self.viewport
    }

    fn present(&mut self, document: &RenderedDocument) {
        self.lines = document.lines.iter().map(|l| l.plain_text()).collect();
        self.flush_until(self.lines.len().saturating_sub(1));
    }

    fn scroll_offset(&self) -> usize {
        self.offset
    }

    fn max_scroll_offset(&self) -> usize {
        self.lines.len().saturating_sub(self.viewport.height_lines)
    }

    fn set_scroll_offset(&mut self, offset: usize) {
        self.offset = offset.min(self.max_scroll_offset());
    }
}
