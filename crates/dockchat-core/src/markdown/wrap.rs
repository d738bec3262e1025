use unicode_width::{UnicodeWidthChar, UnicodeWidthStr};

use super::document::{RenderedLine, Style, StyledSpan};

/// Wrapping parameters, with hanging-indent prefixes for list items.
#[derive(Debug, Clone, Default)]
pub struct WrapOptions {
    pub width: usize,
    pub first_prefix: Vec<StyledSpan>,
    pub rest_prefix: Vec<StyledSpan>,
}

impl WrapOptions {
    pub fn new(width: usize) -> Self {
        Self {
            width,
            first_prefix: vec![],
            rest_prefix: vec![],
        }
    }
}

fn spans_width(spans: &[StyledSpan]) -> usize {
    spans.iter().map(|s| s.text.width()).sum()
}

struct LineBuilder<'a> {
    lines: Vec<RenderedLine>,
    spans: Vec<StyledSpan>,
    used: usize,
    first_line: bool,
    first_width: usize,
    rest_width: usize,
    opts: &'a WrapOptions,
}

impl<'a> LineBuilder<'a> {
    fn new(opts: &'a WrapOptions) -> Self {
        Self {
            lines: Vec::new(),
            spans: Vec::new(),
            used: 0,
            first_line: true,
            first_width: opts.width.saturating_sub(spans_width(&opts.first_prefix)),
            rest_width: opts.width.saturating_sub(spans_width(&opts.rest_prefix)),
            opts,
        }
    }

    fn available(&self) -> usize {
        if self.first_line {
            self.first_width
        } else {
            self.rest_width
        }
    }

    fn remaining(&self) -> usize {
        self.available().saturating_sub(self.used)
    }

    fn break_line(&mut self) {
        let prefix = if self.first_line {
            &self.opts.first_prefix
        } else {
            &self.opts.rest_prefix
        };
        let mut spans = prefix.clone();
        spans.append(&mut self.spans);
        self.lines.push(RenderedLine { spans });
        self.first_line = false;
        self.used = 0;
    }

    fn push(&mut self, span: StyledSpan) {
        self.used += span.text.width();
        self.spans.push(span);
    }

    fn push_space(&mut self, like: &StyledSpan) {
        if !self.spans.is_empty() && self.remaining() > 0 {
            self.push(like.with_text(" "));
        }
    }

    /// Pushes `span`, splitting it by character when it is wider than a line.
    fn push_breaking(&mut self, span: &StyledSpan) {
        let mut current = String::new();
        let mut current_width = 0;
        for ch in span.text.chars() {
            let w = ch.width().unwrap_or(0);
            if w > 0 && current_width + w > self.remaining() && !(current.is_empty() && self.used == 0) {
                if !current.is_empty() {
                    self.push(span.with_text(std::mem::take(&mut current)));
                }
                self.break_line();
                current_width = 0;
            }
            current.push(ch);
            current_width += w;
        }
        if !current.is_empty() {
            self.push(span.with_text(current));
        }
    }

    fn finish(mut self) -> Vec<RenderedLine> {
        if !self.spans.is_empty() || self.lines.is_empty() {
            self.break_line();
        }
        self.lines
    }
}

/// Wraps styled spans at `opts.width`, keeping style and link targets on
/// every fragment.
///
/// Prose wraps at word boundaries with collapsed whitespace; inline code
/// keeps its whitespace and breaks by character. `\n` in a span forces a
/// line break.
pub fn wrap_styled_spans(spans: &[StyledSpan], opts: &WrapOptions) -> Vec<RenderedLine> {
    if opts.width == 0 || spans.is_empty() {
        let mut all = opts.first_prefix.clone();
        all.extend(spans.iter().cloned());
        return vec![RenderedLine { spans: all }];
    }

    let mut builder = LineBuilder::new(opts);
    for span in spans {
        for (i, part) in span.text.split('\n').enumerate() {
            if i > 0 {
                builder.break_line();
            }
            if part.is_empty() {
                continue;
            }
            let piece = span.with_text(part);
            if matches!(span.style, Style::CodeInline | Style::CodeBlock) {
                push_code(&mut builder, &piece);
            } else {
                push_words(&mut builder, &piece);
            }
        }
    }
    builder.finish()
}

fn push_code(builder: &mut LineBuilder<'_>, span: &StyledSpan) {
    let width = span.text.width();
    if width <= builder.remaining() {
        builder.push(span.clone());
    } else if width <= builder.rest_width && builder.used > 0 {
        builder.break_line();
        builder.push(span.clone());
    } else {
        builder.push_breaking(span);
    }
}

fn push_words(builder: &mut LineBuilder<'_>, span: &StyledSpan) {
    let leading = span.text.starts_with(char::is_whitespace);
    let trailing = span.text.ends_with(char::is_whitespace);
    let words: Vec<&str> = span.text.split_whitespace().collect();

    if words.is_empty() {
        builder.push_space(span);
        return;
    }
    if leading {
        builder.push_space(span);
    }

    for (i, word) in words.iter().enumerate() {
        let width = word.width();
        if i > 0 {
            if 1 + width <= builder.remaining() {
                builder.push(span.with_text(" "));
            } else {
                builder.break_line();
            }
        }

        if width <= builder.remaining() {
            builder.push(span.with_text(*word));
        } else if width <= builder.rest_width && builder.used > 0 {
            builder.break_line();
            builder.push(span.with_text(*word));
        } else {
            if builder.used > 0 {
                builder.break_line();
            }
            builder.push_breaking(&span.with_text(*word));
        }
    }

    if trailing {
        builder.push_space(span);
    }
}
