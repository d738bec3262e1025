//! Output of a render pass: styled lines plus clickable regions.

use std::ops::Range;
use std::sync::Arc;

use unicode_width::UnicodeWidthStr;

use crate::images::Bitmap;

/// Visual role of a span. Hosts map these to colors/attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Plain,
    Text,
    Strong,
    Emphasis,
    Strikethrough,
    H1,
    H2,
    H3,
    CodeInline,
    CodeBlock,
    CodeFence,
    BlockQuote,
    ListBullet,
    ListNumber,
    Link,
    Image,
    ImageMissing,
    Rule,
}

/// What a span points at, as an index into the document's regions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpanTarget {
    Link(usize),
    Image(usize),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StyledSpan {
    pub text: String,
    pub style: Style,
    pub target: Option<SpanTarget>,
}

impl StyledSpan {
    pub fn new(text: impl Into<String>, style: Style) -> Self {
        Self {
            text: text.into(),
            style,
            target: None,
        }
    }

    /// Same style and target, different text.
    pub fn with_text(&self, text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: self.style,
            target: self.target,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedLine {
    pub spans: Vec<StyledSpan>,
}

impl RenderedLine {
    pub fn empty() -> Self {
        Self::default()
    }

    /// True for a spacer line with no spans at all.
    pub fn is_empty(&self) -> bool {
        self.spans.is_empty()
    }

    pub fn plain_text(&self) -> String {
        self.spans.iter().map(|s| s.text.as_str()).collect()
    }

    /// Display width in terminal columns.
    pub fn width(&self) -> usize {
        self.spans.iter().map(|s| s.text.width()).sum()
    }
}

/// A link in the rendered output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRegion {
    pub url: String,
    /// Byte range of the whole `[text](url)` construct in the markdown.
    pub source: Range<usize>,
    /// Rendered lines the link text occupies (empty if it has no text).
    pub lines: Range<usize>,
}

/// An image in the rendered output.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageRegion {
    pub url: String,
    pub alt: String,
    pub source: Range<usize>,
    pub lines: Range<usize>,
    /// `None` when the image failed or has not been resolved.
    pub bitmap: Option<Arc<Bitmap>>,
}

/// Result of hit testing a rendered position.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Hit<'a> {
    Link(&'a LinkRegion),
    Image(&'a ImageRegion),
}

impl Hit<'_> {
    pub fn url(&self) -> &str {
        match self {
            Hit::Link(link) => &link.url,
            Hit::Image(image) => &image.url,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RenderedDocument {
    pub lines: Vec<RenderedLine>,
    pub links: Vec<LinkRegion>,
    pub images: Vec<ImageRegion>,
}

impl Default for RenderedDocument {
    fn default() -> Self {
        Self {
            lines: vec![RenderedLine::empty()],
            links: Vec::new(),
            images: Vec::new(),
        }
    }
}

impl RenderedDocument {
    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// All lines joined with `\n`, styles dropped.
    pub fn plain_text(&self) -> String {
        self.lines
            .iter()
            .map(RenderedLine::plain_text)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Returns the link or image at `line`/`column` (0-based, columns in
    /// display cells). Images claim every column of the lines they occupy.
    pub fn hit_test(&self, line: usize, column: usize) -> Option<Hit<'_>> {
        if let Some(image) = self.images.iter().find(|i| i.lines.contains(&line)) {
            return Some(Hit::Image(image));
        }

        let rendered = self.lines.get(line)?;
        let mut start = 0;
        for span in &rendered.spans {
            let end = start + span.text.width();
            if (start..end).contains(&column) {
                return match span.target? {
                    SpanTarget::Link(idx) => self.links.get(idx).map(Hit::Link),
                    SpanTarget::Image(idx) => self.images.get(idx).map(Hit::Image),
                };
            }
            start = end;
        }
        None
    }

    /// Fills in each region's `lines` from the span targets.
    pub(crate) fn index_regions(&mut self) {
        for (i, line) in self.lines.iter().enumerate() {
            for span in &line.spans {
                let region_lines = match span.target {
                    Some(SpanTarget::Link(idx)) => self.links.get_mut(idx).map(|l| &mut l.lines),
                    Some(SpanTarget::Image(idx)) => {
                        self.images.get_mut(idx).map(|img| &mut img.lines)
                    }
                    None => None,
                };
                if let Some(lines) = region_lines {
                    if lines.is_empty() {
                        *lines = i..i + 1;
                    } else {
                        lines.end = i + 1;
                    }
                }
            }
        }
    }
}
