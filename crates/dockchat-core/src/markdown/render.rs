use std::ops::Range;

use pulldown_cmark::{CodeBlockKind, Event, HeadingLevel, Options, Parser, Tag, TagEnd};
use unicode_width::UnicodeWidthStr;

use super::document::{
    ImageRegion, LinkRegion, RenderedDocument, RenderedLine, SpanTarget, Style, StyledSpan,
};
use super::wrap::{WrapOptions, wrap_styled_spans};
use crate::images::ImageResolution;

/// Layout parameters for a render pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RenderOptions {
    /// Wrap width in terminal columns.
    pub columns: usize,
    /// Pixel height of one rendered line; 0 renders every image as one line.
    pub line_height_px: u32,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            columns: 80,
            line_height_px: 0,
        }
    }
}

fn parser_options() -> Options {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options
}

/// Image URLs referenced by `markdown`, in order of first appearance.
pub fn collect_image_urls(markdown: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for event in Parser::new_ext(markdown, parser_options()) {
        if let Event::Start(Tag::Image { dest_url, .. }) = event {
            let url = dest_url.trim();
            if !url.is_empty() && !urls.iter().any(|u| u == url) {
                urls.push(url.to_string());
            }
        }
    }
    urls
}

/// Renders the whole of `markdown` into a document.
///
/// `images` is consulted for every image; it must not block. Unknown or
/// failed images render as a one-line placeholder.
pub fn render_markdown(
    markdown: &str,
    options: &RenderOptions,
    images: impl Fn(&str) -> Option<ImageResolution>,
) -> RenderedDocument {
    if markdown.is_empty() {
        return RenderedDocument::default();
    }

    let mut renderer = MarkdownRenderer::new(options, &images);
    for (event, range) in Parser::new_ext(markdown, parser_options()).into_offset_iter() {
        renderer.process_event(event, range);
    }
    renderer.finish()
}

#[derive(Debug, Default)]
struct TableBuffer {
    rows: Vec<Vec<String>>,
    current_row: Vec<String>,
    current_cell: String,
    header_rows: usize,
}

impl TableBuffer {
    fn finish_cell(&mut self) {
        self.current_row.push(std::mem::take(&mut self.current_cell));
    }

    fn finish_row(&mut self) {
        self.rows.push(std::mem::take(&mut self.current_row));
    }

    /// Pipe-separated rows, columns padded to their widest cell.
    fn render(&self) -> Vec<String> {
        let columns = self.rows.iter().map(Vec::len).max().unwrap_or(0);
        let widths: Vec<usize> = (0..columns)
            .map(|c| {
                self.rows
                    .iter()
                    .filter_map(|r| r.get(c))
                    .map(|cell| cell.width())
                    .max()
                    .unwrap_or(0)
            })
            .collect();

        let mut out = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let cells: Vec<String> = widths
                .iter()
                .enumerate()
                .map(|(c, w)| {
                    let cell = row.get(c).map(String::as_str).unwrap_or("");
                    format!("{cell}{}", " ".repeat(w.saturating_sub(cell.width())))
                })
                .collect();
            out.push(cells.join(" | ").trim_end().to_string());
            if i + 1 == self.header_rows {
                let rule: Vec<String> = widths.iter().map(|w| "-".repeat((*w).max(1))).collect();
                out.push(rule.join("-+-"));
            }
        }
        out
    }
}

struct PendingImage {
    url: String,
    alt: String,
    source: Range<usize>,
}

struct ListState {
    ordered: Option<u64>,
    current_item: u64,
}

struct MarkdownRenderer<'a, F> {
    options: &'a RenderOptions,
    images: &'a F,
    lines: Vec<RenderedLine>,
    current_spans: Vec<StyledSpan>,
    style_stack: Vec<Style>,
    in_code_block: bool,
    code_block_lang: Option<String>,
    list_stack: Vec<ListState>,
    item_started: bool,
    quote_depth: usize,
    table: Option<TableBuffer>,
    current_link: Option<usize>,
    pending_image: Option<PendingImage>,
    links: Vec<LinkRegion>,
    image_regions: Vec<ImageRegion>,
}

impl<'a, F> MarkdownRenderer<'a, F>
where
    F: Fn(&str) -> Option<ImageResolution>,
{
    fn new(options: &'a RenderOptions, images: &'a F) -> Self {
        Self {
            options,
            images,
            lines: Vec::new(),
            current_spans: Vec::new(),
            style_stack: vec![Style::Text],
            in_code_block: false,
            code_block_lang: None,
            list_stack: Vec::new(),
            item_started: false,
            quote_depth: 0,
            table: None,
            current_link: None,
            pending_image: None,
            links: Vec::new(),
            image_regions: Vec::new(),
        }
    }

    fn width(&self) -> usize {
        self.options.columns.max(1)
    }

    fn current_style(&self) -> Style {
        self.style_stack.last().copied().unwrap_or(Style::Text)
    }

    fn push_style(&mut self, style: Style) {
        self.style_stack.push(style);
    }

    fn pop_style(&mut self) {
        if self.style_stack.len() > 1 {
            self.style_stack.pop();
        }
    }

    fn span(&self, text: &str, style: Style) -> StyledSpan {
        StyledSpan {
            text: text.to_string(),
            style,
            target: self.current_link.map(SpanTarget::Link),
        }
    }

    fn blank_line(&mut self) {
        if self.lines.last().is_some_and(|l| !l.is_empty()) {
            self.lines.push(RenderedLine::empty());
        }
    }

    fn process_event(&mut self, event: Event<'_>, range: Range<usize>) {
        match event {
            Event::Start(tag) => self.start_tag(tag, range),
            Event::End(tag) => self.end_tag(tag),
            Event::Text(text) => self.add_text(&text),
            Event::Code(code) => self.add_inline_code(&code),
            Event::SoftBreak => self.add_text(" "),
            Event::HardBreak => self.add_text("\n"),
            Event::TaskListMarker(checked) => {
                let marker = if checked { "[x] " } else { "[ ] " };
                self.current_spans
                    .push(StyledSpan::new(marker, Style::ListBullet));
            }
            Event::Rule => {
                self.flush_block();
                self.lines.push(RenderedLine {
                    spans: vec![StyledSpan::new("─".repeat(self.width().min(40)), Style::Rule)],
                });
                self.lines.push(RenderedLine::empty());
            }
            // Raw HTML never reaches the output.
            Event::Html(_) | Event::InlineHtml(_) => {}
            Event::FootnoteReference(_) | Event::InlineMath(_) | Event::DisplayMath(_) => {}
        }
    }

    fn start_tag(&mut self, tag: Tag<'_>, range: Range<usize>) {
        match tag {
            Tag::Heading { level, .. } => {
                self.flush_block();
                self.push_style(match level {
                    HeadingLevel::H1 => Style::H1,
                    HeadingLevel::H2 => Style::H2,
                    _ => Style::H3,
                });
            }
            Tag::CodeBlock(kind) => {
                self.flush_block();
                self.in_code_block = true;
                self.code_block_lang = match kind {
                    CodeBlockKind::Fenced(lang) if !lang.is_empty() => Some(lang.to_string()),
                    _ => None,
                };
                self.push_style(Style::CodeBlock);
            }
            Tag::List(start) => {
                self.flush_block();
                self.list_stack.push(ListState {
                    ordered: start,
                    current_item: start.unwrap_or(1),
                });
            }
            Tag::Item => {
                self.flush_block();
                self.item_started = false;
            }
            Tag::BlockQuote(_) => {
                self.flush_block();
                self.quote_depth += 1;
                self.push_style(Style::BlockQuote);
            }
            Tag::Emphasis => self.push_style(Style::Emphasis),
            Tag::Strong => self.push_style(Style::Strong),
            Tag::Strikethrough => self.push_style(Style::Strikethrough),
            Tag::Link { dest_url, .. } => {
                self.links.push(LinkRegion {
                    url: dest_url.trim().to_string(),
                    source: range,
                    lines: 0..0,
                });
                self.current_link = Some(self.links.len() - 1);
                self.push_style(Style::Link);
            }
            Tag::Image { dest_url, .. } => {
                self.pending_image = Some(PendingImage {
                    url: dest_url.trim().to_string(),
                    alt: String::new(),
                    source: range,
                });
            }
            Tag::Table(_) => {
                self.flush_block();
                self.table = Some(TableBuffer::default());
            }
            Tag::Paragraph
            | Tag::TableHead
            | Tag::TableRow
            | Tag::TableCell
            | Tag::FootnoteDefinition(_)
            | Tag::MetadataBlock(_)
            | Tag::HtmlBlock
            | Tag::DefinitionList
            | Tag::DefinitionListTitle
            | Tag::DefinitionListDefinition
            | Tag::Superscript
            | Tag::Subscript => {}
        }
    }

    fn end_tag(&mut self, tag: TagEnd) {
        match tag {
            TagEnd::Paragraph => {
                self.flush_block();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Heading(_) => {
                self.flush_block();
                self.pop_style();
                self.blank_line();
            }
            TagEnd::CodeBlock => {
                self.flush_code_block();
                self.in_code_block = false;
                self.pop_style();
                self.blank_line();
            }
            TagEnd::List(_) => {
                self.flush_block();
                self.list_stack.pop();
                if self.list_stack.is_empty() {
                    self.blank_line();
                }
            }
            TagEnd::Item => {
                self.flush_block();
                if let Some(list) = self.list_stack.last_mut() {
                    list.current_item += 1;
                }
            }
            TagEnd::BlockQuote(_) => {
                self.flush_block();
                self.quote_depth = self.quote_depth.saturating_sub(1);
                self.pop_style();
            }
            TagEnd::Emphasis | TagEnd::Strong | TagEnd::Strikethrough => self.pop_style(),
            TagEnd::Link => {
                self.current_link = None;
                self.pop_style();
            }
            TagEnd::Image => {
                if let Some(image) = self.pending_image.take() {
                    self.emit_image(image);
                }
            }
            TagEnd::Table => {
                if let Some(table) = self.table.take() {
                    for row in table.render() {
                        self.lines.push(RenderedLine {
                            spans: vec![StyledSpan::new(row, Style::Plain)],
                        });
                    }
                }
                self.blank_line();
            }
            TagEnd::TableHead => {
                if let Some(table) = self.table.as_mut() {
                    // Header cells arrive without a row wrapper.
                    if !table.current_row.is_empty() {
                        table.finish_row();
                    }
                    table.header_rows = table.rows.len();
                }
            }
            TagEnd::TableRow => {
                if let Some(table) = self.table.as_mut() {
                    table.finish_row();
                }
            }
            TagEnd::TableCell => {
                if let Some(table) = self.table.as_mut() {
                    table.finish_cell();
                }
            }
            _ => {}
        }
    }

    fn add_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(image) = self.pending_image.as_mut() {
            image.alt.push_str(text);
            return;
        }
        if let Some(table) = self.table.as_mut() {
            table.current_cell.push_str(&text.replace('\n', " "));
            return;
        }
        let span = self.span(text, self.current_style());
        self.current_spans.push(span);
    }

    fn add_inline_code(&mut self, code: &str) {
        if let Some(image) = self.pending_image.as_mut() {
            image.alt.push_str(code);
            return;
        }
        if let Some(table) = self.table.as_mut() {
            table
                .current_cell
                .push_str(&format!("`{}`", code.replace('\n', " ")));
            return;
        }
        let span = self.span(code, Style::CodeInline);
        self.current_spans.push(span);
    }

    fn emit_image(&mut self, image: PendingImage) {
        self.flush_block();

        let bitmap = match (self.images)(&image.url) {
            Some(ImageResolution::Ready(bitmap)) => Some(bitmap),
            Some(ImageResolution::Failed) | None => None,
        };
        let alt = if image.alt.trim().is_empty() {
            "Image".to_string()
        } else {
            image.alt.trim().to_string()
        };

        let index = self.image_regions.len();
        let target = Some(SpanTarget::Image(index));
        let (caption, style, rows) = match &bitmap {
            Some(bitmap) => {
                let rows = match self.options.line_height_px {
                    0 => 1,
                    h => bitmap.height().div_ceil(h).max(1) as usize,
                };
                (
                    format!("[{alt} {}x{}]", bitmap.width(), bitmap.height()),
                    Style::Image,
                    rows,
                )
            }
            None => (format!("[{alt}]"), Style::ImageMissing, 1),
        };

        self.lines.push(RenderedLine {
            spans: vec![StyledSpan {
                text: caption,
                style,
                target,
            }],
        });
        for _ in 1..rows {
            self.lines.push(RenderedLine {
                spans: vec![StyledSpan {
                    text: String::new(),
                    style,
                    target,
                }],
            });
        }

        self.image_regions.push(ImageRegion {
            url: image.url,
            alt,
            source: image.source,
            lines: 0..0,
            bitmap,
        });
    }

    /// Wraps the collected inline spans into lines, honoring list and quote
    /// prefixes.
    fn flush_block(&mut self) {
        if self.in_code_block {
            return;
        }
        if self.current_spans.is_empty() {
            return;
        }
        let spans = std::mem::take(&mut self.current_spans);

        let quote = "│ ".repeat(self.quote_depth);
        let mut opts = WrapOptions::new(self.width());
        if !quote.is_empty() {
            opts.first_prefix.push(StyledSpan::new(quote.clone(), Style::BlockQuote));
            opts.rest_prefix.push(StyledSpan::new(quote.clone(), Style::BlockQuote));
        }

        if let Some(list) = self.list_stack.last() {
            let indent = "  ".repeat(self.list_stack.len().saturating_sub(1));
            let (marker, marker_style) = match list.ordered {
                Some(_) => (format!("{}. ", list.current_item), Style::ListNumber),
                None => ("• ".to_string(), Style::ListBullet),
            };
            let hang = format!("{indent}{}", " ".repeat(marker.width()));
            if self.item_started {
                // Continuation paragraph of the same item.
                opts.first_prefix.push(StyledSpan::new(hang.clone(), Style::Plain));
            } else {
                opts.first_prefix.push(StyledSpan::new(indent, Style::Plain));
                opts.first_prefix.push(StyledSpan::new(marker, marker_style));
                self.item_started = true;
            }
            opts.rest_prefix.push(StyledSpan::new(hang, Style::Plain));
        }

        self.lines.extend(wrap_styled_spans(&spans, &opts));
    }

    fn flush_code_block(&mut self) {
        let spans = std::mem::take(&mut self.current_spans);
        let full_text: String = spans.iter().map(|s| s.text.as_str()).collect();

        let fence = match self.code_block_lang.take() {
            Some(lang) => format!("```{lang}"),
            None => "```".to_string(),
        };
        self.lines.push(RenderedLine {
            spans: vec![StyledSpan::new(fence, Style::CodeFence)],
        });
        for line in full_text.trim_end_matches('\n').split('\n') {
            self.lines.push(RenderedLine {
                spans: vec![
                    StyledSpan::new("  ", Style::Plain),
                    StyledSpan::new(line, Style::CodeBlock),
                ],
            });
        }
        self.lines.push(RenderedLine {
            spans: vec![StyledSpan::new("```", Style::CodeFence)],
        });
    }

    fn finish(mut self) -> RenderedDocument {
        // Unterminated constructs are normal mid-stream.
        if let Some(image) = self.pending_image.take() {
            self.emit_image(image);
        }
        if self.in_code_block {
            self.flush_code_block();
        } else {
            self.flush_block();
        }

        while self.lines.last().is_some_and(RenderedLine::is_empty) {
            self.lines.pop();
        }
        if self.lines.is_empty() {
            self.lines.push(RenderedLine::empty());
        }

        let mut doc = RenderedDocument {
            lines: self.lines,
            links: self.links,
            images: self.image_regions,
        };
        doc.index_regions();
        doc
    }
}
