//! Markdown handling for streamed answers.
//!
//! - `postprocess`: pure text transforms run when an answer is finalized
//! - `render`: full re-parse of the buffer into a `RenderedDocument`
//! - `wrap`: width-bound wrapping of styled spans
//!
//! Parsing uses pulldown-cmark; there is no incremental diffing, every
//! render pass starts from the complete text.

pub mod document;
pub mod postprocess;
pub mod render;
mod wrap;

pub use document::{
    Hit, ImageRegion, LinkRegion, RenderedDocument, RenderedLine, SpanTarget, Style, StyledSpan,
};
pub use postprocess::{ANSWER_SEPARATOR, feedback_prompt, post_process};
pub use render::{RenderOptions, collect_image_urls, render_markdown};
pub use wrap::{WrapOptions, wrap_styled_spans};
