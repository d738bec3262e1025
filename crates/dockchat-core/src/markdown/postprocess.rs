//! Text transforms applied to a finished answer.
//!
//! All functions here are pure. `post_process` runs them in the order the
//! finalize step requires: inline previews first, then failed images, then
//! HTML stripping last so it cannot eat markdown produced by the first two.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{Captures, Regex};

/// Trailer appended to every finished answer, complete or not.
pub const ANSWER_SEPARATOR: &str = "\n\n---------\n\n";

/// Rating links emitted in the feedback prompt.
pub const FEEDBACK_HELPFUL_URL: &str = "agent://feedback/5";
pub const FEEDBACK_NOT_HELPFUL_URL: &str = "agent://feedback/1";

static INLINE_PREVIEW: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\[upl-image-preview[^\]]*?url=([^\s\]]+)[^\]]*\]").expect("valid regex")
});

static MARKDOWN_IMAGE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"!\[([^\]]*)\]\(([^)]+)\)").expect("valid regex"));

static HTML_TAG: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"</?[A-Za-z][^>]*>").expect("valid regex"));

/// The "was this helpful?" prompt appended after an answer.
pub fn feedback_prompt() -> String {
    format!(
        "**Was this answer helpful?** [Helpful]({FEEDBACK_HELPFUL_URL}) | [Not helpful]({FEEDBACK_NOT_HELPFUL_URL})\n\n"
    )
}

/// Runs every finalize transform over `markdown`.
///
/// `is_failed` reports whether an image URL is negatively cached.
pub fn post_process(markdown: &str, is_failed: impl Fn(&str) -> bool) -> String {
    let text = normalize_inline_previews(markdown);
    let text = replace_failed_images_with_links(&text, is_failed);
    strip_html_tags(&text).into_owned()
}

/// Rewrites `[upl-image-preview ... url=<URL> ...]` into a markdown image.
pub fn normalize_inline_previews(markdown: &str) -> Cow<'_, str> {
    INLINE_PREVIEW.replace_all(markdown, "\n\n![Image]($1)\n\n")
}

/// Turns `![alt](url)` into `[alt](url)` when `url` failed to load.
///
/// Idempotent: rewritten links no longer match the image pattern.
pub fn replace_failed_images_with_links(
    markdown: &str,
    is_failed: impl Fn(&str) -> bool,
) -> Cow<'_, str> {
    MARKDOWN_IMAGE.replace_all(markdown, |caps: &Captures<'_>| {
        let alt = &caps[1];
        let url = &caps[2];
        if is_failed(url.trim()) {
            format!("[{alt}]({url})")
        } else {
            caps[0].to_string()
        }
    })
}

/// Removes opening and closing HTML tags, keeping their inner text.
pub fn strip_html_tags(markdown: &str) -> Cow<'_, str> {
    HTML_TAG.replace_all(markdown, "")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn none_failed(_: &str) -> bool {
        false
    }

    #[test]
    fn inline_preview_becomes_markdown_image() {
        let out = normalize_inline_previews("see [upl-image-preview foo bar url=http://x/y.png baz]");
        assert_eq!(out, "see \n\n![Image](http://x/y.png)\n\n");
    }

    #[test]
    fn inline_preview_is_case_insensitive_and_non_greedy() {
        let text = "[UPL-Image-Preview url=https://a/1.png] and [upl-image-preview url=https://a/2.png w=3]";
        let out = normalize_inline_previews(text);
        assert!(out.contains("![Image](https://a/1.png)"));
        assert!(out.contains("![Image](https://a/2.png)"));
        assert!(!out.contains("upl-image-preview"));
        assert!(!out.to_lowercase().contains("upl-image-preview"));
    }

    #[test]
    fn inline_preview_without_url_is_left_alone() {
        let text = "[upl-image-preview width=10]";
        assert_eq!(normalize_inline_previews(text), text);
    }

    #[test]
    fn failed_image_becomes_link() {
        let text = "before ![pic](http://bad/x.png) after ![ok](http://good/y.png)";
        let out = replace_failed_images_with_links(text, |url| url == "http://bad/x.png");
        assert_eq!(
            out,
            "before [pic](http://bad/x.png) after ![ok](http://good/y.png)"
        );
    }

    #[test]
    fn failed_image_rewrite_is_idempotent() {
        let is_failed = |url: &str| url.contains("bad");
        let once = replace_failed_images_with_links(
            "![a](http://bad/1.png) ![b](http://fine/2.png) [c](http://bad/3.png)",
            is_failed,
        )
        .into_owned();
        let twice = replace_failed_images_with_links(&once, is_failed);
        assert_eq!(once, twice);
        assert_eq!(
            once,
            "[a](http://bad/1.png) ![b](http://fine/2.png) [c](http://bad/3.png)"
        );
    }

    #[test]
    fn strips_html_tags_but_keeps_text() {
        let out = strip_html_tags("<p>Use <b>Vector</b> menu</p><br/> 3 < 4 > 2");
        assert_eq!(out, "Use Vector menu 3 < 4 > 2");
    }

    #[test]
    fn post_process_runs_in_order() {
        let raw = "<div>[upl-image-preview url=http://bad/x.png]</div>";
        let out = post_process(raw, |url| url == "http://bad/x.png");
        assert_eq!(out, "\n\n[Image](http://bad/x.png)\n\n");
    }

    #[test]
    fn post_process_leaves_plain_text_untouched() {
        let raw = "Hello world\n\n---------\n\n";
        assert_eq!(post_process(raw, none_failed), raw);
    }

    #[test]
    fn feedback_prompt_carries_both_ratings() {
        let prompt = feedback_prompt();
        assert!(prompt.contains("(agent://feedback/5)"));
        assert!(prompt.contains("(agent://feedback/1)"));
        // Survives the finalize transforms.
        assert_eq!(post_process(&prompt, none_failed), prompt);
    }
}
