use ammonia::Builder;
use once_cell::sync::Lazy;
use std::collections::HashSet;

// Basic formatting plus links; everything else is stripped.
static RICH_TEXT: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::new();
    builder.tags(HashSet::from([
        "b",
        "i",
        "em",
        "strong",
        "u",
        "a",
        "p",
        "br",
        "ul",
        "ol",
        "li",
        "blockquote",
    ]));
    builder.link_rel(Some("noopener noreferrer"));
    builder
});

static PLAIN_TEXT: Lazy<Builder<'static>> = Lazy::new(|| {
    let mut builder = Builder::new();
    builder.tags(HashSet::new());
    builder
});

/// Sanitize rich-text input, keeping safe formatting. Used for message
/// bodies before encryption.
pub fn sanitize(input: &str) -> String {
    let cleaned = RICH_TEXT.clean(input).to_string();
    if cleaned != input {
        tracing::warn!("input was sanitized, potential XSS attempt");
    }
    cleaned
}

/// Strip all markup; for plain-text fields.
pub fn sanitize_plain_text(input: &str) -> String {
    PLAIN_TEXT.clean(input).to_string().trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_script_tags() {
        let out = sanitize("hello <script>alert(1)</script>world");
        assert!(!out.contains("<script>"));
        assert!(out.contains("hello"));
        assert!(out.contains("world"));
    }

    #[test]
    fn keeps_basic_formatting() {
        assert_eq!(sanitize("<b>bold</b> and <i>italic</i>"), "<b>bold</b> and <i>italic</i>");
    }

    #[test]
    fn strips_event_handlers_from_links() {
        let out = sanitize(r#"<a href="https://example.com" onclick="evil()">link</a>"#);
        assert!(!out.contains("onclick"));
        assert!(out.contains("example.com"));
    }

    #[test]
    fn plain_text_strips_everything() {
        assert_eq!(sanitize_plain_text("  <b>Ada</b> <img src=x>  "), "Ada");
    }

    #[test]
    fn plain_body_passes_through() {
        assert_eq!(sanitize("just a message"), "just a message");
    }
}
