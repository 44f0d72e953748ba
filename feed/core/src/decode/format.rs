//! Body formatting
//!
//! Status bodies and content warnings arrive as HTML. Turning them into
//! text is the caller's business; the decoder only needs a [`BodyFormatter`].

/// Converts an HTML fragment into display text
pub trait BodyFormatter: Send + Sync {
    /// Format one fragment
    fn format(&self, html: &str) -> String;
}

/// Leaves bodies untouched
#[derive(Clone, Copy, Debug, Default)]
pub struct Passthrough;

impl BodyFormatter for Passthrough {
    fn format(&self, html: &str) -> String {
        html.to_string()
    }
}

/// Minimal tag stripper for terminal output
///
/// Line breaks and paragraph ends become newlines, other tags are dropped,
/// and the handful of entities servers emit are decoded.
#[derive(Clone, Copy, Debug, Default)]
pub struct StripTags;

impl BodyFormatter for StripTags {
    fn format(&self, html: &str) -> String {
        let mut out = String::with_capacity(html.len());
        let mut rest = html;

        while let Some(start) = rest.find('<') {
            out.push_str(&rest[..start]);
            let Some(len) = rest[start..].find('>') else {
                out.push_str(&rest[start..]);
                rest = "";
                break;
            };

            let tag = &rest[start + 1..start + len];
            let closing = tag.starts_with('/');
            let name = tag
                .trim_start_matches('/')
                .split(|c: char| c.is_whitespace() || c == '/')
                .next()
                .unwrap_or_default()
                .to_ascii_lowercase();

            if name == "br" || (closing && name == "p") {
                out.push('\n');
            }
            rest = &rest[start + len + 1..];
        }
        out.push_str(rest);

        decode_entities(out.trim_end_matches('\n'))
    }
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_passthrough() {
        assert_eq!(Passthrough.format("<p>hi</p>"), "<p>hi</p>");
    }

    #[test]
    fn test_strip_tags() {
        let html = r#"<p>Hello <a href="https://x.example">@<span>kate</span></a></p><p>second&amp;last<br/>line</p>"#;
        assert_eq!(StripTags.format(html), "Hello @kate\nsecond&last\nline");
    }

    #[test]
    fn test_strip_tags_unterminated() {
        assert_eq!(StripTags.format("a < b"), "a < b");
        assert_eq!(StripTags.format("&lt;3 &amp;lt;"), "<3 &lt;");
    }
}
