//! Content Warnings
//!
//! Builds the visible text of a status from its content warning, body,
//! sensitivity flag and media attachments, according to the reader's
//! [`ContentWarningPolicy`].

use serde::{Deserialize, Serialize};

/// Prefix of every line of a wrapped, obfuscated body
pub const WRAP_MARKER: &str = "\x01CW1 ";

/// Default wrap width for [`ContentWarningPolicy::WrappedRot13`]
pub const DEFAULT_WRAP_WIDTH: usize = 367;

/// How bodies behind a content warning are shown
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentWarningPolicy {
    /// Body shown in plain text after the warning
    #[default]
    Show,
    /// Body obfuscated with ROT13
    Rot13,
    /// Body obfuscated with ROT13, word-wrapped, every line marked
    WrappedRot13,
    /// Body replaced by the status URL
    Hide,
}

impl ContentWarningPolicy {
    /// Parse a setting value
    ///
    /// Accepts the enum names as well as the boolean-style values older
    /// settings used (`false` shows, `true` hides, `advanced_rot13` wraps).
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "show" | "false" | "off" => Some(Self::Show),
            "rot13" => Some(Self::Rot13),
            "wrapped_rot13" | "wrapped-rot13" | "advanced_rot13" => Some(Self::WrappedRot13),
            "hide" | "true" | "on" => Some(Self::Hide),
            _ => None,
        }
    }
}

/// Rotate ASCII letters by 13 places
#[must_use]
pub fn rot13(text: &str) -> String {
    text.chars()
        .map(|c| match c {
            'a'..='m' | 'A'..='M' => (c as u8 + 13) as char,
            'n'..='z' | 'N'..='Z' => (c as u8 - 13) as char,
            _ => c,
        })
        .collect()
}

/// Reader preferences applied while rendering
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RenderOptions {
    /// Treatment of bodies behind a content warning
    pub policy: ContentWarningPolicy,
    /// Marker inserted before the body of sensitive statuses
    pub sensitive_flag: String,
    /// Line width for wrapped ROT13
    pub wrap_width: usize,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            policy: ContentWarningPolicy::Show,
            sensitive_flag: "*NSFW* ".to_string(),
            wrap_width: DEFAULT_WRAP_WIDTH,
        }
    }
}

/// The text-bearing parts of a status, already converted to plain text
#[derive(Clone, Debug, Default)]
pub struct StatusText<'a> {
    /// Content warning
    pub spoiler: Option<&'a str>,
    /// Body
    pub body: Option<&'a str>,
    /// Whether the status is marked sensitive
    pub sensitive: bool,
    /// Status URL, used by [`ContentWarningPolicy::Hide`]
    pub url: Option<&'a str>,
    /// Media attachment URLs
    pub media: &'a [String],
}

impl StatusText<'_> {
    /// Build the visible text
    #[must_use]
    pub fn render(&self, options: &RenderOptions) -> String {
        let mut text = String::new();

        if let Some(spoiler) = self.spoiler {
            text.push_str("[CW: ");
            text.push_str(spoiler);
            text.push(']');
            if self.sensitive || options.policy != ContentWarningPolicy::WrappedRot13 {
                text.push(' ');
            }
        }

        if self.sensitive {
            text.push_str(&options.sensitive_flag);
        }

        if let Some(body) = self.body {
            match (self.spoiler, options.policy) {
                (None, _) | (Some(_), ContentWarningPolicy::Show) => text.push_str(body),
                (Some(_), ContentWarningPolicy::Rot13) => text.push_str(&rot13(body)),
                (Some(_), ContentWarningPolicy::WrappedRot13) => {
                    text.push_str(&wrap_marked(&rot13(body), options.wrap_width));
                }
                (Some(_), ContentWarningPolicy::Hide) => match self.url {
                    Some(url) => {
                        text.push_str("[hidden: ");
                        text.push_str(url);
                        text.push(']');
                    }
                    None => text.push_str("[hidden]"),
                },
            }
        }

        for url in self.media {
            let in_body = self.body.is_some_and(|body| body.contains(url.as_str()));
            if in_body || text.contains(url.as_str()) {
                continue;
            }
            if !text.is_empty() {
                text.push(' ');
            }
            text.push_str(url);
        }

        text
    }
}

/// Wrap `text` and mark every line so clients can fold it away
fn wrap_marked(text: &str, width: usize) -> String {
    let lines = textwrap::wrap(text, width.max(1));
    let separator = format!("\x01\n{WRAP_MARKER}");
    let joined = lines.join(&separator);
    format!("\n{WRAP_MARKER}{joined}\x01")
}
