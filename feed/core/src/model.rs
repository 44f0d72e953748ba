//! Feed Data Model
//!
//! Plain values produced by the decoder and consumed by the reconciler and
//! the presentation sink.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

/// Server-assigned status identifier; 0 is never valid
pub type StatusId = u64;

/// Server-assigned account identifier; 0 is never valid
pub type AccountId = u64;

/// An account as seen in statuses and notifications
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    /// Account id
    pub id: AccountId,
    /// Fully qualified handle (`user` or `user@instance`)
    pub acct: String,
    /// Display name, may be empty
    pub display_name: String,
}

impl Account {
    /// Display name, falling back to the handle when unset
    #[must_use]
    pub fn display(&self) -> &str {
        if self.display_name.is_empty() {
            &self.acct
        } else {
            &self.display_name
        }
    }
}

/// Disclosure scope of a status
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Visibility {
    /// Visible to everyone, shown on public timelines
    #[default]
    Public,
    /// Visible to everyone, hidden from public timelines
    Unlisted,
    /// Followers only
    Private,
    /// Mentioned accounts only
    Direct,
    /// Not reported by the server or not recognized
    Unknown,
}

impl Visibility {
    /// Parse a wire value; unrecognized values map to `Unknown`
    #[must_use]
    pub fn parse(value: &str) -> Self {
        match value {
            "public" => Self::Public,
            "unlisted" => Self::Unlisted,
            "private" => Self::Private,
            "direct" => Self::Direct,
            _ => Self::Unknown,
        }
    }

    /// Wire value
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Unlisted => "unlisted",
            Self::Private => "private",
            Self::Direct => "direct",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A feed the session can subscribe to
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Subscription {
    /// The user's home feed and notifications
    #[default]
    Home,
    /// Public statuses from the local instance
    Local,
    /// All known public statuses
    Federated,
    /// Statuses carrying a hashtag (without the `#`)
    Hashtag(String),
    /// Statuses from the accounts on a list
    List(u64),
}

impl Subscription {
    /// Query string selecting this feed on the WebSocket streaming endpoint
    #[must_use]
    pub fn stream_query(&self) -> String {
        match self {
            Self::Home => "stream=user".to_string(),
            Self::Local => "stream=public:local".to_string(),
            Self::Federated => "stream=public".to_string(),
            Self::Hashtag(tag) => format!("stream=hashtag&tag={}", encode_component(tag)),
            Self::List(id) => format!("stream=list&list={id}"),
        }
    }

    /// Path plus query of the SSE streaming endpoint for this feed
    #[must_use]
    pub fn sse_path(&self) -> String {
        match self {
            Self::Home => "/api/v1/streaming/user".to_string(),
            Self::Local => "/api/v1/streaming/public/local".to_string(),
            Self::Federated => "/api/v1/streaming/public".to_string(),
            Self::Hashtag(tag) => {
                format!("/api/v1/streaming/hashtag?tag={}", encode_component(tag))
            }
            Self::List(id) => format!("/api/v1/streaming/list?list={id}"),
        }
    }

    /// WebSocket URL for this feed on the instance at `base`
    ///
    /// `https` becomes `wss` and `http` becomes `ws`.
    pub fn websocket_url(&self, base: &Url) -> Result<Url, url::ParseError> {
        let mut url = base.join("/api/v1/streaming")?;
        url.set_query(Some(&self.stream_query()));
        let scheme = if base.scheme() == "http" { "ws" } else { "wss" };
        // `set_scheme` refuses switching between special and non-special
        // schemes, so rebuild from the string form instead.
        let rest = url.as_str().split_once(':').map_or("", |(_, rest)| rest);
        Url::parse(&format!("{scheme}:{rest}"))
    }

    /// SSE URL for this feed on the instance at `base`
    pub fn sse_url(&self, base: &Url) -> Result<Url, url::ParseError> {
        base.join(&self.sse_path())
    }

    /// Whether this is the primary (home) subscription
    #[must_use]
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Home)
    }

    /// Parse a feed name as shown by `Display`
    ///
    /// Also accepts `public`, `hashtag <tag>` and `:` instead of the space.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        let value = value.trim();
        if let Some(tag) = value.strip_prefix('#') {
            return (!tag.is_empty()).then(|| Self::Hashtag(tag.to_string()));
        }
        let (kind, arg) = value
            .split_once(|c: char| c == ':' || c.is_whitespace())
            .map_or((value, ""), |(kind, arg)| (kind, arg.trim()));

        match (kind.to_ascii_lowercase().as_str(), arg) {
            ("home" | "user", "") => Some(Self::Home),
            ("local", "") => Some(Self::Local),
            ("federated" | "public", "") => Some(Self::Federated),
            ("hashtag" | "tag", tag) if !tag.is_empty() => {
                Some(Self::Hashtag(tag.trim_start_matches('#').to_string()))
            }
            ("list", id) => id.parse().ok().map(Self::List),
            _ => None,
        }
    }
}

impl fmt::Display for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Home => f.write_str("home"),
            Self::Local => f.write_str("local"),
            Self::Federated => f.write_str("federated"),
            Self::Hashtag(tag) => write!(f, "#{tag}"),
            Self::List(id) => write!(f, "list {id}"),
        }
    }
}

fn encode_component(value: &str) -> String {
    url::form_urlencoded::byte_serialize(value.as_bytes()).collect()
}

/// A single posted message
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Status {
    /// Status id
    pub id: StatusId,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Author, or the booster for collapsed reblogs
    pub account: Account,
    /// Display text (content warning, flags and media URLs applied)
    pub text: String,
    /// Plain body as formatted, before any content-warning treatment
    pub content: String,
    /// Content warning, if any
    pub spoiler_text: Option<String>,
    /// Web URL of the status
    pub url: Option<String>,
    /// Status this one replies to
    pub reply_to: Option<StatusId>,
    /// Disclosure scope
    pub visibility: Visibility,
    /// Hashtag names, first occurrence order, no duplicates
    pub tags: Vec<String>,
    /// Mentioned handles, excluding the local account
    pub mentions: Vec<String>,
    /// Feed the status arrived on
    pub subscription: Subscription,
}

impl Status {
    /// Add a tag unless already present
    pub fn add_tag(&mut self, tag: impl Into<String>) {
        let tag = tag.into();
        if !self.tags.contains(&tag) {
            self.tags.push(tag);
        }
    }
}

/// Kind of a notification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationKind {
    /// Someone mentioned the local account
    Mention,
    /// Someone boosted one of the local account's statuses
    Reblog,
    /// Someone favourited one of the local account's statuses
    Favourite,
    /// Someone followed the local account
    Follow,
}

impl NotificationKind {
    /// Parse a wire value; unknown kinds yield `None`
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "mention" => Some(Self::Mention),
            "reblog" => Some(Self::Reblog),
            "favourite" => Some(Self::Favourite),
            "follow" => Some(Self::Follow),
            _ => None,
        }
    }
}

/// An event directed at the local account
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    /// Notification id
    pub id: u64,
    /// What happened
    pub kind: NotificationKind,
    /// When it happened
    pub created_at: DateTime<Utc>,
    /// The notifying account
    pub account: Option<Account>,
    /// The status concerned (absent for follows)
    pub status: Option<Status>,
}

/// A focal status with its thread
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Context {
    /// Statuses the focal one replies to, oldest first
    pub ancestors: Vec<Status>,
    /// Replies to the focal status, oldest first
    pub descendants: Vec<Status>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_account_display_fallback() {
        let mut account = Account {
            id: 1,
            acct: "kate@social.example".into(),
            display_name: String::new(),
        };
        assert_eq!(account.display(), "kate@social.example");
        account.display_name = "Kate".into();
        assert_eq!(account.display(), "Kate");
    }

    #[test]
    fn test_visibility_parse() {
        assert_eq!(Visibility::parse("private"), Visibility::Private);
        assert_eq!(Visibility::parse("limited"), Visibility::Unknown);
        assert_eq!(Visibility::Direct.to_string(), "direct");
    }

    #[test]
    fn test_websocket_urls() {
        let base = Url::parse("https://social.example").unwrap();

        assert_eq!(
            Subscription::Home.websocket_url(&base).unwrap().as_str(),
            "wss://social.example/api/v1/streaming?stream=user"
        );
        assert_eq!(
            Subscription::Local.websocket_url(&base).unwrap().as_str(),
            "wss://social.example/api/v1/streaming?stream=public:local"
        );
        assert_eq!(
            Subscription::Hashtag("rust lang".into())
                .websocket_url(&base)
                .unwrap()
                .as_str(),
            "wss://social.example/api/v1/streaming?stream=hashtag&tag=rust+lang"
        );

        let plain = Url::parse("http://127.0.0.1:3000").unwrap();
        assert_eq!(
            Subscription::List(7).websocket_url(&plain).unwrap().as_str(),
            "ws://127.0.0.1:3000/api/v1/streaming?stream=list&list=7"
        );
    }

    #[test]
    fn test_sse_urls() {
        let base = Url::parse("https://social.example").unwrap();
        assert_eq!(
            Subscription::Federated.sse_url(&base).unwrap().as_str(),
            "https://social.example/api/v1/streaming/public"
        );
        assert_eq!(
            Subscription::Hashtag("fediverse".into())
                .sse_url(&base)
                .unwrap()
                .as_str(),
            "https://social.example/api/v1/streaming/hashtag?tag=fediverse"
        );
    }

    #[test]
    fn test_subscription_parse() {
        assert_eq!(Subscription::parse("home"), Some(Subscription::Home));
        assert_eq!(Subscription::parse(" Local "), Some(Subscription::Local));
        assert_eq!(Subscription::parse("public"), Some(Subscription::Federated));
        assert_eq!(
            Subscription::parse("#rust"),
            Some(Subscription::Hashtag("rust".into()))
        );
        assert_eq!(
            Subscription::parse("hashtag:rust"),
            Some(Subscription::Hashtag("rust".into()))
        );
        assert_eq!(Subscription::parse("list 12"), Some(Subscription::List(12)));
        assert_eq!(Subscription::parse("list"), None);
        assert_eq!(Subscription::parse("#"), None);
        assert_eq!(Subscription::parse("bogus"), None);

        for sub in [Subscription::Local, Subscription::Hashtag("x".into()), Subscription::List(3)] {
            assert_eq!(Subscription::parse(&sub.to_string()), Some(sub));
        }
    }

    #[test]
    fn test_add_tag_keeps_order_without_duplicates() {
        let mut status = Status::default();
        status.add_tag("b");
        status.add_tag("a");
        status.add_tag("b");
        assert_eq!(status.tags, vec!["b".to_string(), "a".to_string()]);
    }
}
