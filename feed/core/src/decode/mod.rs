//! Event Decoder
//!
//! Turns protocol JSON into model values. Works on `serde_json::Value`
//! rather than derived structs: servers disagree on which fields exist, and
//! ids come either as JSON integers or as decimal strings.
//!
//! Decode failures drop one event and never affect the connection.

pub mod content;
pub mod format;

use std::sync::Arc;

use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::events::{DomainEvent, RawEvent, StreamEventKind};
use crate::model::{
    Account, AccountId, Context, Notification, NotificationKind, Status, Subscription, Visibility,
};

pub use content::{ContentWarningPolicy, RenderOptions, StatusText};
pub use format::{BodyFormatter, Passthrough, StripTags};

/// Errors produced while decoding protocol JSON
#[derive(Debug, Error)]
pub enum DecodeError {
    /// Payload is not valid JSON
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// Expected an object
    #[error("expected a JSON object")]
    NotAnObject,

    /// Expected an array
    #[error("expected a JSON array")]
    NotAnArray,

    /// Required field absent
    #[error("missing field '{0}'")]
    MissingField(&'static str),

    /// Id absent, zero, negative or malformed
    #[error("invalid id in '{0}'")]
    InvalidId(&'static str),

    /// Notification type this client does not handle
    #[error("unknown notification type '{0}'")]
    UnknownKind(String),
}

/// Parse an id given as a JSON integer or a decimal string
///
/// Zero, negative, fractional and malformed values are invalid.
#[must_use]
pub fn parse_id(value: &Value) -> Option<u64> {
    let id = match value {
        Value::Number(n) => n.as_u64()?,
        Value::String(s) => s.trim().parse::<u64>().ok()?,
        _ => return None,
    };
    (id > 0).then_some(id)
}

/// Parse a `created_at` timestamp
///
/// RFC 3339 first; timestamps without a zone are taken as UTC.
#[must_use]
pub fn parse_time(value: &Value) -> Option<DateTime<Utc>> {
    let text = value.as_str()?;
    if let Ok(parsed) = DateTime::parse_from_rfc3339(text) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

/// Parse an account object
pub fn parse_account(value: &Value) -> Result<Account, DecodeError> {
    let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
    let id = obj
        .get("id")
        .and_then(parse_id)
        .ok_or(DecodeError::InvalidId("account.id"))?;
    let acct = str_field(obj, "acct").ok_or(DecodeError::MissingField("acct"))?;

    Ok(Account {
        id,
        acct: acct.to_string(),
        display_name: str_field(obj, "display_name").unwrap_or_default().to_string(),
    })
}

fn str_field<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    obj.get(key).and_then(Value::as_str)
}

fn non_empty_str<'a>(obj: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    str_field(obj, key).filter(|s| !s.is_empty())
}

/// Settings the decoder needs from the session
#[derive(Clone)]
pub struct DecodeContext {
    /// The local account; excluded from mentions
    pub own_account_id: AccountId,
    /// Content-warning rendering preferences
    pub render: RenderOptions,
    /// HTML to text conversion
    pub formatter: Arc<dyn BodyFormatter>,
}

impl Default for DecodeContext {
    fn default() -> Self {
        Self {
            own_account_id: 0,
            render: RenderOptions::default(),
            formatter: Arc::new(Passthrough),
        }
    }
}

impl std::fmt::Debug for DecodeContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodeContext")
            .field("own_account_id", &self.own_account_id)
            .field("render", &self.render)
            .finish_non_exhaustive()
    }
}

/// Decodes stream events and bulk-fetch bodies
#[derive(Clone, Debug, Default)]
pub struct EventDecoder {
    ctx: DecodeContext,
}

impl EventDecoder {
    /// Create a decoder
    #[must_use]
    pub fn new(ctx: DecodeContext) -> Self {
        Self { ctx }
    }

    /// Current settings
    #[must_use]
    pub fn context(&self) -> &DecodeContext {
        &self.ctx
    }

    /// Record the local account once credentials are verified
    pub fn set_own_account_id(&mut self, id: AccountId) {
        self.ctx.own_account_id = id;
    }

    /// Decode one streamed event arriving on `subscription`
    pub fn decode(
        &self,
        event: &RawEvent,
        subscription: &Subscription,
    ) -> Result<DomainEvent, DecodeError> {
        match event.kind {
            StreamEventKind::Delete => {
                let id = match serde_json::from_str::<Value>(&event.payload) {
                    Ok(value) => parse_id(&value),
                    Err(_) => event.payload.trim().parse::<u64>().ok().filter(|id| *id > 0),
                };
                id.map(DomainEvent::Delete)
                    .ok_or(DecodeError::InvalidId("delete"))
            }
            StreamEventKind::Update => {
                let value: Value = serde_json::from_str(&event.payload)?;
                let mut status = self.parse_status(&value)?;
                status.subscription = subscription.clone();
                Ok(DomainEvent::Update(status))
            }
            StreamEventKind::Notification => {
                let value: Value = serde_json::from_str(&event.payload)?;
                let mut notification = self.parse_notification(&value)?;
                if let Some(status) = notification.status.as_mut() {
                    status.subscription = subscription.clone();
                }
                Ok(DomainEvent::Notification(notification))
            }
        }
    }

    /// Parse a status object, collapsing reblogs
    pub fn parse_status(&self, value: &Value) -> Result<Status, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let account = parse_account(obj.get("account").ok_or(DecodeError::MissingField("account"))?)?;
        let created_at = obj.get("created_at").and_then(parse_time).unwrap_or_default();
        let visibility = non_empty_str(obj, "visibility")
            .map_or(Visibility::Unknown, Visibility::parse);
        let reply_to = obj.get("in_reply_to_id").and_then(parse_id);

        if let Some(reblog) = obj.get("reblog").filter(|v| v.is_object()) {
            let original = self.parse_status(reblog)?;
            let booster = Status {
                account,
                created_at,
                visibility,
                reply_to,
                ..Status::default()
            };
            return Ok(self.collapse_reblog(booster, original));
        }

        let id = obj
            .get("id")
            .and_then(parse_id)
            .ok_or(DecodeError::InvalidId("status.id"))?;
        let url = str_field(obj, "url").map(str::to_string);
        let sensitive = obj.get("sensitive").and_then(Value::as_bool).unwrap_or(false);

        let spoiler_text = non_empty_str(obj, "spoiler_text").map(|s| self.ctx.formatter.format(s));
        let content = non_empty_str(obj, "content").map(|s| self.ctx.formatter.format(s));
        let media = media_urls(obj);

        let text = StatusText {
            spoiler: spoiler_text.as_deref(),
            body: content.as_deref(),
            sensitive,
            url: url.as_deref(),
            media: &media,
        }
        .render(&self.ctx.render);

        let mut status = Status {
            id,
            created_at,
            account,
            text,
            content: content.unwrap_or_default(),
            spoiler_text,
            url,
            reply_to,
            visibility,
            tags: Vec::new(),
            mentions: self.mentions(obj),
            subscription: Subscription::default(),
        };
        for tag in obj
            .get("tags")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter_map(|tag| tag.get("name").and_then(Value::as_str))
        {
            status.add_tag(tag);
        }

        Ok(status)
    }

    /// Build one status from a boost and the boosted status
    ///
    /// The booster's account and time are kept; id, url, tags and mentions
    /// come from the original, whose author joins the mentions unless it is
    /// the local account.
    fn collapse_reblog(&self, booster: Status, original: Status) -> Status {
        let mut mentions = original.mentions;
        if original.account.id != self.ctx.own_account_id
            && !mentions.contains(&original.account.acct)
        {
            mentions.push(original.account.acct.clone());
        }

        Status {
            id: original.id,
            created_at: booster.created_at,
            text: format!("boosted @{}: {}", original.account.acct, original.text),
            account: booster.account,
            content: original.content,
            spoiler_text: None,
            url: original.url,
            reply_to: booster.reply_to,
            visibility: booster.visibility,
            tags: original.tags,
            mentions,
            subscription: booster.subscription,
        }
    }

    fn mentions(&self, obj: &Map<String, Value>) -> Vec<String> {
        obj.get("mentions")
            .and_then(Value::as_array)
            .into_iter()
            .flatten()
            .filter(|m| m.get("id").and_then(parse_id) != Some(self.ctx.own_account_id))
            .filter_map(|m| m.get("acct").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }

    /// Parse a notification object
    pub fn parse_notification(&self, value: &Value) -> Result<Notification, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;

        let kind_name = str_field(obj, "type").ok_or(DecodeError::MissingField("type"))?;
        let kind = NotificationKind::parse(kind_name)
            .ok_or_else(|| DecodeError::UnknownKind(kind_name.to_string()))?;

        let status = match obj.get("status").filter(|v| v.is_object()) {
            Some(value) => match self.parse_status(value) {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::debug!(error = %e, "Notification carries an unusable status");
                    None
                }
            },
            None => None,
        };

        Ok(Notification {
            id: obj.get("id").and_then(parse_id).unwrap_or_default(),
            kind,
            created_at: obj.get("created_at").and_then(parse_time).unwrap_or_default(),
            account: obj.get("account").and_then(|a| parse_account(a).ok()),
            status,
        })
    }

    /// Parse an array of statuses, dropping invalid entries
    pub fn parse_statuses(&self, value: &Value) -> Result<Vec<Status>, DecodeError> {
        let items = value.as_array().ok_or(DecodeError::NotAnArray)?;
        Ok(items
            .iter()
            .filter_map(|item| match self.parse_status(item) {
                Ok(status) => Some(status),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable status");
                    None
                }
            })
            .collect())
    }

    /// Parse an array of notifications, dropping invalid entries
    pub fn parse_notifications(&self, value: &Value) -> Result<Vec<Notification>, DecodeError> {
        let items = value.as_array().ok_or(DecodeError::NotAnArray)?;
        Ok(items
            .iter()
            .filter_map(|item| match self.parse_notification(item) {
                Ok(notification) => Some(notification),
                Err(e) => {
                    tracing::warn!(error = %e, "Dropping undecodable notification");
                    None
                }
            })
            .collect())
    }

    /// Parse a `/context` response
    pub fn parse_context(&self, value: &Value) -> Result<Context, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let list = |key: &'static str| match obj.get(key) {
            Some(items) => self.parse_statuses(items),
            None => Ok(Vec::new()),
        };

        Ok(Context {
            ancestors: list("ancestors")?,
            descendants: list("descendants")?,
        })
    }
}

fn media_urls(obj: &Map<String, Value>) -> Vec<String> {
    let usable = |a: &Map<String, Value>, key: &str| {
        non_empty_str(a, key)
            .filter(|url| url.starts_with("http"))
            .map(str::to_string)
    };

    obj.get("media_attachments")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(Value::as_object)
        .filter_map(|a| {
            usable(a, "text_url")
                .or_else(|| usable(a, "url"))
                .or_else(|| usable(a, "remote_url"))
        })
        .collect()
}
