//! Command Vocabulary
//!
//! Mutating commands the user can issue and the ledger can replay. Every
//! command has a canonical text form; that form is what the ledger stores,
//! so status and account references in it are always numeric ids.
//!
//! | Command | Call | Inverse |
//! |---|---|---|
//! | `post <text>` | `POST /api/v1/statuses` | `delete <new id>` |
//! | `reply <id> <text>` | `POST /api/v1/statuses` | `delete <new id>` |
//! | `delete <id>` | `DELETE /api/v1/statuses/<id>` | the repost |
//! | `fav`, `boost`, `pin <id>` | `POST .../<action>` | `unfav`, `unboost`, `unpin` |
//! | `follow`, `block`, `mute <account>` | `POST .../<action>` | `unfollow`, `unblock`, `unmute` |
//! | `cw [text]`, `visibility [scope]` | none, changes the next post | none |

use std::fmt;

use serde_json::json;
use thiserror::Error;

use crate::api::{self, ApiRequest};
use crate::ledger::join_commands;
use crate::model::{AccountId, Status, StatusId, Visibility};
use crate::timeline::gate::RecentLog;

/// Command parse failures
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CommandError {
    /// Empty input
    #[error("no command given")]
    Empty,

    /// First word is not a known command
    #[error("unknown command: {0}")]
    Unknown(String),

    /// A required argument is absent
    #[error("{command} needs {argument}")]
    MissingArgument {
        /// Command name
        command: &'static str,
        /// What was expected
        argument: &'static str,
    },

    /// A status or account reference did not resolve
    #[error("cannot resolve reference: {0}")]
    InvalidReference(String),

    /// Unrecognized visibility name
    #[error("unknown visibility: {0}")]
    InvalidVisibility(String),
}

/// A mutating command
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LedgerCommand {
    /// New top-level status
    Post {
        /// Body text
        text: String,
    },
    /// Reply to a status
    Reply {
        /// Status replied to
        to: StatusId,
        /// Body text
        text: String,
    },
    /// Delete an own status
    Delete(StatusId),
    /// Favourite a status
    Favourite(StatusId),
    /// Remove a favourite
    Unfavourite(StatusId),
    /// Boost a status
    Boost(StatusId),
    /// Remove a boost
    Unboost(StatusId),
    /// Pin a status to the profile
    Pin(StatusId),
    /// Unpin a status
    Unpin(StatusId),
    /// Follow an account
    Follow(AccountId),
    /// Unfollow an account
    Unfollow(AccountId),
    /// Block an account
    Block(AccountId),
    /// Unblock an account
    Unblock(AccountId),
    /// Mute an account
    Mute(AccountId),
    /// Unmute an account
    Unmute(AccountId),
    /// Set or clear the content warning of the next post
    ContentWarning(Option<String>),
    /// Set or reset the visibility of the next post
    Visibility(Option<Visibility>),
}

fn status_ref(
    command: &'static str,
    arg: Option<&str>,
    recent: &RecentLog,
) -> Result<StatusId, CommandError> {
    let arg = arg.ok_or(CommandError::MissingArgument {
        command,
        argument: "a status",
    })?;
    recent
        .resolve(arg)
        .ok_or_else(|| CommandError::InvalidReference(arg.to_string()))
}

fn account_ref(command: &'static str, arg: Option<&str>) -> Result<AccountId, CommandError> {
    let arg = arg.ok_or(CommandError::MissingArgument {
        command,
        argument: "an account id",
    })?;
    arg.parse::<AccountId>()
        .ok()
        .filter(|&id| id != 0)
        .ok_or_else(|| CommandError::InvalidReference(arg.to_string()))
}

fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    (!text.is_empty()).then(|| text.to_string())
}

impl LedgerCommand {
    /// Parse one command
    ///
    /// `#xx` status references are looked up in `recent`.
    pub fn parse(input: &str, recent: &RecentLog) -> Result<Self, CommandError> {
        let input = input.trim();
        let (verb, rest) = input
            .split_once(char::is_whitespace)
            .map_or((input, ""), |(verb, rest)| (verb, rest.trim_start()));
        let arg = rest.split_whitespace().next();

        let command = match verb.to_ascii_lowercase().as_str() {
            "" => return Err(CommandError::Empty),
            "post" => Self::Post {
                text: non_empty(rest).ok_or(CommandError::MissingArgument {
                    command: "post",
                    argument: "text",
                })?,
            },
            "reply" => {
                let to = status_ref("reply", arg, recent)?;
                let text = rest
                    .split_once(char::is_whitespace)
                    .and_then(|(_, text)| non_empty(text))
                    .ok_or(CommandError::MissingArgument {
                        command: "reply",
                        argument: "text",
                    })?;
                Self::Reply { to, text }
            }
            "delete" | "del" => Self::Delete(status_ref("delete", arg, recent)?),
            "fav" | "favourite" | "favorite" => Self::Favourite(status_ref("fav", arg, recent)?),
            "unfav" | "unfavourite" | "unfavorite" => {
                Self::Unfavourite(status_ref("unfav", arg, recent)?)
            }
            "boost" | "reblog" => Self::Boost(status_ref("boost", arg, recent)?),
            "unboost" | "unreblog" => Self::Unboost(status_ref("unboost", arg, recent)?),
            "pin" => Self::Pin(status_ref("pin", arg, recent)?),
            "unpin" => Self::Unpin(status_ref("unpin", arg, recent)?),
            "follow" => Self::Follow(account_ref("follow", arg)?),
            "unfollow" => Self::Unfollow(account_ref("unfollow", arg)?),
            "block" => Self::Block(account_ref("block", arg)?),
            "unblock" => Self::Unblock(account_ref("unblock", arg)?),
            "mute" => Self::Mute(account_ref("mute", arg)?),
            "unmute" => Self::Unmute(account_ref("unmute", arg)?),
            "cw" => Self::ContentWarning(non_empty(rest)),
            "visibility" => match arg {
                None => Self::Visibility(None),
                Some(name) => match Visibility::parse(&name.to_ascii_lowercase()) {
                    Visibility::Unknown => {
                        return Err(CommandError::InvalidVisibility(name.to_string()))
                    }
                    visibility => Self::Visibility(Some(visibility)),
                },
            },
            other => return Err(CommandError::Unknown(other.to_string())),
        };
        Ok(command)
    }

    /// Command that reverts this one, when it is known up front
    ///
    /// Posts and deletes get their inverse only once the server has answered.
    #[must_use]
    pub fn inverse(&self) -> Option<Self> {
        let inverse = match *self {
            Self::Favourite(id) => Self::Unfavourite(id),
            Self::Unfavourite(id) => Self::Favourite(id),
            Self::Boost(id) => Self::Unboost(id),
            Self::Unboost(id) => Self::Boost(id),
            Self::Pin(id) => Self::Unpin(id),
            Self::Unpin(id) => Self::Pin(id),
            Self::Follow(id) => Self::Unfollow(id),
            Self::Unfollow(id) => Self::Follow(id),
            Self::Block(id) => Self::Unblock(id),
            Self::Unblock(id) => Self::Block(id),
            Self::Mute(id) => Self::Unmute(id),
            Self::Unmute(id) => Self::Mute(id),
            _ => return None,
        };
        Some(inverse)
    }

    /// Whether the command only changes local post options
    #[must_use]
    pub fn is_local(&self) -> bool {
        matches!(self, Self::ContentWarning(_) | Self::Visibility(_))
    }

    /// Outbound call performing the command
    ///
    /// Returns `None` for local commands.
    #[must_use]
    pub fn to_request(&self, options: &PostOptions, default_visibility: Visibility) -> Option<ApiRequest> {
        let status_post = |id: StatusId, action: &str| {
            ApiRequest::post(api::status_action_path(id, action))
        };
        let account_post = |id: AccountId, action: &str| {
            ApiRequest::post(api::account_action_path(id, action))
        };

        let request = match self {
            Self::Post { text } => options.status_request(text, None, default_visibility),
            Self::Reply { to, text } => options.status_request(text, Some(*to), default_visibility),
            Self::Delete(id) => ApiRequest::delete(api::status_path(*id)),
            Self::Favourite(id) => status_post(*id, "favourite"),
            Self::Unfavourite(id) => status_post(*id, "unfavourite"),
            Self::Boost(id) => status_post(*id, "reblog"),
            Self::Unboost(id) => status_post(*id, "unreblog"),
            Self::Pin(id) => status_post(*id, "pin"),
            Self::Unpin(id) => status_post(*id, "unpin"),
            Self::Follow(id) => account_post(*id, "follow"),
            Self::Unfollow(id) => account_post(*id, "unfollow"),
            Self::Block(id) => account_post(*id, "block"),
            Self::Unblock(id) => account_post(*id, "unblock"),
            Self::Mute(id) => account_post(*id, "mute"),
            Self::Unmute(id) => account_post(*id, "unmute"),
            Self::ContentWarning(_) | Self::Visibility(_) => return None,
        };
        Some(request)
    }

    /// Status a `delete` command targets
    #[must_use]
    pub fn delete_target(command: &str) -> Option<StatusId> {
        let (verb, id) = command.trim().split_once(char::is_whitespace)?;
        matches!(verb, "delete" | "del")
            .then(|| id.trim().parse::<StatusId>().ok())
            .flatten()
            .filter(|&id| id != 0)
    }
}

impl fmt::Display for LedgerCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Post { text } => write!(f, "post {text}"),
            Self::Reply { to, text } => write!(f, "reply {to} {text}"),
            Self::Delete(id) => write!(f, "delete {id}"),
            Self::Favourite(id) => write!(f, "fav {id}"),
            Self::Unfavourite(id) => write!(f, "unfav {id}"),
            Self::Boost(id) => write!(f, "boost {id}"),
            Self::Unboost(id) => write!(f, "unboost {id}"),
            Self::Pin(id) => write!(f, "pin {id}"),
            Self::Unpin(id) => write!(f, "unpin {id}"),
            Self::Follow(id) => write!(f, "follow {id}"),
            Self::Unfollow(id) => write!(f, "unfollow {id}"),
            Self::Block(id) => write!(f, "block {id}"),
            Self::Unblock(id) => write!(f, "unblock {id}"),
            Self::Mute(id) => write!(f, "mute {id}"),
            Self::Unmute(id) => write!(f, "unmute {id}"),
            Self::ContentWarning(None) => f.write_str("cw"),
            Self::ContentWarning(Some(text)) => write!(f, "cw {text}"),
            Self::Visibility(None) => f.write_str("visibility"),
            Self::Visibility(Some(v)) => write!(f, "visibility {v}"),
        }
    }
}

/// Options applied to the next post, then reset
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PostOptions {
    /// Content warning
    pub spoiler: Option<String>,
    /// Visibility, `None` for the configured default
    pub visibility: Option<Visibility>,
}

impl PostOptions {
    /// Apply a local command; returns false for any other command
    pub fn apply(&mut self, command: &LedgerCommand) -> bool {
        match command {
            LedgerCommand::ContentWarning(spoiler) => self.spoiler.clone_from(spoiler),
            LedgerCommand::Visibility(visibility) => self.visibility = *visibility,
            _ => return false,
        }
        true
    }

    /// Take the options, leaving the defaults behind
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    fn status_request(
        &self,
        text: &str,
        reply_to: Option<StatusId>,
        default_visibility: Visibility,
    ) -> ApiRequest {
        let mut body = json!({
            "status": text,
            "visibility": self.visibility.unwrap_or(default_visibility).as_str(),
        });
        if let Some(spoiler) = &self.spoiler {
            body["spoiler_text"] = json!(spoiler);
        }
        if let Some(id) = reply_to {
            body["in_reply_to_id"] = json!(id.to_string());
        }
        ApiRequest::post(api::STATUSES).with_body(body)
    }
}

/// Command string that posts `status` again
///
/// Content warning and visibility are always reset or set first, so replaying
/// the string does not inherit options from whatever was typed before.
#[must_use]
pub fn repost_of(status: &Status, default_visibility: Visibility) -> String {
    let cw = LedgerCommand::ContentWarning(status.spoiler_text.clone());
    let visibility = LedgerCommand::Visibility(
        (status.visibility != default_visibility && status.visibility != Visibility::Unknown)
            .then_some(status.visibility),
    );
    let post = match status.reply_to {
        Some(to) => LedgerCommand::Reply {
            to,
            text: status.content.clone(),
        },
        None => LedgerCommand::Post {
            text: status.content.clone(),
        },
    };
    join_commands(&[cw.to_string(), visibility.to_string(), post.to_string()])
}
