//! REST Calls
//!
//! The handful of request/response calls the feed needs: the initial bulk
//! fetch, status and account actions issued by commands, thread context and
//! paging through `Link` headers.

pub mod http;
pub mod traits;

pub use http::HttpApiClient;
pub use traits::{parse_link_next, ApiClient, ApiError, ApiRequest, ApiResponse, Method};

use crate::model::{AccountId, StatusId};

/// Credentials check, returns the own account
pub const VERIFY_CREDENTIALS: &str = "/api/v1/accounts/verify_credentials";
/// Home timeline listing
pub const HOME_TIMELINE: &str = "/api/v1/timelines/home";
/// Notification listing
pub const NOTIFICATIONS: &str = "/api/v1/notifications";
/// Status creation
pub const STATUSES: &str = "/api/v1/statuses";

/// Path of one status
#[must_use]
pub fn status_path(id: StatusId) -> String {
    format!("{STATUSES}/{id}")
}

/// Path of an action on a status, such as `favourite` or `reblog`
#[must_use]
pub fn status_action_path(id: StatusId, action: &str) -> String {
    format!("{STATUSES}/{id}/{action}")
}

/// Path of a status' thread context
#[must_use]
pub fn context_path(id: StatusId) -> String {
    status_action_path(id, "context")
}

/// Path of an action on an account, such as `follow` or `block`
#[must_use]
pub fn account_action_path(id: AccountId, action: &str) -> String {
    format!("/api/v1/accounts/{id}/{action}")
}
