//! Outbound Call Traits
//!
//! The session issues every REST call through [`ApiClient`], so tests can
//! substitute a scripted client and production uses [`HttpApiClient`].
//!
//! Correlating a response with the command that caused it is the caller's
//! job; a request carries no identity of its own.
//!
//! [`HttpApiClient`]: super::http::HttpApiClient

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// HTTP method of an outbound call
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Method {
    /// GET
    Get,
    /// POST
    Post,
    /// DELETE
    Delete,
}

impl Method {
    /// Upper-case method name
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Delete => "DELETE",
        }
    }
}

/// One outbound call
///
/// `path` is relative to the instance base URL; an absolute URL (such as a
/// pagination link) is used as is.
#[derive(Clone, Debug, PartialEq)]
pub struct ApiRequest {
    /// HTTP method
    pub method: Method,
    /// Path or absolute URL
    pub path: String,
    /// Query parameters
    pub query: Vec<(String, String)>,
    /// JSON body
    pub body: Option<Value>,
}

impl ApiRequest {
    /// Create a request
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
        }
    }

    /// GET `path`
    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::Get, path)
    }

    /// POST `path`
    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::Post, path)
    }

    /// DELETE `path`
    pub fn delete(path: impl Into<String>) -> Self {
        Self::new(Method::Delete, path)
    }

    /// Add a query parameter
    #[must_use]
    pub fn with_query(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Set the JSON body
    #[must_use]
    pub fn with_body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }
}

/// Response to a successful call
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiResponse {
    /// HTTP status code
    pub status: u16,
    /// Response headers, names lower-cased
    pub headers: Vec<(String, String)>,
    /// Response body
    pub body: String,
}

impl ApiResponse {
    /// Create a 200 response with `body`
    pub fn ok(body: impl Into<String>) -> Self {
        Self {
            status: 200,
            headers: Vec::new(),
            body: body.into(),
        }
    }

    /// Add a header
    #[must_use]
    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.push((name.to_ascii_lowercase(), value.into()));
        self
    }

    /// First header called `name`, compared case-insensitively
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }

    /// Continuation URL from the `Link` header
    #[must_use]
    pub fn next_page(&self) -> Option<String> {
        self.header("link").and_then(parse_link_next)
    }

    /// Parse the body as JSON
    pub fn json(&self) -> Result<Value, serde_json::Error> {
        serde_json::from_str(&self.body)
    }
}

/// Outbound call failures
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request could not be sent or the body not read
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The target URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server answered with a non-success status
    #[error("{status}: {message}")]
    Status {
        /// HTTP status code
        status: u16,
        /// Server-provided error text, or the reason phrase
        message: String,
    },
}

impl ApiError {
    /// Build a status error from a response body
    ///
    /// The server reports failures as `{"error": "..."}`; anything else falls
    /// back to `reason`.
    pub fn from_body(status: u16, body: &str, reason: &str) -> Self {
        let message = serde_json::from_str::<Value>(body)
            .ok()
            .and_then(|v| v.get("error").and_then(Value::as_str).map(str::to_string))
            .unwrap_or_else(|| reason.to_string());
        Self::Status { status, message }
    }
}

/// Extract the `rel="next"` target of a `Link` header
///
/// ```
/// use feed_core::api::parse_link_next;
///
/// let header = r#"<https://x.example/api/v1/timelines/home?max_id=7>; rel="next", <https://x.example/api/v1/timelines/home?since_id=9>; rel="prev""#;
/// assert_eq!(
///     parse_link_next(header).as_deref(),
///     Some("https://x.example/api/v1/timelines/home?max_id=7")
/// );
/// ```
#[must_use]
pub fn parse_link_next(header: &str) -> Option<String> {
    header.split(',').find_map(|link| {
        let mut parts = link.split(';');
        let target = parts.next()?.trim();
        let url = target.strip_prefix('<')?.strip_suffix('>')?;
        parts
            .any(|param| {
                param
                    .trim()
                    .strip_prefix("rel=")
                    .is_some_and(|rel| rel.trim_matches('"') == "next")
            })
            .then(|| url.to_string())
    })
}

/// REST call capability
#[async_trait]
pub trait ApiClient: Send + Sync {
    /// Perform one call
    ///
    /// Non-success statuses are returned as [`ApiError::Status`].
    async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = ApiRequest::get("/api/v1/timelines/home")
            .with_query("limit", "40")
            .with_body(serde_json::json!({"a": 1}));

        assert_eq!(request.method, Method::Get);
        assert_eq!(request.query, vec![("limit".to_string(), "40".to_string())]);
        assert!(request.body.is_some());
        assert_eq!(Method::Delete.as_str(), "DELETE");
    }

    #[test]
    fn test_header_lookup_ignores_case() {
        let response = ApiResponse::ok("[]").with_header("Link", "<https://a/b>; rel=\"next\"");
        assert_eq!(response.header("LINK"), Some("<https://a/b>; rel=\"next\""));
        assert_eq!(response.next_page().as_deref(), Some("https://a/b"));
        assert_eq!(response.header("x-missing"), None);
    }

    #[test]
    fn test_link_without_next() {
        assert_eq!(parse_link_next("<https://a/b>; rel=\"prev\""), None);
        assert_eq!(parse_link_next(""), None);
        assert_eq!(parse_link_next("garbage; rel=next"), None);
        assert_eq!(
            parse_link_next("<https://a/c>; rel=next").as_deref(),
            Some("https://a/c")
        );
    }

    #[test]
    fn test_error_from_body() {
        let err = ApiError::from_body(401, r#"{"error":"The access token is invalid"}"#, "Unauthorized");
        assert_eq!(err.to_string(), "401: The access token is invalid");

        let err = ApiError::from_body(502, "<html>", "Bad Gateway");
        assert_eq!(err.to_string(), "502: Bad Gateway");
    }
}
