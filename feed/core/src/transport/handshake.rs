//! HTTP/1.1 Upgrade Handshake
//!
//! Builds the client upgrade request and recognizes the server's
//! `101 Switching Protocols` answer. Bytes that follow the response header
//! block already belong to the frame stream and are left to the caller.

use base64::Engine as _;
use rand::Rng;
use thiserror::Error;

/// Header block terminator
const HEADER_END: &[u8] = b"\r\n\r\n";

/// Refuse response header blocks larger than this
pub const MAX_RESPONSE_HEADER: usize = 16 * 1024;

/// Errors produced while reading the upgrade response
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// Server answered with something other than 101
    #[error("server refused upgrade: {status_line}")]
    UnexpectedStatus {
        /// First line of the response
        status_line: String,
    },

    /// Response header block never terminated
    #[error("response header exceeds {0} bytes")]
    HeaderTooLarge(usize),

    /// Response did not start with an HTTP status line
    #[error("malformed response: {0}")]
    Malformed(String),
}

/// Generate a `Sec-WebSocket-Key`: 16 random bytes, base64 encoded
#[must_use]
pub fn generate_key() -> String {
    let bytes: [u8; 16] = rand::thread_rng().gen();
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

/// Client upgrade request
#[derive(Clone, Debug)]
pub struct HandshakeRequest {
    /// Request target, path plus query
    pub path: String,
    /// Value of the `Host` header
    pub host: String,
    /// Value of the `Origin` header, the instance base URL
    pub origin: String,
    /// OAuth bearer token
    pub access_token: String,
    /// `Sec-WebSocket-Key`
    pub key: String,
    /// `User-Agent` header
    pub user_agent: String,
}

impl HandshakeRequest {
    /// Create a request with a freshly generated key
    pub fn new(
        path: impl Into<String>,
        host: impl Into<String>,
        origin: impl Into<String>,
        access_token: impl Into<String>,
        user_agent: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            host: host.into(),
            origin: origin.into(),
            access_token: access_token.into(),
            key: generate_key(),
            user_agent: user_agent.into(),
        }
    }

    /// Serialize the request, headers in wire order
    #[must_use]
    pub fn to_bytes(&self) -> Vec<u8> {
        format!(
            "GET {path} HTTP/1.1\r\n\
             Host: {host}\r\n\
             Connection: keep-alive, Upgrade\r\n\
             Upgrade: websocket\r\n\
             Origin: {origin}\r\n\
             Pragma: no-cache\r\n\
             Cache-Control: no-cache\r\n\
             Authorization: Bearer {token}\r\n\
             Sec-WebSocket-Version: 13\r\n\
             Sec-WebSocket-Key: {key}\r\n\
             User-Agent: {agent}\r\n\
             \r\n",
            path = self.path,
            host = self.host,
            origin = self.origin,
            token = self.access_token,
            key = self.key,
            agent = self.user_agent,
        )
        .into_bytes()
    }
}

/// Inspect buffered response bytes
///
/// Returns:
/// - `Ok(Some(n))` once the header block is complete and the status is 101;
///   `n` is the number of bytes consumed, anything after belongs to frames
/// - `Ok(None)` if the blank line has not arrived yet
/// - `Err(...)` for any other status or an oversized header block
pub fn parse_response(buf: &[u8]) -> Result<Option<usize>, HandshakeError> {
    let Some(end) = find(buf, HEADER_END) else {
        if buf.len() > MAX_RESPONSE_HEADER {
            return Err(HandshakeError::HeaderTooLarge(MAX_RESPONSE_HEADER));
        }
        return Ok(None);
    };

    let head = String::from_utf8_lossy(&buf[..end]);
    let status_line = head.lines().next().unwrap_or_default().trim().to_string();

    let mut parts = status_line.split_whitespace();
    let version = parts.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(HandshakeError::Malformed(status_line));
    }

    match parts.next() {
        Some("101") => Ok(Some(end + HEADER_END.len())),
        _ => Err(HandshakeError::UnexpectedStatus { status_line }),
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
