//! Transport Traits
//!
//! Seams between the streaming state machines and the network:
//! - `ByteStream`: any async duplex byte pipe (TCP, TLS, in-memory)
//! - `Connector`: establishes a `ByteStream` to an [`Endpoint`]

use std::fmt;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use super::connector::Endpoint;
use super::frame::FrameError;
use super::handshake::HandshakeError;

/// Unique identifier for one streaming connection, used in log fields
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConnectionId(pub String);

impl ConnectionId {
    /// Generate a new random connection ID
    #[must_use]
    pub fn new() -> Self {
        use rand::Rng;
        let bytes: [u8; 8] = rand::thread_rng().gen();
        Self(format!("stream_{}", hex::encode(bytes)))
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// An established duplex byte stream
pub trait ByteStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T> ByteStream for T where T: AsyncRead + AsyncWrite + Unpin + Send {}

/// Boxed byte stream as handed out by connectors
pub type BoxedStream = Box<dyn ByteStream>;

/// Establishes byte streams to streaming endpoints
///
/// The production implementation is [`super::connector::NetConnector`];
/// tests substitute in-process peers.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Open a byte stream to `endpoint` (TLS already negotiated when required)
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream, TransportError>;
}

/// Errors that can occur during transport operations
#[derive(Debug)]
pub enum TransportError {
    /// Connection to peer failed
    ConnectionFailed(String),
    /// Connection was closed by EOF
    ConnectionClosed,
    /// Peer sent a close frame
    ClosedByPeer {
        /// Set when the close arrived on an established connection, which
        /// the server uses to reject expired credentials
        credentials_invalid: bool,
    },
    /// Event stream ended
    StreamClosed,
    /// Failed to send data
    SendFailed(String),
    /// Failed to receive data
    ReceiveFailed(String),
    /// TLS negotiation failed
    Tls(String),
    /// HTTP upgrade was rejected or malformed
    Handshake(HandshakeError),
    /// Frame could not be decoded
    Frame(FrameError),
    /// Operation did not finish in time
    Timeout(String),
    /// URL could not be turned into an endpoint
    InvalidEndpoint(String),
    /// IO error from underlying transport
    IoError(std::io::Error),
}

impl TransportError {
    /// Whether this failure may be retried by the soft reconnect policy
    ///
    /// Only read/write failures on the byte stream qualify. An explicit close
    /// from the peer does not. Neither does a `Frame` error: the peer broke
    /// the protocol, and a fresh connection to the same peer would too.
    #[must_use]
    pub fn is_stream_failure(&self) -> bool {
        matches!(
            self,
            Self::ConnectionClosed | Self::SendFailed(_) | Self::ReceiveFailed(_) | Self::IoError(_)
        )
    }

    /// Whether the peer rejected the access token
    #[must_use]
    pub fn is_credentials_rejected(&self) -> bool {
        matches!(
            self,
            Self::ClosedByPeer {
                credentials_invalid: true
            }
        )
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionFailed(msg) => write!(f, "Connection failed: {msg}"),
            Self::ConnectionClosed => write!(f, "Connection closed"),
            Self::ClosedByPeer {
                credentials_invalid: true,
            } => write!(f, "Closed by server: credentials are no longer valid"),
            Self::ClosedByPeer { .. } => write!(f, "Closed by server"),
            Self::StreamClosed => write!(f, "Stream closed"),
            Self::SendFailed(msg) => write!(f, "Send failed: {msg}"),
            Self::ReceiveFailed(msg) => write!(f, "Receive failed: {msg}"),
            Self::Tls(msg) => write!(f, "TLS error: {msg}"),
            Self::Handshake(e) => write!(f, "Handshake failed: {e}"),
            Self::Frame(e) => write!(f, "Invalid frame: {e}"),
            Self::Timeout(msg) => write!(f, "Timeout: {msg}"),
            Self::InvalidEndpoint(msg) => write!(f, "Invalid endpoint: {msg}"),
            Self::IoError(e) => write!(f, "IO error: {e}"),
        }
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::IoError(e) => Some(e),
            Self::Handshake(e) => Some(e),
            Self::Frame(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError(err)
    }
}

impl From<FrameError> for TransportError {
    fn from(err: FrameError) -> Self {
        Self::Frame(err)
    }
}

impl From<HandshakeError> for TransportError {
    fn from(err: HandshakeError) -> Self {
        Self::Handshake(err)
    }
}
