//! Streaming Transports
//!
//! Byte-level plumbing that turns a network connection into [`RawEvent`]s:
//! - `websocket`: hand-rolled RFC 6455 client (primary transport)
//! - `sse`: Server-Sent Events over a long-lived HTTP response (alternate)
//!
//! Both transports run as spawned tasks that only send events back to their
//! owner, and both record peer activity on a shared [`Liveness`].
//!
//! [`RawEvent`]: crate::events::RawEvent

pub mod connector;
pub mod frame;
pub mod handshake;
pub mod heartbeat;
pub mod sse;
pub mod traits;
pub mod websocket;

// Re-exports for convenience
pub use connector::{Endpoint, NetConnector};
pub use frame::{Frame, FrameDecoder, FrameError, FrameHeader, Opcode};
pub use handshake::{HandshakeError, HandshakeRequest};
pub use heartbeat::{ConnectionHealth, HeartbeatConfig, Liveness};
pub use sse::{SseClient, SseTokenizer};
pub use traits::{BoxedStream, ByteStream, ConnectionId, Connector, TransportError};
pub use websocket::{ConnectionState, WebSocketClient, WebSocketConfig, WebSocketHandle};
