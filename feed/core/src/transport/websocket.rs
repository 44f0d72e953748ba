//! WebSocket Client State Machine
//!
//! Drives one streaming subscription over a hand-rolled RFC 6455 client.
//!
//! # States
//!
//! ```text
//! Idle ──connect──▶ Connecting ──101──▶ Connected ──owner gone──▶ Closing
//!                       │                   │
//!                       └──── failure ──────┴──────▶ Disconnected
//! ```
//!
//! # Reconnect Policy
//!
//! A read or write failure while `Connected` triggers exactly one soft
//! reconnect: the stream is torn down and connect plus handshake run again.
//! A failure in any other state, including during that reconnect, is fatal
//! and returned to the owner. A reconnect that succeeds re-arms the policy.
//!
//! # Frame Handling
//!
//! - ping: answered with a pong carrying the same payload
//! - pong: recorded on the liveness indicator
//! - close: fatal; reports `credentials_invalid` when the connection was up
//! - text: unwrapped from its envelope and forwarded as a [`RawEvent`]
//! - continuation, non-final, binary and reserved frames: logged and dropped
//!
//! Every complete frame already buffered is handled before the socket is
//! read again.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::{mpsc, watch};

use super::connector::Endpoint;
use super::frame::{self, Frame, FrameDecoder, Opcode, DEFAULT_MAX_PAYLOAD};
use super::handshake::{parse_response, HandshakeRequest};
use super::heartbeat::Liveness;
use super::traits::{BoxedStream, ConnectionId, Connector, TransportError};
use crate::events::RawEvent;

/// Bytes requested per socket read
const READ_CHUNK: usize = 8192;

/// Outbound queue depth per connection
const OUTBOUND_CAPACITY: usize = 32;

/// Connection lifecycle state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started
    Idle,
    /// TCP/TLS connect and upgrade in progress
    Connecting,
    /// Upgrade accepted, frames flowing
    Connected,
    /// Owner went away, closing politely
    Closing,
    /// Terminated by an error or a close frame
    Disconnected,
}

/// Settings for one WebSocket connection
#[derive(Clone, Debug)]
pub struct WebSocketConfig {
    /// `Origin` header, normally the instance base URL
    pub origin: String,
    /// OAuth bearer token
    pub access_token: String,
    /// `User-Agent` header
    pub user_agent: String,
    /// Time allowed for the upgrade response
    pub handshake_timeout: Duration,
    /// Largest accepted frame payload
    pub max_payload: u64,
    /// Whether the single soft reconnect is attempted
    pub reconnect: bool,
}

impl Default for WebSocketConfig {
    fn default() -> Self {
        Self {
            origin: String::new(),
            access_token: String::new(),
            user_agent: concat!("fedisync/", env!("CARGO_PKG_VERSION")).to_string(),
            handshake_timeout: Duration::from_secs(30),
            max_payload: DEFAULT_MAX_PAYLOAD,
            reconnect: true,
        }
    }
}

/// Owner-side handle to a running [`WebSocketClient`]
///
/// Dropping every handle makes the client close the connection and return.
#[derive(Clone, Debug)]
pub struct WebSocketHandle {
    id: ConnectionId,
    outbound: mpsc::Sender<String>,
    state: watch::Receiver<ConnectionState>,
    liveness: Liveness,
}

impl WebSocketHandle {
    /// Connection identifier used in log fields
    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Liveness indicator shared with the connection task
    #[must_use]
    pub fn liveness(&self) -> &Liveness {
        &self.liveness
    }

    /// Queue a text payload to be sent as a masked text frame
    pub async fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.outbound
            .send(text.into())
            .await
            .map_err(|_| TransportError::SendFailed("connection task has ended".into()))
    }

    /// Wait until the state satisfies `predicate`
    pub async fn wait_for_state(&mut self, predicate: impl Fn(ConnectionState) -> bool) {
        // An Err means the client task ended; the last value stays readable.
        let _ = self.state.wait_for(|state| predicate(*state)).await;
    }
}

struct Connection {
    stream: BoxedStream,
    decoder: FrameDecoder,
}

enum Step {
    Read(std::io::Result<usize>),
    Outbound(Option<String>),
}

enum Flow {
    Continue,
    Stop,
}

/// WebSocket client for one streaming subscription
pub struct WebSocketClient {
    id: ConnectionId,
    connector: Arc<dyn Connector>,
    endpoint: Endpoint,
    config: WebSocketConfig,
    liveness: Liveness,
    state_tx: watch::Sender<ConnectionState>,
    outbound_rx: mpsc::Receiver<String>,
}

impl WebSocketClient {
    /// Create a client in the `Idle` state and its owner handle
    pub fn new(
        connector: Arc<dyn Connector>,
        endpoint: Endpoint,
        config: WebSocketConfig,
        liveness: Liveness,
    ) -> (Self, WebSocketHandle) {
        let id = ConnectionId::new();
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_CAPACITY);
        let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);

        let handle = WebSocketHandle {
            id: id.clone(),
            outbound: outbound_tx,
            state: state_rx,
            liveness: liveness.clone(),
        };

        let client = Self {
            id,
            connector,
            endpoint,
            config,
            liveness,
            state_tx,
            outbound_rx,
        };

        (client, handle)
    }

    /// Connect and stream events into `events` until the connection ends
    ///
    /// Returns `Ok(())` when the owner goes away (event receiver or every
    /// handle dropped) and the fatal error otherwise.
    pub async fn run(mut self, events: mpsc::Sender<RawEvent>) -> Result<(), TransportError> {
        let mut conn = self.establish().await.map_err(|e| self.fail(e))?;

        loop {
            let err = match self.pump(&mut conn, &events).await {
                Ok(()) => {
                    self.close(conn).await;
                    return Ok(());
                }
                Err(err) => err,
            };

            let connected = *self.state_tx.borrow() == ConnectionState::Connected;
            if self.config.reconnect && connected && err.is_stream_failure() {
                tracing::warn!(
                    conn_id = %self.id,
                    error = %err,
                    "Stream connection failed, reconnecting"
                );
                conn = self.establish().await.map_err(|e| self.fail(e))?;
                tracing::info!(conn_id = %self.id, "Stream connection re-established");
                continue;
            }

            return Err(self.fail(err));
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            tracing::trace!(conn_id = %self.id, ?previous, ?state, "Connection state changed");
        }
    }

    fn fail(&self, err: TransportError) -> TransportError {
        tracing::debug!(conn_id = %self.id, error = %err, "Stream connection failed");
        self.set_state(ConnectionState::Disconnected);
        err
    }

    async fn establish(&self) -> Result<Connection, TransportError> {
        self.set_state(ConnectionState::Connecting);

        let mut stream = self.connector.connect(&self.endpoint).await?;

        let request = HandshakeRequest::new(
            &self.endpoint.path,
            self.endpoint.host_header(),
            &self.config.origin,
            &self.config.access_token,
            &self.config.user_agent,
        );
        stream
            .write_all(&request.to_bytes())
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))?;

        let mut decoder = FrameDecoder::with_max_payload(self.config.max_payload);
        tokio::time::timeout(
            self.config.handshake_timeout,
            read_upgrade(&mut stream, &mut decoder),
        )
        .await
        .map_err(|_| {
            TransportError::Timeout(format!(
                "no upgrade response within {:?}",
                self.config.handshake_timeout
            ))
        })??;

        self.liveness.record_activity();
        self.set_state(ConnectionState::Connected);
        tracing::info!(
            conn_id = %self.id,
            host = %self.endpoint.host,
            path = %self.endpoint.path,
            "Stream connected"
        );

        Ok(Connection { stream, decoder })
    }

    async fn pump(
        &mut self,
        conn: &mut Connection,
        events: &mpsc::Sender<RawEvent>,
    ) -> Result<(), TransportError> {
        let mut chunk = vec![0u8; READ_CHUNK];

        loop {
            while let Some(frame) = conn.decoder.decode()? {
                if let Flow::Stop = self.handle_frame(&mut conn.stream, frame, events).await? {
                    return Ok(());
                }
            }

            let step = tokio::select! {
                read = conn.stream.read(&mut chunk) => Step::Read(read),
                outbound = self.outbound_rx.recv() => Step::Outbound(outbound),
            };

            match step {
                Step::Read(Ok(0)) => return Err(TransportError::ConnectionClosed),
                Step::Read(Ok(n)) => conn.decoder.push(&chunk[..n]),
                Step::Read(Err(e)) => return Err(TransportError::ReceiveFailed(e.to_string())),
                Step::Outbound(Some(text)) => {
                    send_frame(&mut conn.stream, Opcode::Text, text.as_bytes()).await?;
                }
                Step::Outbound(None) => return Ok(()),
            }
        }
    }

    async fn handle_frame(
        &self,
        stream: &mut BoxedStream,
        frame: Frame,
        events: &mpsc::Sender<RawEvent>,
    ) -> Result<Flow, TransportError> {
        match frame.opcode {
            Opcode::Ping => {
                self.liveness.record_pong();
                send_frame(stream, Opcode::Pong, &frame.payload).await?;
            }
            Opcode::Pong => {
                self.liveness.record_pong();
            }
            Opcode::Close => {
                let credentials_invalid =
                    *self.state_tx.borrow() == ConnectionState::Connected;
                tracing::warn!(
                    conn_id = %self.id,
                    credentials_invalid,
                    "Server closed the stream"
                );
                self.set_state(ConnectionState::Disconnected);
                return Err(TransportError::ClosedByPeer {
                    credentials_invalid,
                });
            }
            Opcode::Text if frame.fin => {
                self.liveness.record_activity();
                let Ok(text) = String::from_utf8(frame.payload) else {
                    tracing::warn!(conn_id = %self.id, "Dropping text frame with invalid UTF-8");
                    return Ok(Flow::Continue);
                };
                match RawEvent::from_envelope(&text) {
                    Ok(Some(event)) => {
                        if events.send(event).await.is_err() {
                            return Ok(Flow::Stop);
                        }
                    }
                    Ok(None) => {
                        tracing::trace!(conn_id = %self.id, "Ignoring unhandled stream event");
                    }
                    Err(e) => {
                        tracing::warn!(conn_id = %self.id, error = %e, "Dropping malformed stream event");
                    }
                }
            }
            Opcode::Text | Opcode::Continuation => {
                tracing::debug!(
                    conn_id = %self.id,
                    opcode = ?frame.opcode,
                    fin = frame.fin,
                    "Ignoring fragmented frame"
                );
            }
            Opcode::Binary | Opcode::Reserved(_) => {
                tracing::debug!(conn_id = %self.id, opcode = ?frame.opcode, "Ignoring frame");
            }
        }
        Ok(Flow::Continue)
    }

    async fn close(&self, mut conn: Connection) {
        self.set_state(ConnectionState::Closing);
        let _ = send_frame(&mut conn.stream, Opcode::Close, &[]).await;
        let _ = conn.stream.shutdown().await;
        self.set_state(ConnectionState::Disconnected);
        tracing::debug!(conn_id = %self.id, "Stream closed by owner");
    }
}

async fn read_upgrade(
    stream: &mut BoxedStream,
    decoder: &mut FrameDecoder,
) -> Result<(), TransportError> {
    let mut response = Vec::with_capacity(1024);
    let mut chunk = [0u8; 1024];

    loop {
        let n = stream
            .read(&mut chunk)
            .await
            .map_err(|e| TransportError::ReceiveFailed(e.to_string()))?;
        if n == 0 {
            return Err(TransportError::ConnectionClosed);
        }
        response.extend_from_slice(&chunk[..n]);

        if let Some(consumed) = parse_response(&response)? {
            decoder.push(&response[consumed..]);
            return Ok(());
        }
    }
}

async fn send_frame(
    stream: &mut BoxedStream,
    opcode: Opcode,
    payload: &[u8],
) -> Result<(), TransportError> {
    let bytes = frame::encode(opcode, payload);
    stream
        .write_all(&bytes)
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))?;
    stream
        .flush()
        .await
        .map_err(|e| TransportError::SendFailed(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StreamEventKind;
    use crate::transport::frame::FrameError;
    use crate::transport::handshake::HandshakeError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::io::DuplexStream;

    const SWITCHING: &[u8] = b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\n\r\n";

    /// Hands the server half of an in-memory pipe to the test per connect
    struct PipeConnector {
        peers: mpsc::UnboundedSender<DuplexStream>,
        attempts: AtomicUsize,
    }

    #[async_trait]
    impl Connector for PipeConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<BoxedStream, TransportError> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            let (client, server) = tokio::io::duplex(1 << 16);
            self.peers
                .send(server)
                .map_err(|_| TransportError::ConnectionFailed("no peer".into()))?;
            Ok(Box::new(client))
        }
    }

    fn endpoint() -> Endpoint {
        Endpoint {
            host: "social.example".into(),
            port: 443,
            tls: true,
            path: "/api/v1/streaming?stream=user".into(),
        }
    }

    fn setup() -> (
        WebSocketClient,
        WebSocketHandle,
        Arc<PipeConnector>,
        mpsc::UnboundedReceiver<DuplexStream>,
    ) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let connector = Arc::new(PipeConnector {
            peers: peers_tx,
            attempts: AtomicUsize::new(0),
        });
        let config = WebSocketConfig {
            origin: "https://social.example".into(),
            access_token: "token".into(),
            handshake_timeout: Duration::from_secs(5),
            ..Default::default()
        };
        let (client, handle) =
            WebSocketClient::new(connector.clone(), endpoint(), config, Liveness::new());
        (client, handle, connector, peers_rx)
    }

    async fn read_request(server: &mut DuplexStream) -> String {
        let mut request = Vec::new();
        let mut byte = [0u8; 1];
        while !request.ends_with(b"\r\n\r\n") {
            server.read_exact(&mut byte).await.unwrap();
            request.push(byte[0]);
        }
        String::from_utf8(request).unwrap()
    }

    async fn accept(server: &mut DuplexStream, leftover: &[u8]) -> String {
        let request = read_request(server).await;
        let mut response = SWITCHING.to_vec();
        response.extend_from_slice(leftover);
        server.write_all(&response).await.unwrap();
        request
    }

    fn server_frame(opcode: Opcode, fin: bool, payload: &[u8]) -> Vec<u8> {
        assert!(payload.len() <= 125);
        let mut buf = vec![if fin { 0x80 } else { 0 } | opcode.as_u8(), payload.len() as u8];
        buf.extend_from_slice(payload);
        buf
    }

    fn envelope(event: &str, payload: &str) -> Vec<u8> {
        let text = serde_json::json!({ "event": event, "payload": payload }).to_string();
        server_frame(Opcode::Text, true, text.as_bytes())
    }

    async fn read_client_frame(server: &mut DuplexStream) -> Frame {
        let mut decoder = FrameDecoder::new();
        let mut byte = [0u8; 1];
        loop {
            if let Some(frame) = decoder.decode().unwrap() {
                return frame;
            }
            server.read_exact(&mut byte).await.unwrap();
            decoder.push(&byte);
        }
    }

    #[tokio::test]
    async fn test_handshake_request_headers() {
        let (client, _handle, _connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        let request = accept(&mut server, &[]).await;

        assert!(request.starts_with("GET /api/v1/streaming?stream=user HTTP/1.1\r\n"));
        assert!(request.contains("Host: social.example\r\n"));
        assert!(request.contains("Origin: https://social.example\r\n"));
        assert!(request.contains("Authorization: Bearer token\r\n"));
        assert!(request.contains("Sec-WebSocket-Version: 13\r\n"));

        task.abort();
    }

    #[tokio::test]
    async fn test_leftover_bytes_after_upgrade_are_decoded() {
        let (client, _handle, _connector, mut peers) = setup();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &envelope("delete", "42")).await;

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.kind, StreamEventKind::Delete);
        assert_eq!(event.payload, "42");

        task.abort();
    }

    #[tokio::test]
    async fn test_ping_answered_with_pong() {
        let (client, handle, _connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &[]).await;
        server
            .write_all(&server_frame(Opcode::Ping, true, b"beat"))
            .await
            .unwrap();

        let pong = read_client_frame(&mut server).await;
        assert_eq!(pong.opcode, Opcode::Pong);
        assert_eq!(pong.payload, b"beat");
        assert!(handle.liveness().take_ponged());

        task.abort();
    }

    #[tokio::test]
    async fn test_close_while_connected_reports_invalid_credentials() {
        let (client, handle, _connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &server_frame(Opcode::Close, true, &[])).await;

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(TransportError::ClosedByPeer {
                credentials_invalid: true
            })
        ));
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_fragments_ignored_and_stream_continues() {
        let (client, _handle, _connector, mut peers) = setup();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        let mut frames = server_frame(Opcode::Text, false, b"{\"event\":");
        frames.extend(server_frame(Opcode::Continuation, true, b"\"delete\"}"));
        frames.extend(server_frame(Opcode::Binary, true, b"\x00\x01"));
        frames.extend(envelope("delete", "7"));
        accept(&mut server, &frames).await;

        let event = events_rx.recv().await.unwrap();
        assert_eq!(event.payload, "7");

        task.abort();
    }

    #[tokio::test]
    async fn test_protocol_error_while_connected_is_fatal() {
        let (client, _handle, connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &[0x81 | 0x40, 0x00]).await;

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(TransportError::Frame(FrameError::ReservedBits(_)))
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_outbound_text_is_masked() {
        let (client, handle, _connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &[]).await;

        handle.send_text("hello").await.unwrap();

        let mut header = [0u8; 2];
        server.read_exact(&mut header).await.unwrap();
        assert_eq!(header[0], 0x81);
        assert_eq!(header[1], 0x80 | 5);

        let mut rest = [0u8; 9];
        server.read_exact(&mut rest).await.unwrap();
        let key = [rest[0], rest[1], rest[2], rest[3]];
        assert_eq!(frame::mask(key, &rest[4..]), b"hello");

        task.abort();
    }

    #[tokio::test]
    async fn test_reconnects_exactly_once() {
        let (client, handle, connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let mut watcher = handle.clone();
        let task = tokio::spawn(client.run(events_tx));

        // First connection upgrades, then drops.
        let mut first = peers.recv().await.unwrap();
        accept(&mut first, &[]).await;
        watcher
            .wait_for_state(|s| s == ConnectionState::Connected)
            .await;
        drop(first);

        // The reconnect is refused: fatal, no further attempts.
        let mut second = peers.recv().await.unwrap();
        read_request(&mut second).await;
        second
            .write_all(b"HTTP/1.1 401 Unauthorized\r\n\r\n")
            .await
            .unwrap();

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(TransportError::Handshake(HandshakeError::UnexpectedStatus { .. }))
        ));
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(handle.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn test_successful_reconnect_rearms_policy() {
        let (client, handle, connector, mut peers) = setup();
        let (events_tx, mut events_rx) = mpsc::channel(8);
        let mut watcher = handle.clone();
        let task = tokio::spawn(client.run(events_tx));

        for _ in 0..2 {
            let mut server = peers.recv().await.unwrap();
            accept(&mut server, &[]).await;
            watcher
                .wait_for_state(|s| s == ConnectionState::Connected)
                .await;
            drop(server);
        }

        let mut third = peers.recv().await.unwrap();
        accept(&mut third, &envelope("delete", "9")).await;

        assert_eq!(events_rx.recv().await.unwrap().payload, "9");
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 3);

        task.abort();
    }

    #[tokio::test]
    async fn test_initial_handshake_failure_is_fatal() {
        let (client, _handle, connector, mut peers) = setup();
        let (events_tx, _events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        read_request(&mut server).await;
        server
            .write_all(b"HTTP/1.1 404 Not Found\r\n\r\n")
            .await
            .unwrap();

        assert!(task.await.unwrap().is_err());
        assert_eq!(connector.attempts.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_owner_drop_closes_connection() {
        let (client, handle, _connector, mut peers) = setup();
        let (events_tx, events_rx) = mpsc::channel(8);
        let task = tokio::spawn(client.run(events_tx));

        let mut server = peers.recv().await.unwrap();
        accept(&mut server, &[]).await;

        drop(events_rx);
        drop(handle);

        assert!(task.await.unwrap().is_ok());
        let close = read_client_frame(&mut server).await;
        assert_eq!(close.opcode, Opcode::Close);
    }

    #[tokio::test]
    async fn test_upgrade_split_across_reads() {
        let frame = server_frame(Opcode::Text, true, b"hi");
        let mut stream: BoxedStream = Box::new(
            tokio_test::io::Builder::new()
                .read(b"HTTP/1.1 101 Switching Protocols\r\nUpg")
                .read(&[b"rade: websocket\r\n\r\n".as_slice(), &frame].concat())
                .build(),
        );
        let mut decoder = FrameDecoder::new();

        read_upgrade(&mut stream, &mut decoder).await.unwrap();
        let leftover = decoder.decode().unwrap().unwrap();
        assert_eq!(leftover.payload, b"hi");
    }

    #[tokio::test]
    async fn test_upgrade_eof_is_closed() {
        let mut stream: BoxedStream = Box::new(
            tokio_test::io::Builder::new()
                .read(b"HTTP/1.1 101 Switching")
                .build(),
        );

        let err = read_upgrade(&mut stream, &mut FrameDecoder::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::ConnectionClosed));
    }
}
