//! TCP/TLS Connector
//!
//! Resolves a streaming URL into an [`Endpoint`] and opens the byte stream,
//! negotiating TLS for `wss://` and `https://` URLs.

use std::time::Duration;

use async_trait::async_trait;
use tokio::net::TcpStream;
use url::Url;

use super::traits::{BoxedStream, Connector, TransportError};

/// Default time allowed for TCP connect plus TLS negotiation
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// Where a streaming connection goes
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoint {
    /// Host name (also the TLS server name)
    pub host: String,
    /// TCP port
    pub port: u16,
    /// Whether the stream is wrapped in TLS
    pub tls: bool,
    /// Request target: path plus query
    pub path: String,
}

impl Endpoint {
    /// Build an endpoint from a `ws`, `wss`, `http` or `https` URL
    pub fn from_url(url: &Url) -> Result<Self, TransportError> {
        let tls = match url.scheme() {
            "wss" | "https" => true,
            "ws" | "http" => false,
            other => {
                return Err(TransportError::InvalidEndpoint(format!(
                    "unsupported scheme '{other}'"
                )))
            }
        };

        let host = url
            .host_str()
            .ok_or_else(|| TransportError::InvalidEndpoint(format!("no host in {url}")))?
            .to_string();
        let port = url
            .port_or_known_default()
            .unwrap_or(if tls { 443 } else { 80 });

        let mut path = url.path().to_string();
        if let Some(query) = url.query() {
            path.push('?');
            path.push_str(query);
        }

        Ok(Self {
            host,
            port,
            tls,
            path,
        })
    }

    /// Value for the `Host` request header
    #[must_use]
    pub fn host_header(&self) -> String {
        let default_port = if self.tls { 443 } else { 80 };
        if self.port == default_port {
            self.host.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

/// Network connector over `tokio::net::TcpStream` and `tokio-native-tls`
#[derive(Clone, Debug)]
pub struct NetConnector {
    connect_timeout: Duration,
}

impl Default for NetConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

impl NetConnector {
    /// Create a connector with the given connect timeout
    #[must_use]
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(&self, endpoint: &Endpoint) -> Result<BoxedStream, TransportError> {
        let tcp = TcpStream::connect((endpoint.host.as_str(), endpoint.port))
            .await
            .map_err(|e| {
                TransportError::ConnectionFailed(format!(
                    "{}:{}: {e}",
                    endpoint.host, endpoint.port
                ))
            })?;
        tcp.set_nodelay(true)?;

        if !endpoint.tls {
            return Ok(Box::new(tcp));
        }

        let connector = tokio_native_tls::native_tls::TlsConnector::new()
            .map_err(|e| TransportError::Tls(e.to_string()))?;
        let connector = tokio_native_tls::TlsConnector::from(connector);
        let tls = connector
            .connect(&endpoint.host, tcp)
            .await
            .map_err(|e| TransportError::Tls(e.to_string()))?;

        Ok(Box::new(tls))
    }
}

#[async_trait]
impl Connector for NetConnector {
    async fn connect(&self, endpoint: &Endpoint) -> Result<BoxedStream, TransportError> {
        tracing::debug!(
            host = %endpoint.host,
            port = endpoint.port,
            tls = endpoint.tls,
            "Opening stream connection"
        );

        tokio::time::timeout(self.connect_timeout, self.open(endpoint))
            .await
            .map_err(|_| {
                TransportError::Timeout(format!(
                    "connecting to {}:{} took longer than {:?}",
                    endpoint.host, endpoint.port, self.connect_timeout
                ))
            })?
    }
}
