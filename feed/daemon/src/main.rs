//! Feed Daemon - Follow a Mastodon Account from the Terminal
//!
//! Streams the home timeline (and any extra feeds) to stdout and reads
//! commands from stdin, one per line.
//!
//! # Usage
//!
//! ```bash
//! # Token from the environment, everything else from ~/.config/fedisync/feed.toml
//! FEED_ACCESS_TOKEN=... feed-daemon
//!
//! # Another instance, over SSE, with the local timeline too
//! feed-daemon --instance https://fosstodon.org/ --transport sse --subscribe local
//!
//! # Verbose logging (logs go to stderr)
//! RUST_LOG=debug feed-daemon
//! ```
//!
//! # Commands
//!
//! `post`, `reply`, `fav`, `boost`, `delete`, `follow`, `cw`, `visibility`,
//! `undo`, `redo`, `history`, `more`, `context`, `subscribe`, `unsubscribe`.
//!
//! # Signals
//!
//! - `SIGTERM` / `SIGINT`: Graceful shutdown

mod sink;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use feed_core::config::{load_config_from_path, ConfigOverrides};
use feed_core::decode::StripTags;
use feed_core::transport::connector::{NetConnector, DEFAULT_CONNECT_TIMEOUT};
use feed_core::{
    ContentWarningPolicy, FeedSession, HttpApiClient, SessionError, SessionHandle, StreamTransport,
    Subscription,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use url::Url;

use sink::LineSink;

/// Feed Daemon - Real-time Mastodon timeline in the terminal
#[derive(Parser, Debug)]
#[command(name = "feed-daemon")]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Configuration file path
    #[arg(short = 'c', long, env = "FEED_CONFIG", value_name = "FILE")]
    config: Option<PathBuf>,

    /// Instance base URL
    #[arg(short = 'i', long, value_name = "URL")]
    instance: Option<Url>,

    /// Access token (prefer FEED_ACCESS_TOKEN or the config file)
    #[arg(long, value_name = "TOKEN")]
    token: Option<String>,

    /// Streaming transport (websocket, sse)
    #[arg(short = 't', long, value_name = "KIND")]
    transport: Option<String>,

    /// Content-warning policy (show, hide, rot13, wrapped-rot13)
    #[arg(long, value_name = "POLICY")]
    cw_policy: Option<String>,

    /// Extra feed to follow (local, federated, #tag, list <id>); repeatable
    #[arg(short = 's', long = "subscribe", value_name = "FEED")]
    subscriptions: Vec<String>,

    /// Disable stall detection
    #[arg(long)]
    no_heartbeat: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short = 'l', long, env = "FEED_LOG_LEVEL", default_value = "warn")]
    log_level: String,
}

impl Args {
    fn overrides(&self) -> Result<ConfigOverrides> {
        let mut overrides = ConfigOverrides::new();

        if let Some(url) = &self.instance {
            overrides = overrides.with_base_url(url.clone());
        }
        if let Some(token) = &self.token {
            overrides = overrides.with_access_token(token.clone());
        }
        if let Some(name) = &self.transport {
            let transport = StreamTransport::parse(name)
                .with_context(|| format!("Unknown transport: {name}"))?;
            overrides = overrides.with_transport(transport);
        }
        if let Some(name) = &self.cw_policy {
            let policy = ContentWarningPolicy::parse(name)
                .with_context(|| format!("Unknown content-warning policy: {name}"))?;
            overrides = overrides.with_cw_policy(policy);
        }
        for feed in &self.subscriptions {
            let subscription =
                Subscription::parse(feed).with_context(|| format!("Unknown feed: {feed}"))?;
            overrides = overrides.with_subscription(subscription);
        }
        if self.no_heartbeat {
            overrides = overrides.with_heartbeat_enabled(false);
        }

        Ok(overrides)
    }
}

/// Initialize logging with the specified level
///
/// Logs go to stderr so they never mix with the feed on stdout.
fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(format!("feed_daemon={level},feed_core={level}"))
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Forward stdin lines to the session until EOF
async fn read_commands(handle: SessionHandle) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if matches!(line, "quit" | "exit") {
            break;
        }
        if handle.command(line).await.is_err() {
            // Session already gone
            return Ok(());
        }
    }

    info!("Input closed, shutting down");
    // An error only means the session has already ended
    let _ = handle.shutdown().await;
    Ok(())
}

/// Shut the session down on SIGTERM or SIGINT
async fn watch_signals(handle: SessionHandle) -> Result<()> {
    let mut sigterm =
        signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
    let mut sigint = signal(SignalKind::interrupt()).context("Failed to install SIGINT handler")?;

    tokio::select! {
        _ = sigterm.recv() => info!("Received SIGTERM, initiating shutdown"),
        _ = sigint.recv() => info!("Received SIGINT, initiating shutdown"),
    }

    let _ = handle.shutdown().await;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging first
    init_logging(&args.log_level)?;

    info!("Feed daemon starting");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let mut config =
        load_config_from_path(args.config.clone()).context("Failed to load configuration")?;
    args.overrides()?.apply(&mut config);
    info!(
        instance = %config.base_url,
        transport = %config.transport,
        source = %config.source(),
        "Configuration loaded"
    );

    let token = config
        .require_access_token()
        .context("No access token configured")?
        .to_string();
    let api = HttpApiClient::new(config.base_url.clone(), token, &config.user_agent)
        .context("Failed to build HTTP client")?;
    let connector = NetConnector::new(DEFAULT_CONNECT_TIMEOUT);

    let (session, handle) = FeedSession::new(
        config,
        Arc::new(api),
        Arc::new(connector),
        Box::new(LineSink::stdout()),
    )
    .context("Failed to start session")?;
    let session = session.with_formatter(Arc::new(StripTags));

    let input = tokio::spawn(read_commands(handle.clone()));
    let signals = tokio::spawn(watch_signals(handle));

    let result = session.run().await;

    input.abort();
    signals.abort();

    match result {
        Ok(()) => {
            info!("Feed daemon stopped cleanly");
            Ok(())
        }
        Err(SessionError::CredentialsRejected) => {
            // Restarting with the same token would be rejected again
            error!("Access token rejected by the instance");
            Err(SessionError::CredentialsRejected)
                .context("Obtain a new access token (FEED_ACCESS_TOKEN or --token)")
        }
        Err(e) => {
            error!(error = %e, "Session ended with error");
            warn!("Check the instance URL, access token and network");
            Err(e).context("Feed session failed")
        }
    }
}
