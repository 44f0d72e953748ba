//! Feed Core - Real-time Timeline Synchronization for Mastodon Clients
//!
//! This crate keeps a client's view of a Mastodon account in step with the
//! server: it streams new statuses, notifications and deletions, merges them
//! with the initially fetched timeline, and runs user commands through an
//! undo/redo ledger. It has no terminal or UI code; output goes through a
//! [`FeedSink`].
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────┐
//! │                         FeedSession                              │
//! │                                                                  │
//! │  ┌────────────┐   RawEvent   ┌─────────┐  DomainEvent            │
//! │  │ WebSocket  │─────────────▶│ Event   │────────────┐            │
//! │  │ or SSE     │              │ Decoder │            ▼            │
//! │  └────────────┘              └─────────┘   ┌──────────────────┐  │
//! │                                            │     Timeline     │──┼──▶ FeedSink
//! │  ┌────────────┐   REST calls               │    Reconciler    │  │
//! │  │ ApiClient  │◀──────────┐                └──────────────────┘  │
//! │  └────────────┘           │                                      │
//! │                    ┌──────┴──────┐                               │
//! │   user commands ──▶│   Command   │                               │
//! │                    │   Ledger    │                               │
//! │                    └─────────────┘                               │
//! └──────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Key Types
//!
//! - [`FeedSession`]: Owns subscriptions, reconciler and ledger for one account
//! - [`SessionHandle`]: Submits commands and subscription changes to a session
//! - [`TimelineReconciler`]: Initial merge, duplicate suppression, thread views
//! - [`CommandLedger`]: Bounded undo/redo ring
//! - [`EventDecoder`]: Turns streamed JSON into statuses and notifications
//! - [`WebSocketClient`] / [`SseClient`]: The two streaming transports
//!
//! # Quick Start
//!
//! ```ignore
//! use std::sync::Arc;
//! use feed_core::{
//!     config::load_config,
//!     api::HttpApiClient,
//!     transport::NetConnector,
//!     FeedSession,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = load_config()?;
//!     let api = HttpApiClient::new(
//!         config.base_url.clone(),
//!         config.require_access_token()?.to_string(),
//!         &config.user_agent,
//!     )?;
//!     let connector = NetConnector::new(feed_core::transport::connector::DEFAULT_CONNECT_TIMEOUT);
//!
//!     let (session, handle) =
//!         FeedSession::new(config, Arc::new(api), Arc::new(connector), Box::new(MySink))?;
//!     tokio::spawn(async move { handle.command("fav #03").await });
//!     session.run().await?;
//!     Ok(())
//! }
//! ```
//!
//! # Module Overview
//!
//! - [`transport`]: WebSocket frame codec and client, SSE client, heartbeat
//! - [`events`]: Raw stream events and the envelope format
//! - [`decode`]: JSON to domain types, content-warning rendering, HTML to text
//! - [`model`]: Statuses, accounts, notifications, subscriptions
//! - [`timeline`]: The reconciler and its gates
//! - [`commands`]: User command grammar and the REST call for each command
//! - [`ledger`]: Undo/redo history
//! - [`api`]: REST client abstraction
//! - [`config`]: TOML and environment configuration
//! - [`session`]: The session task tying it all together

#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod commands;
pub mod config;
pub mod decode;
pub mod events;
pub mod ledger;
pub mod model;
pub mod session;
pub mod timeline;
pub mod transport;

// Re-export commonly used types
pub use api::{ApiClient, ApiError, ApiRequest, ApiResponse, HttpApiClient};
pub use commands::{CommandError, LedgerCommand, PostOptions};
pub use config::{load_config, ConfigError, ConfigOverrides, FeedConfig, StreamTransport};
pub use decode::{BodyFormatter, ContentWarningPolicy, DecodeError, EventDecoder, RenderOptions};
pub use events::{DomainEvent, RawEvent, StreamEventKind};
pub use ledger::{CommandLedger, CommandOrigin, LedgerError};
pub use model::{Account, Context, Notification, NotificationKind, Status, Subscription, Visibility};
pub use session::{FeedSession, SessionError, SessionHandle, SessionToken};
pub use timeline::{FeedSink, NotificationFilter, TimelineReconciler};
pub use transport::{SseClient, TransportError, WebSocketClient};
