//! TOML Configuration File Support
//!
//! Centralized configuration loading for a feed session, with a TOML file at
//! `~/.config/fedisync/feed.toml`.
//!
//! # Configuration Priority
//!
//! Values are applied in this order, later layers winning:
//! 1. Default values
//! 2. TOML configuration file
//! 3. Environment variables (`FEED_*`)
//! 4. CLI arguments, through [`ConfigOverrides`]
//!
//! # Example Configuration
//!
//! ```toml
//! [instance]
//! base_url = "https://social.example"
//! access_token = "..."
//! default_visibility = "unlisted"
//!
//! [stream]
//! transport = "websocket"
//! subscriptions = ["local", "#rust"]
//! stall_after_secs = 120
//! handshake_timeout_secs = 30
//! reconnect = true
//!
//! [display]
//! cw_policy = "wrapped_rot13"
//! sensitive_flag = "*NSFW* "
//! strip_newlines = false
//! hide_boosts = true
//!
//! [ledger]
//! capacity = 10
//! ```

use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

use crate::decode::content::{ContentWarningPolicy, RenderOptions};
use crate::ledger::DEFAULT_CAPACITY;
use crate::model::{AccountId, Subscription, Visibility};
use crate::timeline::NotificationFilter;
use crate::transport::frame::DEFAULT_MAX_PAYLOAD;
use crate::transport::heartbeat::HeartbeatConfig;
use crate::transport::websocket::WebSocketConfig;

/// Instance used when none is configured
pub const DEFAULT_INSTANCE: &str = "https://mastodon.social/";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

/// Streaming transport used for every subscription
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamTransport {
    /// Raw WebSocket client
    #[default]
    WebSocket,
    /// Server-Sent Events over HTTP
    Sse,
}

impl StreamTransport {
    /// Parse a setting value
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "websocket" | "ws" => Some(Self::WebSocket),
            "sse" | "http" => Some(Self::Sse),
            _ => None,
        }
    }
}

impl fmt::Display for StreamTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WebSocket => write!(f, "websocket"),
            Self::Sse => write!(f, "sse"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Instance section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InstanceToml {
    /// Instance base URL
    pub base_url: Option<String>,

    /// OAuth bearer token
    pub access_token: Option<String>,

    /// Own account id, normally learned from the credentials check
    pub account_id: Option<AccountId>,

    /// Visibility of posts without an explicit `visibility` command
    pub default_visibility: Option<String>,
}

/// Stream section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamToml {
    /// `websocket` or `sse`
    pub transport: Option<String>,

    /// Feeds subscribed in addition to home
    pub subscriptions: Option<Vec<String>>,

    /// Whether stall detection is enabled
    pub heartbeat_enabled: Option<bool>,

    /// Silence in seconds after which a stream counts as stalled
    pub stall_after_secs: Option<u64>,

    /// Time allowed for the WebSocket upgrade in seconds
    pub handshake_timeout_secs: Option<u64>,

    /// Largest accepted frame payload in bytes
    pub max_payload: Option<u64>,

    /// Whether a dropped WebSocket is re-established once
    pub reconnect: Option<bool>,
}

/// Display section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplayToml {
    /// Content warning treatment
    pub cw_policy: Option<String>,

    /// Marker before sensitive bodies
    pub sensitive_flag: Option<String>,

    /// Line width for wrapped ROT13
    pub wrap_width: Option<usize>,

    /// Collapse newlines in shown statuses
    pub strip_newlines: Option<bool>,

    /// Hide mention notifications
    pub hide_mentions: Option<bool>,

    /// Hide boost notifications
    pub hide_boosts: Option<bool>,

    /// Hide favourite notifications
    pub hide_favourites: Option<bool>,

    /// Hide follow notifications
    pub hide_follows: Option<bool>,
}

/// Ledger section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LedgerToml {
    /// Number of undo slots
    pub capacity: Option<usize>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedToml {
    /// Instance section
    pub instance: InstanceToml,

    /// Stream section
    pub stream: StreamToml,

    /// Display section
    pub display: DisplayToml,

    /// Ledger section
    pub ledger: LedgerToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Configuration of one feed session
///
/// Use [`load_config`] to load it with proper priority handling.
#[derive(Clone, Debug)]
pub struct FeedConfig {
    /// Instance base URL
    pub base_url: Url,

    /// OAuth bearer token
    pub access_token: Option<String>,

    /// Own account id
    pub account_id: Option<AccountId>,

    /// Visibility of posts without an explicit `visibility` command
    pub default_visibility: Visibility,

    /// Streaming transport
    pub transport: StreamTransport,

    /// Feeds subscribed in addition to home
    pub subscriptions: Vec<Subscription>,

    /// Stall detection
    pub heartbeat: HeartbeatConfig,

    /// Time allowed for the WebSocket upgrade
    pub handshake_timeout: Duration,

    /// Largest accepted frame payload
    pub max_payload: u64,

    /// Whether a dropped WebSocket is re-established once
    pub reconnect: bool,

    /// Status rendering
    pub render: RenderOptions,

    /// Notification kinds to hide
    pub filter: NotificationFilter,

    /// Collapse newlines in shown statuses
    pub strip_newlines: bool,

    /// Number of undo slots
    pub ledger_capacity: usize,

    /// `User-Agent` for REST calls and the WebSocket upgrade
    pub user_agent: String,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for FeedConfig {
    fn default() -> Self {
        let websocket = WebSocketConfig::default();
        Self {
            base_url: default_base_url(),
            access_token: None,
            account_id: None,
            default_visibility: Visibility::Public,
            transport: StreamTransport::WebSocket,
            subscriptions: Vec::new(),
            heartbeat: HeartbeatConfig::default(),
            handshake_timeout: websocket.handshake_timeout,
            max_payload: DEFAULT_MAX_PAYLOAD,
            reconnect: true,
            render: RenderOptions::default(),
            filter: NotificationFilter::default(),
            strip_newlines: false,
            ledger_capacity: DEFAULT_CAPACITY,
            user_agent: websocket.user_agent,
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

fn default_base_url() -> Url {
    Url::parse(DEFAULT_INSTANCE).expect("default instance URL is valid")
}

impl FeedConfig {
    /// Create a new configuration with default values
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Access token, which a session cannot start without
    pub fn require_access_token(&self) -> Result<&str, ConfigError> {
        self.access_token
            .as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ConfigError::ValidationError(
                    "no access token (set [instance] access_token or FEED_ACCESS_TOKEN)".into(),
                )
            })
    }

    /// WebSocket settings derived from this configuration
    #[must_use]
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            origin: self.base_url.as_str().trim_end_matches('/').to_string(),
            access_token: self.access_token.clone().unwrap_or_default(),
            user_agent: self.user_agent.clone(),
            handshake_timeout: self.handshake_timeout,
            max_payload: self.max_payload,
            reconnect: self.reconnect,
        }
    }

    /// Check cross-field constraints
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ledger_capacity < 2 {
            return Err(ConfigError::ValidationError(format!(
                "ledger capacity must be at least 2, got {}",
                self.ledger_capacity
            )));
        }
        if self.render.wrap_width == 0 {
            return Err(ConfigError::ValidationError(
                "wrap_width must be positive".into(),
            ));
        }
        if !matches!(self.base_url.scheme(), "http" | "https") {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be http or https: {}",
                self.base_url
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Value Parsing
// =============================================================================

fn parse_url(value: &str) -> Result<Url, ConfigError> {
    Url::parse(value.trim())
        .map_err(|e| ConfigError::ValidationError(format!("invalid base_url {value:?}: {e}")))
}

fn parse_visibility(value: &str) -> Result<Visibility, ConfigError> {
    match Visibility::parse(&value.trim().to_ascii_lowercase()) {
        Visibility::Unknown => Err(ConfigError::ValidationError(format!(
            "unknown visibility: {value}"
        ))),
        visibility => Ok(visibility),
    }
}

fn parse_transport(value: &str) -> Result<StreamTransport, ConfigError> {
    StreamTransport::parse(value)
        .ok_or_else(|| ConfigError::ValidationError(format!("unknown transport: {value}")))
}

fn parse_policy(value: &str) -> Result<ContentWarningPolicy, ConfigError> {
    ContentWarningPolicy::parse(value)
        .ok_or_else(|| ConfigError::ValidationError(format!("unknown cw_policy: {value}")))
}

fn parse_subscriptions(values: &[String]) -> Result<Vec<Subscription>, ConfigError> {
    values
        .iter()
        .map(|value| {
            Subscription::parse(value)
                .ok_or_else(|| ConfigError::ValidationError(format!("unknown feed: {value}")))
        })
        .collect()
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/fedisync/feed.toml` or
/// `~/.config/fedisync/feed.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("fedisync").join("feed.toml"))
}

/// Load configuration from all sources with proper priority
///
/// CLI overrides are not handled here; apply [`ConfigOverrides`] after.
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed, or a
/// value is invalid. A missing config file is not an error.
pub fn load_config() -> Result<FeedConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<FeedConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration, reading environment variables through `env`
pub fn load_config_with_env(
    path: Option<PathBuf>,
    env: impl Fn(&str) -> Option<String>,
) -> Result<FeedConfig, ConfigError> {
    // Start with defaults
    let mut config = FeedConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: FeedToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config)?;
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Environment overrides file values
    apply_env_config(&mut config, env)?;
    config.validate()?;

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut FeedConfig, toml: &FeedToml) -> Result<(), ConfigError> {
    // Instance
    if let Some(ref url) = toml.instance.base_url {
        config.base_url = parse_url(url)?;
    }
    if toml.instance.access_token.is_some() {
        config.access_token.clone_from(&toml.instance.access_token);
    }
    if toml.instance.account_id.is_some() {
        config.account_id = toml.instance.account_id;
    }
    if let Some(ref visibility) = toml.instance.default_visibility {
        config.default_visibility = parse_visibility(visibility)?;
    }

    // Stream
    if let Some(ref transport) = toml.stream.transport {
        config.transport = parse_transport(transport)?;
    }
    if let Some(ref subscriptions) = toml.stream.subscriptions {
        config.subscriptions = parse_subscriptions(subscriptions)?;
    }
    if let Some(enabled) = toml.stream.heartbeat_enabled {
        config.heartbeat.enabled = enabled;
    }
    if let Some(secs) = toml.stream.stall_after_secs {
        config.heartbeat.stall_after = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.stream.handshake_timeout_secs {
        config.handshake_timeout = Duration::from_secs(secs);
    }
    if let Some(max) = toml.stream.max_payload {
        config.max_payload = max;
    }
    if let Some(reconnect) = toml.stream.reconnect {
        config.reconnect = reconnect;
    }

    // Display
    if let Some(ref policy) = toml.display.cw_policy {
        config.render.policy = parse_policy(policy)?;
    }
    if let Some(ref flag) = toml.display.sensitive_flag {
        config.render.sensitive_flag.clone_from(flag);
    }
    if let Some(width) = toml.display.wrap_width {
        config.render.wrap_width = width;
    }
    if let Some(strip) = toml.display.strip_newlines {
        config.strip_newlines = strip;
    }
    if let Some(hide) = toml.display.hide_mentions {
        config.filter.hide_mentions = hide;
    }
    if let Some(hide) = toml.display.hide_boosts {
        config.filter.hide_boosts = hide;
    }
    if let Some(hide) = toml.display.hide_favourites {
        config.filter.hide_favourites = hide;
    }
    if let Some(hide) = toml.display.hide_follows {
        config.filter.hide_follows = hide;
    }

    // Ledger
    if let Some(capacity) = toml.ledger.capacity {
        config.ledger_capacity = capacity;
    }

    Ok(())
}

/// Apply environment variable overrides to the config
fn apply_env_config(
    config: &mut FeedConfig,
    env: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(url) = env("FEED_BASE_URL") {
        config.base_url = parse_url(&url)?;
        config.source = ConfigSource::Env;
    }
    if let Some(token) = env("FEED_ACCESS_TOKEN") {
        config.access_token = Some(token);
        config.source = ConfigSource::Env;
    }
    if let Some(id) = env("FEED_ACCOUNT_ID") {
        if let Ok(id) = id.parse::<AccountId>() {
            config.account_id = Some(id);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(transport) = env("FEED_TRANSPORT") {
        config.transport = parse_transport(&transport)?;
        config.source = ConfigSource::Env;
    }
    if let Some(policy) = env("FEED_CW_POLICY") {
        config.render.policy = parse_policy(&policy)?;
        config.source = ConfigSource::Env;
    }
    if let Some(enabled) = env("FEED_HEARTBEAT") {
        config.heartbeat.enabled = enabled != "0" && enabled.to_lowercase() != "false";
        config.source = ConfigSource::Env;
    }
    if let Some(secs) = env("FEED_STALL_AFTER") {
        if let Ok(secs) = secs.parse::<u64>() {
            config.heartbeat.stall_after = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(capacity) = env("FEED_LEDGER_CAPACITY") {
        if let Ok(capacity) = capacity.parse::<usize>() {
            config.ledger_capacity = capacity;
            config.source = ConfigSource::Env;
        }
    }
    Ok(())
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Instance base URL override
    pub base_url: Option<Url>,

    /// Access token override
    pub access_token: Option<String>,

    /// Transport override
    pub transport: Option<StreamTransport>,

    /// Content warning policy override
    pub cw_policy: Option<ContentWarningPolicy>,

    /// Feeds added to the configured subscriptions
    pub subscriptions: Vec<Subscription>,

    /// Heartbeat enabled override
    pub heartbeat_enabled: Option<bool>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: Url) -> Self {
        self.base_url = Some(url);
        self
    }

    /// Set access token override
    #[must_use]
    pub fn with_access_token(mut self, token: String) -> Self {
        self.access_token = Some(token);
        self
    }

    /// Set transport override
    #[must_use]
    pub fn with_transport(mut self, transport: StreamTransport) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Set content warning policy override
    #[must_use]
    pub fn with_cw_policy(mut self, policy: ContentWarningPolicy) -> Self {
        self.cw_policy = Some(policy);
        self
    }

    /// Add a subscription
    #[must_use]
    pub fn with_subscription(mut self, subscription: Subscription) -> Self {
        self.subscriptions.push(subscription);
        self
    }

    /// Set heartbeat enabled override
    #[must_use]
    pub fn with_heartbeat_enabled(mut self, enabled: bool) -> Self {
        self.heartbeat_enabled = Some(enabled);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut FeedConfig) {
        if self.base_url.is_some()
            || self.access_token.is_some()
            || self.transport.is_some()
            || self.cw_policy.is_some()
            || !self.subscriptions.is_empty()
            || self.heartbeat_enabled.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.base_url = url.clone();
        }
        if let Some(ref token) = self.access_token {
            config.access_token = Some(token.clone());
        }
        if let Some(transport) = self.transport {
            config.transport = transport;
        }
        if let Some(policy) = self.cw_policy {
            config.render.policy = policy;
        }
        for subscription in &self.subscriptions {
            if !config.subscriptions.contains(subscription) {
                config.subscriptions.push(subscription.clone());
            }
        }
        if let Some(enabled) = self.heartbeat_enabled {
            config.heartbeat.enabled = enabled;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
