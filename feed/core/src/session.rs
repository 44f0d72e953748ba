//! Feed Session
//!
//! One [`FeedSession`] per logged-in account. It owns the subscriptions, the
//! reconciler and the command ledger, and is driven by a single task that
//! processes one input at a time:
//!
//! ```text
//!  SessionHandle ──commands──┐
//!  stream tasks ───events────┼──▶ FeedSession::run ──▶ FeedSink
//!  call tasks ────results────┘
//! ```
//!
//! Stream and call tasks only hold a [`SessionToken`]; once the session is
//! gone their results are dropped. The session ends when it is shut down,
//! when every handle is dropped, or when the home subscription fails.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::api::{self, ApiClient, ApiError, ApiRequest, ApiResponse};
use crate::commands::{repost_of, LedgerCommand, PostOptions};
use crate::config::{ConfigError, FeedConfig, StreamTransport};
use crate::decode::{parse_account, BodyFormatter, DecodeContext, DecodeError, EventDecoder};
use crate::events::{DomainEvent, RawEvent};
use crate::ledger::{split_commands, CommandLedger, CommandOrigin, HistorySide};
use crate::model::{Context, StatusId, Subscription};
use crate::timeline::{FeedSink, TimelineReconciler};
use crate::transport::{
    ConnectionHealth, Connector, Endpoint, Liveness, SseClient, TransportError, WebSocketClient,
    WebSocketHandle,
};

/// Depth of the session input queue
const INPUT_CAPACITY: usize = 256;

/// Depth of each subscription's event queue
const EVENT_CAPACITY: usize = 64;

/// Session failures
#[derive(Debug, Error)]
pub enum SessionError {
    /// Configuration unusable
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// A call the session cannot do without failed
    #[error("API call failed: {0}")]
    Api(#[from] ApiError),

    /// The home subscription failed
    #[error("home stream failed: {0}")]
    Transport(#[from] TransportError),

    /// A response could not be decoded
    #[error("unexpected response: {0}")]
    Decode(#[from] DecodeError),

    /// A streaming URL could not be built
    #[error("invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    /// The server closed a stream because the access token is no longer valid
    #[error("credentials rejected by the server, obtain a new access token")]
    CredentialsRejected,

    /// The session task has ended
    #[error("session closed")]
    Closed,
}

/// Which paged listing a `more` continues
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Listing {
    Statuses,
    Notifications,
}

/// Purpose of an outbound call, carried back with its result
#[derive(Debug)]
enum CallKind {
    VerifyCredentials,
    HomeTimeline,
    Notifications,
    More(Listing),
    FocalStatus,
    Context,
    /// Own-status lookup that precedes a new `delete`
    DeleteLookup(StatusId),
    Command {
        command: LedgerCommand,
        origin: CommandOrigin,
        /// Inverse recorded on success when not derivable from the command
        undo: Option<String>,
    },
}

impl CallKind {
    fn name(&self) -> &'static str {
        match self {
            Self::VerifyCredentials => "verify_credentials",
            Self::HomeTimeline => "home_timeline",
            Self::Notifications => "notifications",
            Self::More(_) => "more",
            Self::FocalStatus => "focal_status",
            Self::Context => "context",
            Self::DeleteLookup(_) => "delete_lookup",
            Self::Command { .. } => "command",
        }
    }
}

enum SessionInput {
    Command(String),
    Subscribe(Subscription),
    Unsubscribe(Subscription),
    Shutdown,
    Event {
        subscription: Subscription,
        generation: u64,
        event: RawEvent,
    },
    StreamEnded {
        subscription: Subscription,
        generation: u64,
        result: Result<(), TransportError>,
    },
    CallDone {
        kind: CallKind,
        result: Result<ApiResponse, ApiError>,
    },
}

/// Weak reference to a running session held by its spawned tasks
#[derive(Clone)]
pub struct SessionToken {
    tx: mpsc::WeakSender<SessionInput>,
}

impl SessionToken {
    /// Whether the session still accepts input
    #[must_use]
    pub fn is_alive(&self) -> bool {
        self.tx.upgrade().is_some_and(|tx| !tx.is_closed())
    }

    /// Deliver `input`; false once the session is gone
    async fn deliver(&self, input: SessionInput) -> bool {
        match self.tx.upgrade() {
            Some(tx) => tx.send(input).await.is_ok(),
            None => false,
        }
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionToken")
            .field("alive", &self.is_alive())
            .finish()
    }
}

/// Caller-side handle to a running session
#[derive(Clone)]
pub struct SessionHandle {
    tx: mpsc::Sender<SessionInput>,
}

impl SessionHandle {
    async fn send(&self, input: SessionInput) -> Result<(), SessionError> {
        self.tx.send(input).await.map_err(|_| SessionError::Closed)
    }

    /// Submit one line of user input
    pub async fn command(&self, line: impl Into<String>) -> Result<(), SessionError> {
        self.send(SessionInput::Command(line.into())).await
    }

    /// Open a stream for `subscription`
    pub async fn subscribe(&self, subscription: Subscription) -> Result<(), SessionError> {
        self.send(SessionInput::Subscribe(subscription)).await
    }

    /// Tear down the stream for `subscription`
    pub async fn unsubscribe(&self, subscription: Subscription) -> Result<(), SessionError> {
        self.send(SessionInput::Unsubscribe(subscription)).await
    }

    /// Stop the session
    pub async fn shutdown(&self) -> Result<(), SessionError> {
        self.send(SessionInput::Shutdown).await
    }

    /// Whether the session task has ended
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct ActiveSubscription {
    generation: u64,
    task: JoinHandle<()>,
    liveness: Liveness,
    // Keeps the WebSocket client running; dropping it closes the connection.
    _websocket: Option<WebSocketHandle>,
}

/// A live feed for one account
pub struct FeedSession {
    config: FeedConfig,
    api: Arc<dyn ApiClient>,
    connector: Arc<dyn Connector>,
    stream_http: reqwest::Client,
    sink: Box<dyn FeedSink>,

    rx: mpsc::Receiver<SessionInput>,
    weak_tx: mpsc::WeakSender<SessionInput>,

    decoder: EventDecoder,
    reconciler: TimelineReconciler,
    ledger: CommandLedger,
    post_options: PostOptions,

    subscriptions: HashMap<Subscription, ActiveSubscription>,
    next_generation: u64,
    more: Option<(Listing, String)>,
}

impl FeedSession {
    /// Create a session and its handle
    ///
    /// Nothing happens until [`run`](Self::run) is awaited.
    pub fn new(
        config: FeedConfig,
        api: Arc<dyn ApiClient>,
        connector: Arc<dyn Connector>,
        sink: Box<dyn FeedSink>,
    ) -> Result<(Self, SessionHandle), SessionError> {
        config.validate()?;
        config.require_access_token()?;

        let stream_http = reqwest::Client::builder()
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(ApiError::from)?;

        let (tx, rx) = mpsc::channel(INPUT_CAPACITY);
        let weak_tx = tx.downgrade();

        let decoder = EventDecoder::new(DecodeContext {
            own_account_id: config.account_id.unwrap_or_default(),
            render: config.render.clone(),
            ..DecodeContext::default()
        });
        let reconciler =
            TimelineReconciler::new(config.filter).with_strip_newlines(config.strip_newlines);
        let ledger = CommandLedger::new(config.ledger_capacity);

        let session = Self {
            config,
            api,
            connector,
            stream_http,
            sink,
            rx,
            weak_tx,
            decoder,
            reconciler,
            ledger,
            post_options: PostOptions::default(),
            subscriptions: HashMap::new(),
            next_generation: 0,
            more: None,
        };

        Ok((session, SessionHandle { tx }))
    }

    /// Use `formatter` to turn status HTML into text
    #[must_use]
    pub fn with_formatter(mut self, formatter: Arc<dyn BodyFormatter>) -> Self {
        let mut ctx = self.decoder.context().clone();
        ctx.formatter = formatter;
        self.decoder = EventDecoder::new(ctx);
        self
    }

    /// Token for tasks spawned on behalf of this session
    #[must_use]
    pub fn token(&self) -> SessionToken {
        SessionToken {
            tx: self.weak_tx.clone(),
        }
    }

    /// Run until shutdown, until every handle is dropped, or until the home
    /// subscription fails
    pub async fn run(mut self) -> Result<(), SessionError> {
        tracing::info!(instance = %self.config.base_url, "Starting feed session");
        self.spawn_call(
            CallKind::VerifyCredentials,
            ApiRequest::get(api::VERIFY_CREDENTIALS),
        );

        let period = (self.config.heartbeat.stall_after / 4).max(Duration::from_secs(1));
        let mut stall_check = tokio::time::interval(period);
        stall_check.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let heartbeat = self.config.heartbeat.enabled;

        let result = loop {
            let input = tokio::select! {
                input = self.rx.recv() => input,
                _ = stall_check.tick(), if heartbeat => {
                    self.check_stalls();
                    continue;
                }
            };

            let Some(input) = input else {
                tracing::debug!("All session handles dropped");
                break Ok(());
            };

            match self.handle_input(input) {
                Ok(true) => {}
                Ok(false) => break Ok(()),
                Err(err) => break Err(err),
            }
        };

        self.teardown();
        tracing::info!(ok = result.is_ok(), "Feed session ended");
        result
    }

    /// Process one input; `Ok(false)` ends the session
    fn handle_input(&mut self, input: SessionInput) -> Result<bool, SessionError> {
        match input {
            SessionInput::Command(line) => self.handle_line(&line),
            SessionInput::Subscribe(subscription) => self.subscribe_or_log(subscription),
            SessionInput::Unsubscribe(subscription) => self.unsubscribe(&subscription),
            SessionInput::Shutdown => return Ok(false),
            SessionInput::Event {
                subscription,
                generation,
                event,
            } => self.handle_event(&subscription, generation, &event),
            SessionInput::StreamEnded {
                subscription,
                generation,
                result,
            } => self.handle_stream_end(subscription, generation, result)?,
            SessionInput::CallDone { kind, result } => self.handle_call(kind, result)?,
        }
        Ok(true)
    }

    fn teardown(&mut self) {
        for (subscription, active) in self.subscriptions.drain() {
            tracing::debug!(%subscription, "Closing subscription");
            active.task.abort();
        }
    }

    // =========================================================================
    // Outbound calls
    // =========================================================================

    fn spawn_call(&self, kind: CallKind, request: ApiRequest) {
        let api = Arc::clone(&self.api);
        let token = self.token();
        let call_id = Uuid::new_v4();
        tracing::debug!(%call_id, kind = kind.name(), path = %request.path, "Issuing call");

        tokio::spawn(async move {
            let result = api.call(request).await;
            tracing::trace!(%call_id, ok = result.is_ok(), "Call finished");
            if !token.deliver(SessionInput::CallDone { kind, result }).await {
                tracing::debug!(%call_id, "Session gone, dropping call result");
            }
        });
    }

    fn handle_call(
        &mut self,
        kind: CallKind,
        result: Result<ApiResponse, ApiError>,
    ) -> Result<(), SessionError> {
        match kind {
            CallKind::VerifyCredentials => {
                let response = result?;
                let account = parse_account(&response.json().map_err(DecodeError::from)?)?;
                tracing::info!(account = %account.acct, "Credentials verified");
                self.decoder.set_own_account_id(account.id);
                self.config.account_id = Some(account.id);
                self.start_feeds()?;
            }
            CallKind::HomeTimeline => {
                let statuses = self.decode_listing(result, Listing::Statuses, |d, v| {
                    d.parse_statuses(v)
                });
                self.reconciler.set_timeline(statuses, self.sink.as_mut());
            }
            CallKind::Notifications => {
                let notifications = self.decode_listing(result, Listing::Notifications, |d, v| {
                    d.parse_notifications(v)
                });
                self.reconciler
                    .set_notifications(notifications, self.sink.as_mut());
            }
            CallKind::More(Listing::Statuses) => {
                let statuses = self.decode_listing(result, Listing::Statuses, |d, v| {
                    d.parse_statuses(v)
                });
                self.reconciler.show_page(statuses, self.sink.as_mut());
            }
            CallKind::More(Listing::Notifications) => {
                let notifications = self.decode_listing(result, Listing::Notifications, |d, v| {
                    d.parse_notifications(v)
                });
                self.reconciler
                    .show_notification_page(notifications, self.sink.as_mut());
            }
            CallKind::FocalStatus => {
                let status = match result.map_err(SessionError::from).and_then(|r| {
                    let value = r.json().map_err(DecodeError::from)?;
                    self.decoder.parse_status(&value).map_err(SessionError::from)
                }) {
                    Ok(status) => Some(status),
                    Err(err) => {
                        self.sink.log_line(&format!("Could not fetch status: {err}"));
                        None
                    }
                };
                self.reconciler.set_focal_status(status, self.sink.as_mut());
            }
            CallKind::Context => {
                let context = match result.map_err(SessionError::from).and_then(|r| {
                    let value = r.json().map_err(DecodeError::from)?;
                    self.decoder.parse_context(&value).map_err(SessionError::from)
                }) {
                    Ok(context) => context,
                    Err(err) => {
                        self.sink.log_line(&format!("Could not fetch context: {err}"));
                        Context::default()
                    }
                };
                self.reconciler.set_context(context, self.sink.as_mut());
            }
            CallKind::DeleteLookup(id) => self.finish_delete_lookup(id, result),
            CallKind::Command {
                command,
                origin,
                undo,
            } => self.finish_command(command, origin, undo, result),
        }
        Ok(())
    }

    /// Decode a listing; a failed fetch counts as empty
    fn decode_listing<T>(
        &mut self,
        result: Result<ApiResponse, ApiError>,
        listing: Listing,
        parse: impl Fn(&EventDecoder, &serde_json::Value) -> Result<Vec<T>, DecodeError>,
    ) -> Vec<T> {
        let decoded = result.map_err(SessionError::from).and_then(|response| {
            let items = parse(&self.decoder, &response.json().map_err(DecodeError::from)?)?;
            Ok((items, response.next_page()))
        });

        match decoded {
            Ok((items, next)) => {
                if let Some(url) = next {
                    self.more = Some((listing, url));
                }
                items
            }
            Err(err) => {
                tracing::warn!(?listing, error = %err, "Listing fetch failed, treating as empty");
                self.sink.log_line(&format!("Could not fetch {}: {err}", listing.name()));
                Vec::new()
            }
        }
    }

    fn start_feeds(&mut self) -> Result<(), SessionError> {
        self.reconciler.begin_initial();
        self.spawn_call(CallKind::HomeTimeline, ApiRequest::get(api::HOME_TIMELINE));
        self.spawn_call(CallKind::Notifications, ApiRequest::get(api::NOTIFICATIONS));

        self.subscribe(Subscription::Home)?;
        for subscription in self.config.subscriptions.clone() {
            self.subscribe_or_log(subscription);
        }
        Ok(())
    }

    fn subscribe_or_log(&mut self, subscription: Subscription) {
        let name = subscription.to_string();
        if let Err(err) = self.subscribe(subscription) {
            tracing::warn!(subscription = %name, error = %err, "Subscribe failed");
            self.sink.log_line(&format!("Cannot subscribe to {name}: {err}"));
        }
    }

    // =========================================================================
    // Subscriptions
    // =========================================================================

    fn subscribe(&mut self, subscription: Subscription) -> Result<(), SessionError> {
        if self.subscriptions.contains_key(&subscription) {
            self.sink
                .log_line(&format!("Already subscribed to {subscription}."));
            return Ok(());
        }

        self.next_generation += 1;
        let generation = self.next_generation;
        let liveness = Liveness::new();
        let token = self.token();
        let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

        let (stream, websocket) = match self.config.transport {
            StreamTransport::WebSocket => {
                let url = subscription.websocket_url(&self.config.base_url)?;
                let endpoint = Endpoint::from_url(&url)?;
                let (client, handle) = WebSocketClient::new(
                    Arc::clone(&self.connector),
                    endpoint,
                    self.config.websocket_config(),
                    liveness.clone(),
                );
                (client.run(events_tx).boxed(), Some(handle))
            }
            StreamTransport::Sse => {
                let url = subscription.sse_url(&self.config.base_url)?;
                let client = SseClient::new(
                    self.stream_http.clone(),
                    url,
                    self.config.access_token.clone().unwrap_or_default(),
                    liveness.clone(),
                );
                (client.run(events_tx).boxed(), None)
            }
        };

        tracing::info!(%subscription, transport = %self.config.transport, "Subscribing");
        let task = tokio::spawn(forward_stream(
            subscription.clone(),
            generation,
            stream,
            events_rx,
            token,
        ));

        self.subscriptions.insert(
            subscription,
            ActiveSubscription {
                generation,
                task,
                liveness,
                _websocket: websocket,
            },
        );
        Ok(())
    }

    fn unsubscribe(&mut self, subscription: &Subscription) {
        if subscription.is_primary() {
            self.sink.log_line("The home feed cannot be unsubscribed.");
            return;
        }
        match self.subscriptions.remove(subscription) {
            Some(active) => {
                active.task.abort();
                tracing::info!(%subscription, "Unsubscribed");
            }
            None => self
                .sink
                .log_line(&format!("Not subscribed to {subscription}.")),
        }
    }

    fn is_current(&self, subscription: &Subscription, generation: u64) -> bool {
        self.subscriptions
            .get(subscription)
            .is_some_and(|active| active.generation == generation)
    }

    fn handle_event(&mut self, subscription: &Subscription, generation: u64, event: &RawEvent) {
        if !self.is_current(subscription, generation) {
            return;
        }

        match self.decoder.decode(event, subscription) {
            Ok(DomainEvent::Update(status)) => {
                self.reconciler.stream_status(status, self.sink.as_mut());
            }
            Ok(DomainEvent::Notification(notification)) => {
                self.reconciler
                    .stream_notification(notification, self.sink.as_mut());
            }
            Ok(DomainEvent::Delete(id)) => {
                self.reconciler.stream_delete(id, self.sink.as_mut());
            }
            Err(err) => {
                tracing::warn!(%subscription, kind = %event.kind, error = %err, "Dropping undecodable event");
            }
        }
    }

    fn handle_stream_end(
        &mut self,
        subscription: Subscription,
        generation: u64,
        result: Result<(), TransportError>,
    ) -> Result<(), SessionError> {
        if !self.is_current(&subscription, generation) {
            return Ok(());
        }
        self.subscriptions.remove(&subscription);

        let err = match result {
            Ok(()) => TransportError::StreamClosed,
            Err(err) => err,
        };

        if err.is_credentials_rejected() {
            tracing::error!(%subscription, "Server rejected the access token");
            self.config.access_token = None;
            self.sink
                .log_line("Credentials rejected, obtain a new access token.");
            return Err(SessionError::CredentialsRejected);
        }

        if subscription.is_primary() {
            tracing::error!(error = %err, "Home stream failed");
            self.sink.log_line(&format!("Home stream failed: {err}"));
            return Err(SessionError::Transport(err));
        }

        tracing::warn!(%subscription, error = %err, "Stream failed");
        self.sink
            .log_line(&format!("Stream {subscription} closed: {err}"));
        Ok(())
    }

    fn check_stalls(&mut self) {
        let stalled: Vec<(Subscription, Duration)> = self
            .subscriptions
            .iter()
            .filter_map(
                |(subscription, active)| match active.liveness.health(&self.config.heartbeat) {
                    ConnectionHealth::Stalled { idle } => Some((subscription.clone(), idle)),
                    ConnectionHealth::Healthy => None,
                },
            )
            .collect();

        for (subscription, idle) in stalled {
            tracing::warn!(%subscription, idle_secs = idle.as_secs(), "Stream stalled, restarting");
            self.sink.log_line(&format!(
                "Stream {subscription} silent for {}s, reconnecting.",
                idle.as_secs()
            ));
            if let Some(active) = self.subscriptions.remove(&subscription) {
                active.task.abort();
            }
            self.subscribe_or_log(subscription);
        }
    }

    // =========================================================================
    // User input
    // =========================================================================

    fn handle_line(&mut self, line: &str) {
        let line = line.trim();
        let (verb, rest) = line
            .split_once(char::is_whitespace)
            .map_or((line, ""), |(verb, rest)| (verb, rest.trim()));

        match verb.to_ascii_lowercase().as_str() {
            "" => {}
            "undo" => self.replay(CommandOrigin::Undo),
            "redo" => self.replay(CommandOrigin::Redo),
            "history" => self.show_history(rest),
            "more" => self.more(),
            "context" => self.context(rest),
            "subscribe" => match Subscription::parse(rest) {
                Some(subscription) => self.subscribe_or_log(subscription),
                None => self.sink.log_line(&format!("Unknown feed: {rest}")),
            },
            "unsubscribe" => match Subscription::parse(rest) {
                Some(subscription) => self.unsubscribe(&subscription),
                None => self.sink.log_line(&format!("Unknown feed: {rest}")),
            },
            _ => self.execute(line, CommandOrigin::New),
        }
    }

    fn replay(&mut self, origin: CommandOrigin) {
        let mut commands = Vec::new();
        let mut collect = |command: &str, origin: CommandOrigin| {
            commands.push((command.to_string(), origin));
        };
        let result = match origin {
            CommandOrigin::Redo => self.ledger.redo(&mut collect),
            _ => self.ledger.undo(&mut collect),
        };

        if let Err(err) = result {
            self.sink.log_line(&err.to_string());
            return;
        }
        for (command, origin) in commands {
            self.execute(&command, origin);
        }
    }

    fn show_history(&mut self, arg: &str) {
        let side = match arg {
            "" => HistorySide::Redo,
            "undo" => HistorySide::Undo,
            _ => {
                self.sink
                    .log_line("History only takes the optional undo argument.");
                return;
            }
        };
        for line in self.ledger.history(side) {
            self.sink.log_line(&line.to_string());
        }
    }

    fn more(&mut self) {
        match self.more.take() {
            Some((listing, url)) => self.spawn_call(CallKind::More(listing), ApiRequest::get(url)),
            None => self.sink.log_line("There is nothing more to fetch."),
        }
    }

    fn context(&mut self, reference: &str) {
        let Some(id) = self.reconciler.recent().resolve(reference) else {
            self.sink
                .log_line(&format!("Cannot resolve status: {reference}"));
            return;
        };
        self.reconciler.begin_context();
        self.spawn_call(CallKind::FocalStatus, ApiRequest::get(api::status_path(id)));
        self.spawn_call(CallKind::Context, ApiRequest::get(api::context_path(id)));
    }

    /// Run one ledger command
    fn execute(&mut self, text: &str, origin: CommandOrigin) {
        let command = match LedgerCommand::parse(text, self.reconciler.recent()) {
            Ok(command) => command,
            Err(err) => {
                tracing::debug!(text, ?origin, error = %err, "Rejected command");
                self.sink.log_line(&err.to_string());
                return;
            }
        };

        if self.post_options.apply(&command) {
            tracing::debug!(%command, "Post options updated");
            return;
        }

        if let (LedgerCommand::Delete(id), CommandOrigin::New) = (&command, origin) {
            // The status is fetched first so the delete can be undone
            self.spawn_call(CallKind::DeleteLookup(*id), ApiRequest::get(api::status_path(*id)));
            return;
        }

        self.send_command(command, origin, None);
    }

    fn send_command(&mut self, command: LedgerCommand, origin: CommandOrigin, undo: Option<String>) {
        let options = match command {
            LedgerCommand::Post { .. } | LedgerCommand::Reply { .. } => self.post_options.take(),
            _ => PostOptions::default(),
        };
        let Some(request) = command.to_request(&options, self.config.default_visibility) else {
            return;
        };
        self.spawn_call(
            CallKind::Command {
                command,
                origin,
                undo,
            },
            request,
        );
    }

    fn finish_delete_lookup(&mut self, id: StatusId, result: Result<ApiResponse, ApiError>) {
        let status = result.map_err(SessionError::from).and_then(|response| {
            let value = response.json().map_err(DecodeError::from)?;
            self.decoder.parse_status(&value).map_err(SessionError::from)
        });

        match status {
            Ok(status) if Some(status.account.id) == self.config.account_id => {
                let undo = repost_of(&status, self.config.default_visibility);
                self.send_command(LedgerCommand::Delete(id), CommandOrigin::New, Some(undo));
            }
            Ok(_) => self
                .sink
                .log_line("You can only delete your own statuses."),
            Err(err) => self.sink.log_line(&format!("delete {id} failed: {err}")),
        }
    }

    fn finish_command(
        &mut self,
        command: LedgerCommand,
        origin: CommandOrigin,
        undo: Option<String>,
        result: Result<ApiResponse, ApiError>,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(%command, ?origin, error = %err, "Command failed");
                self.sink.log_line(&format!("{command} failed: {err}"));
                return;
            }
        };

        match &command {
            LedgerCommand::Post { .. } | LedgerCommand::Reply { .. } => {
                self.finish_post(&response, origin);
            }
            _ if origin == CommandOrigin::New => {
                let undo = undo.or_else(|| command.inverse().map(|inverse| inverse.to_string()));
                if let Some(undo) = undo {
                    self.ledger.record(command.to_string(), undo);
                }
            }
            _ => {}
        }

        tracing::debug!(%command, ?origin, "Command done");
    }

    /// Record a new post, or patch the ledger after a replayed one
    fn finish_post(&mut self, response: &ApiResponse, origin: CommandOrigin) {
        let status = match response
            .json()
            .map_err(DecodeError::from)
            .and_then(|value| self.decoder.parse_status(&value))
        {
            Ok(status) => status,
            Err(err) => {
                tracing::warn!(error = %err, "Posted, but the response was not a status");
                return;
            }
        };

        match origin {
            CommandOrigin::New => {
                let redo = repost_of(&status, self.config.default_visibility);
                self.ledger
                    .record(redo, LedgerCommand::Delete(status.id).to_string());
            }
            CommandOrigin::Undo | CommandOrigin::Redo => {
                let old = self
                    .ledger
                    .counterpart(origin)
                    .and_then(|entry| {
                        split_commands(entry)
                            .into_iter()
                            .find_map(LedgerCommand::delete_target)
                    });
                if let Some(old) = old {
                    let changed = self
                        .ledger
                        .rewrite_reference(&old.to_string(), &status.id.to_string());
                    tracing::debug!(old, new = status.id, changed, "Replayed post got a new id");
                }
            }
        }
    }
}

impl Listing {
    fn name(self) -> &'static str {
        match self {
            Self::Statuses => "timeline",
            Self::Notifications => "notifications",
        }
    }
}

/// Relay a stream's events to the session, then report how it ended
async fn forward_stream(
    subscription: Subscription,
    generation: u64,
    mut stream: BoxFuture<'static, Result<(), TransportError>>,
    mut events: mpsc::Receiver<RawEvent>,
    token: SessionToken,
) {
    let result = loop {
        tokio::select! {
            result = &mut stream => break result,
            Some(event) = events.recv() => {
                let input = SessionInput::Event {
                    subscription: subscription.clone(),
                    generation,
                    event,
                };
                if !token.deliver(input).await {
                    return;
                }
            }
        }
    };

    // Events decoded just before the stream ended are still delivered
    while let Ok(event) = events.try_recv() {
        let input = SessionInput::Event {
            subscription: subscription.clone(),
            generation,
            event,
        };
        if !token.deliver(input).await {
            return;
        }
    }

    token
        .deliver(SessionInput::StreamEnded {
            subscription,
            generation,
            result,
        })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::Method;
    use crate::events::StreamEventKind;
    use crate::model::Status;
    use crate::transport::frame::{self, Opcode};
    use crate::transport::BoxedStream;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    type Responder = Box<dyn Fn(&ApiRequest) -> Result<ApiResponse, ApiError> + Send + Sync>;

    struct ScriptedApi {
        requests: Mutex<Vec<ApiRequest>>,
        respond: Responder,
    }

    impl ScriptedApi {
        fn new(respond: Responder) -> Arc<Self> {
            Arc::new(Self {
                requests: Mutex::new(Vec::new()),
                respond,
            })
        }

        fn calls(&self) -> Vec<(Method, String)> {
            self.requests
                .lock()
                .iter()
                .map(|r| (r.method, r.path.clone()))
                .collect()
        }
    }

    #[async_trait]
    impl ApiClient for ScriptedApi {
        async fn call(&self, request: ApiRequest) -> Result<ApiResponse, ApiError> {
            let result = (self.respond)(&request);
            self.requests.lock().push(request);
            result
        }
    }

    /// Accepts the upgrade, sends `frames`, then stays open
    struct ScriptedConnector {
        frames: Vec<Vec<u8>>,
    }

    #[async_trait]
    impl Connector for ScriptedConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<BoxedStream, TransportError> {
            let (client, mut server) = tokio::io::duplex(64 * 1024);
            let frames = self.frames.clone();
            tokio::spawn(async move {
                let mut request = Vec::new();
                let mut buf = [0u8; 1024];
                while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                    match server.read(&mut buf).await {
                        Ok(0) | Err(_) => return,
                        Ok(n) => request.extend_from_slice(&buf[..n]),
                    }
                }
                let _ = server
                    .write_all(b"HTTP/1.1 101 Switching Protocols\r\nUpgrade: websocket\r\nConnection: Upgrade\r\n\r\n")
                    .await;
                for frame in frames {
                    let _ = server.write_all(&frame).await;
                }
                while matches!(server.read(&mut buf).await, Ok(n) if n > 0) {}
            });
            Ok(Box::new(client))
        }
    }

    struct RefusingConnector;

    #[async_trait]
    impl Connector for RefusingConnector {
        async fn connect(&self, _endpoint: &Endpoint) -> Result<BoxedStream, TransportError> {
            Err(TransportError::ConnectionFailed("refused".into()))
        }
    }

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<String>>>);

    impl FeedSink for SharedSink {
        fn show(&mut self, status: &Status, _slot: Option<u8>) {
            self.0.lock().push(format!("{}: {}", status.account.acct, status.text));
        }

        fn log_line(&mut self, line: &str) {
            self.0.lock().push(line.to_string());
        }
    }

    impl SharedSink {
        /// Resend `command` until `line` shows up
        async fn poll(&self, handle: &SessionHandle, command: &str, line: &str) {
            let found = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    handle.command(command).await.unwrap();
                    tokio::time::sleep(Duration::from_millis(20)).await;
                    if self.0.lock().iter().any(|l| l == line) {
                        return;
                    }
                }
            })
            .await;
            assert!(found.is_ok(), "never saw {line:?}, got {:?}", self.0.lock());
        }

        async fn wait_for(&self, line: &str) {
            let found = tokio::time::timeout(Duration::from_secs(5), async {
                loop {
                    if self.0.lock().iter().any(|l| l == line) {
                        return;
                    }
                    tokio::time::sleep(Duration::from_millis(5)).await;
                }
            })
            .await;
            assert!(found.is_ok(), "never saw {line:?}, got {:?}", self.0.lock());
        }

        fn lines(&self) -> Vec<String> {
            self.0.lock().clone()
        }
    }

    fn status_body(id: u64, acct_id: u64, created_at: &str, content: &str) -> String {
        serde_json::json!({
            "id": id.to_string(),
            "created_at": created_at,
            "account": { "id": acct_id.to_string(), "acct": format!("user{acct_id}"), "display_name": "" },
            "content": content,
            "visibility": "public"
        })
        .to_string()
    }

    fn base_api(extra: impl Fn(&ApiRequest) -> Option<ApiResponse> + Send + Sync + 'static) -> Arc<ScriptedApi> {
        ScriptedApi::new(Box::new(move |request| {
            if let Some(response) = extra(request) {
                return Ok(response);
            }
            let body = match request.path.as_str() {
                api::VERIFY_CREDENTIALS => r#"{"id":"1","acct":"me","display_name":"Me"}"#.to_string(),
                api::HOME_TIMELINE => format!(
                    "[{},{}]",
                    status_body(3, 2, "2024-01-01T00:00:03Z", "second"),
                    status_body(2, 2, "2024-01-01T00:00:01Z", "first")
                ),
                api::NOTIFICATIONS => "[]".to_string(),
                _ => "{}".to_string(),
            };
            Ok(ApiResponse::ok(body))
        }))
    }

    fn config() -> FeedConfig {
        let mut config = FeedConfig::default();
        config.access_token = Some("token".into());
        config.heartbeat.enabled = false;
        config
    }

    fn start(
        api: Arc<ScriptedApi>,
        connector: Arc<dyn Connector>,
    ) -> (SessionHandle, SharedSink, JoinHandle<Result<(), SessionError>>) {
        let sink = SharedSink::default();
        let (session, handle) =
            FeedSession::new(config(), api, connector, Box::new(sink.clone())).unwrap();
        (handle, sink, tokio::spawn(session.run()))
    }

    async fn wait_for_calls(api: &ScriptedApi, method: Method, count: usize) -> Vec<String> {
        for _ in 0..250 {
            let paths: Vec<String> = api
                .calls()
                .into_iter()
                .filter(|(m, _)| *m == method)
                .map(|(_, p)| p)
                .collect();
            if paths.len() >= count {
                return paths;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("expected {count} {method:?} calls, got {:?}", api.calls());
    }

    fn envelope(kind: StreamEventKind, payload: &str) -> Vec<u8> {
        let text = serde_json::json!({ "event": kind.as_str(), "payload": payload }).to_string();
        frame::encode(Opcode::Text, text.as_bytes())
    }

    #[tokio::test]
    async fn test_initial_merge_then_stream() {
        let update = status_body(9, 4, "2024-01-01T00:01:00Z", "live");
        let connector = Arc::new(ScriptedConnector {
            frames: vec![envelope(StreamEventKind::Update, &update)],
        });
        let (handle, sink, task) = start(base_api(|_| None), connector);

        sink.wait_for("user4: live").await;
        sink.wait_for("user2: second").await;
        let lines = sink.lines();
        let first = lines.iter().position(|l| l == "user2: first").unwrap();
        let second = lines.iter().position(|l| l == "user2: second").unwrap();
        assert!(first < second);

        handle.shutdown().await.unwrap();
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_symmetric_command_undo_redo() {
        let api = base_api(|_| None);
        let connector = Arc::new(ScriptedConnector { frames: Vec::new() });
        let (handle, sink, task) = start(Arc::clone(&api), connector);

        sink.wait_for("user2: second").await;
        handle.command("fav 2").await.unwrap();
        sink.poll(&handle, "history", "01 > fav 2").await;

        handle.command("undo").await.unwrap();
        handle.command("undo").await.unwrap();
        sink.wait_for("There is nothing to undo.").await;
        handle.command("redo").await.unwrap();
        handle.command("history undo").await.unwrap();
        sink.wait_for("01 > unfav 2").await;

        let actions = wait_for_calls(&api, Method::Post, 3).await;
        assert_eq!(
            actions,
            vec![
                "/api/v1/statuses/2/favourite",
                "/api/v1/statuses/2/unfavourite",
                "/api/v1/statuses/2/favourite"
            ]
        );

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_replayed_post_rewrites_ledger() {
        let next_id = Arc::new(AtomicU64::new(100));
        let ids = Arc::clone(&next_id);
        let api = base_api(move |request| {
            (request.method == Method::Post && request.path == api::STATUSES).then(|| {
                let id = ids.fetch_add(1, Ordering::SeqCst);
                ApiResponse::ok(status_body(id, 1, "2024-01-01T00:02:00Z", "hello"))
            })
        });
        let connector = Arc::new(ScriptedConnector { frames: Vec::new() });
        let (handle, sink, task) = start(Arc::clone(&api), connector);

        sink.wait_for("user2: second").await;
        handle.command("visibility unlisted").await.unwrap();
        handle.command("post hello").await.unwrap();
        sink.poll(&handle, "history undo", "01 > delete 100").await;

        handle.command("undo").await.unwrap();
        handle.command("redo").await.unwrap();
        sink.poll(&handle, "history undo", "01 > delete 101").await;
        sink.poll(&handle, "history", "01 > post hello").await;

        let deletes = wait_for_calls(&api, Method::Delete, 1).await;
        assert_eq!(deletes, vec!["/api/v1/statuses/100"]);
        let posts = api
            .calls()
            .iter()
            .filter(|(m, p)| *m == Method::Post && p == api::STATUSES)
            .count();
        assert_eq!(posts, 2);
        assert_eq!(next_id.load(Ordering::SeqCst), 102);

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_unknown_command_reported() {
        let connector = Arc::new(ScriptedConnector { frames: Vec::new() });
        let (handle, sink, task) = start(base_api(|_| None), connector);

        handle.command("frobnicate").await.unwrap();
        sink.wait_for("unknown command: frobnicate").await;
        handle.command("more").await.unwrap();
        sink.wait_for("There is nothing more to fetch.").await;
        handle.command("unsubscribe home").await.unwrap();
        sink.wait_for("The home feed cannot be unsubscribed.").await;

        handle.shutdown().await.unwrap();
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_home_stream_failure_ends_session() {
        let (_handle, sink, task) = start(base_api(|_| None), Arc::new(RefusingConnector));

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Transport(TransportError::ConnectionFailed(_)))
        ));
        assert!(sink.lines().iter().any(|l| l.starts_with("Home stream failed")));
    }

    #[tokio::test]
    async fn test_close_while_connected_rejects_credentials() {
        let connector = Arc::new(ScriptedConnector {
            frames: vec![vec![0x88, 0x00]],
        });
        let (_handle, sink, task) = start(base_api(|_| None), connector);

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(SessionError::CredentialsRejected)));
        assert!(sink
            .lines()
            .iter()
            .any(|l| l == "Credentials rejected, obtain a new access token."));
        assert!(!sink.lines().iter().any(|l| l.starts_with("Home stream failed")));
    }

    #[tokio::test]
    async fn test_credentials_failure_ends_session() {
        let api = ScriptedApi::new(Box::new(|_| {
            Err(ApiError::Status {
                status: 401,
                message: "The access token is invalid".into(),
            })
        }));
        let connector = Arc::new(ScriptedConnector { frames: Vec::new() });
        let (_handle, _sink, task) = start(api, connector);

        let result = task.await.unwrap();
        assert!(matches!(
            result,
            Err(SessionError::Api(ApiError::Status { status: 401, .. }))
        ));
    }

    #[tokio::test]
    async fn test_dropping_handles_ends_session() {
        let connector = Arc::new(ScriptedConnector { frames: Vec::new() });
        let (handle, sink, task) = start(base_api(|_| None), connector);
        sink.wait_for("user2: second").await;

        drop(handle);
        assert!(task.await.unwrap().is_ok());
    }

    #[test]
    fn test_missing_token_rejected() {
        let api = base_api(|_| None);
        let result = FeedSession::new(
            FeedConfig::default(),
            api,
            Arc::new(RefusingConnector),
            Box::new(SharedSink::default()),
        );
        assert!(matches!(result, Err(SessionError::Config(_))));
    }
}
