//! Timeline Reconciler
//!
//! Linearizes the initial bulk fetch and the live stream into one ordered
//! sequence shown to the user once.
//!
//! # Initial Merge
//!
//! The home timeline and the notifications are fetched concurrently and may
//! complete in either order. Each completion stores its list and sets a flag;
//! the merge runs once both flags are set:
//!
//! 1. timeline statuses are inserted by `created_at` (stable for ties)
//! 2. notifications are converted to statuses and inserted the same way,
//!    skipping any older than the earliest entry already present
//! 3. the sequence is shown oldest first, then lists and flags are cleared
//!
//! # Streaming
//!
//! Streamed statuses skip the merge and go straight through the
//! [`SeenGate`]. Streamed notifications honour the per-kind hide filters.
//!
//! # Thread Context
//!
//! A focal status and its `/context` are fetched concurrently; once both
//! arrive, ancestors, the focal status and descendants are shown in order.

pub mod gate;

use crate::model::{Account, Context, Notification, NotificationKind, Status, StatusId};

pub use gate::{RecentLog, SeenGate, RECENT_LOG_LEN};

/// Presentation sink
///
/// Receives one call per item, in emission order.
pub trait FeedSink: Send {
    /// Show a status; `slot` is its recent-log number when it has an id
    fn show(&mut self, status: &Status, slot: Option<u8>);

    /// Show an informational line
    fn log_line(&mut self, line: &str);
}

/// Which streamed notification kinds to hide
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NotificationFilter {
    /// Hide mentions
    pub hide_mentions: bool,
    /// Hide boosts of the local account's statuses
    pub hide_boosts: bool,
    /// Hide favourites of the local account's statuses
    pub hide_favourites: bool,
    /// Hide new followers
    pub hide_follows: bool,
}

impl NotificationFilter {
    /// Whether notifications of `kind` are shown
    #[must_use]
    pub fn shows(&self, kind: NotificationKind) -> bool {
        match kind {
            NotificationKind::Mention => !self.hide_mentions,
            NotificationKind::Reblog => !self.hide_boosts,
            NotificationKind::Favourite => !self.hide_favourites,
            NotificationKind::Follow => !self.hide_follows,
        }
    }
}

/// Turn a notification into the status the user sees
///
/// The status is attributed to the notifying account.
#[must_use]
pub fn notification_to_status(notification: Notification) -> Status {
    let account = notification.account.unwrap_or_else(|| Account {
        id: 0,
        acct: "anon".to_string(),
        display_name: "Unknown".to_string(),
    });

    let mut status = notification.status.unwrap_or_else(|| Status {
        created_at: notification.created_at,
        ..Status::default()
    });

    status.text = match notification.kind {
        NotificationKind::Mention => std::mem::take(&mut status.text),
        NotificationKind::Reblog => format!("boosted your status: {}", status.text),
        NotificationKind::Favourite => format!("favourited your status: {}", status.text),
        NotificationKind::Follow => format!("[{}] followed you", account.display()),
    };
    status.account = account;
    status
}

/// Insert keeping `created_at` order; equal times keep insertion order
fn insert_sorted(output: &mut Vec<Status>, status: Status) {
    let at = output.partition_point(|s| s.created_at <= status.created_at);
    output.insert(at, status);
}

/// Merges bulk fetches and streamed events into what the user sees
#[derive(Debug, Default)]
pub struct TimelineReconciler {
    have_timeline: bool,
    have_notifications: bool,
    timeline: Vec<Status>,
    notifications: Vec<Notification>,

    have_status: bool,
    have_context: bool,
    focal: Option<Status>,
    context: Context,

    seen: SeenGate,
    recent: RecentLog,
    filter: NotificationFilter,
    strip_newlines: bool,
}

impl TimelineReconciler {
    /// Create a reconciler with the given notification filter
    #[must_use]
    pub fn new(filter: NotificationFilter) -> Self {
        Self {
            filter,
            ..Default::default()
        }
    }

    /// Replace newlines in shown text with spaces
    #[must_use]
    pub fn with_strip_newlines(mut self, strip: bool) -> Self {
        self.strip_newlines = strip;
        self
    }

    /// Recently shown statuses
    #[must_use]
    pub fn recent(&self) -> &RecentLog {
        &self.recent
    }

    /// Whether an initial merge is still waiting for one of its lists
    #[must_use]
    pub fn is_pending(&self) -> bool {
        self.have_timeline != self.have_notifications
    }

    /// Start a fresh initial merge
    pub fn begin_initial(&mut self) {
        self.have_timeline = false;
        self.have_notifications = false;
        self.timeline.clear();
        self.notifications.clear();
    }

    /// Store the fetched home timeline and merge if notifications are in
    pub fn set_timeline(&mut self, statuses: Vec<Status>, sink: &mut dyn FeedSink) -> bool {
        self.timeline = statuses;
        self.have_timeline = true;
        self.flush_timeline(sink)
    }

    /// Store the fetched notifications and merge if the timeline is in
    pub fn set_notifications(
        &mut self,
        notifications: Vec<Notification>,
        sink: &mut dyn FeedSink,
    ) -> bool {
        self.notifications = notifications;
        self.have_notifications = true;
        self.flush_timeline(sink)
    }

    /// Run the initial merge if both lists have arrived
    ///
    /// Returns whether the merge ran.
    fn flush_timeline(&mut self, sink: &mut dyn FeedSink) -> bool {
        if !(self.have_timeline && self.have_notifications) {
            return false;
        }

        let mut output = Vec::with_capacity(self.timeline.len() + self.notifications.len());
        for status in self.timeline.drain(..) {
            insert_sorted(&mut output, status);
        }

        let mut skipped = 0usize;
        for notification in self.notifications.drain(..) {
            let status = notification_to_status(notification);
            if output
                .first()
                .is_some_and(|earliest| status.created_at < earliest.created_at)
            {
                skipped += 1;
                continue;
            }
            insert_sorted(&mut output, status);
        }

        tracing::debug!(
            shown = output.len(),
            skipped,
            "Merged initial timeline and notifications"
        );

        for status in output {
            self.show(status, sink);
        }

        self.have_timeline = false;
        self.have_notifications = false;
        true
    }

    /// Show a streamed status
    pub fn stream_status(&mut self, status: Status, sink: &mut dyn FeedSink) {
        self.show(status, sink);
    }

    /// Show a streamed notification unless its kind is hidden
    pub fn stream_notification(&mut self, notification: Notification, sink: &mut dyn FeedSink) {
        if !self.filter.shows(notification.kind) {
            tracing::trace!(kind = ?notification.kind, "Notification hidden by filter");
            return;
        }
        self.show(notification_to_status(notification), sink);
    }

    /// Handle a streamed deletion
    ///
    /// Only statuses the user saw recently produce a notice.
    pub fn stream_delete(&mut self, id: StatusId, sink: &mut dyn FeedSink) {
        if let Some(slot) = self.recent.forget(id) {
            sink.log_line(&format!("Status {slot:02x} was deleted."));
        }
    }

    /// Show a fetched page of statuses, oldest first
    pub fn show_page(&mut self, statuses: Vec<Status>, sink: &mut dyn FeedSink) {
        let mut output = Vec::with_capacity(statuses.len());
        for status in statuses {
            insert_sorted(&mut output, status);
        }
        for status in output {
            self.show(status, sink);
        }
    }

    /// Show a fetched page of notifications, oldest first, honouring the filter
    pub fn show_notification_page(
        &mut self,
        notifications: Vec<Notification>,
        sink: &mut dyn FeedSink,
    ) {
        let statuses = notifications
            .into_iter()
            .filter(|n| self.filter.shows(n.kind))
            .map(notification_to_status)
            .collect();
        self.show_page(statuses, sink);
    }

    /// Start waiting for a focal status and its context
    pub fn begin_context(&mut self) {
        self.have_status = false;
        self.have_context = false;
        self.focal = None;
        self.context = Context::default();
    }

    /// Store the focal status (`None` if it could not be fetched)
    pub fn set_focal_status(&mut self, status: Option<Status>, sink: &mut dyn FeedSink) -> bool {
        self.focal = status;
        self.have_status = true;
        self.flush_context(sink)
    }

    /// Store the thread context
    pub fn set_context(&mut self, context: Context, sink: &mut dyn FeedSink) -> bool {
        self.context = context;
        self.have_context = true;
        self.flush_context(sink)
    }

    fn flush_context(&mut self, sink: &mut dyn FeedSink) -> bool {
        if !(self.have_status && self.have_context) {
            return false;
        }

        let context = std::mem::take(&mut self.context);
        let focal = self.focal.take();

        for status in context
            .ancestors
            .into_iter()
            .chain(focal)
            .chain(context.descendants)
        {
            self.emit(status, sink);
        }

        self.have_status = false;
        self.have_context = false;
        true
    }

    /// Show through the duplicate gate
    fn show(&mut self, status: Status, sink: &mut dyn FeedSink) {
        if !self.seen.admit(status.id) {
            tracing::trace!(id = status.id, "Suppressed repeated status");
            return;
        }
        self.emit(status, sink);
    }

    fn emit(&mut self, mut status: Status, sink: &mut dyn FeedSink) {
        if self.strip_newlines {
            status.text = status.text.replace('\n', " ");
        }
        let slot = self.recent.record(status.id);
        sink.show(&status, slot);
    }
}
