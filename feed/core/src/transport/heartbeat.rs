//! Peer Liveness
//!
//! Every streaming connection records inbound activity (text frames, pings,
//! pongs, SSE chunks) on a shared [`Liveness`] indicator. The session owner
//! polls it to notice stalled streams.
//!
//! # Usage
//!
//! ```ignore
//! let liveness = Liveness::new();
//! let client = WebSocketClient::new(connector, endpoint, config, liveness.clone());
//!
//! // Owner side
//! if let ConnectionHealth::Stalled { idle } = liveness.health(&HeartbeatConfig::default()) {
//!     tracing::warn!(?idle, "Stream stalled");
//! }
//! ```

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Configuration for stall detection
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HeartbeatConfig {
    /// Silence after which a stream counts as stalled (default: 120 seconds)
    pub stall_after: Duration,
    /// Whether stall detection is enabled
    pub enabled: bool,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            stall_after: Duration::from_secs(120),
            enabled: true,
        }
    }
}

impl HeartbeatConfig {
    /// Create a config with stall detection disabled
    #[must_use]
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Default::default()
        }
    }

    /// Set the stall threshold
    #[must_use]
    pub fn with_stall_after(mut self, stall_after: Duration) -> Self {
        self.stall_after = stall_after;
        self
    }
}

/// Health of one connection as seen from its liveness record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionHealth {
    /// Activity seen within the threshold
    Healthy,
    /// No activity for `idle`
    Stalled {
        /// Time since the last activity
        idle: Duration,
    },
}

#[derive(Debug)]
struct LivenessInner {
    ponged: AtomicBool,
    last_activity: Mutex<Instant>,
}

/// Shared peer-liveness indicator
///
/// Cloning shares the same record. Written by the transport task, read by
/// the session owner.
#[derive(Clone, Debug)]
pub struct Liveness {
    inner: Arc<LivenessInner>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Create a record whose last activity is now
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(LivenessInner {
                ponged: AtomicBool::new(false),
                last_activity: Mutex::new(Instant::now()),
            }),
        }
    }

    /// Note inbound activity from the peer
    pub fn record_activity(&self) {
        *self.inner.last_activity.lock() = Instant::now();
    }

    /// Note a pong (or ping) from the peer
    pub fn record_pong(&self) {
        self.inner.ponged.store(true, Ordering::Release);
        self.record_activity();
    }

    /// Return whether a pong arrived since the last call, clearing the flag
    pub fn take_ponged(&self) -> bool {
        self.inner.ponged.swap(false, Ordering::AcqRel)
    }

    /// Time since the last recorded activity
    #[must_use]
    pub fn idle_for(&self) -> Duration {
        self.inner.last_activity.lock().elapsed()
    }

    /// Classify the connection against `config`
    #[must_use]
    pub fn health(&self, config: &HeartbeatConfig) -> ConnectionHealth {
        let idle = self.idle_for();
        if config.enabled && idle >= config.stall_after {
            ConnectionHealth::Stalled { idle }
        } else {
            ConnectionHealth::Healthy
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_ponged_clears_flag() {
        let liveness = Liveness::new();
        assert!(!liveness.take_ponged());

        liveness.record_pong();
        assert!(liveness.take_ponged());
        assert!(!liveness.take_ponged());
    }

    #[test]
    fn test_clones_share_state() {
        let liveness = Liveness::new();
        let other = liveness.clone();
        other.record_pong();
        assert!(liveness.take_ponged());
    }

    #[test]
    fn test_health_thresholds() {
        let liveness = Liveness::new();
        let config = HeartbeatConfig::default().with_stall_after(Duration::ZERO);
        assert!(matches!(
            liveness.health(&config),
            ConnectionHealth::Stalled { .. }
        ));

        assert_eq!(
            liveness.health(&HeartbeatConfig::default()),
            ConnectionHealth::Healthy
        );

        let disabled = HeartbeatConfig::disabled().with_stall_after(Duration::ZERO);
        assert_eq!(liveness.health(&disabled), ConnectionHealth::Healthy);
    }

    #[test]
    fn test_record_activity_resets_idle() {
        let liveness = Liveness::new();
        std::thread::sleep(Duration::from_millis(20));
        assert!(liveness.idle_for() >= Duration::from_millis(20));
        liveness.record_activity();
        assert!(liveness.idle_for() < Duration::from_millis(20));
    }
}
