//! Reconnection policy for remote sites.
//!
//! A site is either connected or disconnected since some instant. While
//! disconnected, calls are suppressed until the reconnection interval has
//! passed; then one attempt is let through and its outcome decides the
//! next state.

use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Reachability of a remote site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    /// The last call succeeded (or none has been made yet).
    Connected,
    /// The last call failed at `since`.
    Disconnected {
        /// When the failure was observed.
        since: Instant,
    },
}

/// Connected / disconnected-with-cooldown gate in front of outbound calls.
#[derive(Debug)]
pub struct CircuitBreaker {
    state: Mutex<LinkState>,
    reconnection_interval: Duration,
}

impl CircuitBreaker {
    /// Start connected, waiting `reconnection_interval` after each failure.
    pub fn new(reconnection_interval: Duration) -> Self {
        Self {
            state: Mutex::new(LinkState::Connected),
            reconnection_interval,
        }
    }

    /// Current state.
    pub fn state(&self) -> LinkState {
        *self.state.lock()
    }

    /// Whether a call may be attempted now.
    ///
    /// This does not change the state; only the outcome of the call does.
    pub fn try_connection(&self) -> bool {
        match *self.state.lock() {
            LinkState::Connected => true,
            LinkState::Disconnected { since } => since.elapsed() >= self.reconnection_interval,
        }
    }

    /// Mark the site reachable. Returns `true` if it was disconnected.
    pub fn record_success(&self) -> bool {
        let previous = std::mem::replace(&mut *self.state.lock(), LinkState::Connected);
        matches!(previous, LinkState::Disconnected { .. })
    }

    /// Mark the site unreachable as of now.
    pub fn record_failure(&self) {
        *self.state.lock() = LinkState::Disconnected { since: Instant::now() };
    }
}
