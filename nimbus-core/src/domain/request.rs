//! Per-user request state.
//!
//! A [`UserRequest`] is a blackboard: the caller creates it with the user's
//! address and token, the router stamps it with the latency SLA and oracle,
//! and every site that answers writes its response onto it concurrently.
//! The caller reads it back once the router releases it.

use std::fmt;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::domain::response::{AdmissionResponse, RouteDecision};
use crate::domain::site::SharedSiteInfo;
use crate::error::SelectError;
use crate::latency::SharedLatencyOracle;
use crate::load_balancer::selector::select_site;

/// Mutable part of the blackboard, updated as one unit.
#[derive(Debug, Default)]
struct Board {
    /// Eligible responses, ascending by cost.
    viable: Vec<AdmissionResponse>,
    /// Set by the first response of any kind, never cleared.
    processed: bool,
}

/// Selection parameters stamped by the router.
#[derive(Debug)]
struct Binding {
    latency_sla: f64,
    oracle: SharedLatencyOracle,
}

/// A user's pending connection request.
pub struct UserRequest {
    ip: IpAddr,
    user_token: String,
    board: Mutex<Board>,
    binding: OnceLock<Binding>,
    released: AtomicBool,
    release: Notify,
}

impl UserRequest {
    /// Create a request for `user_token` connecting from `ip`.
    pub fn new(ip: IpAddr, user_token: impl Into<String>) -> Self {
        Self {
            ip,
            user_token: user_token.into(),
            board: Mutex::new(Board::default()),
            binding: OnceLock::new(),
            released: AtomicBool::new(false),
            release: Notify::new(),
        }
    }

    /// Create a request already wrapped for sharing with the router.
    pub fn shared(ip: IpAddr, user_token: impl Into<String>) -> SharedRequest {
        Arc::new(Self::new(ip, user_token))
    }

    /// Source address of the user.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// Opaque user identifier.
    pub fn user_token(&self) -> &str {
        &self.user_token
    }

    /// Record one site's response.
    ///
    /// Eligible responses are inserted after any existing entry of equal cost,
    /// keeping the viable list sorted. Ineligible ones are dropped. Either way
    /// the request becomes processed. Responses for another user are ignored
    /// and `false` is returned.
    pub fn record_response(&self, response: AdmissionResponse) -> bool {
        if response.user_token() != self.user_token {
            tracing::warn!(
                user = %self.user_token,
                other = %response.user_token(),
                site = %response.site().name,
                "discarding response addressed to another user"
            );
            return false;
        }

        tracing::debug!(
            user = %self.user_token,
            site = %response.site().name,
            eligible = response.is_eligible(),
            cost = response.cost(),
            "response received"
        );

        let mut board = self.board.lock();
        if response.is_eligible() {
            let cost = response.cost();
            let pos = board.viable.partition_point(|r| r.cost() <= cost);
            board.viable.insert(pos, response);
        }
        board.processed = true;
        true
    }

    /// Whether at least one site has answered.
    pub fn is_processed(&self) -> bool {
        self.board.lock().processed
    }

    /// Snapshot of the eligible responses, cheapest first.
    pub fn viable_responses(&self) -> Vec<AdmissionResponse> {
        self.board.lock().viable.clone()
    }

    /// Stamp the latency SLA (milliseconds) and oracle used by selection.
    ///
    /// Can only happen once; returns `false` if the request was already bound.
    pub fn bind(&self, latency_sla: f64, oracle: SharedLatencyOracle) -> bool {
        self.binding.set(Binding { latency_sla, oracle }).is_ok()
    }

    /// The bound latency SLA, if any.
    pub fn latency_sla(&self) -> Option<f64> {
        self.binding.get().map(|b| b.latency_sla)
    }

    /// Pick the site to redirect the user to.
    ///
    /// `Ok(None)` means no site is viable, either because every site refused
    /// or because none answered in time. [`is_processed`](Self::is_processed)
    /// tells the two apart.
    pub fn select_site(&self) -> Result<Option<SharedSiteInfo>, SelectError> {
        let binding = self
            .binding
            .get()
            .ok_or_else(|| SelectError::Unbound(self.user_token.clone()))?;

        let viable = self.viable_responses();
        let selected = select_site(&viable, self.ip, binding.latency_sla, binding.oracle.as_ref());

        match &selected {
            Some(site) => tracing::info!(user = %self.user_token, site = %site.name, "site selected"),
            None => tracing::info!(
                user = %self.user_token,
                processed = self.is_processed(),
                "no viable site"
            ),
        }
        Ok(selected)
    }

    /// Selection result in its client-facing form.
    pub fn decision(&self) -> Result<RouteDecision, SelectError> {
        let site = self.select_site()?;
        Ok(RouteDecision::new(site.as_deref(), self.is_processed()))
    }

    /// Whether the router has released the caller waiting on this request.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    pub(crate) fn release(&self) {
        self.released.store(true, Ordering::Release);
        self.release.notify_waiters();
    }

    /// Resolves once [`release`](Self::release) has been called.
    pub(crate) async fn released(&self) {
        loop {
            let notified = self.release.notified();
            if self.is_released() {
                return;
            }
            notified.await;
        }
    }
}

impl fmt::Debug for UserRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserRequest")
            .field("user", &self.user_token)
            .field("ip", &self.ip)
            .field("latency_sla", &self.latency_sla())
            .field("processed", &self.is_processed())
            .finish()
    }
}

/// A thread-safe reference to a request blackboard.
pub type SharedRequest = Arc<UserRequest>;
