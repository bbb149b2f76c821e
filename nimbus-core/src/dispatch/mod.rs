//! The request router.
//!
//! Callers hand a [`UserRequest`] to [`Router::request`] and are suspended
//! until the dispatch tick carrying their request has heard from the sites
//! (or timed out). A tick fires every `batch_period`, takes the whole queue,
//! and enquires every site concurrently for at most `site_response_timeout`.
//!
//! The routing snapshot is swapped atomically on reconfiguration, the same
//! way the proxy hot-reloads its backends.

mod epoch;

use std::net::IpAddr;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use parking_lot::Mutex;
use tokio::time;

use crate::domain::request::{SharedRequest, UserRequest};
use crate::domain::response::RouteDecision;
use crate::domain::routing::{RouterSettings, RoutingTable};
use crate::error::RouterError;

use self::epoch::Epoch;

/// Batches user requests, fans them out to sites and picks a site per user.
#[derive(Debug, Default)]
pub struct Router {
    epoch: ArcSwapOption<Epoch>,
    /// Serializes `configure` and `close`.
    lifecycle: Mutex<()>,
}

impl Router {
    /// Create an unconfigured router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a router running `table`.
    pub fn with_table(table: RoutingTable) -> Self {
        let router = Self::new();
        router.configure(table);
        router
    }

    /// Install a new routing snapshot.
    ///
    /// The previous snapshot, if any, is closed: its scheduler stops, its
    /// waiting callers are released and its sites are closed. The scheduler
    /// of the new snapshot starts with the first request.
    pub fn configure(&self, table: RoutingTable) {
        let _guard = self.lifecycle.lock();

        let settings = *table.settings();
        let sites = table.sites().len();
        if let Some(previous) = self.epoch.swap(Some(Epoch::new(table))) {
            previous.close();
        }

        tracing::info!(
            sites,
            latency_sla_ms = settings.latency_sla,
            batch_period_ms = settings.batch_period.as_millis() as u64,
            "router configured"
        );
    }

    /// Whether a snapshot is installed and still open.
    pub fn is_configured(&self) -> bool {
        self.epoch.load().as_ref().is_some_and(|epoch| !epoch.is_closed())
    }

    /// Settings of the installed snapshot.
    pub fn settings(&self) -> Option<RouterSettings> {
        self.epoch.load().as_ref().map(|epoch| *epoch.table().settings())
    }

    /// Submit `request` and wait until its tick completes.
    ///
    /// The request is stamped with the SLA and latency oracle, queued, and
    /// the caller suspended until the router releases it or
    /// `max_request_period` elapses. Afterwards the request holds whatever
    /// responses arrived; run [`UserRequest::select_site`] on it.
    pub async fn request(&self, request: &SharedRequest) -> Result<(), RouterError> {
        let epoch = self.epoch.load_full().ok_or(RouterError::NotConfigured)?;
        let settings = *epoch.table().settings();

        if !request.bind(settings.latency_sla, Arc::clone(epoch.table().oracle())) {
            return Err(RouterError::AlreadySubmitted(request.user_token().to_string()));
        }
        epoch.enqueue(Arc::clone(request))?;

        if time::timeout(settings.max_request_period, request.released())
            .await
            .is_err()
        {
            tracing::warn!(
                user = %request.user_token(),
                waited_ms = settings.max_request_period.as_millis() as u64,
                processed = request.is_processed(),
                "request was not released in time"
            );
        }
        Ok(())
    }

    /// Route one user: submit a request, then select a site for it.
    pub async fn route(&self, source: IpAddr, user_token: impl Into<String>) -> Result<RouteDecision, RouterError> {
        let request = UserRequest::shared(source, user_token);
        self.request(&request).await?;
        Ok(request.decision()?)
    }

    /// Close the installed snapshot. Idempotent.
    ///
    /// Callers still waiting are released with whatever they have.
    pub fn close(&self) {
        let _guard = self.lifecycle.lock();
        if let Some(epoch) = self.epoch.load_full() {
            epoch.close();
        }
    }
}

impl Drop for Router {
    fn drop(&mut self) {
        if let Some(epoch) = self.epoch.swap(None) {
            epoch.close();
        }
    }
}
