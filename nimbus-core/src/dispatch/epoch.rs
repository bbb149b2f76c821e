//! One configuration epoch of the router: its queue, scheduler and ticks.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{self, MissedTickBehavior};

use crate::domain::request::SharedRequest;
use crate::domain::routing::RoutingTable;
use crate::error::RouterError;

/// Queue and scheduler bookkeeping, guarded by the epoch lock.
#[derive(Debug, Default)]
struct DispatchState {
    /// Requests waiting for the next tick.
    pending: Vec<SharedRequest>,
    /// Requests of the tick currently waiting on sites.
    in_flight: Vec<SharedRequest>,
    /// The periodic tick task, started by the first request.
    scheduler: Option<JoinHandle<()>>,
    closed: bool,
}

/// A routing snapshot together with the dispatcher running it.
#[derive(Debug)]
pub(crate) struct Epoch {
    table: RoutingTable,
    state: Mutex<DispatchState>,
}

impl Epoch {
    pub(crate) fn new(table: RoutingTable) -> Arc<Self> {
        Arc::new(Self {
            table,
            state: Mutex::new(DispatchState::default()),
        })
    }

    pub(crate) fn table(&self) -> &RoutingTable {
        &self.table
    }

    /// Queue `request` for the next tick, starting the scheduler if needed.
    pub(crate) fn enqueue(self: &Arc<Self>, request: SharedRequest) -> Result<(), RouterError> {
        let mut state = self.state.lock();
        if state.closed {
            return Err(RouterError::Closed);
        }

        if state.scheduler.is_none() {
            tracing::debug!(
                period_ms = self.table.settings().batch_period.as_millis() as u64,
                "starting dispatch scheduler"
            );
            state.scheduler = Some(tokio::spawn(Arc::clone(self).run()));
        }
        state.pending.push(request);
        Ok(())
    }

    async fn run(self: Arc<Self>) {
        let mut interval = time::interval(self.table.settings().batch_period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            self.dispatch_tick().await;
        }
    }

    /// Send the queued requests to every site and release their callers.
    ///
    /// The queue is taken under the lock; the wait for the sites happens
    /// outside it so that new requests can keep queueing for the next tick.
    pub(crate) async fn dispatch_tick(&self) {
        let batch: Arc<[SharedRequest]> = {
            let mut state = self.state.lock();
            if state.closed || state.pending.is_empty() {
                return;
            }
            let batch = mem::take(&mut state.pending);
            state.in_flight = batch.clone();
            batch.into()
        };

        let settings = self.table.settings();
        tracing::debug!(users = batch.len(), sites = self.table.sites().len(), "dispatching batch");

        let mut tasks = JoinSet::new();
        for site in self.table.sites() {
            let site = Arc::clone(site);
            let batch = Arc::clone(&batch);
            tasks.spawn(async move { site.enquire(&batch).await });
        }

        if time::timeout(settings.site_response_timeout, drain(&mut tasks))
            .await
            .is_err()
        {
            tracing::warn!(
                outstanding = tasks.len(),
                timeout_ms = settings.site_response_timeout.as_millis() as u64,
                "sites did not answer before the batch timeout"
            );
            // Late answers still land on the requests, nobody waits for them.
            tasks.detach_all();
        }

        self.state.lock().in_flight.clear();
        for request in batch.iter() {
            request.release();
        }
    }

    /// Stop the scheduler, release every waiting caller and close the sites.
    pub(crate) fn close(&self) {
        let (scheduler, waiting) = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            let mut waiting = mem::take(&mut state.pending);
            waiting.append(&mut state.in_flight);
            (state.scheduler.take(), waiting)
        };

        if let Some(scheduler) = scheduler {
            scheduler.abort();
        }
        for request in &waiting {
            request.release();
        }
        for site in self.table.sites() {
            site.close();
        }
        self.table.oracle().close();

        tracing::info!(released = waiting.len(), "routing epoch closed");
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().closed
    }
}

async fn drain(tasks: &mut JoinSet<()>) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            if e.is_panic() {
                tracing::error!(error = %e, "site enquiry panicked");
            }
        }
    }
}
