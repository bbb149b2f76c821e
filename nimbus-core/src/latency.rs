//! Latency estimation between two network addresses.
//!
//! The router treats latency as an opaque oracle. Two implementations are
//! provided: a static lookup table and a memoizing wrapper for expensive
//! oracles (e.g. geolocation backed ones).

use std::collections::HashMap;
use std::fmt;
use std::net::IpAddr;
use std::sync::Arc;

use dashmap::DashMap;

/// Estimates round-trip latency in milliseconds. `None` means unknown.
pub trait LatencyOracle: fmt::Debug + Send + Sync {
    /// Latency between `from` and `to`, if known.
    fn latency(&self, from: IpAddr, to: IpAddr) -> Option<f64>;

    /// Release held resources. Called when the owning router epoch closes.
    fn close(&self) {}
}

/// A thread-safe reference to a latency oracle.
pub type SharedLatencyOracle = Arc<dyn LatencyOracle>;

/// A fixed table of measured latencies.
#[derive(Debug, Clone, Default)]
pub struct LookupLatency {
    table: HashMap<(IpAddr, IpAddr), f64>,
}

impl LookupLatency {
    /// Create an empty table. Every lookup is unknown.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, from: IpAddr, to: IpAddr, ms: f64) -> Self {
        self.insert(from, to, ms);
        self
    }

    /// Record the latency between two addresses.
    pub fn insert(&mut self, from: IpAddr, to: IpAddr, ms: f64) {
        self.table.insert((from, to), ms);
    }

    /// Number of recorded pairs.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

impl FromIterator<(IpAddr, IpAddr, f64)> for LookupLatency {
    fn from_iter<T: IntoIterator<Item = (IpAddr, IpAddr, f64)>>(iter: T) -> Self {
        let mut table = Self::new();
        for (from, to, ms) in iter {
            table.insert(from, to, ms);
        }
        table
    }
}

impl LatencyOracle for LookupLatency {
    fn latency(&self, from: IpAddr, to: IpAddr) -> Option<f64> {
        self.table
            .get(&(from, to))
            .copied()
            .filter(|ms| !ms.is_nan())
    }
}

/// Memoizes the answers of an inner oracle, unknowns included.
#[derive(Debug)]
pub struct CachedLatency<O> {
    inner: O,
    cache: DashMap<(IpAddr, IpAddr), Option<f64>>,
}

impl<O: LatencyOracle> CachedLatency<O> {
    /// Wrap `inner` with an empty cache.
    pub fn new(inner: O) -> Self {
        Self {
            inner,
            cache: DashMap::new(),
        }
    }

    /// Number of memoized pairs.
    pub fn cached_pairs(&self) -> usize {
        self.cache.len()
    }
}

impl<O: LatencyOracle> LatencyOracle for CachedLatency<O> {
    fn latency(&self, from: IpAddr, to: IpAddr) -> Option<f64> {
        if let Some(hit) = self.cache.get(&(from, to)) {
            return *hit.value();
        }

        let measured = self.inner.latency(from, to);
        self.cache.insert((from, to), measured);
        measured
    }

    fn close(&self) {
        self.cache.clear();
        self.inner.close();
    }
}
