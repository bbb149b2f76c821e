//! File configuration.
//!
//! A single JSON document describes the router settings, the sites and an
//! optional static latency table:
//!
//! ```json
//! {
//!   "latencySlaMs": 40,
//!   "batchPeriodMs": 100,
//!   "siteResponseTimeoutMs": 2000,
//!   "maxRequestPeriodMs": 5000,
//!   "sites": [
//!     { "name": "AWS1", "admissionController": "http://10.0.0.1:8081",
//!       "loadBalancer": "http://10.0.0.1", "kind": { "type": "remote" } },
//!     { "name": "LOCAL", "admissionController": "-", "loadBalancer": "127.0.0.1",
//!       "kind": { "type": "predefined", "cost": 3.5, "eligibleUsers": ["u1"] } }
//!   ],
//!   "latencies": [ { "source": "203.0.113.7", "site": "10.0.0.1", "ms": 21.5 } ]
//! }
//! ```

use std::collections::HashSet;
use std::net::IpAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;

use crate::domain::routing::{RouterSettings, RoutingTable};
use crate::domain::site::{SharedSite, SiteInfo};
use crate::error::ConfigError;
use crate::latency::{CachedLatency, LookupLatency, SharedLatencyOracle};
use crate::sites::{PredefinedCostSite, PromiscuousSite, RemoteSite, RemoteSiteSettings};

fn default_connect_timeout_ms() -> u64 {
    3_000
}

fn default_reconnection_interval_ms() -> u64 {
    10_000
}

/// How a configured site answers enquiries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum SiteKind {
    /// Admits everyone at zero cost.
    Promiscuous,
    /// Scripted eligibility, cost and delay.
    #[serde(rename_all = "camelCase")]
    Predefined {
        /// Eligible users; everyone when absent.
        #[serde(default)]
        eligible_users: Option<Vec<String>>,
        /// Cost reported for eligible users.
        cost: f64,
        /// Delay before answering, in milliseconds.
        #[serde(default)]
        enquiry_delay_ms: u64,
    },
    /// A real admission controller reached over HTTP.
    #[serde(rename_all = "camelCase")]
    Remote {
        /// Connect and read timeout, in milliseconds.
        #[serde(default = "default_connect_timeout_ms")]
        connect_timeout_ms: u64,
        /// Wait after a failure before retrying, in milliseconds.
        #[serde(default = "default_reconnection_interval_ms")]
        reconnection_interval_ms: u64,
    },
}

impl Default for SiteKind {
    fn default() -> Self {
        Self::Remote {
            connect_timeout_ms: default_connect_timeout_ms(),
            reconnection_interval_ms: default_reconnection_interval_ms(),
        }
    }
}

/// One entry of the site list.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SiteSpec {
    /// Display name, unique within the list.
    pub name: String,
    /// Base URL of the admission controller.
    pub admission_controller: String,
    /// Address users are redirected to.
    pub load_balancer: String,
    /// Site variant; a remote site when omitted.
    #[serde(default)]
    pub kind: SiteKind,
}

impl SiteSpec {
    /// Resolve the site and build its variant.
    pub fn build(&self) -> Result<SharedSite, ConfigError> {
        let info = SiteInfo::resolve(&self.name, &self.admission_controller, &self.load_balancer)?;

        let site: SharedSite = match &self.kind {
            SiteKind::Promiscuous => Arc::new(PromiscuousSite::new(info)),
            SiteKind::Predefined {
                eligible_users,
                cost,
                enquiry_delay_ms,
            } => Arc::new(PredefinedCostSite::new(
                info,
                eligible_users
                    .as_ref()
                    .map(|users| users.iter().cloned().collect::<HashSet<_>>()),
                *cost,
                Duration::from_millis(*enquiry_delay_ms),
            )?),
            SiteKind::Remote {
                connect_timeout_ms,
                reconnection_interval_ms,
            } => Arc::new(RemoteSite::new(
                info,
                RemoteSiteSettings {
                    connect_timeout: Duration::from_millis(*connect_timeout_ms),
                    reconnection_interval: Duration::from_millis(*reconnection_interval_ms),
                },
            )?),
        };
        Ok(site)
    }
}

/// A measured latency between a client address and a site address.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
pub struct LatencyEntry {
    /// Client address.
    pub source: IpAddr,
    /// Site (load balancer) address.
    pub site: IpAddr,
    /// Round-trip latency in milliseconds.
    pub ms: f64,
}

/// The routing part of the configuration file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoutingConfig {
    /// Target latency in milliseconds.
    pub latency_sla_ms: f64,
    /// Period between dispatch ticks, in milliseconds.
    pub batch_period_ms: u64,
    /// How long a tick waits for the sites, in milliseconds.
    pub site_response_timeout_ms: u64,
    /// How long a caller may wait, in milliseconds.
    pub max_request_period_ms: u64,
    /// The sites to route to.
    pub sites: Vec<SiteSpec>,
    /// Static latency table. Pairs not listed are unknown.
    #[serde(default)]
    pub latencies: Vec<LatencyEntry>,
}

impl RoutingConfig {
    /// Parse a configuration document.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Read and parse a configuration file.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    /// Timing and SLA settings, validated.
    pub fn settings(&self) -> Result<RouterSettings, ConfigError> {
        let settings = RouterSettings {
            latency_sla: self.latency_sla_ms,
            batch_period: Duration::from_millis(self.batch_period_ms),
            site_response_timeout: Duration::from_millis(self.site_response_timeout_ms),
            max_request_period: Duration::from_millis(self.max_request_period_ms),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Build every site. Fails on the first site that cannot be built.
    pub fn build_sites(&self) -> Result<Vec<SharedSite>, ConfigError> {
        let mut names = HashSet::new();
        for spec in &self.sites {
            if !names.insert(spec.name.as_str()) {
                return Err(ConfigError::InvalidSetting {
                    name: "sites",
                    reason: format!("duplicate site name `{}`", spec.name),
                });
            }
        }

        self.sites.iter().map(SiteSpec::build).collect()
    }

    /// The static latency table, memoized.
    pub fn latency_oracle(&self) -> SharedLatencyOracle {
        let table: LookupLatency = self
            .latencies
            .iter()
            .map(|entry| (entry.source, entry.site, entry.ms))
            .collect();
        Arc::new(CachedLatency::new(table))
    }

    /// Build the complete routing snapshot.
    ///
    /// Nothing is returned unless every site resolved and every setting is
    /// valid, so a failed build never disturbs a running router.
    pub fn build_table(&self) -> Result<RoutingTable, ConfigError> {
        let settings = self.settings()?;
        let sites = self.build_sites()?;
        RoutingTable::new(sites, self.latency_oracle(), settings)
    }
}
