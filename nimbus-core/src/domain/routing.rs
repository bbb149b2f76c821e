//! Routing configuration snapshots.

use std::time::Duration;

use crate::domain::site::SharedSite;
use crate::error::ConfigError;
use crate::latency::SharedLatencyOracle;

/// Timing and SLA knobs of the router.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RouterSettings {
    /// Target latency in milliseconds.
    pub latency_sla: f64,
    /// Period between two dispatch ticks.
    pub batch_period: Duration,
    /// How long a tick waits for the sites to answer.
    pub site_response_timeout: Duration,
    /// Upper bound on how long a caller waits in `request`.
    pub max_request_period: Duration,
}

impl RouterSettings {
    /// Reject settings the router cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.latency_sla > 0.0) || !self.latency_sla.is_finite() {
            return Err(ConfigError::InvalidSetting {
                name: "latencySlaMs",
                reason: format!("expected a positive number, got {}", self.latency_sla),
            });
        }

        for (name, value) in [
            ("batchPeriodMs", self.batch_period),
            ("siteResponseTimeoutMs", self.site_response_timeout),
            ("maxRequestPeriodMs", self.max_request_period),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: "expected a positive duration".to_string(),
                });
            }
        }
        Ok(())
    }
}

/// An immutable routing snapshot: the sites, the oracle and the settings.
///
/// The router installs one of these per configuration and replaces it
/// wholesale on reconfiguration.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    sites: Vec<SharedSite>,
    oracle: SharedLatencyOracle,
    settings: RouterSettings,
}

impl RoutingTable {
    /// Assemble a snapshot, validating the settings.
    pub fn new(
        sites: Vec<SharedSite>,
        oracle: SharedLatencyOracle,
        settings: RouterSettings,
    ) -> Result<Self, ConfigError> {
        settings.validate()?;
        Ok(Self {
            sites,
            oracle,
            settings,
        })
    }

    /// Configured sites, in configuration order.
    pub fn sites(&self) -> &[SharedSite] {
        &self.sites
    }

    /// The latency oracle handed to every request.
    pub fn oracle(&self) -> &SharedLatencyOracle {
        &self.oracle
    }

    /// Timing and SLA settings.
    pub fn settings(&self) -> &RouterSettings {
        &self.settings
    }
}
