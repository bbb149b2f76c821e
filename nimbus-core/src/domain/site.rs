//! Cloud site models.
//!
//! A site is one admission controller plus one load balancer at a cloud
//! location. [`SiteInfo`] is its identity, shared by every response the site
//! produces; [`Site`] is the enquiry capability the dispatcher fans out to.

use std::collections::BTreeSet;
use std::fmt;
use std::net::{IpAddr, ToSocketAddrs};
use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use url::{Host, Url};

use crate::domain::request::SharedRequest;
use crate::error::ConfigError;

/// Descriptive metadata published by a site's admission controller.
///
/// Purely informational: it is returned to clients alongside a routing
/// decision and never takes part in eligibility or cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataCentre {
    /// Location code of the data centre, e.g. `eu-west-1`.
    pub location_code: String,
    /// Code of the cloud provider, e.g. `aws`.
    pub provider_code: String,
    /// Free-form tags such as jurisdictions or certifications.
    #[serde(default)]
    pub tags: BTreeSet<String>,
    /// Nominal cost of the data centre.
    pub cost: f64,
}

/// Identity of a configured site.
#[derive(Debug)]
pub struct SiteInfo {
    /// Human readable name, also used as the site code in responses.
    pub name: String,
    /// Base URL of the admission controller.
    pub admission_controller: String,
    /// Address users are redirected to.
    pub load_balancer: String,
    ip: IpAddr,
    definition: OnceLock<DataCentre>,
}

impl SiteInfo {
    /// Build a site identity, resolving the load balancer host to an IP.
    ///
    /// The scheme, port and path of the load balancer address are ignored for
    /// resolution. IP literals are used as they are.
    pub fn resolve(
        name: impl Into<String>,
        admission_controller: impl Into<String>,
        load_balancer: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let load_balancer = load_balancer.into();
        let host = bare_host(&name, &load_balancer)?;
        let ip = resolve_host(&name, &host)?;

        Ok(Self::with_ip(name, admission_controller, load_balancer, ip))
    }

    /// Build a site identity with an already known IP.
    pub fn with_ip(
        name: impl Into<String>,
        admission_controller: impl Into<String>,
        load_balancer: impl Into<String>,
        ip: IpAddr,
    ) -> Self {
        Self {
            name: name.into(),
            admission_controller: admission_controller.into(),
            load_balancer: load_balancer.into(),
            ip,
            definition: OnceLock::new(),
        }
    }

    /// The resolved IP of the load balancer.
    pub fn ip(&self) -> IpAddr {
        self.ip
    }

    /// The cached data centre definition, if one has been fetched.
    pub fn definition(&self) -> Option<&DataCentre> {
        self.definition.get()
    }

    /// Memoize the definition. Returns `false` if one was already cached.
    pub fn cache_definition(&self, definition: DataCentre) -> bool {
        self.definition.set(definition).is_ok()
    }
}

impl fmt::Display for SiteInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} / {})", self.name, self.load_balancer, self.ip)
    }
}

/// A thread-safe reference to a site identity.
pub type SharedSiteInfo = Arc<SiteInfo>;

/// The enquiry capability every site variant implements.
///
/// `enquire` is handed a non-empty batch and may record a response on any of
/// its requests. It must absorb its own failures: an unreachable site simply
/// records nothing for the round.
#[async_trait]
pub trait Site: fmt::Debug + Send + Sync {
    /// Identity shared with every response this site records.
    fn info(&self) -> &SharedSiteInfo;

    /// Ask the site about every request in `batch`.
    async fn enquire(&self, batch: &[SharedRequest]);

    /// Release held resources. Called once when the router epoch closes.
    fn close(&self) {}
}

/// A thread-safe reference to a site.
pub type SharedSite = Arc<dyn Site>;

fn bare_host(site: &str, address: &str) -> Result<String, ConfigError> {
    let with_scheme = if address.contains("://") {
        address.to_string()
    } else {
        format!("http://{address}")
    };

    let invalid = |reason: String| ConfigError::InvalidAddress {
        site: site.to_string(),
        address: address.to_string(),
        reason,
    };

    let url = Url::parse(&with_scheme).map_err(|e| invalid(e.to_string()))?;
    match url.host() {
        Some(Host::Domain(domain)) => Ok(domain.to_string()),
        Some(Host::Ipv4(ip)) => Ok(ip.to_string()),
        Some(Host::Ipv6(ip)) => Ok(ip.to_string()),
        None => Err(invalid("no host".to_string())),
    }
}

fn resolve_host(site: &str, host: &str) -> Result<IpAddr, ConfigError> {
    if let Ok(ip) = host.parse::<IpAddr>() {
        return Ok(ip);
    }

    let failed = |source| ConfigError::Resolve {
        site: site.to_string(),
        host: host.to_string(),
        source,
    };

    match (host, 0).to_socket_addrs() {
        Ok(mut addrs) => addrs.next().map(|addr| addr.ip()).ok_or_else(|| failed(None)),
        Err(e) => Err(failed(Some(e))),
    }
}
