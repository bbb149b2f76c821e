//! Error types surfaced by the core.
//!
//! Only configuration and lifecycle problems become errors. Failures while
//! talking to a site are absorbed by the site itself and never show up here.

use std::path::PathBuf;

/// Raised while building sites or installing a router configuration.
///
/// A configuration that fails with one of these is never installed.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The load balancer host of a site could not be resolved to an IP.
    #[error("cannot resolve load balancer host `{host}` of site `{site}`")]
    Resolve {
        /// Display name of the site.
        site: String,
        /// The bare host name that failed to resolve.
        host: String,
        /// Underlying resolver error, if any.
        #[source]
        source: Option<std::io::Error>,
    },

    /// An address in the site list is not usable.
    #[error("invalid address `{address}` for site `{site}`: {reason}")]
    InvalidAddress {
        /// Display name of the site.
        site: String,
        /// The offending address.
        address: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A numeric setting is out of range.
    #[error("invalid setting `{name}`: {reason}")]
    InvalidSetting {
        /// Setting key as it appears in the configuration file.
        name: &'static str,
        /// What is wrong with it.
        reason: String,
    },

    /// The configuration file could not be read.
    #[error("cannot read configuration file {path}")]
    Io {
        /// Path that was being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration document is malformed.
    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    /// The HTTP client backing a remote site could not be built.
    #[error("cannot build HTTP client for site `{site}`")]
    Client {
        /// Display name of the site.
        site: String,
        /// Underlying client error.
        #[source]
        source: reqwest::Error,
    },
}

/// Lifecycle errors returned by [`Router::request`](crate::dispatch::Router::request).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RouterError {
    /// `configure` has not been called yet.
    #[error("router is not configured")]
    NotConfigured,

    /// The configuration epoch the request was submitted to has been closed.
    #[error("router is closed")]
    Closed,

    /// The request object was already handed to a router.
    #[error("request for user `{0}` was already submitted")]
    AlreadySubmitted(String),

    /// Selection failed after the request was served.
    #[error(transparent)]
    Select(#[from] SelectError),
}

/// Raised when a selection is attempted on a request the router never stamped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SelectError {
    /// The latency SLA and oracle have not been set on the request.
    #[error("request for user `{0}` has no latency SLA or oracle bound")]
    Unbound(String),
}

/// Raised when constructing an admission response with an inconsistent cost.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AdmissionError {
    /// An eligible response carried a negative or NaN cost.
    #[error("eligible response for user `{user}` has invalid cost {cost}")]
    InvalidCost {
        /// User token of the response.
        user: String,
        /// The rejected cost value.
        cost: f64,
    },
}
