//! Nimbus Core functionality.
//!
//! This crate contains the domain models, site variants, selection logic and
//! the batching router that power the Nimbus multi-cloud entry point.
//!
//! A [`Router`] owns a [`RoutingTable`] of [`Site`]s. Each caller submits a
//! [`UserRequest`]; every `batch_period` the router sends all queued requests
//! to every site at once, waits at most `site_response_timeout`, then
//! releases the callers, who pick the cheapest site meeting the latency SLA.

pub mod admission;
pub mod config;
pub mod dispatch;
pub mod domain;
pub mod error;
pub mod latency;
pub mod load_balancer;
pub mod sites;

pub use dispatch::Router;
pub use domain::request::{SharedRequest, UserRequest};
pub use domain::response::{AdmissionResponse, AdmissionVerdict, RouteDecision};
pub use domain::routing::{RouterSettings, RoutingTable};
pub use domain::site::{DataCentre, SharedSite, SharedSiteInfo, Site, SiteInfo};
pub use error::{AdmissionError, ConfigError, RouterError, SelectError};
pub use latency::{LatencyOracle, SharedLatencyOracle};
