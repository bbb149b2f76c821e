//! Site variants.
//!
//! Each variant implements [`Site`](crate::domain::site::Site):
//! - [`PromiscuousSite`] admits everyone at no cost and talks to nobody.
//! - [`PredefinedCostSite`] answers from a fixed eligibility list and cost,
//!   optionally after a delay.
//! - [`RemoteSite`] asks a real admission controller over HTTP, guarded by a
//!   [`CircuitBreaker`].

pub mod circuit;
pub mod predefined;
pub mod promiscuous;
pub mod remote;

pub use circuit::{CircuitBreaker, LinkState};
pub use predefined::PredefinedCostSite;
pub use promiscuous::PromiscuousSite;
pub use remote::{RemoteSite, RemoteSiteSettings};
