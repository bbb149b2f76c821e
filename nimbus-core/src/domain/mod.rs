//! Domain models: sites, requests, responses and routing snapshots.

pub mod request;
pub mod response;
pub mod routing;
pub mod site;
