//! Site selection logic

use std::net::IpAddr;

use crate::domain::response::AdmissionResponse;
use crate::domain::site::SharedSiteInfo;
use crate::latency::LatencyOracle;

/// Selects a site from cost-sorted viable responses.
///
/// The cheapest site whose latency is strictly below `latency_sla` wins. If no
/// site meets the SLA, the lowest latency site is returned, with ties going to
/// the cheaper one. Unknown latencies count as exactly the SLA.
pub fn select_site(
    viable: &[AdmissionResponse],
    source: IpAddr,
    latency_sla: f64,
    oracle: &dyn LatencyOracle,
) -> Option<SharedSiteInfo> {
    let mut selected: Option<(&SharedSiteInfo, f64)> = None;

    for response in viable {
        let site = response.site();
        let latency = match oracle.latency(source, site.ip()) {
            Some(ms) => ms,
            None => {
                tracing::warn!(
                    from = %source,
                    to = %site.ip(),
                    latency_sla,
                    "latency unknown, assuming the SLA"
                );
                latency_sla
            }
        };

        if latency < latency_sla {
            return Some(site.clone());
        }
        // Any latency, even infinite, beats having no candidate.
        if selected.map_or(true, |(_, best)| latency < best) {
            selected = Some((site, latency));
        }
    }

    selected.map(|(site, _)| site.clone())
}
