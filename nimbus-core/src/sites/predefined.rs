//! A site with a scripted eligibility list, cost and response delay.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::request::SharedRequest;
use crate::domain::response::AdmissionResponse;
use crate::domain::site::{SharedSiteInfo, Site, SiteInfo};
use crate::error::ConfigError;

/// Answers every request from a fixed script.
///
/// Users in `eligible_users` (everyone when `None`) are admitted at `cost`;
/// the rest are refused. The answer is delayed by `enquiry_delay`, which is
/// how slow or hung sites are simulated.
#[derive(Debug)]
pub struct PredefinedCostSite {
    info: SharedSiteInfo,
    eligible_users: Option<HashSet<String>>,
    cost: f64,
    enquiry_delay: Duration,
}

impl PredefinedCostSite {
    /// Create a scripted site. `cost` must be non-negative.
    pub fn new(
        info: SiteInfo,
        eligible_users: Option<HashSet<String>>,
        cost: f64,
        enquiry_delay: Duration,
    ) -> Result<Self, ConfigError> {
        if !(cost >= 0.0) {
            return Err(ConfigError::InvalidSetting {
                name: "cost",
                reason: format!("site `{}` has cost {cost}, expected a non-negative number", info.name),
            });
        }

        Ok(Self {
            info: Arc::new(info),
            eligible_users,
            cost,
            enquiry_delay,
        })
    }

    fn is_eligible(&self, user_token: &str) -> bool {
        self.eligible_users
            .as_ref()
            .map_or(true, |users| users.contains(user_token))
    }
}

#[async_trait]
impl Site for PredefinedCostSite {
    fn info(&self) -> &SharedSiteInfo {
        &self.info
    }

    async fn enquire(&self, batch: &[SharedRequest]) {
        if !self.enquiry_delay.is_zero() {
            tokio::time::sleep(self.enquiry_delay).await;
        }

        for request in batch {
            let token = request.user_token();
            let response = if self.is_eligible(token) {
                match AdmissionResponse::new(token, true, self.cost, self.info.clone()) {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(site = %self.info.name, error = %e, "skipping response");
                        continue;
                    }
                }
            } else {
                AdmissionResponse::ineligible(token, self.info.clone())
            };
            request.record_response(response);
        }
    }
}
