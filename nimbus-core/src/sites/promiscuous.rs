//! A site that admits every user at zero cost.

use async_trait::async_trait;
use std::sync::Arc;

use crate::domain::request::SharedRequest;
use crate::domain::response::AdmissionResponse;
use crate::domain::site::{SharedSiteInfo, Site, SiteInfo};

/// Accepts everyone with cost `0` without contacting the cloud.
#[derive(Debug)]
pub struct PromiscuousSite {
    info: SharedSiteInfo,
}

impl PromiscuousSite {
    /// Wrap an already resolved site identity.
    pub fn new(info: SiteInfo) -> Self {
        Self {
            info: Arc::new(info),
        }
    }
}

#[async_trait]
impl Site for PromiscuousSite {
    fn info(&self) -> &SharedSiteInfo {
        &self.info
    }

    async fn enquire(&self, batch: &[SharedRequest]) {
        for request in batch {
            if let Ok(response) = AdmissionResponse::new(request.user_token(), true, 0.0, self.info.clone()) {
                request.record_response(response);
            }
        }
    }
}
