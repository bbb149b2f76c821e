//! A site backed by a remote admission controller.
//!
//! One HTTP call per batch carries every user token; the reply is matched
//! back to requests by token. Failures flip the circuit breaker and record
//! nothing, so the site drops out of selection until it can be reached again.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use crate::admission::{AC_DEFINITION_PATH, AC_PATH, AC_SERVICE_PATH, USER_TOKENS_PARAM};
use crate::domain::request::SharedRequest;
use crate::domain::response::{AdmissionResponse, AdmissionVerdict};
use crate::domain::site::{DataCentre, SharedSiteInfo, Site, SiteInfo};
use crate::error::ConfigError;
use crate::sites::circuit::{CircuitBreaker, LinkState};

/// Network settings of a remote site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteSiteSettings {
    /// Connect and read timeout of each HTTP call.
    pub connect_timeout: Duration,
    /// How long to leave the site alone after a failed call.
    pub reconnection_interval: Duration,
}

impl Default for RemoteSiteSettings {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            reconnection_interval: Duration::from_secs(10),
        }
    }
}

/// A site that enquires a remote admission controller over HTTP.
#[derive(Debug)]
pub struct RemoteSite {
    info: SharedSiteInfo,
    client: reqwest::Client,
    service_url: Url,
    definition_url: Url,
    breaker: CircuitBreaker,
    closed: AtomicBool,
}

impl RemoteSite {
    /// Create a remote site talking to `info.admission_controller`.
    pub fn new(info: SiteInfo, settings: RemoteSiteSettings) -> Result<Self, ConfigError> {
        for (name, value) in [
            ("connectTimeoutMs", settings.connect_timeout),
            ("reconnectionIntervalMs", settings.reconnection_interval),
        ] {
            if value.is_zero() {
                return Err(ConfigError::InvalidSetting {
                    name,
                    reason: format!("site `{}` needs a positive duration", info.name),
                });
            }
        }

        let invalid = |reason: String| ConfigError::InvalidAddress {
            site: info.name.clone(),
            address: info.admission_controller.clone(),
            reason,
        };
        let base = Url::parse(&info.admission_controller).map_err(|e| invalid(e.to_string()))?;
        let service_url = endpoint(&base, &[AC_PATH, AC_SERVICE_PATH])
            .ok_or_else(|| invalid("cannot be used as a base URL".to_string()))?;
        let definition_url = endpoint(&base, &[AC_PATH, AC_DEFINITION_PATH])
            .ok_or_else(|| invalid("cannot be used as a base URL".to_string()))?;

        let client = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout)
            .timeout(settings.connect_timeout)
            .build()
            .map_err(|source| ConfigError::Client {
                site: info.name.clone(),
                source,
            })?;

        Ok(Self {
            info: Arc::new(info),
            client,
            service_url,
            definition_url,
            breaker: CircuitBreaker::new(settings.reconnection_interval),
            closed: AtomicBool::new(false),
        })
    }

    /// Current reachability of the site.
    pub fn link_state(&self) -> LinkState {
        self.breaker.state()
    }

    async fn fetch_verdicts(&self, batch: &[SharedRequest]) -> Result<Vec<AdmissionVerdict>, reqwest::Error> {
        let query: Vec<(&str, &str)> = batch
            .iter()
            .map(|r| (USER_TOKENS_PARAM, r.user_token()))
            .collect();

        self.client
            .get(self.service_url.clone())
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    async fn fetch_definition(&self) -> Result<DataCentre, reqwest::Error> {
        self.client
            .get(self.definition_url.clone())
            .send()
            .await?
            .error_for_status()?
            .json()
            .await
    }

    /// Fetch the data centre definition the first time the site is reached.
    async fn refresh_definition(&self) {
        if self.info.definition().is_some() {
            return;
        }
        match self.fetch_definition().await {
            Ok(definition) => {
                tracing::info!(site = %self.info.name, location = %definition.location_code, "site definition fetched");
                self.info.cache_definition(definition);
            }
            Err(e) => {
                tracing::debug!(site = %self.info.name, error = %e, "site definition unavailable");
            }
        }
    }

    fn apply(&self, batch: &[SharedRequest], verdicts: &[AdmissionVerdict]) {
        let mut by_token: HashMap<&str, &AdmissionVerdict> = HashMap::with_capacity(verdicts.len());
        for verdict in verdicts {
            by_token.entry(verdict.user_token.as_str()).or_insert(verdict);
        }

        for request in batch {
            let Some(verdict) = by_token.get(request.user_token()) else {
                continue;
            };
            match AdmissionResponse::from_verdict(verdict, self.info.clone()) {
                Ok(response) => {
                    request.record_response(response);
                }
                Err(e) => {
                    tracing::warn!(site = %self.info.name, error = %e, "dropping malformed verdict");
                }
            }
        }
    }
}

#[async_trait]
impl Site for RemoteSite {
    fn info(&self) -> &SharedSiteInfo {
        &self.info
    }

    async fn enquire(&self, batch: &[SharedRequest]) {
        if batch.is_empty() || self.closed.load(Ordering::Acquire) {
            return;
        }
        if !self.breaker.try_connection() {
            tracing::debug!(site = %self.info.name, users = batch.len(), "site presumed down, skipping batch");
            return;
        }

        match self.fetch_verdicts(batch).await {
            Ok(verdicts) => {
                if self.breaker.record_success() {
                    tracing::info!(site = %self.info.name, "site reachable again");
                }
                tracing::debug!(site = %self.info.name, verdicts = verdicts.len(), "site reached");
                // Verdicts first: the definition is metadata and may be slow.
                self.apply(batch, &verdicts);
                self.refresh_definition().await;
            }
            Err(e) => {
                tracing::error!(
                    site = %self.info.name,
                    url = %self.service_url,
                    users = batch.len(),
                    error = %e,
                    "site has become unreachable"
                );
                self.breaker.record_failure();
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }
}

fn endpoint(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    url.path_segments_mut().ok()?.pop_if_empty().extend(segments);
    url.set_query(None);
    Some(url)
}
