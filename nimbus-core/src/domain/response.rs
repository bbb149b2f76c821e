//! Admission responses and routing decisions.

use serde::{Deserialize, Serialize};

use crate::domain::site::{DataCentre, SharedSiteInfo, SiteInfo};
use crate::error::AdmissionError;

/// One site's answer about one user.
///
/// Immutable once built. The cost is NaN whenever the user is not eligible.
#[derive(Debug, Clone)]
pub struct AdmissionResponse {
    user_token: String,
    eligible: bool,
    cost: f64,
    site: SharedSiteInfo,
}

impl AdmissionResponse {
    /// Build a response, validating the cost against the eligibility flag.
    ///
    /// Eligible responses need a non-negative cost. The cost of an ineligible
    /// response is discarded.
    pub fn new(
        user_token: impl Into<String>,
        eligible: bool,
        cost: f64,
        site: SharedSiteInfo,
    ) -> Result<Self, AdmissionError> {
        let user_token = user_token.into();
        if eligible && !(cost >= 0.0) {
            return Err(AdmissionError::InvalidCost {
                user: user_token,
                cost,
            });
        }

        Ok(Self {
            user_token,
            eligible,
            cost: if eligible { cost } else { f64::NAN },
            site,
        })
    }

    /// Shorthand for a refusal.
    pub fn ineligible(user_token: impl Into<String>, site: SharedSiteInfo) -> Self {
        Self {
            user_token: user_token.into(),
            eligible: false,
            cost: f64::NAN,
            site,
        }
    }

    /// Attach a wire verdict to the site that produced it.
    pub fn from_verdict(verdict: &AdmissionVerdict, site: SharedSiteInfo) -> Result<Self, AdmissionError> {
        let cost = verdict.cost_estimation.unwrap_or(f64::NAN);
        Self::new(verdict.user_token.clone(), verdict.eligible, cost, site)
    }

    /// The user this response is about.
    pub fn user_token(&self) -> &str {
        &self.user_token
    }

    /// Whether the site would admit the user.
    pub fn is_eligible(&self) -> bool {
        self.eligible
    }

    /// Estimated cost of serving the user. NaN when ineligible.
    pub fn cost(&self) -> f64 {
        self.cost
    }

    /// The site that produced this response.
    pub fn site(&self) -> &SharedSiteInfo {
        &self.site
    }
}

/// Wire form of one admission controller verdict.
///
/// A batch reply is an unordered JSON array of these. Ineligible verdicts
/// carry a `null` cost.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdmissionVerdict {
    /// User the verdict is about.
    pub user_token: String,
    /// Whether the user may be served by the site.
    pub eligible: bool,
    /// Cost estimate, `None` when not eligible.
    #[serde(default)]
    pub cost_estimation: Option<f64>,
}

/// The outcome of routing one user, as returned to entry point clients.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteDecision {
    /// Name of the selected site, `null` when none.
    pub selected_cloud_site_code: Option<String>,
    /// Load balancer address to redirect to, `null` when none.
    pub redirect_address: Option<String>,
    /// Metadata of the selected site, when it published one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub definition: Option<DataCentre>,
    /// Whether any site answered for this user before the caller was released.
    #[serde(skip)]
    pub processed: bool,
}

impl RouteDecision {
    /// Build a decision from the selector's output.
    pub fn new(site: Option<&SiteInfo>, processed: bool) -> Self {
        match site {
            Some(site) => Self {
                selected_cloud_site_code: Some(site.name.clone()),
                redirect_address: Some(site.load_balancer.clone()),
                definition: site.definition().cloned(),
                processed,
            },
            None => Self {
                processed,
                ..Self::default()
            },
        }
    }
}
