//! The admission-control side of the enquiry protocol.
//!
//! An [`AdmissionController`] fronts one site. It combines an eligibility
//! oracle and a cost oracle into [`AdmissionVerdict`]s, which are what a
//! [`RemoteSite`](crate::sites::RemoteSite) receives over the wire.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::domain::response::AdmissionVerdict;
use crate::domain::site::DataCentre;

/// Path prefix of the admission-control service.
pub const AC_PATH: &str = "admission-control";
/// Batch enquiry endpoint, below [`AC_PATH`].
pub const AC_SERVICE_PATH: &str = "service";
/// Data centre definition endpoint, below [`AC_PATH`].
pub const AC_DEFINITION_PATH: &str = "definition";
/// Repeated query parameter carrying the user tokens of a batch.
pub const USER_TOKENS_PARAM: &str = "userTokens";

/// Cost reported by a site asking the entry point to back off.
///
/// The site still admits the user, but only as a last resort.
pub const BACK_OFF_COST: f64 = f64::MAX;

/// Decides which users a data centre may serve.
pub trait EligibilityOracle: fmt::Debug + Send + Sync {
    /// Whether `user_token` may be served by `data_centre`.
    fn is_eligible(&self, user_token: &str, data_centre: &DataCentre) -> bool;

    /// Whether the site wants the entry point to avoid it for now.
    fn back_off(&self) -> bool {
        false
    }
}

/// Estimates the cost of serving one more user.
pub trait CostOracle: fmt::Debug + Send + Sync {
    /// Non-negative cost per user.
    fn cost_per_user(&self) -> f64;
}

/// Admits every user.
#[derive(Debug, Default, Clone, Copy)]
pub struct AdmitAll;

impl EligibilityOracle for AdmitAll {
    fn is_eligible(&self, _user_token: &str, _data_centre: &DataCentre) -> bool {
        true
    }
}

/// Admits a fixed set of users, optionally asking for back-off.
#[derive(Debug, Default, Clone)]
pub struct AllowList {
    users: HashSet<String>,
    back_off: bool,
}

impl AllowList {
    /// Admit exactly `users`.
    pub fn new<I, S>(users: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            users: users.into_iter().map(Into::into).collect(),
            back_off: false,
        }
    }

    /// Ask the entry point to back off.
    pub fn backing_off(mut self) -> Self {
        self.back_off = true;
        self
    }
}

impl EligibilityOracle for AllowList {
    fn is_eligible(&self, user_token: &str, _data_centre: &DataCentre) -> bool {
        self.users.contains(user_token)
    }

    fn back_off(&self) -> bool {
        self.back_off
    }
}

/// A constant cost per user.
#[derive(Debug, Clone, Copy)]
pub struct FixedCost(pub f64);

impl CostOracle for FixedCost {
    fn cost_per_user(&self) -> f64 {
        self.0
    }
}

/// Produces verdicts for one site.
#[derive(Debug, Clone)]
pub struct AdmissionController {
    eligibility: Arc<dyn EligibilityOracle>,
    cost: Arc<dyn CostOracle>,
    definition: DataCentre,
}

impl AdmissionController {
    /// Combine the oracles of the site described by `definition`.
    pub fn new(
        eligibility: Arc<dyn EligibilityOracle>,
        cost: Arc<dyn CostOracle>,
        definition: DataCentre,
    ) -> Self {
        Self {
            eligibility,
            cost,
            definition,
        }
    }

    /// The site's published definition.
    pub fn definition(&self) -> &DataCentre {
        &self.definition
    }

    /// One verdict per token, in the order given.
    pub fn enquire<S: AsRef<str>>(&self, user_tokens: &[S]) -> Vec<AdmissionVerdict> {
        user_tokens.iter().map(|t| self.respond(t.as_ref())).collect()
    }

    /// The verdict for a single user.
    pub fn respond(&self, user_token: &str) -> AdmissionVerdict {
        let refuse = || AdmissionVerdict {
            user_token: user_token.to_string(),
            eligible: false,
            cost_estimation: None,
        };

        if !self.eligibility.is_eligible(user_token, &self.definition) {
            return refuse();
        }

        let cost = if self.eligibility.back_off() {
            BACK_OFF_COST
        } else {
            self.cost.cost_per_user()
        };

        if !(cost >= 0.0) {
            tracing::warn!(user = user_token, cost, "cost oracle returned an invalid cost, refusing");
            return refuse();
        }

        AdmissionVerdict {
            user_token: user_token.to_string(),
            eligible: true,
            cost_estimation: Some(cost),
        }
    }
}
