//! Credit grants (purchases) consumed by deployments.

use serde::{Deserialize, Serialize};

/// `deploys_included` value marking an unlimited grant.
pub const UNLIMITED_DEPLOYS: i64 = -1;

/// Upper bound on a single privileged test grant.
pub const MAX_TEST_GRANT: i64 = 10;

/// A credit grant owned by a user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Purchase {
    pub id: i64,
    pub user_id: String,
    pub plan_type: String,
    pub deploys_included: i64,
    pub deploys_used: i64,
    /// Amount paid in cents
    pub amount_paid: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<String>,
    pub is_active: bool,
}

impl Purchase {
    pub fn is_unlimited(&self) -> bool {
        self.deploys_included == UNLIMITED_DEPLOYS
    }

    pub fn is_expired(&self, now: &str) -> bool {
        self.expires_at
            .as_deref()
            .map(|expires| expires <= now)
            .unwrap_or(false)
    }

    /// Whether this grant can pay for another deployment at `now` (RFC 3339).
    pub fn is_eligible(&self, now: &str) -> bool {
        self.is_active
            && !self.is_expired(now)
            && (self.is_unlimited() || self.deploys_used < self.deploys_included)
    }
}

/// Data for inserting a new grant.
#[derive(Debug, Clone)]
pub struct NewPurchase {
    pub user_id: String,
    pub plan_type: String,
    pub deploys_included: i64,
    pub amount_paid: i64,
    pub expires_at: Option<String>,
}

/// Aggregated credit view for one user.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UserStats {
    pub total_deploys: i64,
    /// `-1` when an unlimited grant is held
    pub remaining_deploys: i64,
    pub has_unlimited: bool,
    /// True when no active paid grant exists
    pub is_free_tier: bool,
    pub purchases: Vec<Purchase>,
}

impl UserStats {
    /// Whether a new deployment may start.
    pub fn may_deploy(&self) -> bool {
        self.has_unlimited || self.remaining_deploys > 0
    }
}

/// Request body for the privileged test-credit grant.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreditsRequest {
    #[serde(default = "default_grant_amount")]
    pub amount: i64,
}

fn default_grant_amount() -> i64 {
    5
}

/// Response for a test-credit grant.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantCreditsResponse {
    pub granted: i64,
    pub remaining_deploys: i64,
}
