//! Credit API endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::errors::AppError;
use crate::models::{
    GrantCreditsRequest, GrantCreditsResponse, NewPurchase, UserStats, MAX_TEST_GRANT,
};
use crate::AppState;

/// GET /api/user/stats - Remaining credit and deployment count for the caller.
pub async fn get_user_stats(State(state): State<AppState>, user: UserId) -> ApiResult<UserStats> {
    success(state.repo.get_user_stats(user.as_str()).await?)
}

/// POST /api/credits/grant - Grant free test deploys to a privileged caller.
pub async fn grant_credits(
    State(state): State<AppState>,
    user: UserId,
    Json(request): Json<GrantCreditsRequest>,
) -> ApiResult<GrantCreditsResponse> {
    if !state.policy.is_privileged(user.as_str()) {
        tracing::warn!(user_id = %user.as_str(), "Refused test credit grant");
        return Err(AppError::Forbidden(
            "Test credits are restricted to privileged users".to_string(),
        ));
    }
    if request.amount < 1 {
        return Err(AppError::Validation(
            "Amount must be at least 1".to_string(),
        ));
    }

    let granted = request.amount.min(MAX_TEST_GRANT);
    state
        .repo
        .create_purchase(&NewPurchase {
            user_id: user.as_str().to_string(),
            plan_type: "test".to_string(),
            deploys_included: granted,
            amount_paid: 0,
            expires_at: None,
        })
        .await?;

    let stats = state.repo.get_user_stats(user.as_str()).await?;
    success(GrantCreditsResponse {
        granted,
        remaining_deploys: stats.remaining_deploys,
    })
}
