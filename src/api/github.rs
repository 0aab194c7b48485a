//! GitHub connection API endpoints.

use axum::{
    extract::{Path, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::errors::AppError;
use crate::models::{ConnectionStatus, GithubConnection, RepoExistence, SaveConnectionRequest};
use crate::AppState;

/// GET /api/github/status - Whether the caller has a connected account.
pub async fn github_status(
    State(state): State<AppState>,
    user: UserId,
) -> ApiResult<ConnectionStatus> {
    let status = match state.repo.get_github_connection(user.as_str()).await? {
        Some(connection) => ConnectionStatus {
            connected: true,
            username: Some(connection.github_username),
            avatar_url: connection.github_avatar_url,
        },
        None => ConnectionStatus {
            connected: false,
            username: None,
            avatar_url: None,
        },
    };
    success(status)
}

/// PUT /api/github/connection - Store or replace the caller's connection.
pub async fn save_connection(
    State(state): State<AppState>,
    user: UserId,
    Json(request): Json<SaveConnectionRequest>,
) -> ApiResult<GithubConnection> {
    if request.access_token.trim().is_empty() {
        return Err(AppError::Validation("accessToken is required".to_string()));
    }
    if request.github_username.trim().is_empty() {
        return Err(AppError::Validation(
            "githubUsername is required".to_string(),
        ));
    }

    success(
        state
            .repo
            .save_github_connection(user.as_str(), &request)
            .await?,
    )
}

/// DELETE /api/github/connection - Disconnect the caller's account.
pub async fn delete_connection(
    State(state): State<AppState>,
    user: UserId,
) -> ApiResult<ConnectionStatus> {
    state.repo.delete_github_connection(user.as_str()).await?;
    success(ConnectionStatus {
        connected: false,
        username: None,
        avatar_url: None,
    })
}

/// GET /api/github/repos/:name - Whether the caller already owns a repository for this name.
pub async fn probe_repo(
    State(state): State<AppState>,
    user: UserId,
    Path(name): Path<String>,
) -> ApiResult<RepoExistence> {
    let credential = state.repo.resolve_credential(user.as_str()).await?;
    success(state.deployer.synchronizer().probe(&credential, &name).await?)
}
