//! Stored GitHub credentials, one row per user.

use serde::{Deserialize, Serialize};

/// A user's connected GitHub account.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GithubConnection {
    pub user_id: String,
    pub github_user_id: String,
    pub github_username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub github_avatar_url: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Request body for connecting (or reconnecting) a GitHub account.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveConnectionRequest {
    pub github_user_id: String,
    pub github_username: String,
    #[serde(default)]
    pub github_avatar_url: Option<String>,
    pub access_token: String,
}

/// Connection status reported to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub connected: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Opaque credential for the remote repository API.
#[derive(Clone)]
pub struct Credential {
    pub token: String,
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential").field("token", &"<redacted>").finish()
    }
}

/// Result of probing for an existing repository.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoExistence {
    pub exists: bool,
    pub repo_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}
