//! Deployment ledger rows and the deploy request/response types.

use serde::Serialize;

use super::Visibility;

/// Lifecycle of a deployment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DeploymentStatus {
    Pending,
    Success,
    Failed,
}

impl DeploymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentStatus::Pending => "pending",
            DeploymentStatus::Success => "success",
            DeploymentStatus::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(DeploymentStatus::Pending),
            "success" => Some(DeploymentStatus::Success),
            "failed" => Some(DeploymentStatus::Failed),
            _ => None,
        }
    }
}

/// One recorded deployment attempt. Rows are never deleted.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Deployment {
    pub id: String,
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub purchase_id: Option<i64>,
    pub project_name: String,
    pub status: DeploymentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_owner: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_name: Option<String>,
    pub files_count: i64,
    pub created_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<String>,
}

/// Handle returned when a deployment is opened in the ledger.
#[derive(Debug, Clone)]
pub struct DeploymentHandle {
    pub id: String,
    pub user_id: String,
    pub purchase_id: i64,
}

/// Data recorded on a successful deployment.
#[derive(Debug, Clone)]
pub struct CompletedDeployment {
    pub repo_url: String,
    pub owner: String,
    pub repo: String,
    pub file_count: i64,
}

/// Caller-decided switches for a deploy.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    pub ai_fix_enabled: bool,
    /// Free-tier accounts get the attribution badge injected into HTML
    pub is_free_tier: bool,
    /// Applies only when the repository is created
    pub visibility: Visibility,
}

/// Result of a successful deploy.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployResult {
    pub deployment: Deployment,
    pub message: String,
    pub repo_url: String,
    pub is_update: bool,
    pub file_count: usize,
    pub warnings: Vec<String>,
    pub ai_applied: bool,
    pub ai_changes: Vec<String>,
}
