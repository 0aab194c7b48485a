//! Database repository for the deployment ledger, credit grants and connections.
//!
//! Credit consumption and ledger entry creation share one transaction.

use chrono::Utc;
use sqlx::{Row, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    CompletedDeployment, Credential, Deployment, DeploymentHandle, DeploymentStatus,
    GithubConnection, NewPurchase, Purchase, SaveConnectionRequest, UserStats, UNLIMITED_DEPLOYS,
};

const PURCHASE_COLUMNS: &str = "id, user_id, plan_type, deploys_included, deploys_used, amount_paid, created_at, expires_at, is_active";
const DEPLOYMENT_COLUMNS: &str = "id, user_id, purchase_id, project_name, status, repo_url, repo_owner, repo_name, files_count, created_at, completed_at";
const CONNECTION_COLUMNS: &str = "user_id, github_user_id, github_username, github_avatar_url, access_token, created_at, updated_at";

/// Database repository for all data operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ==================== CREDIT OPERATIONS ====================

    /// Insert a new credit grant.
    pub async fn create_purchase(&self, purchase: &NewPurchase) -> Result<Purchase, AppError> {
        let now = Utc::now().to_rfc3339();

        let result = sqlx::query(
            "INSERT INTO purchases (user_id, plan_type, deploys_included, deploys_used, amount_paid, created_at, expires_at, is_active) VALUES (?, ?, ?, 0, ?, ?, ?, 1)"
        )
        .bind(&purchase.user_id)
        .bind(&purchase.plan_type)
        .bind(purchase.deploys_included)
        .bind(purchase.amount_paid)
        .bind(&now)
        .bind(&purchase.expires_at)
        .execute(&self.pool)
        .await?;

        tracing::info!(
            user_id = %purchase.user_id,
            plan = %purchase.plan_type,
            deploys = purchase.deploys_included,
            "Created credit grant"
        );

        Ok(Purchase {
            id: result.last_insert_rowid(),
            user_id: purchase.user_id.clone(),
            plan_type: purchase.plan_type.clone(),
            deploys_included: purchase.deploys_included,
            deploys_used: 0,
            amount_paid: purchase.amount_paid,
            created_at: now,
            expires_at: purchase.expires_at.clone(),
            is_active: true,
        })
    }

    /// List a user's grants, oldest first.
    pub async fn list_purchases(&self, user_id: &str) -> Result<Vec<Purchase>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM purchases WHERE user_id = ? ORDER BY created_at, id",
            PURCHASE_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(purchase_from_row).collect())
    }

    /// Aggregate the user's remaining credit and history size.
    pub async fn get_user_stats(&self, user_id: &str) -> Result<UserStats, AppError> {
        let purchases = self.list_purchases(user_id).await?;
        let total: i64 = sqlx::query("SELECT COUNT(*) AS total FROM deployments WHERE user_id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await?
            .get("total");

        Ok(summarize_credit(total, purchases, &Utc::now().to_rfc3339()))
    }

    // ==================== DEPLOYMENT LEDGER ====================

    /// Open a `pending` deployment, consuming one credit from the oldest eligible grant.
    ///
    /// An active unlimited grant takes precedence and nothing is consumed.
    /// Nothing is written when no grant is eligible.
    pub async fn begin_deployment(
        &self,
        user_id: &str,
        project_name: &str,
    ) -> Result<DeploymentHandle, AppError> {
        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(
            r#"
            SELECT id, deploys_included FROM purchases
            WHERE user_id = ?
              AND is_active = 1
              AND (expires_at IS NULL OR expires_at > ?)
              AND (deploys_included = ? OR deploys_used < deploys_included)
            ORDER BY deploys_included = ? DESC, created_at, id
            LIMIT 1
            "#,
        )
        .bind(user_id)
        .bind(&now)
        .bind(UNLIMITED_DEPLOYS)
        .bind(UNLIMITED_DEPLOYS)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(row) = row else {
            return Err(AppError::CreditExhausted(
                "No deploys remaining. Purchase more credits to continue.".to_string(),
            ));
        };
        let purchase_id: i64 = row.get("id");
        let deploys_included: i64 = row.get("deploys_included");

        if deploys_included != UNLIMITED_DEPLOYS {
            let updated = sqlx::query(
                "UPDATE purchases SET deploys_used = deploys_used + 1 WHERE id = ? AND deploys_used < deploys_included",
            )
            .bind(purchase_id)
            .execute(&mut *tx)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(AppError::CreditExhausted(
                    "No deploys remaining. Purchase more credits to continue.".to_string(),
                ));
            }
        }

        let id = uuid::Uuid::new_v4().to_string();
        sqlx::query(
            "INSERT INTO deployments (id, user_id, purchase_id, project_name, status, files_count, created_at) VALUES (?, ?, ?, ?, ?, 0, ?)"
        )
        .bind(&id)
        .bind(user_id)
        .bind(purchase_id)
        .bind(project_name)
        .bind(DeploymentStatus::Pending.as_str())
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        tracing::info!(deployment_id = %id, user_id = %user_id, purchase_id, "Deployment started");

        Ok(DeploymentHandle {
            id,
            user_id: user_id.to_string(),
            purchase_id,
        })
    }

    /// Mark a pending deployment successful. Repeat calls return the stored row.
    pub async fn complete_deployment(
        &self,
        handle: &DeploymentHandle,
        completed: &CompletedDeployment,
    ) -> Result<Deployment, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE deployments SET status = ?, repo_url = ?, repo_owner = ?, repo_name = ?, files_count = ?, completed_at = ? WHERE id = ? AND status = ?"
        )
        .bind(DeploymentStatus::Success.as_str())
        .bind(&completed.repo_url)
        .bind(&completed.owner)
        .bind(&completed.repo)
        .bind(completed.file_count)
        .bind(&now)
        .bind(&handle.id)
        .bind(DeploymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::info!(deployment_id = %handle.id, repo_url = %completed.repo_url, "Deployment succeeded");
        }

        self.require_deployment(&handle.id).await
    }

    /// Mark a pending deployment failed. Repeat calls return the stored row.
    pub async fn fail_deployment(&self, handle: &DeploymentHandle) -> Result<Deployment, AppError> {
        let now = Utc::now().to_rfc3339();
        let result = sqlx::query(
            "UPDATE deployments SET status = ?, completed_at = ? WHERE id = ? AND status = ?",
        )
        .bind(DeploymentStatus::Failed.as_str())
        .bind(&now)
        .bind(&handle.id)
        .bind(DeploymentStatus::Pending.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() > 0 {
            tracing::warn!(deployment_id = %handle.id, "Deployment failed");
        }

        self.require_deployment(&handle.id).await
    }

    /// Get a deployment by ID.
    pub async fn get_deployment(&self, id: &str) -> Result<Option<Deployment>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM deployments WHERE id = ?",
            DEPLOYMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(deployment_from_row))
    }

    /// List a user's deployments, newest first.
    pub async fn list_deployments(&self, user_id: &str) -> Result<Vec<Deployment>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM deployments WHERE user_id = ? ORDER BY created_at DESC, rowid DESC",
            DEPLOYMENT_COLUMNS
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(deployment_from_row).collect())
    }

    async fn require_deployment(&self, id: &str) -> Result<Deployment, AppError> {
        self.get_deployment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Deployment {} not found", id)))
    }

    // ==================== GITHUB CONNECTIONS ====================

    /// Get the user's stored connection, if any.
    pub async fn get_github_connection(
        &self,
        user_id: &str,
    ) -> Result<Option<GithubConnection>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM github_connections WHERE user_id = ?",
            CONNECTION_COLUMNS
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(connection_from_row))
    }

    /// Insert or replace the user's connection. The latest token wins.
    pub async fn save_github_connection(
        &self,
        user_id: &str,
        request: &SaveConnectionRequest,
    ) -> Result<GithubConnection, AppError> {
        let now = Utc::now().to_rfc3339();
        sqlx::query(
            r#"
            INSERT INTO github_connections (user_id, github_user_id, github_username, github_avatar_url, access_token, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(user_id) DO UPDATE SET
                github_user_id = excluded.github_user_id,
                github_username = excluded.github_username,
                github_avatar_url = excluded.github_avatar_url,
                access_token = excluded.access_token,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(user_id)
        .bind(&request.github_user_id)
        .bind(&request.github_username)
        .bind(&request.github_avatar_url)
        .bind(&request.access_token)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        tracing::info!(user_id = %user_id, github_username = %request.github_username, "Saved GitHub connection");

        self.get_github_connection(user_id)
            .await?
            .ok_or_else(|| AppError::Internal("Connection vanished after save".to_string()))
    }

    /// Remove the user's connection. Returns whether one existed.
    pub async fn delete_github_connection(&self, user_id: &str) -> Result<bool, AppError> {
        let result = sqlx::query("DELETE FROM github_connections WHERE user_id = ?")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Credential for the user's connected account.
    pub async fn resolve_credential(&self, user_id: &str) -> Result<Credential, AppError> {
        match self.get_github_connection(user_id).await? {
            Some(connection) if !connection.access_token.is_empty() => Ok(Credential {
                token: connection.access_token,
            }),
            _ => Err(AppError::IdentityNotConnected(
                "GitHub not connected. Please connect your GitHub account first.".to_string(),
            )),
        }
    }
}

/// Fold a user's grants into the credit view used by the gate and the stats endpoint.
pub fn summarize_credit(total_deploys: i64, purchases: Vec<Purchase>, now: &str) -> UserStats {
    let usable = || {
        purchases
            .iter()
            .filter(|p| p.is_active && !p.is_expired(now))
    };

    let has_unlimited = usable().any(Purchase::is_unlimited);
    let remaining_deploys = if has_unlimited {
        UNLIMITED_DEPLOYS
    } else {
        purchases
            .iter()
            .filter(|p| p.is_eligible(now))
            .map(|p| p.deploys_included - p.deploys_used)
            .sum::<i64>()
    };
    let is_free_tier = !usable().any(|p| p.amount_paid > 0);

    UserStats {
        total_deploys,
        remaining_deploys,
        has_unlimited,
        is_free_tier,
        purchases,
    }
}

// Helper functions for row conversion

fn purchase_from_row(row: &sqlx::sqlite::SqliteRow) -> Purchase {
    let is_active: i32 = row.get("is_active");
    Purchase {
        id: row.get("id"),
        user_id: row.get("user_id"),
        plan_type: row.get("plan_type"),
        deploys_included: row.get("deploys_included"),
        deploys_used: row.get("deploys_used"),
        amount_paid: row.get("amount_paid"),
        created_at: row.get("created_at"),
        expires_at: row.get("expires_at"),
        is_active: is_active != 0,
    }
}

fn deployment_from_row(row: &sqlx::sqlite::SqliteRow) -> Deployment {
    let status: String = row.get("status");
    Deployment {
        id: row.get("id"),
        user_id: row.get("user_id"),
        purchase_id: row.get("purchase_id"),
        project_name: row.get("project_name"),
        status: DeploymentStatus::from_str(&status).unwrap_or_else(|| {
            tracing::warn!(status = %status, "Unknown deployment status in ledger, reading as failed");
            DeploymentStatus::Failed
        }),
        repo_url: row.get("repo_url"),
        repo_owner: row.get("repo_owner"),
        repo_name: row.get("repo_name"),
        files_count: row.get("files_count"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
    }
}

fn connection_from_row(row: &sqlx::sqlite::SqliteRow) -> GithubConnection {
    GithubConnection {
        user_id: row.get("user_id"),
        github_user_id: row.get("github_user_id"),
        github_username: row.get("github_username"),
        github_avatar_url: row.get("github_avatar_url"),
        access_token: row.get("access_token"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}
