//! Deploy orchestration: ledger → normalize → rewrite → sync → ledger.
//!
//! Once a deployment row is opened it always reaches a terminal state, on
//! every exit path including archive errors and remote failures.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::archive;
use crate::db::Repository;
use crate::errors::AppError;
use crate::github::{sanitize_repo_name, RepositorySynchronizer};
use crate::models::{
    CompletedDeployment, Credential, DeployOptions, DeployResult, DeploymentHandle, UserStats,
};
use crate::rewrite::{inject_badges, AutoFixer};

/// Per-(account, repository) locks serializing ref updates within this process.
#[derive(Default)]
struct RepoLocks {
    inner: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl RepoLocks {
    async fn acquire(&self, user_id: &str, repo_name: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            // Drop idle entries so the map tracks only in-flight deploys.
            map.retain(|_, lock| Arc::strong_count(lock) > 1);
            map.entry((user_id.to_string(), repo_name.to_string()))
                .or_default()
                .clone()
        };
        lock.lock_owned().await
    }
}

/// Everything produced between opening and closing the ledger entry.
struct Processed {
    repo_url: String,
    owner: String,
    repo_name: String,
    is_update: bool,
    file_count: usize,
    warnings: Vec<String>,
    ai_applied: bool,
    ai_changes: Vec<String>,
}

/// Runs deploys end to end.
pub struct Deployer {
    repo: Arc<Repository>,
    synchronizer: RepositorySynchronizer,
    fixer: Option<AutoFixer>,
    locks: RepoLocks,
}

impl Deployer {
    pub fn new(
        repo: Arc<Repository>,
        synchronizer: RepositorySynchronizer,
        fixer: Option<AutoFixer>,
    ) -> Self {
        Self {
            repo,
            synchronizer,
            fixer,
            locks: RepoLocks::default(),
        }
    }

    pub fn synchronizer(&self) -> &RepositorySynchronizer {
        &self.synchronizer
    }

    /// Fail with `CreditExhausted` unless the user may start a deploy.
    ///
    /// Cheap enough to call before reading the upload body.
    pub async fn ensure_credit(&self, user_id: &str) -> Result<UserStats, AppError> {
        let stats = self.repo.get_user_stats(user_id).await?;
        if !stats.may_deploy() {
            tracing::info!(user_id = %user_id, "Deploy refused: no credit");
            return Err(AppError::CreditExhausted(
                "No deploys remaining. Purchase more credits to continue.".to_string(),
            ));
        }
        Ok(stats)
    }

    /// Deploy an archive to the user's repository named after `project_name`.
    ///
    /// Credit is enforced by `begin_deployment`; callers that want to refuse
    /// before reading an upload call [`Deployer::ensure_credit`] first.
    pub async fn deploy(
        &self,
        user_id: &str,
        project_name: &str,
        archive_bytes: &[u8],
        options: DeployOptions,
    ) -> Result<DeployResult, AppError> {
        // Resolved before the ledger entry so a missing connection costs no credit.
        let credential = self.repo.resolve_credential(user_id).await?;

        let handle = self.repo.begin_deployment(user_id, project_name).await?;
        tracing::info!(
            deployment_id = %handle.id,
            project = %project_name,
            bytes = archive_bytes.len(),
            ai_fix = options.ai_fix_enabled,
            free_tier = options.is_free_tier,
            "Deploy started"
        );

        let result = match self
            .process(&handle, &credential, project_name, archive_bytes, options)
            .await
        {
            Ok(processed) => self.finish(&handle, processed).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(deployed) => Ok(deployed),
            Err(e) => {
                tracing::error!(deployment_id = %handle.id, error = %e, "Deploy failed");
                if let Err(ledger_err) = self.repo.fail_deployment(&handle).await {
                    tracing::error!(
                        deployment_id = %handle.id,
                        error = %ledger_err,
                        "Could not mark deployment failed"
                    );
                }
                Err(e)
            }
        }
    }

    async fn process(
        &self,
        handle: &DeploymentHandle,
        credential: &Credential,
        project_name: &str,
        archive_bytes: &[u8],
        options: DeployOptions,
    ) -> Result<Processed, AppError> {
        let normalized = archive::normalize(archive_bytes)?;
        tracing::debug!(
            deployment_id = %handle.id,
            files = normalized.entries.len(),
            wrapper = ?normalized.wrapper,
            "Archive normalized"
        );
        let mut warnings = normalized.warnings();
        let mut entries = normalized.entries;
        warnings.extend(archive::manifest_warnings(&entries));

        let mut ai_applied = false;
        let mut ai_changes = Vec::new();
        if options.ai_fix_enabled {
            match &self.fixer {
                Some(fixer) => {
                    let outcome = fixer.run(entries).await;
                    entries = outcome.entries;
                    ai_applied = outcome.applied;
                    ai_changes = outcome.changes;
                    warnings.extend(outcome.warnings);
                }
                None => warnings.push(
                    "AI fix unavailable: no text generation service configured".to_string(),
                ),
            }
        }

        if options.is_free_tier {
            entries = inject_badges(entries);
        }

        let repo_name = sanitize_repo_name(project_name);
        let _guard = self.locks.acquire(&handle.user_id, &repo_name).await;
        let outcome = self
            .synchronizer
            .sync(credential, project_name, &entries, options.visibility)
            .await?;

        Ok(Processed {
            repo_url: outcome.repo_url,
            owner: outcome.owner_login,
            repo_name: outcome.repo_name,
            is_update: outcome.was_preexisting,
            file_count: outcome.file_count,
            warnings,
            ai_applied,
            ai_changes,
        })
    }

    async fn finish(
        &self,
        handle: &DeploymentHandle,
        processed: Processed,
    ) -> Result<DeployResult, AppError> {
        let deployment = self
            .repo
            .complete_deployment(
                handle,
                &CompletedDeployment {
                    repo_url: processed.repo_url.clone(),
                    owner: processed.owner,
                    repo: processed.repo_name,
                    file_count: processed.file_count as i64,
                },
            )
            .await?;

        let message = if processed.is_update {
            format!("Updated repository with {} files", processed.file_count)
        } else {
            format!("Created repository with {} files", processed.file_count)
        };

        Ok(DeployResult {
            deployment,
            message,
            repo_url: processed.repo_url,
            is_update: processed.is_update,
            file_count: processed.file_count,
            warnings: processed.warnings,
            ai_applied: processed.ai_applied,
            ai_changes: processed.ai_changes,
        })
    }
}
