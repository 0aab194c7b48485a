//! Tree-replace synchronization.
//!
//! A deploy becomes one commit whose tree holds exactly the uploaded files.
//! Blobs, the tree and the commit are inert until the final ref update, which
//! is the single point where the new state becomes visible.

use std::sync::Arc;
use std::time::Duration;

use futures::future::try_join_all;

use super::{
    sanitize_repo_name, CreateRepoRequest, NewCommit, RemoteRepo, RemoteRepository, RepoId,
    TreeEntry,
};
use crate::errors::AppError;
use crate::models::{ArchiveEntry, Credential, RepoExistence, Visibility};

const INITIAL_COMMIT_MESSAGE: &str = "Initial upload via ZipShip";
const UPDATE_COMMIT_MESSAGE: &str = "Updated via ZipShip";
const REPO_DESCRIPTION: &str = "Deployed via ZipShip";

/// Tuning for remote calls.
#[derive(Debug, Clone, Copy)]
pub struct SyncSettings {
    /// Blobs uploaded concurrently per batch; batches run one after another.
    pub blob_batch_size: usize,
    /// Wait after creating a repository so its refs settle.
    pub settle_delay: Duration,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            blob_batch_size: 10,
            settle_delay: Duration::from_secs(1),
        }
    }
}

/// Result of a successful synchronization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub repo_url: String,
    pub owner_login: String,
    pub repo_name: String,
    pub was_preexisting: bool,
    pub commit_sha: String,
    pub file_count: usize,
}

/// Pushes a complete file list to a repository as a single commit.
#[derive(Clone)]
pub struct RepositorySynchronizer {
    api: Arc<dyn RemoteRepository>,
    settings: SyncSettings,
}

impl RepositorySynchronizer {
    pub fn new(api: Arc<dyn RemoteRepository>, settings: SyncSettings) -> Self {
        Self { api, settings }
    }

    /// Report whether a repository for `desired_name` already exists under the account.
    pub async fn probe(
        &self,
        credential: &Credential,
        desired_name: &str,
    ) -> Result<RepoExistence, AppError> {
        let owner = self.api.authenticated_user(credential).await?.login;
        let repo_id = RepoId {
            owner,
            name: sanitize_repo_name(desired_name),
        };
        match self.api.get_repo(credential, &repo_id).await {
            Ok(repo) => Ok(RepoExistence {
                exists: true,
                repo_name: repo_id.name,
                url: Some(repo.html_url),
            }),
            Err(e) if e.is_not_found() => Ok(RepoExistence {
                exists: false,
                repo_name: repo_id.name,
                url: None,
            }),
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the default branch's working tree with `entries`.
    pub async fn sync(
        &self,
        credential: &Credential,
        desired_name: &str,
        entries: &[ArchiveEntry],
        visibility: Visibility,
    ) -> Result<SyncOutcome, AppError> {
        if entries.is_empty() {
            return Err(AppError::Validation("Nothing to synchronize".to_string()));
        }

        let owner = self.api.authenticated_user(credential).await?.login;
        let repo_id = RepoId {
            owner,
            name: sanitize_repo_name(desired_name),
        };

        let (repo, was_preexisting) = self.resolve(credential, &repo_id, visibility).await?;

        // Branch name comes from current metadata, never assumed.
        let metadata = self.api.get_repo(credential, &repo_id).await?;
        let branch = metadata.default_branch;

        let parent_sha = self
            .api
            .get_branch_ref(credential, &repo_id, &branch)
            .await?;
        let parent = self.api.get_commit(credential, &repo_id, &parent_sha).await?;
        tracing::debug!(
            repo = %repo_id.name,
            branch = %branch,
            parent = %parent.sha,
            base_tree = %parent.tree_sha,
            "Read branch tip"
        );

        let tree_entries = self.upload_blobs(credential, &repo_id, entries).await?;
        let tree_sha = self
            .api
            .create_tree(credential, &repo_id, &tree_entries)
            .await?;

        let message = if was_preexisting {
            UPDATE_COMMIT_MESSAGE
        } else {
            INITIAL_COMMIT_MESSAGE
        };
        let commit_sha = self
            .api
            .create_commit(
                credential,
                &repo_id,
                &NewCommit {
                    message: message.to_string(),
                    tree: tree_sha,
                    parents: vec![parent.sha],
                },
            )
            .await?;

        self.publish(credential, &repo_id, &branch, &commit_sha)
            .await?;
        tracing::info!(
            repo = %repo_id.name,
            branch = %branch,
            commit = %commit_sha,
            files = entries.len(),
            "Branch updated"
        );

        Ok(SyncOutcome {
            repo_url: repo.html_url,
            owner_login: repo_id.owner,
            repo_name: repo_id.name,
            was_preexisting,
            commit_sha,
            file_count: entries.len(),
        })
    }

    /// Fetch the repository, creating it only on a definite not-found.
    async fn resolve(
        &self,
        credential: &Credential,
        repo_id: &RepoId,
        visibility: Visibility,
    ) -> Result<(RemoteRepo, bool), AppError> {
        match self.api.get_repo(credential, repo_id).await {
            Ok(repo) => {
                tracing::info!(repo = %repo.name, owner = %repo_id.owner, "Repository exists, updating");
                Ok((repo, true))
            }
            Err(e) if e.is_not_found() => {
                let repo = self
                    .api
                    .create_repo(
                        credential,
                        &CreateRepoRequest {
                            name: repo_id.name.clone(),
                            description: REPO_DESCRIPTION.to_string(),
                            private: visibility.is_private(),
                            auto_init: true,
                        },
                    )
                    .await?;
                tracing::info!(repo = %repo_id.name, "Created repository");
                if !self.settings.settle_delay.is_zero() {
                    tokio::time::sleep(self.settings.settle_delay).await;
                }
                Ok((repo, false))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Move the branch to `commit_sha`.
    ///
    /// A timed-out update has an unknown outcome, so the branch is re-read and
    /// the deploy only fails if the commit did not land.
    async fn publish(
        &self,
        credential: &Credential,
        repo_id: &RepoId,
        branch: &str,
        commit_sha: &str,
    ) -> Result<(), AppError> {
        let err = match self
            .api
            .update_branch_ref(credential, repo_id, branch, commit_sha)
            .await
        {
            Ok(()) => return Ok(()),
            Err(e) if e.is_timeout() => e,
            Err(e) => return Err(e.into()),
        };

        tracing::warn!(
            repo = %repo_id.name,
            branch = %branch,
            commit = %commit_sha,
            error = %err,
            "Ref update timed out, outcome unknown; re-reading branch"
        );
        let tip = self.api.get_branch_ref(credential, repo_id, branch).await?;
        if tip == commit_sha {
            tracing::info!(repo = %repo_id.name, commit = %commit_sha, "Ref update landed despite timeout");
            Ok(())
        } else {
            Err(err.into())
        }
    }

    async fn upload_blobs(
        &self,
        credential: &Credential,
        repo_id: &RepoId,
        entries: &[ArchiveEntry],
    ) -> Result<Vec<TreeEntry>, AppError> {
        let batch_size = self.settings.blob_batch_size.max(1);
        let mut tree_entries = Vec::with_capacity(entries.len());

        for batch in entries.chunks(batch_size) {
            let uploads = batch.iter().map(|entry| async move {
                let sha = self
                    .api
                    .create_blob(credential, repo_id, entry.as_bytes())
                    .await?;
                Ok::<_, AppError>(TreeEntry::blob(entry.path.clone(), sha))
            });
            tree_entries.extend(try_join_all(uploads).await?);
            tracing::debug!(
                uploaded = tree_entries.len(),
                total = entries.len(),
                "Uploaded blobs"
            );
        }

        Ok(tree_entries)
    }
}
