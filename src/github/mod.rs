//! Remote repository API and the tree-replace synchronizer built on it.

mod client;
mod sync;

pub use client::GithubClient;
pub use sync::{RepositorySynchronizer, SyncOutcome, SyncSettings};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::RemoteError;
use crate::models::Credential;

/// Name used when sanitization leaves nothing behind.
pub const FALLBACK_REPO_NAME: &str = "zipship-project";

const MAX_REPO_NAME_LEN: usize = 100;

/// Derive a repository name from free-form user input.
///
/// Lowercase, map anything outside `[a-z0-9-_]` to `-`, collapse dash runs,
/// trim dashes at both ends, cap at 100 characters, fall back when empty.
pub fn sanitize_repo_name(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for c in input.to_lowercase().chars() {
        let c = if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-' || c == '_' {
            c
        } else {
            '-'
        };
        if c == '-' && out.ends_with('-') {
            continue;
        }
        out.push(c);
    }

    // Output is ASCII, so byte truncation is safe.
    let trimmed = out.trim_matches('-');
    let truncated = &trimmed[..trimmed.len().min(MAX_REPO_NAME_LEN)];

    if truncated.is_empty() {
        FALLBACK_REPO_NAME.to_string()
    } else {
        truncated.to_string()
    }
}

/// Owner and name of a remote repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoId {
    pub owner: String,
    pub name: String,
}

/// The account a credential belongs to.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteUser {
    pub login: String,
}

/// Repository metadata needed by the synchronizer.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteRepo {
    pub name: String,
    pub html_url: String,
    pub default_branch: String,
}

/// Parameters for creating a repository under the authenticated account.
#[derive(Debug, Clone, Serialize)]
pub struct CreateRepoRequest {
    pub name: String,
    pub description: String,
    pub private: bool,
    pub auto_init: bool,
}

/// A commit as far as the synchronizer cares.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteCommit {
    pub sha: String,
    pub tree_sha: String,
}

/// One path in a new tree, always a regular-file blob.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TreeEntry {
    pub path: String,
    pub mode: &'static str,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub sha: String,
}

impl TreeEntry {
    pub fn blob(path: impl Into<String>, sha: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            mode: "100644",
            kind: "blob",
            sha: sha.into(),
        }
    }
}

/// Parameters for a new commit object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NewCommit {
    pub message: String,
    pub tree: String,
    pub parents: Vec<String>,
}

/// GitHub-shaped repository API.
///
/// Every call can fail with [`RemoteError::NotFound`], distinct from all other failures.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteRepository: Send + Sync {
    async fn authenticated_user(&self, credential: &Credential) -> Result<RemoteUser, RemoteError>;

    async fn get_repo(&self, credential: &Credential, repo: &RepoId)
        -> Result<RemoteRepo, RemoteError>;

    async fn create_repo(
        &self,
        credential: &Credential,
        request: &CreateRepoRequest,
    ) -> Result<RemoteRepo, RemoteError>;

    /// Commit SHA the branch currently points at.
    async fn get_branch_ref(
        &self,
        credential: &Credential,
        repo: &RepoId,
        branch: &str,
    ) -> Result<String, RemoteError>;

    async fn get_commit(
        &self,
        credential: &Credential,
        repo: &RepoId,
        sha: &str,
    ) -> Result<RemoteCommit, RemoteError>;

    /// Store raw bytes as a blob and return its SHA.
    async fn create_blob(
        &self,
        credential: &Credential,
        repo: &RepoId,
        content: &[u8],
    ) -> Result<String, RemoteError>;

    /// Create a tree holding exactly `entries`, with no base tree.
    async fn create_tree(
        &self,
        credential: &Credential,
        repo: &RepoId,
        entries: &[TreeEntry],
    ) -> Result<String, RemoteError>;

    async fn create_commit(
        &self,
        credential: &Credential,
        repo: &RepoId,
        commit: &NewCommit,
    ) -> Result<String, RemoteError>;

    async fn update_branch_ref(
        &self,
        credential: &Credential,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> Result<(), RemoteError>;
}
