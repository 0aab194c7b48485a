//! GitHub REST implementation of [`RemoteRepository`].

use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

use super::{
    CreateRepoRequest, NewCommit, RemoteCommit, RemoteRepo, RemoteRepository, RemoteUser, RepoId,
    TreeEntry,
};
use crate::errors::RemoteError;
use crate::models::Credential;

const USER_AGENT: &str = "zipship/0.1";
const API_VERSION: &str = "2022-11-28";

/// Ref updates outlive the client-wide timeout: once sent they cannot be taken back.
const REF_UPDATE_TIMEOUT: Duration = Duration::from_secs(300);

/// GitHub API client. One instance serves every user; the credential travels with each call.
#[derive(Clone)]
pub struct GithubClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ShaOnly {
    sha: String,
}

#[derive(Deserialize)]
struct RefResponse {
    object: ShaOnly,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    tree: ShaOnly,
}

impl GithubClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| RemoteError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn request(&self, method: Method, path: &str, credential: &Credential) -> RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
            .bearer_auth(&credential.token)
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<T, RemoteError> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().path().to_string();

        if status.is_success() {
            return Ok(response.json().await?);
        }

        let message = response.text().await.unwrap_or_default();
        tracing::debug!(url = %url, status = %status, "GitHub request failed");
        if status == StatusCode::NOT_FOUND {
            Err(RemoteError::NotFound(url))
        } else {
            Err(RemoteError::Api {
                status: status.as_u16(),
                message,
            })
        }
    }
}

fn repo_path(repo: &RepoId, suffix: &str) -> String {
    format!("/repos/{}/{}{}", repo.owner, repo.name, suffix)
}

#[async_trait]
impl RemoteRepository for GithubClient {
    async fn authenticated_user(&self, credential: &Credential) -> Result<RemoteUser, RemoteError> {
        self.send(self.request(Method::GET, "/user", credential))
            .await
    }

    async fn get_repo(
        &self,
        credential: &Credential,
        repo: &RepoId,
    ) -> Result<RemoteRepo, RemoteError> {
        self.send(self.request(Method::GET, &repo_path(repo, ""), credential))
            .await
    }

    async fn create_repo(
        &self,
        credential: &Credential,
        request: &CreateRepoRequest,
    ) -> Result<RemoteRepo, RemoteError> {
        self.send(
            self.request(Method::POST, "/user/repos", credential)
                .json(request),
        )
        .await
    }

    async fn get_branch_ref(
        &self,
        credential: &Credential,
        repo: &RepoId,
        branch: &str,
    ) -> Result<String, RemoteError> {
        let path = repo_path(repo, &format!("/git/ref/heads/{}", branch));
        let reference: RefResponse = self
            .send(self.request(Method::GET, &path, credential))
            .await?;
        Ok(reference.object.sha)
    }

    async fn get_commit(
        &self,
        credential: &Credential,
        repo: &RepoId,
        sha: &str,
    ) -> Result<RemoteCommit, RemoteError> {
        let path = repo_path(repo, &format!("/git/commits/{}", sha));
        let commit: CommitResponse = self
            .send(self.request(Method::GET, &path, credential))
            .await?;
        Ok(RemoteCommit {
            sha: commit.sha,
            tree_sha: commit.tree.sha,
        })
    }

    async fn create_blob(
        &self,
        credential: &Credential,
        repo: &RepoId,
        content: &[u8],
    ) -> Result<String, RemoteError> {
        let body = json!({
            "content": BASE64.encode(content),
            "encoding": "base64",
        });
        let blob: ShaOnly = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/blobs"), credential)
                    .json(&body),
            )
            .await?;
        Ok(blob.sha)
    }

    async fn create_tree(
        &self,
        credential: &Credential,
        repo: &RepoId,
        entries: &[TreeEntry],
    ) -> Result<String, RemoteError> {
        // No `base_tree`: the new tree holds exactly these entries.
        let body = json!({ "tree": entries });
        let tree: ShaOnly = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/trees"), credential)
                    .json(&body),
            )
            .await?;
        Ok(tree.sha)
    }

    async fn create_commit(
        &self,
        credential: &Credential,
        repo: &RepoId,
        commit: &NewCommit,
    ) -> Result<String, RemoteError> {
        let created: ShaOnly = self
            .send(
                self.request(Method::POST, &repo_path(repo, "/git/commits"), credential)
                    .json(commit),
            )
            .await?;
        Ok(created.sha)
    }

    async fn update_branch_ref(
        &self,
        credential: &Credential,
        repo: &RepoId,
        branch: &str,
        sha: &str,
    ) -> Result<(), RemoteError> {
        let path = repo_path(repo, &format!("/git/refs/heads/{}", branch));
        let body = json!({ "sha": sha, "force": false });
        let _: serde_json::Value = self
            .send(
                self.request(Method::PATCH, &path, credential)
                    .timeout(REF_UPDATE_TIMEOUT)
                    .json(&body),
            )
            .await?;
        Ok(())
    }
}
