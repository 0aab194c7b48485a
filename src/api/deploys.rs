//! Deploy API endpoints.

use axum::extract::{Multipart, State};

use super::{success, ApiResult};
use crate::auth::UserId;
use crate::errors::AppError;
use crate::github::FALLBACK_REPO_NAME;
use crate::models::{DeployOptions, DeployResult, Deployment, Visibility};
use crate::AppState;

/// Fields of the deploy upload form.
#[derive(Default)]
struct DeployForm {
    archive: Option<Vec<u8>>,
    project_name: Option<String>,
    ai_fix_enabled: bool,
    private: bool,
}

/// POST /api/deploy-zip - Deploy an uploaded ZIP archive.
///
/// The credit check runs before any of the upload body is read.
pub async fn deploy_zip(
    State(state): State<AppState>,
    user: UserId,
    multipart: Multipart,
) -> ApiResult<DeployResult> {
    let stats = state.deployer.ensure_credit(user.as_str()).await?;

    let form = read_form(multipart).await?;
    let archive = form
        .archive
        .ok_or_else(|| AppError::Validation("No ZIP file uploaded".to_string()))?;
    let project_name = form
        .project_name
        .filter(|name| !name.trim().is_empty())
        .unwrap_or_else(|| FALLBACK_REPO_NAME.to_string());

    let options = DeployOptions {
        ai_fix_enabled: form.ai_fix_enabled,
        is_free_tier: stats.is_free_tier,
        visibility: if form.private {
            Visibility::Private
        } else {
            Visibility::Public
        },
    };

    let result = state
        .deployer
        .deploy(user.as_str(), &project_name, &archive, options)
        .await?;
    success(result)
}

/// GET /api/deploys - List the caller's deployments, newest first.
pub async fn list_deploys(
    State(state): State<AppState>,
    user: UserId,
) -> ApiResult<Vec<Deployment>> {
    success(state.repo.list_deployments(user.as_str()).await?)
}

async fn read_form(mut multipart: Multipart) -> Result<DeployForm, AppError> {
    let mut form = DeployForm::default();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        match field.name() {
            Some("file") => {
                let bytes = field.bytes().await.map_err(multipart_error)?;
                form.archive = Some(bytes.to_vec());
            }
            Some("projectName") => {
                form.project_name = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("aiFixEnabled") => {
                form.ai_fix_enabled = parse_flag(&field.text().await.map_err(multipart_error)?);
            }
            Some("isPrivate") => {
                form.private = parse_flag(&field.text().await.map_err(multipart_error)?);
            }
            other => tracing::debug!(field = ?other, "Ignoring unknown form field"),
        }
    }

    Ok(form)
}

fn parse_flag(value: &str) -> bool {
    matches!(value.trim(), "true" | "1" | "on")
}

fn multipart_error(err: axum::extract::multipart::MultipartError) -> AppError {
    AppError::BadRequest(format!("Invalid upload: {}", err.body_text()))
}
