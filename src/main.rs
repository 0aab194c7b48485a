//! ZipShip backend
//!
//! Turns an uploaded ZIP archive into a single commit on the caller's GitHub
//! repository, tracking credits and deployments in SQLite.

mod api;
mod archive;
mod auth;
mod config;
mod db;
mod deploy;
mod errors;
mod github;
mod models;
mod rewrite;

use std::sync::Arc;

use axum::{
    extract::DefaultBodyLimit,
    middleware,
    routing::{get, post, put},
    Router,
};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{AuthorizationPolicy, ConfiguredPolicy};
use config::Config;
use db::Repository;
use deploy::Deployer;
use github::{GithubClient, RepositorySynchronizer, SyncSettings};
use rewrite::{AutoFixer, OpenAiClient};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub deployer: Arc<Deployer>,
    pub policy: Arc<dyn AuthorizationPolicy>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting ZipShip backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("GitHub API: {}", config.github_api_url);
    tracing::info!("Bind address: {}", config.bind_addr);

    // Warn if PSK is not configured
    if config.api_psk.is_none() {
        tracing::warn!("No API PSK configured (ZIPSHIP_API_PSK). Authentication is disabled!");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    let github = GithubClient::new(&config.github_api_url, config.remote_timeout)?;
    let synchronizer = RepositorySynchronizer::new(
        Arc::new(github),
        SyncSettings {
            blob_batch_size: config.blob_batch_size,
            settle_delay: config.repo_settle_delay,
        },
    );

    let fixer = match &config.ai_api_key {
        Some(key) => {
            let client = OpenAiClient::new(
                &config.ai_base_url,
                key,
                &config.ai_model,
                config.remote_timeout,
            )?;
            tracing::info!("AI auto-fix enabled with model {}", config.ai_model);
            Some(AutoFixer::new(Arc::new(client)))
        }
        None => {
            tracing::warn!("No AI API key configured (ZIPSHIP_AI_API_KEY). AI auto-fix is disabled");
            None
        }
    };

    let state = AppState {
        deployer: Arc::new(Deployer::new(repo.clone(), synchronizer, fixer)),
        repo,
        policy: Arc::new(ConfiguredPolicy::new(config.privileged_users.clone())),
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Clone PSK for the auth layer
    let psk = state.config.api_psk.clone();
    let max_upload = state.config.max_upload_bytes;

    // API routes
    let api_routes = Router::new()
        // Deploys
        .route(
            "/deploy-zip",
            post(api::deploy_zip).layer(
                ServiceBuilder::new()
                    .layer(DefaultBodyLimit::disable())
                    .layer(RequestBodyLimitLayer::new(max_upload)),
            ),
        )
        .route("/deploys", get(api::list_deploys))
        // Credits
        .route("/user/stats", get(api::get_user_stats))
        .route("/credits/grant", post(api::grant_credits))
        // GitHub
        .route("/github/status", get(api::github_status))
        .route(
            "/github/connection",
            put(api::save_connection).delete(api::delete_connection),
        )
        .route("/github/repos/{name}", get(api::probe_repo))
        // Apply PSK auth middleware
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(psk.clone(), req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", api_routes)
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}

#[cfg(test)]
mod tests;
