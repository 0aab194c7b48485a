//! Configuration module for the ZipShip service.
//!
//! All configuration is loaded from environment variables with sensible defaults.

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Pre-shared key the fronting gateway must present
    pub api_psk: Option<String>,
    /// Path to SQLite database file
    pub db_path: PathBuf,
    /// Address to bind the server to
    pub bind_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Base URL of the GitHub REST API
    pub github_api_url: String,
    /// API key for the text-generation collaborator; auto-fix is disabled without it
    pub ai_api_key: Option<String>,
    /// Base URL of the chat-completions endpoint
    pub ai_base_url: String,
    /// Model requested from the text-generation collaborator
    pub ai_model: String,
    /// Maximum accepted upload body in bytes
    pub max_upload_bytes: usize,
    /// Concurrent blob uploads per batch
    pub blob_batch_size: usize,
    /// Pause after creating a repository before touching its refs
    pub repo_settle_delay: Duration,
    /// Timeout applied to each remote HTTP request
    pub remote_timeout: Duration,
    /// User ids allowed to call privileged endpoints
    pub privileged_users: Vec<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, AppError> {
        dotenvy::dotenv().ok();

        let api_psk = env::var("ZIPSHIP_API_PSK").ok().filter(|s| !s.is_empty());

        let db_path = env::var("ZIPSHIP_DB_PATH")
            .unwrap_or_else(|_| "./data/zipship.sqlite".to_string())
            .into();

        let bind_addr = parse_var("ZIPSHIP_BIND_ADDR", "127.0.0.1:8080".parse().ok())?;

        let log_level = env::var("ZIPSHIP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let github_api_url = env::var("ZIPSHIP_GITHUB_API_URL")
            .unwrap_or_else(|_| "https://api.github.com".to_string());

        let ai_api_key = env::var("ZIPSHIP_AI_API_KEY").ok().filter(|s| !s.is_empty());
        let ai_base_url = env::var("ZIPSHIP_AI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let ai_model = env::var("ZIPSHIP_AI_MODEL").unwrap_or_else(|_| "gpt-5.2".to_string());

        let max_upload_bytes = parse_var("ZIPSHIP_MAX_UPLOAD_BYTES", Some(50 * 1024 * 1024))?;
        let blob_batch_size: usize = parse_var("ZIPSHIP_BLOB_BATCH_SIZE", Some(10))?;
        if blob_batch_size == 0 {
            return Err(AppError::Validation(
                "ZIPSHIP_BLOB_BATCH_SIZE must be at least 1".to_string(),
            ));
        }
        let settle_ms: u64 = parse_var("ZIPSHIP_REPO_SETTLE_MS", Some(1000))?;
        let timeout_secs: u64 = parse_var("ZIPSHIP_REMOTE_TIMEOUT_SECS", Some(30))?;

        let privileged_users = env::var("ZIPSHIP_PRIVILEGED_USERS")
            .map(|raw| {
                raw.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        Ok(Self {
            api_psk,
            db_path,
            bind_addr,
            log_level,
            github_api_url,
            ai_api_key,
            ai_base_url,
            ai_model,
            max_upload_bytes,
            blob_batch_size,
            repo_settle_delay: Duration::from_millis(settle_ms),
            remote_timeout: Duration::from_secs(timeout_secs),
            privileged_users,
        })
    }
}

/// Parse an environment variable, falling back to `default` when unset.
fn parse_var<T: FromStr>(name: &str, default: Option<T>) -> Result<T, AppError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("Invalid {} value: {}", name, raw))),
        Err(_) => default.ok_or_else(|| AppError::Validation(format!("{} is required", name))),
    }
}
