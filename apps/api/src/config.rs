use anyhow::{bail, Context, Result};

/// Connection settings for the hosted collaborators.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub database_url: String,
    pub redis_url: String,
    pub s3_endpoint: String,
    pub s3_region: String,
    pub aws_access_key_id: String,
    pub aws_secret_access_key: String,
}

#[derive(Debug, Clone)]
pub enum Backend {
    /// Postgres document store, S3 object storage, Redis reset tokens.
    Hosted(HostedConfig),
    /// Everything in process; state is lost on restart.
    Memory,
}

/// Application configuration loaded from environment variables.
/// Startup fails if required variables are missing.
#[derive(Debug, Clone)]
pub struct Config {
    pub backend: Backend,
    pub jwt_secret: String,
    pub submissions_bucket: String,
    pub tasks_bucket: String,
    pub mail_relay_url: Option<String>,
    pub reset_link_base: String,
    pub port: u16,
    pub rust_log: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok(); // load .env if present; ignore if missing

        let backend = match optional_env("BACKEND").as_deref().unwrap_or("hosted") {
            "hosted" => Backend::Hosted(HostedConfig {
                database_url: require_env("DATABASE_URL")?,
                redis_url: require_env("REDIS_URL")?,
                s3_endpoint: require_env("S3_ENDPOINT")?,
                s3_region: optional_env("S3_REGION").unwrap_or_else(|| "us-east-1".to_string()),
                aws_access_key_id: require_env("AWS_ACCESS_KEY_ID")?,
                aws_secret_access_key: require_env("AWS_SECRET_ACCESS_KEY")?,
            }),
            "memory" => Backend::Memory,
            other => bail!("BACKEND must be 'hosted' or 'memory', got '{other}'"),
        };

        Ok(Config {
            backend,
            jwt_secret: require_env("JWT_SECRET")?,
            submissions_bucket: optional_env("SUBMISSIONS_BUCKET")
                .unwrap_or_else(|| "submissions".to_string()),
            tasks_bucket: optional_env("TASKS_BUCKET")
                .unwrap_or_else(|| "task-attachments".to_string()),
            mail_relay_url: optional_env("MAIL_RELAY_URL"),
            reset_link_base: optional_env("RESET_LINK_BASE")
                .unwrap_or_else(|| "http://localhost:3000/reset-password".to_string()),
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "8080".to_string())
                .parse::<u16>()
                .context("PORT must be a valid port number")?,
            rust_log: std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        })
    }
}

fn require_env(key: &str) -> Result<String> {
    std::env::var(key).with_context(|| format!("Required environment variable '{key}' is not set"))
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
