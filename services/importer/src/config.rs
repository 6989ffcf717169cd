use anyhow::{Context, Result};
use std::path::PathBuf;

pub const DEFAULT_API_BIND: &str = "127.0.0.1:8080";
pub const DEFAULT_UPLOAD_DIR: &str = "./data/uploads";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 5;

/// Runtime settings shared by the CLI and the HTTP service.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub api_bind: String,
    pub upload_dir: PathBuf,
    pub db_max_connections: u32,
}

impl Config {
    /// Read settings from the environment. Call `dotenvy::dotenv()` first to
    /// pick up a local `.env` file.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            db_url: lookup("DB_URL").context("DB_URL env var missing")?,
            api_bind: lookup("API_BIND").unwrap_or_else(|| DEFAULT_API_BIND.to_string()),
            upload_dir: PathBuf::from(
                lookup("UPLOAD_DIR").unwrap_or_else(|| DEFAULT_UPLOAD_DIR.to_string()),
            ),
            db_max_connections: lookup("DB_MAX_CONNECTIONS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_DB_MAX_CONNECTIONS),
        })
    }
}
