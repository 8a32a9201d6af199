use std::env;
use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::engine::sync::{DEFAULT_EXECUTION_LIMIT, DEFAULT_LOOKBACK_DAYS};

pub const DEFAULT_FRONTEND_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_BIND_ADDR: &str = "127.0.0.1:3000";
pub const DEFAULT_USAGE_CACHE_TTL_SECONDS: u64 = 300;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),
    #[error("{name} has an invalid value `{value}`")]
    Invalid { name: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct N8nSettings {
    pub api_url: String,
    pub api_key: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// `None` unless both `N8N_API_URL` and `N8N_API_KEY` are set.
    pub n8n: Option<N8nSettings>,
    pub cron_secret: Option<String>,
    pub webhook_secret: Option<String>,
    pub app_env: String,
    pub frontend_origin: String,
    pub bind_addr: SocketAddr,
    pub sync_lookback_days: i64,
    pub sync_execution_limit: u32,
    pub usage_cache_ttl: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenv::dotenv().ok(); // Load .env file

        let database_url = optional("DATABASE_URL").ok_or(ConfigError::Missing("DATABASE_URL"))?;

        let n8n = match (optional("N8N_API_URL"), optional("N8N_API_KEY")) {
            (Some(api_url), Some(api_key)) => Some(N8nSettings { api_url, api_key }),
            _ => None,
        };

        Ok(Config {
            database_url,
            n8n,
            cron_secret: optional("CRON_SECRET"),
            webhook_secret: optional("WEBHOOK_SECRET"),
            app_env: optional("APP_ENV").unwrap_or_else(|| "production".to_string()),
            frontend_origin: optional("FRONTEND_ORIGIN")
                .unwrap_or_else(|| DEFAULT_FRONTEND_ORIGIN.to_string()),
            bind_addr: parsed("BIND_ADDR", DEFAULT_BIND_ADDR.parse().ok())?,
            sync_lookback_days: parsed("SYNC_LOOKBACK_DAYS", Some(DEFAULT_LOOKBACK_DAYS))?,
            sync_execution_limit: parsed("SYNC_EXECUTION_LIMIT", Some(DEFAULT_EXECUTION_LIMIT))?,
            usage_cache_ttl: Duration::from_secs(parsed(
                "USAGE_CACHE_TTL_SECONDS",
                Some(DEFAULT_USAGE_CACHE_TTL_SECONDS),
            )?),
        })
    }

    pub fn is_development(&self) -> bool {
        self.app_env.eq_ignore_ascii_case("development")
    }
}

fn optional(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(name: &'static str, default: Option<T>) -> Result<T, ConfigError> {
    match optional(name) {
        Some(raw) => raw
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value: raw }),
        None => default.ok_or(ConfigError::Missing(name)),
    }
}

#[cfg(test)]
impl Config {
    pub fn for_tests() -> Self {
        Config {
            database_url: "postgres://localhost/test".to_string(),
            n8n: Some(N8nSettings {
                api_url: "http://n8n.test/api/v1".to_string(),
                api_key: "n8n-key".to_string(),
            }),
            cron_secret: Some("cron-secret".to_string()),
            webhook_secret: Some("hook-secret".to_string()),
            app_env: "test".to_string(),
            frontend_origin: DEFAULT_FRONTEND_ORIGIN.to_string(),
            bind_addr: ([127, 0, 0, 1], 3000).into(),
            sync_lookback_days: DEFAULT_LOOKBACK_DAYS,
            sync_execution_limit: DEFAULT_EXECUTION_LIMIT,
            usage_cache_ttl: Duration::from_secs(DEFAULT_USAGE_CACHE_TTL_SECONDS),
        }
    }
}
