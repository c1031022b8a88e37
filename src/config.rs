use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

use crate::models::PermissionState;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_base_url: String,
    pub api_token: Option<String>,
    pub user_id: String,
    pub database_url: String,
    pub http_timeout: Duration,
    pub connectivity_probe_url: String,
    pub connectivity_probe_interval: Duration,
    pub schedule_interval: Duration,
    pub notifications_supported: bool,
    pub notification_permission: PermissionState,
    pub control_bind_address: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let api_base_url = env::var("API_BASE_URL").context("API_BASE_URL must be set")?;
        let api_base_url = api_base_url.trim_end_matches('/').to_string();

        Ok(Self {
            api_token: env::var("API_TOKEN").ok().filter(|t| !t.is_empty()),
            user_id: env::var("USER_ID").context("USER_ID must be set")?,
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://mindful-notifier.db".to_string()),
            http_timeout: Duration::from_secs(parse_secs("HTTP_TIMEOUT_SECS", 10)?),
            connectivity_probe_url: env::var("CONNECTIVITY_PROBE_URL")
                .unwrap_or_else(|_| api_base_url.clone()),
            connectivity_probe_interval: Duration::from_secs(parse_secs(
                "CONNECTIVITY_PROBE_SECS",
                15,
            )?),
            schedule_interval: Duration::from_secs(parse_secs("SCHEDULE_INTERVAL_SECS", 3600)?),
            notifications_supported: env::var("NOTIFICATIONS_SUPPORTED")
                .map(|v| v != "false")
                .unwrap_or(true),
            notification_permission: match env::var("NOTIFICATION_PERMISSION") {
                Ok(v) => v
                    .parse()
                    .context("NOTIFICATION_PERMISSION must be granted, denied or undetermined")?,
                Err(_) => PermissionState::Undetermined,
            },
            control_bind_address: env::var("CONTROL_BIND_ADDRESS")
                .unwrap_or_else(|_| "127.0.0.1:8787".to_string()),
            api_base_url,
        })
    }
}

fn parse_secs(var: &str, default: u64) -> Result<u64> {
    match env::var(var) {
        Ok(v) => v
            .parse::<u64>()
            .with_context(|| format!("{} must be a number of seconds", var)),
        Err(_) => Ok(default),
    }
}
