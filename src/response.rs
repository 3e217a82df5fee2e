use crate::config::Config;
use crate::rate_limit_config::{LimiterConfig, QueueConfig};
use crate::rate_limiter::Quota;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Serialize)]
pub struct QuotaResponse {
    pub identity: String,
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl QuotaResponse {
    pub fn new(identity: &str, quota: Quota) -> Self {
        Self {
            identity: identity.to_string(),
            limit: quota.limit,
            remaining: quota.remaining,
            reset_at: quota.reset_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ResetResponse {
    pub identity: String,
    pub cleared: bool,
}

/// Effective settings, minus connection strings.
#[derive(Debug, Serialize)]
pub struct ConfigResponse {
    pub store: String,
    pub command_prefix: String,
    pub commands: Vec<String>,
    pub rate_limit: LimiterConfig,
    pub queue: QueueConfig,
    #[serde(with = "humantime_serde")]
    pub outbound_timeout: Duration,
}

impl ConfigResponse {
    pub fn current(config: &Config, store: &str, commands: &[&str]) -> Self {
        Self {
            store: store.to_string(),
            command_prefix: config.command_prefix.clone(),
            commands: commands.iter().map(|c| c.to_string()).collect(),
            rate_limit: config.limiter(),
            queue: config.queue(),
            outbound_timeout: config.outbound_timeout(),
        }
    }
}
