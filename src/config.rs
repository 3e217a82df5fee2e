use crate::rate_limit_config::{LimiterConfig, QueueConfig};
use clap::Parser;
use std::net::SocketAddr;
use std::time::Duration;

/// Process configuration. Every flag can also come from the environment
/// (or a `.env` file).
#[derive(Debug, Clone, Parser)]
#[command(name = "cmdgate", version, about)]
pub struct Config {
    /// Server bind address
    #[arg(long, env = "BIND_ADDR", default_value = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Redis connection URL; the in-memory store is used when unset
    #[arg(long, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Prefix for every Redis key this service writes
    #[arg(long, env = "REDIS_PREFIX", default_value = "cmdgate")]
    pub redis_prefix: String,

    /// Commands each identity may run per window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 10)]
    pub rate_limit_max_requests: u32,

    /// Rate limit window length in milliseconds
    #[arg(long, env = "RATE_LIMIT_WINDOW_MS", default_value_t = 60_000)]
    pub rate_limit_window_ms: u64,

    /// Commands executing at once, and task starts allowed per queue interval
    #[arg(long, env = "QUEUE_CONCURRENCY", default_value_t = 3)]
    pub queue_concurrency: usize,

    /// Queue start-cap interval in milliseconds
    #[arg(long, env = "QUEUE_INTERVAL_MS", default_value_t = 1000)]
    pub queue_interval_ms: u64,

    /// Seconds between sweeps of expired rate limit records
    #[arg(long, env = "SWEEP_INTERVAL_SECS", default_value_t = 60)]
    pub sweep_interval_secs: u64,

    /// Prefix that marks a chat message as a command
    #[arg(long, env = "COMMAND_PREFIX", default_value = "!")]
    pub command_prefix: String,

    /// Per-attempt timeout for outbound HTTP calls in milliseconds
    #[arg(long, env = "OUTBOUND_TIMEOUT_MS", default_value_t = 10_000)]
    pub outbound_timeout_ms: u64,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([127, 0, 0, 1], 3000)),
            redis_url: None,
            redis_prefix: "cmdgate".to_string(),
            rate_limit_max_requests: 10,
            rate_limit_window_ms: 60_000,
            queue_concurrency: 3,
            queue_interval_ms: 1000,
            sweep_interval_secs: 60,
            command_prefix: "!".to_string(),
            outbound_timeout_ms: 10_000,
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Parse flags, falling back to environment variables
    pub fn from_env() -> Self {
        Config::parse()
    }

    pub fn limiter(&self) -> LimiterConfig {
        LimiterConfig::new(
            self.rate_limit_max_requests,
            Duration::from_millis(self.rate_limit_window_ms),
        )
    }

    pub fn queue(&self) -> QueueConfig {
        QueueConfig::new(
            self.queue_concurrency,
            Duration::from_millis(self.queue_interval_ms),
        )
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn outbound_timeout(&self) -> Duration {
        Duration::from_millis(self.outbound_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_defaults() {
        let config = Config::try_parse_from([
            "cmdgate",
            "--rate-limit-max-requests",
            "2",
            "--rate-limit-window-ms",
            "1000",
            "--queue-concurrency",
            "5",
        ])
        .unwrap();

        assert_eq!(config.limiter(), LimiterConfig::new(2, Duration::from_secs(1)));
        assert_eq!(config.queue().concurrency, 5);
    }

    #[test]
    fn test_default_matches_documented_values() {
        let config = Config::default();
        assert_eq!(config.limiter(), LimiterConfig::default());
        assert_eq!(config.queue(), QueueConfig::default());
        assert_eq!(config.sweep_interval(), Duration::from_secs(60));
    }
}
