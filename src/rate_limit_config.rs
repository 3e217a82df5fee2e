use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted rate limit window (one year).
pub const MAX_WINDOW: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Per-identity fixed window quota
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimiterConfig {
    pub max_requests: u32,
    #[serde(with = "humantime_serde")]
    pub window: Duration,
}

/// Execution queue limits. `concurrency` doubles as the number of task
/// starts allowed per `interval`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueConfig {
    pub concurrency: usize,
    #[serde(with = "humantime_serde")]
    pub interval: Duration,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            max_requests: 10,
            window: Duration::from_secs(60),
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            interval: Duration::from_millis(1000),
        }
    }
}

impl LimiterConfig {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
        }
    }

    /// Window length as a chrono duration, clamped to [`MAX_WINDOW`] so
    /// `now + window_delta()` cannot overflow.
    pub fn window_delta(&self) -> chrono::Duration {
        chrono::Duration::from_std(self.window.min(MAX_WINDOW))
            .unwrap_or_else(|_| chrono::Duration::days(365))
    }

    /// Validate rule parameters
    pub fn validate(&self) -> Result<(), String> {
        if self.max_requests == 0 {
            return Err("Max requests must be greater than 0".to_string());
        }
        if self.window.is_zero() {
            return Err("Window must be greater than 0".to_string());
        }
        if self.window > MAX_WINDOW {
            return Err("Window must be at most 365 days".to_string());
        }
        Ok(())
    }
}

impl QueueConfig {
    pub fn new(concurrency: usize, interval: Duration) -> Self {
        Self {
            concurrency,
            interval,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.concurrency == 0 {
            return Err("Queue concurrency must be greater than 0".to_string());
        }
        if self.interval.is_zero() {
            return Err("Queue interval must be greater than 0".to_string());
        }
        Ok(())
    }
}
