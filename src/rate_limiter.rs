//! Per-identity fixed window admission control.
//!
//! Windows are fixed, not sliding: a burst straddling a window boundary can
//! admit up to twice `max_requests` in a short span. Store outages fail open.

use crate::error::StoreError;
use crate::rate_limit_config::LimiterConfig;
use crate::store::{CounterStore, RateLimitRecord};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Decision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

impl Decision {
    /// Time left until the window resets, zero if already past.
    pub fn retry_after(&self) -> Duration {
        (self.reset_at - Utc::now()).to_std().unwrap_or(Duration::ZERO)
    }
}

/// Read-only view of an identity's quota
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Quota {
    pub limit: u32,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

pub struct RateLimiter {
    store: Arc<dyn CounterStore>,
    config: LimiterConfig,
    locks: IdentityLocks,
    fail_open: AtomicU64,
}

impl RateLimiter {
    pub fn new(store: Arc<dyn CounterStore>, config: LimiterConfig) -> Self {
        Self {
            store,
            config,
            locks: IdentityLocks::default(),
            fail_open: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &LimiterConfig {
        &self.config
    }

    /// Check and consume one unit of quota for `identity`.
    ///
    /// Never errors: if the store cannot be reached the request is allowed
    /// with a full quota and the event is logged and counted.
    pub async fn admit(&self, identity: &str) -> Decision {
        let _guard = self.locks.acquire(identity).await;
        let now = Utc::now();

        match self.try_admit(identity, now).await {
            Ok(decision) => {
                if !decision.allowed {
                    debug!(identity, reset_at = %decision.reset_at, "Admission denied");
                }
                decision
            }
            Err(e) => {
                self.record_fail_open(identity, "admit", &e);
                self.open_decision(now)
            }
        }
    }

    async fn try_admit(&self, identity: &str, now: DateTime<Utc>) -> Result<Decision, StoreError> {
        let max = self.config.max_requests;

        match self.store.get(identity).await? {
            Some(record) if !record.is_expired(now) => {
                if record.count >= max {
                    return Ok(Decision {
                        allowed: false,
                        remaining: 0,
                        reset_at: record.window_reset_at,
                    });
                }

                let updated = RateLimitRecord {
                    count: record.count + 1,
                    ..record
                };
                self.store.upsert(&updated).await?;

                Ok(Decision {
                    allowed: true,
                    remaining: max - updated.count,
                    reset_at: updated.window_reset_at,
                })
            }
            _ => {
                let record = RateLimitRecord::new(identity, 1, now + self.config.window_delta());
                self.store.upsert(&record).await?;

                Ok(Decision {
                    allowed: true,
                    remaining: max.saturating_sub(1),
                    reset_at: record.window_reset_at,
                })
            }
        }
    }

    /// Remaining quota for `identity` without consuming any.
    pub async fn remaining_for(&self, identity: &str) -> Quota {
        let now = Utc::now();
        let max = self.config.max_requests;
        let fresh = Quota {
            limit: max,
            remaining: max,
            reset_at: now + self.config.window_delta(),
        };

        match self.store.get(identity).await {
            Ok(Some(record)) if !record.is_expired(now) => Quota {
                limit: max,
                remaining: max.saturating_sub(record.count),
                reset_at: record.window_reset_at,
            },
            Ok(_) => fresh,
            Err(e) => {
                self.record_fail_open(identity, "remaining_for", &e);
                fresh
            }
        }
    }

    /// Forget the current window for `identity`.
    pub async fn reset(&self, identity: &str) -> Result<bool, StoreError> {
        let _guard = self.locks.acquire(identity).await;
        self.store.delete(identity).await
    }

    /// Delete every record whose window has ended. Safe to run alongside
    /// `admit`: a record removed here is one `admit` would replace anyway.
    pub async fn sweep_expired(&self) -> Result<usize, StoreError> {
        let deleted = self.store.delete_expired(Utc::now()).await?;
        let pruned = self.locks.prune();

        if deleted > 0 {
            info!(deleted, pruned_locks = pruned, "Swept expired rate limit records");
        }
        Ok(deleted)
    }

    /// Number of checks answered without the store since startup
    pub fn fail_open_count(&self) -> u64 {
        self.fail_open.load(Ordering::Relaxed)
    }

    fn open_decision(&self, now: DateTime<Utc>) -> Decision {
        Decision {
            allowed: true,
            remaining: self.config.max_requests,
            reset_at: now + self.config.window_delta(),
        }
    }

    fn record_fail_open(&self, identity: &str, operation: &str, error: &StoreError) {
        self.fail_open.fetch_add(1, Ordering::Relaxed);
        warn!(
            target: "cmdgate::rate_limiter",
            identity,
            operation,
            backend = self.store.backend_name(),
            error = %error,
            "rate limit store unavailable, failing open"
        );
    }
}

/// Serialises admission checks per identity so the read-then-write of a
/// record is never interleaved for the same key.
#[derive(Default)]
struct IdentityLocks {
    inner: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl IdentityLocks {
    async fn acquire(&self, identity: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            map.entry(identity.to_string()).or_default().clone()
        };
        lock.lock_owned().await
    }

    /// Drop locks nobody is holding or waiting on.
    fn prune(&self) -> usize {
        let mut map = self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let before = map.len();
        map.retain(|_, lock| Arc::strong_count(lock) > 1);
        before - map.len()
    }
}
