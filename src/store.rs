//! Durable state behind the rate limiter and the usage ledger.
//!
//! The [`CounterStore`] trait is the read/write contract; [`InMemoryStore`]
//! is the default backend and [`RedisStore`](crate::redis_store::RedisStore)
//! persists across restarts.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// One fixed window of admissions for an identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitRecord {
    pub identity: String,
    pub count: u32,
    pub window_reset_at: DateTime<Utc>,
}

impl RateLimitRecord {
    pub fn new(identity: &str, count: u32, window_reset_at: DateTime<Utc>) -> Self {
        Self {
            identity: identity.to_string(),
            count,
            window_reset_at,
        }
    }

    /// A window resetting exactly at `now` is still live.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.window_reset_at < now
    }
}

/// Append-only audit entry for an attempted command execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub identity: String,
    pub scope_id: Option<String>,
    pub command_name: String,
    pub argument_summary: Option<String>,
    pub resource_category: Option<String>,
    pub success: bool,
    pub error_summary: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[async_trait]
pub trait CounterStore: Send + Sync {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitRecord>, StoreError>;

    /// Insert or replace the record keyed by `record.identity`.
    async fn upsert(&self, record: &RateLimitRecord) -> Result<(), StoreError>;

    async fn delete(&self, identity: &str) -> Result<bool, StoreError>;

    /// Remove every record whose window ended before `now`.
    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError>;

    async fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;

    fn backend_name(&self) -> &'static str;
}

/// Process-local backend. Survives nothing but is always reachable.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    records: RwLock<HashMap<String, RateLimitRecord>>,
    usage: RwLock<Vec<UsageRecord>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the usage ledger in append order
    pub async fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.read().await.clone()
    }

    pub async fn record_count(&self) -> usize {
        self.records.read().await.len()
    }
}

#[async_trait]
impl CounterStore for InMemoryStore {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        Ok(self.records.read().await.get(identity).cloned())
    }

    async fn upsert(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .await
            .insert(record.identity.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, identity: &str) -> Result<bool, StoreError> {
        Ok(self.records.write().await.remove(identity).is_some())
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| !record.is_expired(now));
        Ok(before - records.len())
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        self.usage.write().await.push(record.clone());
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}
