use crate::error::StoreError;
use crate::store::{CounterStore, RateLimitRecord, UsageRecord};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::MultiplexedConnection;
use redis::{Client, RedisResult, Script};
use std::sync::LazyLock;
use tokio::sync::Mutex;
use tracing::debug;

/// Keys outlive their window by this much so a sweep can still observe them.
const EXPIRY_GRACE_MS: i64 = 60_000;
const SCAN_BATCH: usize = 200;

/// Deletes KEYS[1] only while it still holds ARGV[1].
static DELETE_IF_UNCHANGED: LazyLock<Script> = LazyLock::new(|| {
    Script::new(
        r"if redis.call('GET', KEYS[1]) == ARGV[1] then
            return redis.call('DEL', KEYS[1])
        end
        return 0",
    )
});

/// Redis-backed [`CounterStore`].
///
/// Rate limit records are JSON strings under `<prefix>:ratelimit:<identity>`;
/// usage records are appended to the `<prefix>:usage` list.
pub struct RedisStore {
    client: Client,
    prefix: String,
    connection: Mutex<Option<MultiplexedConnection>>,
}

impl RedisStore {
    pub fn new(redis_url: &str, prefix: &str) -> Result<Self, StoreError> {
        let client = Client::open(redis_url)
            .map_err(|e| StoreError::Unavailable(format!("Failed to create Redis client: {}", e)))?;

        Ok(Self {
            client,
            prefix: prefix.to_string(),
            connection: Mutex::new(None),
        })
    }

    fn record_key(&self, identity: &str) -> String {
        format!("{}:ratelimit:{}", self.prefix, identity)
    }

    fn usage_key(&self) -> String {
        format!("{}:usage", self.prefix)
    }

    /// Returns the cached connection, opening one if none is cached.
    async fn connection(&self) -> Result<MultiplexedConnection, StoreError> {
        let mut guard = self.connection.lock().await;
        if let Some(conn) = guard.as_ref() {
            return Ok(conn.clone());
        }

        let conn = self.client.get_multiplexed_async_connection().await?;
        *guard = Some(conn.clone());
        Ok(conn)
    }

    async fn delete_if_unchanged(
        &self,
        conn: &mut MultiplexedConnection,
        key: &str,
        expected: &str,
    ) -> Result<bool, StoreError> {
        let result = DELETE_IF_UNCHANGED
            .key(key)
            .arg(expected)
            .invoke_async::<_, i64>(conn)
            .await;
        Ok(self.check(result).await? > 0)
    }

    /// Drops the cached connection after a failure so the next call reconnects.
    async fn check<T>(&self, result: RedisResult<T>) -> Result<T, StoreError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                if e.is_io_error() || e.is_connection_dropped() || e.is_connection_refusal() {
                    self.connection.lock().await.take();
                }
                Err(StoreError::Redis(e))
            }
        }
    }

    async fn scan_record_keys(&self) -> Result<Vec<String>, StoreError> {
        let mut conn = self.connection().await?;
        let pattern = format!("{}:ratelimit:*", self.prefix);
        let mut cursor: u64 = 0;
        let mut keys = Vec::new();

        loop {
            let result = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async::<_, (u64, Vec<String>)>(&mut conn)
                .await;
            let (next, batch) = self.check(result).await?;
            keys.extend(batch);
            if next == 0 {
                break;
            }
            cursor = next;
        }

        Ok(keys)
    }
}

#[async_trait]
impl CounterStore for RedisStore {
    async fn get(&self, identity: &str) -> Result<Option<RateLimitRecord>, StoreError> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("GET")
            .arg(self.record_key(identity))
            .query_async::<_, Option<String>>(&mut conn)
            .await;

        match self.check(result).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    async fn upsert(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let ttl_ms = (record.window_reset_at - Utc::now()).num_milliseconds().max(1) + EXPIRY_GRACE_MS;

        let mut conn = self.connection().await?;
        let result = redis::cmd("SET")
            .arg(self.record_key(&record.identity))
            .arg(json)
            .arg("PX")
            .arg(ttl_ms)
            .query_async::<_, ()>(&mut conn)
            .await;
        self.check(result).await
    }

    async fn delete(&self, identity: &str) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("DEL")
            .arg(self.record_key(identity))
            .query_async::<_, i64>(&mut conn)
            .await;
        Ok(self.check(result).await? > 0)
    }

    async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let keys = self.scan_record_keys().await?;
        let mut conn = self.connection().await?;
        let mut deleted = 0;

        for key in keys {
            let result = redis::cmd("GET")
                .arg(&key)
                .query_async::<_, Option<String>>(&mut conn)
                .await;
            let Some(json) = self.check(result).await? else {
                continue;
            };

            // Unreadable records are treated as expired.
            let expired = serde_json::from_str::<RateLimitRecord>(&json)
                .map(|record| record.is_expired(now))
                .unwrap_or(true);
            if !expired {
                continue;
            }

            // A window opened since the GET changes the value and survives.
            if self.delete_if_unchanged(&mut conn, &key, &json).await? {
                deleted += 1;
            }
        }

        debug!(deleted, "Swept expired rate limit records from Redis");
        Ok(deleted)
    }

    async fn append_usage(&self, record: &UsageRecord) -> Result<(), StoreError> {
        let json = serde_json::to_string(record)?;
        let mut conn = self.connection().await?;
        let result = redis::cmd("RPUSH")
            .arg(self.usage_key())
            .arg(json)
            .query_async::<_, i64>(&mut conn)
            .await;
        self.check(result).await.map(|_| ())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let result = redis::cmd("PING").query_async::<_, String>(&mut conn).await;
        self.check(result).await.map(|_| ())
    }

    fn backend_name(&self) -> &'static str {
        "redis"
    }
}
