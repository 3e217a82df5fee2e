use std::sync::Arc;
use std::time::{Instant, SystemTime};
use serde::{Deserialize, Serialize};

use crate::queue::{ExecutionQueue, QueueStats};
use crate::store::CounterStore;

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    pub status: String,
    pub timestamp: u64,
    pub version: String,
    pub uptime_seconds: u64,
    pub dependencies: DependencyStatus,
    pub queue: QueueStats,
}

#[derive(Debug, Serialize)]
pub struct DependencyStatus {
    pub store: ServiceStatus,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ServiceStatus {
    pub backend: String,
    pub status: String,
    pub response_time_ms: u64,
    pub error: Option<String>,
}

impl ServiceStatus {
    pub fn is_healthy(&self) -> bool {
        self.status == "healthy"
    }
}

pub struct HealthChecker {
    store: Arc<dyn CounterStore>,
    started: Instant,
}

impl HealthChecker {
    /// `started` is when the service came up; uptime counts from it.
    pub fn new(store: Arc<dyn CounterStore>, started: Instant) -> Self {
        Self { store, started }
    }

    pub async fn check_health(&self, queue: &ExecutionQueue) -> HealthStatus {
        let now = SystemTime::now();
        let uptime = self.started.elapsed().as_secs();

        let store_status = self.check_store().await;

        let overall_status = if store_status.is_healthy() {
            "healthy"
        } else {
            "degraded" // Admission fails open while the store is down
        };

        HealthStatus {
            status: overall_status.to_string(),
            timestamp: now.duration_since(SystemTime::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: uptime,
            dependencies: DependencyStatus {
                store: store_status,
            },
            queue: queue.stats(),
        }
    }

    pub async fn check_store(&self) -> ServiceStatus {
        let start = Instant::now();
        let result = self.store.ping().await;
        let response_time_ms = start.elapsed().as_millis() as u64;

        match result {
            Ok(()) => ServiceStatus {
                backend: self.store.backend_name().to_string(),
                status: "healthy".to_string(),
                response_time_ms,
                error: None,
            },
            Err(e) => ServiceStatus {
                backend: self.store.backend_name().to_string(),
                status: "unavailable".to_string(),
                response_time_ms,
                error: Some(e.to_string()),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit_config::QueueConfig;
    use crate::store::InMemoryStore;
    use std::time::Duration;

    #[tokio::test]
    async fn test_memory_store_is_healthy() {
        let checker = HealthChecker::new(Arc::new(InMemoryStore::new()), Instant::now());
        let queue = ExecutionQueue::new(&QueueConfig::default());

        let status = checker.check_health(&queue).await;
        assert_eq!(status.status, "healthy");
        assert_eq!(status.dependencies.store.backend, "memory");
        assert_eq!(status.queue.concurrency, 3);
    }

    #[tokio::test]
    async fn test_uptime_counts_from_service_start() {
        let started = Instant::now()
            .checked_sub(Duration::from_secs(90))
            .unwrap();
        let checker = HealthChecker::new(Arc::new(InMemoryStore::new()), started);
        let queue = ExecutionQueue::new(&QueueConfig::default());

        let status = checker.check_health(&queue).await;
        assert!(status.uptime_seconds >= 90);
    }

    #[test]
    fn test_service_status_serialization() {
        let status = ServiceStatus {
            backend: "redis".to_string(),
            status: "unavailable".to_string(),
            response_time_ms: 5,
            error: Some("connection refused".to_string()),
        };

        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains("unavailable"));
        assert!(json.contains("connection refused"));
    }
}
