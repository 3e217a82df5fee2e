use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;

/// Terminal state of one dispatch, as counted by [`MetricsCollector`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    Succeeded,
    Failed,
    Denied,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchMetrics {
    pub total_dispatches: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub denied: u64,
    pub since: u64,
}

impl Default for DispatchMetrics {
    fn default() -> Self {
        Self {
            total_dispatches: 0,
            succeeded: 0,
            failed: 0,
            denied: 0,
            since: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

impl DispatchMetrics {
    fn record(&mut self, outcome: DispatchOutcome) {
        self.total_dispatches += 1;
        match outcome {
            DispatchOutcome::Succeeded => self.succeeded += 1,
            DispatchOutcome::Failed => self.failed += 1,
            DispatchOutcome::Denied => self.denied += 1,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct MetricsCollector {
    identity_metrics: Arc<RwLock<HashMap<String, DispatchMetrics>>>,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn record(&self, identity: &str, outcome: DispatchOutcome) {
        let mut metrics = self.identity_metrics.write().await;
        metrics
            .entry(identity.to_string())
            .or_default()
            .record(outcome);
    }

    pub async fn get_identity_metrics(&self, identity: &str) -> Option<DispatchMetrics> {
        let metrics = self.identity_metrics.read().await;
        metrics.get(identity).cloned()
    }

    pub async fn get_global_metrics(&self) -> DispatchMetrics {
        let metrics = self.identity_metrics.read().await;
        let mut global = DispatchMetrics::default();

        for identity_metrics in metrics.values() {
            global.total_dispatches += identity_metrics.total_dispatches;
            global.succeeded += identity_metrics.succeeded;
            global.failed += identity_metrics.failed;
            global.denied += identity_metrics.denied;
            global.since = global.since.min(identity_metrics.since);
        }

        global
    }

    pub async fn identity_count(&self) -> usize {
        self.identity_metrics.read().await.len()
    }
}
