//! Admission, execution, classification and logging of one command.
//!
//! ```text
//! parse ─▶ admit ─▶ queue ─▶ handler ─▶ classify ─▶ ledger
//!   │        │                              │
//!   ▼        ▼                              ▼
//! Unknown  Denied                    rate-limited errors re-raised,
//!                                    everything else folded into the result
//! ```

use crate::commands::{CommandContext, CommandRegistry};
use crate::error::DispatchError;
use crate::ledger::{UsageEntry, UsageLedger};
use crate::metrics::{DispatchOutcome, MetricsCollector};
use crate::queue::{ExecutionQueue, QueueError};
use crate::rate_limiter::RateLimiter;
use crate::validation::RequestValidator;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Result handed back to the caller for every dispatch that reached a handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reply: Option<String>,
}

impl DispatchResult {
    fn succeeded(reply: String) -> Self {
        Self {
            success: true,
            error: None,
            reply: Some(reply),
        }
    }

    fn failed(message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            reply: None,
        }
    }
}

/// Splits a raw message into `(command, args)` if it starts with `prefix`.
pub fn parse_invocation(prefix: &str, content: &str) -> Option<(String, String)> {
    let body = content.trim_start().strip_prefix(prefix)?;
    let body = body.trim_start();
    if body.is_empty() {
        return None;
    }

    let (name, args) = match body.split_once(char::is_whitespace) {
        Some((name, args)) => (name, args.trim()),
        None => (body, ""),
    };
    Some((name.to_lowercase(), args.to_string()))
}

pub struct CommandDispatcher {
    registry: Arc<CommandRegistry>,
    limiter: Arc<RateLimiter>,
    queue: Arc<ExecutionQueue>,
    ledger: UsageLedger,
    metrics: MetricsCollector,
}

impl CommandDispatcher {
    pub fn new(
        registry: Arc<CommandRegistry>,
        limiter: Arc<RateLimiter>,
        queue: Arc<ExecutionQueue>,
        ledger: UsageLedger,
        metrics: MetricsCollector,
    ) -> Self {
        Self {
            registry,
            limiter,
            queue,
            ledger,
            metrics,
        }
    }

    /// Run `command_name` for `identity`.
    ///
    /// `Err` is reserved for outcomes the caller renders itself: unknown
    /// commands (no quota consumed, nothing logged), admission denials, and
    /// downstream throttling that outlasted its retries. Every other failure
    /// comes back as `Ok` with `success: false`.
    pub async fn dispatch(
        &self,
        identity: &str,
        scope: Option<&str>,
        command_name: &str,
        raw_args: &str,
    ) -> Result<DispatchResult, DispatchError> {
        let name = RequestValidator::validate_command_name(command_name)?;
        let handler = self
            .registry
            .resolve(&name)
            .ok_or_else(|| DispatchError::UnknownCommand(name.clone()))?;
        let args = RequestValidator::split_args(raw_args);

        let decision = self.limiter.admit(identity).await;
        if !decision.allowed {
            self.metrics.record(identity, DispatchOutcome::Denied).await;
            info!(identity, command = %name, reset_at = %decision.reset_at, "Command denied by rate limit");
            return Err(DispatchError::AdmissionDenied {
                reset_at: decision.reset_at,
                retry_after: decision.retry_after(),
            });
        }

        let ctx = CommandContext {
            identity: identity.to_string(),
            scope: scope.map(str::to_string),
            quota: decision,
        };
        let category = handler.resource_category(&args);

        debug!(identity, command = %name, remaining = decision.remaining, "Queueing command");
        let task_args = args.clone();
        let outcome = self
            .queue
            .submit(async move { handler.execute(&ctx, &task_args).await })
            .await
            .unwrap_or_else(|e| Err(queue_failure(e)));

        let entry = UsageEntry::new(identity, &name, &args)
            .scope(scope)
            .category(category.as_deref());

        match outcome {
            Ok(reply) => {
                self.log_usage(entry).await;
                self.metrics.record(identity, DispatchOutcome::Succeeded).await;
                Ok(DispatchResult::succeeded(reply))
            }
            Err(e) => {
                let summary = e.to_string();
                self.log_usage(entry.failed(&summary)).await;
                self.metrics.record(identity, DispatchOutcome::Failed).await;
                self.classify(identity, &name, e)
            }
        }
    }

    fn classify(
        &self,
        identity: &str,
        command: &str,
        error: DispatchError,
    ) -> Result<DispatchResult, DispatchError> {
        if error.is_rate_limited() {
            warn!(identity, command, kind = error.kind(), error = %error, "Command hit a downstream rate limit");
            return Err(error);
        }

        if let DispatchError::ValidationFailed(reason) = &error {
            debug!(identity, command, reason = %reason, "Command rejected its input");
        } else {
            error!(identity, command, kind = error.kind(), error = %error, "Command failed");
        }
        Ok(DispatchResult::failed(error.user_message()))
    }

    /// Ledger failures are logged and dropped; they never fail the command.
    async fn log_usage(&self, entry: UsageEntry<'_>) {
        if let Err(e) = self.ledger.record(entry).await {
            warn!(
                identity = entry.identity,
                command = entry.command_name,
                error = %e,
                "Failed to record command usage"
            );
        }
    }
}

fn queue_failure(err: QueueError) -> DispatchError {
    DispatchError::Internal(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::CommandHandler;
    use crate::error::StoreError;
    use crate::rate_limit_config::{LimiterConfig, QueueConfig};
    use crate::store::{CounterStore, InMemoryStore, RateLimitRecord, UsageRecord};
    use async_trait::async_trait;
    use chrono::{DateTime, Utc};
    use std::time::Duration;

    struct Throttled;

    #[async_trait]
    impl CommandHandler for Throttled {
        fn name(&self) -> &'static str {
            "gif"
        }

        async fn execute(&self, _ctx: &CommandContext, _args: &[String]) -> Result<String, DispatchError> {
            Err(DispatchError::UpstreamUnavailable {
                service: "search".to_string(),
                attempts: 2,
                retry_after: Some(Duration::from_secs(5)),
            })
        }
    }

    /// Gives up on the first 429 from its collaborator.
    struct NoRetry;

    #[async_trait]
    impl CommandHandler for NoRetry {
        fn name(&self) -> &'static str {
            "post"
        }

        async fn execute(&self, _ctx: &CommandContext, _args: &[String]) -> Result<String, DispatchError> {
            Err(DispatchError::DownstreamThrottled {
                service: "delivery".to_string(),
                retry_after: Some(Duration::from_secs(2)),
            })
        }
    }

    struct Explodes;

    #[async_trait]
    impl CommandHandler for Explodes {
        fn name(&self) -> &'static str {
            "boom"
        }

        async fn execute(&self, _ctx: &CommandContext, _args: &[String]) -> Result<String, DispatchError> {
            panic!("handler bug")
        }
    }

    /// Counters work; every usage append fails.
    #[derive(Default)]
    struct NoLedgerStore(InMemoryStore);

    #[async_trait]
    impl CounterStore for NoLedgerStore {
        async fn get(&self, identity: &str) -> Result<Option<RateLimitRecord>, StoreError> {
            self.0.get(identity).await
        }

        async fn upsert(&self, record: &RateLimitRecord) -> Result<(), StoreError> {
            self.0.upsert(record).await
        }

        async fn delete(&self, identity: &str) -> Result<bool, StoreError> {
            self.0.delete(identity).await
        }

        async fn delete_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
            self.0.delete_expired(now).await
        }

        async fn append_usage(&self, _record: &UsageRecord) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("ledger offline".to_string()))
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }

        fn backend_name(&self) -> &'static str {
            "no-ledger"
        }
    }

    fn dispatcher_with(store: Arc<dyn CounterStore>, max_requests: u32) -> CommandDispatcher {
        let mut registry = CommandRegistry::with_builtins();
        registry.register(Arc::new(Throttled));
        registry.register(Arc::new(Explodes));
        registry.register(Arc::new(NoRetry));

        CommandDispatcher::new(
            Arc::new(registry),
            Arc::new(RateLimiter::new(
                store.clone(),
                LimiterConfig::new(max_requests, Duration::from_secs(60)),
            )),
            Arc::new(ExecutionQueue::new(&QueueConfig::new(2, Duration::from_millis(10)))),
            UsageLedger::new(store),
            MetricsCollector::new(),
        )
    }

    #[tokio::test]
    async fn test_downstream_exhaustion_is_reraised() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), 5);

        let err = dispatcher.dispatch("u1", None, "gif", "cats").await.unwrap_err();
        assert!(matches!(err, DispatchError::UpstreamUnavailable { attempts: 2, .. }));

        let usage = store.usage_records().await;
        assert_eq!(usage.len(), 1);
        assert!(!usage[0].success);
    }

    #[tokio::test]
    async fn test_handler_throttling_is_reraised() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), 5);

        let err = dispatcher.dispatch("u1", None, "post", "hello").await.unwrap_err();
        assert!(matches!(err, DispatchError::DownstreamThrottled { .. }));
        assert_eq!(err.retry_after_secs(), Some(2));
        assert_eq!(store.usage_records().await.len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_handler_is_isolated() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = dispatcher_with(store, 5);

        let result = dispatcher.dispatch("u1", None, "boom", "").await.unwrap();
        assert!(!result.success);

        let result = dispatcher.dispatch("u1", None, "ping", "").await.unwrap();
        assert_eq!(result.reply.as_deref(), Some("pong"));
    }

    #[tokio::test]
    async fn test_ledger_failure_does_not_fail_command() {
        let dispatcher = dispatcher_with(Arc::new(NoLedgerStore::default()), 5);

        let result = dispatcher.dispatch("u1", None, "ping", "").await.unwrap();
        assert!(result.success);
    }

    #[tokio::test]
    async fn test_malformed_name_is_unknown_without_quota() {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = dispatcher_with(store.clone(), 1);

        let err = dispatcher.dispatch("u1", None, "../etc", "").await.unwrap_err();
        assert!(matches!(err, DispatchError::UnknownCommand(_)));

        assert_eq!(store.record_count().await, 0);
        assert!(dispatcher.dispatch("u1", None, "ping", "").await.is_ok());
    }

    #[test]
    fn test_parse_invocation() {
        assert_eq!(
            parse_invocation("!", "!Search  cute cats "),
            Some(("search".to_string(), "cute cats".to_string()))
        );
        assert_eq!(
            parse_invocation("!", "  !ping"),
            Some(("ping".to_string(), String::new()))
        );
        assert_eq!(
            parse_invocation("gb ", "gb quota"),
            Some(("quota".to_string(), String::new()))
        );
        assert_eq!(parse_invocation("!", "hello there"), None);
        assert_eq!(parse_invocation("!", "!   "), None);
    }
}
