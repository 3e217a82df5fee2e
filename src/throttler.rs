use crate::commands::{CommandRegistry, FetchMedia};
use crate::config::Config;
use crate::dispatcher::CommandDispatcher;
use crate::error::DispatchError;
use crate::key_generator::IdentityExtractor;
use crate::ledger::UsageLedger;
use crate::metrics::MetricsCollector;
use crate::queue::ExecutionQueue;
use crate::rate_limiter::RateLimiter;
use crate::redis_store::RedisStore;
use crate::store::{CounterStore, InMemoryStore};
use crate::transport::MediaDownloader;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

/// Main service wiring: one store, limiter, queue, ledger and dispatcher
/// built from [`Config`] at startup and shared by every request.
pub struct Throttler {
    config: Config,
    store: Arc<dyn CounterStore>,
    rate_limiter: Arc<RateLimiter>,
    queue: Arc<ExecutionQueue>,
    dispatcher: CommandDispatcher,
    registry: Arc<CommandRegistry>,
    metrics: MetricsCollector,
    identity: IdentityExtractor,
    downloader: Arc<MediaDownloader>,
    started: Instant,
}

impl Throttler {
    /// Build with the store selected by `config.redis_url`.
    pub fn new(config: Config) -> Result<Self, DispatchError> {
        let store: Arc<dyn CounterStore> = match &config.redis_url {
            Some(url) => Arc::new(RedisStore::new(url, &config.redis_prefix)?),
            None => Arc::new(InMemoryStore::new()),
        };
        Self::with_store(config, store, CommandRegistry::with_builtins())
    }

    /// `registry` also gets the `fetch` command, backed by a downloader
    /// using `config.outbound_timeout()` per attempt.
    pub fn with_store(
        config: Config,
        store: Arc<dyn CounterStore>,
        mut registry: CommandRegistry,
    ) -> Result<Self, DispatchError> {
        let downloader = Arc::new(MediaDownloader::new(config.outbound_timeout())?);
        registry.register(Arc::new(FetchMedia::new(downloader.clone())));

        let rate_limiter = Arc::new(RateLimiter::new(store.clone(), config.limiter()));
        let queue = Arc::new(ExecutionQueue::new(&config.queue()));
        let registry = Arc::new(registry);
        let metrics = MetricsCollector::new();

        let dispatcher = CommandDispatcher::new(
            registry.clone(),
            rate_limiter.clone(),
            queue.clone(),
            UsageLedger::new(store.clone()),
            metrics.clone(),
        );

        Ok(Self {
            config,
            store,
            rate_limiter,
            queue,
            dispatcher,
            registry,
            metrics,
            identity: IdentityExtractor::default(),
            downloader,
            started: Instant::now(),
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn queue(&self) -> &ExecutionQueue {
        &self.queue
    }

    pub fn dispatcher(&self) -> &CommandDispatcher {
        &self.dispatcher
    }

    pub fn registry(&self) -> &CommandRegistry {
        &self.registry
    }

    pub fn metrics(&self) -> &MetricsCollector {
        &self.metrics
    }

    pub fn identity(&self) -> &IdentityExtractor {
        &self.identity
    }

    pub fn downloader(&self) -> &Arc<MediaDownloader> {
        &self.downloader
    }

    /// When this service was built, for uptime reporting.
    pub fn started(&self) -> Instant {
        self.started
    }

    /// Periodically delete expired rate limit records.
    pub fn spawn_sweeper(&self, every: Duration) -> JoinHandle<()> {
        let limiter = self.rate_limiter.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(every);
            // The first tick fires immediately; skip it.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = limiter.sweep_expired().await {
                    warn!(error = %e, "Rate limit sweep failed");
                }
            }
        })
    }

    /// Refuse new commands and wait for queued ones to finish.
    pub async fn shutdown(&self) {
        self.queue.close();
        let pending = self.queue.stats().outstanding;
        if pending > 0 {
            info!(pending, "Draining execution queue");
        }
        self.queue.drain().await;
        info!("Execution queue drained");
    }
}
