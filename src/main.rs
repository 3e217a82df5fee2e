use anyhow::{Context, Result};
use cmdgate::config::Config;
use cmdgate::config_validator::ConfigValidator;
use cmdgate::server::Server;
use cmdgate::throttler::Throttler;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("cmdgate={},tower_http=debug", config.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    ConfigValidator::validate(&config).context("Invalid configuration")?;

    tracing::info!(
        bind_addr = %config.bind_addr,
        store = if config.redis_url.is_some() { "redis" } else { "memory" },
        max_requests = config.rate_limit_max_requests,
        window_ms = config.rate_limit_window_ms,
        concurrency = config.queue_concurrency,
        "Starting cmdgate"
    );

    let addr = config.bind_addr;
    let sweep_every = config.sweep_interval();
    let throttler = Arc::new(Throttler::new(config).context("Failed to build service")?);
    let sweeper = throttler.spawn_sweeper(sweep_every);

    let served = Server::new(throttler.clone(), addr).run().await;

    // Let accepted commands finish before exiting
    sweeper.abort();
    throttler.shutdown().await;

    served.context("Server error")
}
