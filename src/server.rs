use crate::handlers::{
    delete_rate_limit, execute_command, get_config, get_rate_limit, health_check, metrics,
    post_message, readiness_check, AppState,
};
use crate::middleware::logging_middleware;
use axum::routing::{get, post};
use axum::{middleware, Router};
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Build the HTTP router over shared state.
pub fn create_app(state: AppState) -> Router {
    Router::new()
        // Command endpoints
        .route("/commands/:name", post(execute_command))
        .route("/messages", post(post_message))
        // Quota endpoints
        .route("/rate-limit/:identity", get(get_rate_limit).delete(delete_rate_limit))
        // Operational endpoints
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
        .route("/metrics", get(metrics))
        .route("/config", get(get_config))
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive())
                .layer(middleware::from_fn(logging_middleware)),
        )
}

pub struct Server {
    app: Router,
    addr: SocketAddr,
}

impl Server {
    pub fn new(state: AppState, addr: SocketAddr) -> Self {
        Self {
            app: create_app(state),
            addr,
        }
    }

    /// Serve until Ctrl+C or SIGTERM. In-flight requests are allowed to finish.
    pub async fn run(self) -> std::io::Result<()> {
        let listener = tokio::net::TcpListener::bind(self.addr).await?;

        tracing::info!(addr = %self.addr, "cmdgate server listening");
        tracing::info!("Health check available at /health");
        tracing::info!("Readiness check available at /ready");

        axum::serve(
            listener,
            self.app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal())
        .await
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
