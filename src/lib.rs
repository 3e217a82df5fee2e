pub mod commands;
pub mod config;
pub mod config_validator;
pub mod dispatcher;
pub mod error;
pub mod handlers;
pub mod health;
pub mod key_generator;
pub mod ledger;
pub mod metrics;
pub mod middleware;
pub mod queue;
pub mod rate_limit_config;
pub mod rate_limiter;
pub mod redis_store;
pub mod response;
pub mod retry;
pub mod server;
pub mod store;
pub mod throttler;
pub mod transport;
pub mod validation;

pub use config::Config;
pub use dispatcher::{CommandDispatcher, DispatchResult};
pub use error::{DispatchError, Result, StoreError};
pub use rate_limiter::RateLimiter;
pub use server::create_app;
pub use throttler::Throttler;
