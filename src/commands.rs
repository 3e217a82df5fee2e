//! Command handlers and the name/alias registry the dispatcher routes through.

use crate::error::DispatchError;
use crate::rate_limiter::Decision;
use crate::transport::MediaDownloader;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;

/// What a handler knows about the invocation it is serving.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub identity: String,
    pub scope: Option<String>,
    /// Admission decision that let this invocation through
    pub quota: Decision,
}

#[async_trait]
pub trait CommandHandler: Send + Sync {
    fn name(&self) -> &'static str;

    fn aliases(&self) -> &'static [&'static str] {
        &[]
    }

    /// Grouping recorded in the usage ledger, e.g. the media category.
    fn resource_category(&self, _args: &[String]) -> Option<String> {
        None
    }

    async fn execute(&self, ctx: &CommandContext, args: &[String]) -> Result<String, DispatchError>;
}

#[derive(Default, Clone)]
pub struct CommandRegistry {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
    names: Vec<&'static str>,
}

impl CommandRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry preloaded with `ping`, `quota` and `echo`.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(Ping));
        registry.register(Arc::new(QuotaCommand));
        registry.register(Arc::new(Echo));
        registry
    }

    /// Register under the handler's name and aliases. Later registrations
    /// win on conflicts.
    pub fn register(&mut self, handler: Arc<dyn CommandHandler>) {
        self.names.push(handler.name());
        for key in std::iter::once(handler.name()).chain(handler.aliases().iter().copied()) {
            self.handlers.insert(key.to_lowercase(), handler.clone());
        }
    }

    /// Look up by name or alias, ignoring case.
    pub fn resolve(&self, name: &str) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&name.to_lowercase()).cloned()
    }

    pub fn command_names(&self) -> &[&'static str] {
        &self.names
    }
}

pub struct Ping;

#[async_trait]
impl CommandHandler for Ping {
    fn name(&self) -> &'static str {
        "ping"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["p"]
    }

    async fn execute(&self, _ctx: &CommandContext, _args: &[String]) -> Result<String, DispatchError> {
        Ok("pong".to_string())
    }
}

/// Reports how many commands the caller has left in the current window.
pub struct QuotaCommand;

#[async_trait]
impl CommandHandler for QuotaCommand {
    fn name(&self) -> &'static str {
        "quota"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["limits"]
    }

    async fn execute(&self, ctx: &CommandContext, _args: &[String]) -> Result<String, DispatchError> {
        let secs = ctx.quota.retry_after().as_secs();
        Ok(format!(
            "{} commands left, window resets in {}s",
            ctx.quota.remaining, secs
        ))
    }
}

pub struct Echo;

#[async_trait]
impl CommandHandler for Echo {
    fn name(&self) -> &'static str {
        "echo"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["say"]
    }

    async fn execute(&self, _ctx: &CommandContext, args: &[String]) -> Result<String, DispatchError> {
        if args.is_empty() {
            return Err(DispatchError::ValidationFailed(
                "Give me something to say".to_string(),
            ));
        }
        Ok(args.join(" "))
    }
}

/// Downloads media over HTTP(S) and reports its size.
pub struct FetchMedia {
    downloader: Arc<MediaDownloader>,
}

impl FetchMedia {
    pub fn new(downloader: Arc<MediaDownloader>) -> Self {
        Self { downloader }
    }
}

#[async_trait]
impl CommandHandler for FetchMedia {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn aliases(&self) -> &'static [&'static str] {
        &["media"]
    }

    fn resource_category(&self, _args: &[String]) -> Option<String> {
        Some("media".to_string())
    }

    async fn execute(&self, _ctx: &CommandContext, args: &[String]) -> Result<String, DispatchError> {
        let url = match args {
            [url] if url.starts_with("http://") || url.starts_with("https://") => url,
            _ => {
                return Err(DispatchError::ValidationFailed(
                    "Usage: fetch <http(s) url>".to_string(),
                ))
            }
        };

        let bytes = self.downloader.download(url).await?;
        Ok(format!("Fetched {} bytes", bytes.len()))
    }
}
