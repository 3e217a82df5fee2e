//! Outbound collaborators and the retry policy applied to each of them.
//!
//! The search API and the delivery platform are reached through the
//! [`SearchTransport`] and [`DeliveryTransport`] traits; media downloads go
//! through [`MediaDownloader`]. Every call site owns a [`BackoffRetrier`]
//! tuned to how that collaborator signals throttling.

pub mod download;

use crate::error::DispatchError;
use crate::retry::{BackoffRetrier, RetryError};
use async_trait::async_trait;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

pub use download::MediaDownloader;

const TOO_MANY_REQUESTS: u16 = 429;

pub const SEARCH_DEFAULT_WAIT: Duration = Duration::from_millis(5000);
pub const DELIVERY_DEFAULT_WAIT: Duration = Duration::from_millis(2000);
pub const DOWNLOAD_BACKOFF_STEP: Duration = Duration::from_millis(2000);
pub const DOWNLOAD_BACKOFF_CAP: Duration = Duration::from_millis(10_000);
pub const MAX_SEARCH_RESULTS: usize = 50;

/// Failure of an HTTP-style outbound call.
#[derive(Debug, Clone, Error)]
#[error("{service} request failed: {message}")]
pub struct ApiError {
    pub service: &'static str,
    pub status: Option<u16>,
    pub retry_after: Option<Duration>,
    pub timed_out: bool,
    pub message: String,
}

impl ApiError {
    pub fn new(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            service,
            status: None,
            retry_after: None,
            timed_out: false,
            message: message.into(),
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Option<Duration>) -> Self {
        self.retry_after = retry_after;
        self
    }

    pub fn timeout(service: &'static str, message: impl Into<String>) -> Self {
        Self {
            timed_out: true,
            ..Self::new(service, message)
        }
    }

    pub fn from_reqwest(service: &'static str, err: reqwest::Error) -> Self {
        let mut api_error = if err.is_timeout() {
            Self::timeout(service, err.to_string())
        } else {
            Self::new(service, err.to_string())
        };
        api_error.status = err.status().map(|s| s.as_u16());
        api_error
    }

    pub fn is_too_many_requests(&self) -> bool {
        self.status == Some(TOO_MANY_REQUESTS)
    }
}

/// Failure reported by the delivery platform.
#[derive(Debug, Clone, Error)]
#[error("delivery failed: {message}")]
pub struct DeliveryError {
    pub throttled: bool,
    pub retry_after: Option<Duration>,
    pub message: String,
}

impl DeliveryError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            throttled: false,
            retry_after: None,
            message: message.into(),
        }
    }

    pub fn throttled(retry_after: Option<Duration>) -> Self {
        Self {
            throttled: true,
            retry_after,
            message: "rate limited by platform".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub id: String,
    pub title: String,
    pub url: String,
    pub category: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryPayload {
    pub content: String,
    pub attachment_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryReceipt {
    pub message_id: String,
}

#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn search(
        &self,
        query: &str,
        category: &str,
        limit: usize,
    ) -> Result<Vec<MediaDescriptor>, ApiError>;

    async fn get_by_id(&self, id: &str) -> Result<MediaDescriptor, ApiError>;
}

#[async_trait]
pub trait DeliveryTransport: Send + Sync {
    async fn send(
        &self,
        target: &str,
        payload: &DeliveryPayload,
    ) -> Result<DeliveryReceipt, DeliveryError>;
}

/// Reads a `Retry-After` header given in whole seconds.
pub fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Search API: 429 is throttling; wait for `Retry-After` or 5s; one retry.
pub fn search_retrier() -> BackoffRetrier<ApiError> {
    BackoffRetrier::new(
        "search",
        2,
        SEARCH_DEFAULT_WAIT,
        ApiError::is_too_many_requests,
        |e: &ApiError, _| e.retry_after,
    )
}

/// Delivery platform: its own throttled flag; wait for its hint or 2s; one retry.
pub fn delivery_retrier() -> BackoffRetrier<DeliveryError> {
    BackoffRetrier::new(
        "delivery",
        2,
        DELIVERY_DEFAULT_WAIT,
        |e: &DeliveryError| e.throttled,
        |e: &DeliveryError, _| e.retry_after,
    )
}

/// Media download: 429 or a timed out attempt; three attempts in total.
pub fn download_retrier() -> BackoffRetrier<ApiError> {
    BackoffRetrier::new(
        "download",
        3,
        DOWNLOAD_BACKOFF_STEP,
        is_download_retryable,
        download_backoff,
    )
}

pub fn is_download_retryable(error: &ApiError) -> bool {
    error.is_too_many_requests() || error.timed_out
}

/// `Retry-After` when the server sent one, otherwise `(attempt + 1) * 2s`
/// capped at 10s.
pub fn download_backoff(error: &ApiError, attempt: u32) -> Option<Duration> {
    error
        .retry_after
        .or_else(|| Some((DOWNLOAD_BACKOFF_STEP * (attempt + 1)).min(DOWNLOAD_BACKOFF_CAP)))
}

/// Only a collaborator that was still answering 429 counts as unavailable;
/// a download that kept timing out is a plain transfer failure.
impl From<RetryError<ApiError>> for DispatchError {
    fn from(err: RetryError<ApiError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } if source.is_too_many_requests() => {
                DispatchError::UpstreamUnavailable {
                    service: source.service.to_string(),
                    attempts,
                    retry_after: source.retry_after,
                }
            }
            RetryError::Exhausted { attempts, source } => DispatchError::TransferFailed(format!(
                "{} (gave up after {} attempts)",
                source, attempts
            )),
            RetryError::Failed(e) => DispatchError::TransferFailed(e.to_string()),
        }
    }
}

impl From<RetryError<DeliveryError>> for DispatchError {
    fn from(err: RetryError<DeliveryError>) -> Self {
        match err {
            RetryError::Exhausted { attempts, source } => DispatchError::UpstreamUnavailable {
                service: "delivery".to_string(),
                attempts,
                retry_after: source.retry_after,
            },
            RetryError::Failed(e) => DispatchError::TransferFailed(e.to_string()),
        }
    }
}

/// Search transport with input checks and the search retry policy applied.
pub struct RetryingSearch<T> {
    inner: T,
    retrier: BackoffRetrier<ApiError>,
}

impl<T: SearchTransport> RetryingSearch<T> {
    pub fn new(inner: T) -> Self {
        Self::with_retrier(inner, search_retrier())
    }

    pub fn with_retrier(inner: T, retrier: BackoffRetrier<ApiError>) -> Self {
        Self { inner, retrier }
    }

    pub async fn search(
        &self,
        query: &str,
        category: &str,
        limit: usize,
    ) -> Result<Vec<MediaDescriptor>, DispatchError> {
        let query = query.trim();
        if query.is_empty() {
            return Err(DispatchError::ValidationFailed(
                "Please provide a search term".to_string(),
            ));
        }
        let limit = limit.clamp(1, MAX_SEARCH_RESULTS);

        Ok(self
            .retrier
            .run(|_| self.inner.search(query, category, limit))
            .await?)
    }

    pub async fn get_by_id(&self, id: &str) -> Result<MediaDescriptor, DispatchError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(DispatchError::ValidationFailed("Please provide an id".to_string()));
        }

        Ok(self.retrier.run(|_| self.inner.get_by_id(id)).await?)
    }
}

/// Delivery transport with the delivery retry policy applied.
pub struct RetryingDelivery<D> {
    inner: D,
    retrier: BackoffRetrier<DeliveryError>,
}

impl<D: DeliveryTransport> RetryingDelivery<D> {
    pub fn new(inner: D) -> Self {
        Self::with_retrier(inner, delivery_retrier())
    }

    pub fn with_retrier(inner: D, retrier: BackoffRetrier<DeliveryError>) -> Self {
        Self { inner, retrier }
    }

    pub async fn send(
        &self,
        target: &str,
        payload: &DeliveryPayload,
    ) -> Result<DeliveryReceipt, DispatchError> {
        if payload.content.is_empty() && payload.attachment_url.is_none() {
            return Err(DispatchError::TransferFailed("empty payload".to_string()));
        }

        Ok(self.retrier.run(|_| self.inner.send(target, payload)).await?)
    }
}
