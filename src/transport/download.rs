use super::{download_retrier, parse_retry_after, ApiError};
use crate::error::DispatchError;
use crate::retry::BackoffRetrier;
use std::time::Duration;
use tracing::{debug, error};

const SERVICE: &str = "download";

/// Fetches media bytes over HTTP with a fixed per-attempt timeout.
///
/// 429 responses and timed out attempts are retried by the download policy;
/// any other non-2xx status, or an empty body, fails at once.
pub struct MediaDownloader {
    client: reqwest::Client,
    retrier: BackoffRetrier<ApiError>,
    timeout: Duration,
}

impl MediaDownloader {
    pub fn new(timeout: Duration) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DispatchError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            retrier: download_retrier(),
            timeout,
        })
    }

    /// Per-attempt timeout
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub async fn download(&self, url: &str) -> Result<Vec<u8>, DispatchError> {
        match self.retrier.run(|attempt| self.fetch_once(url, attempt)).await {
            Ok(bytes) => Ok(bytes),
            Err(e) => {
                error!(url, error = %e, "Media download failed");
                Err(e.into())
            }
        }
    }

    async fn fetch_once(&self, url: &str, attempt: u32) -> Result<Vec<u8>, ApiError> {
        debug!(url, attempt, "Downloading media");

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ApiError::from_reqwest(SERVICE, e))?;

        let status = resp.status();
        if !status.is_success() {
            return Err(ApiError::new(SERVICE, format!("GET {} returned {}", url, status))
                .with_status(status.as_u16())
                .with_retry_after(parse_retry_after(resp.headers())));
        }

        let body = resp
            .bytes()
            .await
            .map_err(|e| ApiError::from_reqwest(SERVICE, e))?;
        if body.is_empty() {
            return Err(ApiError::new(SERVICE, format!("GET {} returned an empty body", url)));
        }

        Ok(body.to_vec())
    }
}
