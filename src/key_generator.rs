//! Identity extraction for inbound requests.

use crate::error::DispatchError;
use crate::validation::RequestValidator;
use axum::http::HeaderMap;

pub const DEFAULT_IDENTITY_HEADER: &str = "x-user-id";
pub const DEFAULT_SCOPE_HEADER: &str = "x-scope-id";

/// Who is asking, and optionally from where (a channel, a server).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub identity: String,
    pub scope: Option<String>,
}

/// Reads the caller's identity and scope from request headers
#[derive(Debug, Clone)]
pub struct IdentityExtractor {
    identity_header: String,
    scope_header: String,
}

impl IdentityExtractor {
    pub fn new(identity_header: &str, scope_header: &str) -> Self {
        Self {
            identity_header: identity_header.to_lowercase(),
            scope_header: scope_header.to_lowercase(),
        }
    }

    pub fn extract(&self, headers: &HeaderMap) -> Result<Caller, DispatchError> {
        let identity = headers
            .get(self.identity_header.as_str())
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                DispatchError::ValidationFailed(format!("Missing {} header", self.identity_header))
            })?;
        let identity = RequestValidator::validate_identity(identity)?;

        let scope = headers
            .get(self.scope_header.as_str())
            .and_then(|v| v.to_str().ok())
            .map(Self::sanitize_key)
            .filter(|s| !s.is_empty());

        Ok(Caller { identity, scope })
    }

    /// Replace anything outside `[A-Za-z0-9:_-]` so the value is safe as a
    /// store key component.
    pub fn sanitize_key(key: &str) -> String {
        key.trim()
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == ':' || c == '-' || c == '_' {
                    c
                } else {
                    '_'
                }
            })
            .collect()
    }
}

impl Default for IdentityExtractor {
    fn default() -> Self {
        Self::new(DEFAULT_IDENTITY_HEADER, DEFAULT_SCOPE_HEADER)
    }
}
