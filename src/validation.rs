use crate::error::DispatchError;
use regex::Regex;
use std::sync::LazyLock;
use validator::Validate;

static COMMAND_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9][a-z0-9_-]{0,31}$").expect("command name pattern"));

pub const MAX_IDENTITY_LEN: usize = 128;

/// Request validation utilities
pub struct RequestValidator;

impl RequestValidator {
    /// Normalises a command name. Names that could never be registered are
    /// reported as unknown commands rather than validation failures.
    pub fn validate_command_name(name: &str) -> Result<String, DispatchError> {
        let name = name.trim().to_lowercase();
        if !COMMAND_NAME.is_match(&name) {
            return Err(DispatchError::UnknownCommand(name));
        }
        Ok(name)
    }

    /// Identity keys: non-empty, bounded, alphanumeric plus `-_@.:`.
    pub fn validate_identity(identity: &str) -> Result<String, DispatchError> {
        let identity = identity.trim();

        if identity.is_empty() {
            return Err(DispatchError::ValidationFailed(
                "Identity cannot be empty".to_string(),
            ));
        }

        if identity.len() > MAX_IDENTITY_LEN {
            return Err(DispatchError::ValidationFailed(format!(
                "Identity must be at most {} bytes",
                MAX_IDENTITY_LEN
            )));
        }

        if !identity
            .chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '-' | '_' | '@' | '.' | ':'))
        {
            return Err(DispatchError::ValidationFailed(
                "Identity contains invalid characters".to_string(),
            ));
        }

        Ok(identity.to_string())
    }

    /// Runs the `validator` derive checks on a request body.
    pub fn validate_body<T: Validate>(body: &T) -> Result<(), DispatchError> {
        body.validate()
            .map_err(|e| DispatchError::ValidationFailed(e.to_string()))
    }

    /// Splits raw argument text on whitespace.
    pub fn split_args(raw: &str) -> Vec<String> {
        raw.split_whitespace().map(str::to_string).collect()
    }
}
