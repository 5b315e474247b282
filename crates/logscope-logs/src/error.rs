use thiserror::Error;

/// Maximum log group name length accepted by the store
const MAX_LOG_GROUP_LEN: usize = 512;

/// Fatal errors for a group fetch.
///
/// Store failures are not fatal and never show up here; they are reported
/// through `FetchResult::truncated` and `FetchResult::streams_failed`.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Malformed log group identifier
    #[error("invalid log group '{name}': {reason}")]
    InvalidLogGroup { name: String, reason: &'static str },

    /// Malformed fetch option
    #[error("invalid option {option}: {reason}")]
    InvalidOption {
        option: &'static str,
        reason: &'static str,
    },

    /// The group's fetch task panicked or was cancelled
    #[error("fetch task for '{0}' failed: {1}")]
    TaskFailed(String, String),
}

/// Check a log group name before any remote call
pub fn validate_log_group(name: &str) -> Result<(), FetchError> {
    let invalid = |reason| FetchError::InvalidLogGroup {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.len() > MAX_LOG_GROUP_LEN {
        return Err(invalid("name is longer than 512 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '/' | '.' | '#'))
    {
        return Err(invalid("name may only contain a-z, A-Z, 0-9, '_', '-', '/', '.' and '#'"));
    }
    Ok(())
}
