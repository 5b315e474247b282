use thiserror::Error;

/// Errors returned by a [`crate::LogStore`]
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    /// The remote call failed
    #[error("{operation} failed: {message}")]
    Api {
        operation: &'static str,
        message: String,
    },

    /// The remote call was still throttled after retrying
    #[error("{operation} throttled after {attempts} attempts")]
    Throttled {
        operation: &'static str,
        attempts: u32,
    },

    /// The log group does not exist
    #[error("log group not found: {0}")]
    GroupNotFound(String),
}

impl StoreError {
    pub fn api(operation: &'static str, message: impl Into<String>) -> Self {
        Self::Api {
            operation,
            message: message.into(),
        }
    }
}
