use crate::store::StoreError;

/// Application errors
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Resource not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Queued request for '{provider}' timed out after {timeout_ms}ms")]
    QueueTimeout { provider: String, timeout_ms: u64 },

    #[error("Queue for '{provider}' was cleared")]
    QueueCleared { provider: String },

    #[error("Rate limit controller has been shut down")]
    Shutdown,

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Stable name of the error kind
    pub fn error_type(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "NotFound",
            AppError::Validation(_) => "ValidationError",
            AppError::Configuration(_) => "ConfigurationError",
            AppError::Store(_) => "StoreError",
            AppError::QueueTimeout { .. } => "QueueTimeoutError",
            AppError::QueueCleared { .. } => "QueueClearedError",
            AppError::Shutdown => "ShutdownError",
            AppError::Internal(_) => "InternalError",
        }
    }
}

/// Result type alias used across the crate
pub type AppResult<T> = Result<T, AppError>;
