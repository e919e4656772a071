use thiserror::Error;

/// Application-wide error types for Mech Gator.
#[derive(Error, Debug)]
pub enum AppError {
    /// HTTP request failed (non-success status, unreadable body).
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Operation exceeded its deadline.
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),

    /// A scrape request or job is structurally invalid.
    #[error("Validation error: {0}")]
    ValidationError(String),

    /// No registered plugin supports the requested source type.
    #[error("No plugin found for source type {0}")]
    NoPluginFound(String),

    /// A plugin with the same name is already registered.
    #[error("Plugin {0} already registered")]
    DuplicatePlugin(String),

    /// No handler is registered for a job's type.
    #[error("No handler found for job type {0}")]
    NoHandler(String),

    /// Remote content could not be parsed.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Database operation failed.
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Missing or invalid configuration.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The entity exists but its current state forbids the operation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::NetworkError(_) | AppError::Timeout(_) => true,
            AppError::HttpError(msg) => {
                msg.contains("timeout")
                    || msg.contains("connect")
                    || msg.contains("reset")
                    || msg.contains("HTTP 5")
                    || msg.contains("HTTP 429")
            }
            _ => false,
        }
    }

    /// Returns true if the failure stems from a misconfigured request rather
    /// than an unavailable source.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::ValidationError(_) | AppError::NoPluginFound(_) | AppError::NoHandler(_)
        )
    }
}
