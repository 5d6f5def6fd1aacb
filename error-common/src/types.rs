use thiserror::Error;

/// Platform-level failures of the claims binaries (startup, networking, config)
#[derive(Error, Debug)]
pub enum PlatformError {
    /// Network communication errors
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Server runtime errors
    #[error("Server error: {0}")]
    ServerError(String),

    /// Storage bootstrap errors
    #[error("Database error: {0}")]
    DatabaseError(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Wrapped external errors
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type alias for platform operations
pub type Result<T> = std::result::Result<T, PlatformError>;

/// Async logging function for errors
pub async fn log_error(context: &str, error: &PlatformError) {
    tracing::error!(
        context = context,
        error = %error,
        "Claims platform error occurred"
    );
}
