//! Error types for relaychat

use thiserror::Error;

/// Main error type for relay operations
#[derive(Error, Debug)]
pub enum RelayError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP server errors (bind, serve)
    #[error("Server error: {0}")]
    Server(String),

    /// Upstream generation service errors
    #[error("Upstream error: {0}")]
    Upstream(String),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
