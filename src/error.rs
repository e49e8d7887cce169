//! Error types for the image pull pipeline.

/// Top-level error type for the puller.
#[derive(Debug, thiserror::Error)]
pub enum PullError {
    /// Configuration load, save, or validation error.
    #[error("config error: {0}")]
    Config(String),

    /// HTTP fetch error (transport or response).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Artifact storage or latest-pointer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// FTP upload error (connection, auth, transfer).
    #[error("upload error: {0}")]
    Upload(String),
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PullError>;
