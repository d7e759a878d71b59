//! Error types for the remote file API client

/// Result type alias for API operations
pub type Result<T> = std::result::Result<T, ApiError>;

/// Errors that can occur when talking to the text-to-speech file API
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Transport-level failure (DNS, TLS, connection reset, body decode)
    #[error("HTTP request failed: {0}")]
    Http(reqwest::Error),

    /// The request did not complete within the client timeout
    #[error("Request timeout")]
    Timeout,

    /// Non-2xx response
    #[error("API returned status {0}")]
    Status(reqwest::StatusCode),

    /// The listing envelope carried `success: false`
    #[error("API reported failure")]
    Rejected,

    /// Local filesystem error while staging a download
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Http(err)
        }
    }
}
