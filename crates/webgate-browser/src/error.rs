//! Browser-layer error types.

use thiserror::Error;

/// Errors from the browser backend and page drivers.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Chrome not found. Install Google Chrome or set browser.chrome_executable.")]
    ChromeNotFound,

    #[error("Failed to launch Chrome: {0}")]
    LaunchFailed(String),

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("CDP error: {message} (code: {code})")]
    Protocol { code: i64, message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Navigation failed: {0}")]
    NavigationFailed(String),

    #[error("JavaScript error: {0}")]
    JavaScript(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Browser connection closed")]
    ConnectionClosed,

    #[error("Context closed: {0}")]
    ContextClosed(String),

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<tokio_tungstenite::tungstenite::Error> for BrowserError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        BrowserError::WebSocket(e.to_string())
    }
}

impl From<reqwest::Error> for BrowserError {
    fn from(e: reqwest::Error) -> Self {
        BrowserError::Http(e.to_string())
    }
}

/// Errors from the context pool.
#[derive(Debug, Error)]
pub enum PoolError {
    /// Hard ceiling reached and nothing freed up within the acquire timeout.
    #[error("context pool exhausted (ceiling {ceiling})")]
    Exhausted { ceiling: usize },

    #[error(transparent)]
    Backend(#[from] BrowserError),
}

/// Errors from session lookup and lifecycle.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session not found: {0}")]
    NotFound(String),

    #[error("session {0} is not owned by the calling client")]
    NotOwned(String),

    #[error("session limit reached")]
    Exhausted,

    #[error("session is shutting down")]
    Closing,

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error(transparent)]
    Browser(#[from] BrowserError),
}
