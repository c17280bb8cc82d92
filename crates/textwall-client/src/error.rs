//! Error types for textwall-client

use thiserror::Error;

/// Client error type
#[derive(Debug, Error)]
pub enum Error {
    /// WebSocket transport error
    #[error("websocket error: {0}")]
    WebSocket(String),

    /// Connection closed
    #[error("connection closed")]
    ConnectionClosed,

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Fetch rectangle exceeds the server-side tile limit
    #[error("fetch area of {tiles} tiles exceeds the limit of {max}")]
    FetchAreaTooLarge {
        /// Number of tiles the rectangle covers
        tiles: u64,
        /// Maximum number of tiles allowed per fetch
        max: u64,
    },

    /// A correlated request received no response in time
    #[error("request timed out")]
    Timeout,

    /// Authentication error
    #[error("authentication error: {0}")]
    Auth(String),

    /// HTTP error during authentication
    #[error("http error: {0}")]
    Http(String),

    /// I/O error (token cache file)
    #[error("io error: {0}")]
    Io(String),
}

impl Error {
    /// Create an authentication error
    #[must_use]
    pub fn auth(msg: impl Into<String>) -> Self {
        Self::Auth(msg.into())
    }

    /// Check if error is recoverable by reconnecting
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::WebSocket(_) | Self::ConnectionClosed | Self::Timeout
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for Error {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::WebSocket(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Self::Http(err.to_string())
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;
