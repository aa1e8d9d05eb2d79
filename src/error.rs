//! Error types for the Inside client

use thiserror::Error;

/// Result type alias for client operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the Inside client
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Malformed or unexpected data on the socket
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Authorization or signing error
    #[error("auth error: {0}")]
    Auth(String),

    /// Audio device error
    #[error("audio error: {0}")]
    Audio(String),

    /// Socket connection error
    #[error("connection error: {0}")]
    Connection(String),

    /// Session task has shut down
    #[error("session closed")]
    SessionClosed,

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}
