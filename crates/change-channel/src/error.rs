//! Change channel error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ChannelError {
    /// WebSocket error
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// The server refused to join a topic.
    #[error("join rejected for {topic}: {reason}")]
    JoinRejected { topic: String, reason: String },

    #[error("Not connected to realtime")]
    NotConnected,

    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Operation timed out")]
    Timeout,

    /// Send error
    #[error("Failed to send message: {0}")]
    Send(String),
}

pub type ChannelResult<T> = Result<T, ChannelError>;
