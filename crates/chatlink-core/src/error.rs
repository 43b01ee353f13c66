//! Channel-level error types.

use thiserror::Error;

/// Errors surfaced by the messaging channel and its transports.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The transport could not be opened (refused, handshake failure, etc.).
    #[error("failed to open transport: {0}")]
    TransportOpen(String),

    /// `send` was called while the channel is not connected.
    #[error("channel is not connected")]
    NotConnected,

    /// An inbound frame could not be decoded into a chat message.
    #[error("malformed message: {0}")]
    MalformedMessage(#[from] serde_json::Error),

    /// A subscriber handler returned an error or panicked.
    #[error("handler failed: {0}")]
    Handler(String),

    /// The transport failed after it was opened (writer gone, I/O error).
    #[error("transport error: {0}")]
    Transport(String),

    /// Opening the transport took longer than the configured connect timeout.
    #[error("connect timed out after {ms}ms")]
    ConnectTimeout { ms: u64 },

    /// The pending connect was superseded by `disconnect()`.
    #[error("connect cancelled by disconnect")]
    Cancelled,

    /// The endpoint URL could not be built.
    #[error("invalid endpoint: {0}")]
    InvalidEndpoint(String),

    /// Configuration could not be loaded or failed validation.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ChannelError {
    /// Returns `true` if retrying the same operation later may succeed
    /// without the caller changing anything: the transport failed, not the
    /// request.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::TransportOpen(_) | Self::Transport(_) | Self::ConnectTimeout { .. }
        )
    }
}
