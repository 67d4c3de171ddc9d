//! Error types for the Kings Gambit client.
//!
//! The variants follow the session's failure domains: move errors are
//! recovered inside the move engine, transport errors end the session with a
//! user-visible status, and media/signaling errors only degrade video.

use thiserror::Error;

/// Errors that can occur when using the Kings Gambit client.
#[derive(Debug, Error)]
pub enum GambitError {
    /// The rules engine refused the move. Purely local, nothing is sent.
    #[error("illegal move: {0}")]
    IllegalMove(String),

    /// A move is already awaiting server acknowledgement.
    #[error("a move is already awaiting confirmation")]
    MovePending,

    /// The local player tried to move out of turn.
    #[error("it is not your turn")]
    NotYourTurn,

    /// The game has already finished.
    #[error("the game is over")]
    GameOver,

    /// The server rejected a move that had been applied optimistically.
    #[error("move rejected by server: {0}")]
    MoveRejectedByServer(String),

    /// A position or move history could not be parsed or does not replay.
    #[error("invalid position: {0}")]
    InvalidPosition(String),

    /// The transport closed unexpectedly. Requires a manual reconnect.
    #[error("connection lost{}", .0.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    ConnectionLost(Option<String>),

    /// Camera or microphone access was denied or is absent.
    #[error("media unavailable: {0}")]
    MediaUnavailable(String),

    /// Peer negotiation failed.
    #[error("signaling failure: {0}")]
    SignalingFailure(String),

    /// Failed to send a message through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a message from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a protocol message.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attempted an operation that requires an active session.
    #[error("not connected to server")]
    NotConnected,

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The HTTP request itself failed (DNS, TLS, connection reset).
    #[error("http error: {0}")]
    Http(String),

    /// The REST API answered with a non-success status.
    #[error("api error ({status}): {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Error message extracted from the response body.
        message: String,
    },
}

impl GambitError {
    /// Returns `true` for errors that only affect the video call.
    pub fn is_video_only(&self) -> bool {
        matches!(
            self,
            GambitError::MediaUnavailable(_) | GambitError::SignalingFailure(_)
        )
    }
}

/// A specialized [`Result`] type for Kings Gambit client operations.
pub type Result<T> = std::result::Result<T, GambitError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_lost_display_includes_reason() {
        let err = GambitError::ConnectionLost(Some("reset by peer".into()));
        assert_eq!(err.to_string(), "connection lost: reset by peer");
        assert_eq!(
            GambitError::ConnectionLost(None).to_string(),
            "connection lost"
        );
    }

    #[test]
    fn video_errors_are_isolated() {
        assert!(GambitError::MediaUnavailable("denied".into()).is_video_only());
        assert!(GambitError::SignalingFailure("ice".into()).is_video_only());
        assert!(!GambitError::MovePending.is_video_only());
    }
}
