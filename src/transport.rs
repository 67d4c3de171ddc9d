//! Room transport abstraction.
//!
//! A [`Transport`] carries one JSON text frame per call in each direction
//! between the client and the room's server socket. Connecting is not part of
//! the trait: build a connected transport (see
//! [`WebSocketTransport::connect_room`](crate::transports::WebSocketTransport::connect_room))
//! and hand it to [`MatchClient::start`](crate::client::MatchClient::start).
//!
//! There is no write buffer across reconnects. A frame that cannot be sent
//! ends the session.

use std::fmt;

use async_trait::async_trait;

use crate::error::GambitError;

/// Which room socket to open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RoomKind {
    /// Pre-match lobby: seats and ready flags.
    Lobby,
    /// The match itself: moves, chat and video signaling.
    Match,
}

impl RoomKind {
    fn path_segment(self) -> &'static str {
        match self {
            RoomKind::Lobby => "lobby",
            RoomKind::Match => "match",
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

/// Socket URL for a room: `{base}/ws/{lobby|match}/{room_id}/`.
///
/// ```
/// use kingsgambit_client::transport::{room_url, RoomKind};
///
/// assert_eq!(
///     room_url("ws://localhost:8000/", RoomKind::Match, "abc"),
///     "ws://localhost:8000/ws/match/abc/"
/// );
/// ```
pub fn room_url(base_url: &str, kind: RoomKind, room_id: &str) -> String {
    format!(
        "{}/ws/{}/{}/",
        base_url.trim_end_matches('/'),
        kind.path_segment(),
        room_id
    )
}

/// A bidirectional text frame transport for one room.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) is polled inside `tokio::select!` and **must** be
/// cancel-safe: dropping the future before it completes must not lose a
/// frame. Channel-backed implementations are naturally cancel-safe.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send one JSON text frame.
    ///
    /// # Errors
    ///
    /// [`GambitError::TransportSend`] or [`GambitError::TransportClosed`].
    async fn send(&mut self, message: String) -> Result<(), GambitError>;

    /// Receive the next JSON text frame.
    ///
    /// - `Some(Ok(text))`: a frame arrived
    /// - `Some(Err(e))`: the connection failed
    /// - `None`: the server closed the connection
    async fn recv(&mut self) -> Option<Result<String, GambitError>>;

    /// Close the connection. Must release resources even if the close
    /// handshake fails.
    async fn close(&mut self) -> Result<(), GambitError>;
}
