//! Per-match session identity and connection lifecycle.

use serde::Serialize;

use crate::protocol::PlayerColor;

/// Lifecycle of the room connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    #[default]
    Connecting,
    Open,
    /// Closed unexpectedly. No automatic retry.
    Lost,
    /// Closed on purpose.
    Closed,
}

/// Who is playing whom, in which room.
///
/// Built from match bootstrap data. The room name and local identity never
/// change; the opponent and connection state follow server presence messages
/// and the transport lifecycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub room_id: String,
    pub self_name: String,
    pub self_color: PlayerColor,
    pub opponent_name: Option<String>,
    pub connection_state: ConnectionState,
    pub waiting_for_opponent: bool,
}

impl Session {
    pub fn new(room_id: impl Into<String>, self_name: impl Into<String>, self_color: PlayerColor) -> Self {
        Self {
            room_id: room_id.into(),
            self_name: self_name.into(),
            self_color,
            opponent_name: None,
            connection_state: ConnectionState::Connecting,
            waiting_for_opponent: true,
        }
    }

    /// Set a known opponent, clearing the waiting flag.
    #[must_use]
    pub fn with_opponent(mut self, name: impl Into<String>) -> Self {
        self.opponent_name = Some(name.into());
        self.waiting_for_opponent = false;
        self
    }

    pub fn is_open(&self) -> bool {
        self.connection_state == ConnectionState::Open
    }

    /// Status line shown above the board.
    pub fn match_status(&self) -> String {
        match (&self.opponent_name, self.waiting_for_opponent) {
            (Some(name), false) => format!("Playing against: {name}"),
            _ => "Waiting for opponent to join...".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_waits_for_opponent() {
        let session = Session::new("room-1", "alice", PlayerColor::White);
        assert!(session.waiting_for_opponent);
        assert_eq!(session.connection_state, ConnectionState::Connecting);
        assert_eq!(session.match_status(), "Waiting for opponent to join...");
    }

    #[test]
    fn known_opponent_shows_in_status() {
        let session = Session::new("room-1", "alice", PlayerColor::White).with_opponent("bob");
        assert_eq!(session.match_status(), "Playing against: bob");
    }
}
