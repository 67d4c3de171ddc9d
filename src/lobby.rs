//! Presence and ready-handshake coordination.

use serde::Serialize;
use tracing::{debug, info};

use crate::protocol::{ClientMessage, LobbyStateUpdate, PlayerColor};
use crate::session::Session;

/// Who sits where and who is ready.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LobbyState {
    pub white_player_name: Option<String>,
    pub black_player_name: Option<String>,
    pub white_ready: bool,
    pub black_ready: bool,
}

impl LobbyState {
    pub fn both_ready(&self) -> bool {
        self.white_ready && self.black_ready
    }

    pub fn both_seated(&self) -> bool {
        self.white_player_name.is_some() && self.black_player_name.is_some()
    }

    pub fn is_ready(&self, color: PlayerColor) -> bool {
        match color {
            PlayerColor::White => self.white_ready,
            PlayerColor::Black => self.black_ready,
        }
    }
}

impl From<LobbyStateUpdate> for LobbyState {
    fn from(update: LobbyStateUpdate) -> Self {
        Self {
            white_player_name: update.white_player,
            black_player_name: update.black_player,
            white_ready: update.white_player_ready,
            black_ready: update.black_player_ready,
        }
    }
}

/// Tracks lobby slots and fires the match start exactly once.
#[derive(Debug, Clone, Default)]
pub struct LobbyCoordinator {
    state: LobbyState,
    seen_update: bool,
    ready_sent: bool,
    last_ready: (bool, bool),
    match_ready_fired: bool,
}

impl LobbyCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from a lobby snapshot fetched over REST.
    ///
    /// If the snapshot already shows the local player ready, [`send_ready`]
    /// becomes a no-op.
    ///
    /// [`send_ready`]: LobbyCoordinator::send_ready
    pub fn from_snapshot(state: LobbyState, self_color: PlayerColor) -> Self {
        Self {
            ready_sent: state.is_ready(self_color),
            seen_update: true,
            state,
            ..Self::default()
        }
    }

    pub fn state(&self) -> &LobbyState {
        &self.state
    }

    pub fn ready_sent(&self) -> bool {
        self.ready_sent
    }

    /// Outbound `player_ready`, produced at most once per session.
    pub fn send_ready(&mut self) -> Option<ClientMessage> {
        if self.ready_sent {
            debug!("player_ready already sent");
            return None;
        }
        self.ready_sent = true;
        Some(ClientMessage::PlayerReady)
    }

    /// Store a lobby snapshot. Returns `true` exactly once, on the first
    /// update where both players are ready.
    pub fn on_lobby_update(&mut self, update: LobbyStateUpdate) -> bool {
        self.state = update.into();
        self.seen_update = true;

        let ready = (self.state.white_ready, self.state.black_ready);
        let changed = ready != self.last_ready;
        self.last_ready = ready;

        if changed && self.state.both_ready() && !self.match_ready_fired {
            self.match_ready_fired = true;
            info!("both players ready");
            return true;
        }
        false
    }

    /// Record the match greeting: our colour and whether the other seat is
    /// still empty.
    pub fn on_game_start(&self, session: &mut Session, color: PlayerColor, waiting_for_opponent: bool) {
        if session.self_color != color {
            debug!(was = %session.self_color, now = %color, "server assigned a different colour");
        }
        session.self_color = color;
        session.waiting_for_opponent = waiting_for_opponent;
    }

    /// Both seats are taken. Returns the opponent's name.
    pub fn on_opponent_joined(&mut self, session: &mut Session, white: &str, black: &str) -> String {
        let opponent = match session.self_color {
            PlayerColor::White => black,
            PlayerColor::Black => white,
        };
        self.state.white_player_name = Some(white.to_string());
        self.state.black_player_name = Some(black.to_string());
        session.opponent_name = Some(opponent.to_string());
        session.waiting_for_opponent = false;
        info!(opponent, "opponent joined");
        opponent.to_string()
    }

    /// Lobby status line.
    pub fn status_text(&self) -> &'static str {
        if !self.seen_update {
            "Loading Lobby..."
        } else if self.state.both_ready() {
            "Both players are ready! Starting game..."
        } else if !self.state.both_seated() {
            "Waiting for an opponent to join..."
        } else {
            "Waiting for players to be ready..."
        }
    }
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;

    fn update(black: Option<&str>, white_ready: bool, black_ready: bool) -> LobbyStateUpdate {
        LobbyStateUpdate {
            white_player: Some("alice".into()),
            black_player: black.map(String::from),
            white_player_ready: white_ready,
            black_player_ready: black_ready,
        }
    }

    #[test]
    fn ready_is_sent_once() {
        let mut lobby = LobbyCoordinator::new();
        assert_eq!(lobby.send_ready(), Some(ClientMessage::PlayerReady));
        assert_eq!(lobby.send_ready(), None);
        assert_eq!(lobby.send_ready(), None);
    }

    #[test]
    fn both_ready_fires_once() {
        let mut lobby = LobbyCoordinator::new();
        assert!(!lobby.on_lobby_update(update(Some("bob"), true, false)));
        assert!(lobby.on_lobby_update(update(Some("bob"), true, true)));
        assert!(!lobby.on_lobby_update(update(Some("bob"), true, true)));
        assert!(!lobby.on_lobby_update(update(Some("bob"), false, true)));
        assert!(!lobby.on_lobby_update(update(Some("bob"), true, true)));
    }

    #[test]
    fn status_text_precedence() {
        let mut lobby = LobbyCoordinator::new();
        assert_eq!(lobby.status_text(), "Loading Lobby...");
        lobby.on_lobby_update(update(None, true, false));
        assert_eq!(lobby.status_text(), "Waiting for an opponent to join...");
        lobby.on_lobby_update(update(Some("bob"), true, false));
        assert_eq!(lobby.status_text(), "Waiting for players to be ready...");
        lobby.on_lobby_update(update(Some("bob"), true, true));
        assert_eq!(lobby.status_text(), "Both players are ready! Starting game...");
    }

    #[test]
    fn snapshot_showing_us_ready_suppresses_send() {
        let state = LobbyState {
            white_player_name: Some("alice".into()),
            black_player_name: None,
            white_ready: true,
            black_ready: false,
        };
        let mut lobby = LobbyCoordinator::from_snapshot(state, PlayerColor::White);
        assert!(lobby.send_ready().is_none());
        assert!(lobby.on_lobby_update(update(Some("bob"), true, true)));
    }

    #[test]
    fn opponent_joined_names_the_other_colour() {
        let mut lobby = LobbyCoordinator::new();
        let mut session = Session::new("r", "bob", PlayerColor::Black);
        let name = lobby.on_opponent_joined(&mut session, "alice", "bob");
        assert_eq!(name, "alice");
        assert_eq!(session.opponent_name.as_deref(), Some("alice"));
        assert!(!session.waiting_for_opponent);
    }

    #[test]
    fn game_start_records_colour_and_waiting() {
        let lobby = LobbyCoordinator::new();
        let mut session = Session::new("r", "bob", PlayerColor::White);
        lobby.on_game_start(&mut session, PlayerColor::Black, false);
        assert_eq!(session.self_color, PlayerColor::Black);
        assert!(!session.waiting_for_opponent);
    }
}
