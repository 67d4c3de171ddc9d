//! Wire-compatible protocol types for Kings Gambit room connections.
//!
//! Every frame is a UTF-8 JSON object with a mandatory `type` discriminator
//! and a flat payload (`{"type": "move", "from": "e2", "to": "e4", ...}`). Field
//! names follow the server exactly, which mixes `snake_case`
//! (`white_player_name`) and `camelCase` (`peerId`, `whitePlayerReady`).
//!
//! Unknown `type` values deserialize into [`ServerMessage::Unknown`] so newer
//! servers can add message kinds without breaking older clients.

use std::fmt;

use serde::{Deserialize, Serialize};

// ── Enums ───────────────────────────────────────────────────────────

/// Side a player controls.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "lowercase")]
pub enum PlayerColor {
    #[default]
    White,
    Black,
}

impl PlayerColor {
    /// The other side.
    #[must_use]
    pub fn opposite(self) -> Self {
        match self {
            PlayerColor::White => PlayerColor::Black,
            PlayerColor::Black => PlayerColor::White,
        }
    }

    /// Capitalized name used in status lines (`"White"`, `"Black"`).
    pub fn title(self) -> &'static str {
        match self {
            PlayerColor::White => "White",
            PlayerColor::Black => "Black",
        }
    }

    /// Single-letter side used in move records (`"w"`, `"b"`).
    pub fn letter(self) -> &'static str {
        match self {
            PlayerColor::White => "w",
            PlayerColor::Black => "b",
        }
    }
}

impl From<chess::Color> for PlayerColor {
    fn from(color: chess::Color) -> Self {
        match color {
            chess::Color::White => PlayerColor::White,
            chess::Color::Black => PlayerColor::Black,
        }
    }
}

impl From<PlayerColor> for chess::Color {
    fn from(color: PlayerColor) -> Self {
        match color {
            PlayerColor::White => chess::Color::White,
            PlayerColor::Black => chess::Color::Black,
        }
    }
}

impl fmt::Display for PlayerColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlayerColor::White => f.write_str("white"),
            PlayerColor::Black => f.write_str("black"),
        }
    }
}

// ── Payload structs ─────────────────────────────────────────────────

/// Lobby snapshot pushed by the server whenever a slot or ready flag changes.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LobbyStateUpdate {
    /// Name of the player holding the white slot.
    #[serde(default)]
    pub white_player: Option<String>,
    /// Name of the player holding the black slot, `None` while empty.
    #[serde(default)]
    pub black_player: Option<String>,
    #[serde(default)]
    pub white_player_ready: bool,
    #[serde(default)]
    pub black_player_ready: bool,
}

/// Details of a played move, kept by the server in the room's history.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MoveRecord {
    /// `"w"` or `"b"`.
    pub color: String,
    pub from: String,
    pub to: String,
    pub san: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub promotion: Option<String>,
}

// ── Messages ────────────────────────────────────────────────────────

/// Messages sent from the client to the server.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Propose a move, squares in lowercase coordinate form (`"e2"`).
    Move {
        from: String,
        to: String,
        /// Promotion piece letter (`"q"`, `"r"`, `"b"`, `"n"`).
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<String>,
        /// Position after the move, stored by the server as the room's
        /// current position.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        fen: Option<String>,
        /// Appended by the server to the room's move history.
        #[serde(default, rename = "move", skip_serializing_if = "Option::is_none")]
        record: Option<MoveRecord>,
    },
    /// Chat line relayed to the opponent.
    ChatMessage { message: String, sender: String },
    /// This player is ready to start (lobby rooms only).
    PlayerReady,
    /// Announce the local peer-connection identifier.
    VideoSignal {
        #[serde(rename = "peerId")]
        peer_id: String,
        sender: String,
    },
}

impl ClientMessage {
    /// The wire discriminator of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Move { .. } => "move",
            ClientMessage::ChatMessage { .. } => "chat_message",
            ClientMessage::PlayerReady => "player_ready",
            ClientMessage::VideoSignal { .. } => "video_signal",
        }
    }
}

/// Messages sent from the server to the client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Greeting sent right after the match socket is accepted.
    GameStart {
        #[serde(default)]
        status: String,
        #[serde(default)]
        position: String,
        #[serde(default)]
        waiting_for_opponent: bool,
        player_color: PlayerColor,
    },
    /// A move accepted by the server (our own echo or the opponent's).
    MoveMade {
        from: String,
        to: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        promotion: Option<String>,
    },
    /// Full authoritative resync.
    GameStateUpdate {
        position: String,
        #[serde(default)]
        moves: Vec<String>,
    },
    /// Move rejected or server-side fault.
    Error { message: String },
    /// Chat line from the opponent.
    ChatMessage { message: String, sender: String },
    /// Both seats are now taken.
    OpponentJoined {
        white_player_name: String,
        black_player_name: String,
    },
    /// Lobby snapshot.
    LobbyStateUpdate(LobbyStateUpdate),
    /// The opponent's peer-connection identifier.
    #[serde(alias = "peer_id")]
    VideoSignal {
        #[serde(rename = "peerId")]
        peer_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sender: Option<String>,
    },
    /// Any `type` this client does not know about.
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// The wire discriminator of this message (`"unknown"` for [`ServerMessage::Unknown`]).
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::GameStart { .. } => "game_start",
            ServerMessage::MoveMade { .. } => "move_made",
            ServerMessage::GameStateUpdate { .. } => "game_state_update",
            ServerMessage::Error { .. } => "error",
            ServerMessage::ChatMessage { .. } => "chat_message",
            ServerMessage::OpponentJoined { .. } => "opponent_joined",
            ServerMessage::LobbyStateUpdate(_) => "lobby_state_update",
            ServerMessage::VideoSignal { .. } => "video_signal",
            ServerMessage::Unknown => "unknown",
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
    use serde_json::json;

    #[test]
    fn move_serializes_flat_without_promotion() {
        let msg = ClientMessage::Move {
            from: "e2".into(),
            to: "e4".into(),
            promotion: None,
            fen: None,
            record: None,
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value, json!({"type": "move", "from": "e2", "to": "e4"}));
    }

    #[test]
    fn player_ready_has_only_discriminator() {
        let value = serde_json::to_value(ClientMessage::PlayerReady).unwrap();
        assert_eq!(value, json!({"type": "player_ready"}));
    }

    #[test]
    fn video_signal_uses_camel_case_peer_id() {
        let msg = ClientMessage::VideoSignal {
            peer_id: "peer-a".into(),
            sender: "alice".into(),
        };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            value,
            json!({"type": "video_signal", "peerId": "peer-a", "sender": "alice"})
        );
    }

    #[test]
    fn unknown_type_is_not_an_error() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "spectator_joined", "name": "eve"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn peer_id_alias_parses_as_video_signal() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type": "peer_id", "peerId": "xyz"}"#).unwrap();
        assert_eq!(
            msg,
            ServerMessage::VideoSignal {
                peer_id: "xyz".into(),
                sender: None
            }
        );
    }

    #[test]
    fn lobby_state_update_parses_null_black_player() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "type": "lobby_state_update",
            "whitePlayer": "alice",
            "blackPlayer": null,
            "whitePlayerReady": true,
            "blackPlayerReady": false
        }))
        .unwrap();
        let ServerMessage::LobbyStateUpdate(update) = msg else {
            panic!("expected lobby_state_update");
        };
        assert_eq!(update.white_player.as_deref(), Some("alice"));
        assert!(update.black_player.is_none());
        assert!(update.white_player_ready);
    }

    #[test]
    fn game_start_matches_server_greeting() {
        let msg: ServerMessage = serde_json::from_value(json!({
            "type": "game_start",
            "status": "waiting",
            "position": "start",
            "waiting_for_opponent": true,
            "player_color": "white"
        }))
        .unwrap();
        assert_eq!(msg.kind(), "game_start");
        if let ServerMessage::GameStart {
            waiting_for_opponent,
            player_color,
            ..
        } = msg
        {
            assert!(waiting_for_opponent);
            assert_eq!(player_color, PlayerColor::White);
        }
    }

    #[test]
    fn color_conversions_round_trip_through_chess() {
        let c: chess::Color = PlayerColor::Black.into();
        assert_eq!(PlayerColor::from(c), PlayerColor::Black);
        assert_eq!(PlayerColor::White.opposite(), PlayerColor::Black);
        assert_eq!(PlayerColor::Black.to_string(), "black");
    }
}
