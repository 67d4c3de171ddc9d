#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Wire conformance tests for the room protocol.
//!
//! Client frames are compared field-for-field with what the room server
//! expects, and server fixtures are copied from frames it actually sends.

use kingsgambit_client::protocol::{
    ClientMessage, LobbyStateUpdate, MoveRecord, PlayerColor, ServerMessage,
};
use serde_json::{json, Value};

fn to_value(msg: &ClientMessage) -> Value {
    serde_json::to_value(msg).expect("serialize")
}

fn parse(raw: &str) -> ServerMessage {
    serde_json::from_str(raw).expect("deserialize")
}

// ════════════════════════════════════════════════════════════════════
// Client → server
// ════════════════════════════════════════════════════════════════════

#[test]
fn promotion_move_carries_piece_letter() {
    let msg = ClientMessage::Move {
        from: "a7".into(),
        to: "a8".into(),
        promotion: Some("q".into()),
        fen: None,
        record: None,
    };
    assert_eq!(
        to_value(&msg),
        json!({ "type": "move", "from": "a7", "to": "a8", "promotion": "q" })
    );
}

#[test]
fn full_move_frame_carries_position_and_record() {
    let fen = "rnbqkbnr/pppppppp/8/8/8/5N2/PPPPPPPP/RNBQKB1R b KQkq - 1 1";
    let msg = ClientMessage::Move {
        from: "g1".into(),
        to: "f3".into(),
        promotion: None,
        fen: Some(fen.into()),
        record: Some(MoveRecord {
            color: "w".into(),
            from: "g1".into(),
            to: "f3".into(),
            san: "Nf3".into(),
            promotion: None,
        }),
    };
    let value = to_value(&msg);
    assert_eq!(
        value,
        json!({
            "type": "move",
            "from": "g1",
            "to": "f3",
            "fen": fen,
            "move": { "color": "w", "from": "g1", "to": "f3", "san": "Nf3" }
        })
    );
    let back: ClientMessage = serde_json::from_value(value).unwrap();
    assert_eq!(back, msg);
}

#[test]
fn chat_message_names_sender() {
    let msg = ClientMessage::ChatMessage {
        message: "gg".into(),
        sender: "alice".into(),
    };
    assert_eq!(
        to_value(&msg),
        json!({ "type": "chat_message", "message": "gg", "sender": "alice" })
    );
}

#[test]
fn every_client_frame_has_a_type_matching_kind() {
    let frames = [
        ClientMessage::Move {
            from: "e2".into(),
            to: "e4".into(),
            promotion: None,
            fen: None,
            record: None,
        },
        ClientMessage::ChatMessage {
            message: "hi".into(),
            sender: "bob".into(),
        },
        ClientMessage::PlayerReady,
        ClientMessage::VideoSignal {
            peer_id: "p-1".into(),
            sender: "bob".into(),
        },
    ];
    for frame in &frames {
        assert_eq!(to_value(frame)["type"], frame.kind(), "{frame:?}");
    }
}

// ════════════════════════════════════════════════════════════════════
// Server → client fixtures
// ════════════════════════════════════════════════════════════════════

#[test]
fn game_start_for_second_player() {
    let msg = parse(
        r#"{"type": "game_start", "status": "connected",
            "position": "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1",
            "waiting_for_opponent": false, "player_color": "black"}"#,
    );
    let ServerMessage::GameStart {
        player_color,
        waiting_for_opponent,
        position,
        ..
    } = msg
    else {
        panic!("expected GameStart, got {msg:?}");
    };
    assert_eq!(player_color, PlayerColor::Black);
    assert!(!waiting_for_opponent);
    assert!(position.ends_with("w KQkq - 0 1"));
}

#[test]
fn move_made_with_and_without_promotion() {
    assert_eq!(
        parse(r#"{"type": "move_made", "from": "g1", "to": "f3"}"#),
        ServerMessage::MoveMade {
            from: "g1".into(),
            to: "f3".into(),
            promotion: None,
        }
    );
    assert_eq!(
        parse(r#"{"type": "move_made", "from": "b2", "to": "b1", "promotion": "n"}"#),
        ServerMessage::MoveMade {
            from: "b2".into(),
            to: "b1".into(),
            promotion: Some("n".into()),
        }
    );
}

#[test]
fn game_state_update_with_and_without_history() {
    let msg = parse(
        r#"{"type": "game_state_update", "position": "start", "moves": ["e4", "c5"]}"#,
    );
    assert_eq!(
        msg,
        ServerMessage::GameStateUpdate {
            position: "start".into(),
            moves: vec!["e4".into(), "c5".into()],
        }
    );

    let ServerMessage::GameStateUpdate { moves, .. } =
        parse(r#"{"type": "game_state_update", "position": "start"}"#)
    else {
        panic!("expected GameStateUpdate");
    };
    assert!(moves.is_empty());
}

#[test]
fn error_and_chat_fixtures() {
    assert_eq!(
        parse(r#"{"type": "error", "message": "Invalid move"}"#),
        ServerMessage::Error {
            message: "Invalid move".into()
        }
    );
    assert_eq!(
        parse(r#"{"type": "chat_message", "message": "hello", "sender": "bob"}"#),
        ServerMessage::ChatMessage {
            message: "hello".into(),
            sender: "bob".into(),
        }
    );
}

#[test]
fn opponent_joined_uses_snake_case_names() {
    assert_eq!(
        parse(
            r#"{"type": "opponent_joined", "white_player_name": "alice", "black_player_name": "bob"}"#
        ),
        ServerMessage::OpponentJoined {
            white_player_name: "alice".into(),
            black_player_name: "bob".into(),
        }
    );
}

#[test]
fn lobby_state_update_uses_camel_case_flags() {
    let msg = parse(
        r#"{"type": "lobby_state_update", "whitePlayer": "alice", "blackPlayer": "bob",
            "whitePlayerReady": true, "blackPlayerReady": false}"#,
    );
    assert_eq!(
        msg,
        ServerMessage::LobbyStateUpdate(LobbyStateUpdate {
            white_player: Some("alice".into()),
            black_player: Some("bob".into()),
            white_player_ready: true,
            black_player_ready: false,
        })
    );
}

#[test]
fn video_signal_from_opponent() {
    assert_eq!(
        parse(r#"{"type": "video_signal", "peerId": "9f2c", "sender": "bob"}"#),
        ServerMessage::VideoSignal {
            peer_id: "9f2c".into(),
            sender: Some("bob".into()),
        }
    );
}

// ════════════════════════════════════════════════════════════════════
// Tolerance
// ════════════════════════════════════════════════════════════════════

#[test]
fn extra_fields_are_ignored() {
    let msg = parse(r#"{"type": "error", "message": "nope", "code": 42, "trace": null}"#);
    assert_eq!(msg.kind(), "error");
}

#[test]
fn unknown_types_map_to_unknown() {
    for raw in [
        r#"{"type": "spectator_joined", "name": "carol"}"#,
        r#"{"type": "draw_offer"}"#,
    ] {
        assert_eq!(parse(raw), ServerMessage::Unknown, "{raw}");
    }
}

#[test]
fn frames_without_type_or_required_fields_are_errors() {
    assert!(serde_json::from_str::<ServerMessage>(r#"{"message": "hi"}"#).is_err());
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type": "move_made", "from": "e2"}"#).is_err());
    assert!(serde_json::from_str::<ServerMessage>(r#"{"type": "game_start"}"#).is_err());
    assert!(serde_json::from_str::<ServerMessage>("[]").is_err());
}
