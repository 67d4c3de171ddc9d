#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
//! Whole-match flows driven through the [`Router`] without a runtime.
//!
//! Each test plays both ends: the local player proposes, and the test feeds
//! the frames the room server would relay back.

use kingsgambit_client::game::{GameSnapshot, MoveEngine};
use kingsgambit_client::rules::{DrawReason, Outcome};
use kingsgambit_client::video::{MediaCommand, MediaEvent, VideoPhase};
use kingsgambit_client::{GambitError, PlayerColor, Router, Session, SessionEvent};

fn router(name: &str, color: PlayerColor, opponent: &str) -> Router {
    let mut router = Router::new(
        Session::new("room-9", name, color).with_opponent(opponent),
        MoveEngine::new(),
    );
    router.on_connected();
    router
}

fn move_made(from: &str, to: &str) -> String {
    format!(r#"{{"type": "move_made", "from": "{from}", "to": "{to}"}}"#)
}

/// Propose a local move and have the server echo it.
fn play_own(router: &mut Router, from: &str, to: &str) -> GameSnapshot {
    let (san, _) = router.propose_move(from, to, None);
    san.unwrap();
    last_snapshot(router.route_text(&move_made(from, to)).events)
}

fn last_snapshot(events: Vec<SessionEvent>) -> GameSnapshot {
    events
        .into_iter()
        .rev()
        .find_map(|e| match e {
            SessionEvent::GameUpdated(s) => Some(s),
            _ => None,
        })
        .expect("no GameUpdated in reaction")
}

#[test]
fn fools_mate_ends_the_game_for_white() {
    let mut alice = router("alice", PlayerColor::White, "bob");

    play_own(&mut alice, "f2", "f3");
    alice.route_text(&move_made("e7", "e5"));
    play_own(&mut alice, "g2", "g4");
    let over = last_snapshot(alice.route_text(&move_made("d8", "h4")).events);

    assert_eq!(over.move_history, ["f3", "e5", "g4", "Qh4#"]);
    assert_eq!(
        over.outcome,
        Outcome::Checkmate {
            winner: PlayerColor::Black
        }
    );
    assert!(over.in_check);
    assert_eq!(over.status_text(), "Game over, White is in checkmate.");

    let (result, reaction) = alice.propose_move("e1", "f2", None);
    assert!(matches!(result, Err(GambitError::GameOver)));
    assert!(reaction.outbound.is_empty());
}

#[test]
fn both_clients_agree_after_a_relayed_game() {
    let mut alice = router("alice", PlayerColor::White, "bob");
    let mut bob = router("bob", PlayerColor::Black, "alice");

    // The server relays each move to the other player only.
    let moves = [
        ("e2", "e4"),
        ("c7", "c5"),
        ("g1", "f3"),
        ("d7", "d6"),
        ("f1", "b5"),
    ];
    for (i, (from, to)) in moves.iter().enumerate() {
        let (mover, other) = if i % 2 == 0 {
            (&mut alice, &mut bob)
        } else {
            (&mut bob, &mut alice)
        };
        let (san, reaction) = mover.propose_move(from, to, None);
        san.unwrap();
        assert_eq!(reaction.outbound.len(), 1);
        other.route_text(&move_made(from, to));
    }
    // Bob's reply acknowledges alice's last move.
    let (san, _) = bob.propose_move("c8", "d7", None);
    assert_eq!(san.unwrap(), "Bd7");
    alice.route_text(&move_made("c8", "d7"));

    let a = alice.game().snapshot();
    assert_eq!(a.move_history, ["e4", "c5", "Nf3", "d6", "Bb5+", "Bd7"]);
    assert!(!a.awaiting_ack);
    // Bob has not heard back about Bd7 yet.
    let b = bob.game().snapshot();
    assert_eq!(a.fen, b.fen);
    assert!(b.awaiting_ack);
}

#[test]
fn promotion_defaults_to_queen_and_is_sent() {
    let mut alice = router("alice", PlayerColor::White, "bob");
    let line = [
        (("a2", "a4"), ("b7", "b5")),
        (("a4", "b5"), ("a7", "a6")),
        (("b5", "a6"), ("c8", "b7")),
        (("a6", "b7"), ("b8", "c6")),
    ];
    for ((from, to), (reply_from, reply_to)) in line {
        play_own(&mut alice, from, to);
        alice.route_text(&move_made(reply_from, reply_to));
    }

    let (san, reaction) = alice.propose_move("b7", "a8", None);
    assert_eq!(san.unwrap(), "bxa8=Q");
    let frame = serde_json::to_value(&reaction.outbound[0]).unwrap();
    assert_eq!(frame["promotion"], "q");
    assert_eq!(
        frame["move"],
        serde_json::json!({ "color": "w", "from": "b7", "to": "a8", "san": "bxa8=Q", "promotion": "q" })
    );
    assert_eq!(frame["fen"], alice.game().snapshot().fen);
}

#[test]
fn server_choosing_another_move_supersedes_ours() {
    let mut bob = router("bob", PlayerColor::Black, "alice");
    bob.route_text(&move_made("e2", "e4"));
    bob.propose_move("e7", "e5", None).0.unwrap();

    // A retried request from the same seat landed first on the server.
    let reaction = bob.route_text(&move_made("c7", "c5"));
    assert!(matches!(
        reaction.events[0],
        SessionEvent::MoveRejected { .. }
    ));
    let snapshot = last_snapshot(reaction.events);
    assert_eq!(snapshot.move_history, ["e4", "c5"]);
    assert!(!snapshot.awaiting_ack);
}

#[test]
fn knight_shuffle_draws_by_repetition() {
    let mut alice = router("alice", PlayerColor::White, "bob");
    let mut snapshot = GameSnapshot::default();
    for _ in 0..2 {
        play_own(&mut alice, "g1", "f3");
        alice.route_text(&move_made("g8", "f6"));
        play_own(&mut alice, "f3", "g1");
        snapshot = last_snapshot(alice.route_text(&move_made("f6", "g8")).events);
    }
    assert_eq!(
        snapshot.outcome,
        Outcome::Draw {
            reason: DrawReason::ThreefoldRepetition
        }
    );
    assert_eq!(snapshot.status_text(), "Game over, drawn position");
    assert!(matches!(
        alice.propose_move("g1", "f3", None).0,
        Err(GambitError::GameOver)
    ));
}

#[test]
fn exactly_one_side_calls_for_any_distinct_ids() {
    let pairs = [
        ("a", "b"),
        ("peer-10", "peer-9"),
        ("0f3c", "0F3C"),
        ("x", "xx"),
    ];
    for (left, right) in pairs {
        let mut alice = router("alice", PlayerColor::White, "bob");
        let mut bob = router("bob", PlayerColor::Black, "alice");
        for (r, own) in [(&mut alice, left), (&mut bob, right)] {
            r.start_video();
            r.on_media_event(MediaEvent::MediaReady);
            r.on_media_event(MediaEvent::PeerOpened {
                peer_id: own.to_string(),
            });
        }
        let a = alice.route_text(&format!(r#"{{"type": "video_signal", "peerId": "{right}"}}"#));
        let b = bob.route_text(&format!(r#"{{"type": "video_signal", "peerId": "{left}"}}"#));

        let calls = |media: &[MediaCommand]| {
            media
                .iter()
                .filter(|c| matches!(c, MediaCommand::Call { .. }))
                .count()
        };
        assert_eq!(calls(&a.media) + calls(&b.media), 1, "{left} vs {right}");
        let waiting = [alice.video().phase(), bob.video().phase()]
            .iter()
            .filter(|p| **p == VideoPhase::AwaitingIncoming)
            .count();
        assert_eq!(waiting, 1, "{left} vs {right}");
    }
}

#[test]
fn equal_peer_ids_fail_without_calling() {
    let mut alice = router("alice", PlayerColor::White, "bob");
    alice.start_video();
    alice.on_media_event(MediaEvent::MediaReady);
    alice.on_media_event(MediaEvent::PeerOpened {
        peer_id: "same".into(),
    });
    let reaction = alice.route_text(r#"{"type": "video_signal", "peerId": "same"}"#);
    assert!(reaction.media.is_empty());
    assert_eq!(alice.video().phase(), VideoPhase::Failed);
    let Some(SessionEvent::VideoUpdated {
        status: Some(status),
        ..
    }) = reaction.events.last()
    else {
        panic!("expected a failed VideoUpdated, got {:?}", reaction.events);
    };
    assert!(status.starts_with("signaling failure"));

    // Chess is unaffected.
    assert!(alice.propose_move("e2", "e4", None).0.is_ok());
}

#[cfg(feature = "rest-api")]
#[test]
fn bootstrap_resumes_a_game_in_progress() {
    use kingsgambit_client::api::{parse_response, MatchBootstrap};

    let body = r#"{
        "room_id": "room-9",
        "player_color": "black",
        "player_name": "bob",
        "opponent_name": "alice",
        "waiting_for_opponent": false,
        "initial_position": "rnbqkbnr/pppp1ppp/8/4p3/4P3/5N2/PPPP1PPP/RNBQKB1R b KQkq - 1 2",
        "moves_history": [{"san": "e4", "color": "w"}, "e5", {"san": "Nf3"}]
    }"#;
    let bootstrap: MatchBootstrap = parse_response(200, body).unwrap();
    let mut bob = bootstrap.router().unwrap();
    bob.on_connected();

    assert_eq!(bob.session().match_status(), "Playing against: alice");
    assert_eq!(bob.game().snapshot().move_history, ["e4", "e5", "Nf3"]);
    let (san, _) = bob.propose_move("b8", "c6", None);
    assert_eq!(san.unwrap(), "Nc6");
}

#[cfg(feature = "rest-api")]
#[test]
fn sent_move_records_resume_through_bootstrap() {
    use kingsgambit_client::api::{parse_response, MatchBootstrap};

    // The server stores each sender's `fen` and `move` as-is.
    let mut alice = router("alice", PlayerColor::White, "bob");
    let mut bob = router("bob", PlayerColor::Black, "alice");
    let mut stored_moves = Vec::new();
    let mut stored_fen = serde_json::Value::Null;
    for (i, (from, to)) in [("e2", "e4"), ("e7", "e5"), ("g1", "f3")].iter().enumerate() {
        let (mover, other) = if i % 2 == 0 {
            (&mut alice, &mut bob)
        } else {
            (&mut bob, &mut alice)
        };
        let (_, reaction) = mover.propose_move(from, to, None);
        let frame = serde_json::to_value(&reaction.outbound[0]).unwrap();
        stored_moves.push(frame["move"].clone());
        stored_fen = frame["fen"].clone();
        other.route_text(&move_made(from, to));
    }

    let body = serde_json::json!({
        "room_id": "room-9",
        "player_color": "black",
        "player_name": "bob",
        "opponent_name": "alice",
        "initial_position": stored_fen,
        "moves_history": stored_moves,
    })
    .to_string();
    let bootstrap: MatchBootstrap = parse_response(200, &body).unwrap();
    let resumed = bootstrap.router().unwrap();
    assert_eq!(resumed.game().snapshot().move_history, ["e4", "e5", "Nf3"]);
    assert_eq!(resumed.game().snapshot().fen, bob.game().snapshot().fen);
}
