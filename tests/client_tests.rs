//! Integration tests for [`MatchClient`] over a scripted transport.
//!
//! Uses the shared `MockTransport` from `tests/common` to play the server
//! side of a match room and checks outbound frames, event order, and media
//! teardown.

mod common;

use kingsgambit_client::game::GameSnapshot;
use kingsgambit_client::video::{CallState, MediaCommand, MediaEvent, MediaState, VideoPhase};
use kingsgambit_client::{DisabledMedia, GambitError, PlayerColor, Session, SessionEvent};
use serde_json::json;

use common::{
    black_session, chat_json, error_json, game_state_json, init_tracing, lobby_json,
    move_made_json, next_event, start_client, video_signal_json, wait_for, white_session,
    RecordingMedia,
};

fn game_updated(event: SessionEvent) -> GameSnapshot {
    match event {
        SessionEvent::GameUpdated(snapshot) => snapshot,
        other => panic!("expected GameUpdated, got {other:?}"),
    }
}

// ════════════════════════════════════════════════════════════════════
// Moves
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn local_move_is_applied_then_confirmed() {
    init_tracing();
    let (mut client, mut events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    let san = client.propose_move("e2", "e4", None).await.unwrap();
    assert_eq!(san, "e4");

    let speculative = game_updated(next_event(&mut events).await);
    assert_eq!(speculative.move_history, ["e4"]);
    assert_eq!(speculative.turn, PlayerColor::Black);
    assert!(speculative.awaiting_ack);

    assert_eq!(
        server.next_sent().await,
        json!({
            "type": "move",
            "from": "e2",
            "to": "e4",
            "fen": speculative.fen,
            "move": { "color": "w", "from": "e2", "to": "e4", "san": "e4" }
        })
    );

    server.push(move_made_json("e2", "e4"));
    let confirmed = game_updated(next_event(&mut events).await);
    assert_eq!(confirmed.move_history, ["e4"]);
    assert!(!confirmed.awaiting_ack);
    assert_eq!(confirmed.fen, speculative.fen);

    server.push(move_made_json("e7", "e5"));
    let replied = game_updated(next_event(&mut events).await);
    assert_eq!(replied.move_history, ["e4", "e5"]);
    assert_eq!(replied.turn, PlayerColor::White);
    assert_eq!(replied.status_text(), "White's turn");

    client.shutdown().await;
}

#[tokio::test]
async fn opponent_reply_acknowledges_pending_move() {
    let (mut client, mut events, server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.propose_move("g1", "f3", None).await.unwrap();
    next_event(&mut events).await;

    // The server relays the reply without echoing our move.
    server.push(move_made_json("d7", "d5"));
    let snapshot = game_updated(next_event(&mut events).await);
    assert_eq!(snapshot.move_history, ["Nf3", "d5"]);
    assert!(!snapshot.awaiting_ack);

    client.shutdown().await;
}

#[tokio::test]
async fn rejected_move_rolls_back() {
    let (mut client, mut events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.propose_move("e2", "e4", None).await.unwrap();
    next_event(&mut events).await;
    server.next_sent().await;

    server.push(error_json("Invalid move"));
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::MoveRejected {
            reason: "Invalid move".into()
        }
    );
    let rolled_back = game_updated(next_event(&mut events).await);
    assert_eq!(rolled_back, GameSnapshot::default());

    // The rollback leaves the turn with us.
    assert_eq!(client.propose_move("d2", "d4", None).await.unwrap(), "d4");

    client.shutdown().await;
}

#[tokio::test]
async fn only_one_move_in_flight() {
    let (mut client, mut events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.propose_move("e2", "e4", None).await.unwrap();
    let err = client.propose_move("d2", "d4", None).await.unwrap_err();
    assert!(matches!(err, GambitError::MovePending));

    assert_eq!(server.next_sent().await["type"], "move");
    client.send_chat("barrier").unwrap();
    assert_eq!(server.next_sent().await["type"], "chat_message");

    let snapshot = game_updated(next_event(&mut events).await);
    assert_eq!(snapshot.move_history, ["e4"]);

    client.shutdown().await;
}

#[tokio::test]
async fn proposals_are_checked_before_sending() {
    let (mut client, mut events, mut server) =
        start_client(black_session(), DisabledMedia::default()).await;

    let err = client.propose_move("e7", "e5", None).await.unwrap_err();
    assert!(matches!(err, GambitError::NotYourTurn));

    server.push(move_made_json("e2", "e4"));
    next_event(&mut events).await;
    let err = client.propose_move("e7", "e4", None).await.unwrap_err();
    assert!(matches!(err, GambitError::IllegalMove(_)));

    assert_eq!(client.propose_move("e7", "e5", None).await.unwrap(), "e5");
    let sent = server.next_sent().await;
    assert_eq!((&sent["from"], &sent["to"]), (&json!("e7"), &json!("e5")));
    assert_eq!(sent["move"]["color"], "b");
    assert_eq!(server.sent_count(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn resync_replaces_local_game() {
    let (mut client, mut events, server) =
        start_client(white_session(), DisabledMedia::default()).await;

    server.push(game_state_json(
        "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2",
        &["e4", "e5"],
    ));
    let snapshot = game_updated(next_event(&mut events).await);
    assert_eq!(snapshot.move_history, ["e4", "e5"]);
    assert_eq!(snapshot.turn, PlayerColor::White);

    // A history that does not reach the reported position is refused.
    server.push(game_state_json("start", &["d4"]));
    server.push(chat_json("bob", "hm"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::ChatAppended(_)
    ));
    assert_eq!(client.game().move_history, ["e4", "e5"]);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Chat, lobby, presence
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn chat_is_logged_once_and_relayed() {
    let (mut client, mut events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.send_chat("   ").unwrap();
    client.send_chat("  good luck  ").unwrap();

    let SessionEvent::ChatAppended(own) = next_event(&mut events).await else {
        panic!("expected ChatAppended");
    };
    assert_eq!(own.text, "good luck");
    assert_eq!(own.sender, "alice");
    assert!(own.is_own);
    assert_eq!(own.sequence, 0);
    assert_eq!(
        server.next_sent().await,
        json!({ "type": "chat_message", "message": "good luck", "sender": "alice" })
    );

    server.push(chat_json("bob", "you too"));
    let SessionEvent::ChatAppended(theirs) = next_event(&mut events).await else {
        panic!("expected ChatAppended");
    };
    assert_eq!(theirs.sender, "bob");
    assert!(!theirs.is_own);
    assert_eq!(theirs.sequence, 1);
    assert_eq!(server.sent_count(), 1);

    client.shutdown().await;
}

#[tokio::test]
async fn ready_is_sent_once() {
    let (mut client, _events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.send_ready().unwrap();
    client.send_ready().unwrap();
    client.send_chat("barrier").unwrap();

    assert_eq!(server.next_sent().await, json!({ "type": "player_ready" }));
    assert_eq!(server.next_sent().await["type"], "chat_message");

    client.shutdown().await;
}

#[tokio::test]
async fn match_ready_fires_once() {
    let (mut client, mut events, server) =
        start_client(white_session(), DisabledMedia::default()).await;

    server.push(lobby_json(true, false));
    let SessionEvent::LobbyUpdated { status, .. } = next_event(&mut events).await else {
        panic!("expected LobbyUpdated");
    };
    assert_eq!(status, "Waiting for players to be ready...");

    server.push(lobby_json(true, true));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::LobbyUpdated { .. }
    ));
    assert_eq!(next_event(&mut events).await, SessionEvent::MatchReady);

    server.push(lobby_json(true, true));
    server.push(chat_json("bob", "go"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::LobbyUpdated { .. }
    ));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::ChatAppended(_)
    ));

    client.shutdown().await;
}

#[tokio::test]
async fn opponent_joining_updates_session() {
    let session = Session::new("room-1", "alice", PlayerColor::White);
    let (mut client, mut events, server) = start_client(session, DisabledMedia::default()).await;
    assert_eq!(client.session().match_status(), "Waiting for opponent to join...");

    server.push(
        json!({
            "type": "opponent_joined",
            "white_player_name": "alice",
            "black_player_name": "bob",
        })
        .to_string(),
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::OpponentJoined {
            opponent_name: "bob".into()
        }
    );

    server.push(chat_json("bob", "hi"));
    next_event(&mut events).await;
    assert_eq!(client.session().match_status(), "Playing against: bob");

    client.shutdown().await;
}

#[tokio::test]
async fn malformed_and_unknown_frames_are_ignored() {
    let (mut client, mut events, server) =
        start_client(white_session(), DisabledMedia::default()).await;

    server.push("{definitely not json");
    server.push(r#"{"type": "spectator_joined"}"#);
    server.push(error_json("room is full"));

    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::ServerError {
            message: "room is full".into()
        }
    );
    assert!(client.is_connected());

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Video
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn lower_peer_id_places_the_call() {
    let (media, recorded) = RecordingMedia::new("peer-a");
    let (mut client, mut events, mut server) = start_client(white_session(), media).await;

    client.start_video().unwrap();
    assert_eq!(
        server.next_sent().await,
        json!({ "type": "video_signal", "peerId": "peer-a", "sender": "alice" })
    );

    server.push(video_signal_json("peer-b", "bob"));
    let SessionEvent::VideoUpdated { state, status } = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::VideoUpdated { state, .. } if state.call_state == CallState::Connected)
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(state.opponent_peer_id.as_deref(), Some("peer-b"));
    assert!(status.is_none());
    assert!(recorded.commands().contains(&MediaCommand::Call {
        peer_id: "peer-b".into()
    }));

    client.shutdown().await;
    let commands = recorded.commands();
    assert_eq!(
        commands[commands.len() - 3..],
        [
            MediaCommand::HangUp,
            MediaCommand::DestroyPeer,
            MediaCommand::StopMedia
        ]
    );
    assert!(server.is_closed());
    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await,
        SessionEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
}

#[tokio::test]
async fn higher_peer_id_answers_incoming_call() {
    let (media, recorded) = RecordingMedia::new("peer-z");
    let (mut client, mut events, mut server) = start_client(black_session(), media).await;

    client.start_video().unwrap();
    server.next_sent().await;
    server.push(video_signal_json("peer-a", "alice"));

    wait_for(&mut events, |e| {
        matches!(e, SessionEvent::VideoUpdated { state, .. } if state.phase == VideoPhase::AwaitingIncoming)
    })
    .await;
    assert!(!recorded
        .commands()
        .iter()
        .any(|c| matches!(c, MediaCommand::Call { .. })));

    let call_id = uuid::Uuid::new_v4();
    recorded.inject(MediaEvent::IncomingCall { call_id });
    wait_for(&mut events, |e| matches!(e, SessionEvent::VideoUpdated { .. })).await;
    assert!(recorded.commands().contains(&MediaCommand::Answer { call_id }));

    client.shutdown().await;
}

#[tokio::test]
async fn missing_camera_leaves_chess_playable() {
    let (mut client, mut events, mut server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.start_video().unwrap();
    let SessionEvent::VideoUpdated { state, status } = wait_for(&mut events, |e| {
        matches!(e, SessionEvent::VideoUpdated { status: Some(_), .. })
    })
    .await
    else {
        unreachable!()
    };
    assert_eq!(state.media, MediaState::Unavailable);
    assert!(status.unwrap().contains("no media backend"));

    assert_eq!(client.propose_move("e2", "e4", None).await.unwrap(), "e4");
    assert_eq!(server.next_sent().await["type"], "move");
    assert_eq!(server.sent_count(), 1);

    client.shutdown().await;
}

// ════════════════════════════════════════════════════════════════════
// Connection lifecycle
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn server_close_releases_media_and_ends_session() {
    let (media, recorded) = RecordingMedia::new("peer-a");
    let (client, mut events, mut server) = start_client(white_session(), media).await;

    client.start_video().unwrap();
    server.next_sent().await;
    server.hang_up();

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::ConnectionLost { .. })).await,
        SessionEvent::ConnectionLost { reason: None }
    );
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected { reason: None }
    );
    assert!(events.recv().await.is_none());

    let commands = recorded.commands();
    assert!(commands.ends_with(&[MediaCommand::DestroyPeer, MediaCommand::StopMedia]));
    assert!(!client.is_connected());
    assert!(matches!(
        client.propose_move("e2", "e4", None).await,
        Err(GambitError::NotConnected)
    ));
}

#[tokio::test]
async fn dropping_the_handle_releases_media() {
    let (media, recorded) = RecordingMedia::new("peer-a");
    let (client, mut events, mut server) = start_client(white_session(), media).await;

    client.start_video().unwrap();
    server.next_sent().await;
    drop(client);

    assert_eq!(
        wait_for(&mut events, |e| matches!(e, SessionEvent::Disconnected { .. })).await,
        SessionEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    assert!(recorded
        .commands()
        .ends_with(&[MediaCommand::DestroyPeer, MediaCommand::StopMedia]));
    assert!(server.is_closed());
}

#[tokio::test]
async fn receive_error_is_reported_as_lost_connection() {
    let (client, mut events, server) = start_client(white_session(), DisabledMedia::default()).await;

    server.fail(GambitError::TransportReceive("reset by peer".into()));

    let SessionEvent::ConnectionLost { reason } = next_event(&mut events).await else {
        panic!("expected ConnectionLost");
    };
    assert!(reason.unwrap().contains("reset by peer"));
    assert!(matches!(
        next_event(&mut events).await,
        SessionEvent::Disconnected { reason: Some(_) }
    ));
    assert!(!client.is_connected());
    assert!(!client.session().is_open());
}

#[tokio::test]
async fn shutdown_without_video_closes_transport() {
    let (mut client, mut events, server) =
        start_client(white_session(), DisabledMedia::default()).await;

    client.shutdown().await;
    assert!(server.is_closed());
    assert!(!client.is_connected());
    assert_eq!(
        next_event(&mut events).await,
        SessionEvent::Disconnected {
            reason: Some("client shut down".into())
        }
    );
    assert!(events.recv().await.is_none());
}
