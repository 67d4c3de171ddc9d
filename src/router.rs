//! Inbound message dispatch.
//!
//! The [`Router`] owns every per-session component and turns each input
//! (a server frame, a UI command, a media completion) into a [`Reaction`]:
//! frames to send, media commands to execute, and events to publish. It does
//! no I/O itself, so every reaction runs to completion before the next one
//! starts and the whole session logic is testable without a runtime.

use tracing::{debug, warn};

use crate::chat::ChatLog;
use crate::error::{GambitError, Result};
use crate::event::SessionEvent;
use crate::game::{MoveEngine, Reconciled};
use crate::lobby::LobbyCoordinator;
use crate::protocol::{ClientMessage, ServerMessage};
use crate::rules;
use crate::session::{ConnectionState, Session};
use crate::video::{MediaCommand, MediaEvent, VideoCoordinator, VideoEffects};

/// Everything one input produced.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct Reaction {
    pub outbound: Vec<ClientMessage>,
    pub media: Vec<MediaCommand>,
    pub events: Vec<SessionEvent>,
}

impl Reaction {
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.media.is_empty() && self.events.is_empty()
    }
}

/// Per-session component owner and message dispatcher.
#[derive(Debug, Clone)]
pub struct Router {
    session: Session,
    game: MoveEngine,
    lobby: LobbyCoordinator,
    chat: ChatLog,
    video: VideoCoordinator,
    lost_reason: Option<String>,
}

impl Router {
    pub fn new(session: Session, game: MoveEngine) -> Self {
        let video = VideoCoordinator::new(session.self_name.clone());
        Self {
            session,
            game,
            lobby: LobbyCoordinator::new(),
            chat: ChatLog::new(),
            video,
            lost_reason: None,
        }
    }

    /// Replace the lobby coordinator, e.g. one built from a REST snapshot.
    #[must_use]
    pub fn with_lobby(mut self, lobby: LobbyCoordinator) -> Self {
        self.lobby = lobby;
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn game(&self) -> &MoveEngine {
        &self.game
    }

    pub fn lobby(&self) -> &LobbyCoordinator {
        &self.lobby
    }

    pub fn chat(&self) -> &ChatLog {
        &self.chat
    }

    pub fn video(&self) -> &VideoCoordinator {
        &self.video
    }

    /// The transport is up.
    pub fn on_connected(&mut self) {
        self.session.connection_state = ConnectionState::Open;
    }

    /// Parse and dispatch one text frame. Malformed JSON is logged and
    /// dropped.
    pub fn route_text(&mut self, text: &str) -> Reaction {
        match serde_json::from_str::<ServerMessage>(text) {
            Ok(msg) => self.dispatch(msg),
            Err(e) => {
                warn!(error = %e, raw = %text, "dropping malformed server message");
                Reaction::default()
            }
        }
    }

    /// Hand a server message to the component that owns it.
    pub fn dispatch(&mut self, msg: ServerMessage) -> Reaction {
        debug!(kind = msg.kind(), "dispatching server message");
        let mut reaction = Reaction::default();
        match msg {
            ServerMessage::GameStart {
                status,
                position,
                waiting_for_opponent,
                player_color,
            } => {
                debug!(status = %status, color = %player_color, "match greeting");
                self.check_greeting_position(&position);
                self.lobby
                    .on_game_start(&mut self.session, player_color, waiting_for_opponent);
            }
            ServerMessage::MoveMade {
                from,
                to,
                promotion,
            } => match self.game.on_move_made(&from, &to, promotion.as_deref()) {
                Ok(reconciled) => {
                    if let Reconciled::Superseded { dropped, .. } = &reconciled {
                        reaction.events.push(SessionEvent::MoveRejected {
                            reason: format!("server applied a different move than {dropped}"),
                        });
                    }
                    reaction
                        .events
                        .push(SessionEvent::GameUpdated(self.game.snapshot()));
                }
                Err(e) => warn!(error = %e, %from, %to, "refused move_made"),
            },
            ServerMessage::GameStateUpdate { position, moves } => {
                match self.game.on_authoritative_update(&position, &moves) {
                    Ok(()) => reaction
                        .events
                        .push(SessionEvent::GameUpdated(self.game.snapshot())),
                    Err(e) => warn!(error = %e, "refused game_state_update"),
                }
            }
            ServerMessage::Error { message } => match self.game.on_rejection(&message) {
                Some(rejection) => {
                    debug!("{rejection}");
                    reaction
                        .events
                        .push(SessionEvent::MoveRejected { reason: message });
                    reaction
                        .events
                        .push(SessionEvent::GameUpdated(self.game.snapshot()));
                }
                None => {
                    warn!(message = %message, "server error");
                    reaction.events.push(SessionEvent::ServerError { message });
                }
            },
            ServerMessage::ChatMessage { message, sender } => {
                let entry = self.chat.receive(sender, message);
                reaction.events.push(SessionEvent::ChatAppended(entry));
            }
            ServerMessage::OpponentJoined {
                white_player_name,
                black_player_name,
            } => {
                let opponent_name = self.lobby.on_opponent_joined(
                    &mut self.session,
                    &white_player_name,
                    &black_player_name,
                );
                reaction
                    .events
                    .push(SessionEvent::OpponentJoined { opponent_name });
            }
            ServerMessage::LobbyStateUpdate(update) => {
                let fired = self.lobby.on_lobby_update(update);
                reaction.events.push(SessionEvent::LobbyUpdated {
                    lobby: self.lobby.state().clone(),
                    status: self.lobby.status_text().to_string(),
                });
                if fired {
                    reaction.events.push(SessionEvent::MatchReady);
                }
            }
            ServerMessage::VideoSignal { peer_id, .. } => {
                let effects = self.video.on_remote_peer_id(peer_id);
                self.apply_video(effects, &mut reaction, true);
            }
            ServerMessage::Unknown => debug!("ignoring unknown message type"),
        }
        reaction
    }

    /// The greeting carries the server's position. A mismatch means the local
    /// game was seeded from stale data; the next authoritative update fixes it.
    fn check_greeting_position(&self, position: &str) -> bool {
        if position.trim().is_empty() {
            return true;
        }
        match rules::parse_position(position) {
            Ok(board) if rules::same_position(&board, self.game.confirmed().board()) => true,
            Ok(board) => {
                warn!(
                    server = %board,
                    local = %self.game.confirmed().fen(),
                    "greeting position differs from local game"
                );
                false
            }
            Err(e) => {
                warn!(error = %e, "greeting carries an unreadable position");
                false
            }
        }
    }

    fn ensure_live(&self) -> Result<()> {
        match self.session.connection_state {
            ConnectionState::Lost => Err(GambitError::ConnectionLost(self.lost_reason.clone())),
            ConnectionState::Closed => Err(GambitError::NotConnected),
            ConnectionState::Connecting | ConnectionState::Open => Ok(()),
        }
    }

    /// Propose a local move. On success returns its SAN.
    pub fn propose_move(
        &mut self,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> (Result<String>, Reaction) {
        let mut reaction = Reaction::default();
        if let Err(e) = self.ensure_live() {
            return (Err(e), reaction);
        }
        match self.game.propose_move(&self.session, from, to, promotion) {
            Ok(outbound) => {
                let san = self
                    .game
                    .pending()
                    .map(|p| p.san.clone())
                    .unwrap_or_default();
                reaction.outbound.push(outbound);
                reaction
                    .events
                    .push(SessionEvent::GameUpdated(self.game.snapshot()));
                (Ok(san), reaction)
            }
            Err(e) => {
                debug!(error = %e, from, to, "move proposal refused");
                (Err(e), reaction)
            }
        }
    }

    pub fn send_chat(&mut self, text: &str) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some((entry, outbound)) = self.chat.send(&self.session, text) {
            reaction.outbound.push(outbound);
            reaction.events.push(SessionEvent::ChatAppended(entry));
        }
        reaction
    }

    pub fn send_ready(&mut self) -> Reaction {
        let mut reaction = Reaction::default();
        if let Some(outbound) = self.lobby.send_ready() {
            reaction.outbound.push(outbound);
        }
        reaction
    }

    pub fn start_video(&mut self) -> Reaction {
        let effects = self.video.start();
        self.video_reaction(effects)
    }

    pub fn toggle_audio(&mut self) -> Reaction {
        let effects = self.video.toggle_audio();
        self.video_reaction(effects)
    }

    pub fn toggle_video(&mut self) -> Reaction {
        let effects = self.video.toggle_video();
        self.video_reaction(effects)
    }

    /// Every completion changes video state, so `VideoUpdated` is always
    /// published.
    pub fn on_media_event(&mut self, event: MediaEvent) -> Reaction {
        let effects = self.video.on_event(event);
        let mut reaction = Reaction::default();
        self.apply_video(effects, &mut reaction, true);
        reaction
    }

    /// The transport closed unexpectedly: mark the session lost and release
    /// media.
    pub fn on_transport_lost(&mut self, reason: Option<String>) -> Reaction {
        self.session.connection_state = ConnectionState::Lost;
        self.lost_reason.clone_from(&reason);
        let effects = self.video.teardown();
        let mut reaction = self.video_reaction(effects);
        reaction.events.push(SessionEvent::ConnectionLost { reason });
        reaction
    }

    /// Orderly shutdown: mark the session closed and release media.
    pub fn teardown(&mut self) -> Reaction {
        self.session.connection_state = ConnectionState::Closed;
        let effects = self.video.teardown();
        self.video_reaction(effects)
    }

    fn video_reaction(&mut self, effects: VideoEffects) -> Reaction {
        let mut reaction = Reaction::default();
        self.apply_video(effects, &mut reaction, false);
        reaction
    }

    /// Queue video effects. `VideoUpdated` is published when something was
    /// requested, or unconditionally with `always`.
    fn apply_video(&mut self, effects: VideoEffects, reaction: &mut Reaction, always: bool) {
        let changed = always || !effects.is_empty();
        reaction.media.extend(effects.commands);
        reaction.outbound.extend(effects.outbound);
        if changed {
            reaction.events.push(SessionEvent::VideoUpdated {
                state: self.video.state(),
                status: effects.status,
            });
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
    use crate::protocol::PlayerColor;

    fn router() -> Router {
        let session = Session::new("room-1", "alice", PlayerColor::White).with_opponent("bob");
        let mut router = Router::new(session, MoveEngine::new());
        router.on_connected();
        router
    }

    #[test]
    fn malformed_json_is_dropped() {
        let mut router = router();
        assert!(router.route_text("{not json").is_empty());
        assert!(router.route_text(r#"{"type": "fireworks"}"#).is_empty());
    }

    #[test]
    fn error_without_pending_move_is_a_server_error() {
        let mut router = router();
        let reaction = router.route_text(r#"{"type": "error", "message": "room full"}"#);
        assert_eq!(
            reaction.events,
            [SessionEvent::ServerError {
                message: "room full".into()
            }]
        );
    }

    #[test]
    fn error_with_pending_move_rolls_back() {
        let mut router = router();
        let (san, _) = router.propose_move("e2", "e4", None);
        assert_eq!(san.unwrap(), "e4");
        let reaction = router.route_text(r#"{"type": "error", "message": "Invalid move"}"#);
        assert_eq!(
            reaction.events[0],
            SessionEvent::MoveRejected {
                reason: "Invalid move".into()
            }
        );
        let SessionEvent::GameUpdated(snapshot) = &reaction.events[1] else {
            panic!("expected GameUpdated");
        };
        assert!(snapshot.move_history.is_empty());
    }

    #[test]
    fn greeting_position_is_checked_against_local_game() {
        let mut router = router();
        assert!(router.check_greeting_position("start"));
        assert!(router.check_greeting_position(""));

        let after_e4 = "rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b KQkq e3 0 1";
        assert!(!router.check_greeting_position(after_e4));
        assert!(!router.check_greeting_position("not a fen"));

        // A stale greeting is logged, not applied.
        let reaction = router.route_text(&format!(
            r#"{{"type": "game_start", "position": "{after_e4}", "player_color": "white"}}"#
        ));
        assert!(reaction.is_empty());
        assert_eq!(router.game().snapshot().move_history.len(), 0);
    }

    #[test]
    fn lost_session_refuses_moves() {
        let mut router = router();
        let reaction = router.on_transport_lost(Some("reset".into()));
        assert!(reaction.events.contains(&SessionEvent::ConnectionLost {
            reason: Some("reset".into())
        }));
        let (result, reaction) = router.propose_move("e2", "e4", None);
        assert!(matches!(result, Err(GambitError::ConnectionLost(Some(r))) if r == "reset"));
        assert!(reaction.is_empty());
    }

    #[test]
    fn opponent_joined_updates_session() {
        let mut router = Router::new(
            Session::new("room-1", "alice", PlayerColor::White),
            MoveEngine::new(),
        );
        let reaction = router.route_text(
            r#"{"type": "opponent_joined", "white_player_name": "alice", "black_player_name": "bob"}"#,
        );
        assert_eq!(
            reaction.events,
            [SessionEvent::OpponentJoined {
                opponent_name: "bob".into()
            }]
        );
        assert_eq!(router.session().match_status(), "Playing against: bob");
    }

    #[test]
    fn video_signal_reaches_video_coordinator() {
        let mut router = router();
        router.start_video();
        router.on_media_event(MediaEvent::MediaReady);
        let opened = router.on_media_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        assert_eq!(opened.outbound.len(), 1);
        let reaction = router.route_text(r#"{"type": "video_signal", "peerId": "bbb"}"#);
        assert_eq!(
            reaction.media,
            [MediaCommand::Call {
                peer_id: "bbb".into()
            }]
        );
    }

    #[test]
    fn quiet_media_completion_still_publishes_state() {
        let mut router = router();
        router.start_video();
        router.on_media_event(MediaEvent::MediaReady);
        router.on_media_event(MediaEvent::PeerOpened {
            peer_id: "aaa".into(),
        });
        router.route_text(r#"{"type": "video_signal", "peerId": "bbb"}"#);

        let reaction = router.on_media_event(MediaEvent::CallConnected);
        assert!(reaction.media.is_empty());
        assert!(reaction.outbound.is_empty());
        let [SessionEvent::VideoUpdated { state, status }] = reaction.events.as_slice() else {
            panic!("expected a single VideoUpdated, got {:?}", reaction.events);
        };
        assert_eq!(state.call_state, crate::video::CallState::Connected);
        assert!(status.is_none());
    }
}
