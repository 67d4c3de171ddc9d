//! Optimistic move application and reconciliation with the server.
//!
//! The engine keeps two lines: the last position the server confirmed and,
//! while a local move is in flight, a speculative line with that move applied.
//! The UI always sees the speculative line when one exists. At most one move
//! is in flight; rejection drops the speculative line and the confirmed one
//! becomes visible again, unchanged.

use chess::{ChessMove, Piece, Square};
use serde::Serialize;
use tracing::{debug, info, trace, warn};

use crate::error::{GambitError, Result};
use crate::protocol::{ClientMessage, MoveRecord, PlayerColor};
use crate::rules::{self, Line, Outcome};
use crate::session::Session;

/// Whether a local move is waiting for the server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnginePhase {
    Idle,
    AwaitingAck,
}

/// The single outstanding optimistic move.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMove {
    pub from: Square,
    pub to: Square,
    pub promotion: Option<Piece>,
    pub san: String,
    mv: ChessMove,
    speculative: Line,
}

impl PendingMove {
    /// Position with the move applied.
    pub fn speculative(&self) -> &Line {
        &self.speculative
    }
}

/// How an inbound `move_made` was reconciled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciled {
    /// Our pending move came back from the server.
    Confirmed { san: String },
    /// The opponent moved. If a move of ours was pending it is now confirmed.
    OpponentMoved { san: String, acked: Option<String> },
    /// The server applied a different move from the confirmed position; ours
    /// was dropped.
    Superseded { san: String, dropped: String },
}

/// Immutable view of the game handed to the UI.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameSnapshot {
    /// FEN of the visible position.
    pub fen: String,
    pub move_history: Vec<String>,
    pub turn: PlayerColor,
    pub in_check: bool,
    pub outcome: Outcome,
    pub awaiting_ack: bool,
}

impl Default for GameSnapshot {
    fn default() -> Self {
        MoveEngine::new().snapshot()
    }
}

impl GameSnapshot {
    /// Status line under the board.
    pub fn status_text(&self) -> String {
        match self.outcome {
            Outcome::Checkmate { .. } => {
                format!("Game over, {} is in checkmate.", self.turn.title())
            }
            Outcome::Draw { .. } => "Game over, drawn position".to_string(),
            Outcome::Ongoing => format!("{}'s turn", self.turn.title()),
        }
    }
}

/// Owns the game state of one session.
#[derive(Debug, Clone, Default)]
pub struct MoveEngine {
    confirmed: Line,
    pending: Option<PendingMove>,
}

impl MoveEngine {
    /// A fresh game from the standard initial position.
    pub fn new() -> Self {
        Self::default()
    }

    /// Restore a game from a reported position and its SAN history.
    ///
    /// Fails with [`GambitError::InvalidPosition`] if the history does not
    /// replay to the reported position.
    pub fn from_history<S: AsRef<str>>(position: &str, moves: &[S]) -> Result<Self> {
        Ok(Self {
            confirmed: Line::replay_checked(position, moves)?,
            pending: None,
        })
    }

    pub fn phase(&self) -> EnginePhase {
        if self.pending.is_some() {
            EnginePhase::AwaitingAck
        } else {
            EnginePhase::Idle
        }
    }

    pub fn pending(&self) -> Option<&PendingMove> {
        self.pending.as_ref()
    }

    /// The last position the server agreed to.
    pub fn confirmed(&self) -> &Line {
        &self.confirmed
    }

    /// The position the UI should show.
    pub fn visible(&self) -> &Line {
        self.pending
            .as_ref()
            .map(|p| &p.speculative)
            .unwrap_or(&self.confirmed)
    }

    pub fn outcome(&self) -> Outcome {
        self.visible().outcome()
    }

    /// Validate a local move and apply it optimistically.
    ///
    /// On success the speculative position is visible immediately and the
    /// returned message must be sent to the server. On error nothing changed.
    pub fn propose_move(
        &mut self,
        session: &Session,
        from: &str,
        to: &str,
        promotion: Option<&str>,
    ) -> Result<ClientMessage> {
        if self.pending.is_some() {
            return Err(GambitError::MovePending);
        }
        if self.confirmed.outcome().is_over() {
            return Err(GambitError::GameOver);
        }
        if self.confirmed.turn() != session.self_color {
            return Err(GambitError::NotYourTurn);
        }

        let from = rules::parse_square(from)?;
        let to = rules::parse_square(to)?;
        let promotion = promotion.map(rules::parse_promotion).transpose()?;
        let mv = rules::resolve_move(self.confirmed.board(), from, to, promotion)?;
        let (speculative, san) = self.confirmed.play(from, to, mv.get_promotion())?;

        debug!(%from, %to, san = %san, "applied move optimistically");
        let promotion = mv.get_promotion().map(|p| rules::promotion_letter(p).to_string());
        let record = MoveRecord {
            color: session.self_color.letter().to_string(),
            from: from.to_string(),
            to: to.to_string(),
            san: san.clone(),
            promotion: promotion.clone(),
        };
        let fen = speculative.fen();
        self.pending = Some(PendingMove {
            from,
            to,
            promotion: mv.get_promotion(),
            san,
            mv,
            speculative,
        });

        Ok(ClientMessage::Move {
            from: from.to_string(),
            to: to.to_string(),
            promotion,
            fen: Some(fen),
            record: Some(record),
        })
    }

    /// Replace local state with a full server resync.
    ///
    /// The history is replayed and checked against `position` first; a
    /// mismatch is refused and leaves local state untouched.
    pub fn on_authoritative_update<S: AsRef<str>>(&mut self, position: &str, moves: &[S]) -> Result<()> {
        let line = Line::replay_checked(position, moves)?;
        if let Some(pending) = self.pending.take() {
            debug!(san = %pending.san, "authoritative update replaced pending move");
        }
        info!(moves = line.history().len(), "game state resynchronized");
        self.confirmed = line;
        Ok(())
    }

    /// Reconcile a move the server accepted.
    pub fn on_move_made(&mut self, from: &str, to: &str, promotion: Option<&str>) -> Result<Reconciled> {
        let from = rules::parse_square(from)?;
        let to = rules::parse_square(to)?;
        let promotion = promotion.map(rules::parse_promotion).transpose()?;

        let Some(pending) = self.pending.take() else {
            let (line, san) = self.confirmed.play(from, to, promotion).map_err(|e| {
                warn!(%from, %to, "refusing move_made that is illegal here");
                e
            })?;
            debug!(san = %san, "opponent moved");
            self.confirmed = line;
            return Ok(Reconciled::OpponentMoved { san, acked: None });
        };

        let echoed = rules::resolve_move(self.confirmed.board(), from, to, promotion)
            .map(|mv| mv == pending.mv)
            .unwrap_or(false);
        if echoed {
            debug!(san = %pending.san, "pending move confirmed");
            self.confirmed = pending.speculative;
            return Ok(Reconciled::Confirmed { san: pending.san });
        }

        if let Ok((line, san)) = pending.speculative.play(from, to, promotion) {
            debug!(acked = %pending.san, reply = %san, "opponent reply implies ack");
            self.confirmed = line;
            return Ok(Reconciled::OpponentMoved {
                san,
                acked: Some(pending.san),
            });
        }

        match self.confirmed.play(from, to, promotion) {
            Ok((line, san)) => {
                trace!(dropped = %pending.san, "rolling back");
                warn!(dropped = %pending.san, applied = %san, "server applied a different move");
                self.confirmed = line;
                Ok(Reconciled::Superseded {
                    san,
                    dropped: pending.san,
                })
            }
            Err(e) => {
                warn!(%from, %to, "refusing move_made that fits neither line");
                self.pending = Some(pending);
                Err(e)
            }
        }
    }

    /// Roll back the pending move after a server error.
    ///
    /// Returns the rejection when a move was rolled back, `None` when nothing
    /// was pending.
    pub fn on_rejection(&mut self, reason: &str) -> Option<GambitError> {
        let pending = self.pending.take()?;
        trace!(san = %pending.san, "rolling back");
        info!(san = %pending.san, reason, "server rejected move");
        Some(GambitError::MoveRejectedByServer(reason.to_string()))
    }

    /// Snapshot of the visible position.
    pub fn snapshot(&self) -> GameSnapshot {
        let line = self.visible();
        let eval = rules::evaluate(line);
        GameSnapshot {
            fen: line.fen(),
            move_history: line.history().to_vec(),
            turn: eval.turn,
            in_check: eval.in_check,
            outcome: eval.outcome,
            awaiting_ack: self.pending.is_some(),
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

    const START_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

    fn white() -> Session {
        Session::new("r", "alice", PlayerColor::White).with_opponent("bob")
    }

    fn black() -> Session {
        Session::new("r", "bob", PlayerColor::Black).with_opponent("alice")
    }

    #[test]
    fn propose_applies_speculatively() {
        let mut engine = MoveEngine::new();
        let msg = engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let snap = engine.snapshot();
        assert_eq!(
            msg,
            ClientMessage::Move {
                from: "e2".into(),
                to: "e4".into(),
                promotion: None,
                fen: Some(snap.fen.clone()),
                record: Some(MoveRecord {
                    color: "w".into(),
                    from: "e2".into(),
                    to: "e4".into(),
                    san: "e4".into(),
                    promotion: None,
                }),
            }
        );
        assert_eq!(snap.move_history, ["e4"]);
        assert_eq!(snap.turn, PlayerColor::Black);
        assert!(snap.awaiting_ack);
        assert_eq!(engine.phase(), EnginePhase::AwaitingAck);
    }

    #[test]
    fn second_proposal_while_pending_is_rejected() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let before = engine.snapshot();
        assert!(matches!(
            engine.propose_move(&white(), "d2", "d4", None),
            Err(GambitError::MovePending)
        ));
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn out_of_turn_and_illegal_moves_change_nothing() {
        let mut engine = MoveEngine::new();
        assert!(matches!(
            engine.propose_move(&black(), "e7", "e5", None),
            Err(GambitError::NotYourTurn)
        ));
        assert!(matches!(
            engine.propose_move(&white(), "e2", "e5", None),
            Err(GambitError::IllegalMove(_))
        ));
        assert_eq!(engine.phase(), EnginePhase::Idle);
        assert_eq!(engine.snapshot().fen, START_FEN);
    }

    #[test]
    fn rejection_restores_confirmed_position_exactly() {
        let mut engine = MoveEngine::new();
        let before = engine.snapshot();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let rejection = engine.on_rejection("Invalid move").unwrap();
        assert!(matches!(&rejection, GambitError::MoveRejectedByServer(r) if r == "Invalid move"));
        assert_eq!(engine.snapshot(), before);
        assert_eq!(engine.phase(), EnginePhase::Idle);
    }

    #[test]
    fn rejection_without_pending_is_none() {
        let mut engine = MoveEngine::new();
        assert!(engine.on_rejection("oops").is_none());
    }

    #[test]
    fn echo_confirms_pending_move() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let outcome = engine.on_move_made("e2", "e4", None).unwrap();
        assert_eq!(outcome, Reconciled::Confirmed { san: "e4".into() });
        assert_eq!(engine.confirmed().history(), ["e4"]);
        assert!(!engine.snapshot().awaiting_ack);
    }

    #[test]
    fn opponent_reply_implicitly_acks() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let outcome = engine.on_move_made("e7", "e5", None).unwrap();
        assert_eq!(
            outcome,
            Reconciled::OpponentMoved {
                san: "e5".into(),
                acked: Some("e4".into())
            }
        );
        assert_eq!(engine.snapshot().move_history, ["e4", "e5"]);
        assert_eq!(engine.phase(), EnginePhase::Idle);
    }

    #[test]
    fn different_server_move_supersedes_pending() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        let outcome = engine.on_move_made("d2", "d4", None).unwrap();
        assert_eq!(
            outcome,
            Reconciled::Superseded {
                san: "d4".into(),
                dropped: "e4".into()
            }
        );
        assert_eq!(engine.snapshot().move_history, ["d4"]);
    }

    #[test]
    fn move_fitting_neither_line_keeps_pending() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        assert!(engine.on_move_made("a1", "h8", None).is_err());
        assert_eq!(engine.phase(), EnginePhase::AwaitingAck);
    }

    #[test]
    fn server_wins_on_authoritative_update() {
        let mut engine = MoveEngine::new();
        engine.propose_move(&white(), "e2", "e4", None).unwrap();
        engine
            .on_authoritative_update(
                "rnbqkbnr/pppppppp/8/8/3P4/8/PPP1PPPP/RNBQKBNR b KQkq - 0 1",
                &["d4"],
            )
            .unwrap();
        assert_eq!(engine.phase(), EnginePhase::Idle);
        assert_eq!(engine.snapshot().move_history, ["d4"]);
    }

    #[test]
    fn inconsistent_authoritative_update_is_refused() {
        let mut engine = MoveEngine::new();
        let before = engine.snapshot();
        assert!(engine.on_authoritative_update(START_FEN, &["e4"]).is_err());
        assert_eq!(engine.snapshot(), before);
    }

    #[test]
    fn finished_game_refuses_moves() {
        let mut engine = MoveEngine::from_history(
            "rnb1kbnr/pppp1ppp/8/4p3/6Pq/5P2/PPPPP2P/RNBQKBNR w KQkq - 1 3",
            &["f3", "e5", "g4", "Qh4#"],
        )
        .unwrap();
        let snap = engine.snapshot();
        assert_eq!(
            snap.outcome,
            Outcome::Checkmate {
                winner: PlayerColor::Black
            }
        );
        assert_eq!(snap.status_text(), "Game over, White is in checkmate.");
        assert!(matches!(
            engine.propose_move(&white(), "a2", "a3", None),
            Err(GambitError::GameOver)
        ));
    }

    #[test]
    fn status_text_names_side_to_move() {
        let engine = MoveEngine::new();
        assert_eq!(engine.snapshot().status_text(), "White's turn");
    }
}
