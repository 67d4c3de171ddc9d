//! Chess rules on top of the `chess` crate.
//!
//! Positions are immutable [`chess::Board`] values. A [`Line`] is a board
//! together with the SAN history that produced it from the standard initial
//! position; every new move yields a new `Line`, so the replay property
//! (`position == replay(history)`) holds by construction.

use std::str::FromStr;

use chess::{Board, BoardStatus, ChessMove, Color, MoveGen, Piece, Square};
use serde::Serialize;

use crate::error::{GambitError, Result};
use crate::protocol::PlayerColor;

/// Sentinel some servers send instead of the initial FEN.
pub const START_SENTINEL: &str = "start";

/// Halfmoves without a capture or pawn move after which the game is drawn.
const FIFTY_MOVE_HALFMOVES: u32 = 100;

/// Why a game ended in a draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrawReason {
    Stalemate,
    InsufficientMaterial,
    ThreefoldRepetition,
    FiftyMoveRule,
}

/// Result of the game at the current position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Ongoing,
    Checkmate { winner: PlayerColor },
    Draw { reason: DrawReason },
}

impl Outcome {
    pub fn is_over(self) -> bool {
        !matches!(self, Outcome::Ongoing)
    }
}

/// Parse a lowercase coordinate square such as `"e4"`.
pub fn parse_square(text: &str) -> Result<Square> {
    Square::from_str(text.trim())
        .map_err(|_| GambitError::IllegalMove(format!("invalid square '{text}'")))
}

/// Parse a promotion piece letter (`q`, `r`, `b`, `n`, either case).
pub fn parse_promotion(text: &str) -> Result<Piece> {
    match text.trim().to_ascii_lowercase().as_str() {
        "q" => Ok(Piece::Queen),
        "r" => Ok(Piece::Rook),
        "b" => Ok(Piece::Bishop),
        "n" => Ok(Piece::Knight),
        other => Err(GambitError::IllegalMove(format!(
            "invalid promotion piece '{other}'"
        ))),
    }
}

/// Lowercase promotion letter as sent on the wire.
pub fn promotion_letter(piece: Piece) -> &'static str {
    match piece {
        Piece::Rook => "r",
        Piece::Bishop => "b",
        Piece::Knight => "n",
        _ => "q",
    }
}

/// Parse a FEN string, accepting the [`START_SENTINEL`].
pub fn parse_position(text: &str) -> Result<Board> {
    let text = text.trim();
    if text.is_empty() || text == START_SENTINEL {
        return Ok(Board::default());
    }
    Board::from_str(text).map_err(|e| GambitError::InvalidPosition(format!("{text}: {e}")))
}

/// Compare piece placement, side to move and castling rights.
///
/// Move counters and en-passant notation are ignored because servers disagree
/// on whether to report an en-passant square no pawn can use.
pub fn same_position(a: &Board, b: &Board) -> bool {
    let a = a.to_string();
    let b = b.to_string();
    a.split_whitespace()
        .take(3)
        .eq(b.split_whitespace().take(3))
}

/// Resolve a coordinate move against `board`, checking legality.
///
/// A pawn reaching the last rank without an explicit promotion promotes to a
/// queen.
pub fn resolve_move(
    board: &Board,
    from: Square,
    to: Square,
    promotion: Option<Piece>,
) -> Result<ChessMove> {
    let promotion = match (board.piece_on(from), promotion) {
        (Some(Piece::Pawn), None) if is_last_rank(to, board.side_to_move()) => Some(Piece::Queen),
        (Some(Piece::Pawn), promo) => promo,
        (_, _) => None,
    };
    let candidate = ChessMove::new(from, to, promotion);
    if MoveGen::new_legal(board).any(|m| m == candidate) {
        Ok(candidate)
    } else {
        Err(GambitError::IllegalMove(format!("{from}{to}")))
    }
}

/// A legal move applied to a board.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppliedMove {
    pub mv: ChessMove,
    /// Position after the move.
    pub board: Board,
    pub san: String,
    /// Coordinate form, e.g. `"e2e4"` or `"a7a8q"`.
    pub uci: String,
}

impl AppliedMove {
    fn new(board: &Board, mv: ChessMove) -> Self {
        let mut uci = format!("{}{}", mv.get_source(), mv.get_dest());
        if let Some(piece) = mv.get_promotion() {
            uci.push_str(promotion_letter(piece));
        }
        Self {
            mv,
            board: board.make_move_new(mv),
            san: to_san(board, mv),
            uci,
        }
    }
}

/// Apply a coordinate move to `board` if it is legal.
pub fn apply_move(
    board: &Board,
    from: Square,
    to: Square,
    promotion: Option<Piece>,
) -> Result<AppliedMove> {
    let mv = resolve_move(board, from, to, promotion)?;
    Ok(AppliedMove::new(board, mv))
}

fn is_last_rank(square: Square, mover: Color) -> bool {
    let rank = square.get_rank().to_index();
    match mover {
        Color::White => rank == 7,
        Color::Black => rank == 0,
    }
}

fn piece_letter(piece: Piece) -> char {
    match piece {
        Piece::Pawn => 'P',
        Piece::Knight => 'N',
        Piece::Bishop => 'B',
        Piece::Rook => 'R',
        Piece::Queen => 'Q',
        Piece::King => 'K',
    }
}

fn file_char(square: Square) -> char {
    char::from(b'a' + square.get_file().to_index() as u8)
}

fn rank_char(square: Square) -> char {
    char::from(b'1' + square.get_rank().to_index() as u8)
}

/// Standard algebraic notation for a legal move on `board`.
pub fn to_san(board: &Board, mv: ChessMove) -> String {
    let src = mv.get_source();
    let dst = mv.get_dest();
    let piece = board.piece_on(src).unwrap_or(Piece::Pawn);

    let mut san = String::new();
    let file_delta = src.get_file().to_index().abs_diff(dst.get_file().to_index());

    if piece == Piece::King && file_delta == 2 {
        san.push_str(if dst.get_file().to_index() > src.get_file().to_index() {
            "O-O"
        } else {
            "O-O-O"
        });
    } else if piece == Piece::Pawn {
        // A diagonal pawn step is always a capture, en passant included.
        if file_delta != 0 {
            san.push(file_char(src));
            san.push('x');
        }
        san.push_str(&dst.to_string());
        if let Some(promo) = mv.get_promotion() {
            san.push('=');
            san.push(piece_letter(promo));
        }
    } else {
        san.push(piece_letter(piece));

        let rivals: Vec<Square> = MoveGen::new_legal(board)
            .filter(|m| {
                m.get_dest() == dst
                    && m.get_source() != src
                    && board.piece_on(m.get_source()) == Some(piece)
            })
            .map(|m| m.get_source())
            .collect();
        if !rivals.is_empty() {
            let shares_file = rivals.iter().any(|s| s.get_file() == src.get_file());
            let shares_rank = rivals.iter().any(|s| s.get_rank() == src.get_rank());
            if !shares_file {
                san.push(file_char(src));
            } else if !shares_rank {
                san.push(rank_char(src));
            } else {
                san.push(file_char(src));
                san.push(rank_char(src));
            }
        }

        if board.piece_on(dst).is_some() {
            san.push('x');
        }
        san.push_str(&dst.to_string());
    }

    let after = board.make_move_new(mv);
    if after.status() == BoardStatus::Checkmate {
        san.push('#');
    } else if after.checkers().popcnt() > 0 {
        san.push('+');
    }
    san
}

/// Find the legal move on `board` written as `san`.
pub fn parse_san(board: &Board, san: &str) -> Result<ChessMove> {
    let clean = san
        .trim()
        .trim_end_matches(|c: char| matches!(c, '+' | '#' | '!' | '?'));
    let illegal = || GambitError::InvalidPosition(format!("no legal move matches '{san}'"));

    let castle_kingside = matches!(clean, "O-O" | "0-0");
    let castle_queenside = matches!(clean, "O-O-O" | "0-0-0");
    if castle_kingside || castle_queenside {
        return MoveGen::new_legal(board)
            .find(|m| {
                let src = m.get_source().get_file().to_index();
                let dst = m.get_dest().get_file().to_index();
                board.piece_on(m.get_source()) == Some(Piece::King)
                    && src.abs_diff(dst) == 2
                    && (dst > src) == castle_kingside
            })
            .ok_or_else(illegal);
    }

    let (piece, rest) = match clean.chars().next() {
        Some('K') => (Piece::King, clean.get(1..).unwrap_or_default()),
        Some('Q') => (Piece::Queen, clean.get(1..).unwrap_or_default()),
        Some('R') => (Piece::Rook, clean.get(1..).unwrap_or_default()),
        Some('B') => (Piece::Bishop, clean.get(1..).unwrap_or_default()),
        Some('N') => (Piece::Knight, clean.get(1..).unwrap_or_default()),
        Some(_) => (Piece::Pawn, clean),
        None => return Err(illegal()),
    };

    let (rest, promotion) = match rest.split_once('=') {
        Some((head, promo)) => (head, Some(parse_promotion(promo).map_err(|_| illegal())?)),
        None => (rest, None),
    };

    let rest: String = rest.chars().filter(|c| *c != 'x').collect();
    if rest.len() < 2 || !rest.is_ascii() {
        return Err(illegal());
    }
    let (disambiguation, dest) = rest.split_at(rest.len() - 2);
    let dest = Square::from_str(dest).map_err(|_| illegal())?;

    let candidates: Vec<ChessMove> = MoveGen::new_legal(board)
        .filter(|m| {
            m.get_dest() == dest
                && board.piece_on(m.get_source()) == Some(piece)
                && m.get_promotion() == promotion
        })
        .filter(|m| {
            disambiguation.chars().all(|c| match c {
                'a'..='h' => file_char(m.get_source()) == c,
                '1'..='8' => rank_char(m.get_source()) == c,
                _ => false,
            })
        })
        .collect();

    match candidates.as_slice() {
        [only] => Ok(*only),
        _ => Err(illegal()),
    }
}

/// Kings alone, a single minor piece, or same-coloured bishops only.
pub fn has_insufficient_material(board: &Board) -> bool {
    let heavy = *board.pieces(Piece::Pawn) | *board.pieces(Piece::Rook) | *board.pieces(Piece::Queen);
    if heavy.popcnt() > 0 {
        return false;
    }

    let knights = *board.pieces(Piece::Knight);
    let bishops = *board.pieces(Piece::Bishop);
    let minors = (knights | bishops).popcnt();
    if minors <= 1 {
        return true;
    }
    if knights.popcnt() > 0 {
        return false;
    }

    // Only bishops left: drawn if they all stand on squares of one colour.
    let mut light = false;
    let mut dark = false;
    for square in bishops {
        if (square.get_file().to_index() + square.get_rank().to_index()) % 2 == 0 {
            dark = true;
        } else {
            light = true;
        }
    }
    !(light && dark)
}

/// Derived view of a position: whose turn, check, and result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Evaluation {
    pub turn: PlayerColor,
    pub in_check: bool,
    pub outcome: Outcome,
}

/// Evaluate the final position of a replayed line.
pub fn evaluate(line: &Line) -> Evaluation {
    Evaluation {
        turn: line.turn(),
        in_check: line.in_check(),
        outcome: line.outcome(),
    }
}

/// A position together with the history that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Line {
    board: Board,
    history: Vec<String>,
    hashes: Vec<u64>,
    halfmove_clock: u32,
}

impl Default for Line {
    fn default() -> Self {
        Self::new()
    }
}

impl Line {
    /// The standard initial position with no moves played.
    pub fn new() -> Self {
        Self::from_board(Board::default())
    }

    fn from_board(board: Board) -> Self {
        Self {
            board,
            history: Vec::new(),
            hashes: vec![board.get_hash()],
            halfmove_clock: 0,
        }
    }

    /// Replay a SAN history from the initial position.
    pub fn replay<S: AsRef<str>>(moves: &[S]) -> Result<Self> {
        let mut line = Self::new();
        for (index, san) in moves.iter().enumerate() {
            let mv = parse_san(&line.board, san.as_ref()).map_err(|_| {
                GambitError::InvalidPosition(format!(
                    "move {} '{}' does not replay",
                    index + 1,
                    san.as_ref()
                ))
            })?;
            let applied = AppliedMove::new(&line.board, mv);
            line.push(applied);
        }
        Ok(line)
    }

    /// Replay `moves` and check the result against a reported position.
    pub fn replay_checked<S: AsRef<str>>(position: &str, moves: &[S]) -> Result<Self> {
        let reported = parse_position(position)?;
        let line = Self::replay(moves)?;
        if same_position(&reported, &line.board) {
            Ok(line)
        } else {
            Err(GambitError::InvalidPosition(format!(
                "history replays to '{}' but server reported '{}'",
                line.board, reported
            )))
        }
    }

    /// Play a coordinate move, returning the new line and the move's SAN.
    pub fn play(&self, from: Square, to: Square, promotion: Option<Piece>) -> Result<(Self, String)> {
        let applied = apply_move(&self.board, from, to, promotion)?;
        let san = applied.san.clone();
        let mut next = self.clone();
        next.push(applied);
        Ok((next, san))
    }

    fn push(&mut self, applied: AppliedMove) {
        let mv = applied.mv;
        let resets_clock = self.board.piece_on(mv.get_source()) == Some(Piece::Pawn)
            || self.board.piece_on(mv.get_dest()).is_some();
        self.board = applied.board;
        self.halfmove_clock = if resets_clock { 0 } else { self.halfmove_clock + 1 };
        self.hashes.push(self.board.get_hash());
        self.history.push(applied.san);
    }

    pub fn board(&self) -> &Board {
        &self.board
    }

    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// FEN of the current position.
    pub fn fen(&self) -> String {
        self.board.to_string()
    }

    /// Side to move.
    pub fn turn(&self) -> PlayerColor {
        self.board.side_to_move().into()
    }

    pub fn in_check(&self) -> bool {
        self.board.checkers().popcnt() > 0
    }

    /// Game result derived from the position and its history.
    pub fn outcome(&self) -> Outcome {
        match self.board.status() {
            BoardStatus::Checkmate => {
                return Outcome::Checkmate {
                    winner: PlayerColor::from(!self.board.side_to_move()),
                }
            }
            BoardStatus::Stalemate => {
                return Outcome::Draw {
                    reason: DrawReason::Stalemate,
                }
            }
            BoardStatus::Ongoing => {}
        }
        if has_insufficient_material(&self.board) {
            return Outcome::Draw {
                reason: DrawReason::InsufficientMaterial,
            };
        }
        if self.halfmove_clock >= FIFTY_MOVE_HALFMOVES {
            return Outcome::Draw {
                reason: DrawReason::FiftyMoveRule,
            };
        }
        let current = self.board.get_hash();
        if self.hashes.iter().filter(|h| **h == current).count() >= 3 {
            return Outcome::Draw {
                reason: DrawReason::ThreefoldRepetition,
            };
        }
        Outcome::Ongoing
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

    fn sq(s: &str) -> Square {
        parse_square(s).unwrap()
    }

    fn play_all(moves: &[(&str, &str)]) -> Line {
        let mut line = Line::new();
        for (from, to) in moves {
            line = line.play(sq(from), sq(to), None).unwrap().0;
        }
        line
    }

    #[test]
    fn start_sentinel_is_initial_position() {
        assert_eq!(parse_position("start").unwrap(), Board::default());
        assert_eq!(parse_position("").unwrap(), Board::default());
    }

    #[test]
    fn invalid_fen_is_rejected() {
        assert!(matches!(
            parse_position("not a fen"),
            Err(GambitError::InvalidPosition(_))
        ));
    }

    #[test]
    fn pawn_push_san() {
        let (line, san) = Line::new().play(sq("e2"), sq("e4"), None).unwrap();
        assert_eq!(san, "e4");
        assert_eq!(line.turn(), PlayerColor::Black);
        assert_eq!(line.history(), ["e4"]);
    }

    #[test]
    fn illegal_move_leaves_line_untouched() {
        let line = Line::new();
        let err = line.play(sq("e2"), sq("e5"), None).unwrap_err();
        assert!(matches!(err, GambitError::IllegalMove(_)));
        assert_eq!(line, Line::new());
    }

    #[test]
    fn scholars_mate_is_checkmate_with_hash_suffix() {
        let line = play_all(&[
            ("e2", "e4"),
            ("e7", "e5"),
            ("d1", "h5"),
            ("b8", "c6"),
            ("f1", "c4"),
            ("g8", "f6"),
            ("h5", "f7"),
        ]);
        assert_eq!(line.history().last().map(String::as_str), Some("Qxf7#"));
        assert_eq!(
            line.outcome(),
            Outcome::Checkmate {
                winner: PlayerColor::White
            }
        );
        assert!(line.in_check());
    }

    #[test]
    fn castling_san_and_replay() {
        let line = play_all(&[
            ("e2", "e4"),
            ("e7", "e5"),
            ("g1", "f3"),
            ("b8", "c6"),
            ("f1", "c4"),
            ("g8", "f6"),
            ("e1", "g1"),
        ]);
        assert_eq!(line.history().last().map(String::as_str), Some("O-O"));
        let replayed = Line::replay(line.history()).unwrap();
        assert_eq!(replayed.board(), line.board());
    }

    #[test]
    fn knight_moves_are_disambiguated_by_file() {
        // Both white knights can reach d2 after 1. d4 d5 2. Nf3 Nf6.
        let line = play_all(&[("d2", "d4"), ("d7", "d5"), ("g1", "f3"), ("g8", "f6")]);
        let (_, san) = line.play(sq("f3"), sq("d2"), None).unwrap();
        assert_eq!(san, "Nfd2");
        let (after, san) = line.play(sq("b1"), sq("d2"), None).unwrap();
        assert_eq!(san, "Nbd2");
        assert_eq!(Line::replay(after.history()).unwrap().board(), after.board());
        let (_, san) = line.play(sq("f3"), sq("e5"), None).unwrap();
        assert_eq!(san, "Ne5");
    }

    #[test]
    fn promotion_defaults_to_queen() {
        let board = parse_position("8/P6k/8/8/8/8/8/K7 w - - 0 1").unwrap();
        let mv = resolve_move(&board, sq("a7"), sq("a8"), None).unwrap();
        assert_eq!(mv.get_promotion(), Some(Piece::Queen));
        assert_eq!(to_san(&board, mv), "a8=Q");
        let under = resolve_move(&board, sq("a7"), sq("a8"), Some(Piece::Knight)).unwrap();
        assert_eq!(to_san(&board, under), "a8=N");
    }

    #[test]
    fn parse_san_handles_annotations_and_zero_castling() {
        let board = parse_position(
            "r1bqkb1r/pppp1ppp/2n2n2/4p3/2B1P3/5N2/PPPP1PPP/RNBQK2R w KQkq - 4 4",
        )
        .unwrap();
        let castle = parse_san(&board, "0-0").unwrap();
        assert_eq!(castle.get_dest(), sq("g1"));
        let check = parse_san(&board, "Bxf7+!").unwrap();
        assert_eq!(check.get_source(), sq("c4"));
        assert!(parse_san(&board, "Qh8").is_err());
    }

    #[test]
    fn replay_checked_rejects_mismatched_position() {
        let moves = vec!["e4".to_string(), "e5".to_string()];
        assert!(Line::replay_checked(
            "rnbqkbnr/pppp1ppp/8/4p3/4P3/8/PPPP1PPP/RNBQKBNR w KQkq e6 0 2",
            &moves
        )
        .is_ok());
        assert!(Line::replay_checked("start", &moves).is_err());
    }

    #[test]
    fn position_without_history_is_refused() {
        let err = Line::replay_checked("8/P6k/8/8/8/8/8/K7 w - - 0 1", &[] as &[&str]).unwrap_err();
        assert!(matches!(err, GambitError::InvalidPosition(_)));
    }

    #[test]
    fn insufficient_material_cases() {
        let kk = parse_position("8/8/4k3/8/8/3K4/8/8 w - - 0 1").unwrap();
        assert!(has_insufficient_material(&kk));
        let kbk = parse_position("8/8/4k3/8/8/3KB3/8/8 w - - 0 1").unwrap();
        assert!(has_insufficient_material(&kbk));
        let krk = parse_position("8/8/4k3/8/8/3KR3/8/8 w - - 0 1").unwrap();
        assert!(!has_insufficient_material(&krk));
        let knnk = parse_position("8/8/4k3/8/8/2NKN3/8/8 w - - 0 1").unwrap();
        assert!(!has_insufficient_material(&knnk));
    }

    #[test]
    fn stalemate_is_a_draw() {
        let line = Line::replay(&[
            "e3", "a5", "Qh5", "Ra6", "Qxa5", "h5", "h4", "Rah6", "Qxc7", "f6", "Qxd7+", "Kf7",
            "Qxb7", "Qd3", "Qxb8", "Qh7", "Qxc8", "Kg6", "Qe6",
        ])
        .unwrap();
        assert_eq!(
            line.outcome(),
            Outcome::Draw {
                reason: DrawReason::Stalemate
            }
        );
    }

    #[test]
    fn knight_shuffle_repeats_three_times() {
        let shuffle = ["Nf3", "Nf6", "Ng1", "Ng8"];
        let moves: Vec<&str> = shuffle.iter().chain(shuffle.iter()).copied().collect();
        let line = Line::replay(&moves).unwrap();
        assert_eq!(
            line.outcome(),
            Outcome::Draw {
                reason: DrawReason::ThreefoldRepetition
            }
        );
        assert_eq!(line.board().combined().popcnt(), 32);
    }

    #[test]
    fn apply_move_reports_san_and_coordinates() {
        let board = parse_position("8/P7/8/8/8/8/8/k6K w - - 0 1").unwrap();
        let applied = apply_move(&board, sq("a7"), sq("a8"), None).unwrap();
        assert_eq!(applied.san, "a8=Q+");
        assert_eq!(applied.uci, "a7a8q");
        assert_eq!(applied.board.piece_on(sq("a8")), Some(Piece::Queen));

        let under = apply_move(&board, sq("a7"), sq("a8"), Some(Piece::Knight)).unwrap();
        assert_eq!(under.uci, "a7a8n");
        assert!(matches!(
            apply_move(&board, sq("a7"), sq("b8"), None),
            Err(GambitError::IllegalMove(_))
        ));
    }

    #[test]
    fn random_games_replay_from_their_history() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};

        let mut rng = StdRng::seed_from_u64(0x6b67);
        for _ in 0..200 {
            let mut line = Line::new();
            for _ in 0..150 {
                if line.outcome().is_over() {
                    break;
                }
                let legal: Vec<ChessMove> = MoveGen::new_legal(line.board()).collect();
                let mv = legal[rng.random_range(0..legal.len())];
                let (next, san) = line
                    .play(mv.get_source(), mv.get_dest(), mv.get_promotion())
                    .unwrap();
                assert_eq!(parse_san(line.board(), &san).unwrap(), mv, "{san}");
                line = next;
            }
            let replayed = Line::replay(line.history()).unwrap();
            assert_eq!(replayed.board(), line.board());
            assert_eq!(replayed.outcome(), line.outcome());
            assert_eq!(evaluate(&replayed), evaluate(&line));
        }
    }
}
