//! Facade over the chess rule engine
//!
//! Wraps shakmaty behind a small surface: positions are immutable values,
//! each accepted move yields a new [`ChessPosition`], and [`status`] reports
//! whether the game reached a terminal state. Nothing outside this module
//! calls the rule engine directly.
//!
//! [`status`]: ChessPosition::status

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use shakmaty::{
    fen::Fen, san::San, uci::UciMove, CastlingMode, Chess, EnPassantMode, Move,
    Position as RulePosition,
};
use thiserror::Error;

use shared::message::{Color, GameOutcome};

/// FEN of the standard starting position.
pub const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

#[derive(Debug, Error)]
pub enum MoveError {
    #[error("invalid move format")]
    InvalidFormat,

    #[error("illegal move")]
    Illegal,

    #[error("game is already over")]
    GameOver,
}

#[derive(Debug, Error)]
#[error("invalid FEN: {0}")]
pub struct InvalidFen(String);

/// Terminal probe for a position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PositionStatus {
    Ongoing,
    Checkmate { winner: Color },
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
}

impl PositionStatus {
    pub fn is_over(self) -> bool {
        !matches!(self, Self::Ongoing)
    }
}

fn wire_color(c: shakmaty::Color) -> Color {
    match c {
        shakmaty::Color::White => Color::White,
        shakmaty::Color::Black => Color::Black,
    }
}

/// An immutable chess position with enough history to detect repetition.
///
/// The `seen` map counts how often each (board, turn, castling, en-passant)
/// combination occurred on the way to this position; the rule engine itself
/// is stateless across moves.
#[derive(Debug, Clone)]
pub struct ChessPosition {
    inner: Chess,
    seen: HashMap<String, u32>,
}

/// Result of a successfully applied move.
#[derive(Debug, Clone)]
pub struct AppliedMove {
    pub position: ChessPosition,
    pub san: String,
}

impl ChessPosition {
    /// The standard starting position.
    pub fn new() -> Self {
        Self::with_inner(Chess::default())
    }

    /// Builds a position from a FEN string. Repetition history starts empty,
    /// matching how adjudication treats an adjourned position.
    pub fn from_fen(fen: &str) -> Result<Self, InvalidFen> {
        let fen: Fen = fen.parse().map_err(|e| InvalidFen(format!("{e}")))?;
        let inner: Chess = fen
            .into_position(CastlingMode::Standard)
            .map_err(|e| InvalidFen(format!("{e}")))?;
        Ok(Self::with_inner(inner))
    }

    fn with_inner(inner: Chess) -> Self {
        let mut seen = HashMap::new();
        seen.insert(repetition_key(&inner), 1);
        Self { inner, seen }
    }

    pub fn fen(&self) -> String {
        Fen::from_position(self.inner.clone(), EnPassantMode::Legal).to_string()
    }

    /// Side to move.
    pub fn turn(&self) -> Color {
        wire_color(self.inner.turn())
    }

    pub fn is_check(&self) -> bool {
        self.inner.is_check()
    }

    /// Validates and applies a UCI move, yielding the successor position and
    /// the move's SAN rendering. `self` is left untouched.
    pub fn apply_uci(&self, uci: &str) -> Result<AppliedMove, MoveError> {
        if self.status().is_over() {
            return Err(MoveError::GameOver);
        }

        let uci: UciMove = uci.parse().map_err(|_| MoveError::InvalidFormat)?;
        let m: Move = uci.to_move(&self.inner).map_err(|_| MoveError::Illegal)?;

        if !self.inner.is_legal(&m) {
            return Err(MoveError::Illegal);
        }

        // SAN depends on the position the move is played from.
        let san = San::from_move(&self.inner, &m).to_string();

        let next = self
            .inner
            .clone()
            .play(&m)
            .map_err(|_| MoveError::Illegal)?;

        let mut seen = self.seen.clone();
        *seen.entry(repetition_key(&next)).or_insert(0) += 1;

        Ok(AppliedMove {
            position: Self { inner: next, seen },
            san,
        })
    }

    /// Terminal probe, checked after every accepted move.
    pub fn status(&self) -> PositionStatus {
        if self.inner.is_checkmate() {
            // The side to move has no way out, so the other side won.
            return PositionStatus::Checkmate {
                winner: self.turn().opposite(),
            };
        }
        if self.inner.is_stalemate() {
            return PositionStatus::Stalemate;
        }
        if self.inner.is_insufficient_material() {
            return PositionStatus::InsufficientMaterial;
        }
        if self.inner.halfmoves() >= 100 {
            return PositionStatus::FiftyMoveRule;
        }
        if self
            .seen
            .get(&repetition_key(&self.inner))
            .copied()
            .unwrap_or(0)
            >= 3
        {
            return PositionStatus::ThreefoldRepetition;
        }
        PositionStatus::Ongoing
    }

    /// All legal moves in UCI notation. Used by the AI opponent.
    pub fn legal_uci_moves(&self) -> Vec<String> {
        self.inner
            .legal_moves()
            .iter()
            .map(|m| UciMove::from_move(m, CastlingMode::Standard).to_string())
            .collect()
    }

    /// Material difference from the side to move's point of view, in
    /// centipawn-free piece points (pawn 1, knight/bishop 3, rook 5, queen 9).
    pub fn material_balance(&self) -> i32 {
        fn points(side: &shakmaty::ByRole<u8>) -> i32 {
            i32::from(side.pawn)
                + 3 * i32::from(side.knight)
                + 3 * i32::from(side.bishop)
                + 5 * i32::from(side.rook)
                + 9 * i32::from(side.queen)
        }

        let material = self.inner.board().material();
        let (own, other) = match self.inner.turn() {
            shakmaty::Color::White => (&material.white, &material.black),
            shakmaty::Color::Black => (&material.black, &material.white),
        };
        points(own) - points(other)
    }
}

impl Default for ChessPosition {
    fn default() -> Self {
        Self::new()
    }
}

/// Position identity for the threefold-repetition rule: board, side to move,
/// castling rights and en-passant target, but not the move counters.
fn repetition_key(pos: &Chess) -> String {
    let fen = Fen::from_position(pos.clone(), EnPassantMode::Legal).to_string();
    fen.split_whitespace().take(4).collect::<Vec<_>>().join(" ")
}

/// Renders a completed game as PGN.
pub fn render_pgn(
    white: &str,
    black: &str,
    outcome: Option<GameOutcome>,
    started_at: DateTime<Utc>,
    san_moves: &[String],
) -> String {
    let result_tag = match outcome {
        Some(GameOutcome::WhiteWin) => "1-0",
        Some(GameOutcome::BlackWin) => "0-1",
        Some(GameOutcome::Draw) => "1/2-1/2",
        None => "*",
    };

    let mut pgn = String::new();
    pgn.push_str("[Event \"Online Chess Game\"]\n");
    pgn.push_str(&format!("[Date \"{}\"]\n", started_at.format("%Y.%m.%d")));
    pgn.push_str(&format!("[White \"{white}\"]\n"));
    pgn.push_str(&format!("[Black \"{black}\"]\n"));
    pgn.push_str(&format!("[Result \"{result_tag}\"]\n\n"));

    for (i, san) in san_moves.iter().enumerate() {
        if i % 2 == 0 {
            pgn.push_str(&format!("{}. ", i / 2 + 1));
        }
        pgn.push_str(san);
        pgn.push(' ');
    }
    pgn.push_str(result_tag);
    pgn
}
