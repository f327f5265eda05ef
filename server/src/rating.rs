//! Elo rating arithmetic
//!
//! Fixed K-factor of 32, ratings rounded to the nearest integer and floored
//! at 100. AI games never reach this module.

use shared::message::GameOutcome;

pub const K_FACTOR: f64 = 32.0;
pub const RATING_FLOOR: i32 = 100;
pub const DEFAULT_RATING: i32 = 1200;

/// Expected score for a player against an opponent.
pub fn expected_score(rating: i32, opponent: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf(f64::from(opponent - rating) / 400.0))
}

/// New rating after a game with the given actual score (1.0 win, 0.5 draw,
/// 0.0 loss).
pub fn rate(rating: i32, opponent: i32, score: f64) -> i32 {
    let next = f64::from(rating) + K_FACTOR * (score - expected_score(rating, opponent));
    (next.round() as i32).max(RATING_FLOOR)
}

/// New `(white, black)` ratings after a completed game.
pub fn rate_game(white: i32, black: i32, outcome: GameOutcome) -> (i32, i32) {
    let (white_score, black_score) = match outcome {
        GameOutcome::WhiteWin => (1.0, 0.0),
        GameOutcome::BlackWin => (0.0, 1.0),
        GameOutcome::Draw => (0.5, 0.5),
    };
    (
        rate(white, black, white_score),
        rate(black, white, black_score),
    )
}
