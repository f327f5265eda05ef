//! Built-in AI opponent
//!
//! Three difficulty tiers: `easy` plays a uniformly random legal move,
//! `medium` and `hard` run a shallow material negamax. Move selection is
//! pure CPU work and runs on a blocking worker; the result re-enters the
//! coordinator through the event queue like any other move.

use rand::seq::SliceRandom;

use shared::message::Difficulty;

use crate::chess::ChessPosition;

/// Score assigned to being checkmated; dwarfs any material swing.
const MATE_SCORE: i32 = 10_000;

pub fn display_name(difficulty: Difficulty) -> String {
    let tier = match difficulty {
        Difficulty::Easy => "Easy",
        Difficulty::Medium => "Medium",
        Difficulty::Hard => "Hard",
    };
    format!("AI Bot ({tier})")
}

/// Nominal strength advertised in GAME_START, mirroring the ladder the
/// original service used.
pub fn nominal_rating(difficulty: Difficulty) -> i32 {
    match difficulty {
        Difficulty::Easy => 1000,
        Difficulty::Medium => 1500,
        Difficulty::Hard => 2000,
    }
}

fn search_depth(difficulty: Difficulty) -> u32 {
    match difficulty {
        Difficulty::Medium => 2,
        Difficulty::Hard => 3,
        Difficulty::Easy => 0,
    }
}

/// Picks a move for the side to move, or `None` when the game is over.
pub fn choose_move(position: &ChessPosition, difficulty: Difficulty) -> Option<String> {
    if position.status().is_over() {
        return None;
    }

    match difficulty {
        Difficulty::Easy => {
            let moves = position.legal_uci_moves();
            moves.choose(&mut rand::thread_rng()).cloned()
        }
        Difficulty::Medium | Difficulty::Hard => {
            best_move(position, search_depth(difficulty))
        }
    }
}

fn best_move(position: &ChessPosition, depth: u32) -> Option<String> {
    let mut best: Option<(String, i32)> = None;

    for uci in position.legal_uci_moves() {
        let Ok(applied) = position.apply_uci(&uci) else {
            continue;
        };
        let score = -negamax(&applied.position, depth.saturating_sub(1));
        match &best {
            Some((_, best_score)) if score <= *best_score => {}
            _ => best = Some((uci, score)),
        }
    }

    best.map(|(uci, _)| uci)
}

/// Plain negamax on material, scored from the side to move's perspective.
fn negamax(position: &ChessPosition, depth: u32) -> i32 {
    let status = position.status();
    if status.is_over() {
        // Terminal: the side to move is either mated or the game is drawn.
        return match status {
            crate::chess::PositionStatus::Checkmate { .. } => -MATE_SCORE,
            _ => 0,
        };
    }

    if depth == 0 {
        return position.material_balance();
    }

    let mut best = -MATE_SCORE;
    for uci in position.legal_uci_moves() {
        let Ok(applied) = position.apply_uci(&uci) else {
            continue;
        };
        best = best.max(-negamax(&applied.position, depth - 1));
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_easy_returns_a_legal_move() {
        let position = ChessPosition::new();
        let legal = position.legal_uci_moves();

        for _ in 0..10 {
            let uci = choose_move(&position, Difficulty::Easy).unwrap();
            assert!(legal.contains(&uci));
        }
    }

    #[test]
    fn test_no_move_after_game_over() {
        let position =
            ChessPosition::from_fen("8/8/8/8/8/6q1/5k2/7K w - - 0 1").unwrap();
        assert_eq!(choose_move(&position, Difficulty::Easy), None);
        assert_eq!(choose_move(&position, Difficulty::Hard), None);
    }

    #[test]
    fn test_medium_takes_a_hanging_queen() {
        // Black queen sits en prise on d5 with white's pawn on e4 to take it.
        let position =
            ChessPosition::from_fen("rnb1kbnr/ppp1pppp/8/3q4/4P3/8/PPPP1PPP/RNBQKBNR w KQkq - 0 3")
                .unwrap();
        let uci = choose_move(&position, Difficulty::Medium).unwrap();
        assert_eq!(uci, "e4d5");
    }

    #[test]
    fn test_hard_finds_mate_in_one() {
        // Scholar's mate pattern: Qxf7#.
        let position = ChessPosition::from_fen(
            "r1bqkbnr/pppp1ppp/2n5/4p3/2B1P3/5Q2/PPPP1PPP/RNB1K1NR w KQkq - 4 4",
        )
        .unwrap();
        let uci = choose_move(&position, Difficulty::Hard).unwrap();

        let applied = position.apply_uci(&uci).unwrap();
        assert!(applied.position.status().is_over(), "expected a mating move, got {uci}");
    }

    #[test]
    fn test_display_name_and_rating() {
        assert_eq!(display_name(Difficulty::Easy), "AI Bot (Easy)");
        assert_eq!(nominal_rating(Difficulty::Hard), 2000);
    }
}
