//! Authoritative game state and the handlers that mutate it
//!
//! The controller owns every live game. A move flows through one path no
//! matter who produced it (human or AI): turn check and rule check run under
//! the coordinator, the durable append is staged out to a worker, and the
//! in-memory commit, broadcast and terminal probe happen when the append
//! re-enters through the event queue. Termination has the same two halves:
//! the game leaves the map at once, a worker runs the durable sequence
//! (result, rating update, final document), and GAME_OVER plus the session
//! transitions land on re-entry, exactly once per game.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use rand::RngCore;

use shared::message::{
    Color, Difficulty, DrawOfferDeclined, DrawOfferReceived, EndCause, ErrorCode, GameOutcome,
    GameOver, GameStart, GameStateUpdate, InvalidMove, PersonalResult, ServerMessage, UserSummary,
};

use crate::ai;
use crate::chess::{self, ChessPosition, MoveError, PositionStatus};
use crate::error::HandlerError;
use crate::presence::PresenceService;
use crate::rating;
use crate::repository::{
    GameId, GameRecord, Repository, RepositoryError, StoredGameStatus, UserId,
};
use crate::session::{SessionId, SessionRegistry, SessionState};

/// Synthetic user id advertised for the AI opponent.
pub const AI_USER_ID: &str = "ai";

/// One side of a live game. `user_id` is `None` for the AI; `session` is
/// `None` once that player disconnected.
#[derive(Debug, Clone)]
struct PlayerSlot {
    user_id: Option<UserId>,
    username: String,
    rating: i32,
    session: Option<SessionId>,
}

#[derive(Debug)]
struct AiOpponent {
    difficulty: Difficulty,
    /// Set while a worker computes the reply; human moves are rejected with
    /// "not your turn" until it lands.
    thinking: bool,
}

/// A move accepted by the rules, parked until its durable append returns.
#[derive(Debug)]
struct PendingMove {
    mover: Color,
    mover_session: Option<SessionId>,
    uci: String,
    san: String,
    position: ChessPosition,
}

#[derive(Debug)]
pub struct LiveGame {
    id: GameId,
    white: PlayerSlot,
    black: PlayerSlot,
    position: ChessPosition,
    uci_moves: Vec<String>,
    san_moves: Vec<String>,
    draw_offer: Option<Color>,
    ai: Option<AiOpponent>,
    pending_move: Option<PendingMove>,
    /// Termination requested while an append was in flight; applied once
    /// the move commits.
    pending_end: Option<(GameOutcome, EndCause)>,
    started_at: DateTime<Utc>,
}

impl LiveGame {
    fn color_of(&self, session_id: SessionId) -> Option<Color> {
        if self.white.session == Some(session_id) {
            Some(Color::White)
        } else if self.black.session == Some(session_id) {
            Some(Color::Black)
        } else {
            None
        }
    }

    fn slot(&self, color: Color) -> &PlayerSlot {
        match color {
            Color::White => &self.white,
            Color::Black => &self.black,
        }
    }

    fn is_ai(&self) -> bool {
        self.ai.is_some()
    }

    fn sessions(&self) -> impl Iterator<Item = SessionId> {
        self.white.session.into_iter().chain(self.black.session)
    }

    pub fn position(&self) -> &ChessPosition {
        &self.position
    }

    pub fn draw_offer(&self) -> Option<Color> {
        self.draw_offer
    }
}

/// Work order for the AI pool: compute a reply for this position.
#[derive(Debug)]
pub struct AiRequest {
    pub game_id: GameId,
    pub position: ChessPosition,
    pub difficulty: Difficulty,
}

/// Durable append staged for a repository worker.
#[derive(Debug)]
pub struct MoveJob {
    pub game_id: GameId,
    pub uci: String,
    pub fen: String,
}

/// Follow-up work produced when a move commits.
#[derive(Debug)]
pub enum GameFollowup {
    Ai(AiRequest),
    End(TerminationJob),
}

/// Everything the durable half of termination needs, detached from the live
/// map so the worker owns it outright.
#[derive(Debug)]
pub struct TerminationJob {
    game_id: GameId,
    outcome: GameOutcome,
    cause: EndCause,
    white: PlayerSlot,
    black: PlayerSlot,
    san_moves: Vec<String>,
    final_fen: String,
    started_at: DateTime<Utc>,
}

/// Result of the durable half, re-entering the coordinator.
#[derive(Debug)]
pub struct FinalizedGame {
    pub game_id: GameId,
    pub outcome: GameOutcome,
    pub cause: EndCause,
    pub white: EndedPlayer,
    pub black: EndedPlayer,
    /// False when the termination commit failed; the players get an
    /// internal error instead of GAME_OVER.
    pub persisted: bool,
}

#[derive(Debug)]
pub struct EndedPlayer {
    pub session: Option<SessionId>,
    pub user_id: Option<UserId>,
    pub new_rating: Option<i32>,
}

fn new_game_id() -> GameId {
    let mut bytes = [0u8; 12];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

fn terminal_of(status: PositionStatus) -> Option<(GameOutcome, EndCause)> {
    match status {
        PositionStatus::Ongoing => None,
        PositionStatus::Checkmate {
            winner: Color::White,
        } => Some((GameOutcome::WhiteWin, EndCause::Checkmate)),
        PositionStatus::Checkmate {
            winner: Color::Black,
        } => Some((GameOutcome::BlackWin, EndCause::Checkmate)),
        PositionStatus::Stalemate => Some((GameOutcome::Draw, EndCause::Stalemate)),
        PositionStatus::InsufficientMaterial => {
            Some((GameOutcome::Draw, EndCause::InsufficientMaterial))
        }
        PositionStatus::FiftyMoveRule => Some((GameOutcome::Draw, EndCause::FiftyMoveRule)),
        PositionStatus::ThreefoldRepetition => {
            Some((GameOutcome::Draw, EndCause::ThreefoldRepetition))
        }
    }
}

fn personal_result(outcome: GameOutcome, color: Color) -> PersonalResult {
    match outcome.winner() {
        None => PersonalResult::Draw,
        Some(winner) if winner == color => PersonalResult::Win,
        Some(_) => PersonalResult::Loss,
    }
}

fn not_your_turn() -> ServerMessage {
    ServerMessage::InvalidMove(InvalidMove {
        reason: "not your turn".into(),
    })
}

/// Owner of the live-game map.
#[derive(Default)]
pub struct GameController {
    games: HashMap<GameId, LiveGame>,
}

impl GameController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn active_games(&self) -> usize {
        self.games.len()
    }

    pub fn get(&self, game_id: &str) -> Option<&LiveGame> {
        self.games.get(game_id)
    }

    /// Creates a player-vs-player game. The caller has already announced the
    /// pairing; this sends GAME_START to both sides.
    pub async fn start_pvp(
        &mut self,
        registry: &mut SessionRegistry,
        repo: &dyn Repository,
        white_session: SessionId,
        black_session: SessionId,
    ) -> Result<GameId, HandlerError> {
        let white_summary = registry
            .get(white_session)
            .and_then(|s| s.user_summary())
            .ok_or_else(|| HandlerError::domain("player no longer available"))?;
        let black_summary = registry
            .get(black_session)
            .and_then(|s| s.user_summary())
            .ok_or_else(|| HandlerError::domain("player no longer available"))?;

        let game_id = new_game_id();
        let game = LiveGame {
            id: game_id.clone(),
            white: PlayerSlot {
                user_id: Some(white_summary.user_id.clone()),
                username: white_summary.username.clone(),
                rating: white_summary.rating,
                session: Some(white_session),
            },
            black: PlayerSlot {
                user_id: Some(black_summary.user_id.clone()),
                username: black_summary.username.clone(),
                rating: black_summary.rating,
                session: Some(black_session),
            },
            position: ChessPosition::new(),
            uci_moves: Vec::new(),
            san_moves: Vec::new(),
            draw_offer: None,
            ai: None,
            pending_move: None,
            pending_end: None,
            started_at: Utc::now(),
        };

        repo.insert_game(&record_of(&game)).await?;

        for (session_id, color, opponent) in [
            (white_session, Color::White, &black_summary),
            (black_session, Color::Black, &white_summary),
        ] {
            if let Some(session) = registry.get_mut(session_id) {
                session.state = SessionState::InGame;
                session.game_id = Some(game_id.clone());
            }
            registry.send_to(
                session_id,
                &ServerMessage::GameStart(GameStart {
                    game_id: game_id.clone(),
                    color,
                    fen: game.position.fen(),
                    opponent: opponent.clone(),
                }),
            );
        }

        info!(
            "game {game_id} started: {} (white) vs {} (black)",
            game.white.username, game.black.username
        );
        self.games.insert(game_id.clone(), game);
        Ok(game_id)
    }

    /// Creates a game against the built-in AI. The human always plays white.
    pub async fn start_ai(
        &mut self,
        registry: &mut SessionRegistry,
        repo: &dyn Repository,
        session_id: SessionId,
        difficulty: Difficulty,
    ) -> Result<GameId, HandlerError> {
        let human = registry
            .get(session_id)
            .and_then(|s| s.user_summary())
            .ok_or_else(|| HandlerError::domain("player no longer available"))?;

        let game_id = new_game_id();
        let game = LiveGame {
            id: game_id.clone(),
            white: PlayerSlot {
                user_id: Some(human.user_id.clone()),
                username: human.username.clone(),
                rating: human.rating,
                session: Some(session_id),
            },
            black: PlayerSlot {
                user_id: None,
                username: ai::display_name(difficulty),
                rating: ai::nominal_rating(difficulty),
                session: None,
            },
            position: ChessPosition::new(),
            uci_moves: Vec::new(),
            san_moves: Vec::new(),
            draw_offer: None,
            ai: Some(AiOpponent {
                difficulty,
                thinking: false,
            }),
            pending_move: None,
            pending_end: None,
            started_at: Utc::now(),
        };

        repo.insert_game(&record_of(&game)).await?;

        if let Some(session) = registry.get_mut(session_id) {
            session.state = SessionState::InGame;
            session.game_id = Some(game_id.clone());
        }
        registry.send_to(
            session_id,
            &ServerMessage::GameStart(GameStart {
                game_id: game_id.clone(),
                color: Color::White,
                fen: game.position.fen(),
                opponent: UserSummary {
                    user_id: AI_USER_ID.to_string(),
                    username: game.black.username.clone(),
                    rating: game.black.rating,
                },
            }),
        );

        info!(
            "AI game {game_id} started for {} ({difficulty:?})",
            game.white.username
        );
        self.games.insert(game_id.clone(), game);
        Ok(game_id)
    }

    /// MAKE_MOVE from a human player. Validates and stages the move; the
    /// returned job carries the durable append for a worker, and the commit
    /// happens in [`commit_move`] when the append re-enters.
    ///
    /// [`commit_move`]: Self::commit_move
    pub fn handle_move(
        &mut self,
        registry: &mut SessionRegistry,
        session_id: SessionId,
        game_id: &str,
        uci: &str,
    ) -> Result<Option<MoveJob>, HandlerError> {
        let color = self.member_color(game_id, session_id)?;
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| HandlerError::domain("game not found"))?;

        // While the AI thinks or a previous append is still in flight, the
        // position has not advanced for this player yet.
        let busy =
            game.ai.as_ref().is_some_and(|ai| ai.thinking) || game.pending_move.is_some();
        if busy || game.position.turn() != color {
            registry.send_to(session_id, &not_your_turn());
            return Ok(None);
        }

        let applied = match game.position.apply_uci(uci) {
            Ok(applied) => applied,
            Err(e) => {
                let reason = match e {
                    MoveError::Illegal => "illegal move",
                    MoveError::InvalidFormat => "invalid move format",
                    MoveError::GameOver => "game is over",
                };
                registry.send_to(
                    session_id,
                    &ServerMessage::InvalidMove(InvalidMove {
                        reason: reason.into(),
                    }),
                );
                return Ok(None);
            }
        };

        let fen = applied.position.fen();
        game.pending_move = Some(PendingMove {
            mover: color,
            mover_session: Some(session_id),
            uci: uci.to_string(),
            san: applied.san,
            position: applied.position,
        });

        Ok(Some(MoveJob {
            game_id: game.id.clone(),
            uci: uci.to_string(),
            fen,
        }))
    }

    /// A reply computed by the AI pool. The game may have ended while the
    /// worker was thinking; that is not an error.
    pub fn handle_ai_move(&mut self, game_id: &str, uci: Option<String>) -> Option<MoveJob> {
        let game = match self.games.get_mut(game_id) {
            Some(game) => game,
            None => return None,
        };
        let Some(ai) = game.ai.as_mut() else {
            warn!("AI move for non-AI game {game_id}");
            return None;
        };
        ai.thinking = false;

        let Some(uci) = uci else {
            warn!("AI produced no move for game {game_id}");
            return None;
        };

        if game.position.turn() != Color::Black {
            warn!("AI move {uci} for game {game_id} arrived out of turn");
            return None;
        }

        match game.position.apply_uci(&uci) {
            Ok(applied) => {
                let fen = applied.position.fen();
                game.pending_move = Some(PendingMove {
                    mover: Color::Black,
                    mover_session: None,
                    uci: uci.clone(),
                    san: applied.san,
                    position: applied.position,
                });
                Some(MoveJob {
                    game_id: game.id.clone(),
                    uci,
                    fen,
                })
            }
            Err(e) => {
                warn!("AI move {uci} rejected for game {game_id}: {e}");
                None
            }
        }
    }

    /// Re-entry point for a finished append: commits the staged move,
    /// broadcasts the new state and probes for a terminal position. Also
    /// applies a termination that was requested while the append flew.
    pub fn commit_move(
        &mut self,
        registry: &mut SessionRegistry,
        game_id: &str,
        persisted: Result<(), RepositoryError>,
    ) -> Option<GameFollowup> {
        enum Next {
            Nothing,
            End(GameOutcome, EndCause),
            Ai(AiRequest),
        }

        let next = {
            let game = match self.games.get_mut(game_id) {
                Some(game) => game,
                None => {
                    debug!("append finished for already-ended game {game_id}");
                    return None;
                }
            };
            let Some(pending) = game.pending_move.take() else {
                warn!("append finished for game {game_id} with no staged move");
                return None;
            };

            match persisted {
                Err(e) => {
                    // The move never took effect; the position stands.
                    warn!("game {game_id}: move {} failed to persist: {e}", pending.uci);
                    if let Some(session_id) = pending.mover_session {
                        registry.send_to(
                            session_id,
                            &ServerMessage::error(ErrorCode::Internal, "internal error"),
                        );
                    }
                    match game.pending_end.take() {
                        Some((outcome, cause)) => Next::End(outcome, cause),
                        None => Next::Nothing,
                    }
                }
                Ok(()) => {
                    game.position = pending.position;
                    game.uci_moves.push(pending.uci.clone());
                    game.san_moves.push(pending.san);
                    game.draw_offer = None;

                    let update = ServerMessage::GameStateUpdate(GameStateUpdate {
                        game_id: game.id.clone(),
                        fen: game.position.fen(),
                        last_move: pending.uci,
                        turn: game.position.turn(),
                    });
                    for session_id in game.sessions().collect::<Vec<_>>() {
                        registry.send_to(session_id, &update);
                    }

                    if let Some((outcome, cause)) = terminal_of(game.position.status()) {
                        Next::End(outcome, cause)
                    } else if let Some((outcome, cause)) = game.pending_end.take() {
                        Next::End(outcome, cause)
                    } else {
                        match &mut game.ai {
                            Some(ai) if pending.mover == Color::White => {
                                ai.thinking = true;
                                Next::Ai(AiRequest {
                                    game_id: game.id.clone(),
                                    position: game.position.clone(),
                                    difficulty: ai.difficulty,
                                })
                            }
                            _ => Next::Nothing,
                        }
                    }
                }
            }
        };

        match next {
            Next::Nothing => None,
            Next::Ai(request) => Some(GameFollowup::Ai(request)),
            Next::End(outcome, cause) => self
                .request_end(game_id, outcome, cause)
                .map(GameFollowup::End),
        }
    }

    /// RESIGN: the resigning color loses.
    pub fn resign(
        &mut self,
        session_id: SessionId,
        game_id: &str,
    ) -> Result<Option<TerminationJob>, HandlerError> {
        let color = self.member_color(game_id, session_id)?;
        let outcome = match color {
            Color::White => GameOutcome::BlackWin,
            Color::Black => GameOutcome::WhiteWin,
        };
        Ok(self.request_end(game_id, outcome, EndCause::Resignation))
    }

    /// OFFER_DRAW. A second offer from the same color is a no-op; an offer
    /// while the other color's offer stands is an implicit accept.
    pub fn offer_draw(
        &mut self,
        registry: &mut SessionRegistry,
        session_id: SessionId,
        game_id: &str,
    ) -> Result<Option<TerminationJob>, HandlerError> {
        let color = self.member_color(game_id, session_id)?;
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| HandlerError::domain("game not found"))?;

        if game.is_ai() {
            // The built-in opponent plays on.
            let notice = ServerMessage::DrawOfferDeclined(DrawOfferDeclined {
                game_id: game.id.clone(),
            });
            registry.send_to(session_id, &notice);
            return Ok(None);
        }

        match game.draw_offer {
            Some(offered) if offered == color => Ok(None),
            Some(_) => Ok(self.request_end(game_id, GameOutcome::Draw, EndCause::Agreement)),
            None => {
                game.draw_offer = Some(color);
                let opponent = game.slot(color.opposite()).session;
                let notice = ServerMessage::DrawOfferReceived(DrawOfferReceived {
                    game_id: game.id.clone(),
                });
                if let Some(opponent) = opponent {
                    registry.send_to(opponent, &notice);
                }
                Ok(None)
            }
        }
    }

    /// ACCEPT_DRAW: only valid while the other color's offer stands.
    pub fn accept_draw(
        &mut self,
        session_id: SessionId,
        game_id: &str,
    ) -> Result<Option<TerminationJob>, HandlerError> {
        let color = self.member_color(game_id, session_id)?;
        let offer = self
            .games
            .get(game_id)
            .ok_or_else(|| HandlerError::domain("game not found"))?
            .draw_offer;

        match offer {
            Some(offered) if offered != color => {
                Ok(self.request_end(game_id, GameOutcome::Draw, EndCause::Agreement))
            }
            _ => Err(HandlerError::domain("no draw offer to accept")),
        }
    }

    /// DECLINE_DRAW: clears the outstanding offer and notifies both sides.
    /// Declining when nothing is outstanding is a no-op.
    pub fn decline_draw(
        &mut self,
        registry: &mut SessionRegistry,
        session_id: SessionId,
        game_id: &str,
    ) -> Result<(), HandlerError> {
        let color = self.member_color(game_id, session_id)?;
        let game = self
            .games
            .get_mut(game_id)
            .ok_or_else(|| HandlerError::domain("game not found"))?;

        match game.draw_offer {
            Some(offered) if offered != color => {
                game.draw_offer = None;
                let notice = ServerMessage::DrawOfferDeclined(DrawOfferDeclined {
                    game_id: game.id.clone(),
                });
                for session_id in game.sessions().collect::<Vec<_>>() {
                    registry.send_to(session_id, &notice);
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Disconnect while InGame: the vanished side forfeits.
    pub fn forfeit(&mut self, session_id: SessionId, game_id: &str) -> Option<TerminationJob> {
        let game = self.games.get_mut(game_id)?;
        let color = game.color_of(session_id)?;

        // The departed player gets no further messages.
        match color {
            Color::White => game.white.session = None,
            Color::Black => game.black.session = None,
        }
        let outcome = match color {
            Color::White => GameOutcome::BlackWin,
            Color::Black => GameOutcome::WhiteWin,
        };

        self.request_end(game_id, outcome, EndCause::Abandonment)
    }

    /// Takes the game out of the live map and builds the work order for the
    /// durable half. With an append still in flight the end is parked on the
    /// game instead and applied by [`commit_move`]; removal happens exactly
    /// once either way.
    ///
    /// [`commit_move`]: Self::commit_move
    fn request_end(
        &mut self,
        game_id: &str,
        outcome: GameOutcome,
        cause: EndCause,
    ) -> Option<TerminationJob> {
        {
            let game = self.games.get_mut(game_id)?;
            if game.pending_move.is_some() {
                if game.pending_end.is_none() {
                    game.pending_end = Some((outcome, cause));
                }
                return None;
            }
        }

        let game = self.games.remove(game_id)?;
        debug!(
            "game {} ending: {:?} by {:?} after {} moves",
            game.id,
            outcome,
            cause,
            game.uci_moves.len()
        );
        Some(TerminationJob {
            game_id: game.id,
            outcome,
            cause,
            white: game.white,
            black: game.black,
            san_moves: game.san_moves,
            final_fen: game.position.fen(),
            started_at: game.started_at,
        })
    }

    fn member_color(&self, game_id: &str, session_id: SessionId) -> Result<Color, HandlerError> {
        let game = self
            .games
            .get(game_id)
            .ok_or_else(|| HandlerError::domain("game not found"))?;
        game.color_of(session_id)
            .ok_or_else(|| HandlerError::domain("you are not a player in this game"))
    }
}

/// The durable half of termination, run off the coordinator: ratings,
/// counters, final game document. AI games persist for history but touch no
/// user record.
pub async fn run_termination(repo: Arc<dyn Repository>, job: TerminationJob) -> FinalizedGame {
    let pgn = chess::render_pgn(
        &job.white.username,
        &job.black.username,
        Some(job.outcome),
        job.started_at,
        &job.san_moves,
    );

    let (persisted, ratings) = match commit_termination(&*repo, &job, &pgn).await {
        Ok(ratings) => (true, ratings),
        Err(e) => {
            warn!("game {}: termination commit failed: {e}", job.game_id);
            // The in-memory game is already gone; record the wreckage.
            let _ = repo
                .finalize_game(
                    &job.game_id,
                    StoredGameStatus::Aborted,
                    job.outcome,
                    job.cause,
                    &job.final_fen,
                    &pgn,
                    Utc::now(),
                )
                .await;
            (false, None)
        }
    };

    FinalizedGame {
        game_id: job.game_id,
        outcome: job.outcome,
        cause: job.cause,
        white: EndedPlayer {
            session: job.white.session,
            user_id: job.white.user_id,
            new_rating: ratings.map(|(white, _)| white),
        },
        black: EndedPlayer {
            session: job.black.session,
            user_id: job.black.user_id,
            new_rating: ratings.map(|(_, black)| black),
        },
        persisted,
    }
}

async fn commit_termination(
    repo: &dyn Repository,
    job: &TerminationJob,
    pgn: &str,
) -> Result<Option<(i32, i32)>, RepositoryError> {
    let ratings = match (&job.white.user_id, &job.black.user_id) {
        (Some(white_id), Some(black_id)) => {
            let white_rating = repo
                .find_user(white_id)
                .await?
                .map_or(job.white.rating, |u| u.rating);
            let black_rating = repo
                .find_user(black_id)
                .await?
                .map_or(job.black.rating, |u| u.rating);

            let (new_white, new_black) =
                rating::rate_game(white_rating, black_rating, job.outcome);
            repo.record_result(white_id, new_white, personal_result(job.outcome, Color::White))
                .await?;
            repo.record_result(black_id, new_black, personal_result(job.outcome, Color::Black))
                .await?;
            Some((new_white, new_black))
        }
        _ => None,
    };

    repo.finalize_game(
        &job.game_id,
        StoredGameStatus::Completed,
        job.outcome,
        job.cause,
        &job.final_fen,
        pgn,
        Utc::now(),
    )
    .await?;

    Ok(ratings)
}

/// Re-entry half of termination: GAME_OVER (or an internal error when the
/// commit failed) to both sides, then the sessions return to Authenticated
/// with refreshed rating caches.
pub fn complete_termination(
    registry: &mut SessionRegistry,
    presence: &mut PresenceService,
    finalized: &FinalizedGame,
) {
    let farewell = if finalized.persisted {
        ServerMessage::GameOver(GameOver {
            game_id: finalized.game_id.clone(),
            result: finalized.outcome,
            cause: finalized.cause,
        })
    } else {
        ServerMessage::error(ErrorCode::Internal, "internal error")
    };

    for player in [&finalized.white, &finalized.black] {
        if let Some(session_id) = player.session {
            registry.send_to(session_id, &farewell);
        }
    }

    for player in [&finalized.white, &finalized.black] {
        if let (Some(user_id), Some(rating)) = (&player.user_id, player.new_rating) {
            presence.update_rating(user_id, rating);
        }
        let Some(session_id) = player.session else {
            continue;
        };
        if let Some(session) = registry.get_mut(session_id) {
            session.state = SessionState::Authenticated;
            session.game_id = None;
            if let Some(rating) = player.new_rating {
                session.rating = rating;
            }
        }
    }

    info!(
        "game {} over: {:?} by {:?}",
        finalized.game_id, finalized.outcome, finalized.cause
    );
}

fn record_of(game: &LiveGame) -> GameRecord {
    GameRecord {
        id: game.id.clone(),
        white_player_id: game.white.user_id.clone().unwrap_or_default(),
        black_player_id: game.black.user_id.clone(),
        white_username: game.white.username.clone(),
        black_username: game.black.username.clone(),
        moves: game.uci_moves.clone(),
        pgn: String::new(),
        fen: game.position.fen(),
        status: StoredGameStatus::Active,
        result: None,
        cause: None,
        start_time: game.started_at,
        end_time: None,
    }
}
