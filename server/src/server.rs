//! Coordinator actor
//!
//! One task owns all shared state (sessions, presence, matchmaker, live
//! games) and consumes a single event queue inside `select!`, so every
//! mutation is serialized and messages from one session are processed in
//! arrival order. Connection tasks produce events; repository calls and AI
//! searches run on workers and re-enter through the same queue, so the
//! coordinator never waits on the database; a housekeeping interval flushes
//! the presence debounce, expires challenges and sweeps idle sessions.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use log::{debug, error, info, warn};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::interval;

use shared::message::{
    ChallengeOutcome, ChallengeReceived, ClientMessage, Credentials, DecodeError, ErrorCode,
    HistoryEntry, HistoryRequest, HistoryResponse, LoginResult, MatchFound, MessageId,
    OnlineUsersList, PersonalResult, RegisterResult, ServerMessage, StatsResponse,
};

use crate::ai;
use crate::auth::{AuthService, LoginError};
use crate::config::ServerConfig;
use crate::connection::{self, CloseReason, SEND_QUEUE_LIMIT};
use crate::dispatcher;
use crate::error::HandlerError;
use crate::game::{self, AiRequest, FinalizedGame, GameController, GameFollowup, MoveJob, TerminationJob};
use crate::matchmaker::{Challenge, Matchmaker, QueueTicket};
use crate::presence::{PresenceEntry, PresenceService, PRESENCE_DEBOUNCE};
use crate::repository::{GameId, Repository, RepositoryError, UserRecord};
use crate::session::{SessionId, SessionRegistry, SessionState};

/// Cadence of the debounce/expiry/idle sweep.
const HOUSEKEEPING_INTERVAL: Duration = Duration::from_millis(100);

/// Default and maximum page size for GET_HISTORY.
const HISTORY_DEFAULT_LIMIT: u32 = 10;
const HISTORY_MAX_LIMIT: u32 = 50;

/// Everything that reaches the coordinator queue, including the completions
/// of staged repository and AI work.
#[derive(Debug)]
pub enum ServerEvent {
    /// A complete frame from a session.
    Frame {
        session_id: SessionId,
        message_id: u16,
        payload: Vec<u8>,
    },
    /// A connection task ended.
    Closed {
        session_id: SessionId,
        reason: CloseReason,
    },
    /// A worker finished building a self-contained reply (registration,
    /// stats, history).
    Reply {
        session_id: SessionId,
        message: ServerMessage,
    },
    /// A login worker finished verifying credentials; the session binding
    /// happens on the coordinator.
    LoggedIn {
        session_id: SessionId,
        result: Result<UserRecord, LoginError>,
    },
    /// An AI worker finished thinking.
    AiMove {
        game_id: GameId,
        uci: Option<String>,
    },
    /// A staged move append returned from the repository.
    MoveAppended {
        game_id: GameId,
        result: Result<(), RepositoryError>,
    },
    /// The durable half of a termination finished.
    GameFinalized(FinalizedGame),
}

/// The server: accept loop plus the coordinator state machine.
pub struct Server {
    config: ServerConfig,
    repo: Arc<dyn Repository>,
    auth: AuthService,
    registry: SessionRegistry,
    presence: PresenceService,
    matchmaker: Matchmaker,
    games: GameController,
    events_tx: mpsc::UnboundedSender<ServerEvent>,
    events_rx: mpsc::UnboundedReceiver<ServerEvent>,
}

impl Server {
    pub fn new(config: ServerConfig, repo: Arc<dyn Repository>) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Self {
            auth: AuthService::new(config.password_hash_cost),
            matchmaker: Matchmaker::new(config.match_rating_window, config.challenge_ttl),
            presence: PresenceService::new(PRESENCE_DEBOUNCE),
            registry: SessionRegistry::new(),
            games: GameController::new(),
            config,
            repo,
            events_tx,
            events_rx,
        }
    }

    /// Binds the configured address and runs forever.
    pub async fn run(&mut self) -> std::io::Result<()> {
        let listener = TcpListener::bind(self.config.listen_addr()).await?;
        self.run_with(listener).await
    }

    /// Runs the accept and coordinator loops on an existing listener. Split
    /// out so tests can bind an ephemeral port.
    pub async fn run_with(&mut self, listener: TcpListener) -> std::io::Result<()> {
        info!("server listening on {}", listener.local_addr()?);
        let mut housekeeping = interval(HOUSEKEEPING_INTERVAL);

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => self.accept_connection(stream, addr),
                    Err(e) => warn!("accept failed: {e}"),
                },

                Some(event) = self.events_rx.recv() => {
                    self.handle_event(event).await;
                    self.reap_overflowed();
                },

                _ = housekeeping.tick() => {
                    self.housekeeping();
                    self.reap_overflowed();
                },
            }
        }
    }

    fn accept_connection(&mut self, stream: TcpStream, addr: SocketAddr) {
        let (outbound_tx, outbound_rx) = mpsc::channel(SEND_QUEUE_LIMIT);
        let session_id = self.registry.create(addr, outbound_tx);
        info!("session {session_id} connected from {addr}");

        tokio::spawn(connection::run(
            stream,
            session_id,
            self.events_tx.clone(),
            outbound_rx,
        ));
    }

    async fn handle_event(&mut self, event: ServerEvent) {
        match event {
            ServerEvent::Frame {
                session_id,
                message_id,
                payload,
            } => {
                if let Some(session) = self.registry.get_mut(session_id) {
                    session.touch();
                } else {
                    return;
                }
                self.dispatch(session_id, message_id, &payload).await;
            }

            ServerEvent::Closed { session_id, reason } => {
                if self.registry.get(session_id).is_some() {
                    info!("session {session_id} disconnected: {reason}");
                    self.close_session(session_id);
                }
            }

            ServerEvent::Reply {
                session_id,
                message,
            } => {
                self.registry.send_to(session_id, &message);
            }

            ServerEvent::LoggedIn { session_id, result } => {
                self.finish_login(session_id, result);
            }

            ServerEvent::AiMove { game_id, uci } => {
                if let Some(job) = self.games.handle_ai_move(&game_id, uci) {
                    self.spawn_move_append(job);
                }
            }

            ServerEvent::MoveAppended { game_id, result } => {
                match self.games.commit_move(&mut self.registry, &game_id, result) {
                    Some(GameFollowup::Ai(request)) => self.spawn_ai_worker(request),
                    Some(GameFollowup::End(job)) => self.spawn_termination(job),
                    None => {}
                }
            }

            ServerEvent::GameFinalized(finalized) => {
                game::complete_termination(&mut self.registry, &mut self.presence, &finalized);
            }
        }
    }

    /// Sole entry point from the transport into business logic: typed
    /// decode, state precondition, handler.
    async fn dispatch(&mut self, session_id: SessionId, raw_id: u16, payload: &[u8]) {
        let Some(message_id) = MessageId::from_u16(raw_id) else {
            warn!("session {session_id}: unknown message id {raw_id:#06x}, ignoring");
            return;
        };

        let message = match ClientMessage::decode(message_id, payload) {
            Ok(message) => message,
            Err(DecodeError::NotClientMessage(id)) => {
                warn!("session {session_id}: sent server-to-client id {id:#06x}, ignoring");
                return;
            }
            Err(DecodeError::Payload(e)) => {
                debug!("session {session_id}: malformed {message_id:?} payload: {e}");
                self.registry.send_to(
                    session_id,
                    &ServerMessage::error(
                        ErrorCode::BadRequest,
                        format!("malformed payload for {message_id:?}"),
                    ),
                );
                return;
            }
        };

        let state = match self.registry.get(session_id) {
            Some(session) => session.state,
            None => return,
        };
        let required = dispatcher::required_state(&message);
        if state != required {
            self.registry.send_to(
                session_id,
                &ServerMessage::error(
                    ErrorCode::InvalidState,
                    format!(
                        "{message_id:?} requires the {} state (session is {})",
                        required.name(),
                        state.name()
                    ),
                ),
            );
            return;
        }

        let result = match message {
            ClientMessage::Register(creds) => {
                self.spawn_register(session_id, creds);
                Ok(())
            }
            ClientMessage::Login(creds) => {
                self.spawn_login(session_id, creds);
                Ok(())
            }
            ClientMessage::GetOnlineUsers => self.handle_get_online_users(session_id),
            ClientMessage::FindMatch => self.handle_find_match(session_id).await,
            ClientMessage::CancelFindMatch => {
                self.matchmaker.cancel(session_id);
                Ok(())
            }
            ClientMessage::FindAiMatch(req) => {
                self.handle_find_ai_match(session_id, req.difficulty).await
            }
            ClientMessage::MakeMove(req) => {
                let staged =
                    self.games
                        .handle_move(&mut self.registry, session_id, &req.game_id, &req.uci);
                match staged {
                    Ok(Some(job)) => {
                        self.spawn_move_append(job);
                        Ok(())
                    }
                    Ok(None) => Ok(()),
                    Err(e) => Err(e),
                }
            }
            ClientMessage::Resign(req) => {
                let ended = self.games.resign(session_id, &req.game_id);
                self.finish_if_ended(ended)
            }
            ClientMessage::OfferDraw(req) => {
                let ended = self
                    .games
                    .offer_draw(&mut self.registry, session_id, &req.game_id);
                self.finish_if_ended(ended)
            }
            ClientMessage::AcceptDraw(req) => {
                let ended = self.games.accept_draw(session_id, &req.game_id);
                self.finish_if_ended(ended)
            }
            ClientMessage::DeclineDraw(req) => {
                self.games
                    .decline_draw(&mut self.registry, session_id, &req.game_id)
            }
            ClientMessage::Challenge(req) => {
                self.handle_challenge(session_id, &req.target_user_id)
            }
            ClientMessage::AcceptChallenge(req) => {
                self.handle_accept_challenge(session_id, &req.challenger_user_id)
                    .await
            }
            ClientMessage::DeclineChallenge(req) => {
                self.handle_decline_challenge(session_id, &req.challenger_user_id)
            }
            ClientMessage::GetStats => {
                let user_id = self.session_user(session_id);
                match user_id {
                    Ok(user_id) => {
                        self.spawn_stats(session_id, user_id);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
            ClientMessage::GetHistory(req) => {
                let user_id = self.session_user(session_id);
                match user_id {
                    Ok(user_id) => {
                        self.spawn_history(session_id, user_id, req);
                        Ok(())
                    }
                    Err(e) => Err(e),
                }
            }
        };

        if let Err(e) = result {
            if matches!(e, HandlerError::Persistence(_)) {
                error!("session {session_id}: {message_id:?} failed: {e}");
            }
            self.registry.send_to(session_id, &e.reply());
        }
    }

    // -- Auth ---------------------------------------------------------------

    /// Registration runs entirely on a worker; the reply re-enters as a
    /// [`ServerEvent::Reply`].
    fn spawn_register(&self, session_id: SessionId, creds: Credentials) {
        let auth = self.auth.clone();
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let reply = match auth.register(&*repo, &creds.username, &creds.password).await {
                Ok(user) => {
                    info!("registered user {} ({})", user.username, user.id);
                    RegisterResult {
                        success: true,
                        error: None,
                    }
                }
                Err(e) => RegisterResult {
                    success: false,
                    error: Some(e.to_string()),
                },
            };
            let _ = events.send(ServerEvent::Reply {
                session_id,
                message: ServerMessage::RegisterResult(reply),
            });
        });
    }

    /// Credential verification runs on a worker; the session binding and
    /// presence update happen back on the coordinator in [`finish_login`].
    ///
    /// [`finish_login`]: Self::finish_login
    fn spawn_login(&self, session_id: SessionId, creds: Credentials) {
        let auth = self.auth.clone();
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let result = auth.login(&*repo, &creds.username, &creds.password).await;
            let _ = events.send(ServerEvent::LoggedIn { session_id, result });
        });
    }

    fn finish_login(&mut self, session_id: SessionId, result: Result<UserRecord, LoginError>) {
        let failure = |error: String| {
            ServerMessage::LoginResult(LoginResult {
                success: false,
                user_id: None,
                username: None,
                rating: None,
                token: None,
                error: Some(error),
            })
        };

        let user = match result {
            Ok(user) => user,
            Err(e) => {
                self.registry.send_to(session_id, &failure(e.to_string()));
                return;
            }
        };

        // The session may have changed state while the check ran.
        let state = match self.registry.get(session_id) {
            Some(session) => session.state,
            None => return,
        };
        if state != SessionState::Connected {
            self.registry
                .send_to(session_id, &failure("session is already authenticated".into()));
            return;
        }

        if self.registry.session_for_user(&user.id).is_some() {
            self.registry
                .send_to(session_id, &failure("account already connected".into()));
            return;
        }

        self.registry.bind_user(session_id, &user);
        self.presence.set_online(
            user.id.clone(),
            PresenceEntry {
                session_id,
                username: user.username.clone(),
                rating: user.rating,
            },
        );

        info!("session {session_id} authenticated as {}", user.username);
        self.registry.send_to(
            session_id,
            &ServerMessage::LoginResult(LoginResult {
                success: true,
                user_id: Some(user.id),
                username: Some(user.username),
                rating: Some(user.rating),
                token: Some(self.auth.mint_token()),
                error: None,
            }),
        );
    }

    // -- Lobby --------------------------------------------------------------

    fn handle_get_online_users(&mut self, session_id: SessionId) -> Result<(), HandlerError> {
        let viewer = self.session_user(session_id)?;
        let users = self.presence.roster_excluding(&viewer);
        self.registry.send_to(
            session_id,
            &ServerMessage::OnlineUsersList(OnlineUsersList { users }),
        );
        Ok(())
    }

    async fn handle_find_match(&mut self, session_id: SessionId) -> Result<(), HandlerError> {
        let ticket = {
            let session = self
                .registry
                .get(session_id)
                .ok_or(HandlerError::InvalidState("session is gone"))?;
            QueueTicket {
                session_id,
                user_id: self.session_user(session_id)?,
                rating: session.rating,
                joined_at: Instant::now(),
            }
        };

        let paired = self
            .matchmaker
            .enqueue(ticket)
            .map_err(|e| HandlerError::domain(e.to_string()))?;

        let Some((white, black)) = paired else {
            debug!(
                "session {session_id} queued for matchmaking ({} waiting)",
                self.matchmaker.queue_len()
            );
            return Ok(());
        };

        let white_summary = self
            .registry
            .get(white.session_id)
            .and_then(|s| s.user_summary())
            .ok_or_else(|| HandlerError::domain("player no longer available"))?;
        let black_summary = self
            .registry
            .get(black.session_id)
            .and_then(|s| s.user_summary())
            .ok_or_else(|| HandlerError::domain("player no longer available"))?;

        // MATCH_FOUND precedes GAME_START on each session.
        self.registry.send_to(
            white.session_id,
            &ServerMessage::MatchFound(MatchFound {
                opponent: black_summary,
            }),
        );
        self.registry.send_to(
            black.session_id,
            &ServerMessage::MatchFound(MatchFound {
                opponent: white_summary,
            }),
        );

        self.games
            .start_pvp(
                &mut self.registry,
                &*self.repo,
                white.session_id,
                black.session_id,
            )
            .await?;
        Ok(())
    }

    async fn handle_find_ai_match(
        &mut self,
        session_id: SessionId,
        difficulty: shared::message::Difficulty,
    ) -> Result<(), HandlerError> {
        // Starting an AI game abandons any matchmaking wait.
        self.matchmaker.cancel(session_id);
        self.games
            .start_ai(&mut self.registry, &*self.repo, session_id, difficulty)
            .await?;
        Ok(())
    }

    fn handle_challenge(
        &mut self,
        session_id: SessionId,
        target_user_id: &str,
    ) -> Result<(), HandlerError> {
        let challenger = self
            .registry
            .get(session_id)
            .and_then(|s| s.user_summary())
            .ok_or(HandlerError::InvalidState("session is gone"))?;

        if challenger.user_id == target_user_id {
            return Err(HandlerError::domain("you cannot challenge yourself"));
        }

        let target_user: String = target_user_id.to_string();
        let target_session = self
            .registry
            .session_for_user(&target_user)
            .ok_or_else(|| HandlerError::domain("player is not online"))?;

        let available = self
            .registry
            .get(target_session)
            .is_some_and(|s| s.state == SessionState::Authenticated);
        if !available {
            return Err(HandlerError::domain("player is unavailable"));
        }

        self.matchmaker
            .create_challenge(Challenge {
                challenger_session: session_id,
                target_session,
                target_user,
                challenger: challenger.clone(),
                issued_at: Instant::now(),
            })
            .map_err(|e| HandlerError::domain(e.to_string()))?;

        self.registry.send_to(
            target_session,
            &ServerMessage::ChallengeReceived(ChallengeReceived { sender: challenger }),
        );
        Ok(())
    }

    async fn handle_accept_challenge(
        &mut self,
        session_id: SessionId,
        challenger_user_id: &str,
    ) -> Result<(), HandlerError> {
        let challenger_session = self
            .registry
            .session_for_user(&challenger_user_id.to_string())
            .ok_or_else(|| HandlerError::domain("challenger is no longer online"))?;

        let challenge = self
            .matchmaker
            .take_challenge(challenger_session, session_id)
            .ok_or_else(|| HandlerError::domain("no pending challenge from this player"))?;

        let challenger_ready = self
            .registry
            .get(challenger_session)
            .is_some_and(|s| s.state == SessionState::Authenticated);
        if !challenger_ready {
            return Err(HandlerError::domain("challenger is unavailable"));
        }

        // Entering a game leaves the matchmaking queue.
        self.matchmaker.cancel(challenger_session);
        self.matchmaker.cancel(session_id);

        let accepter = self.session_user(session_id)?;
        self.registry.send_to(
            challenge.challenger_session,
            &ServerMessage::ChallengeAccepted(ChallengeOutcome { user_id: accepter }),
        );

        // The challenger takes white, as the one who initiated.
        self.games
            .start_pvp(
                &mut self.registry,
                &*self.repo,
                challenger_session,
                session_id,
            )
            .await?;
        Ok(())
    }

    fn handle_decline_challenge(
        &mut self,
        session_id: SessionId,
        challenger_user_id: &str,
    ) -> Result<(), HandlerError> {
        let Some(challenger_session) = self
            .registry
            .session_for_user(&challenger_user_id.to_string())
        else {
            return Ok(());
        };

        // Declining an already-consumed challenge is a no-op.
        if let Some(_challenge) = self
            .matchmaker
            .take_challenge(challenger_session, session_id)
        {
            let decliner = self.session_user(session_id)?;
            self.registry.send_to(
                challenger_session,
                &ServerMessage::ChallengeDeclined(ChallengeOutcome { user_id: decliner }),
            );
        }
        Ok(())
    }

    // -- Stats & history ----------------------------------------------------

    fn spawn_stats(&self, session_id: SessionId, user_id: String) {
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let message = match repo.find_user(&user_id).await {
                Ok(Some(user)) => ServerMessage::StatsResponse(StatsResponse {
                    user_id: user.id,
                    username: user.username,
                    rating: user.rating,
                    games: user.games,
                    wins: user.wins,
                    losses: user.losses,
                    draws: user.draws,
                }),
                Ok(None) => ServerMessage::error(ErrorCode::Domain, "user not found"),
                Err(e) => {
                    error!("stats lookup for {user_id} failed: {e}");
                    ServerMessage::error(ErrorCode::Internal, "internal error")
                }
            };
            let _ = events.send(ServerEvent::Reply {
                session_id,
                message,
            });
        });
    }

    fn spawn_history(&self, session_id: SessionId, user_id: String, req: HistoryRequest) {
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();
        let limit = req
            .limit
            .unwrap_or(HISTORY_DEFAULT_LIMIT)
            .min(HISTORY_MAX_LIMIT);

        tokio::spawn(async move {
            let message = match repo.recent_games(&user_id, i64::from(limit)).await {
                Ok(records) => {
                    let games = records
                        .into_iter()
                        .filter_map(|record| {
                            let result = record.result?;
                            let my_color = if record.white_player_id == user_id {
                                shared::message::Color::White
                            } else {
                                shared::message::Color::Black
                            };
                            let user_result = match result.winner() {
                                None => PersonalResult::Draw,
                                Some(winner) if winner == my_color => PersonalResult::Win,
                                Some(_) => PersonalResult::Loss,
                            };
                            let opponent = match my_color {
                                shared::message::Color::White => record.black_username,
                                shared::message::Color::Black => record.white_username,
                            };
                            Some(HistoryEntry {
                                game_id: record.id,
                                opponent,
                                my_color,
                                result,
                                user_result,
                                moves_count: record.moves.len() as u32,
                                ended_at: record
                                    .end_time
                                    .map(|t| t.timestamp_millis().max(0) as u64)
                                    .unwrap_or(0),
                            })
                        })
                        .collect();
                    ServerMessage::HistoryResponse(HistoryResponse { games })
                }
                Err(e) => {
                    error!("history lookup for {user_id} failed: {e}");
                    ServerMessage::error(ErrorCode::Internal, "internal error")
                }
            };
            let _ = events.send(ServerEvent::Reply {
                session_id,
                message,
            });
        });
    }

    // -- Lifecycle ----------------------------------------------------------

    /// Tears a session down in a fixed order: matchmaking, presence, game,
    /// registry. Removal from the registry drops the outbound sender, which
    /// ends the connection task.
    fn close_session(&mut self, session_id: SessionId) {
        let (user_id, game_id) = match self.registry.get(session_id) {
            Some(session) => (session.user_id.clone(), session.game_id.clone()),
            None => return,
        };

        for challenge in self.matchmaker.drop_session(session_id) {
            // Decline-equivalent for challengers whose target vanished.
            self.registry.send_to(
                challenge.challenger_session,
                &ServerMessage::ChallengeDeclined(ChallengeOutcome {
                    user_id: challenge.target_user,
                }),
            );
        }

        if let Some(user_id) = &user_id {
            self.presence.set_offline(user_id);
        }

        if let Some(game_id) = &game_id {
            if let Some(job) = self.games.forfeit(session_id, game_id) {
                self.spawn_termination(job);
            }
        }

        self.registry.remove(session_id);
    }

    fn housekeeping(&mut self) {
        let now = Instant::now();

        for challenge in self.matchmaker.take_expired(now) {
            debug!(
                "challenge from session {} expired",
                challenge.challenger_session
            );
            self.registry.send_to(
                challenge.challenger_session,
                &ServerMessage::ChallengeDeclined(ChallengeOutcome {
                    user_id: challenge.target_user,
                }),
            );
        }

        if self.presence.take_due(now) {
            self.broadcast_presence();
        }

        let idle: Vec<SessionId> = self
            .registry
            .iter()
            .filter(|s| s.is_idle(self.config.idle_timeout))
            .map(|s| s.id)
            .collect();
        for session_id in idle {
            info!("session {session_id} idle, disconnecting");
            self.close_session(session_id);
        }
    }

    /// Fans the roster out to every authenticated session, each excluded
    /// from their own view.
    fn broadcast_presence(&mut self) {
        let recipients: Vec<(SessionId, String)> = self
            .registry
            .iter()
            .filter(|s| s.state != SessionState::Connected)
            .filter_map(|s| s.user_id.clone().map(|user_id| (s.id, user_id)))
            .collect();

        for (session_id, user_id) in recipients {
            let users = self.presence.roster_excluding(&user_id);
            self.registry.send_to(
                session_id,
                &ServerMessage::OnlineUsersList(OnlineUsersList { users }),
            );
        }
    }

    /// Closes sessions whose send queue overflowed, repeating until the
    /// close-out itself stops producing overflows.
    fn reap_overflowed(&mut self) {
        loop {
            let overflowed = self.registry.take_overflowed();
            if overflowed.is_empty() {
                return;
            }
            for session_id in overflowed {
                self.close_session(session_id);
            }
        }
    }

    // -- Staged work --------------------------------------------------------

    fn finish_if_ended(
        &self,
        result: Result<Option<TerminationJob>, HandlerError>,
    ) -> Result<(), HandlerError> {
        match result {
            Ok(Some(job)) => {
                self.spawn_termination(job);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn spawn_move_append(&self, job: MoveJob) {
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let result = repo.append_move(&job.game_id, &job.uci, &job.fen).await;
            let _ = events.send(ServerEvent::MoveAppended {
                game_id: job.game_id,
                result,
            });
        });
    }

    fn spawn_termination(&self, job: TerminationJob) {
        let repo = Arc::clone(&self.repo);
        let events = self.events_tx.clone();

        tokio::spawn(async move {
            let finalized = game::run_termination(repo, job).await;
            let _ = events.send(ServerEvent::GameFinalized(finalized));
        });
    }

    fn spawn_ai_worker(&self, request: AiRequest) {
        let events = self.events_tx.clone();
        tokio::task::spawn_blocking(move || {
            let uci = ai::choose_move(&request.position, request.difficulty);
            let _ = events.send(ServerEvent::AiMove {
                game_id: request.game_id,
                uci,
            });
        });
    }

    fn session_user(&self, session_id: SessionId) -> Result<String, HandlerError> {
        self.registry
            .get(session_id)
            .and_then(|s| s.user_id.clone())
            .ok_or(HandlerError::InvalidState("not authenticated"))
    }
}
