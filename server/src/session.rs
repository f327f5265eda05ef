//! Per-connection session state and the registry that owns it
//!
//! One [`Session`] exists per live socket. The registry is the only owner of
//! session structs; every other component refers to sessions by id and goes
//! through the registry to reach them.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use log::{debug, warn};
use thiserror::Error;
use tokio::sync::mpsc;

use shared::message::{ServerMessage, UserSummary};

use crate::repository::{GameId, UserId, UserRecord};

pub type SessionId = u64;

/// Lifecycle of a connection, from accept to disconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Socket accepted, no identity yet.
    Connected,
    /// Login succeeded; the session carries a user.
    Authenticated,
    /// Playing in exactly one active game.
    InGame,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            Self::Connected => "Connected",
            Self::Authenticated => "Authenticated",
            Self::InGame => "InGame",
        }
    }
}

/// Why a send to a session did not go through.
#[derive(Debug, Error)]
pub enum SendFailure {
    /// The bounded send queue is full: the consumer is too slow to keep.
    #[error("send queue full")]
    QueueFull,

    /// The connection task is gone.
    #[error("session closed")]
    Closed,
}

/// Server-side context for one live connection.
#[derive(Debug)]
pub struct Session {
    pub id: SessionId,
    pub addr: SocketAddr,
    pub state: SessionState,
    pub user_id: Option<UserId>,
    pub username: Option<String>,
    /// Rating snapshot, refreshed on login and after every rated game.
    pub rating: i32,
    pub game_id: Option<GameId>,
    pub last_activity: Instant,
    outbound: mpsc::Sender<Vec<u8>>,
}

impl Session {
    fn new(id: SessionId, addr: SocketAddr, outbound: mpsc::Sender<Vec<u8>>) -> Self {
        Self {
            id,
            addr,
            state: SessionState::Connected,
            user_id: None,
            username: None,
            rating: 0,
            game_id: None,
            last_activity: Instant::now(),
            outbound,
        }
    }

    /// Queues a message without blocking. A full queue is a backpressure
    /// signal the caller must answer by disconnecting the session.
    pub fn send(&self, message: &ServerMessage) -> Result<(), SendFailure> {
        let frame = match message.to_frame() {
            Ok(frame) => frame,
            Err(e) => {
                warn!("session {}: failed to encode {:?}: {e}", self.id, message.id());
                return Ok(());
            }
        };

        self.outbound.try_send(frame).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    pub fn touch(&mut self) {
        self.last_activity = Instant::now();
    }

    pub fn is_idle(&self, timeout: Duration) -> bool {
        self.last_activity.elapsed() > timeout
    }

    /// Public view of the authenticated user behind this session.
    pub fn user_summary(&self) -> Option<UserSummary> {
        Some(UserSummary {
            user_id: self.user_id.clone()?,
            username: self.username.clone()?,
            rating: self.rating,
        })
    }
}

/// Owner of all live sessions, indexed by session id and by user id.
#[derive(Debug, Default)]
pub struct SessionRegistry {
    sessions: HashMap<SessionId, Session>,
    by_user: HashMap<UserId, SessionId>,
    next_id: SessionId,
    /// Sessions whose send queue overflowed; the coordinator disconnects
    /// them after the current event.
    overflowed: Vec<SessionId>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly accepted connection and assigns its id.
    pub fn create(&mut self, addr: SocketAddr, outbound: mpsc::Sender<Vec<u8>>) -> SessionId {
        self.next_id += 1;
        let id = self.next_id;
        self.sessions.insert(id, Session::new(id, addr, outbound));
        id
    }

    pub fn get(&self, id: SessionId) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn session_for_user(&self, user_id: &UserId) -> Option<SessionId> {
        self.by_user.get(user_id).copied()
    }

    /// Attaches a logged-in user to the session and promotes it to
    /// Authenticated.
    pub fn bind_user(&mut self, id: SessionId, user: &UserRecord) {
        if let Some(session) = self.sessions.get_mut(&id) {
            session.state = SessionState::Authenticated;
            session.user_id = Some(user.id.clone());
            session.username = Some(user.username.clone());
            session.rating = user.rating;
            self.by_user.insert(user.id.clone(), id);
        }
    }

    /// Drops the session and its user index entry. The returned struct holds
    /// the outbound sender; dropping it closes the connection task.
    pub fn remove(&mut self, id: SessionId) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        if let Some(user_id) = &session.user_id {
            if self.by_user.get(user_id) == Some(&id) {
                self.by_user.remove(user_id);
            }
        }
        debug!("session {id} removed ({} live)", self.sessions.len());
        Some(session)
    }

    /// Best-effort send. A closed session is silently skipped (its cleanup
    /// is already underway); a full queue marks the session for disconnect.
    pub fn send_to(&mut self, id: SessionId, message: &ServerMessage) {
        match self.sessions.get(&id) {
            Some(session) => match session.send(message) {
                Ok(()) => {}
                Err(SendFailure::Closed) => {}
                Err(SendFailure::QueueFull) => {
                    warn!("session {id}: send queue overflow, dropping slow consumer");
                    self.overflowed.push(id);
                }
            },
            None => {}
        }
    }

    /// Drains the sessions marked for disconnect by [`send_to`].
    ///
    /// [`send_to`]: Self::send_to
    pub fn take_overflowed(&mut self) -> Vec<SessionId> {
        std::mem::take(&mut self.overflowed)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
