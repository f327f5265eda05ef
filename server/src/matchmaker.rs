//! Random-pairing queue and explicit challenges
//!
//! The queue is FIFO with an optional rating window; ties between eligible
//! partners resolve on the (join time, session id) key so pairing is
//! deterministic. Challenges are keyed by (challenger, target) session pair,
//! expire after a TTL, and a challenger may have at most one outstanding.

use std::time::{Duration, Instant};

use thiserror::Error;

use shared::message::UserSummary;

use crate::repository::UserId;
use crate::session::SessionId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MatchmakerError {
    #[error("already waiting in the matchmaking queue")]
    AlreadyQueued,

    #[error("a challenge from you is already pending")]
    ChallengePending,

    #[error("you cannot challenge yourself")]
    SelfChallenge,
}

/// One waiting player.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueTicket {
    pub session_id: SessionId,
    pub user_id: UserId,
    pub rating: i32,
    pub joined_at: Instant,
}

/// One pending challenge, with a snapshot of the challenger for the
/// CHALLENGE_RECEIVED push.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub challenger_session: SessionId,
    pub target_session: SessionId,
    pub target_user: UserId,
    pub challenger: UserSummary,
    pub issued_at: Instant,
}

#[derive(Debug)]
pub struct Matchmaker {
    queue: Vec<QueueTicket>,
    challenges: Vec<Challenge>,
    rating_window: Option<i32>,
    challenge_ttl: Duration,
}

impl Matchmaker {
    pub fn new(rating_window: Option<i32>, challenge_ttl: Duration) -> Self {
        Self {
            queue: Vec::new(),
            challenges: Vec::new(),
            rating_window,
            challenge_ttl,
        }
    }

    /// Joins the queue and immediately tries to pair the newcomer with the
    /// oldest eligible waiter. On a pairing, both tickets leave the queue and
    /// are returned `(older, newcomer)`.
    pub fn enqueue(
        &mut self,
        ticket: QueueTicket,
    ) -> Result<Option<(QueueTicket, QueueTicket)>, MatchmakerError> {
        if self.is_queued(ticket.session_id) {
            return Err(MatchmakerError::AlreadyQueued);
        }

        let partner = self
            .queue
            .iter()
            .enumerate()
            .filter(|(_, waiting)| self.within_window(waiting.rating, ticket.rating))
            .min_by_key(|(_, waiting)| (waiting.joined_at, waiting.session_id))
            .map(|(index, _)| index);

        match partner {
            Some(index) => {
                let waiting = self.queue.remove(index);
                Ok(Some((waiting, ticket)))
            }
            None => {
                self.queue.push(ticket);
                Ok(None)
            }
        }
    }

    fn within_window(&self, a: i32, b: i32) -> bool {
        match self.rating_window {
            Some(window) => (a - b).abs() <= window,
            None => true,
        }
    }

    pub fn is_queued(&self, session_id: SessionId) -> bool {
        self.queue.iter().any(|t| t.session_id == session_id)
    }

    /// Leaves the queue. Returns whether an entry was removed.
    pub fn cancel(&mut self, session_id: SessionId) -> bool {
        let before = self.queue.len();
        self.queue.retain(|t| t.session_id != session_id);
        self.queue.len() != before
    }

    /// Records a challenge. At most one outstanding per challenger.
    pub fn create_challenge(&mut self, challenge: Challenge) -> Result<(), MatchmakerError> {
        if challenge.challenger_session == challenge.target_session {
            return Err(MatchmakerError::SelfChallenge);
        }
        if self
            .challenges
            .iter()
            .any(|c| c.challenger_session == challenge.challenger_session)
        {
            return Err(MatchmakerError::ChallengePending);
        }
        self.challenges.push(challenge);
        Ok(())
    }

    /// Atomically consumes the challenge for this (challenger, target) pair.
    pub fn take_challenge(
        &mut self,
        challenger_session: SessionId,
        target_session: SessionId,
    ) -> Option<Challenge> {
        let index = self.challenges.iter().position(|c| {
            c.challenger_session == challenger_session && c.target_session == target_session
        })?;
        Some(self.challenges.remove(index))
    }

    /// Drains challenges older than the TTL.
    pub fn take_expired(&mut self, now: Instant) -> Vec<Challenge> {
        let ttl = self.challenge_ttl;
        let (expired, live): (Vec<_>, Vec<_>) = self
            .challenges
            .drain(..)
            .partition(|c| now.saturating_duration_since(c.issued_at) >= ttl);
        self.challenges = live;
        expired
    }

    /// Removes every trace of a session: its queue entry, its own challenge,
    /// and challenges targeting it. Challenges where the session was the
    /// target are returned so the challengers can be notified.
    pub fn drop_session(&mut self, session_id: SessionId) -> Vec<Challenge> {
        self.cancel(session_id);
        self.challenges.retain(|c| c.challenger_session != session_id);

        let (orphaned, live): (Vec<_>, Vec<_>) = self
            .challenges
            .drain(..)
            .partition(|c| c.target_session == session_id);
        self.challenges = live;
        orphaned
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn pending_challenges(&self) -> usize {
        self.challenges.len()
    }
}
