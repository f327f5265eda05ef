//! Online-users set with debounced change broadcasting
//!
//! Every authenticated session contributes one entry. Changes mark the set
//! dirty; the coordinator's housekeeping tick asks `take_due` whether the
//! debounce window has elapsed and then fans the roster out itself, so
//! bursts of logins and disconnects coalesce into a single broadcast.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use shared::message::UserSummary;

use crate::repository::UserId;
use crate::session::SessionId;

/// Changes are coalesced for this long before a broadcast goes out.
pub const PRESENCE_DEBOUNCE: Duration = Duration::from_millis(100);

#[derive(Debug, Clone)]
pub struct PresenceEntry {
    pub session_id: SessionId,
    pub username: String,
    pub rating: i32,
}

#[derive(Debug)]
pub struct PresenceService {
    online: HashMap<UserId, PresenceEntry>,
    debounce: Duration,
    dirty_since: Option<Instant>,
}

impl PresenceService {
    pub fn new(debounce: Duration) -> Self {
        Self {
            online: HashMap::new(),
            debounce,
            dirty_since: None,
        }
    }

    pub fn set_online(&mut self, user_id: UserId, entry: PresenceEntry) {
        self.online.insert(user_id, entry);
        self.mark_dirty();
    }

    pub fn set_offline(&mut self, user_id: &UserId) {
        if self.online.remove(user_id).is_some() {
            self.mark_dirty();
        }
    }

    pub fn update_rating(&mut self, user_id: &UserId, rating: i32) {
        if let Some(entry) = self.online.get_mut(user_id) {
            entry.rating = rating;
            self.mark_dirty();
        }
    }

    fn mark_dirty(&mut self) {
        if self.dirty_since.is_none() {
            self.dirty_since = Some(Instant::now());
        }
    }

    /// True once the debounce window since the first pending change has
    /// elapsed; clears the dirty flag as a side effect.
    pub fn take_due(&mut self, now: Instant) -> bool {
        match self.dirty_since {
            Some(since) if now.saturating_duration_since(since) >= self.debounce => {
                self.dirty_since = None;
                true
            }
            _ => false,
        }
    }

    /// The roster as seen by one user: everyone online except themselves.
    pub fn roster_excluding(&self, viewer: &UserId) -> Vec<UserSummary> {
        let mut users: Vec<UserSummary> = self
            .online
            .iter()
            .filter(|(user_id, _)| *user_id != viewer)
            .map(|(user_id, entry)| UserSummary {
                user_id: user_id.clone(),
                username: entry.username.clone(),
                rating: entry.rating,
            })
            .collect();
        users.sort_by(|a, b| a.username.cmp(&b.username));
        users
    }

    pub fn len(&self) -> usize {
        self.online.len()
    }

    pub fn is_empty(&self) -> bool {
        self.online.is_empty()
    }
}
