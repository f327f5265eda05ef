//! Handler-level error taxonomy
//!
//! Handlers report failures through [`HandlerError`]; the coordinator turns
//! each variant into the matching typed wire reply. Framing violations are
//! handled separately by the connection layer because they tear the session
//! down instead of producing a reply.

use shared::message::{ErrorCode, ServerMessage};
use thiserror::Error;

use crate::repository::RepositoryError;

#[derive(Debug, Error)]
pub enum HandlerError {
    /// Operation forbidden in the session's or game's current state.
    #[error("{0}")]
    InvalidState(&'static str),

    /// Well-formed request that violates a game or matchmaking rule.
    #[error("{0}")]
    Domain(String),

    /// A repository write or read failed underneath a handler.
    #[error("persistence failure: {0}")]
    Persistence(#[from] RepositoryError),
}

impl HandlerError {
    pub fn domain(message: impl Into<String>) -> Self {
        Self::Domain(message.into())
    }

    /// The wire reply for this failure. Persistence details never leave the
    /// server.
    pub fn reply(&self) -> ServerMessage {
        match self {
            Self::InvalidState(msg) => ServerMessage::error(ErrorCode::InvalidState, *msg),
            Self::Domain(msg) => ServerMessage::error(ErrorCode::Domain, msg.clone()),
            Self::Persistence(_) => ServerMessage::error(ErrorCode::Internal, "internal error"),
        }
    }
}
