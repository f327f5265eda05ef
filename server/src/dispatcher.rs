//! Message preconditions
//!
//! Every client message declares the session state it requires; the
//! coordinator checks the precondition before invoking a handler and answers
//! a typed "invalid state" error on mismatch. The table replaces the long
//! if/elif dispatch of older chess servers with one total function over the
//! message type.

use shared::message::ClientMessage;

use crate::session::SessionState;

/// The session state a message is valid in.
pub fn required_state(message: &ClientMessage) -> SessionState {
    use ClientMessage::*;
    match message {
        Register(_) | Login(_) => SessionState::Connected,

        GetOnlineUsers
        | FindMatch
        | CancelFindMatch
        | FindAiMatch(_)
        | Challenge(_)
        | AcceptChallenge(_)
        | DeclineChallenge(_)
        | GetStats
        | GetHistory(_) => SessionState::Authenticated,

        MakeMove(_) | Resign(_) | OfferDraw(_) | AcceptDraw(_) | DeclineDraw(_) => {
            SessionState::InGame
        }
    }
}
