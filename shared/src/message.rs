//! Typed message catalogue for the chess protocol
//!
//! Mirrors the id tables of the wire protocol: client-to-server ids in the
//! `0x0000` range, server-to-client ids in the `0x1000` range. All payloads
//! are JSON objects.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::{self, FrameError};

/// Every message id the protocol knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum MessageId {
    // Client → server
    Register = 0x0001,
    Login = 0x0002,
    GetOnlineUsers = 0x0003,
    FindMatch = 0x0010,
    CancelFindMatch = 0x0011,
    FindAiMatch = 0x0012,
    MakeMove = 0x0020,
    Resign = 0x0021,
    OfferDraw = 0x0022,
    AcceptDraw = 0x0023,
    DeclineDraw = 0x0024,
    Challenge = 0x0025,
    AcceptChallenge = 0x0026,
    DeclineChallenge = 0x0027,
    GetStats = 0x0030,
    GetHistory = 0x0031,

    // Server → client
    RegisterResult = 0x1001,
    LoginResult = 0x1002,
    OnlineUsersList = 0x1004,
    MatchFound = 0x1100,
    GameStart = 0x1101,
    GameStateUpdate = 0x1200,
    InvalidMove = 0x1201,
    GameOver = 0x1202,
    DrawOfferReceived = 0x1203,
    DrawOfferDeclined = 0x1204,
    ChallengeReceived = 0x1205,
    ChallengeAccepted = 0x1206,
    ChallengeDeclined = 0x1207,
    StatsResponse = 0x1300,
    HistoryResponse = 0x1301,
    Error = 0x1F00,
}

impl MessageId {
    /// Maps a raw wire id onto the catalogue. Unknown ids yield `None`.
    pub fn from_u16(raw: u16) -> Option<Self> {
        use MessageId::*;
        Some(match raw {
            0x0001 => Register,
            0x0002 => Login,
            0x0003 => GetOnlineUsers,
            0x0010 => FindMatch,
            0x0011 => CancelFindMatch,
            0x0012 => FindAiMatch,
            0x0020 => MakeMove,
            0x0021 => Resign,
            0x0022 => OfferDraw,
            0x0023 => AcceptDraw,
            0x0024 => DeclineDraw,
            0x0025 => Challenge,
            0x0026 => AcceptChallenge,
            0x0027 => DeclineChallenge,
            0x0030 => GetStats,
            0x0031 => GetHistory,
            0x1001 => RegisterResult,
            0x1002 => LoginResult,
            0x1004 => OnlineUsersList,
            0x1100 => MatchFound,
            0x1101 => GameStart,
            0x1200 => GameStateUpdate,
            0x1201 => InvalidMove,
            0x1202 => GameOver,
            0x1203 => DrawOfferReceived,
            0x1204 => DrawOfferDeclined,
            0x1205 => ChallengeReceived,
            0x1206 => ChallengeAccepted,
            0x1207 => ChallengeDeclined,
            0x1300 => StatsResponse,
            0x1301 => HistoryResponse,
            0x1F00 => Error,
            _ => return None,
        })
    }

    pub fn as_u16(self) -> u16 {
        self as u16
    }
}

/// Side of the board, serialized as `"white"` / `"black"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opposite(self) -> Self {
        match self {
            Self::White => Self::Black,
            Self::Black => Self::White,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::White => "white",
            Self::Black => "black",
        }
    }
}

/// Final outcome of a game.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameOutcome {
    WhiteWin,
    BlackWin,
    Draw,
}

impl GameOutcome {
    pub fn winner(self) -> Option<Color> {
        match self {
            Self::WhiteWin => Some(Color::White),
            Self::BlackWin => Some(Color::Black),
            Self::Draw => None,
        }
    }
}

/// Why a game ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndCause {
    Checkmate,
    Stalemate,
    InsufficientMaterial,
    FiftyMoveRule,
    ThreefoldRepetition,
    Resignation,
    Agreement,
    Abandonment,
}

/// Requested AI strength.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

// ---------------------------------------------------------------------------
// Client → server payloads
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FindAiMatchRequest {
    pub difficulty: Difficulty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MakeMoveRequest {
    pub game_id: String,
    #[serde(rename = "move")]
    pub uci: String,
}

/// Payload shared by RESIGN and the draw messages.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRef {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeRequest {
    pub target_user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeAnswer {
    pub challenger_user_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HistoryRequest {
    #[serde(default)]
    pub limit: Option<u32>,
}

// ---------------------------------------------------------------------------
// Server → client payloads
// ---------------------------------------------------------------------------

/// Public view of a user, embedded in presence and pairing messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub user_id: String,
    pub username: String,
    pub rating: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rating: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineUsersList {
    pub users: Vec<UserSummary>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MatchFound {
    pub opponent: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStart {
    pub game_id: String,
    pub color: Color,
    pub fen: String,
    pub opponent: UserSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameStateUpdate {
    pub game_id: String,
    pub fen: String,
    pub last_move: String,
    pub turn: Color,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InvalidMove {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameOver {
    pub game_id: String,
    pub result: GameOutcome,
    pub cause: EndCause,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawOfferReceived {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DrawOfferDeclined {
    pub game_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeReceived {
    pub sender: UserSummary,
}

/// CHALLENGE_ACCEPTED / CHALLENGE_DECLINED payload, naming the responding
/// user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChallengeOutcome {
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatsResponse {
    pub user_id: String,
    pub username: String,
    pub rating: i32,
    pub games: i64,
    pub wins: i64,
    pub losses: i64,
    pub draws: i64,
}

/// One completed game, viewed from the requesting user's side.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub game_id: String,
    pub opponent: String,
    pub my_color: Color,
    pub result: GameOutcome,
    pub user_result: PersonalResult,
    pub moves_count: u32,
    /// End of game, milliseconds since the Unix epoch.
    pub ended_at: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PersonalResult {
    Win,
    Loss,
    Draw,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryResponse {
    pub games: Vec<HistoryEntry>,
}

/// Generic typed error reply.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReply {
    pub code: ErrorCode,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Operation not allowed in the session's current state.
    InvalidState,
    /// Payload failed to decode for an otherwise known message id.
    BadRequest,
    /// Request was well-formed but violates a game or matchmaking rule.
    Domain,
    /// Something went wrong server-side.
    Internal,
}

// ---------------------------------------------------------------------------
// Typed decode / encode
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("message id {0:#06x} is not a client message")]
    NotClientMessage(u16),

    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),
}

/// A fully decoded client request.
#[derive(Debug, Clone)]
pub enum ClientMessage {
    Register(Credentials),
    Login(Credentials),
    GetOnlineUsers,
    FindMatch,
    CancelFindMatch,
    FindAiMatch(FindAiMatchRequest),
    MakeMove(MakeMoveRequest),
    Resign(GameRef),
    OfferDraw(GameRef),
    AcceptDraw(GameRef),
    DeclineDraw(GameRef),
    Challenge(ChallengeRequest),
    AcceptChallenge(ChallengeAnswer),
    DeclineChallenge(ChallengeAnswer),
    GetStats,
    GetHistory(HistoryRequest),
}

impl ClientMessage {
    /// Decodes the JSON payload for a known client message id.
    ///
    /// Messages whose payload carries no fields accept any JSON object (the
    /// original clients send `{}`) and an empty payload.
    pub fn decode(id: MessageId, payload: &[u8]) -> Result<Self, DecodeError> {
        fn parse<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T, DecodeError> {
            Ok(serde_json::from_slice(payload)?)
        }

        Ok(match id {
            MessageId::Register => Self::Register(parse(payload)?),
            MessageId::Login => Self::Login(parse(payload)?),
            MessageId::GetOnlineUsers => Self::GetOnlineUsers,
            MessageId::FindMatch => Self::FindMatch,
            MessageId::CancelFindMatch => Self::CancelFindMatch,
            MessageId::FindAiMatch => Self::FindAiMatch(parse(payload)?),
            MessageId::MakeMove => Self::MakeMove(parse(payload)?),
            MessageId::Resign => Self::Resign(parse(payload)?),
            MessageId::OfferDraw => Self::OfferDraw(parse(payload)?),
            MessageId::AcceptDraw => Self::AcceptDraw(parse(payload)?),
            MessageId::DeclineDraw => Self::DeclineDraw(parse(payload)?),
            MessageId::Challenge => Self::Challenge(parse(payload)?),
            MessageId::AcceptChallenge => Self::AcceptChallenge(parse(payload)?),
            MessageId::DeclineChallenge => Self::DeclineChallenge(parse(payload)?),
            MessageId::GetStats => Self::GetStats,
            MessageId::GetHistory => {
                if payload.is_empty() {
                    Self::GetHistory(HistoryRequest::default())
                } else {
                    Self::GetHistory(parse(payload)?)
                }
            }
            other => return Err(DecodeError::NotClientMessage(other.as_u16())),
        })
    }

    pub fn id(&self) -> MessageId {
        match self {
            Self::Register(_) => MessageId::Register,
            Self::Login(_) => MessageId::Login,
            Self::GetOnlineUsers => MessageId::GetOnlineUsers,
            Self::FindMatch => MessageId::FindMatch,
            Self::CancelFindMatch => MessageId::CancelFindMatch,
            Self::FindAiMatch(_) => MessageId::FindAiMatch,
            Self::MakeMove(_) => MessageId::MakeMove,
            Self::Resign(_) => MessageId::Resign,
            Self::OfferDraw(_) => MessageId::OfferDraw,
            Self::AcceptDraw(_) => MessageId::AcceptDraw,
            Self::DeclineDraw(_) => MessageId::DeclineDraw,
            Self::Challenge(_) => MessageId::Challenge,
            Self::AcceptChallenge(_) => MessageId::AcceptChallenge,
            Self::DeclineChallenge(_) => MessageId::DeclineChallenge,
            Self::GetStats => MessageId::GetStats,
            Self::GetHistory(_) => MessageId::GetHistory,
        }
    }
}

/// A reply or push ready to be framed for one or more sessions.
#[derive(Debug, Clone)]
pub enum ServerMessage {
    RegisterResult(RegisterResult),
    LoginResult(LoginResult),
    OnlineUsersList(OnlineUsersList),
    MatchFound(MatchFound),
    GameStart(GameStart),
    GameStateUpdate(GameStateUpdate),
    InvalidMove(InvalidMove),
    GameOver(GameOver),
    DrawOfferReceived(DrawOfferReceived),
    DrawOfferDeclined(DrawOfferDeclined),
    ChallengeReceived(ChallengeReceived),
    ChallengeAccepted(ChallengeOutcome),
    ChallengeDeclined(ChallengeOutcome),
    StatsResponse(StatsResponse),
    HistoryResponse(HistoryResponse),
    Error(ErrorReply),
}

impl ServerMessage {
    pub fn id(&self) -> MessageId {
        match self {
            Self::RegisterResult(_) => MessageId::RegisterResult,
            Self::LoginResult(_) => MessageId::LoginResult,
            Self::OnlineUsersList(_) => MessageId::OnlineUsersList,
            Self::MatchFound(_) => MessageId::MatchFound,
            Self::GameStart(_) => MessageId::GameStart,
            Self::GameStateUpdate(_) => MessageId::GameStateUpdate,
            Self::InvalidMove(_) => MessageId::InvalidMove,
            Self::GameOver(_) => MessageId::GameOver,
            Self::DrawOfferReceived(_) => MessageId::DrawOfferReceived,
            Self::DrawOfferDeclined(_) => MessageId::DrawOfferDeclined,
            Self::ChallengeReceived(_) => MessageId::ChallengeReceived,
            Self::ChallengeAccepted(_) => MessageId::ChallengeAccepted,
            Self::ChallengeDeclined(_) => MessageId::ChallengeDeclined,
            Self::StatsResponse(_) => MessageId::StatsResponse,
            Self::HistoryResponse(_) => MessageId::HistoryResponse,
            Self::Error(_) => MessageId::Error,
        }
    }

    fn payload(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Self::RegisterResult(p) => serde_json::to_vec(p),
            Self::LoginResult(p) => serde_json::to_vec(p),
            Self::OnlineUsersList(p) => serde_json::to_vec(p),
            Self::MatchFound(p) => serde_json::to_vec(p),
            Self::GameStart(p) => serde_json::to_vec(p),
            Self::GameStateUpdate(p) => serde_json::to_vec(p),
            Self::InvalidMove(p) => serde_json::to_vec(p),
            Self::GameOver(p) => serde_json::to_vec(p),
            Self::DrawOfferReceived(p) => serde_json::to_vec(p),
            Self::DrawOfferDeclined(p) => serde_json::to_vec(p),
            Self::ChallengeReceived(p) => serde_json::to_vec(p),
            Self::ChallengeAccepted(p) => serde_json::to_vec(p),
            Self::ChallengeDeclined(p) => serde_json::to_vec(p),
            Self::StatsResponse(p) => serde_json::to_vec(p),
            Self::HistoryResponse(p) => serde_json::to_vec(p),
            Self::Error(p) => serde_json::to_vec(p),
        }
    }

    /// Encodes the message as a complete wire frame.
    pub fn to_frame(&self) -> Result<Vec<u8>, EncodeError> {
        let payload = self.payload()?;
        Ok(frame::encode_frame(self.id().as_u16(), &payload)?)
    }

    /// Shorthand for the generic error reply.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Error(ErrorReply {
            code,
            message: message.into(),
        })
    }
}

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("payload serialization failed: {0}")]
    Payload(#[from] serde_json::Error),

    #[error(transparent)]
    Frame(#[from] FrameError),
}
