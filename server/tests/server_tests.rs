//! End-to-end tests for the chess server
//!
//! Each test boots a server on an ephemeral port with the in-memory
//! repository and drives it through real TCP connections speaking the
//! framed protocol, exactly as a desktop client would.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::timeout;

use server::config::ServerConfig;
use server::repository::MemoryRepository;
use server::server::Server;
use shared::frame::encode_frame;
use shared::message::MessageId;

const RECV_TIMEOUT: Duration = Duration::from_secs(5);
const SILENCE_WINDOW: Duration = Duration::from_millis(300);

const INITIAL_FEN: &str = "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1";

async fn start_server() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let config = ServerConfig {
        // Minimum bcrypt cost keeps the tests fast.
        password_hash_cost: 4,
        ..ServerConfig::default()
    };
    let mut server = Server::new(config, Arc::new(MemoryRepository::new()));
    tokio::spawn(async move {
        let _ = server.run_with(listener).await;
    });
    addr
}

struct Client {
    stream: TcpStream,
    username: String,
    user_id: String,
}

impl Client {
    async fn connect(addr: SocketAddr) -> Self {
        Self {
            stream: TcpStream::connect(addr).await.unwrap(),
            username: String::new(),
            user_id: String::new(),
        }
    }

    /// Registers and logs in a fresh user.
    async fn login(addr: SocketAddr, username: &str) -> Self {
        let mut client = Self::connect(addr).await;
        client
            .send(
                MessageId::Register,
                json!({ "username": username, "password": "secret" }),
            )
            .await;
        let reply = client.recv_until(MessageId::RegisterResult).await;
        assert_eq!(reply["success"], true, "register failed: {reply}");

        client
            .send(
                MessageId::Login,
                json!({ "username": username, "password": "secret" }),
            )
            .await;
        let reply = client.recv_until(MessageId::LoginResult).await;
        assert_eq!(reply["success"], true, "login failed: {reply}");

        client.username = username.to_string();
        client.user_id = reply["user_id"].as_str().unwrap().to_string();
        client
    }

    async fn send(&mut self, id: MessageId, payload: Value) {
        self.send_raw(id.as_u16(), payload).await;
    }

    async fn send_raw(&mut self, id: u16, payload: Value) {
        let bytes = serde_json::to_vec(&payload).unwrap();
        let frame = encode_frame(id, &bytes).unwrap();
        self.stream.write_all(&frame).await.unwrap();
    }

    async fn recv(&mut self) -> (u16, Value) {
        let frame = timeout(RECV_TIMEOUT, self.read_frame())
            .await
            .expect("timed out waiting for a frame");
        frame
    }

    async fn read_frame(&mut self) -> (u16, Value) {
        let mut header = [0u8; 6];
        self.stream.read_exact(&mut header).await.unwrap();
        let id = u16::from_be_bytes([header[0], header[1]]);
        let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

        let mut payload = vec![0u8; len];
        self.stream.read_exact(&mut payload).await.unwrap();
        let value = if payload.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&payload).unwrap()
        };
        (id, value)
    }

    /// Receives frames until one with the wanted id arrives, skipping
    /// unrelated pushes such as presence broadcasts.
    async fn recv_until(&mut self, wanted: MessageId) -> Value {
        loop {
            let (id, payload) = self.recv().await;
            if id == wanted.as_u16() {
                return payload;
            }
        }
    }

    /// Asserts that no frame with the given id arrives within the silence
    /// window.
    async fn expect_silence_of(&mut self, unwanted: MessageId) {
        let deadline = tokio::time::Instant::now() + SILENCE_WINDOW;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return;
            }
            match timeout(remaining, self.read_frame()).await {
                Ok((id, payload)) => {
                    assert_ne!(
                        id,
                        unwanted.as_u16(),
                        "unexpected {unwanted:?} frame: {payload}"
                    );
                }
                Err(_) => return,
            }
        }
    }

    async fn stats(&mut self) -> Value {
        self.send(MessageId::GetStats, json!({})).await;
        self.recv_until(MessageId::StatsResponse).await
    }
}

/// Logs in alice and bob, queues both and returns `(white, black, game_id)`.
async fn start_match(addr: SocketAddr) -> (Client, Client, String) {
    let mut a = Client::login(addr, "alice").await;
    let mut b = Client::login(addr, "bob").await;

    a.send(MessageId::FindMatch, json!({})).await;
    // A joins the queue first and therefore takes white.
    tokio::time::sleep(Duration::from_millis(50)).await;
    b.send(MessageId::FindMatch, json!({})).await;

    let match_a = a.recv_until(MessageId::MatchFound).await;
    let match_b = b.recv_until(MessageId::MatchFound).await;
    assert_eq!(match_a["opponent"]["username"], "bob");
    assert_eq!(match_b["opponent"]["username"], "alice");

    let start_a = a.recv_until(MessageId::GameStart).await;
    let start_b = b.recv_until(MessageId::GameStart).await;
    assert_ne!(start_a["color"], start_b["color"]);
    assert_eq!(start_a["fen"], INITIAL_FEN);
    assert_eq!(start_a["game_id"], start_b["game_id"]);

    let game_id = start_a["game_id"].as_str().unwrap().to_string();
    if start_a["color"] == "white" {
        (a, b, game_id)
    } else {
        (b, a, game_id)
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_register_login_roundtrip() {
    let addr = start_server().await;
    let client = Client::login(addr, "alice").await;
    assert!(!client.user_id.is_empty());
}

#[tokio::test]
async fn test_duplicate_registration_fails() {
    let addr = start_server().await;
    let _alice = Client::login(addr, "alice").await;

    let mut other = Client::connect(addr).await;
    other
        .send(
            MessageId::Register,
            json!({ "username": "alice", "password": "other" }),
        )
        .await;
    let reply = other.recv_until(MessageId::RegisterResult).await;
    assert_eq!(reply["success"], false);
    assert!(reply["error"].as_str().unwrap().contains("taken"));
}

#[tokio::test]
async fn test_login_failures_are_generic() {
    let addr = start_server().await;
    let _alice = Client::login(addr, "alice").await;

    // Wrong password and unknown user must be indistinguishable.
    let mut c1 = Client::connect(addr).await;
    c1.send(
        MessageId::Login,
        json!({ "username": "alice", "password": "wrong" }),
    )
    .await;
    let wrong_pw = c1.recv_until(MessageId::LoginResult).await;

    let mut c2 = Client::connect(addr).await;
    c2.send(
        MessageId::Login,
        json!({ "username": "nobody", "password": "secret" }),
    )
    .await;
    let unknown = c2.recv_until(MessageId::LoginResult).await;

    assert_eq!(wrong_pw["success"], false);
    assert_eq!(unknown["success"], false);
    assert_eq!(wrong_pw["error"], unknown["error"]);
    assert!(wrong_pw.get("user_id").is_none());
}

#[tokio::test]
async fn test_second_login_for_same_account_rejected() {
    let addr = start_server().await;
    let _alice = Client::login(addr, "alice").await;

    let mut other = Client::connect(addr).await;
    other
        .send(
            MessageId::Login,
            json!({ "username": "alice", "password": "secret" }),
        )
        .await;
    let reply = other.recv_until(MessageId::LoginResult).await;
    assert_eq!(reply["success"], false);
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_invalid_state_rejected() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    // FIND_MATCH before login.
    client.send(MessageId::FindMatch, json!({})).await;
    let reply = client.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "invalid_state");

    // The session survives and can still register.
    client
        .send(
            MessageId::Register,
            json!({ "username": "late", "password": "secret" }),
        )
        .await;
    let reply = client.recv_until(MessageId::RegisterResult).await;
    assert_eq!(reply["success"], true);
}

#[tokio::test]
async fn test_malformed_payload_keeps_session() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    // Valid frame, garbage payload for LOGIN.
    let frame = encode_frame(MessageId::Login.as_u16(), b"{\"username\": ").unwrap();
    client.stream.write_all(&frame).await.unwrap();
    let reply = client.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "bad_request");

    client
        .send(
            MessageId::Register,
            json!({ "username": "still_here", "password": "secret" }),
        )
        .await;
    let reply = client.recv_until(MessageId::RegisterResult).await;
    assert_eq!(reply["success"], true);
}

#[tokio::test]
async fn test_unknown_message_id_is_ignored() {
    let addr = start_server().await;
    let mut client = Client::connect(addr).await;

    client.send_raw(0x0999, json!({ "whatever": 1 })).await;
    client.expect_silence_of(MessageId::Error).await;

    client
        .send(
            MessageId::Register,
            json!({ "username": "alice", "password": "secret" }),
        )
        .await;
    let reply = client.recv_until(MessageId::RegisterResult).await;
    assert_eq!(reply["success"], true);
}

// ---------------------------------------------------------------------------
// Matchmaking
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_s1_pairing_and_first_move() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": "e2e4" }),
        )
        .await;

    for client in [&mut white, &mut black] {
        let update = client.recv_until(MessageId::GameStateUpdate).await;
        assert_eq!(update["game_id"].as_str().unwrap(), game_id);
        assert!(update["fen"]
            .as_str()
            .unwrap()
            .starts_with("rnbqkbnr/pppppppp/8/8/4P3/8/PPPP1PPP/RNBQKBNR b"));
        assert_eq!(update["last_move"], "e2e4");
        assert_eq!(update["turn"], "black");
    }
}

#[tokio::test]
async fn test_queue_twice_is_rejected() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;

    alice.send(MessageId::FindMatch, json!({})).await;
    alice.send(MessageId::FindMatch, json!({})).await;

    let reply = alice.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "domain");
}

#[tokio::test]
async fn test_cancel_find_match() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;

    alice.send(MessageId::FindMatch, json!({})).await;
    alice.send(MessageId::CancelFindMatch, json!({})).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    bob.send(MessageId::FindMatch, json!({})).await;
    bob.expect_silence_of(MessageId::MatchFound).await;
}

// ---------------------------------------------------------------------------
// Gameplay scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_s2_fools_mate_checkmate_and_ratings() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    for (is_white, uci) in [
        (true, "f2f3"),
        (false, "e7e5"),
        (true, "g2g4"),
        (false, "d8h4"),
    ] {
        let mover = if is_white { &mut white } else { &mut black };
        mover
            .send(
                MessageId::MakeMove,
                json!({ "game_id": game_id, "move": uci }),
            )
            .await;
        // Wait for the echo so moves stay ordered.
        mover.recv_until(MessageId::GameStateUpdate).await;
    }

    for client in [&mut white, &mut black] {
        let over = client.recv_until(MessageId::GameOver).await;
        assert_eq!(over["game_id"].as_str().unwrap(), game_id);
        assert_eq!(over["result"], "black_win");
        assert_eq!(over["cause"], "checkmate");
    }

    let white_stats = white.stats().await;
    let black_stats = black.stats().await;
    let white_rating = white_stats["rating"].as_i64().unwrap();
    let black_rating = black_stats["rating"].as_i64().unwrap();

    assert!(white_rating < 1200);
    assert!(black_rating > 1200);
    assert_eq!((white_rating - 1200) + (black_rating - 1200), 0);
    assert_eq!(white_stats["losses"], 1);
    assert_eq!(black_stats["wins"], 1);

    // Both sessions are back in the lobby: queueing again is allowed.
    white.send(MessageId::FindMatch, json!({})).await;
    white.expect_silence_of(MessageId::Error).await;
}

#[tokio::test]
async fn test_s3_resignation() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(MessageId::Resign, json!({ "game_id": game_id }))
        .await;

    for client in [&mut white, &mut black] {
        let over = client.recv_until(MessageId::GameOver).await;
        assert_eq!(over["result"], "black_win");
        assert_eq!(over["cause"], "resignation");
    }

    assert_eq!(white.stats().await["losses"], 1);
    assert_eq!(black.stats().await["wins"], 1);
}

#[tokio::test]
async fn test_s4_illegal_move() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": "e2e5" }),
        )
        .await;

    let reply = white.recv_until(MessageId::InvalidMove).await;
    assert_eq!(reply["reason"], "illegal move");

    // No state update reaches either player; the position is unchanged.
    black.expect_silence_of(MessageId::GameStateUpdate).await;
    white
        .send(
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": "e2e4" }),
        )
        .await;
    let update = white.recv_until(MessageId::GameStateUpdate).await;
    assert!(update["fen"].as_str().unwrap().contains("4P3"));
}

#[tokio::test]
async fn test_s5_out_of_turn() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    black
        .send(
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": "e7e5" }),
        )
        .await;

    let reply = black.recv_until(MessageId::InvalidMove).await;
    assert_eq!(reply["reason"], "not your turn");
    white.expect_silence_of(MessageId::GameStateUpdate).await;
}

#[tokio::test]
async fn test_s6_draw_by_agreement() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(MessageId::OfferDraw, json!({ "game_id": game_id }))
        .await;
    let received = black.recv_until(MessageId::DrawOfferReceived).await;
    assert_eq!(received["game_id"].as_str().unwrap(), game_id);

    // Counter-offer from the other color is an implicit accept.
    black
        .send(MessageId::OfferDraw, json!({ "game_id": game_id }))
        .await;

    for client in [&mut white, &mut black] {
        let over = client.recv_until(MessageId::GameOver).await;
        assert_eq!(over["result"], "draw");
        assert_eq!(over["cause"], "agreement");
    }

    // Equal ratings: K*(0.5 - 0.5) moves nobody; the draw is counted.
    let stats = white.stats().await;
    assert_eq!(stats["rating"], 1200);
    assert_eq!(stats["draws"], 1);
}

#[tokio::test]
async fn test_double_draw_offer_is_noop() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(MessageId::OfferDraw, json!({ "game_id": game_id }))
        .await;
    black.recv_until(MessageId::DrawOfferReceived).await;

    white
        .send(MessageId::OfferDraw, json!({ "game_id": game_id }))
        .await;
    black.expect_silence_of(MessageId::DrawOfferReceived).await;
}

#[tokio::test]
async fn test_decline_draw_then_accept_is_error() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(MessageId::OfferDraw, json!({ "game_id": game_id }))
        .await;
    black.recv_until(MessageId::DrawOfferReceived).await;

    black
        .send(MessageId::DeclineDraw, json!({ "game_id": game_id }))
        .await;
    // Both sides hear about the decline.
    white.recv_until(MessageId::DrawOfferDeclined).await;
    black.recv_until(MessageId::DrawOfferDeclined).await;

    // The offer is gone, so accepting now is a domain error.
    black
        .send(MessageId::AcceptDraw, json!({ "game_id": game_id }))
        .await;
    let reply = black.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "domain");
}

#[tokio::test]
async fn test_disconnect_forfeits_the_game() {
    let addr = start_server().await;
    let (mut white, black, _game_id) = start_match(addr).await;

    drop(black);

    let over = white.recv_until(MessageId::GameOver).await;
    assert_eq!(over["result"], "white_win");
    assert_eq!(over["cause"], "abandonment");

    assert_eq!(white.stats().await["wins"], 1);
}

// ---------------------------------------------------------------------------
// Challenges
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_challenge_accept_starts_game() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;

    alice
        .send(
            MessageId::Challenge,
            json!({ "target_user_id": bob.user_id }),
        )
        .await;
    let received = bob.recv_until(MessageId::ChallengeReceived).await;
    assert_eq!(received["sender"]["username"], "alice");

    bob.send(
        MessageId::AcceptChallenge,
        json!({ "challenger_user_id": alice.user_id }),
    )
    .await;

    let accepted = alice.recv_until(MessageId::ChallengeAccepted).await;
    assert_eq!(accepted["user_id"].as_str().unwrap(), bob.user_id);

    // The challenger takes white.
    let start_a = alice.recv_until(MessageId::GameStart).await;
    let start_b = bob.recv_until(MessageId::GameStart).await;
    assert_eq!(start_a["color"], "white");
    assert_eq!(start_b["color"], "black");
    assert_eq!(start_a["game_id"], start_b["game_id"]);
}

#[tokio::test]
async fn test_self_challenge_rejected() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;

    let user_id = alice.user_id.clone();
    alice
        .send(MessageId::Challenge, json!({ "target_user_id": user_id }))
        .await;
    let reply = alice.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "domain");
}

#[tokio::test]
async fn test_duplicate_challenge_rejected() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;
    let mut carol = Client::login(addr, "carol").await;

    alice
        .send(
            MessageId::Challenge,
            json!({ "target_user_id": bob.user_id }),
        )
        .await;
    bob.recv_until(MessageId::ChallengeReceived).await;

    // One outstanding challenge per challenger.
    alice
        .send(
            MessageId::Challenge,
            json!({ "target_user_id": carol.user_id }),
        )
        .await;
    let reply = alice.recv_until(MessageId::Error).await;
    assert_eq!(reply["code"], "domain");
    carol.expect_silence_of(MessageId::ChallengeReceived).await;
}

#[tokio::test]
async fn test_decline_challenge_is_idempotent() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;
    let mut bob = Client::login(addr, "bob").await;

    alice
        .send(
            MessageId::Challenge,
            json!({ "target_user_id": bob.user_id }),
        )
        .await;
    bob.recv_until(MessageId::ChallengeReceived).await;

    bob.send(
        MessageId::DeclineChallenge,
        json!({ "challenger_user_id": alice.user_id }),
    )
    .await;
    let declined = alice.recv_until(MessageId::ChallengeDeclined).await;
    assert_eq!(declined["user_id"].as_str().unwrap(), bob.user_id);

    // A second decline for the same key changes nothing.
    bob.send(
        MessageId::DeclineChallenge,
        json!({ "challenger_user_id": alice.user_id }),
    )
    .await;
    alice.expect_silence_of(MessageId::ChallengeDeclined).await;
}

// ---------------------------------------------------------------------------
// Presence, stats, history
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_presence_excludes_self() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;
    let _bob = Client::login(addr, "bob").await;

    // Wait for a roster that includes bob; it must never include alice.
    loop {
        let list = alice.recv_until(MessageId::OnlineUsersList).await;
        let users = list["users"].as_array().unwrap();
        assert!(users.iter().all(|u| u["username"] != "alice"));
        if users.iter().any(|u| u["username"] == "bob") {
            break;
        }
    }

    // Explicit listing agrees.
    alice.send(MessageId::GetOnlineUsers, json!({})).await;
    let list = alice.recv_until(MessageId::OnlineUsersList).await;
    let users = list["users"].as_array().unwrap();
    assert!(users.iter().any(|u| u["username"] == "bob"));
    assert!(users.iter().all(|u| u["username"] != "alice"));
}

#[tokio::test]
async fn test_history_after_completed_game() {
    let addr = start_server().await;
    let (mut white, mut black, game_id) = start_match(addr).await;

    white
        .send(MessageId::Resign, json!({ "game_id": game_id }))
        .await;
    white.recv_until(MessageId::GameOver).await;
    black.recv_until(MessageId::GameOver).await;

    white.send(MessageId::GetHistory, json!({})).await;
    let history = white.recv_until(MessageId::HistoryResponse).await;
    let games = history["games"].as_array().unwrap();
    assert_eq!(games.len(), 1);
    assert_eq!(games[0]["game_id"].as_str().unwrap(), game_id);
    assert_eq!(games[0]["result"], "black_win");
    assert_eq!(games[0]["user_result"], "loss");
    assert_eq!(games[0]["my_color"], "white");
    assert_eq!(games[0]["opponent"], black.username);
}

// ---------------------------------------------------------------------------
// AI games
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_ai_match_plays_and_stays_unrated() {
    let addr = start_server().await;
    let mut alice = Client::login(addr, "alice").await;

    alice
        .send(MessageId::FindAiMatch, json!({ "difficulty": "easy" }))
        .await;
    let start = alice.recv_until(MessageId::GameStart).await;
    assert_eq!(start["color"], "white");
    assert_eq!(start["opponent"]["user_id"], "ai");
    let game_id = start["game_id"].as_str().unwrap().to_string();

    alice
        .send(
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": "e2e4" }),
        )
        .await;

    // Own move echo, then the AI reply through the same path.
    let own = alice.recv_until(MessageId::GameStateUpdate).await;
    assert_eq!(own["last_move"], "e2e4");
    let reply = alice.recv_until(MessageId::GameStateUpdate).await;
    assert_eq!(reply["turn"], "white");

    alice
        .send(MessageId::Resign, json!({ "game_id": game_id }))
        .await;
    alice.recv_until(MessageId::GameOver).await;

    // AI games count for nothing.
    let stats = alice.stats().await;
    assert_eq!(stats["rating"], 1200);
    assert_eq!(stats["games"], 0);
}
