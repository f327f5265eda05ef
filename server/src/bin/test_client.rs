//! Smoke-test client for the chess server
//!
//! Connects to a running server, registers and logs in a throwaway user,
//! starts a game against the easy AI and plays random legal moves until the
//! game ends. Useful for poking at a live server without the desktop app:
//!
//! ```bash
//! cargo run --bin test_client -- 127.0.0.1:8765
//! ```

use std::env;

use rand::seq::SliceRandom;
use rand::RngCore;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use server::chess::ChessPosition;
use shared::frame::encode_frame;
use shared::message::MessageId;

async fn send(stream: &mut TcpStream, id: MessageId, payload: Value) -> std::io::Result<()> {
    let bytes = serde_json::to_vec(&payload).expect("payload serializes");
    let frame = encode_frame(id.as_u16(), &bytes).expect("payload fits a frame");
    stream.write_all(&frame).await
}

async fn recv(stream: &mut TcpStream) -> std::io::Result<(u16, Value)> {
    let mut header = [0u8; 6];
    stream.read_exact(&mut header).await?;
    let id = u16::from_be_bytes([header[0], header[1]]);
    let len = u32::from_be_bytes([header[2], header[3], header[4], header[5]]) as usize;

    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    let value = serde_json::from_slice(&payload).unwrap_or(Value::Null);
    Ok((id, value))
}

async fn recv_until(stream: &mut TcpStream, wanted: MessageId) -> std::io::Result<Value> {
    loop {
        let (id, payload) = recv(stream).await?;
        match MessageId::from_u16(id) {
            Some(known) => {
                println!("<- {known:?}: {payload}");
                if known == wanted {
                    return Ok(payload);
                }
            }
            None => println!("<- unknown message {id:#06x}"),
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let addr = env::args()
        .nth(1)
        .unwrap_or_else(|| "127.0.0.1:8765".to_string());
    let mut stream = TcpStream::connect(&addr).await?;
    println!("connected to {addr}");

    let mut suffix = [0u8; 4];
    rand::thread_rng().fill_bytes(&mut suffix);
    let username = format!("smoke_{:08x}", u32::from_be_bytes(suffix));

    send(
        &mut stream,
        MessageId::Register,
        json!({ "username": username, "password": "smoke-test" }),
    )
    .await?;
    recv_until(&mut stream, MessageId::RegisterResult).await?;

    send(
        &mut stream,
        MessageId::Login,
        json!({ "username": username, "password": "smoke-test" }),
    )
    .await?;
    let login = recv_until(&mut stream, MessageId::LoginResult).await?;
    if login["success"] != true {
        return Err("login failed".into());
    }

    send(
        &mut stream,
        MessageId::FindAiMatch,
        json!({ "difficulty": "easy" }),
    )
    .await?;
    let start = recv_until(&mut stream, MessageId::GameStart).await?;
    let game_id = start["game_id"].as_str().unwrap_or_default().to_string();

    let mut position = ChessPosition::new();
    loop {
        let moves = position.legal_uci_moves();
        let Some(uci) = moves.choose(&mut rand::thread_rng()).cloned() else {
            break;
        };

        println!("-> MakeMove {uci}");
        send(
            &mut stream,
            MessageId::MakeMove,
            json!({ "game_id": game_id, "move": uci }),
        )
        .await?;

        // Our own echo, then the AI reply (or a game end).
        loop {
            let (id, payload) = recv(&mut stream).await?;
            match MessageId::from_u16(id) {
                Some(MessageId::GameStateUpdate) => {
                    println!("<- GameStateUpdate: {payload}");
                    let fen = payload["fen"].as_str().unwrap_or_default();
                    position = ChessPosition::from_fen(fen)?;
                    if payload["turn"] == "white" {
                        break;
                    }
                }
                Some(MessageId::GameOver) => {
                    println!("<- GameOver: {payload}");
                    return Ok(());
                }
                Some(MessageId::InvalidMove) => {
                    println!("<- InvalidMove: {payload}");
                    break;
                }
                Some(other) => println!("<- {other:?}: {payload}"),
                None => println!("<- unknown message {id:#06x}"),
            }
        }
    }

    Ok(())
}
