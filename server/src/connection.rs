//! Per-connection I/O task
//!
//! One task per accepted socket. Inbound bytes feed the frame decoder and
//! complete frames are forwarded to the coordinator; outbound frames arrive
//! pre-encoded on a bounded queue. The task ends when the peer goes away,
//! a framing violation occurs, or the coordinator drops the queue sender.

use std::fmt;

use log::debug;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;

use shared::frame::{FrameDecoder, FrameError};

use crate::server::ServerEvent;
use crate::session::SessionId;

/// Outbound frames queued per session before the slow-consumer policy kicks
/// in. Chess traffic is sparse; a healthy client never gets close.
pub const SEND_QUEUE_LIMIT: usize = 64;

const READ_CHUNK: usize = 4096;

/// Why a connection task ended.
#[derive(Debug)]
pub enum CloseReason {
    /// Clean EOF on a frame boundary.
    PeerClosed,
    /// EOF in the middle of a frame.
    TruncatedFrame,
    /// Read or write failed.
    SocketError(std::io::Error),
    /// The coordinator dropped the session.
    ServerClosed,
    /// Fatal framing violation.
    Protocol(FrameError),
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::PeerClosed => write!(f, "peer closed the connection"),
            Self::TruncatedFrame => write!(f, "connection closed mid-frame"),
            Self::SocketError(e) => write!(f, "socket error: {e}"),
            Self::ServerClosed => write!(f, "closed by server"),
            Self::Protocol(e) => write!(f, "protocol error: {e}"),
        }
    }
}

/// Drives one connection until it closes, then reports the close upstream.
pub async fn run(
    mut stream: TcpStream,
    session_id: SessionId,
    events: mpsc::UnboundedSender<ServerEvent>,
    mut outbound: mpsc::Receiver<Vec<u8>>,
) {
    let mut decoder = FrameDecoder::new();
    let mut buf = vec![0u8; READ_CHUNK];

    let reason = loop {
        tokio::select! {
            queued = outbound.recv() => match queued {
                Some(frame) => {
                    if let Err(e) = stream.write_all(&frame).await {
                        break CloseReason::SocketError(e);
                    }
                }
                None => break CloseReason::ServerClosed,
            },

            read = stream.read(&mut buf) => match read {
                Ok(0) => {
                    break if decoder.is_empty() {
                        CloseReason::PeerClosed
                    } else {
                        CloseReason::TruncatedFrame
                    };
                }
                Ok(n) => {
                    if let Err(e) = drain_frames(&mut decoder, &buf[..n], session_id, &events) {
                        break CloseReason::Protocol(e);
                    }
                }
                Err(e) => break CloseReason::SocketError(e),
            },
        }
    };

    debug!("session {session_id}: connection task ending ({reason})");
    let _ = events.send(ServerEvent::Closed { session_id, reason });
}

fn drain_frames(
    decoder: &mut FrameDecoder,
    bytes: &[u8],
    session_id: SessionId,
    events: &mpsc::UnboundedSender<ServerEvent>,
) -> Result<(), FrameError> {
    decoder.extend(bytes)?;
    while let Some((message_id, payload)) = decoder.next_frame()? {
        let _ = events.send(ServerEvent::Frame {
            session_id,
            message_id,
            payload,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::frame::encode_frame;
    use tokio::net::TcpListener;

    async fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        (client, server_side)
    }

    #[tokio::test]
    async fn test_frames_become_events() {
        let (mut client, server_side) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = mpsc::channel(4);

        tokio::spawn(run(server_side, 7, events_tx, outbound_rx));

        client
            .write_all(&encode_frame(0x0010, b"{}").unwrap())
            .await
            .unwrap();

        match events_rx.recv().await.unwrap() {
            ServerEvent::Frame {
                session_id,
                message_id,
                payload,
            } => {
                assert_eq!(session_id, 7);
                assert_eq!(message_id, 0x0010);
                assert_eq!(payload, b"{}");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_clean_eof_reports_peer_closed() {
        let (client, server_side) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = mpsc::channel(4);

        tokio::spawn(run(server_side, 3, events_tx, outbound_rx));
        drop(client);

        match events_rx.recv().await.unwrap() {
            ServerEvent::Closed { session_id, reason } => {
                assert_eq!(session_id, 3);
                assert!(matches!(reason, CloseReason::PeerClosed));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_truncated_frame_is_reported() {
        let (mut client, server_side) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = mpsc::channel(4);

        tokio::spawn(run(server_side, 4, events_tx, outbound_rx));

        let frame = encode_frame(0x0001, br#"{"username":"a","password":"b"}"#).unwrap();
        client.write_all(&frame[..frame.len() - 3]).await.unwrap();
        drop(client);

        match events_rx.recv().await.unwrap() {
            ServerEvent::Closed { reason, .. } => {
                assert!(matches!(reason, CloseReason::TruncatedFrame));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_frame_is_fatal() {
        let (mut client, server_side) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (_outbound_tx, outbound_rx) = mpsc::channel(4);

        tokio::spawn(run(server_side, 5, events_tx, outbound_rx));

        let mut header = Vec::new();
        header.extend_from_slice(&0x0020u16.to_be_bytes());
        header.extend_from_slice(&u32::MAX.to_be_bytes());
        client.write_all(&header).await.unwrap();

        match events_rx.recv().await.unwrap() {
            ServerEvent::Closed { reason, .. } => {
                assert!(matches!(
                    reason,
                    CloseReason::Protocol(FrameError::Oversized(_))
                ));
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_outbound_frames_reach_the_peer() {
        let (mut client, server_side) = socket_pair().await;
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel(4);

        tokio::spawn(run(server_side, 6, events_tx, outbound_rx));

        let frame = encode_frame(0x1002, br#"{"success":true}"#).unwrap();
        outbound_tx.send(frame.clone()).await.unwrap();

        let mut received = vec![0u8; frame.len()];
        client.read_exact(&mut received).await.unwrap();
        assert_eq!(received, frame);
    }

    #[tokio::test]
    async fn test_dropping_the_queue_closes_the_connection() {
        let (mut client, server_side) = socket_pair().await;
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        let (outbound_tx, outbound_rx) = mpsc::channel::<Vec<u8>>(4);

        tokio::spawn(run(server_side, 8, events_tx, outbound_rx));
        drop(outbound_tx);

        match events_rx.recv().await.unwrap() {
            ServerEvent::Closed { reason, .. } => {
                assert!(matches!(reason, CloseReason::ServerClosed));
            }
            other => panic!("unexpected event: {other:?}"),
        }

        // The socket is gone from the client's point of view as well.
        let n = client.read(&mut [0u8; 8]).await.unwrap();
        assert_eq!(n, 0);
    }
}
