//! # Shared Wire Protocol
//!
//! This crate contains everything a client and the server must agree on to
//! talk to each other: the binary frame layout and the typed message
//! catalogue carried inside those frames.
//!
//! ## Framing
//!
//! Every unit on the wire is a frame: a fixed 6-byte header followed by the
//! payload. The header holds the message id (`u16`) and the payload length
//! (`u32`), both big-endian. Payloads are UTF-8 JSON objects.
//!
//! ## Messages
//!
//! [`message::MessageId`] enumerates every known id. Client-to-server ids
//! live in the `0x0000` range, server-to-client ids in the `0x1000` range.
//! Each id has a typed payload struct; [`message::ClientMessage::decode`]
//! turns a raw `(id, bytes)` pair into a typed request, and
//! [`message::ServerMessage::to_frame`] produces ready-to-send bytes for a
//! reply or push.

pub mod frame;
pub mod message;

pub use frame::{encode_frame, FrameDecoder, FrameError};
pub use message::{ClientMessage, MessageId, ServerMessage};
