//! Wire protocol for Parley room chat.
//!
//! The live channel speaks STOMP 1.2 over WebSocket text messages. This crate
//! owns the text codec ([`Frame`]), the strictly validated typed frames the
//! rest of the stack works with ([`ClientFrame`], [`ServerFrame`]), and the
//! JSON payloads carried inside them ([`ChatMessage`], [`PublishBody`],
//! [`HistoryPage`]).
//!
//! # Layering
//!
//! Raw frames are a pure data holder (command, headers, body). Conversion into
//! [`ServerFrame`] is the single validation point: a frame with missing
//! headers or an unparseable body becomes a [`ProtocolError`] here, so nothing
//! past the transport boundary ever handles a dynamically-typed body.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod destination;
pub mod errors;
pub mod frame;
pub mod heartbeat;
pub mod message;
pub mod payloads;

pub use errors::{ProtocolError, Result};
pub use frame::{Command, Frame, Headers, MAX_FRAME_SIZE, is_heartbeat};
pub use heartbeat::{HeartBeat, Negotiated};
pub use message::{ChatMessage, HistoryPage, MessageId, PublishBody, RoomId, UserId};
pub use payloads::{ClientFrame, STOMP_VERSION, ServerFrame};
