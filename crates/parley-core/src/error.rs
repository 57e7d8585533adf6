//! Session error taxonomy.
//!
//! Every failure the session can observe is one of these variants. Frame
//! handling never propagates them: they are either folded into the
//! connection state (`Connection`, `Broker`, `Auth`) or recorded as the last
//! error while the session carries on (`Protocol`, `History`).

use parley_proto::ProtocolError;
use thiserror::Error;

use crate::connection::ConnectionState;

/// Errors produced by the session state machines.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// Transport failure (network loss, heart-beat or handshake timeout).
    #[error("connection lost: {0}")]
    Connection(String),

    /// Malformed or unexpected frame. The frame is dropped.
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Broker sent an `ERROR` frame on an established session.
    #[error("broker error: {message}")]
    Broker {
        /// Broker-supplied description.
        message: String,
    },

    /// Credential rejected during the handshake.
    #[error("authentication rejected: {reason}")]
    Auth {
        /// Rejection reason (HTTP status or broker message).
        reason: String,
    },

    /// History snapshot could not be loaded.
    #[error("history load failed: {0}")]
    History(String),

    /// Publish attempted while not connected. Nothing was sent.
    #[error("cannot send while {state}")]
    SendWhileDisconnected {
        /// State at the time of the attempt.
        state: ConnectionState,
    },

    /// Publish attempted with blank content. Nothing was sent.
    #[error("message content is empty")]
    InvalidContent,

    /// Operation not valid in the current state.
    #[error("invalid state transition: cannot {operation} while {state}")]
    InvalidState {
        /// Current state when error occurred.
        state: ConnectionState,
        /// Operation that was attempted.
        operation: &'static str,
    },

    /// Frame not valid in the current state.
    #[error("unexpected {frame} frame while {state}")]
    UnexpectedFrame {
        /// Current state when the frame arrived.
        state: ConnectionState,
        /// Frame name.
        frame: &'static str,
    },
}

impl SessionError {
    /// Returns true if this error may clear on retry without caller action.
    ///
    /// Connection losses are retried by the reconnect policy and history is
    /// reloaded on the next resume. Everything else needs a fresh `open()` or
    /// a different input.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Connection(_) | Self::History(_))
    }

    /// Returns true if this error ends the session.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Broker { .. } | Self::Auth { .. })
    }
}
