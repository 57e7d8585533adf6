//! Protocol errors.
//!
//! Every decode or validation failure at the transport boundary is reported as
//! a [`ProtocolError`]. The session layer drops the offending frame and keeps
//! the connection; none of these are fatal on their own.

use thiserror::Error;

use crate::frame::Command;

/// Result alias for protocol operations.
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors produced while decoding or validating frames.
///
/// Cloneable so that it can be recorded as the session's last error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Input contained no command line.
    #[error("empty frame")]
    EmptyFrame,

    /// Frame exceeds [`crate::MAX_FRAME_SIZE`].
    #[error("frame too large: {size} bytes (max {max})")]
    FrameTooLarge {
        /// Size of the received frame.
        size: usize,
        /// Maximum accepted size.
        max: usize,
    },

    /// Command line is not a known STOMP command.
    #[error("unknown command: {0:?}")]
    UnknownCommand(String),

    /// Header line without a colon or with an invalid escape sequence.
    #[error("malformed header: {0:?}")]
    MalformedHeader(String),

    /// A header required by the command is missing.
    #[error("{command} frame missing required header {header:?}")]
    MissingHeader {
        /// Command of the offending frame.
        command: Command,
        /// Name of the missing header.
        header: &'static str,
    },

    /// Header present but its value cannot be interpreted.
    #[error("invalid {header:?} header: {value:?}")]
    InvalidHeader {
        /// Header name.
        header: &'static str,
        /// Raw value received.
        value: String,
    },

    /// Body is not terminated by a NUL octet.
    #[error("frame body not NUL-terminated")]
    MissingNul,

    /// Declared `content-length` does not match the body.
    #[error("content-length {declared} does not match body")]
    ContentLengthMismatch {
        /// Length declared in the header.
        declared: usize,
    },

    /// Non-EOL data after the terminating NUL.
    #[error("trailing data after frame terminator")]
    TrailingData,

    /// JSON body failed to deserialize into the expected structure.
    #[error("invalid {expected} body: {reason}")]
    InvalidBody {
        /// Structure that was expected.
        expected: &'static str,
        /// Deserializer message.
        reason: String,
    },

    /// Destination does not name a chat room.
    #[error("invalid destination: {0:?}")]
    InvalidDestination(String),

    /// Frame is valid STOMP but not expected in this direction.
    #[error("unexpected {0} frame")]
    UnexpectedCommand(Command),
}
