//! STOMP 1.2 text frames.
//!
//! A `Frame` is the transport-layer unit carried in one WebSocket text
//! message:
//!
//! ```text
//! COMMAND EOL
//! *( header EOL )
//! EOL
//! *OCTET NUL
//! *( EOL )
//! ```
//!
//! This is a pure data holder (command + headers + body). For validated
//! semantics see [`crate::ServerFrame`] and [`crate::ClientFrame`].

use std::fmt;

use crate::errors::{ProtocolError, Result};

/// Largest frame (in bytes) accepted by [`Frame::decode`].
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// STOMP commands understood by this client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Client handshake.
    Connect,
    /// Alternative client handshake command (STOMP 1.2).
    Stomp,
    /// Server handshake acknowledgement.
    Connected,
    /// Client publish.
    Send,
    /// Client subscription request.
    Subscribe,
    /// Client subscription removal.
    Unsubscribe,
    /// Graceful client shutdown.
    Disconnect,
    /// Server delivery on a subscription.
    Message,
    /// Server acknowledgement of a `receipt` header.
    Receipt,
    /// Server-reported failure.
    Error,
}

impl Command {
    /// Wire spelling of the command.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connect => "CONNECT",
            Self::Stomp => "STOMP",
            Self::Connected => "CONNECTED",
            Self::Send => "SEND",
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::Disconnect => "DISCONNECT",
            Self::Message => "MESSAGE",
            Self::Receipt => "RECEIPT",
            Self::Error => "ERROR",
        }
    }

    /// Parse a command line.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::UnknownCommand` for anything not listed in [`Command`]
    pub fn parse(line: &str) -> Result<Self> {
        match line {
            "CONNECT" => Ok(Self::Connect),
            "STOMP" => Ok(Self::Stomp),
            "CONNECTED" => Ok(Self::Connected),
            "SEND" => Ok(Self::Send),
            "SUBSCRIBE" => Ok(Self::Subscribe),
            "UNSUBSCRIBE" => Ok(Self::Unsubscribe),
            "DISCONNECT" => Ok(Self::Disconnect),
            "MESSAGE" => Ok(Self::Message),
            "RECEIPT" => Ok(Self::Receipt),
            "ERROR" => Ok(Self::Error),
            other => Err(ProtocolError::UnknownCommand(other.to_string())),
        }
    }

    /// Header values are escaped in every frame except the handshake pair.
    fn escapes_headers(self) -> bool {
        !matches!(self, Self::Connect | Self::Stomp | Self::Connected)
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered frame headers.
///
/// Repeated names are kept in arrival order; lookups return the first
/// occurrence, which is the one STOMP 1.2 says wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers(Vec<(String, String)>);

impl Headers {
    /// Empty header list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a header.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    /// First value for `name`, if present.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, v)| v.as_str())
    }

    /// Iterate headers in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Number of header lines.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True if there are no headers.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single STOMP frame.
///
/// # Invariants
///
/// - `body` never contains the NUL terminator itself. A body with an embedded
///   NUL must be sent with a `content-length` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Frame command.
    pub command: Command,
    /// Header lines (unescaped).
    pub headers: Headers,
    /// Body text.
    pub body: String,
}

impl Frame {
    /// Frame with no headers and an empty body.
    pub fn new(command: Command) -> Self {
        Self { command, headers: Headers::new(), body: String::new() }
    }

    /// Builder-style header append.
    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name, value);
        self
    }

    /// Builder-style body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }

    /// First value of header `name`.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Encode into wire text, including the NUL terminator.
    pub fn encode(&self) -> String {
        let escape = self.command.escapes_headers();
        let mut out = String::with_capacity(self.body.len() + 64);

        out.push_str(self.command.as_str());
        out.push('\n');
        for (name, value) in self.headers.iter() {
            if escape {
                push_escaped(&mut out, name);
                out.push(':');
                push_escaped(&mut out, value);
            } else {
                out.push_str(name);
                out.push(':');
                out.push_str(value);
            }
            out.push('\n');
        }
        out.push('\n');
        out.push_str(&self.body);
        out.push('\0');
        out
    }

    /// Decode one frame from wire text.
    ///
    /// Leading EOLs (heart-beats that share a message with a frame) are
    /// skipped. Trailing EOLs after the NUL are accepted.
    ///
    /// # Errors
    ///
    /// - `ProtocolError::FrameTooLarge` if `input` exceeds [`MAX_FRAME_SIZE`]
    /// - `ProtocolError::EmptyFrame` if `input` holds nothing but EOLs
    /// - `ProtocolError::UnknownCommand`, `MalformedHeader`, `InvalidHeader`
    ///   for a bad command line or header block
    /// - `ProtocolError::MissingNul`, `ContentLengthMismatch`, `TrailingData`
    ///   for a badly delimited body
    pub fn decode(input: &str) -> Result<Self> {
        if input.len() > MAX_FRAME_SIZE {
            return Err(ProtocolError::FrameTooLarge { size: input.len(), max: MAX_FRAME_SIZE });
        }

        let input = input.trim_start_matches(['\r', '\n']);
        if input.is_empty() {
            return Err(ProtocolError::EmptyFrame);
        }

        let (command_line, mut rest) = split_line(input).ok_or(ProtocolError::MissingNul)?;
        let command = Command::parse(command_line)?;
        let escaped = command.escapes_headers();

        let mut headers = Headers::new();
        loop {
            let (line, next) = split_line(rest).ok_or(ProtocolError::MissingNul)?;
            rest = next;
            if line.is_empty() {
                break;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| ProtocolError::MalformedHeader(line.to_string()))?;

            if escaped {
                headers.insert(unescape(name, line)?, unescape(value, line)?);
            } else {
                headers.insert(name, value);
            }
        }

        let body = match headers.get("content-length") {
            Some(raw) => {
                let declared: usize = raw.trim().parse().map_err(|_| {
                    ProtocolError::InvalidHeader { header: "content-length", value: raw.to_string() }
                })?;
                let body = rest
                    .get(..declared)
                    .ok_or(ProtocolError::ContentLengthMismatch { declared })?;
                let after = rest
                    .get(declared..)
                    .and_then(|tail| tail.strip_prefix('\0'))
                    .ok_or(ProtocolError::ContentLengthMismatch { declared })?;
                rest = after;
                body
            },
            None => {
                let (body, after) = rest.split_once('\0').ok_or(ProtocolError::MissingNul)?;
                rest = after;
                body
            },
        };

        if !rest.chars().all(|c| c == '\n' || c == '\r') {
            return Err(ProtocolError::TrailingData);
        }

        Ok(Self { command, headers, body: body.to_string() })
    }
}

/// True if `input` is a bare heart-beat (one or more EOLs, nothing else).
pub fn is_heartbeat(input: &str) -> bool {
    !input.is_empty() && input.chars().all(|c| c == '\n' || c == '\r')
}

/// Split off one line, tolerating CRLF. `None` if no EOL remains.
fn split_line(input: &str) -> Option<(&str, &str)> {
    let (line, rest) = input.split_once('\n')?;
    Some((line.strip_suffix('\r').unwrap_or(line), rest))
}

fn push_escaped(out: &mut String, raw: &str) {
    for c in raw.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            ':' => out.push_str("\\c"),
            other => out.push(other),
        }
    }
}

/// Undo header escaping. Undefined escape sequences are a protocol error.
fn unescape(raw: &str, line: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('\\') => out.push('\\'),
            Some('r') => out.push('\r'),
            Some('n') => out.push('\n'),
            Some('c') => out.push(':'),
            _ => return Err(ProtocolError::MalformedHeader(line.to_string())),
        }
    }
    Ok(out)
}
