//! Typed STOMP frames.
//!
//! [`Frame`] is untyped: any command with any headers. The enums here are the
//! only shapes the rest of the stack handles. Conversion from a raw frame
//! checks required headers and decodes JSON bodies, so a frame either becomes
//! a fully-populated variant or a [`ProtocolError`].
//!
//! # Invariants
//!
//! - Each variant maps to exactly one command (`STOMP` is accepted as an alias
//!   of `CONNECT` when decoding).
//! - `Heartbeat` is not a frame: it encodes to a single EOL and is recognized
//!   before frame decoding.

use serde::de::DeserializeOwned;

use crate::{
    destination,
    errors::{ProtocolError, Result},
    frame::{Command, Frame, is_heartbeat},
    heartbeat::HeartBeat,
    message::{ChatMessage, PublishBody},
};

/// STOMP protocol version spoken by this client.
pub const STOMP_VERSION: &str = "1.2";

const JSON: &str = "application/json";

/// Frames a client sends to the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientFrame {
    /// Open the STOMP session.
    Connect {
        /// Virtual host name.
        host: String,
        /// Full `Authorization` header value (`Bearer <token>`), if any.
        authorization: Option<String>,
        /// Offered heart-beat intervals.
        heart_beat: HeartBeat,
    },
    /// Start receiving a destination.
    Subscribe {
        /// Client-chosen subscription handle.
        id: String,
        /// Topic to subscribe to.
        destination: String,
    },
    /// Stop receiving on a handle.
    Unsubscribe {
        /// Handle given in the matching `Subscribe`.
        id: String,
    },
    /// Publish a chat message.
    Send {
        /// Publish destination.
        destination: String,
        /// JSON body.
        body: PublishBody,
    },
    /// Graceful shutdown, acknowledged by a `RECEIPT`.
    Disconnect {
        /// Receipt id the broker echoes back.
        receipt: String,
    },
    /// Keep-alive EOL.
    Heartbeat,
}

impl ClientFrame {
    /// Raw frame for this variant. `None` for `Heartbeat`, which has no frame
    /// form.
    pub fn to_frame(&self) -> Option<Frame> {
        let frame = match self {
            Self::Connect { host, authorization, heart_beat } => {
                let mut frame = Frame::new(Command::Connect)
                    .with_header("accept-version", STOMP_VERSION)
                    .with_header("host", host.as_str())
                    .with_header("heart-beat", heart_beat.to_string());
                if let Some(value) = authorization {
                    frame = frame.with_header("Authorization", value.as_str());
                }
                frame
            },
            Self::Subscribe { id, destination } => Frame::new(Command::Subscribe)
                .with_header("id", id.as_str())
                .with_header("destination", destination.as_str())
                .with_header("ack", "auto"),
            Self::Unsubscribe { id } => Frame::new(Command::Unsubscribe).with_header("id", id.as_str()),
            Self::Send { destination, body } => {
                json_frame(Command::Send, body).with_header("destination", destination.as_str())
            },
            Self::Disconnect { receipt } => {
                Frame::new(Command::Disconnect).with_header("receipt", receipt.as_str())
            },
            Self::Heartbeat => return None,
        };
        Some(frame)
    }

    /// Wire text for one WebSocket message.
    pub fn encode(&self) -> String {
        self.to_frame().map_or_else(|| "\n".to_string(), |frame| frame.encode())
    }

    /// Decode one WebSocket message sent by a client.
    ///
    /// # Errors
    ///
    /// - Any [`Frame::decode`] error
    /// - `ProtocolError::UnexpectedCommand` for server-only commands
    /// - `ProtocolError::MissingHeader` / `InvalidHeader` / `InvalidBody` /
    ///   `InvalidDestination` for incomplete frames
    pub fn parse(text: &str) -> Result<Self> {
        if is_heartbeat(text) {
            return Ok(Self::Heartbeat);
        }
        Self::try_from(Frame::decode(text)?)
    }
}

impl TryFrom<Frame> for ClientFrame {
    type Error = ProtocolError;

    fn try_from(frame: Frame) -> Result<Self> {
        match frame.command {
            Command::Connect | Command::Stomp => {
                let heart_beat = match frame.header("heart-beat") {
                    Some(raw) => HeartBeat::parse(raw)?,
                    None => HeartBeat::DISABLED,
                };
                let versions = required(&frame, "accept-version")?;
                if !versions.split(',').any(|v| v.trim() == STOMP_VERSION) {
                    return Err(ProtocolError::InvalidHeader {
                        header: "accept-version",
                        value: versions.to_string(),
                    });
                }
                Ok(Self::Connect {
                    host: required(&frame, "host")?.to_string(),
                    authorization: frame
                        .header("Authorization")
                        .or_else(|| frame.header("authorization"))
                        .map(str::to_string),
                    heart_beat,
                })
            },
            Command::Subscribe => {
                let destination = required(&frame, "destination")?;
                if destination::parse_room_topic(destination).is_none() {
                    return Err(ProtocolError::InvalidDestination(destination.to_string()));
                }
                Ok(Self::Subscribe {
                    id: required(&frame, "id")?.to_string(),
                    destination: destination.to_string(),
                })
            },
            Command::Unsubscribe => Ok(Self::Unsubscribe { id: required(&frame, "id")?.to_string() }),
            Command::Send => {
                let destination = required(&frame, "destination")?;
                if destination::parse_publish_destination(destination).is_none() {
                    return Err(ProtocolError::InvalidDestination(destination.to_string()));
                }
                Ok(Self::Send {
                    destination: destination.to_string(),
                    body: json_body(&frame, "PublishBody")?,
                })
            },
            Command::Disconnect => {
                Ok(Self::Disconnect { receipt: required(&frame, "receipt")?.to_string() })
            },
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    }
}

/// Frames the broker sends to a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerFrame {
    /// Handshake accepted.
    Connected {
        /// Negotiated protocol version.
        version: String,
        /// Broker's heart-beat intervals.
        heart_beat: HeartBeat,
    },
    /// Delivery on a subscription.
    Message {
        /// Handle of the subscription this delivery belongs to.
        subscription: String,
        /// Topic the message was published on.
        destination: String,
        /// Broker-assigned delivery id.
        message_id: String,
        /// Persisted chat message.
        message: ChatMessage,
    },
    /// Acknowledgement of a `receipt` header.
    Receipt {
        /// Echoed receipt id.
        receipt_id: String,
    },
    /// Broker-side failure. The broker closes the connection afterwards.
    Error {
        /// Short description from the `message` header.
        message: Option<String>,
        /// Body text.
        detail: String,
    },
    /// Keep-alive EOL.
    Heartbeat,
}

impl ServerFrame {
    /// Short name for logs and errors: the command, or `heart-beat`.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => Command::Connected.as_str(),
            Self::Message { .. } => Command::Message.as_str(),
            Self::Receipt { .. } => Command::Receipt.as_str(),
            Self::Error { .. } => Command::Error.as_str(),
            Self::Heartbeat => "heart-beat",
        }
    }

    /// Decode one WebSocket message received from the broker.
    ///
    /// # Errors
    ///
    /// - Any [`Frame::decode`] error
    /// - `ProtocolError::UnexpectedCommand` for client-only commands
    /// - `ProtocolError::MissingHeader` / `InvalidHeader` / `InvalidBody` /
    ///   `InvalidDestination` for incomplete frames
    pub fn parse(text: &str) -> Result<Self> {
        if is_heartbeat(text) {
            return Ok(Self::Heartbeat);
        }
        Self::try_from(Frame::decode(text)?)
    }

    /// Raw frame for this variant. `None` for `Heartbeat`.
    pub fn to_frame(&self) -> Option<Frame> {
        let frame = match self {
            Self::Connected { version, heart_beat } => Frame::new(Command::Connected)
                .with_header("version", version.as_str())
                .with_header("heart-beat", heart_beat.to_string()),
            Self::Message { subscription, destination, message_id, message } => {
                json_frame(Command::Message, message)
                    .with_header("subscription", subscription.as_str())
                    .with_header("destination", destination.as_str())
                    .with_header("message-id", message_id.as_str())
            },
            Self::Receipt { receipt_id } => {
                Frame::new(Command::Receipt).with_header("receipt-id", receipt_id.as_str())
            },
            Self::Error { message, detail } => {
                let mut frame = Frame::new(Command::Error)
                    .with_header("content-type", "text/plain")
                    .with_header("content-length", detail.len().to_string())
                    .with_body(detail.as_str());
                if let Some(message) = message {
                    frame = frame.with_header("message", message.as_str());
                }
                frame
            },
            Self::Heartbeat => return None,
        };
        Some(frame)
    }

    /// Wire text for one WebSocket message.
    pub fn encode(&self) -> String {
        self.to_frame().map_or_else(|| "\n".to_string(), |frame| frame.encode())
    }
}

impl TryFrom<Frame> for ServerFrame {
    type Error = ProtocolError;

    fn try_from(frame: Frame) -> Result<Self> {
        match frame.command {
            Command::Connected => {
                let heart_beat = match frame.header("heart-beat") {
                    Some(raw) => HeartBeat::parse(raw)?,
                    None => HeartBeat::DISABLED,
                };
                Ok(Self::Connected { version: required(&frame, "version")?.to_string(), heart_beat })
            },
            Command::Message => {
                let destination = required(&frame, "destination")?;
                if destination::parse_room_topic(destination).is_none() {
                    return Err(ProtocolError::InvalidDestination(destination.to_string()));
                }
                Ok(Self::Message {
                    subscription: required(&frame, "subscription")?.to_string(),
                    destination: destination.to_string(),
                    message_id: required(&frame, "message-id")?.to_string(),
                    message: json_body(&frame, "ChatMessage")?,
                })
            },
            Command::Receipt => {
                Ok(Self::Receipt { receipt_id: required(&frame, "receipt-id")?.to_string() })
            },
            Command::Error => Ok(Self::Error {
                message: frame.header("message").map(str::to_string),
                detail: frame.body,
            }),
            other => Err(ProtocolError::UnexpectedCommand(other)),
        }
    }
}

fn required<'a>(frame: &'a Frame, header: &'static str) -> Result<&'a str> {
    frame.header(header).ok_or(ProtocolError::MissingHeader { command: frame.command, header })
}

/// Frame carrying `value` as a JSON body with explicit length.
///
/// Serializing these payload types cannot fail: they hold only strings,
/// integers and timestamps.
fn json_frame<T: serde::Serialize>(command: Command, value: &T) -> Frame {
    let body = serde_json::to_string(value).unwrap_or_default();
    Frame::new(command)
        .with_header("content-type", JSON)
        .with_header("content-length", body.len().to_string())
        .with_body(body)
}

fn json_body<T: DeserializeOwned>(frame: &Frame, expected: &'static str) -> Result<T> {
    serde_json::from_str(&frame.body)
        .map_err(|err| ProtocolError::InvalidBody { expected, reason: err.to_string() })
}
