//! Chat message payloads.
//!
//! [`ChatMessage`] is the unit both the REST history snapshot and live
//! `MESSAGE` frames carry. It is never mutated after creation.

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Room identifier (one listing negotiation).
pub type RoomId = i64;

/// Message identifier, unique within a room.
pub type MessageId = i64;

/// User identifier.
pub type UserId = i64;

/// A persisted chat message.
///
/// # Invariants
///
/// - `id` is unique within `room_id`.
/// - Canonical order is ascending `created_at`, ties broken by `id`
///   (see [`ChatMessage::order_key`]).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatMessage {
    /// Broker-assigned id.
    pub id: MessageId,
    /// Room the message belongs to.
    pub room_id: RoomId,
    /// Sender, `None` for system messages.
    #[serde(default)]
    pub sender_id: Option<UserId>,
    /// Sender display name, if the broker included it.
    #[serde(default)]
    pub sender_nickname: Option<String>,
    /// Message text.
    pub content: String,
    /// Broker-assigned creation time (UTC).
    #[serde(with = "timestamp")]
    pub created_at: NaiveDateTime,
}

impl ChatMessage {
    /// Sort key defining the canonical feed order.
    pub fn order_key(&self) -> (NaiveDateTime, MessageId) {
        (self.created_at, self.id)
    }
}

/// Body of a publish (`SEND`) frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishBody {
    /// Message text.
    pub content: String,
}

/// REST history response.
///
/// Servers answer either with a bare array or with a page object whose
/// `content` field holds the array; both shapes are accepted.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum HistoryPage {
    /// `[ ... ]`
    List(Vec<ChatMessage>),
    /// `{ "content": [ ... ], ... }`
    Page {
        /// Messages on this page.
        content: Vec<ChatMessage>,
    },
}

impl HistoryPage {
    /// Messages in server order.
    pub fn into_messages(self) -> Vec<ChatMessage> {
        match self {
            Self::List(messages) | Self::Page { content: messages } => messages,
        }
    }
}

/// `createdAt` wire format.
///
/// Accepts ISO-8601 local date-times (`2024-05-01T12:30:00.123`) and RFC 3339
/// with an offset, which is normalized to UTC. Always serializes as a local
/// date-time.
pub mod timestamp {
    use chrono::{DateTime, NaiveDateTime};
    use serde::{Deserialize, Deserializer, Serializer, de::Error};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f";

    /// Serialize as `YYYY-MM-DDTHH:MM:SS[.fff]`.
    pub fn serialize<S>(value: &NaiveDateTime, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&value.format(FORMAT))
    }

    /// Deserialize from either accepted form.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<NaiveDateTime, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        parse(&raw).ok_or_else(|| D::Error::custom(format!("invalid timestamp {raw:?}")))
    }

    /// Parse either accepted form. `None` if neither matches.
    pub fn parse(raw: &str) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(raw, FORMAT)
            .ok()
            .or_else(|| DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.naive_utc()))
    }
}
