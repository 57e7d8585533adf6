//! Terminal rendering of the feed and status.

use std::collections::HashSet;

use parley_client::{ClientError, SessionStatus};
use parley_core::ConnectionState;
use parley_proto::{ChatMessage, MessageId, RoomId};

/// One feed line.
pub fn message_line(message: &ChatMessage) -> String {
    let sender = match (&message.sender_nickname, message.sender_id) {
        (Some(nickname), _) => nickname.clone(),
        (None, Some(id)) => format!("user-{id}"),
        (None, None) => "system".to_string(),
    };
    format!("[{}] {sender}: {}", message.created_at.format("%H:%M:%S"), message.content)
}

/// One status line.
pub fn status_line(status: &SessionStatus) -> String {
    let room = status.room_id.map_or_else(|| "-".to_string(), |id| id.to_string());
    let mut line = format!("-- room {room}: {}", status.state);
    if status.state == ConnectionState::Reconnecting && status.reconnect_attempts > 0 {
        line.push_str(&format!(" (attempt {})", status.reconnect_attempts));
    }
    if let Some(error) = &status.error {
        line.push_str(&format!(" [{error}]"));
    }
    line
}

/// Reported when a room switch is refused; the session keeps running.
pub fn switch_failed_line(room_id: RoomId, error: &ClientError) -> String {
    format!("-- cannot switch to room {room_id}: {error}")
}

/// Tracks which messages were already printed so each feed update prints
/// only what is new.
#[derive(Debug, Default)]
pub struct FeedPrinter {
    room_id: Option<RoomId>,
    printed: HashSet<MessageId>,
}

impl FeedPrinter {
    /// Lines for messages not printed before, in feed order.
    ///
    /// An emptied feed or a feed for another room starts over.
    pub fn update(&mut self, room_id: Option<RoomId>, feed: &[ChatMessage]) -> Vec<String> {
        if feed.is_empty() || room_id != self.room_id {
            self.room_id = room_id;
            self.printed.clear();
        }
        feed.iter().filter(|m| self.printed.insert(m.id)).map(message_line).collect()
    }
}
