//! Room-scoped STOMP destinations.
//!
//! Every room has one broadcast topic that clients subscribe to and one
//! application destination that clients publish into. The broker persists a
//! published message and rebroadcasts it on the topic, sender included.

use crate::message::RoomId;

const TOPIC_PREFIX: &str = "/topic/chat/";
const PUBLISH_PREFIX: &str = "/app/chat/message/";

/// Topic carrying every message of `room_id`.
pub fn room_topic(room_id: RoomId) -> String {
    format!("{TOPIC_PREFIX}{room_id}")
}

/// Destination a client publishes into for `room_id`.
pub fn room_publish_destination(room_id: RoomId) -> String {
    format!("{PUBLISH_PREFIX}{room_id}")
}

/// Room named by a topic destination. `None` if `destination` is not a room
/// topic.
pub fn parse_room_topic(destination: &str) -> Option<RoomId> {
    parse_suffix(destination, TOPIC_PREFIX)
}

/// Room named by a publish destination. `None` if `destination` is not a
/// publish destination.
pub fn parse_publish_destination(destination: &str) -> Option<RoomId> {
    parse_suffix(destination, PUBLISH_PREFIX)
}

fn parse_suffix(destination: &str, prefix: &str) -> Option<RoomId> {
    let raw = destination.strip_prefix(prefix)?;
    // `i64::from_str` accepts a leading '+', the wire form never carries one
    if raw.starts_with('+') {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_and_publish_destinations() {
        assert_eq!(room_topic(42), "/topic/chat/42");
        assert_eq!(room_publish_destination(42), "/app/chat/message/42");
    }

    #[test]
    fn parse_back_to_room() {
        assert_eq!(parse_room_topic(&room_topic(7)), Some(7));
        assert_eq!(parse_publish_destination(&room_publish_destination(7)), Some(7));
    }

    #[test]
    fn foreign_destinations_are_not_rooms() {
        assert_eq!(parse_room_topic("/topic/chat/"), None);
        assert_eq!(parse_room_topic("/topic/chat/abc"), None);
        assert_eq!(parse_room_topic("/topic/chat/+4"), None);
        assert_eq!(parse_room_topic("/app/chat/message/4"), None);
        assert_eq!(parse_publish_destination("/topic/chat/4"), None);
    }
}
