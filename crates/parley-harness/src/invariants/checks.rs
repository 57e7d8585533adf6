//! Session invariants.

use std::collections::HashSet;

use parley_core::ConnectionState;
use parley_proto::ChatMessage;

use super::{Invariant, InvariantResult, SessionSnapshot};

/// Feed is strictly ascending by `(createdAt, id)`.
pub struct FeedOrdered;

impl Invariant for FeedOrdered {
    fn name(&self) -> &'static str {
        "FeedOrdered"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        for pair in state.messages.windows(2) {
            if pair[0].order_key() >= pair[1].order_key() {
                return Err(self.violation(format!(
                    "message {} ({}) precedes message {} ({})",
                    pair[0].id, pair[0].created_at, pair[1].id, pair[1].created_at
                )));
            }
        }
        Ok(())
    }
}

/// No message id appears twice.
pub struct FeedUnique;

impl Invariant for FeedUnique {
    fn name(&self) -> &'static str {
        "FeedUnique"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let mut seen = HashSet::new();
        match state.messages.iter().find(|m| !seen.insert(m.id)) {
            Some(duplicate) => Err(self.violation(format!("id {} appears twice", duplicate.id))),
            None => Ok(()),
        }
    }
}

/// Every message belongs to the active room; no room means no messages.
pub struct FeedScopedToRoom;

impl Invariant for FeedScopedToRoom {
    fn name(&self) -> &'static str {
        "FeedScopedToRoom"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let stray: Vec<&ChatMessage> =
            state.messages.iter().filter(|m| Some(m.room_id) != state.room_id).collect();
        if let Some(first) = stray.first() {
            return Err(self.violation(format!(
                "{} message(s) outside room {:?}, first: id {} of room {}",
                stray.len(),
                state.room_id,
                first.id,
                first.room_id
            )));
        }
        Ok(())
    }
}

/// At most one live subscription.
pub struct SingleSubscription;

impl Invariant for SingleSubscription {
    fn name(&self) -> &'static str {
        "SingleSubscription"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        if state.active_subscriptions > 1 {
            return Err(
                self.violation(format!("{} live subscriptions", state.active_subscriptions))
            );
        }
        Ok(())
    }
}

/// Connected with a room selected means exactly one live subscription.
pub struct ConnectedImpliesSubscribed;

impl Invariant for ConnectedImpliesSubscribed {
    fn name(&self) -> &'static str {
        "ConnectedImpliesSubscribed"
    }

    fn check(&self, state: &SessionSnapshot) -> InvariantResult {
        let connected = state.state == ConnectionState::Connected && state.room_id.is_some();
        if connected && state.active_subscriptions != 1 {
            return Err(self.violation(format!(
                "connected to room {:?} with {} live subscriptions",
                state.room_id, state.active_subscriptions
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn msg(id: i64, room_id: i64, minute: u32) -> ChatMessage {
        ChatMessage {
            id,
            room_id,
            sender_id: None,
            sender_nickname: None,
            content: String::new(),
            created_at: NaiveDate::from_ymd_opt(2024, 5, 1)
                .unwrap()
                .and_hms_opt(12, minute, 0)
                .unwrap(),
        }
    }

    fn snapshot(messages: Vec<ChatMessage>) -> SessionSnapshot {
        SessionSnapshot {
            state: ConnectionState::Connected,
            room_id: Some(42),
            messages,
            active_subscriptions: 1,
        }
    }

    #[test]
    fn out_of_order_feed_is_flagged() {
        let state = snapshot(vec![msg(2, 42, 5), msg(1, 42, 1)]);
        assert_eq!(FeedOrdered.check(&state).unwrap_err().invariant, "FeedOrdered");
    }

    #[test]
    fn duplicate_id_is_flagged() {
        let state = snapshot(vec![msg(1, 42, 1), msg(1, 42, 2)]);
        assert!(FeedUnique.check(&state).is_err());
    }

    #[test]
    fn foreign_room_is_flagged() {
        let state = snapshot(vec![msg(1, 42, 1), msg(2, 7, 2)]);
        assert!(FeedScopedToRoom.check(&state).is_err());
    }

    #[test]
    fn subscription_counts() {
        let mut state = snapshot(Vec::new());
        assert!(ConnectedImpliesSubscribed.check(&state).is_ok());

        state.active_subscriptions = 0;
        assert!(ConnectedImpliesSubscribed.check(&state).is_err());

        state.state = ConnectionState::Reconnecting;
        assert!(ConnectedImpliesSubscribed.check(&state).is_ok());

        state.active_subscriptions = 2;
        assert!(SingleSubscription.check(&state).is_err());
    }
}
