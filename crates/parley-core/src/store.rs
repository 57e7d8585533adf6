//! Ordered, deduplicated message feed for one room.
//!
//! History snapshots and live deliveries race: the live subscription may
//! deliver before the REST call resolves, and a resubscribe may replay a
//! message already in the snapshot. The store makes arrival order irrelevant
//! by keeping messages sorted by `(created_at, id)` and dropping repeated ids,
//! so any interleaving of `seed` and `append` yields the same feed.
//!
//! # Stale handlers
//!
//! Every room entry bumps a generation counter. Producers capture a
//! [`StoreToken`] when they start (a subscription, a history request) and
//! deliver through [`MessageStore::append_at`] / [`MessageStore::seed_at`].
//! Deliveries carrying a token from before the last `clear`/`reset` are
//! ignored.

use std::collections::HashSet;

use parley_proto::{ChatMessage, MessageId, RoomId};

/// Identifies one room entry of a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StoreToken {
    /// Room the producer was started for.
    pub room_id: RoomId,
    /// Store generation at that time.
    pub generation: u64,
}

/// Result of [`MessageStore::append`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Message added to the feed.
    Inserted,
    /// A message with this id is already present.
    Duplicate,
    /// Message belongs to another room, or no room is selected.
    WrongRoom,
    /// Delivery carried a token from an earlier room entry.
    Stale,
}

/// Ordered message feed scoped to one room.
///
/// # Invariants
///
/// - `messages` is sorted ascending by [`ChatMessage::order_key`].
/// - No two messages share an id; `ids` holds exactly the ids in `messages`.
/// - Every message has `room_id == self.room_id`.
#[derive(Debug, Clone, Default)]
pub struct MessageStore {
    room_id: Option<RoomId>,
    generation: u64,
    messages: Vec<ChatMessage>,
    ids: HashSet<MessageId>,
}

impl MessageStore {
    /// Empty store with no room selected.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty store scoped to `room_id`.
    pub fn for_room(room_id: RoomId) -> Self {
        let mut store = Self::new();
        store.reset(room_id);
        store
    }

    /// Room the feed belongs to.
    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    /// Token for the current room entry. `None` if no room is selected.
    pub fn token(&self) -> Option<StoreToken> {
        self.room_id.map(|room_id| StoreToken { room_id, generation: self.generation })
    }

    /// Ordered snapshot of the feed.
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Number of messages in the feed.
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// True if the feed is empty.
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// True if a message with `id` is in the feed.
    pub fn contains(&self, id: MessageId) -> bool {
        self.ids.contains(&id)
    }

    /// Discard everything and invalidate outstanding tokens.
    pub fn clear(&mut self) {
        self.messages.clear();
        self.ids.clear();
        self.room_id = None;
        self.generation += 1;
    }

    /// Clear and scope the store to `room_id`.
    pub fn reset(&mut self, room_id: RoomId) -> StoreToken {
        self.clear();
        self.room_id = Some(room_id);
        StoreToken { room_id, generation: self.generation }
    }

    /// Merge a history snapshot. Returns how many messages were new.
    ///
    /// The snapshot may arrive before or after live deliveries; either way the
    /// result is the ordered union.
    pub fn seed(&mut self, history: impl IntoIterator<Item = ChatMessage>) -> usize {
        let mut inserted = 0;
        for message in history {
            if self.append(message) == AppendOutcome::Inserted {
                inserted += 1;
            }
        }
        inserted
    }

    /// Insert one message at its ordered position.
    pub fn append(&mut self, message: ChatMessage) -> AppendOutcome {
        if self.room_id != Some(message.room_id) {
            return AppendOutcome::WrongRoom;
        }
        if !self.ids.insert(message.id) {
            return AppendOutcome::Duplicate;
        }

        let key = message.order_key();
        let at = self.messages.partition_point(|existing| existing.order_key() < key);
        self.messages.insert(at, message);
        AppendOutcome::Inserted
    }

    /// [`MessageStore::seed`] on behalf of a producer. `None` if `token` is
    /// stale.
    pub fn seed_at(
        &mut self,
        token: StoreToken,
        history: impl IntoIterator<Item = ChatMessage>,
    ) -> Option<usize> {
        (self.token() == Some(token)).then(|| self.seed(history))
    }

    /// [`MessageStore::append`] on behalf of a producer.
    pub fn append_at(&mut self, token: StoreToken, message: ChatMessage) -> AppendOutcome {
        if self.token() != Some(token) {
            return AppendOutcome::Stale;
        }
        self.append(message)
    }
}
