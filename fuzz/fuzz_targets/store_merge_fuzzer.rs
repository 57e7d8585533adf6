//! Fuzz target for the message store merge
//!
//! # Strategy
//!
//! - Interleave live appends, history seeds and room resets
//! - Small id and timestamp ranges so duplicates and ties are common
//! - Deliveries carry tokens from earlier room entries
//!
//! # Invariants
//!
//! - Feed strictly ascending by `(created_at, id)`
//! - No duplicate ids
//! - Every message belongs to the selected room
//! - Stale tokens never change the feed

#![no_main]

use arbitrary::Arbitrary;
use chrono::{DateTime, NaiveDateTime};
use libfuzzer_sys::fuzz_target;
use parley_core::{AppendOutcome, MessageStore, StoreToken};
use parley_proto::ChatMessage;

#[derive(Debug, Clone, Arbitrary)]
enum StoreOp {
    Append { id: u8, secs: u8, room: u8, stale: bool },
    Seed { batch: Vec<(u8, u8)>, stale: bool },
    Reset { room: u8 },
    Clear,
}

fn at(secs: u8) -> NaiveDateTime {
    DateTime::from_timestamp(1_714_564_800 + i64::from(secs), 0)
        .map(|dt| dt.naive_utc())
        .unwrap_or_default()
}

fn message(id: u8, secs: u8, room: u8) -> ChatMessage {
    ChatMessage {
        id: i64::from(id % 32),
        room_id: i64::from(room % 4),
        sender_id: None,
        sender_nickname: None,
        content: String::new(),
        created_at: at(secs % 16),
    }
}

fuzz_target!(|ops: Vec<StoreOp>| {
    let mut store = MessageStore::for_room(0);
    let mut retired: Option<StoreToken> = None;

    for op in ops {
        let before = store.messages().to_vec();
        let stale_delivery = matches!(
            op,
            StoreOp::Append { stale: true, .. } | StoreOp::Seed { stale: true, .. }
        );
        match op {
            StoreOp::Append { id, secs, room, stale } => {
                let token = if stale { retired } else { store.token() };
                let Some(token) = token else { continue };
                let room = if stale { room } else { token.room_id as u8 };
                let outcome = store.append_at(token, message(id, secs, room));
                if stale {
                    assert_eq!(outcome, AppendOutcome::Stale);
                }
            },
            StoreOp::Seed { batch, stale } => {
                let token = if stale { retired } else { store.token() };
                let Some(token) = token else { continue };
                let room = token.room_id as u8;
                let history = batch.into_iter().map(|(id, secs)| message(id, secs, room));
                let seeded = store.seed_at(token, history);
                if stale {
                    assert_eq!(seeded, None);
                }
            },
            StoreOp::Reset { room } => {
                retired = store.token().or(retired);
                store.reset(i64::from(room % 4));
            },
            StoreOp::Clear => {
                retired = store.token().or(retired);
                store.clear();
            },
        }

        if stale_delivery {
            assert_eq!(store.messages(), &before[..], "stale token changed the feed");
        }

        let keys: Vec<_> = store.messages().iter().map(ChatMessage::order_key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "feed out of order: {keys:?}");
        let room = store.room_id();
        assert!(store.messages().iter().all(|m| Some(m.room_id) == room));
        for m in store.messages() {
            assert!(store.contains(m.id));
        }
    }
});
