//! Property-based tests for the chat session state machine.
//!
//! Drives a `ChatSession` through arbitrary interleavings of network drops,
//! timer ticks, live deliveries and late history results against a minimal
//! in-test broker, and checks the feed and subscription invariants after
//! every step.

use std::{collections::VecDeque, time::Duration};

use chrono::NaiveDate;
use parley_core::{
    ChatSession, ConnectionState, Credential, SessionAction, SessionConfig, SessionError,
    StoreToken,
};
use parley_proto::{ChatMessage, ClientFrame, HeartBeat, ServerFrame};
use proptest::prelude::*;

const ROOM: i64 = 42;

#[derive(Debug, Clone)]
enum Event {
    Advance(u64),
    DropTransport,
    Deliver { id: i64, minute: u32, twice: bool },
    DeliverOnRetiredHandle(i64),
    HistoryArrives,
    Send,
}

fn event_strategy() -> impl Strategy<Value = Event> {
    prop_oneof![
        3 => (1u64..8).prop_map(Event::Advance),
        2 => Just(Event::DropTransport),
        4 => (0i64..30, 0u32..60, any::<bool>())
            .prop_map(|(id, minute, twice)| Event::Deliver { id, minute, twice }),
        1 => (0i64..30).prop_map(Event::DeliverOnRetiredHandle),
        2 => Just(Event::HistoryArrives),
        1 => Just(Event::Send),
    ]
}

fn message(id: i64, minute: u32) -> ChatMessage {
    ChatMessage {
        id,
        room_id: ROOM,
        sender_id: Some(id % 2),
        sender_nickname: None,
        content: format!("m{id}"),
        created_at: NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, minute, 0)
            .unwrap(),
    }
}

/// Broker side of the test: accepts every connect and tracks subscriptions.
struct World {
    session: ChatSession<Duration>,
    now: Duration,
    link_up: bool,
    broker_subs: Vec<String>,
    pending_history: Vec<StoreToken>,
    persisted: Vec<ChatMessage>,
    retired: Vec<String>,
}

impl World {
    fn new() -> Self {
        let mut world = Self {
            session: ChatSession::new(SessionConfig::default()),
            now: Duration::ZERO,
            link_up: false,
            broker_subs: Vec::new(),
            pending_history: Vec::new(),
            persisted: Vec::new(),
            retired: Vec::new(),
        };
        let actions = world.session.open(ROOM, Credential::new("tok"), world.now).unwrap();
        world.run(actions);
        world
    }

    fn run(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<_> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::OpenTransport { .. } => {
                    self.link_up = true;
                    queue.extend(self.session.transport_opened(self.now).unwrap());
                },
                SessionAction::SendFrame(ClientFrame::Connect { .. }) => {
                    let connected = ServerFrame::Connected {
                        version: "1.2".to_string(),
                        heart_beat: HeartBeat::DISABLED,
                    };
                    queue.extend(self.session.handle_frame(connected, self.now));
                },
                SessionAction::SendFrame(ClientFrame::Subscribe { id, .. }) => {
                    self.broker_subs.push(id);
                },
                SessionAction::SendFrame(ClientFrame::Unsubscribe { id }) => {
                    self.broker_subs.retain(|sub| sub != &id);
                    self.retired.push(id);
                },
                SessionAction::CloseTransport { .. } => self.drop_link(),
                SessionAction::LoadHistory(request) => self.pending_history.push(request.token),
                SessionAction::SendFrame(_)
                | SessionAction::StateChanged(_)
                | SessionAction::FeedChanged => {},
            }
        }
    }

    fn drop_link(&mut self) {
        self.link_up = false;
        self.retired.append(&mut self.broker_subs);
    }

    fn apply(&mut self, event: Event) {
        match event {
            Event::Advance(secs) => {
                self.now += Duration::from_secs(secs);
                let actions = self.session.tick(self.now);
                self.run(actions);
            },
            Event::DropTransport => {
                if self.link_up {
                    self.drop_link();
                    let actions = self.session.transport_closed("connection reset", self.now);
                    self.run(actions);
                }
            },
            Event::Deliver { id, minute, twice } => {
                let Some(handle) = self.broker_subs.last().cloned().filter(|_| self.link_up) else {
                    return;
                };
                let message = self
                    .persisted
                    .iter()
                    .find(|m| m.id == id)
                    .cloned()
                    .unwrap_or_else(|| message(id, minute));
                if !self.persisted.contains(&message) {
                    self.persisted.push(message.clone());
                }
                let copies = if twice { 2 } else { 1 };
                for _ in 0..copies {
                    let frame = ServerFrame::Message {
                        subscription: handle.clone(),
                        destination: format!("/topic/chat/{ROOM}"),
                        message_id: id.to_string(),
                        message: message.clone(),
                    };
                    let actions = self.session.handle_frame(frame, self.now);
                    self.run(actions);
                }
            },
            Event::DeliverOnRetiredHandle(id) => {
                let Some(handle) = self.retired.last().cloned() else { return };
                let before = self.session.messages().to_vec();
                let frame = ServerFrame::Message {
                    subscription: handle,
                    destination: format!("/topic/chat/{ROOM}"),
                    message_id: id.to_string(),
                    message: message(1000 + id, 0),
                };
                let actions = self.session.handle_frame(frame, self.now);
                self.run(actions);
                assert_eq!(self.session.messages(), &before[..], "retired handle mutated feed");
            },
            Event::HistoryArrives => {
                if let Some(token) = self.pending_history.pop() {
                    let snapshot = self.persisted.clone();
                    let actions = self.session.history_loaded(token, snapshot);
                    self.run(actions);
                }
            },
            Event::Send => {
                let connected = self.session.state() == ConnectionState::Connected;
                match self.session.send("hello", self.now) {
                    Ok(actions) => {
                        assert!(connected);
                        self.run(actions);
                    },
                    Err(err) => {
                        assert!(!connected);
                        assert!(matches!(err, SessionError::SendWhileDisconnected { .. }));
                    },
                }
            },
        }
    }

    fn check(&self) -> Result<(), TestCaseError> {
        let messages = self.session.messages();

        let keys: Vec<_> = messages.iter().map(ChatMessage::order_key).collect();
        prop_assert!(keys.windows(2).all(|w| w[0] < w[1]), "feed out of order: {keys:?}");
        prop_assert!(messages.iter().all(|m| m.room_id == ROOM));

        let registry = self.session.subscriptions();
        prop_assert!(registry.active_count() <= 1);

        if self.session.state() == ConnectionState::Connected {
            prop_assert_eq!(registry.active_count(), 1);
            prop_assert_eq!(self.broker_subs.len(), 1);
            let handle = registry.active().map(|sub| sub.handle.to_string());
            prop_assert_eq!(handle.as_ref(), self.broker_subs.first());
        }
        prop_assert!(self.broker_subs.len() <= 1, "broker sees {:?}", self.broker_subs);
        Ok(())
    }
}

#[test]
fn prop_session_invariants_hold_under_chaos() {
    proptest!(|(events in prop::collection::vec(event_strategy(), 1..120))| {
        let mut world = World::new();
        world.check()?;

        for event in events {
            world.apply(event);
            world.check()?;
        }
    });
}

#[test]
fn prop_feed_converges_after_history_repair() {
    proptest!(|(events in prop::collection::vec(event_strategy(), 1..80))| {
        let mut world = World::new();
        for event in events {
            world.apply(event);
        }

        // Let any pending reconnect finish, then deliver the final snapshot.
        world.apply(Event::Advance(10));
        let token = world.session.store().token().expect("room still selected");
        let snapshot = world.persisted.clone();
        world.session.history_loaded(token, snapshot);

        let mut expected = world.persisted.clone();
        expected.sort_by_key(ChatMessage::order_key);
        prop_assert_eq!(world.session.messages(), &expected[..]);
    });
}

#[test]
fn consecutive_reconnects_keep_one_subscription() {
    let mut world = World::new();
    for _ in 0..25 {
        world.apply(Event::DropTransport);
        world.check().unwrap();
        assert_eq!(world.session.state(), ConnectionState::Reconnecting);
        assert_eq!(world.session.subscriptions().active_count(), 0);

        world.apply(Event::Advance(5));
        world.check().unwrap();
        assert_eq!(world.session.state(), ConnectionState::Connected);
    }

    assert_eq!(world.session.subscriptions().issued(), 26);
}
