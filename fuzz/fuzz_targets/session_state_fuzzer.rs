//! Fuzz target for the chat session state machine
//!
//! # Strategy
//!
//! - Arbitrary inbound text, including well-formed CONNECTED, MESSAGE and
//!   ERROR frames addressed to live and retired handles
//! - Transport drops, auth rejections, clock jumps and sends in any order
//! - Late history results carrying old tokens
//!
//! # Invariants
//!
//! - At most one live subscription; exactly one while connected
//! - Feed strictly ordered and scoped to the selected room
//! - No input sequence panics

#![no_main]

use std::time::Duration;

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;
use parley_core::{
    ChatSession, ConnectionState, Credential, SessionAction, SessionConfig, StoreToken,
};
use parley_proto::{ChatMessage, message::timestamp};

#[derive(Debug, Clone, Arbitrary)]
enum SessionOp {
    TransportOpened,
    TransportClosed,
    Rejected,
    Connected { heart_beat: u8 },
    Message { handle: u8, id: u8, secs: u8, room: u8 },
    BrokerError,
    Raw(String),
    Advance(u16),
    Send(String),
    History { generation_back: u8, ids: Vec<u8> },
    SwitchRoom(u8),
    Close,
}

fn message_frame(handle: u8, id: u8, secs: u8, room: u8) -> String {
    format!(
        "MESSAGE\nsubscription:sub-{handle}\ndestination:/topic/chat/{room}\nmessage-id:{id}\n\n\
         {{\"id\":{id},\"roomId\":{room},\"senderId\":1,\"content\":\"m\",\
         \"createdAt\":\"2024-05-01T12:00:{:02}\"}}\0",
        secs % 60
    )
}

fuzz_target!(|ops: Vec<SessionOp>| {
    let mut session: ChatSession<Duration> = ChatSession::new(SessionConfig::default());
    let mut now = Duration::ZERO;
    let mut tokens: Vec<StoreToken> = Vec::new();

    let Ok(actions) = session.open(1, Credential::new("tok"), now) else {
        return;
    };
    collect(&actions, &mut tokens);

    for op in ops {
        let actions = match op {
            SessionOp::TransportOpened => session.transport_opened(now).unwrap_or_default(),
            SessionOp::TransportClosed => session.transport_closed("reset", now),
            SessionOp::Rejected => session.transport_rejected("401"),
            SessionOp::Connected { heart_beat } => session.handle_text(
                &format!("CONNECTED\nversion:1.2\nheart-beat:{},0\n\n\0", u32::from(heart_beat) * 100),
                now,
            ),
            SessionOp::Message { handle, id, secs, room } => {
                session.handle_text(&message_frame(handle % 8, id, secs, room % 3), now)
            },
            SessionOp::BrokerError => session.handle_text("ERROR\nmessage:boom\n\n\0", now),
            SessionOp::Raw(text) => session.handle_text(&text, now),
            SessionOp::Advance(millis) => {
                now += Duration::from_millis(u64::from(millis) * 10);
                session.tick(now)
            },
            SessionOp::Send(content) => session.send(&content, now).unwrap_or_default(),
            SessionOp::History { generation_back, ids } => {
                let Some(token) = tokens.iter().rev().nth(usize::from(generation_back % 4)).copied()
                else {
                    continue;
                };
                let history = ids
                    .into_iter()
                    .filter_map(|id| history_message(token.room_id, id))
                    .collect();
                session.history_loaded(token, history)
            },
            SessionOp::SwitchRoom(room) => session
                .open(i64::from(room % 3), Credential::new("tok"), now)
                .unwrap_or_default(),
            SessionOp::Close => session.close(),
        };
        collect(&actions, &mut tokens);

        let registry = session.subscriptions();
        assert!(registry.active_count() <= 1);
        if session.state() == ConnectionState::Connected {
            assert_eq!(registry.active_count(), 1);
        }

        let keys: Vec<_> = session.messages().iter().map(ChatMessage::order_key).collect();
        assert!(keys.windows(2).all(|w| w[0] < w[1]), "feed out of order: {keys:?}");
        let room = session.room_id();
        assert!(session.messages().iter().all(|m| Some(m.room_id) == room));
    }
});

fn collect(actions: &[SessionAction], tokens: &mut Vec<StoreToken>) {
    for action in actions {
        if let SessionAction::LoadHistory(request) = action {
            tokens.push(request.token);
        }
    }
}

fn history_message(room_id: i64, id: u8) -> Option<ChatMessage> {
    let created_at = timestamp::parse(&format!("2024-05-01T12:01:{:02}", id % 60))?;
    Some(ChatMessage {
        id: i64::from(id),
        room_id,
        sender_id: Some(2),
        sender_nickname: None,
        content: "h".to_string(),
        created_at,
    })
}
