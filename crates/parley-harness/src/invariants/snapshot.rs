//! Observable session state for invariant checking.
//!
//! Snapshots are taken between steps so every check sees one consistent
//! state.

use std::{ops::Sub, time::Duration};

use parley_client::SessionHandle;
use parley_core::{ChatSession, ConnectionState};
use parley_proto::{ChatMessage, RoomId};

use crate::sim_broker::SimBroker;

/// Snapshot of one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    /// Connection state.
    pub state: ConnectionState,
    /// Active room.
    pub room_id: Option<RoomId>,
    /// Ordered feed.
    pub messages: Vec<ChatMessage>,
    /// Live subscriptions, as the registry or the broker sees them.
    pub active_subscriptions: usize,
}

impl Default for SessionSnapshot {
    fn default() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            room_id: None,
            messages: Vec::new(),
            active_subscriptions: 0,
        }
    }
}

impl SessionSnapshot {
    /// Snapshot of a bare state machine.
    pub fn from_session<I>(session: &ChatSession<I>) -> Self
    where
        I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
    {
        Self {
            state: session.state(),
            room_id: session.room_id(),
            messages: session.messages().to_vec(),
            active_subscriptions: session.subscriptions().active_count(),
        }
    }

    /// Snapshot of a running session, counting subscriptions on the broker
    /// side. Let the runtime settle first so in-flight frames have landed.
    pub fn observe(handle: &SessionHandle, broker: &SimBroker) -> Self {
        let status = handle.status();
        Self {
            state: status.state,
            room_id: status.room_id,
            messages: handle.messages(),
            active_subscriptions: broker.total_subscriptions(),
        }
    }
}
