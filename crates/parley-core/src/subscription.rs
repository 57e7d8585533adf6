//! Room subscription registry.
//!
//! Tracks which room is selected and the at most one live topic subscription
//! for it. Subscriptions do not survive a transport reconnect: the broker
//! forgets them with the connection, so the registry invalidates on loss and
//! re-issues for the same room after every handshake.
//!
//! Handles are numbered monotonically (`sub-0`, `sub-1`, ...) and never
//! reused. A `MESSAGE` addressed to any handle but the active one comes from
//! a retired subscription and is not routed.

use std::fmt;

use parley_proto::{ClientFrame, RoomId, destination};

use crate::store::StoreToken;

/// Subscription handle sent as the STOMP `id` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

impl SubscriptionId {
    /// Parse a `sub-{n}` handle.
    pub fn parse(raw: &str) -> Option<Self> {
        let n = raw.strip_prefix("sub-")?;
        if n.starts_with('+') {
            return None;
        }
        n.parse().ok().map(Self)
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// The room subscription of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoomSubscription {
    /// Subscribed room.
    pub room_id: RoomId,
    /// Handle used on the wire.
    pub handle: SubscriptionId,
    /// False once the transport that carried it is gone.
    pub active: bool,
    /// Store entry its deliveries belong to.
    pub token: StoreToken,
}

/// Keeps exactly one subscription consistent with the selected room.
///
/// # Invariants
///
/// - At most one subscription exists, and it is for the selected room.
/// - Handles are never reused within a registry.
#[derive(Debug, Clone, Default)]
pub struct SubscriptionRegistry {
    selected: Option<(RoomId, StoreToken)>,
    current: Option<RoomSubscription>,
    next_handle: u64,
}

impl SubscriptionRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Selected room, whether or not it is currently subscribed.
    pub fn room(&self) -> Option<RoomId> {
        self.selected.map(|(room_id, _)| room_id)
    }

    /// Current subscription, active or invalidated.
    pub fn current(&self) -> Option<&RoomSubscription> {
        self.current.as_ref()
    }

    /// Live subscription, if any.
    pub fn active(&self) -> Option<&RoomSubscription> {
        self.current.as_ref().filter(|sub| sub.active)
    }

    /// Number of live subscriptions (0 or 1).
    pub fn active_count(&self) -> usize {
        usize::from(self.active().is_some())
    }

    /// Total handles issued so far.
    pub fn issued(&self) -> u64 {
        self.next_handle
    }

    /// Select `room_id` without subscribing.
    ///
    /// A live subscription for another room is retired first; the returned
    /// frame must be sent before anything else for the new room.
    pub fn select(&mut self, room_id: RoomId, token: StoreToken) -> Option<ClientFrame> {
        let stale = self.current.is_some_and(|sub| sub.room_id != room_id || sub.token != token);
        let retire = if stale { self.unsubscribe() } else { None };
        self.selected = Some((room_id, token));
        retire
    }

    /// Issue the subscription for the selected room.
    ///
    /// Idempotent: returns `None` if it is already live or no room is
    /// selected.
    pub fn establish(&mut self) -> Option<ClientFrame> {
        let (room_id, token) = self.selected?;
        if self.active().is_some() {
            return None;
        }

        let handle = SubscriptionId(self.next_handle);
        self.next_handle += 1;
        self.current = Some(RoomSubscription { room_id, handle, active: true, token });

        Some(ClientFrame::Subscribe {
            id: handle.to_string(),
            destination: destination::room_topic(room_id),
        })
    }

    /// Select `room_id` and subscribe to it.
    ///
    /// Any subscription for a different room is torn down first, so the
    /// returned frames are `UNSUBSCRIBE` (if needed) then `SUBSCRIBE`.
    pub fn subscribe(&mut self, room_id: RoomId, token: StoreToken) -> Vec<ClientFrame> {
        self.select(room_id, token).into_iter().chain(self.establish()).collect()
    }

    /// Drop the subscription and the room selection.
    ///
    /// Returns `UNSUBSCRIBE` only if a live subscription existed. Safe to call
    /// any number of times.
    pub fn unsubscribe(&mut self) -> Option<ClientFrame> {
        self.selected = None;
        let sub = self.current.take()?;
        sub.active.then(|| ClientFrame::Unsubscribe { id: sub.handle.to_string() })
    }

    /// Mark the subscription dead after a transport loss.
    ///
    /// The room stays selected so [`SubscriptionRegistry::establish`] re-issues
    /// it for the same room.
    pub fn invalidate(&mut self) {
        if let Some(sub) = self.current.as_mut() {
            sub.active = false;
        }
    }

    /// Resolve a `MESSAGE` subscription header to its room and store token.
    ///
    /// `None` for retired, invalidated or unknown handles.
    pub fn route(&self, handle: &str) -> Option<(RoomId, StoreToken)> {
        let handle = SubscriptionId::parse(handle)?;
        self.active().filter(|sub| sub.handle == handle).map(|sub| (sub.room_id, sub.token))
    }
}
