//! In-memory STOMP broker.
//!
//! `SimBroker` speaks the same frames as the real chat backend over
//! in-process channels. [`SimTransport`] plugs it into the client as a
//! [`Transport`]; every connect spawns a task that feeds the client's frames
//! to the broker.
//!
//! Delivery is at-most-once like the real broker: a message published while
//! a client has no live subscription is persisted to history but never
//! delivered to it. Tests script failures through the control methods
//! (`drop_connections`, `reject_upgrades`, `inject_error`, ...).

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    collections::{BTreeMap, HashMap},
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use chrono::{DateTime, NaiveDateTime};
use parley_client::{ConnectRequest, Transport, TransportError, TransportEvent, TransportLink};
use parley_core::Credential;
use parley_proto::{
    ChatMessage, ClientFrame, HeartBeat, RoomId, STOMP_VERSION, ServerFrame, destination,
};
use tokio::sync::mpsc;
use tracing::{debug, warn};

const CHANNEL_CAPACITY: usize = 256;

/// Broker clock origin: 2024-05-01T12:00:00Z. Message `n` is stamped `n`
/// seconds later.
const EPOCH_SECS: i64 = 1_714_564_800;

/// Nickname the broker stamps on messages published through SEND.
pub const SIM_NICKNAME: &str = "sim-user";

struct Connection {
    to_client: mpsc::Sender<TransportEvent>,
    stomp_connected: bool,
    subscriptions: HashMap<String, RoomId>,
}

type Delivery = (mpsc::Sender<TransportEvent>, TransportEvent);

#[derive(Default)]
struct BrokerState {
    accepted_token: Option<String>,
    upgrade_status: Option<u16>,
    refuse_connections: bool,
    stomp_rejection: Option<String>,
    heart_beat: Option<HeartBeat>,
    duplicate_deliveries: bool,
    connections: BTreeMap<u64, Connection>,
    next_connection: u64,
    next_message_id: i64,
    history: BTreeMap<RoomId, Vec<ChatMessage>>,
    connect_attempts: u64,
    received: Vec<ClientFrame>,
}

impl BrokerState {
    /// Forget connections whose client side is gone.
    fn prune(&mut self) {
        self.connections.retain(|_, conn| !conn.to_client.is_closed());
    }

    fn receive(&mut self, connection_id: u64, text: &str) -> Vec<Delivery> {
        self.prune();
        let frame = match ClientFrame::parse(text) {
            Ok(frame) => frame,
            Err(err) => {
                warn!(connection_id, %err, "broker received malformed frame");
                return self.close_with_error(connection_id, "malformed frame", &err.to_string());
            },
        };
        self.received.push(frame.clone());

        let Some(conn) = self.connections.get_mut(&connection_id) else {
            debug!(connection_id, "frame on a closed connection");
            return Vec::new();
        };

        match frame {
            ClientFrame::Connect { authorization, .. } => {
                if let Some(reason) = self.stomp_rejection.clone() {
                    return self.close_with_error(connection_id, "Unauthorized", &reason);
                }
                let expected = self.accepted_token.as_ref().map(|token| format!("Bearer {token}"));
                if expected.is_some() && authorization != expected {
                    return self.close_with_error(connection_id, "Unauthorized", "bad credential");
                }

                conn.stomp_connected = true;
                let connected = ServerFrame::Connected {
                    version: STOMP_VERSION.to_string(),
                    heart_beat: self.heart_beat.unwrap_or(HeartBeat::DISABLED),
                };
                vec![(conn.to_client.clone(), TransportEvent::Text(connected.encode()))]
            },
            ClientFrame::Subscribe { id, destination } => {
                match destination::parse_room_topic(&destination) {
                    Some(room_id) => {
                        conn.subscriptions.insert(id, room_id);
                        Vec::new()
                    },
                    None => self.close_with_error(connection_id, "bad destination", &destination),
                }
            },
            ClientFrame::Unsubscribe { id } => {
                conn.subscriptions.remove(&id);
                Vec::new()
            },
            ClientFrame::Send { destination, body } => {
                let Some(room_id) = destination::parse_publish_destination(&destination) else {
                    return self.close_with_error(connection_id, "bad destination", &destination);
                };
                let message = self.persist(room_id, body.content);
                self.fan_out(&message)
            },
            ClientFrame::Disconnect { receipt } => {
                let receipt = ServerFrame::Receipt { receipt_id: receipt };
                let delivery = (conn.to_client.clone(), TransportEvent::Text(receipt.encode()));
                self.connections.remove(&connection_id);
                vec![delivery]
            },
            ClientFrame::Heartbeat => Vec::new(),
        }
    }

    /// Send ERROR, then close, as a STOMP broker does.
    fn close_with_error(&mut self, connection_id: u64, message: &str, detail: &str) -> Vec<Delivery> {
        let Some(conn) = self.connections.remove(&connection_id) else {
            return Vec::new();
        };
        let error = ServerFrame::Error { message: Some(message.to_string()), detail: detail.to_string() };
        vec![
            (conn.to_client.clone(), TransportEvent::Text(error.encode())),
            (conn.to_client, TransportEvent::Closed { reason: message.to_string() }),
        ]
    }

    fn persist(&mut self, room_id: RoomId, content: String) -> ChatMessage {
        self.next_message_id += 1;
        let id = self.next_message_id;
        let message = ChatMessage {
            id,
            room_id,
            sender_id: Some(1),
            sender_nickname: Some(SIM_NICKNAME.to_string()),
            content,
            created_at: timestamp(id),
        };
        self.history.entry(room_id).or_default().push(message.clone());
        message
    }

    fn fan_out(&mut self, message: &ChatMessage) -> Vec<Delivery> {
        self.prune();
        let copies = if self.duplicate_deliveries { 2 } else { 1 };
        let mut deliveries = Vec::new();

        for conn in self.connections.values().filter(|conn| conn.stomp_connected) {
            for (handle, room_id) in &conn.subscriptions {
                if *room_id != message.room_id {
                    continue;
                }
                let frame = ServerFrame::Message {
                    subscription: handle.clone(),
                    destination: destination::room_topic(*room_id),
                    message_id: message.id.to_string(),
                    message: message.clone(),
                };
                let text = frame.encode();
                for _ in 0..copies {
                    deliveries.push((conn.to_client.clone(), TransportEvent::Text(text.clone())));
                }
            }
        }
        deliveries
    }

    fn to_all(&mut self, event: &TransportEvent) -> Vec<Delivery> {
        self.prune();
        self.connections
            .values()
            .filter(|conn| conn.stomp_connected)
            .map(|conn| (conn.to_client.clone(), event.clone()))
            .collect()
    }
}

/// Broker timestamp for message `id`.
fn timestamp(id: i64) -> NaiveDateTime {
    DateTime::from_timestamp(EPOCH_SECS + id, 0).map(|at| at.naive_utc()).unwrap_or_default()
}

fn deliver(deliveries: Vec<Delivery>) {
    for (to_client, event) in deliveries {
        if to_client.try_send(event).is_err() {
            debug!("client gone or saturated, delivery dropped");
        }
    }
}

/// Shared handle to the simulated broker.
#[derive(Clone, Default)]
pub struct SimBroker {
    state: Arc<Mutex<BrokerState>>,
}

impl SimBroker {
    /// Broker accepting any credential, heart-beats disabled.
    pub fn new() -> Self {
        Self::default()
    }

    /// Client transport connected to this broker.
    pub fn transport(&self) -> SimTransport {
        SimTransport { broker: self.clone() }
    }

    fn lock(&self) -> MutexGuard<'_, BrokerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // Controls

    /// Only accept upgrades carrying `token`; others get HTTP 401.
    pub fn accept_token(&self, token: impl Into<String>) {
        self.lock().accepted_token = Some(token.into());
    }

    /// Fail every upgrade with `status` (`None` to stop).
    pub fn reject_upgrades(&self, status: Option<u16>) {
        self.lock().upgrade_status = status;
    }

    /// Refuse connections at the network level.
    pub fn refuse_connections(&self, refuse: bool) {
        self.lock().refuse_connections = refuse;
    }

    /// Answer every CONNECT with ERROR `reason` (`None` to stop).
    pub fn reject_stomp_connect(&self, reason: Option<String>) {
        self.lock().stomp_rejection = reason;
    }

    /// Heart-beat header sent in CONNECTED.
    pub fn set_heart_beat(&self, heart_beat: HeartBeat) {
        self.lock().heart_beat = Some(heart_beat);
    }

    /// Deliver every message twice.
    pub fn duplicate_deliveries(&self, duplicate: bool) {
        self.lock().duplicate_deliveries = duplicate;
    }

    /// Flip duplicate delivery.
    pub fn toggle_duplicates(&self) {
        let mut state = self.lock();
        state.duplicate_deliveries = !state.duplicate_deliveries;
    }

    /// Drop every connection without a close handshake.
    pub fn drop_connections(&self) {
        let deliveries: Vec<_> = {
            let mut state = self.lock();
            state.prune();
            let closed = TransportEvent::Closed { reason: "connection reset".to_string() };
            std::mem::take(&mut state.connections)
                .into_values()
                .map(|conn| (conn.to_client, closed.clone()))
                .collect()
        };
        deliver(deliveries);
    }

    /// Send ERROR to every STOMP session and close it.
    pub fn inject_error(&self, message: &str) {
        let deliveries = {
            let mut state = self.lock();
            state.prune();
            let ids: Vec<_> = state.connections.keys().copied().collect();
            ids.into_iter()
                .flat_map(|id| state.close_with_error(id, message, "injected failure"))
                .collect::<Vec<_>>()
        };
        deliver(deliveries);
    }

    /// Send raw text (malformed frames, heart-beats) to every STOMP session.
    pub fn inject_raw(&self, text: &str) {
        let deliveries = self.lock().to_all(&TransportEvent::Text(text.to_string()));
        deliver(deliveries);
    }

    /// Send a heart-beat EOL to every STOMP session.
    pub fn send_heartbeats(&self) {
        self.inject_raw("\n");
    }

    /// Publish as another user: persist and deliver to subscribers.
    pub fn publish(&self, room_id: RoomId, content: impl Into<String>) -> ChatMessage {
        let (message, deliveries) = {
            let mut state = self.lock();
            let message = state.persist(room_id, content.into());
            let deliveries = state.fan_out(&message);
            (message, deliveries)
        };
        deliver(deliveries);
        message
    }

    /// Persist without delivering, as if published while the client was
    /// away.
    pub fn persist(&self, room_id: RoomId, content: impl Into<String>) -> ChatMessage {
        self.lock().persist(room_id, content.into())
    }

    /// Deliver `message` to current subscribers without persisting it again.
    pub fn redeliver(&self, message: &ChatMessage) {
        let deliveries = self.lock().fan_out(message);
        deliver(deliveries);
    }

    // Introspection

    /// Persisted messages of `room_id`, in publish order.
    pub fn history(&self, room_id: RoomId) -> Vec<ChatMessage> {
        self.lock().history.get(&room_id).cloned().unwrap_or_default()
    }

    /// Upgrade attempts seen, successful or not.
    pub fn connect_attempts(&self) -> u64 {
        self.lock().connect_attempts
    }

    /// Connections whose client side is still open.
    pub fn live_connections(&self) -> usize {
        let mut state = self.lock();
        state.prune();
        state.connections.len()
    }

    /// Live subscriptions for `room_id` across all connections.
    pub fn subscriptions(&self, room_id: RoomId) -> usize {
        let mut state = self.lock();
        state.prune();
        state
            .connections
            .values()
            .flat_map(|conn| conn.subscriptions.values())
            .filter(|room| **room == room_id)
            .count()
    }

    /// Live subscriptions for any room.
    pub fn total_subscriptions(&self) -> usize {
        let mut state = self.lock();
        state.prune();
        state.connections.values().map(|conn| conn.subscriptions.len()).sum()
    }

    /// Every frame received, in order.
    pub fn received(&self) -> Vec<ClientFrame> {
        self.lock().received.clone()
    }

    /// Number of received frames matching `predicate`.
    pub fn count_received(&self, predicate: impl Fn(&ClientFrame) -> bool) -> usize {
        self.lock().received.iter().filter(|frame| predicate(frame)).count()
    }

    fn accept(
        &self,
        credential: &Credential,
    ) -> Result<(u64, mpsc::Receiver<TransportEvent>), TransportError> {
        let mut state = self.lock();
        state.connect_attempts += 1;

        if state.refuse_connections {
            return Err(TransportError::Connection("connection refused".to_string()));
        }
        if let Some(status) = state.upgrade_status {
            return Err(TransportError::from_status(status));
        }
        if state.accepted_token.as_deref().is_some_and(|token| token != credential.token()) {
            return Err(TransportError::Rejected { status: 401 });
        }

        let id = state.next_connection;
        state.next_connection += 1;
        let (to_client, from_server) = mpsc::channel(CHANNEL_CAPACITY);
        state.connections.insert(id, Connection {
            to_client,
            stomp_connected: false,
            subscriptions: HashMap::new(),
        });
        debug!(connection_id = id, "broker accepted connection");
        Ok((id, from_server))
    }

    fn receive(&self, connection_id: u64, text: &str) {
        let deliveries = self.lock().receive(connection_id, text);
        deliver(deliveries);
    }

    fn disconnect(&self, connection_id: u64) {
        self.lock().connections.remove(&connection_id);
    }
}

/// [`Transport`] into a [`SimBroker`].
#[derive(Clone)]
pub struct SimTransport {
    broker: SimBroker,
}

impl Transport for SimTransport {
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<TransportLink, TransportError>> + Send {
        let broker = self.broker.clone();
        async move {
            // Connecting is never instantaneous.
            tokio::task::yield_now().await;
            let (id, from_server) = broker.accept(&request.credential)?;

            let (to_server_tx, to_server_rx) = mpsc::channel(CHANNEL_CAPACITY);
            let handle = tokio::spawn(serve(broker, id, to_server_rx));
            Ok(TransportLink::new(to_server_tx, from_server, handle.abort_handle()))
        }
    }
}

async fn serve(broker: SimBroker, connection_id: u64, mut to_server: mpsc::Receiver<String>) {
    while let Some(text) = to_server.recv().await {
        broker.receive(connection_id, &text);
    }
    broker.disconnect(connection_id);
}
