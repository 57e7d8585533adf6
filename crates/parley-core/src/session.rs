//! Chat session facade.
//!
//! [`ChatSession`] composes the transport [`Connection`], the
//! [`SubscriptionRegistry`] and the [`MessageStore`] for one active room and
//! owns the Publisher operation. Like its parts it is sans-IO: every method
//! takes the current instant and returns [`SessionAction`]s for the driver.
//!
//! # Flow
//!
//! ```text
//! open(room) ──> OpenTransport + LoadHistory
//! transport_opened ──> SendFrame(CONNECT)
//! CONNECTED ──> SendFrame(SUBSCRIBE) + StateChanged(Connected)
//! MESSAGE ──> store.append ──> FeedChanged
//! history_loaded ──> store.seed ──> FeedChanged
//! loss ──> StateChanged(Reconnecting) ... CONNECTED ──> SUBSCRIBE + LoadHistory
//! close ──> UNSUBSCRIBE + DISCONNECT + CloseTransport, store cleared
//! ```
//!
//! No error escapes the frame-handling path: malformed frames are logged and
//! recorded as the last error, connection-level failures become state
//! transitions.

use std::{ops::Sub, time::Duration};

use parley_proto::{
    ChatMessage, ClientFrame, PublishBody, RoomId, ServerFrame, destination::room_publish_destination,
};
use tracing::{debug, info, warn};

use crate::{
    connection::{Connection, ConnectionAction, ConnectionConfig, ConnectionState},
    credential::Credential,
    error::SessionError,
    store::{AppendOutcome, MessageStore, StoreToken},
    subscription::SubscriptionRegistry,
};

/// Page size requested from the history endpoint.
pub const DEFAULT_HISTORY_PAGE_SIZE: u32 = 50;

/// Session configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Transport session settings.
    pub connection: ConnectionConfig,
    /// Messages per history request.
    pub history_page_size: u32,
    /// Reload history after every resumed connection to repair messages lost
    /// while disconnected.
    pub reload_history_on_reconnect: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            history_page_size: DEFAULT_HISTORY_PAGE_SIZE,
            reload_history_on_reconnect: true,
        }
    }
}

/// A history snapshot the driver should fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryRequest {
    /// Store entry the result belongs to; pass it back to
    /// [`ChatSession::history_loaded`].
    pub token: StoreToken,
    /// Room to load.
    pub room_id: RoomId,
    /// Zero-based page.
    pub page: u32,
    /// Page size.
    pub size: u32,
}

/// Actions returned by the session for the driver to execute.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionAction {
    /// Open a physical connection with this credential.
    OpenTransport {
        /// Credential for the upgrade request.
        credential: Credential,
    },
    /// Send this frame on the open transport.
    SendFrame(ClientFrame),
    /// Close the physical connection.
    CloseTransport {
        /// Reason for closing.
        reason: String,
    },
    /// Fetch a history snapshot.
    LoadHistory(HistoryRequest),
    /// Connection state changed.
    StateChanged(ConnectionState),
    /// The ordered feed changed.
    FeedChanged,
}

/// One chat session: a connection, its room subscription and the feed.
///
/// # Invariants
///
/// - The store, the registry selection and `room_id` always name the same
///   room.
/// - While `Connected` with a room selected, exactly one subscription is
///   active.
#[derive(Debug, Clone)]
pub struct ChatSession<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    config: SessionConfig,
    connection: Connection<I>,
    subscriptions: SubscriptionRegistry,
    store: MessageStore,
    room_id: Option<RoomId>,
    last_error: Option<SessionError>,
}

impl<I> ChatSession<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Disconnected session with no room.
    pub fn new(config: SessionConfig) -> Self {
        Self {
            connection: Connection::new(config.connection.clone()),
            config,
            subscriptions: SubscriptionRegistry::new(),
            store: MessageStore::new(),
            room_id: None,
            last_error: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection.state()
    }

    /// Active room.
    pub fn room_id(&self) -> Option<RoomId> {
        self.room_id
    }

    /// Ordered feed for the active room.
    pub fn messages(&self) -> &[ChatMessage] {
        self.store.messages()
    }

    /// Message store.
    pub fn store(&self) -> &MessageStore {
        &self.store
    }

    /// Subscription registry.
    pub fn subscriptions(&self) -> &SubscriptionRegistry {
        &self.subscriptions
    }

    /// Transport session.
    pub fn connection(&self) -> &Connection<I> {
        &self.connection
    }

    /// Consecutive reconnect attempts since the last successful handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.connection.reconnect_attempts()
    }

    /// Most recent error, cleared on every successful handshake.
    pub fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }

    /// Configuration in effect.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Enter `room_id`, connecting with `credential`.
    ///
    /// Idempotent while a connection for the same room is active. A different
    /// room tears the current one down first (unsubscribe, disconnect, clear
    /// the feed) and then reconnects. History is requested in parallel with
    /// the connect.
    ///
    /// # Errors
    ///
    /// Never fails in practice; the `Result` mirrors [`Connection::open`].
    pub fn open(
        &mut self,
        room_id: RoomId,
        credential: Credential,
        now: I,
    ) -> Result<Vec<SessionAction>, SessionError> {
        let before = self.state();
        if self.room_id == Some(room_id) && self.is_active() {
            return Ok(Vec::new());
        }

        let mut actions = if self.is_active() { self.teardown() } else { Vec::new() };

        info!(room_id, "opening chat session");
        let token = self.store.reset(room_id);
        self.room_id = Some(room_id);
        self.last_error = None;
        if let Some(frame) = self.subscriptions.select(room_id, token) {
            actions.push(SessionAction::SendFrame(frame));
        }

        let opened = self.connection.open(credential, now)?;
        self.apply(opened, &mut actions);
        actions.push(SessionAction::LoadHistory(self.history_request(token)));
        actions.push(SessionAction::FeedChanged);

        self.push_state_change(before, &mut actions);
        Ok(actions)
    }

    /// Release the room: unsubscribe, disconnect, stop the reconnect timer
    /// and clear the feed.
    ///
    /// Safe to call in any state and any number of times.
    pub fn close(&mut self) -> Vec<SessionAction> {
        let before = self.state();
        let mut actions = self.teardown();
        self.push_state_change(before, &mut actions);
        actions
    }

    /// The transport requested by `OpenTransport` is up.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if no connect is pending
    pub fn transport_opened(&mut self, now: I) -> Result<Vec<SessionAction>, SessionError> {
        let mut actions = Vec::new();
        let opened = self.connection.transport_opened(now)?;
        self.apply(opened, &mut actions);
        Ok(actions)
    }

    /// The transport failed to connect or closed.
    pub fn transport_closed(&mut self, reason: &str, now: I) -> Vec<SessionAction> {
        let before = self.state();
        let mut actions = Vec::new();
        let lost = self.connection.transport_lost(reason, now);
        self.apply(lost, &mut actions);
        self.push_state_change(before, &mut actions);
        actions
    }

    /// The transport connect was refused for authentication reasons.
    pub fn transport_rejected(&mut self, reason: &str) -> Vec<SessionAction> {
        let before = self.state();
        let mut actions = Vec::new();
        match self.connection.auth_rejected(reason) {
            Ok(rejected) => self.apply(rejected, &mut actions),
            Err(err) => debug!(%err, "ignoring late auth rejection"),
        }
        self.push_state_change(before, &mut actions);
        actions
    }

    /// Decode and handle one inbound WebSocket text message.
    ///
    /// Malformed frames are dropped; the connection stays up.
    pub fn handle_text(&mut self, text: &str, now: I) -> Vec<SessionAction> {
        self.connection.record_activity(now);
        match ServerFrame::parse(text) {
            Ok(frame) => self.handle_frame(frame, now),
            Err(err) => {
                warn!(%err, "dropping malformed frame");
                self.last_error = Some(err.into());
                Vec::new()
            },
        }
    }

    /// Handle one decoded inbound frame.
    pub fn handle_frame(&mut self, frame: ServerFrame, now: I) -> Vec<SessionAction> {
        let before = self.state();
        let mut actions = Vec::new();

        match self.connection.handle_frame(&frame, now) {
            Ok(connection_actions) => self.apply(connection_actions, &mut actions),
            Err(err) => {
                warn!(%err, "dropping frame");
                self.last_error = Some(err);
                return actions;
            },
        }

        if let ServerFrame::Message { subscription, message, .. } = frame {
            self.deliver(&subscription, message, &mut actions);
        }

        self.push_state_change(before, &mut actions);
        actions
    }

    /// Periodic maintenance: heart-beats, timeouts, reconnect timer.
    pub fn tick(&mut self, now: I) -> Vec<SessionAction> {
        let before = self.state();
        let mut actions = Vec::new();
        let ticked = self.connection.tick(now);
        self.apply(ticked, &mut actions);
        self.push_state_change(before, &mut actions);
        actions
    }

    /// Publish `content` to the active room.
    ///
    /// Fails fast without emitting anything unless connected. The message is
    /// not echoed locally; the broker's rebroadcast delivers the sender's
    /// copy.
    ///
    /// # Errors
    ///
    /// - `SessionError::SendWhileDisconnected` unless `Connected`
    /// - `SessionError::InvalidContent` if `content` is blank
    pub fn send(&mut self, content: &str, now: I) -> Result<Vec<SessionAction>, SessionError> {
        let state = self.state();
        let Some(room_id) = self.room_id.filter(|_| state == ConnectionState::Connected) else {
            return Err(SessionError::SendWhileDisconnected { state });
        };
        if content.trim().is_empty() {
            return Err(SessionError::InvalidContent);
        }

        let frame = ClientFrame::Send {
            destination: room_publish_destination(room_id),
            body: PublishBody { content: content.to_string() },
        };
        let mut actions = Vec::new();
        let sent = self.connection.send(frame, now)?;
        self.apply(sent, &mut actions);
        Ok(actions)
    }

    /// Merge a history snapshot requested by [`SessionAction::LoadHistory`].
    ///
    /// Results for an earlier room entry are discarded.
    pub fn history_loaded(
        &mut self,
        token: StoreToken,
        history: Vec<ChatMessage>,
    ) -> Vec<SessionAction> {
        let count = history.len();
        match self.store.seed_at(token, history) {
            None => {
                debug!(room_id = token.room_id, "discarding history for a previous room entry");
                Vec::new()
            },
            Some(0) => Vec::new(),
            Some(inserted) => {
                debug!(room_id = token.room_id, count, inserted, "history merged");
                vec![SessionAction::FeedChanged]
            },
        }
    }

    /// A history request failed. The feed keeps whatever it has.
    pub fn history_failed(&mut self, token: StoreToken, reason: &str) {
        if self.store.token() == Some(token) {
            warn!(room_id = token.room_id, reason, "history load failed");
            self.last_error = Some(SessionError::History(reason.to_string()));
        }
    }

    fn is_active(&self) -> bool {
        matches!(
            self.state(),
            ConnectionState::Connecting | ConnectionState::Connected | ConnectionState::Reconnecting
        )
    }

    fn history_request(&self, token: StoreToken) -> HistoryRequest {
        HistoryRequest {
            token,
            room_id: token.room_id,
            page: 0,
            size: self.config.history_page_size,
        }
    }

    fn teardown(&mut self) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        let connected = self.state() == ConnectionState::Connected;

        // The UNSUBSCRIBE only means something on a live transport.
        if let Some(frame) = self.subscriptions.unsubscribe().filter(|_| connected) {
            actions.push(SessionAction::SendFrame(frame));
        }
        let closed = self.connection.close();
        self.apply(closed, &mut actions);

        if self.room_id.take().is_some() || !self.store.is_empty() {
            self.store.clear();
            actions.push(SessionAction::FeedChanged);
        }
        actions
    }

    fn deliver(&mut self, subscription: &str, message: ChatMessage, actions: &mut Vec<SessionAction>) {
        let Some((room_id, token)) = self.subscriptions.route(subscription) else {
            debug!(subscription, id = message.id, "dropping delivery for retired subscription");
            return;
        };

        match self.store.append_at(token, message) {
            AppendOutcome::Inserted => actions.push(SessionAction::FeedChanged),
            AppendOutcome::Duplicate => debug!(room_id, "duplicate delivery ignored"),
            AppendOutcome::Stale => debug!(room_id, "delivery for a previous room entry ignored"),
            AppendOutcome::WrongRoom => {
                warn!(room_id, "delivery for another room on this subscription");
            },
        }
    }

    /// Translate connection actions, reacting to lifecycle notifications.
    fn apply(&mut self, connection_actions: Vec<ConnectionAction>, actions: &mut Vec<SessionAction>) {
        for action in connection_actions {
            match action {
                ConnectionAction::OpenTransport { credential } => {
                    actions.push(SessionAction::OpenTransport { credential });
                },
                ConnectionAction::SendFrame(frame) => actions.push(SessionAction::SendFrame(frame)),
                ConnectionAction::CloseTransport { reason } => {
                    actions.push(SessionAction::CloseTransport { reason });
                },
                ConnectionAction::Established { resumed } => {
                    self.last_error = None;
                    if let Some(frame) = self.subscriptions.establish() {
                        actions.push(SessionAction::SendFrame(frame));
                    }
                    let reload = resumed && self.config.reload_history_on_reconnect;
                    if let Some(token) = self.store.token().filter(|_| reload) {
                        actions.push(SessionAction::LoadHistory(self.history_request(token)));
                    }
                },
                ConnectionAction::Interrupted(err) => {
                    info!(%err, "connection interrupted, reconnecting");
                    self.subscriptions.invalidate();
                    self.last_error = Some(err);
                },
                ConnectionAction::Failed(err) => {
                    warn!(%err, "session failed");
                    // Transport is gone; no UNSUBSCRIBE can be sent.
                    let _ = self.subscriptions.unsubscribe();
                    self.last_error = Some(err);
                },
            }
        }
    }

    fn push_state_change(&self, before: ConnectionState, actions: &mut Vec<SessionAction>) {
        let after = self.state();
        if after != before {
            debug!(%before, %after, "connection state changed");
            actions.push(SessionAction::StateChanged(after));
        }
    }
}
