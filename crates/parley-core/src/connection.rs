//! Transport session state machine.
//!
//! Owns the lifecycle of the single physical connection: STOMP handshake,
//! heart-beats, handshake and heart-beat timeouts, fixed-delay reconnects and
//! graceful shutdown. Uses the action pattern: methods take time as input and
//! return actions for the driver to execute, so the machine never performs
//! I/O and never reads a clock.
//!
//! # State Machine
//!
//! ```text
//!                  open                CONNECTED
//! ┌──────────────┐ ────> ┌────────────┐ ───────> ┌───────────┐
//! │ Disconnected │       │ Connecting │          │ Connected │
//! └──────────────┘ <──── └────────────┘          └───────────┘
//!        ↑          close      │  │  network loss  │     ↑
//!        │                     │  ↓                ↓     │ CONNECTED
//!        │                     │ ┌──────────────────┐    │
//!        │                     │ │   Reconnecting   │────┘
//!        │                     │ └──────────────────┘
//!        │              auth rejected │ auth rejected / attempts exhausted
//!        │                     ↓      ↓
//!        │                    ┌────────┐
//!        └──── open ──────────│ Failed │   (ERROR on Connected also lands here)
//!                             └────────┘
//! ```
//!
//! `Failed` is terminal for the current credential: nothing retries until the
//! caller opens again.

use std::{fmt, ops::Sub, time::Duration};

use parley_proto::{ClientFrame, HeartBeat, Negotiated, ServerFrame};

use crate::{credential::Credential, error::SessionError};

/// Time allowed from starting a transport connect to receiving `CONNECTED`.
pub const DEFAULT_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Heart-beat interval offered in both directions.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Fixed delay between losing the connection and the next attempt.
pub const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Virtual host sent in `CONNECT`.
pub const DEFAULT_HOST: &str = "localhost";

/// Silence longer than this multiple of the incoming heart-beat interval is a
/// network loss.
pub const HEARTBEAT_TIMEOUT_FACTOR: u32 = 2;

/// Receipt id attached to the closing `DISCONNECT`.
pub const DISCONNECT_RECEIPT: &str = "parley-disconnect";

/// Actions returned by the connection state machine.
///
/// The driver executes these:
/// - `OpenTransport`: start a transport connect carrying the credential
/// - `SendFrame`: encode and send on the open transport
/// - `CloseTransport`: drop the transport (if any)
/// - `Established`, `Interrupted`, `Failed`: notifications for the session
///   layer, no I/O
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionAction {
    /// Open a new physical connection.
    OpenTransport {
        /// Credential for the upgrade request and `CONNECT` frame.
        credential: Credential,
    },

    /// Send this frame to the broker.
    SendFrame(ClientFrame),

    /// Close the physical connection.
    CloseTransport {
        /// Reason for closing.
        reason: String,
    },

    /// Handshake completed; subscriptions must be (re-)issued.
    Established {
        /// True if an earlier connection of this session was established.
        resumed: bool,
    },

    /// Connection lost; a reconnect is scheduled.
    Interrupted(SessionError),

    /// Connection failed for good.
    Failed(SessionError),
}

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Not connected, nothing scheduled.
    Disconnected,
    /// First connection attempt in progress.
    Connecting,
    /// Handshake complete; frames flow.
    Connected,
    /// Connection lost; waiting for or performing a reconnect attempt.
    Reconnecting,
    /// Terminal failure; requires a fresh open.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        })
    }
}

/// Connection configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Timeout for transport connect plus STOMP handshake.
    pub handshake_timeout: Duration,
    /// Smallest interval at which we emit heart-beats.
    pub heartbeat_outgoing: Duration,
    /// Interval at which we want to hear from the broker.
    pub heartbeat_incoming: Duration,
    /// Delay before each reconnect attempt.
    pub reconnect_delay: Duration,
    /// Give up after this many consecutive failed reconnects. `None` retries
    /// forever.
    pub max_reconnect_attempts: Option<u32>,
    /// `host` header of `CONNECT`.
    pub host: String,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            handshake_timeout: DEFAULT_HANDSHAKE_TIMEOUT,
            heartbeat_outgoing: DEFAULT_HEARTBEAT_INTERVAL,
            heartbeat_incoming: DEFAULT_HEARTBEAT_INTERVAL,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            max_reconnect_attempts: None,
            host: DEFAULT_HOST.to_string(),
        }
    }
}

/// Where an active connection is within its lifecycle.
#[derive(Debug, Clone, Copy)]
enum Phase<I> {
    /// Disconnected or Failed.
    Idle,
    /// Waiting out the reconnect delay.
    Backoff { since: I },
    /// Transport connect or STOMP handshake in flight.
    Opening { since: I, transport_up: bool },
    /// Connected.
    Open,
}

/// Transport session state machine.
///
/// Pure: no I/O, no clock. Generic over `Instant` so tests can drive it with
/// virtual time.
#[derive(Debug, Clone)]
pub struct Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    state: ConnectionState,
    phase: Phase<I>,
    config: ConnectionConfig,
    /// Captured by `open`, reused for every reconnect.
    credential: Option<Credential>,
    /// Consecutive reconnect attempts since the last `Established`.
    reconnect_attempts: u32,
    /// Set once the first handshake of this session succeeds.
    established_once: bool,
    heartbeat: Negotiated,
    last_received: Option<I>,
    last_sent: Option<I>,
}

impl<I> Connection<I>
where
    I: Copy + Ord + Send + Sync + Sub<Output = Duration>,
{
    /// Create a connection in [`ConnectionState::Disconnected`].
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            phase: Phase::Idle,
            config,
            credential: None,
            reconnect_attempts: 0,
            established_once: false,
            heartbeat: Negotiated::default(),
            last_received: None,
            last_sent: None,
        }
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Consecutive reconnect attempts since the last successful handshake.
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Heart-beat intervals negotiated with the broker. Disabled until
    /// connected.
    pub fn heartbeat(&self) -> Negotiated {
        self.heartbeat
    }

    /// True while the state machine waits for the driver to report a
    /// transport connect result.
    pub fn awaiting_transport(&self) -> bool {
        matches!(self.phase, Phase::Opening { transport_up: false, .. })
    }

    /// Start connecting with `credential`.
    ///
    /// Valid from `Disconnected` and `Failed`. The credential is kept for
    /// every reconnect of this session and never re-read.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if a connection is already active
    pub fn open(
        &mut self,
        credential: Credential,
        now: I,
    ) -> Result<Vec<ConnectionAction>, SessionError> {
        if !matches!(self.state, ConnectionState::Disconnected | ConnectionState::Failed) {
            return Err(SessionError::InvalidState { state: self.state, operation: "open" });
        }

        self.state = ConnectionState::Connecting;
        self.phase = Phase::Opening { since: now, transport_up: false };
        self.reconnect_attempts = 0;
        self.established_once = false;
        self.heartbeat = Negotiated::default();
        self.credential = Some(credential.clone());

        Ok(vec![ConnectionAction::OpenTransport { credential }])
    }

    /// Transport connected; send the STOMP `CONNECT`.
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if no transport connect is pending
    pub fn transport_opened(&mut self, now: I) -> Result<Vec<ConnectionAction>, SessionError> {
        let Phase::Opening { since, transport_up: false } = self.phase else {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "transport_opened",
            });
        };

        self.phase = Phase::Opening { since, transport_up: true };
        self.last_received = Some(now);
        self.last_sent = Some(now);

        let connect = ClientFrame::Connect {
            host: self.config.host.clone(),
            authorization: self.credential.as_ref().map(Credential::bearer),
            heart_beat: self.offered_heartbeat(),
        };
        Ok(vec![ConnectionAction::SendFrame(connect)])
    }

    /// Transport failed to connect or dropped.
    ///
    /// Ignored when no connection is active (late reports after a close).
    pub fn transport_lost(&mut self, reason: impl Into<String>, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Opening { .. } | Phase::Open => self.lose(reason.into(), now),
            Phase::Idle | Phase::Backoff { .. } => Vec::new(),
        }
    }

    /// Credential rejected while connecting (HTTP 401/403 on upgrade).
    ///
    /// # Errors
    ///
    /// - `SessionError::InvalidState` if not connecting
    pub fn auth_rejected(
        &mut self,
        reason: impl Into<String>,
    ) -> Result<Vec<ConnectionAction>, SessionError> {
        if !matches!(self.phase, Phase::Opening { .. }) {
            return Err(SessionError::InvalidState {
                state: self.state,
                operation: "auth_rejected",
            });
        }
        Ok(self.fail(SessionError::Auth { reason: reason.into() }))
    }

    /// Record inbound traffic. Any received octet counts as a heart-beat.
    pub fn record_activity(&mut self, now: I) {
        if matches!(self.phase, Phase::Open | Phase::Opening { transport_up: true, .. }) {
            self.last_received = Some(now);
        }
    }

    /// Process an inbound frame.
    ///
    /// `MESSAGE` and `RECEIPT` are accepted while connected and produce no
    /// actions; routing them is the session's job.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnexpectedFrame` if the frame is invalid for the
    ///   current state
    pub fn handle_frame(
        &mut self,
        frame: &ServerFrame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, SessionError> {
        self.record_activity(now);

        match (self.phase, frame) {
            (Phase::Opening { transport_up: true, .. }, ServerFrame::Connected { heart_beat, .. }) => {
                let resumed = self.established_once;
                self.state = ConnectionState::Connected;
                self.phase = Phase::Open;
                self.heartbeat = self.offered_heartbeat().negotiate(*heart_beat);
                self.reconnect_attempts = 0;
                self.established_once = true;
                self.last_sent = Some(now);

                Ok(vec![ConnectionAction::Established { resumed }])
            },

            (Phase::Opening { transport_up: true, .. }, ServerFrame::Error { message, detail }) => {
                let reason = message.clone().unwrap_or_else(|| detail.clone());
                Ok(self.fail(SessionError::Auth { reason }))
            },

            (Phase::Open, ServerFrame::Error { message, detail }) => {
                let message = message.clone().unwrap_or_else(|| detail.clone());
                Ok(self.fail(SessionError::Broker { message }))
            },

            (
                Phase::Open | Phase::Opening { transport_up: true, .. },
                ServerFrame::Heartbeat,
            )
            | (Phase::Open, ServerFrame::Message { .. } | ServerFrame::Receipt { .. }) => {
                Ok(Vec::new())
            },

            (_, frame) => {
                Err(SessionError::UnexpectedFrame { state: self.state, frame: frame.name() })
            },
        }
    }

    /// Periodic maintenance: timeouts, heart-beats and the reconnect timer.
    pub fn tick(&mut self, now: I) -> Vec<ConnectionAction> {
        match self.phase {
            Phase::Idle => Vec::new(),

            Phase::Backoff { since } => {
                if now - since < self.config.reconnect_delay {
                    return Vec::new();
                }
                let Some(credential) = self.credential.clone() else {
                    return self.fail(SessionError::Connection("no credential".to_string()));
                };
                self.reconnect_attempts += 1;
                self.phase = Phase::Opening { since: now, transport_up: false };

                vec![ConnectionAction::OpenTransport { credential }]
            },

            Phase::Opening { since, .. } => {
                let elapsed = now - since;
                if elapsed > self.config.handshake_timeout {
                    return self.lose(format!("handshake timeout after {elapsed:?}"), now);
                }
                Vec::new()
            },

            Phase::Open => {
                if let (Some(interval), Some(last)) = (self.heartbeat.incoming, self.last_received) {
                    let silence = now - last;
                    if silence > interval * HEARTBEAT_TIMEOUT_FACTOR {
                        return self.lose(format!("heart-beat timeout after {silence:?}"), now);
                    }
                }

                let due = match (self.heartbeat.outgoing, self.last_sent) {
                    (Some(interval), Some(last)) => now - last >= interval,
                    (Some(_), None) => true,
                    (None, _) => false,
                };
                if due {
                    self.last_sent = Some(now);
                    return vec![ConnectionAction::SendFrame(ClientFrame::Heartbeat)];
                }
                Vec::new()
            },
        }
    }

    /// Send a frame on the established connection.
    ///
    /// # Errors
    ///
    /// - `SessionError::SendWhileDisconnected` unless connected
    pub fn send(
        &mut self,
        frame: ClientFrame,
        now: I,
    ) -> Result<Vec<ConnectionAction>, SessionError> {
        if self.state != ConnectionState::Connected {
            return Err(SessionError::SendWhileDisconnected { state: self.state });
        }
        self.last_sent = Some(now);
        Ok(vec![ConnectionAction::SendFrame(frame)])
    }

    /// Close the connection and cancel any pending reconnect.
    ///
    /// Sends `DISCONNECT` when connected. A failed connection stays
    /// `Failed` so the error remains observable.
    pub fn close(&mut self) -> Vec<ConnectionAction> {
        let phase = self.phase;
        self.phase = Phase::Idle;
        self.heartbeat = Negotiated::default();
        self.last_received = None;
        self.last_sent = None;
        if self.state != ConnectionState::Failed {
            self.state = ConnectionState::Disconnected;
        }

        let reason = "client closed".to_string();
        match phase {
            Phase::Open => vec![
                ConnectionAction::SendFrame(ClientFrame::Disconnect {
                    receipt: DISCONNECT_RECEIPT.to_string(),
                }),
                ConnectionAction::CloseTransport { reason },
            ],
            Phase::Opening { .. } => vec![ConnectionAction::CloseTransport { reason }],
            Phase::Idle | Phase::Backoff { .. } => Vec::new(),
        }
    }

    fn offered_heartbeat(&self) -> HeartBeat {
        HeartBeat::new(self.config.heartbeat_outgoing, self.config.heartbeat_incoming)
    }

    /// Transient loss: back off and retry, or fail once attempts run out.
    fn lose(&mut self, reason: String, now: I) -> Vec<ConnectionAction> {
        let exhausted =
            self.config.max_reconnect_attempts.is_some_and(|max| self.reconnect_attempts >= max);
        if exhausted {
            let reason = format!("{reason} (gave up after {} reconnects)", self.reconnect_attempts);
            return self.fail(SessionError::Connection(reason));
        }

        self.state = ConnectionState::Reconnecting;
        self.phase = Phase::Backoff { since: now };
        self.heartbeat = Negotiated::default();
        self.last_received = None;
        self.last_sent = None;

        vec![
            ConnectionAction::CloseTransport { reason: reason.clone() },
            ConnectionAction::Interrupted(SessionError::Connection(reason)),
        ]
    }

    fn fail(&mut self, error: SessionError) -> Vec<ConnectionAction> {
        self.state = ConnectionState::Failed;
        self.phase = Phase::Idle;
        self.heartbeat = Negotiated::default();
        self.last_received = None;
        self.last_sent = None;

        vec![
            ConnectionAction::CloseTransport { reason: error.to_string() },
            ConnectionAction::Failed(error),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // Durations double as virtual instants: offsets from an arbitrary origin.
    type T = Duration;

    fn secs(s: u64) -> T {
        Duration::from_secs(s)
    }

    fn connected_frame(sx: u64, sy: u64) -> ServerFrame {
        ServerFrame::Connected {
            version: "1.2".to_string(),
            heart_beat: HeartBeat { outgoing_ms: sx, incoming_ms: sy },
        }
    }

    fn connected(config: ConnectionConfig) -> Connection<T> {
        let mut conn = Connection::new(config);
        conn.open(Credential::new("tok"), secs(0)).unwrap();
        conn.transport_opened(secs(0)).unwrap();
        conn.handle_frame(&connected_frame(10_000, 10_000), secs(0)).unwrap();
        conn
    }

    #[test]
    fn connection_lifecycle() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        assert_eq!(conn.state(), ConnectionState::Disconnected);

        let actions = conn.open(Credential::new("tok"), secs(0)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connecting);
        assert_eq!(actions, vec![ConnectionAction::OpenTransport {
            credential: Credential::new("tok")
        }]);

        let actions = conn.transport_opened(secs(1)).unwrap();
        match &actions[..] {
            [ConnectionAction::SendFrame(ClientFrame::Connect { authorization, .. })] => {
                assert_eq!(authorization.as_deref(), Some("Bearer tok"));
            },
            other => panic!("expected CONNECT, got {other:?}"),
        }

        let actions = conn.handle_frame(&connected_frame(0, 0), secs(1)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Connected);
        assert_eq!(actions, vec![ConnectionAction::Established { resumed: false }]);

        let actions = conn.close();
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(matches!(
            actions[..],
            [
                ConnectionAction::SendFrame(ClientFrame::Disconnect { .. }),
                ConnectionAction::CloseTransport { .. }
            ]
        ));
    }

    #[test]
    fn open_twice_is_rejected() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();

        let result = conn.open(Credential::new("tok"), secs(0));
        assert!(matches!(result, Err(SessionError::InvalidState { operation: "open", .. })));
    }

    #[test]
    fn network_loss_reconnects_after_fixed_delay() {
        let mut conn = connected(ConnectionConfig::default());

        let actions = conn.transport_lost("reset", secs(10));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert!(matches!(actions[1], ConnectionAction::Interrupted(SessionError::Connection(_))));

        assert!(conn.tick(secs(14)).is_empty());
        let actions = conn.tick(secs(15));
        assert!(matches!(actions[..], [ConnectionAction::OpenTransport { .. }]));
        assert_eq!(conn.reconnect_attempts(), 1);
        assert_eq!(conn.state(), ConnectionState::Reconnecting);

        conn.transport_opened(secs(15)).unwrap();
        let actions = conn.handle_frame(&connected_frame(0, 0), secs(16)).unwrap();
        assert_eq!(actions, vec![ConnectionAction::Established { resumed: true }]);
        assert_eq!(conn.reconnect_attempts(), 0);
    }

    #[test]
    fn reconnect_reuses_captured_credential() {
        let mut conn = connected(ConnectionConfig::default());
        conn.transport_lost("reset", secs(1));

        let actions = conn.tick(secs(6));
        assert_eq!(actions, vec![ConnectionAction::OpenTransport {
            credential: Credential::new("tok")
        }]);
    }

    #[test]
    fn initial_connect_failure_retries() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();

        conn.transport_lost("refused", secs(0));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn handshake_timeout_is_network_loss() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();
        conn.transport_opened(secs(1)).unwrap();

        assert!(conn.tick(secs(10)).is_empty());
        let actions = conn.tick(secs(11));
        assert!(matches!(actions[0], ConnectionAction::CloseTransport { .. }));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
    }

    #[test]
    fn auth_rejection_is_terminal() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("expired"), secs(0)).unwrap();

        let actions = conn.auth_rejected("HTTP 401").unwrap();
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(matches!(actions[1], ConnectionAction::Failed(SessionError::Auth { .. })));

        // No reconnect timer survives a failure.
        assert!(conn.tick(secs(60)).is_empty());
        assert_eq!(conn.state(), ConnectionState::Failed);
    }

    #[test]
    fn error_during_handshake_is_auth_failure() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();
        conn.transport_opened(secs(0)).unwrap();

        let error = ServerFrame::Error { message: Some("bad token".to_string()), detail: String::new() };
        let actions = conn.handle_frame(&error, secs(1)).unwrap();
        assert_eq!(actions[1], ConnectionAction::Failed(SessionError::Auth {
            reason: "bad token".to_string()
        }));
    }

    #[test]
    fn error_while_connected_is_broker_failure() {
        let mut conn = connected(ConnectionConfig::default());

        let error = ServerFrame::Error { message: None, detail: "shutting down".to_string() };
        let actions = conn.handle_frame(&error, secs(1)).unwrap();
        assert_eq!(conn.state(), ConnectionState::Failed);
        assert_eq!(actions[1], ConnectionAction::Failed(SessionError::Broker {
            message: "shutting down".to_string()
        }));
    }

    #[test]
    fn failed_connection_can_be_reopened() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("old"), secs(0)).unwrap();
        conn.auth_rejected("HTTP 403").unwrap();

        let actions = conn.open(Credential::new("fresh"), secs(1)).unwrap();
        assert_eq!(actions, vec![ConnectionAction::OpenTransport {
            credential: Credential::new("fresh")
        }]);
    }

    #[test]
    fn heartbeats_sent_at_negotiated_interval() {
        let mut conn = connected(ConnectionConfig::default());

        assert!(conn.tick(secs(9)).is_empty());
        conn.record_activity(secs(9));
        let actions = conn.tick(secs(10));
        assert_eq!(actions, vec![ConnectionAction::SendFrame(ClientFrame::Heartbeat)]);
        assert!(conn.tick(secs(11)).is_empty());
    }

    #[test]
    fn outbound_frames_postpone_heartbeat() {
        let mut conn = connected(ConnectionConfig::default());
        conn.record_activity(secs(8));
        conn.send(ClientFrame::Heartbeat, secs(8)).unwrap();

        assert!(conn.tick(secs(10)).is_empty());
    }

    #[test]
    fn silence_beyond_twice_incoming_interval_is_loss() {
        let mut conn = connected(ConnectionConfig::default());
        conn.handle_frame(&ServerFrame::Heartbeat, secs(5)).unwrap();

        conn.tick(secs(25));
        assert_eq!(conn.state(), ConnectionState::Connected);

        let actions = conn.tick(secs(26));
        assert_eq!(conn.state(), ConnectionState::Reconnecting);
        assert!(matches!(actions[1], ConnectionAction::Interrupted(_)));
    }

    #[test]
    fn disabled_heartbeats_never_time_out() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();
        conn.transport_opened(secs(0)).unwrap();
        conn.handle_frame(&connected_frame(0, 0), secs(0)).unwrap();

        assert!(conn.tick(secs(3600)).is_empty());
        assert_eq!(conn.state(), ConnectionState::Connected);
    }

    #[test]
    fn max_reconnect_attempts_ends_in_failure() {
        let config = ConnectionConfig { max_reconnect_attempts: Some(2), ..Default::default() };
        let mut conn = connected(config);
        let mut now = secs(0);

        conn.transport_lost("reset", now);
        for _ in 0..2 {
            now += secs(5);
            assert!(matches!(conn.tick(now)[..], [ConnectionAction::OpenTransport { .. }]));
            conn.transport_lost("refused", now);
        }

        assert_eq!(conn.state(), ConnectionState::Failed);
        assert!(conn.tick(now + secs(60)).is_empty());
    }

    #[test]
    fn send_requires_connected() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());

        let result = conn.send(ClientFrame::Heartbeat, secs(0));
        assert_eq!(
            result,
            Err(SessionError::SendWhileDisconnected { state: ConnectionState::Disconnected })
        );
    }

    #[test]
    fn message_before_connected_is_unexpected() {
        let mut conn = Connection::<T>::new(ConnectionConfig::default());
        conn.open(Credential::new("tok"), secs(0)).unwrap();
        conn.transport_opened(secs(0)).unwrap();

        let receipt = ServerFrame::Receipt { receipt_id: "1".to_string() };
        assert!(matches!(
            conn.handle_frame(&receipt, secs(0)),
            Err(SessionError::UnexpectedFrame { frame: "RECEIPT", .. })
        ));
    }

    #[test]
    fn close_during_backoff_cancels_reconnect() {
        let mut conn = connected(ConnectionConfig::default());
        conn.transport_lost("reset", secs(1));

        assert!(conn.close().is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
        assert!(conn.tick(secs(60)).is_empty());
    }

    #[test]
    fn late_transport_loss_after_close_is_ignored() {
        let mut conn = connected(ConnectionConfig::default());
        conn.close();

        assert!(conn.transport_lost("eof", secs(1)).is_empty());
        assert_eq!(conn.state(), ConnectionState::Disconnected);
    }
}
