//! Session runtime: the single task that owns a [`ChatSession`].
//!
//! Everything that touches session state happens inside one `tokio::select!`
//! loop, so the state machines never see concurrent calls:
//!
//! ```text
//!   SessionHandle ──commands──┐
//!   TransportLink ──inbound───┤
//!   connect / history tasks ──┼──> SessionRuntime ──> ChatSession
//!   tick interval ────────────┘          │
//!                                        └──> watch: status, feed
//! ```
//!
//! Connects and history loads run as spawned tasks. Their results come back
//! through the same loop tagged with the connect attempt or the store token
//! they were started for, and are dropped if the session has moved on. A
//! superseded connect is aborted, as are all outstanding tasks on room switch
//! and shutdown.
//!
//! Outbound frames never block the loop: a full writer queue counts as a lost
//! transport.

use std::{collections::VecDeque, sync::Arc};

use parley_core::{
    ChatSession, ConnectionState, Credential, Environment, HistoryRequest, SessionAction,
    SessionError, StoreToken,
};
use parley_proto::{ChatMessage, ClientFrame, RoomId};
use tokio::{
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot, watch,
    },
    task::AbortHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, info, warn};

use crate::{
    config::ClientConfig,
    handle::SessionStatus,
    history::{HistoryError, HistoryLoader, HistoryQuery},
    transport::{ConnectRequest, Transport, TransportError, TransportEvent, TransportLink},
};

/// Requests from a [`crate::SessionHandle`].
#[derive(Debug)]
pub(crate) enum Command {
    Send { content: String, reply: oneshot::Sender<Result<(), SessionError>> },
    SwitchRoom { room_id: RoomId, reply: oneshot::Sender<Result<(), SessionError>> },
    Close { reply: oneshot::Sender<()> },
}

/// Result of a spawned task.
#[derive(Debug)]
enum TaskResult {
    Connected { attempt: u64, result: Result<TransportLink, TransportError> },
    History { token: StoreToken, result: Result<Vec<ChatMessage>, HistoryError> },
}

enum Event {
    Command(Command),
    HandleDropped,
    Link(TransportEvent),
    Task(TaskResult),
    Tick,
}

/// Watch channels the runtime publishes to.
pub(crate) struct Outputs {
    pub status: watch::Sender<SessionStatus>,
    pub messages: watch::Sender<Vec<ChatMessage>>,
}

/// Drives one [`ChatSession`] against real (or simulated) I/O.
pub struct SessionRuntime<T, H, E>
where
    T: Transport,
    H: HistoryLoader,
    E: Environment,
{
    session: ChatSession<E::Instant>,
    env: E,
    config: ClientConfig,
    transport: Arc<T>,
    history: Arc<H>,
    credential: Credential,
    link: Option<TransportLink>,
    connect_attempt: u64,
    connecting: Option<AbortHandle>,
    history_loads: Vec<AbortHandle>,
    commands: mpsc::Receiver<Command>,
    tasks_tx: mpsc::Sender<TaskResult>,
    tasks_rx: mpsc::Receiver<TaskResult>,
    outputs: Outputs,
}

impl<T, H, E> SessionRuntime<T, H, E>
where
    T: Transport,
    H: HistoryLoader,
    E: Environment,
{
    pub(crate) fn new(
        config: ClientConfig,
        env: E,
        transport: Arc<T>,
        history: Arc<H>,
        credential: Credential,
        commands: mpsc::Receiver<Command>,
        outputs: Outputs,
    ) -> Self {
        let (tasks_tx, tasks_rx) = mpsc::channel(config.channel_capacity);
        Self {
            session: ChatSession::new(config.session.clone()),
            env,
            config,
            transport,
            history,
            credential,
            link: None,
            connect_attempt: 0,
            connecting: None,
            history_loads: Vec::new(),
            commands,
            tasks_tx,
            tasks_rx,
            outputs,
        }
    }

    /// Open `room_id` and run until the session is closed or its handle is
    /// dropped.
    pub(crate) async fn run(mut self, room_id: RoomId) {
        self.switch_room(room_id).unwrap_or_else(|err| warn!(%err, "open failed"));

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                command = self.commands.recv() => {
                    command.map_or(Event::HandleDropped, Event::Command)
                },
                event = next_link_event(&mut self.link) => Event::Link(event),
                Some(result) = self.tasks_rx.recv() => Event::Task(result),
                _ = ticker.tick() => Event::Tick,
            };

            if !self.dispatch(event) {
                break;
            }
            self.publish_status();
        }

        self.publish_status();
        debug!("session runtime stopped");
    }

    /// Handle one event. Returns `false` once the runtime should stop.
    fn dispatch(&mut self, event: Event) -> bool {
        let now = self.env.now();
        let actions = match event {
            Event::Command(Command::Send { content, reply }) => {
                let result = self.session.send(&content, now);
                let (actions, outcome) = match result {
                    Ok(actions) => (actions, Ok(())),
                    Err(err) => (Vec::new(), Err(err)),
                };
                self.execute(actions);
                let _ = reply.send(outcome);
                return true;
            },
            Event::Command(Command::SwitchRoom { room_id, reply }) => {
                let result = self.switch_room(room_id);
                let _ = reply.send(result);
                return true;
            },
            Event::Command(Command::Close { reply }) => {
                self.shutdown();
                let _ = reply.send(());
                return false;
            },
            Event::HandleDropped => {
                debug!("session handle dropped");
                self.shutdown();
                return false;
            },
            Event::Link(TransportEvent::Text(text)) => self.session.handle_text(&text, now),
            Event::Link(TransportEvent::Closed { reason }) => {
                info!(%reason, "transport closed");
                self.link = None;
                self.session.transport_closed(&reason, now)
            },
            Event::Task(TaskResult::Connected { attempt, result }) => {
                if attempt == self.connect_attempt {
                    self.connecting = None;
                }
                self.connected(attempt, result)
            },
            Event::Task(TaskResult::History { token, result }) => match result {
                Ok(history) => self.session.history_loaded(token, history),
                Err(err) => {
                    self.session.history_failed(token, &err.to_string());
                    Vec::new()
                },
            },
            Event::Tick => self.session.tick(now),
        };

        self.execute(actions);
        true
    }

    fn switch_room(&mut self, room_id: RoomId) -> Result<(), SessionError> {
        let now = self.env.now();
        let actions = self.session.open(room_id, self.credential.clone(), now)?;
        if !actions.is_empty() {
            // Entering a room starts fresh loads; anything older is for the
            // previous entry.
            self.abort_history_loads();
        }
        self.execute(actions);
        self.publish_status();
        Ok(())
    }

    fn shutdown(&mut self) {
        let actions = self.session.close();
        self.execute(actions);
        self.abort_connect();
        self.abort_history_loads();
        if let Some(link) = self.link.take() {
            link.close();
        }
    }

    fn abort_connect(&mut self) {
        if let Some(task) = self.connecting.take() {
            debug!(attempt = self.connect_attempt, "aborting connect in flight");
            task.abort();
        }
    }

    fn abort_history_loads(&mut self) {
        for task in self.history_loads.drain(..) {
            task.abort();
        }
    }

    fn connected(
        &mut self,
        attempt: u64,
        result: Result<TransportLink, TransportError>,
    ) -> Vec<SessionAction> {
        if attempt != self.connect_attempt || !self.session.connection().awaiting_transport() {
            // Dropping a stale link stops its socket task.
            debug!(attempt, current = self.connect_attempt, "discarding stale connect result");
            return Vec::new();
        }

        let now = self.env.now();
        match result {
            Ok(link) => {
                self.link = Some(link);
                self.session.transport_opened(now).unwrap_or_else(|err| {
                    warn!(%err, "transport opened in unexpected state");
                    Vec::new()
                })
            },
            Err(err) if err.is_auth() => {
                warn!(%err, "credential rejected");
                self.session.transport_rejected(&err.to_string())
            },
            Err(err) => {
                info!(%err, "connect failed");
                self.session.transport_closed(&err.to_string(), now)
            },
        }
    }

    fn execute(&mut self, actions: Vec<SessionAction>) {
        let mut queue: VecDeque<_> = actions.into();
        while let Some(action) = queue.pop_front() {
            match action {
                SessionAction::OpenTransport { credential } => self.open_transport(credential),
                SessionAction::SendFrame(frame) => {
                    if let Err(reason) = self.send_frame(&frame) {
                        let now = self.env.now();
                        queue.extend(self.session.transport_closed(reason, now));
                    }
                },
                SessionAction::CloseTransport { reason } => {
                    // Any connect still in flight belongs to the closed attempt.
                    self.abort_connect();
                    self.connect_attempt += 1;
                    if let Some(link) = self.link.take() {
                        debug!(%reason, "closing transport");
                        link.close();
                    }
                },
                SessionAction::LoadHistory(request) => self.load_history(request),
                SessionAction::StateChanged(state) => {
                    info!(%state, room_id = ?self.session.room_id(), "session state changed");
                },
                SessionAction::FeedChanged => {
                    let messages = self.session.messages().to_vec();
                    self.outputs.messages.send_replace(messages);
                },
            }
        }
    }

    fn open_transport(&mut self, credential: Credential) {
        self.abort_connect();
        self.connect_attempt += 1;
        self.link = None;

        let attempt = self.connect_attempt;
        let transport = Arc::clone(&self.transport);
        let results = self.tasks_tx.clone();
        debug!(attempt, "connecting");
        let task = tokio::spawn(async move {
            let result = transport.connect(ConnectRequest { credential }).await;
            let _ = results.send(TaskResult::Connected { attempt, result }).await;
        });
        self.connecting = Some(task.abort_handle());
    }

    /// Queue `frame` on the link without waiting.
    ///
    /// A full queue means the writer has stalled; the link is dropped and the
    /// returned reason must be reported as a transport loss.
    fn send_frame(&mut self, frame: &ClientFrame) -> Result<(), &'static str> {
        let Some(link) = &self.link else {
            debug!(frame = ?frame, "no transport for outbound frame");
            return Ok(());
        };
        match link.outbound.try_send(frame.encode()) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                warn!("outbound queue full, dropping transport");
                self.link = None;
                Err("outbound queue full")
            },
            Err(TrySendError::Closed(_)) => {
                // The socket task is gone; its Closed event drives recovery.
                debug!("transport writer closed");
                Ok(())
            },
        }
    }

    fn load_history(&mut self, request: HistoryRequest) {
        let HistoryRequest { token, room_id, page, size } = request;
        let query = HistoryQuery { room_id, page, size, credential: self.credential.clone() };
        let history = Arc::clone(&self.history);
        let results = self.tasks_tx.clone();
        debug!(room_id, page, size, "loading history");
        let task = tokio::spawn(async move {
            let result = history.load(query).await;
            let _ = results.send(TaskResult::History { token, result }).await;
        });
        self.history_loads.retain(|load| !load.is_finished());
        self.history_loads.push(task.abort_handle());
    }

    fn publish_status(&self) {
        let status = SessionStatus {
            state: self.session.state(),
            room_id: self.session.room_id(),
            reconnect_attempts: self.session.reconnect_attempts(),
            error: self.session.last_error().cloned(),
        };
        self.outputs.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            *current = status;
            true
        });
    }
}

/// Next event from the link, or never if there is none.
async fn next_link_event(link: &mut Option<TransportLink>) -> TransportEvent {
    match link {
        Some(link) => link.inbound.recv().await.unwrap_or_else(|| TransportEvent::Closed {
            reason: "transport task ended".to_string(),
        }),
        None => std::future::pending().await,
    }
}

impl SessionStatus {
    /// Status of a session that has not started yet.
    pub(crate) fn initial() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            room_id: None,
            reconnect_attempts: 0,
            error: None,
        }
    }
}
