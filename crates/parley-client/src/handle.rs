//! Caller-facing API.

use std::sync::Arc;

use parley_core::{ConnectionState, Environment, SessionError};
use parley_proto::{ChatMessage, RoomId};
use tokio::sync::{mpsc, oneshot, watch};

use crate::{
    auth::AuthProvider,
    config::ClientConfig,
    error::ClientError,
    history::HistoryLoader,
    runtime::{Command, Outputs, SessionRuntime},
    system_env::SystemEnv,
    transport::Transport,
};

/// Observable session status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    /// Connection state.
    pub state: ConnectionState,
    /// Active room.
    pub room_id: Option<RoomId>,
    /// Consecutive reconnect attempts since the last successful handshake.
    pub reconnect_attempts: u32,
    /// Most recent error, cleared by the next successful handshake.
    pub error: Option<SessionError>,
}

/// Opens chat sessions.
///
/// Cheap to clone; every session gets its own runtime task.
pub struct ChatClient<T, H, E = SystemEnv> {
    transport: Arc<T>,
    history: Arc<H>,
    auth: Arc<dyn AuthProvider>,
    env: E,
    config: ClientConfig,
}

impl<T, H, E: Clone> Clone for ChatClient<T, H, E> {
    fn clone(&self) -> Self {
        Self {
            transport: Arc::clone(&self.transport),
            history: Arc::clone(&self.history),
            auth: Arc::clone(&self.auth),
            env: self.env.clone(),
            config: self.config.clone(),
        }
    }
}

impl<T, H> ChatClient<T, H, SystemEnv>
where
    T: Transport,
    H: HistoryLoader,
{
    /// Client on the tokio clock with default configuration.
    pub fn new(transport: T, history: H, auth: impl AuthProvider) -> Self {
        Self::with_env(transport, history, auth, SystemEnv)
    }
}

impl<T, H, E> ChatClient<T, H, E>
where
    T: Transport,
    H: HistoryLoader,
    E: Environment,
{
    /// Client on a custom environment.
    pub fn with_env(transport: T, history: H, auth: impl AuthProvider, env: E) -> Self {
        Self {
            transport: Arc::new(transport),
            history: Arc::new(history),
            auth: Arc::new(auth),
            env,
            config: ClientConfig::default(),
        }
    }

    /// Replace the configuration for sessions opened from now on.
    #[must_use]
    pub fn with_config(mut self, config: ClientConfig) -> Self {
        self.config = config;
        self
    }

    /// Configuration in effect.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Open a session on `room_id`.
    ///
    /// Reads the credential once; every reconnect of this session reuses it.
    /// Connecting and history loading start in the background. Must be called
    /// from within a tokio runtime.
    pub fn open(&self, room_id: RoomId) -> Result<SessionHandle, ClientError> {
        let credential = self.auth.credential().ok_or(ClientError::MissingCredential)?;

        let (commands_tx, commands_rx) = mpsc::channel(self.config.channel_capacity);
        let (status_tx, status_rx) = watch::channel(SessionStatus::initial());
        let (messages_tx, messages_rx) = watch::channel(Vec::new());

        let runtime = SessionRuntime::new(
            self.config.clone(),
            self.env.clone(),
            Arc::clone(&self.transport),
            Arc::clone(&self.history),
            credential,
            commands_rx,
            Outputs { status: status_tx, messages: messages_tx },
        );
        tokio::spawn(runtime.run(room_id));

        Ok(SessionHandle { commands: commands_tx, status: status_rx, messages: messages_rx })
    }
}

/// Handle to one running session.
///
/// Dropping it tears the session down as if [`SessionHandle::close`] had been
/// called, without waiting.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    status: watch::Receiver<SessionStatus>,
    messages: watch::Receiver<Vec<ChatMessage>>,
}

impl SessionHandle {
    /// Latest published status.
    pub fn status(&self) -> SessionStatus {
        self.status.borrow().clone()
    }

    /// Latest ordered feed.
    pub fn messages(&self) -> Vec<ChatMessage> {
        self.messages.borrow().clone()
    }

    /// Receiver notified on every status change.
    pub fn watch_status(&self) -> watch::Receiver<SessionStatus> {
        self.status.clone()
    }

    /// Receiver notified on every feed change.
    pub fn watch_messages(&self) -> watch::Receiver<Vec<ChatMessage>> {
        self.messages.clone()
    }

    /// Wait until the status satisfies `predicate`, returning that status.
    ///
    /// Fails with [`ClientError::RuntimeGone`] if the session stops first.
    pub async fn wait_for_status(
        &self,
        mut predicate: impl FnMut(&SessionStatus) -> bool,
    ) -> Result<SessionStatus, ClientError> {
        let mut status = self.status.clone();
        let seen = status.wait_for(|s| predicate(s)).await.map_err(|_| ClientError::RuntimeGone)?;
        Ok(seen.clone())
    }

    /// Wait until the session reaches `state`.
    pub async fn wait_for_state(&self, state: ConnectionState) -> Result<SessionStatus, ClientError> {
        self.wait_for_status(|s| s.state == state).await
    }

    /// Wait until the feed satisfies `predicate`, returning that feed.
    pub async fn wait_for_messages(
        &self,
        mut predicate: impl FnMut(&[ChatMessage]) -> bool,
    ) -> Result<Vec<ChatMessage>, ClientError> {
        let mut messages = self.messages.clone();
        let seen =
            messages.wait_for(|m| predicate(m)).await.map_err(|_| ClientError::RuntimeGone)?;
        Ok(seen.clone())
    }

    /// Publish `content` to the active room.
    ///
    /// Fails immediately, without reaching the runtime, unless the last
    /// published state is `Connected`.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), ClientError> {
        let state = self.status.borrow().state;
        if state != ConnectionState::Connected {
            return Err(SessionError::SendWhileDisconnected { state }.into());
        }

        let (reply, rx) = oneshot::channel();
        self.request(Command::Send { content: content.into(), reply }).await?;
        rx.await.map_err(|_| ClientError::RuntimeGone)?.map_err(ClientError::from)
    }

    /// Leave the current room and enter `room_id` with the same credential.
    pub async fn switch_room(&self, room_id: RoomId) -> Result<(), ClientError> {
        let (reply, rx) = oneshot::channel();
        self.request(Command::SwitchRoom { room_id, reply }).await?;
        rx.await.map_err(|_| ClientError::RuntimeGone)?.map_err(ClientError::from)
    }

    /// Unsubscribe, disconnect and stop the runtime, waiting for it to finish.
    ///
    /// A session that already stopped closes trivially.
    pub async fn close(self) {
        let (reply, rx) = oneshot::channel();
        if self.request(Command::Close { reply }).await.is_ok() {
            let _ = rx.await;
        }
    }

    async fn request(&self, command: Command) -> Result<(), ClientError> {
        self.commands.send(command).await.map_err(|_| ClientError::RuntimeGone)
    }
}
