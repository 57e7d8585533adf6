//! Transport seam.
//!
//! A [`Transport`] turns a credential into a [`TransportLink`]: a pair of
//! bounded channels bridged to a socket by a background task. The runtime
//! writes encoded frames to `outbound` and drains `inbound` in order; it never
//! touches the socket itself.

use std::future::Future;

use parley_core::Credential;
use thiserror::Error;
use tokio::{sync::mpsc, task::AbortHandle};

/// Parameters of one connect attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Sent with the upgrade request.
    pub credential: Credential,
}

/// Something the socket task observed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// One WebSocket text message (a STOMP frame or a heart-beat).
    Text(String),
    /// The socket closed or failed. Nothing follows.
    Closed {
        /// Close reason or error.
        reason: String,
    },
}

/// Connect failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The server refused the credential during the upgrade (HTTP 401/403).
    #[error("connection rejected with HTTP {status}")]
    Rejected {
        /// HTTP status code.
        status: u16,
    },

    /// Network or handshake failure.
    #[error("connection failed: {0}")]
    Connection(String),
}

impl TransportError {
    /// Map an upgrade HTTP status: 401/403 reject the credential, anything
    /// else is a connection failure.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Rejected { status },
            _ => Self::Connection(format!("upgrade failed with HTTP {status}")),
        }
    }

    /// True if retrying with the same credential cannot succeed.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::Rejected { .. })
    }
}

/// An open connection.
///
/// Dropping the link stops its socket task immediately. Use
/// [`TransportLink::close`] to let queued frames drain first.
#[derive(Debug)]
pub struct TransportLink {
    /// Encoded frames to the server.
    pub outbound: mpsc::Sender<String>,
    /// Events from the server, in arrival order.
    pub inbound: mpsc::Receiver<TransportEvent>,
    abort_handle: Option<AbortHandle>,
}

impl TransportLink {
    /// Link whose socket task is `abort_handle`.
    pub fn new(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
        abort_handle: AbortHandle,
    ) -> Self {
        Self { outbound, inbound, abort_handle: Some(abort_handle) }
    }

    /// Link with no task behind it (in-memory transports).
    pub fn detached(
        outbound: mpsc::Sender<String>,
        inbound: mpsc::Receiver<TransportEvent>,
    ) -> Self {
        Self { outbound, inbound, abort_handle: None }
    }

    /// Stop the socket task now, discarding anything queued.
    pub fn stop(&self) {
        if let Some(handle) = &self.abort_handle {
            handle.abort();
        }
    }

    /// Close gracefully: the task flushes queued frames, closes the socket
    /// and exits on its own.
    pub fn close(mut self) {
        self.abort_handle = None;
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Opens connections to the broker.
pub trait Transport: Send + Sync + 'static {
    /// Connect and return the link, or why it failed.
    fn connect(
        &self,
        request: ConnectRequest,
    ) -> impl Future<Output = Result<TransportLink, TransportError>> + Send;
}
