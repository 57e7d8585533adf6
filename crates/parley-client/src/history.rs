//! History endpoint seam.

use std::future::Future;

use parley_core::Credential;
use parley_proto::{ChatMessage, RoomId};
use thiserror::Error;

/// One history page to fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HistoryQuery {
    /// Room to load.
    pub room_id: RoomId,
    /// Zero-based page.
    pub page: u32,
    /// Page size.
    pub size: u32,
    /// Credential captured when the session opened.
    pub credential: Credential,
}

/// History fetch failures. All of them leave the feed as it is.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Request never produced a response.
    #[error("history request failed: {0}")]
    Request(String),

    /// Non-success HTTP status.
    #[error("history request returned HTTP {status}")]
    Status {
        /// HTTP status code.
        status: u16,
    },

    /// Response body was not a message list.
    #[error("invalid history response: {0}")]
    Decode(String),
}

/// Loads persisted messages for a room.
pub trait HistoryLoader: Send + Sync + 'static {
    /// Fetch one page, oldest first or in any order; the store sorts.
    fn load(
        &self,
        query: HistoryQuery,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send;
}
