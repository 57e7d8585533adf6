//! Simulated history endpoint.
//!
//! Serves the [`SimBroker`]'s persisted messages. The snapshot is taken when
//! the request arrives; [`SimHistory::hold`] keeps the response back so a
//! test can let live deliveries overtake it. Injected failures are decided
//! when the response goes out.

#![allow(clippy::disallowed_types, reason = "Synchronous locking operations only")]

use std::{
    future::Future,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use parley_client::{HistoryError, HistoryLoader, HistoryQuery};
use parley_proto::ChatMessage;
use tokio::sync::watch;

use crate::sim_broker::SimBroker;

#[derive(Default)]
struct HistoryState {
    failures_remaining: u32,
    requests: Vec<HistoryQuery>,
}

struct Inner {
    state: Mutex<HistoryState>,
    gate: watch::Sender<bool>,
}

/// [`HistoryLoader`] over a [`SimBroker`].
#[derive(Clone)]
pub struct SimHistory {
    broker: SimBroker,
    inner: Arc<Inner>,
}

impl SimHistory {
    /// Loader answering immediately from `broker`'s history.
    pub fn new(broker: SimBroker) -> Self {
        let (gate, _) = watch::channel(true);
        let inner = Inner { state: Mutex::new(HistoryState::default()), gate };
        Self { broker, inner: Arc::new(inner) }
    }

    fn lock(&self) -> MutexGuard<'_, HistoryState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Keep responses back until [`SimHistory::release`].
    pub fn hold(&self) {
        self.inner.gate.send_replace(false);
    }

    /// Let held and future responses through.
    pub fn release(&self) {
        self.inner.gate.send_replace(true);
    }

    /// Fail the next `count` responses with HTTP 500.
    pub fn fail_next(&self, count: u32) {
        self.lock().failures_remaining = count;
    }

    /// Requests received so far.
    pub fn requests(&self) -> Vec<HistoryQuery> {
        self.lock().requests.clone()
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.lock().requests.len()
    }

    /// Record the request and read the broker's history as it is now.
    fn snapshot(&self, query: &HistoryQuery) -> Vec<ChatMessage> {
        self.lock().requests.push(query.clone());

        // Page 0 holds the newest messages.
        let history = self.broker.history(query.room_id);
        let size = query.size as usize;
        let skip = query.page as usize * size;
        let mut page: Vec<_> = history.into_iter().rev().skip(skip).take(size).collect();
        page.reverse();
        page
    }

    fn take_failure(&self) -> bool {
        let mut state = self.lock();
        let fail = state.failures_remaining > 0;
        state.failures_remaining = state.failures_remaining.saturating_sub(1);
        fail
    }
}

impl HistoryLoader for SimHistory {
    fn load(
        &self,
        query: HistoryQuery,
    ) -> impl Future<Output = Result<Vec<ChatMessage>, HistoryError>> + Send {
        let this = self.clone();
        async move {
            let page = this.snapshot(&query);
            let mut gate = this.inner.gate.subscribe();
            // The sender lives as long as `this`.
            let _ = gate.wait_for(|open| *open).await;

            if this.take_failure() {
                return Err(HistoryError::Status { status: 500 });
            }
            Ok(page)
        }
    }
}
