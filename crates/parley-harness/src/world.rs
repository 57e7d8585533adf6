//! A complete simulated deployment: broker, history endpoint and client.

use std::time::Duration;

use parley_client::{ChatClient, ClientConfig, ClientError, SessionHandle, StaticCredential};
use parley_proto::RoomId;
use tracing::debug;

use crate::{
    chaos::ChaosStep,
    invariants::{InvariantRegistry, SessionSnapshot},
    sim_broker::{SimBroker, SimTransport},
    sim_history::SimHistory,
};

/// Token the simulated client signs in with.
pub const SIM_TOKEN: &str = "sim-token";

/// Virtual time that lets every ready task run to idle.
pub const SETTLE: Duration = Duration::from_millis(10);

/// Broker, history endpoint and a client wired to both.
pub struct SimWorld {
    /// The broker.
    pub broker: SimBroker,
    /// The history endpoint.
    pub history: SimHistory,
    /// Client opening sessions against them.
    pub client: ChatClient<SimTransport, SimHistory>,
    /// Checks run by [`SimWorld::check`].
    pub invariants: InvariantRegistry,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    /// World with default client configuration.
    pub fn new() -> Self {
        Self::with_config(ClientConfig::default())
    }

    /// World whose client uses `config`.
    pub fn with_config(config: ClientConfig) -> Self {
        let broker = SimBroker::new();
        let history = SimHistory::new(broker.clone());
        let client = ChatClient::new(
            broker.transport(),
            history.clone(),
            StaticCredential::new(SIM_TOKEN),
        )
        .with_config(config);
        Self { broker, history, client, invariants: InvariantRegistry::standard() }
    }

    /// Open a session on `room_id`.
    pub fn open(&self, room_id: RoomId) -> Result<SessionHandle, ClientError> {
        self.client.open(room_id)
    }

    /// Let in-flight frames and tasks land.
    pub async fn settle() {
        tokio::time::sleep(SETTLE).await;
    }

    /// Current observable state of `handle`.
    pub fn snapshot(&self, handle: &SessionHandle) -> SessionSnapshot {
        SessionSnapshot::observe(handle, &self.broker)
    }

    /// Settle, then assert every invariant.
    pub async fn check(&self, handle: &SessionHandle, context: &str) {
        Self::settle().await;
        self.invariants.assert_all(&self.snapshot(handle), context);
    }

    /// Execute one chaos step against the session on `room_id`.
    pub async fn apply(&self, handle: &SessionHandle, room_id: RoomId, step: &ChaosStep) {
        debug!(?step, "chaos step");
        match step {
            ChaosStep::Advance(duration) => tokio::time::sleep(*duration).await,
            ChaosStep::DropConnections => self.broker.drop_connections(),
            ChaosStep::Publish => {
                self.broker.publish(room_id, "chaos");
            },
            ChaosStep::PublishUnseen => {
                self.broker.persist(room_id, "unseen");
            },
            ChaosStep::Redeliver => {
                if let Some(last) = self.broker.history(room_id).last() {
                    self.broker.redeliver(last);
                }
            },
            ChaosStep::InjectGarbage => self.broker.inject_raw("BOGUS\n\n\0"),
            ChaosStep::ToggleDuplicates => self.broker.toggle_duplicates(),
            ChaosStep::HoldHistory => self.history.hold(),
            ChaosStep::ReleaseHistory => self.history.release(),
            ChaosStep::FailHistory => self.history.fail_next(1),
            ChaosStep::Send => {
                if let Err(err) = handle.send("from client").await {
                    debug!(%err, "chaos send refused");
                }
            },
        }
    }
}
