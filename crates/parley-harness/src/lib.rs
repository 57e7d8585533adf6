//! Deterministic simulation harness for Parley.
//!
//! In-memory implementations of the client seams so the real
//! [`parley_client::SessionRuntime`] runs against a scripted world:
//!
//! - [`SimBroker`] / [`SimTransport`]: a STOMP broker with controls for
//!   dropped connections, rejected credentials, injected errors and
//!   duplicate deliveries
//! - [`SimHistory`]: the history endpoint, gateable so tests can order a
//!   history response against live deliveries
//!
//! Run tests with `#[tokio::test(start_paused = true)]`: heart-beats,
//! reconnect delays and timeouts then elapse in virtual time.
//!
//! # Invariant Testing
//!
//! The `invariants` module checks behavioral properties of a session
//! snapshot (feed ordering, uniqueness, room scoping, subscription count).
//! Use [`InvariantRegistry::standard()`] after every simulated step.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chaos;
pub mod invariants;
pub mod sim_broker;
pub mod sim_history;
pub mod world;

pub use chaos::{ChaosPlan, ChaosStep};
pub use invariants::{
    ConnectedImpliesSubscribed, FeedOrdered, FeedScopedToRoom, FeedUnique, Invariant,
    InvariantRegistry, InvariantResult, SessionSnapshot, SingleSubscription, Violation,
};
pub use sim_broker::{SIM_NICKNAME, SimBroker, SimTransport};
pub use sim_history::SimHistory;
pub use world::{SETTLE, SIM_TOKEN, SimWorld};
