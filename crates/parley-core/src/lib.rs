//! Sans-IO core of the Parley chat session manager.
//!
//! Four pieces, composed by [`ChatSession`]:
//!
//! - [`Connection`]: the transport session state machine (handshake,
//!   heart-beats, fixed-delay reconnect, terminal failures)
//! - [`SubscriptionRegistry`]: at most one room subscription, re-issued after
//!   every reconnect
//! - [`MessageStore`]: ordered, deduplicated feed merging history and live
//!   deliveries
//! - the Publisher, [`ChatSession::send`]
//!
//! Nothing here performs I/O or reads a clock. Methods take the current
//! instant and return actions; a driver (see `parley-client`) executes them.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod connection;
pub mod credential;
pub mod env;
pub mod error;
pub mod session;
pub mod store;
pub mod subscription;

pub use connection::{
    Connection, ConnectionAction, ConnectionConfig, ConnectionState, HEARTBEAT_TIMEOUT_FACTOR,
};
pub use credential::Credential;
pub use env::Environment;
pub use error::SessionError;
pub use session::{ChatSession, HistoryRequest, SessionAction, SessionConfig};
pub use store::{AppendOutcome, MessageStore, StoreToken};
pub use subscription::{RoomSubscription, SubscriptionId, SubscriptionRegistry};
