//! Async shell around the Parley session state machines.
//!
//! [`parley_core::ChatSession`] decides; this crate performs. A
//! [`SessionRuntime`] task owns one session and executes its actions against
//! three seams:
//!
//! - [`Transport`]: the WebSocket carrying STOMP frames
//! - [`HistoryLoader`]: the REST history endpoint
//! - [`AuthProvider`]: where the bearer credential comes from
//!
//! Callers never see the runtime directly. [`ChatClient::open`] spawns it and
//! returns a [`SessionHandle`] for status, the ordered feed and publishing.
//!
//! # Features
//!
//! - `transport`: [`WsTransport`] (tokio-tungstenite) and
//!   [`RestHistoryLoader`] (reqwest). Without it the crate only carries the
//!   traits, which is all the simulation harness needs.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod handle;
pub mod history;
pub mod runtime;
pub mod system_env;
pub mod transport;

#[cfg(feature = "transport")]
pub mod rest;
#[cfg(feature = "transport")]
pub mod ws;

pub use auth::{AuthProvider, StaticCredential};
pub use config::ClientConfig;
pub use error::ClientError;
pub use handle::{ChatClient, SessionHandle, SessionStatus};
pub use history::{HistoryError, HistoryLoader, HistoryQuery};
#[cfg(feature = "transport")]
pub use rest::RestHistoryLoader;
pub use runtime::SessionRuntime;
pub use system_env::SystemEnv;
pub use transport::{ConnectRequest, Transport, TransportError, TransportEvent, TransportLink};
#[cfg(feature = "transport")]
pub use ws::WsTransport;
