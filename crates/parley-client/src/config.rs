//! Runtime configuration.

use std::time::Duration;

use parley_core::SessionConfig;

/// How often the runtime ticks the session (heart-beats, timeouts,
/// reconnect timer).
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_millis(250);

/// Capacity of the command and transport channels.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 32;

/// Configuration for [`crate::ChatClient`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Session state machine settings.
    pub session: SessionConfig,
    /// Tick period. Bounds the latency of timer-driven transitions.
    pub tick_interval: Duration,
    /// Bound of every channel the runtime owns.
    pub channel_capacity: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            session: SessionConfig::default(),
            tick_interval: DEFAULT_TICK_INTERVAL,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}
