//! Production environment backed by the tokio clock.
//!
//! Uses `tokio::time::Instant` rather than `std::time::Instant` so that
//! `tokio::time::pause()` makes whole-runtime tests deterministic.

use parley_core::Environment;

/// Tokio clock environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl Environment for SystemEnv {
    type Instant = tokio::time::Instant;

    fn now(&self) -> Self::Instant {
        tokio::time::Instant::now()
    }
}
