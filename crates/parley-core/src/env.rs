//! Environment abstraction for deterministic testing.
//!
//! The state machines in this crate never read a clock. Drivers ask the
//! [`Environment`] for the current instant and pass it in, so the same logic
//! runs against wall-clock time in production and virtual time in tests.

use std::{ops::Sub, time::Duration};

/// Source of time for a session driver.
///
/// # Invariants
///
/// - `now()` never goes backwards within one driver.
pub trait Environment: Clone + Send + Sync + 'static {
    /// The specific instant type used by this environment.
    ///
    /// Production drivers use a monotonic clock instant. Unit tests may use
    /// plain [`Duration`] offsets from an arbitrary origin.
    type Instant: Copy + Ord + Send + Sync + Sub<Output = Duration>;

    /// Current time (monotonic).
    fn now(&self) -> Self::Instant;
}
