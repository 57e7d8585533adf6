//! Invariant checking for deterministic simulation testing.
//!
//! Invariants are properties that must hold after every step of a session,
//! whatever the interleaving of deliveries, history responses, drops and
//! reconnects. Tests extract a [`SessionSnapshot`] and run every registered
//! [`Invariant`] against it.
//!
//! # Usage
//!
//! ```ignore
//! let registry = InvariantRegistry::standard();
//! let snapshot = SessionSnapshot::observe(&handle, &broker);
//! registry.assert_all(&snapshot, "after reconnect");
//! ```

mod checks;
mod snapshot;

use std::fmt;

pub use checks::{
    ConnectedImpliesSubscribed, FeedOrdered, FeedScopedToRoom, FeedUnique, SingleSubscription,
};
pub use snapshot::SessionSnapshot;

/// Invariant check result.
pub type InvariantResult = Result<(), Violation>;

/// Invariant violation with context.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Violation {
    /// Name of the violated invariant.
    pub invariant: &'static str,
    /// Description of what went wrong.
    pub message: String,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.invariant, self.message)
    }
}

impl std::error::Error for Violation {}

/// A property checked against a session snapshot.
pub trait Invariant: Send + Sync {
    /// Invariant name for error reporting.
    fn name(&self) -> &'static str;

    /// `Ok(())` if the invariant holds, otherwise what went wrong.
    fn check(&self, state: &SessionSnapshot) -> InvariantResult;

    /// Violation of this invariant.
    fn violation(&self, message: String) -> Violation {
        Violation { invariant: self.name(), message }
    }
}

/// Registry of invariants to check.
pub struct InvariantRegistry {
    invariants: Vec<Box<dyn Invariant>>,
}

impl Default for InvariantRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl InvariantRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self { invariants: Vec::new() }
    }

    /// Registry with every session invariant:
    ///
    /// - [`FeedOrdered`]: feed ascending by `(createdAt, id)`
    /// - [`FeedUnique`]: no id twice
    /// - [`FeedScopedToRoom`]: every message belongs to the active room
    /// - [`SingleSubscription`]: at most one live subscription
    /// - [`ConnectedImpliesSubscribed`]: exactly one while connected
    pub fn standard() -> Self {
        let mut registry = Self::new();
        registry.add(FeedOrdered);
        registry.add(FeedUnique);
        registry.add(FeedScopedToRoom);
        registry.add(SingleSubscription);
        registry.add(ConnectedImpliesSubscribed);
        registry
    }

    /// Add an invariant to the registry.
    pub fn add<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Check all invariants, collecting every violation.
    pub fn check_all(&self, state: &SessionSnapshot) -> Result<(), Vec<Violation>> {
        let violations: Vec<_> =
            self.invariants.iter().filter_map(|inv| inv.check(state).err()).collect();

        if violations.is_empty() { Ok(()) } else { Err(violations) }
    }

    /// Check all invariants, panicking with every violation found.
    ///
    /// Use this in tests where you want immediate failure with context.
    #[allow(clippy::panic)]
    pub fn assert_all(&self, state: &SessionSnapshot, context: &str) {
        if let Err(violations) = self.check_all(state) {
            let messages: Vec<_> = violations.iter().map(ToString::to_string).collect();
            panic!("Invariant violation {context}:\n  {}", messages.join("\n  "));
        }
    }

    /// Number of registered invariants.
    pub fn len(&self) -> usize {
        self.invariants.len()
    }

    /// Check if registry is empty.
    pub fn is_empty(&self) -> bool {
        self.invariants.is_empty()
    }
}
