//! Caller-facing errors.

use parley_core::SessionError;
use thiserror::Error;

/// Errors returned by [`crate::ChatClient`] and [`crate::SessionHandle`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The auth provider had no credential.
    #[error("no credential available")]
    MissingCredential,

    /// The session runtime has stopped (closed, or its task ended).
    #[error("session runtime has stopped")]
    RuntimeGone,

    /// The session refused the operation.
    #[error(transparent)]
    Session(#[from] SessionError),
}
