//! Credential source.

use parley_core::Credential;

/// Supplies the bearer credential for a new session.
///
/// Read once per [`crate::ChatClient::open`]; reconnects of that session reuse
/// the captured value.
pub trait AuthProvider: Send + Sync + 'static {
    /// Current credential, or `None` if the user is not signed in.
    fn credential(&self) -> Option<Credential>;
}

/// A fixed credential.
#[derive(Debug, Clone, Default)]
pub struct StaticCredential(Option<Credential>);

impl StaticCredential {
    /// Always return `token`.
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(Credential::new(token)))
    }

    /// Never return a credential.
    pub fn anonymous() -> Self {
        Self(None)
    }
}

impl AuthProvider for StaticCredential {
    fn credential(&self) -> Option<Credential> {
        self.0.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_credential() {
        assert_eq!(StaticCredential::new("tok").credential(), Some(Credential::new("tok")));
        assert_eq!(StaticCredential::anonymous().credential(), None);
    }
}
