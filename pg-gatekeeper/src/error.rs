//! Crate-level error type.

/// An error produced by the authentication subsystem itself.
///
/// Note that a failed login is *not* an error: it is a
/// [`Decision::Rejected`](crate::Decision::Rejected). This type covers
/// administrative and infrastructure failures only.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The named user does not exist in the credential store.
    #[error("user \"{0}\" does not exist")]
    NoSuchUser(String),

    /// The named role does not exist in the role registry.
    #[error("role \"{0}\" does not exist")]
    NoSuchRole(String),

    /// The policy requires passwords but the named user has none configured.
    ///
    /// Surfaced by [`AuthManager::from_setup`](crate::AuthManager::from_setup)
    /// so a bad deployment fails at startup rather than at the first
    /// connection attempt.
    #[error("user \"{0}\" has no password but the policy requires one")]
    MisconfiguredUser(String),

    /// A blocking hash-verification task failed to complete.
    #[error(transparent)]
    TaskJoin(#[from] tokio::task::JoinError),
}
