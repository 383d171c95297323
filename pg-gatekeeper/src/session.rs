//! Authentication outcomes and the per-connection session.

use time::OffsetDateTime;

use crate::authz::RoleSnapshot;
use crate::store::User;

/// Why an authentication attempt was rejected.
///
/// Reasons are for the server log only. The client always receives the
/// generic "password authentication failed" message, regardless of reason,
/// so rejected attempts reveal nothing about which users exist or how they
/// are configured.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    /// No user with the presented name exists (or the user cannot log in).
    UnknownUser,
    /// The presented credential did not match the stored hash.
    BadPassword,
    /// An empty credential was presented where the policy forbids one.
    EmptyPasswordDisallowed,
    /// The policy requires a password but the user has none configured.
    ///
    /// [`AuthManager::from_setup`](crate::AuthManager::from_setup) refuses
    /// such configurations at startup; seeing this at connection time means
    /// the user was mutated after boot.
    MisconfiguredUser,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            RejectReason::UnknownUser => "unknown user",
            RejectReason::BadPassword => "bad password",
            RejectReason::EmptyPasswordDisallowed => "empty password disallowed",
            RejectReason::MisconfiguredUser => "user misconfigured",
        };
        f.write_str(reason)
    }
}

/// The outcome of one authentication attempt. Never partial.
#[derive(Debug, Clone)]
pub enum Decision {
    /// The credential checked out; carries a snapshot of the user record.
    Accepted(User),
    /// The attempt failed for the given reason.
    Rejected(RejectReason),
}

impl Decision {
    /// Returns whether this decision accepts the attempt.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted(_))
    }
}

/// Server-side state for one authenticated connection.
///
/// Created by the [`HandshakeAdapter`](crate::HandshakeAdapter) on a
/// successful handshake and owned by the protocol layer's per-connection
/// context. The role set is resolved once, at login: role edits made while
/// the session lives do not retroactively change what it may do, matching
/// the usual wire-protocol semantics. Dropped when the connection closes.
#[derive(Debug, Clone)]
pub struct Session {
    username: String,
    superuser: bool,
    roles: RoleSnapshot,
    database: Option<String>,
    started_at: OffsetDateTime,
}

impl Session {
    /// Creates a session for an accepted user with its resolved roles.
    pub fn new(user: &User, roles: RoleSnapshot, database: Option<String>) -> Self {
        Self {
            username: user.username.clone(),
            superuser: user.is_superuser,
            roles,
            database,
            started_at: OffsetDateTime::now_utc(),
        }
    }

    /// The authenticated login name.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether the session belongs to a superuser.
    pub fn is_superuser(&self) -> bool {
        self.superuser
    }

    /// The role set resolved at login time.
    pub fn roles(&self) -> &RoleSnapshot {
        &self.roles
    }

    /// The database requested in the startup message, if any.
    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    /// When the handshake completed.
    pub fn started_at(&self) -> OffsetDateTime {
        self.started_at
    }
}
