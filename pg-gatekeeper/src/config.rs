//! Authentication policy and administrative bootstrap configuration.

use serde::Deserialize;

use crate::store::User;

/// Immutable authentication policy.
///
/// One instance is shared read-only across every connection task. Changing
/// policy means constructing a new backend with a new `AuthConfig`; there is
/// deliberately no mutation, so concurrent authentications can never observe
/// a torn policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Require every user, including `postgres`, to present a password.
    pub require_passwords: bool,
    /// Allow users with no stored password to log in with an empty
    /// credential. Only consulted when `require_passwords` is `false`.
    pub allow_empty_passwords: bool,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig {
            require_passwords: false,
            allow_empty_passwords: true,
        }
    }
}

impl AuthConfig {
    /// The strict policy: passwords required, empty passwords refused.
    pub fn password_required() -> Self {
        AuthConfig {
            require_passwords: true,
            allow_empty_passwords: false,
        }
    }

    /// Whether the given user must pass credential verification.
    ///
    /// True when the policy demands passwords globally, or when the user has
    /// one on file regardless of policy.
    pub fn requires_password_for(&self, user: &User) -> bool {
        self.require_passwords || user.password_hash.is_some()
    }
}

/// Administrative bootstrap object: the policy plus the initial user set.
///
/// Deserializable so the embedding server can load it from its own
/// configuration file. Plaintext passwords listed here are hashed by
/// [`AuthManager::from_setup`](crate::AuthManager::from_setup) and dropped.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthSetup {
    /// The policy to enforce.
    #[serde(default)]
    pub config: AuthConfig,
    /// Users to create at startup.
    #[serde(default)]
    pub users: Vec<UserSpec>,
}

/// One user entry in an [`AuthSetup`].
#[derive(Clone, Deserialize)]
pub struct UserSpec {
    /// Login name.
    pub username: String,
    /// Plaintext password, hashed at load. Omit for passwordless users.
    #[serde(default)]
    pub password: Option<String>,
    /// Role names granted to the user.
    #[serde(default)]
    pub roles: Vec<String>,
    /// Whether the user is a superuser.
    #[serde(default)]
    pub superuser: bool,
}

// Implemented manually so configured plaintext never reaches logs.
impl std::fmt::Debug for UserSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserSpec")
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[redacted]"))
            .field("roles", &self.roles)
            .field("superuser", &self.superuser)
            .finish()
    }
}
