//! The pluggable authentication seam.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};

use crate::config::AuthConfig;
use crate::handshake::AuthMethod;
use crate::session::Decision;
use crate::store::User;
use crate::Result;

/// A client-presented secret.
///
/// Wraps the plaintext in [`secrecy::SecretString`] so it is zeroized on
/// drop and redacted from `Debug` output; nothing inside this crate ever
/// logs or stores it.
#[derive(Debug, Clone)]
pub struct Credential(SecretString);

impl Credential {
    /// Wraps a presented plaintext credential.
    pub fn new(plaintext: impl Into<String>) -> Self {
        Self(SecretString::new(plaintext.into()))
    }

    /// The credential a client presents when it sends no password.
    pub fn empty() -> Self {
        Self::new(String::new())
    }

    /// Whether the client presented nothing.
    pub fn is_empty(&self) -> bool {
        self.0.expose_secret().is_empty()
    }

    /// Exposes the plaintext for verification.
    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl From<&str> for Credential {
    fn from(plaintext: &str) -> Self {
        Credential::new(plaintext)
    }
}

impl From<String> for Credential {
    fn from(plaintext: String) -> Self {
        Credential::new(plaintext)
    }
}

/// A backend which can authenticate connection attempts.
///
/// Implementations are selected at startup and injected into the
/// [`HandshakeAdapter`](crate::HandshakeAdapter); any type satisfying this
/// trait can be substituted, so test doubles and alternative credential
/// sources slot in without touching the protocol layer. The crate ships two:
/// [`AuthManager`](crate::AuthManager), which verifies credentials for real,
/// and [`TrustAll`], the explicit permissive policy.
#[async_trait]
pub trait AuthBackend: Send + Sync {
    /// Decides whether the presented credential authenticates the user.
    ///
    /// Every attempt is self-contained: one username, one credential, one
    /// [`Decision`]. Nothing here may mutate shared state, so an attempt
    /// abandoned mid-verification has no effect.
    async fn authenticate(&self, username: &str, credential: &Credential) -> Result<Decision>;

    /// Which verification method the protocol layer should run for the user.
    async fn auth_method_for(&self, username: &str) -> AuthMethod;

    /// The active, immutable policy.
    fn config(&self) -> &AuthConfig;
}

/// The explicit trust-mode policy: every client is accepted unverified.
///
/// This reproduces the historical "accept everyone as `postgres`" behavior,
/// but as a deliberate backend choice made at startup. It is never a
/// fallback: no error path in any other backend degrades to trust.
#[derive(Debug, Clone)]
pub struct TrustAll {
    config: AuthConfig,
    roles: Vec<String>,
}

impl TrustAll {
    /// Trust mode granting the `postgres` superuser role set.
    pub fn new() -> Self {
        Self::with_roles(vec!["postgres".to_string()])
    }

    /// Trust mode granting a custom role set to every client.
    pub fn with_roles(roles: Vec<String>) -> Self {
        Self {
            config: AuthConfig::default(),
            roles,
        }
    }
}

impl Default for TrustAll {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AuthBackend for TrustAll {
    async fn authenticate(&self, username: &str, _credential: &Credential) -> Result<Decision> {
        let name = if username.is_empty() {
            "postgres"
        } else {
            username
        };
        let mut user = User::new(name);
        user.roles = self.roles.clone();
        user.is_superuser = true;
        Ok(Decision::Accepted(user))
    }

    async fn auth_method_for(&self, _username: &str) -> AuthMethod {
        AuthMethod::Trust
    }

    fn config(&self) -> &AuthConfig {
        &self.config
    }
}
