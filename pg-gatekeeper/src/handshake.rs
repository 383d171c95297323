//! Glue between the wire-protocol layer and the authentication backend.

use std::sync::Arc;

use crate::authz::{PrivilegeDenied, SessionAuthorizer};
use crate::backend::{AuthBackend, Credential};
use crate::session::{Decision, Session};
use crate::Result;

/// SQLSTATE for `invalid_password`.
pub const SQLSTATE_INVALID_PASSWORD: &str = "28P01";
/// SQLSTATE for `insufficient_privilege`.
pub const SQLSTATE_INSUFFICIENT_PRIVILEGE: &str = "42501";

/// The verification method the protocol layer should run for a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMethod {
    /// Challenge the client for a cleartext password.
    CleartextPassword,
    /// Let the client in without a credential exchange.
    Trust,
}

/// Startup parameters parsed from the client's startup message.
#[derive(Debug, Clone)]
pub struct StartupParams {
    /// The login name the client claims.
    pub username: String,
    /// The database the client asked for, if any.
    pub database: Option<String>,
}

impl StartupParams {
    /// Creates startup parameters.
    pub fn new(username: impl Into<String>, database: Option<String>) -> Self {
        Self {
            username: username.into(),
            database,
        }
    }
}

/// A protocol-level error response: severity, SQLSTATE, message.
///
/// This is the only shape the client ever sees for a failed handshake. The
/// message is deliberately generic; the specific
/// [`RejectReason`](crate::RejectReason) stays in the server log.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{severity}: {message} (SQLSTATE {code})")]
pub struct WireRejection {
    /// `FATAL` for handshake failures, `ERROR` for statement failures.
    pub severity: &'static str,
    /// The SQLSTATE code.
    pub code: &'static str,
    /// Human-readable message.
    pub message: String,
}

impl WireRejection {
    /// The standard authentication-failure response.
    pub fn auth_failed(username: &str) -> Self {
        Self {
            severity: "FATAL",
            code: SQLSTATE_INVALID_PASSWORD,
            message: format!("password authentication failed for user \"{username}\""),
        }
    }
}

impl From<PrivilegeDenied> for WireRejection {
    fn from(denied: PrivilegeDenied) -> Self {
        Self {
            severity: "ERROR",
            code: SQLSTATE_INSUFFICIENT_PRIVILEGE,
            message: denied.to_string(),
        }
    }
}

/// What the protocol layer should do after the credential exchange.
#[derive(Debug)]
pub enum HandshakeOutcome {
    /// Proceed; ownership of the session moves to the connection context.
    Accept(Session),
    /// Send the rejection and terminate the connection attempt.
    Reject(WireRejection),
}

impl HandshakeOutcome {
    /// Returns whether the handshake succeeded.
    pub fn is_accept(&self) -> bool {
        matches!(self, HandshakeOutcome::Accept(_))
    }
}

/// Bridges protocol callback hooks to the authentication backend.
///
/// The protocol layer calls [`on_startup`](Self::on_startup) once it has
/// parsed the startup message, runs whatever challenge the returned
/// [`AuthMethod`] demands, then hands the presented credential to
/// [`on_credential`](Self::on_credential). One rejection terminates the
/// attempt; this adapter keeps no per-attempt state, so the protocol layer
/// may only retry by starting a fresh handshake.
#[derive(Debug, Clone)]
pub struct HandshakeAdapter<B> {
    backend: Arc<B>,
    authorizer: Arc<SessionAuthorizer>,
}

impl<B: AuthBackend> HandshakeAdapter<B> {
    /// Creates an adapter over a backend and an authorizer.
    pub fn new(backend: Arc<B>, authorizer: Arc<SessionAuthorizer>) -> Self {
        Self {
            backend,
            authorizer,
        }
    }

    /// The injected backend.
    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    /// Which verification method to advertise for this startup message.
    pub async fn on_startup(&self, params: &StartupParams) -> AuthMethod {
        self.backend.auth_method_for(&params.username).await
    }

    /// Runs the backend's decision for a presented credential and turns it
    /// into the protocol-facing outcome.
    ///
    /// Trust-mode connections call this too, with an empty credential.
    #[tracing::instrument(level = "debug", skip_all, fields(user.name = %params.username))]
    pub async fn on_credential(
        &self,
        params: &StartupParams,
        credential: Credential,
    ) -> Result<HandshakeOutcome> {
        match self
            .backend
            .authenticate(&params.username, &credential)
            .await?
        {
            Decision::Accepted(user) => {
                let roles = self.authorizer.snapshot_for(&user).await;
                let session = Session::new(&user, roles, params.database.clone());
                tracing::info!(user.name = %session.username(), "connection authenticated");
                Ok(HandshakeOutcome::Accept(session))
            }
            Decision::Rejected(reason) => {
                tracing::warn!(%reason, "connection rejected");
                Ok(HandshakeOutcome::Reject(WireRejection::auth_failed(
                    &params.username,
                )))
            }
        }
    }
}
