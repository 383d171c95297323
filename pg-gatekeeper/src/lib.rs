//! Connection authentication and authorization for PostgreSQL-wire servers.
//!
//! This crate is the piece of a Postgres-compatible server that sits between
//! the wire-protocol layer and the query engine: it decides, during the
//! startup handshake, whether a client may proceed, and attaches an
//! authorization identity to the resulting session. With it, these workflows
//! are made easy:
//!
//! 1. Verifying presented credentials against per-user password hashes,
//! 2. Running an explicit trust mode for backward-compatible deployments,
//! 3. Gating each executed statement on the session's role set.
//!
//! Credential verification is decoupled from the protocol layer: any policy
//! implementing [`AuthBackend`] can be injected into the
//! [`HandshakeAdapter`], and the adapter's two hooks ([`on_startup`] and
//! [`on_credential`]) are all the protocol layer needs to call.
//!
//! # Backends
//!
//! Two backends ship with the crate. [`AuthManager`] performs real
//! verification: passwords are stored as salted argon2 hashes, lookups are
//! sharded so concurrent logins never serialize on each other, and unknown
//! usernames burn a dummy verification so their rejections are
//! indistinguishable, by timing, from bad-password rejections. [`TrustAll`]
//! accepts every client unverified; it exists so permissive deployments are
//! an explicit choice made at startup, never a fallback.
//!
//! # Authorization
//!
//! A successful handshake resolves the user's roles, including everything
//! they inherit, into a [`RoleSnapshot`] owned by the [`Session`]. The
//! [`SessionAuthorizer`] then answers per-statement privilege checks as a
//! pure function of that snapshot, so role edits never race live queries.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//!
//! use pg_gatekeeper::{
//!     AuthConfig, AuthManager, AuthSetup, Credential, HandshakeAdapter, HandshakeOutcome,
//!     RoleRegistry, SessionAuthorizer, StartupParams, UserSpec,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let setup = AuthSetup {
//!         config: AuthConfig::password_required(),
//!         users: vec![UserSpec {
//!             username: "postgres".to_string(),
//!             password: Some("secure_postgres_password".to_string()),
//!             roles: vec!["postgres".to_string()],
//!             superuser: true,
//!         }],
//!     };
//!
//!     // Fails here, at startup, if the policy and users disagree.
//!     let backend = Arc::new(AuthManager::from_setup(setup)?);
//!     let authorizer = Arc::new(SessionAuthorizer::new(Arc::new(
//!         RoleRegistry::with_predefined(),
//!     )));
//!     let adapter = HandshakeAdapter::new(backend, authorizer);
//!
//!     // The protocol layer drives the adapter for each connection.
//!     let params = StartupParams::new("postgres", Some("main".to_string()));
//!     let _method = adapter.on_startup(&params).await;
//!     let outcome = adapter
//!         .on_credential(&params, Credential::from("secure_postgres_password"))
//!         .await?;
//!
//!     match outcome {
//!         HandshakeOutcome::Accept(session) => println!("logged in as {}", session.username()),
//!         HandshakeOutcome::Reject(rejection) => eprintln!("{rejection}"),
//!     }
//!
//!     Ok(())
//! }
//! ```
//!
//! [`on_startup`]: HandshakeAdapter::on_startup
//! [`on_credential`]: HandshakeAdapter::on_credential
#![warn(
    clippy::all,
    nonstandard_style,
    future_incompatible,
    missing_debug_implementations,
    missing_docs
)]
#![forbid(unsafe_code)]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod authz;
pub mod backend;
pub mod config;
pub mod error;
pub mod handshake;
pub mod manager;
pub mod session;
pub mod store;

pub use authz::{
    Grant, Operation, Permission, PrivilegeDenied, Resource, Role, RoleRegistry, RoleSnapshot,
    SessionAuthorizer,
};
pub use backend::{AuthBackend, Credential, TrustAll};
pub use config::{AuthConfig, AuthSetup, UserSpec};
pub use error::Error;
pub use handshake::{
    AuthMethod, HandshakeAdapter, HandshakeOutcome, StartupParams, WireRejection,
};
pub use manager::AuthManager;
pub use session::{Decision, RejectReason, Session};
pub use store::{CredentialStore, User};

/// Crate-wide result alias.
pub type Result<T = (), E = Error> = std::result::Result<T, E>;
