//! Credential verification against the store and policy.

use std::sync::Arc;

use async_trait::async_trait;
use password_auth::{generate_hash, verify_password};
use tokio::task;

use crate::backend::{AuthBackend, Credential};
use crate::config::{AuthConfig, AuthSetup};
use crate::handshake::AuthMethod;
use crate::session::{Decision, RejectReason};
use crate::store::{CredentialStore, User};
use crate::{Error, Result};

/// Authenticates users against an in-memory credential store.
///
/// One instance is shared by every connection task; it is constructed
/// explicitly at startup and injected into the protocol layer rather than
/// living in process-global state, so a test process can run several
/// independent servers side by side.
#[derive(Debug)]
pub struct AuthManager {
    store: Arc<CredentialStore>,
    config: AuthConfig,
    // A real argon2 hash with no matching password. Every rejection path
    // that runs no real verification verifies against it instead, so all
    // rejections cost the same wall-clock time as a bad password.
    dummy_hash: String,
}

impl Default for AuthManager {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthManager {
    /// The legacy-compatible manager: default policy, builtin `postgres`
    /// superuser with no password.
    pub fn new() -> Self {
        Self {
            store: Arc::new(CredentialStore::with_users([User::builtin_postgres()])),
            config: AuthConfig::default(),
            dummy_hash: dummy_hash(),
        }
    }

    /// A manager with the given policy and no users beyond the builtin.
    ///
    /// The builtin `postgres` user is created only when the policy does not
    /// require passwords; a strict policy starts empty and users are added
    /// via [`add_user`](Self::add_user) and [`set_password`](Self::set_password).
    pub fn with_config(config: AuthConfig) -> Self {
        let initial = if config.require_passwords {
            Vec::new()
        } else {
            vec![User::builtin_postgres()]
        };
        Self {
            store: Arc::new(CredentialStore::with_users(initial)),
            config,
            dummy_hash: dummy_hash(),
        }
    }

    /// Builds a manager from an administrative [`AuthSetup`].
    ///
    /// Plaintext passwords are hashed here, at load, and dropped. If the
    /// policy requires passwords, a user listed without one fails the whole
    /// setup with [`Error::MisconfiguredUser`] so the deployment dies with a
    /// clear diagnostic at startup instead of confusing clients later.
    ///
    /// Hashing is deliberately synchronous: it blocks only process startup,
    /// never a connection task.
    pub fn from_setup(setup: AuthSetup) -> Result<Self> {
        let AuthSetup { config, users } = setup;

        let mut initial = Vec::with_capacity(users.len() + 1);
        for spec in users {
            if spec.password.is_none() && config.require_passwords {
                return Err(Error::MisconfiguredUser(spec.username));
            }

            let mut user = User::new(&spec.username);
            user.password_hash = spec.password.map(|plaintext| generate_hash(plaintext));
            user.roles = spec.roles;
            user.is_superuser = spec.superuser;
            initial.push(user);
        }

        let has_postgres = initial.iter().any(|user| user.username == "postgres");
        if !has_postgres && !config.require_passwords {
            initial.push(User::builtin_postgres());
        }

        Ok(Self {
            store: Arc::new(CredentialStore::with_users(initial)),
            config,
            dummy_hash: dummy_hash(),
        })
    }

    /// The active policy.
    pub fn get_config(&self) -> &AuthConfig {
        &self.config
    }

    /// Adds or replaces a user record.
    pub async fn add_user(&self, user: User) {
        self.store.insert(user).await;
    }

    /// Returns a snapshot of the named user.
    pub async fn get_user(&self, username: &str) -> Option<User> {
        self.store.get(username).await
    }

    /// All known usernames, for administrative listings.
    pub async fn list_users(&self) -> Vec<String> {
        self.store.usernames().await
    }

    /// Whether the user holds the named role. Superusers hold every role.
    pub async fn user_has_role(&self, username: &str, role_name: &str) -> bool {
        match self.store.get(username).await {
            Some(user) => user.is_superuser || user.roles.iter().any(|r| r == role_name),
            None => false,
        }
    }

    /// Hashes and stores a new password for the named user.
    ///
    /// Linearizable with respect to logins for the same user: once this
    /// returns, no authentication attempt observes the old hash.
    pub async fn set_password(&self, username: &str, plaintext: impl Into<String>) -> Result {
        self.store.set_password(username, plaintext.into()).await
    }

    /// Convenience wrapper rotating the builtin `postgres` password.
    pub async fn set_postgres_password(&self, plaintext: impl Into<String>) -> Result {
        self.set_password("postgres", plaintext).await
    }

    /// Decides whether `credential` authenticates `username`.
    ///
    /// The attempt never mutates the store: verification runs on a cloned
    /// snapshot of the user record, on a blocking thread, with no lock held.
    /// Rejection reasons are traced server-side only; callers must send the
    /// client nothing more specific than "authentication failed".
    #[tracing::instrument(level = "debug", skip_all, fields(user.name = %username))]
    pub async fn authenticate(&self, username: &str, credential: &Credential) -> Result<Decision> {
        let user = match self.store.get(username).await {
            Some(user) if user.can_login => user,
            found => {
                if found.is_some() {
                    tracing::debug!("rejecting user with login disabled");
                }
                return self.reject(credential, RejectReason::UnknownUser).await;
            }
        };

        let decision = match &user.password_hash {
            None if self.config.require_passwords => {
                self.reject(credential, RejectReason::MisconfiguredUser)
                    .await?
            }
            None if !credential.is_empty() => {
                // A secret was presented but there is nothing to verify it
                // against; refusing is the explicit policy here.
                self.reject(credential, RejectReason::BadPassword).await?
            }
            None if self.config.allow_empty_passwords => Decision::Accepted(user.clone()),
            None => {
                self.reject(credential, RejectReason::EmptyPasswordDisallowed)
                    .await?
            }
            Some(_) if self.config.require_passwords && credential.is_empty() => {
                self.reject(credential, RejectReason::EmptyPasswordDisallowed)
                    .await?
            }
            Some(hash) => {
                if self.verify_against(credential, hash.clone()).await? {
                    Decision::Accepted(user.clone())
                } else {
                    Decision::Rejected(RejectReason::BadPassword)
                }
            }
        };

        if let Decision::Rejected(reason) = &decision {
            tracing::debug!(%reason, "authentication rejected");
        }
        Ok(decision)
    }

    /// Rejects, but only after burning a dummy verification.
    ///
    /// Without the burn, paths that skip real verification would return in
    /// microseconds while a bad password costs a full argon2 round, and a
    /// client could read known-vs-unknown usernames off the latency gap.
    async fn reject(&self, credential: &Credential, reason: RejectReason) -> Result<Decision> {
        self.verify_against(credential, self.dummy_hash.clone())
            .await?;
        Ok(Decision::Rejected(reason))
    }

    async fn verify_against(&self, credential: &Credential, hash: String) -> Result<bool> {
        let presented = credential.expose().to_string();
        let matched =
            task::spawn_blocking(move || verify_password(presented, &hash).is_ok()).await?;
        Ok(matched)
    }
}

#[async_trait]
impl AuthBackend for AuthManager {
    async fn authenticate(&self, username: &str, credential: &Credential) -> Result<Decision> {
        AuthManager::authenticate(self, username, credential).await
    }

    async fn auth_method_for(&self, username: &str) -> AuthMethod {
        match self.store.get(username).await {
            Some(user) if !self.config.requires_password_for(&user) => AuthMethod::Trust,
            // Unknown users are challenged like everyone else so the
            // advertisement stage cannot be used to probe for usernames.
            _ => AuthMethod::CleartextPassword,
        }
    }

    fn config(&self) -> &AuthConfig {
        &self.config
    }
}

fn dummy_hash() -> String {
    generate_hash("pg-gatekeeper.unknown-user")
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use crate::config::UserSpec;

    use super::*;

    fn strict_setup(users: Vec<UserSpec>) -> AuthSetup {
        AuthSetup {
            config: AuthConfig::password_required(),
            users,
        }
    }

    fn spec(username: &str, password: Option<&str>) -> UserSpec {
        UserSpec {
            username: username.to_string(),
            password: password.map(|s| s.to_string()),
            roles: Vec::new(),
            superuser: false,
        }
    }

    #[tokio::test]
    async fn legacy_manager_accepts_postgres_with_empty_password() {
        let manager = AuthManager::new();

        let decision = manager
            .authenticate("postgres", &Credential::empty())
            .await
            .unwrap();
        assert!(decision.is_accepted());
    }

    #[tokio::test]
    async fn unknown_user_is_rejected() {
        let manager = AuthManager::new();

        let decision = manager
            .authenticate("nonexistent", &Credential::from("password"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Rejected(RejectReason::UnknownUser)
        ));
    }

    #[tokio::test]
    async fn login_disabled_user_looks_unknown() {
        let manager = AuthManager::new();
        let mut user = User::new("batch");
        user.can_login = false;
        manager.add_user(user).await;

        let decision = manager
            .authenticate("batch", &Credential::empty())
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Rejected(RejectReason::UnknownUser)
        ));
    }

    #[test]
    fn strict_setup_without_password_fails_fast() {
        let err = AuthManager::from_setup(strict_setup(vec![spec("postgres", None)])).unwrap_err();
        assert!(matches!(err, Error::MisconfiguredUser(name) if name == "postgres"));
    }

    #[tokio::test]
    async fn strict_setup_verifies_passwords() {
        let manager = AuthManager::from_setup(strict_setup(vec![spec(
            "postgres",
            Some("secure_postgres_password"),
        )]))
        .unwrap();

        let accepted = manager
            .authenticate("postgres", &Credential::from("secure_postgres_password"))
            .await
            .unwrap();
        assert!(accepted.is_accepted());

        let wrong = manager
            .authenticate("postgres", &Credential::from("WRONG_PASSWORD"))
            .await
            .unwrap();
        assert!(matches!(
            wrong,
            Decision::Rejected(RejectReason::BadPassword)
        ));

        let empty = manager
            .authenticate("postgres", &Credential::empty())
            .await
            .unwrap();
        assert!(matches!(
            empty,
            Decision::Rejected(RejectReason::EmptyPasswordDisallowed)
        ));
    }

    #[tokio::test]
    async fn misconfigured_user_surfacing_at_connection_time_is_a_rejection() {
        let manager = AuthManager::with_config(AuthConfig::password_required());
        manager.add_user(User::new("orphan")).await;

        let decision = manager
            .authenticate("orphan", &Credential::from("anything"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Rejected(RejectReason::MisconfiguredUser)
        ));
    }

    #[tokio::test]
    async fn hashless_user_with_presented_password_is_rejected() {
        let manager = AuthManager::new();

        let decision = manager
            .authenticate("postgres", &Credential::from("unexpected"))
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Rejected(RejectReason::BadPassword)
        ));
    }

    #[tokio::test]
    async fn empty_passwords_can_be_disallowed_without_requiring_passwords() {
        let manager = AuthManager::with_config(AuthConfig {
            require_passwords: false,
            allow_empty_passwords: false,
        });

        let decision = manager
            .authenticate("postgres", &Credential::empty())
            .await
            .unwrap();
        assert!(matches!(
            decision,
            Decision::Rejected(RejectReason::EmptyPasswordDisallowed)
        ));
    }

    #[tokio::test]
    async fn password_rotation_is_immediately_visible() {
        let manager = AuthManager::new();
        manager.set_postgres_password("first").await.unwrap();

        assert!(manager
            .authenticate("postgres", &Credential::from("first"))
            .await
            .unwrap()
            .is_accepted());

        manager.set_postgres_password("second").await.unwrap();

        assert!(manager
            .authenticate("postgres", &Credential::from("second"))
            .await
            .unwrap()
            .is_accepted());
        assert!(matches!(
            manager
                .authenticate("postgres", &Credential::from("first"))
                .await
                .unwrap(),
            Decision::Rejected(RejectReason::BadPassword)
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn concurrent_logins_for_distinct_users_all_succeed() {
        let users = (0..8)
            .map(|n| spec(&format!("user{n}"), Some(&format!("password{n}"))))
            .collect();
        let manager = Arc::new(AuthManager::from_setup(strict_setup(users)).unwrap());

        let mut handles = Vec::new();
        for n in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .authenticate(
                        &format!("user{n}"),
                        &Credential::from(format!("password{n}")),
                    )
                    .await
                    .unwrap()
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_accepted());
        }
    }

    #[tokio::test]
    async fn unknown_user_rejection_timing_matches_bad_password() {
        let manager = AuthManager::from_setup(strict_setup(vec![spec(
            "postgres",
            Some("secure_postgres_password"),
        )]))
        .unwrap();

        // Warm up both paths once so thread-pool spin-up is excluded.
        let _ = manager
            .authenticate("postgres", &Credential::from("wrong"))
            .await
            .unwrap();
        let _ = manager
            .authenticate("ghost", &Credential::from("wrong"))
            .await
            .unwrap();

        const TRIALS: u32 = 5;
        let mut known = std::time::Duration::ZERO;
        let mut unknown = std::time::Duration::ZERO;
        for _ in 0..TRIALS {
            let start = Instant::now();
            let _ = manager
                .authenticate("postgres", &Credential::from("wrong"))
                .await
                .unwrap();
            known += start.elapsed();

            let start = Instant::now();
            let _ = manager
                .authenticate("ghost", &Credential::from("wrong"))
                .await
                .unwrap();
            unknown += start.elapsed();
        }

        // Both paths are dominated by one argon2 verification. A generous
        // tolerance keeps this robust on loaded CI machines while still
        // catching a short-circuited unknown-user path, which would be
        // orders of magnitude faster.
        let ratio = unknown.as_secs_f64() / known.as_secs_f64();
        assert!(
            (0.2..5.0).contains(&ratio),
            "unknown/known rejection latency ratio out of range: {ratio}"
        );
    }

    #[tokio::test]
    async fn hashless_user_rejection_timing_matches_unknown_user() {
        // Under the legacy policy the builtin `postgres` user has no hash, so
        // presenting a non-empty credential rejects without any real
        // verification. That rejection must still cost a full argon2 round or
        // its latency would reveal which usernames exist.
        let manager = AuthManager::new();

        let _ = manager
            .authenticate("postgres", &Credential::from("x"))
            .await
            .unwrap();
        let _ = manager
            .authenticate("ghost", &Credential::from("x"))
            .await
            .unwrap();

        const TRIALS: u32 = 5;
        let mut known = std::time::Duration::ZERO;
        let mut unknown = std::time::Duration::ZERO;
        for _ in 0..TRIALS {
            let start = Instant::now();
            let known_decision = manager
                .authenticate("postgres", &Credential::from("x"))
                .await
                .unwrap();
            known += start.elapsed();
            assert!(matches!(
                known_decision,
                Decision::Rejected(RejectReason::BadPassword)
            ));

            let start = Instant::now();
            let _ = manager
                .authenticate("ghost", &Credential::from("x"))
                .await
                .unwrap();
            unknown += start.elapsed();
        }

        let ratio = unknown.as_secs_f64() / known.as_secs_f64();
        assert!(
            (0.2..5.0).contains(&ratio),
            "unknown/known rejection latency ratio out of range: {ratio}"
        );
    }

    #[tokio::test]
    async fn auth_method_advertisement() {
        let manager = AuthManager::new();
        // Hashless user under the legacy policy: trust.
        assert_eq!(manager.auth_method_for("postgres").await, AuthMethod::Trust);
        // Unknown users are challenged, not revealed.
        assert_eq!(
            manager.auth_method_for("ghost").await,
            AuthMethod::CleartextPassword
        );

        manager.set_postgres_password("pw").await.unwrap();
        assert_eq!(
            manager.auth_method_for("postgres").await,
            AuthMethod::CleartextPassword
        );
    }

    #[tokio::test]
    async fn role_membership_checks() {
        let manager = AuthManager::new();
        let mut user = User::new("reporter");
        user.roles = vec!["readonly".to_string()];
        manager.add_user(user).await;

        assert!(manager.user_has_role("reporter", "readonly").await);
        assert!(!manager.user_has_role("reporter", "readwrite").await);
        // Superusers hold every role.
        assert!(manager.user_has_role("postgres", "anything").await);
        assert!(!manager.user_has_role("ghost", "readonly").await);
    }
}
