//! An in-memory, sharded credential store.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};

use password_auth::generate_hash;
use time::OffsetDateTime;
use tokio::task;

use crate::{Error, Result};

const SHARD_COUNT: usize = 16;

/// A user known to the authentication subsystem.
#[derive(Clone)]
pub struct User {
    /// Unique, case-sensitive login name.
    pub username: String,
    /// Argon2 hash of the user's password. `None` means no password is set.
    pub password_hash: Option<String>,
    /// Names of the roles granted to this user.
    pub roles: Vec<String>,
    /// Superusers bypass all authorization checks.
    pub is_superuser: bool,
    /// Whether this user may open connections at all.
    pub can_login: bool,
    /// Optional cap on concurrent connections, enforced by the caller.
    pub connection_limit: Option<i32>,
    /// When this user record was created.
    pub created_at: OffsetDateTime,
}

impl User {
    /// Creates a user with no password, no roles, and login permitted.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password_hash: None,
            roles: Vec::new(),
            is_superuser: false,
            can_login: true,
            connection_limit: None,
            created_at: OffsetDateTime::now_utc(),
        }
    }

    /// The builtin `postgres` superuser, as bootstrapped by legacy servers.
    pub fn builtin_postgres() -> Self {
        let mut user = User::new("postgres");
        user.roles = vec!["postgres".to_string()];
        user.is_superuser = true;
        user
    }
}

// Implemented manually so the password hash never reaches logs.
impl std::fmt::Debug for User {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("User")
            .field("username", &self.username)
            .field("password_hash", &"[redacted]")
            .field("roles", &self.roles)
            .field("is_superuser", &self.is_superuser)
            .field("can_login", &self.can_login)
            .field("connection_limit", &self.connection_limit)
            .field("created_at", &self.created_at)
            .finish()
    }
}

/// Maps usernames to [`User`] records.
///
/// The map is split across a fixed set of [`tokio::sync::RwLock`] shards
/// keyed by username hash, so a password rotation for one user never
/// serializes logins for users living in other shards. Lookups clone the
/// record out of the shard; the expensive hash verification then runs on
/// that snapshot without any lock held.
#[derive(Debug)]
pub struct CredentialStore {
    shards: Vec<tokio::sync::RwLock<HashMap<String, User>>>,
}

impl Default for CredentialStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CredentialStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::with_users(std::iter::empty())
    }

    /// Creates a store pre-populated with the given users.
    ///
    /// Population happens before the shards are shared, so no locking is
    /// involved and the store is fully initialized on return.
    pub fn with_users(users: impl IntoIterator<Item = User>) -> Self {
        let mut maps: Vec<HashMap<String, User>> = (0..SHARD_COUNT).map(|_| HashMap::new()).collect();
        for user in users {
            maps[shard_index(&user.username)].insert(user.username.clone(), user);
        }

        Self {
            shards: maps.into_iter().map(tokio::sync::RwLock::new).collect(),
        }
    }

    fn shard(&self, username: &str) -> &tokio::sync::RwLock<HashMap<String, User>> {
        &self.shards[shard_index(username)]
    }

    /// Returns a snapshot of the named user, if present.
    pub async fn get(&self, username: &str) -> Option<User> {
        self.shard(username).read().await.get(username).cloned()
    }

    /// Inserts or replaces a user record wholesale.
    pub async fn insert(&self, user: User) {
        self.shard(&user.username)
            .write()
            .await
            .insert(user.username.clone(), user);
    }

    /// Creates the named user if absent, otherwise replaces its role set.
    ///
    /// The password hash of an existing user is left untouched.
    pub async fn upsert_user(&self, username: &str, roles: Vec<String>) {
        let mut shard = self.shard(username).write().await;
        match shard.get_mut(username) {
            Some(user) => user.roles = roles,
            None => {
                let mut user = User::new(username);
                user.roles = roles;
                shard.insert(username.to_string(), user);
            }
        }
    }

    /// Hashes `plaintext` and stores it as the named user's password.
    ///
    /// Hashing runs on [`tokio::task::spawn_blocking`]; the shard lock is
    /// taken only for the final swap, so concurrent logins against other
    /// users proceed undisturbed. The plaintext is consumed and never stored.
    pub async fn set_password(&self, username: &str, plaintext: String) -> Result {
        let hash = task::spawn_blocking(move || generate_hash(plaintext)).await?;

        let mut shard = self.shard(username).write().await;
        match shard.get_mut(username) {
            Some(user) => {
                user.password_hash = Some(hash);
                Ok(())
            }
            None => Err(Error::NoSuchUser(username.to_string())),
        }
    }

    /// All known usernames, in no particular order.
    pub async fn usernames(&self) -> Vec<String> {
        let mut names = Vec::new();
        for shard in &self.shards {
            names.extend(shard.read().await.keys().cloned());
        }
        names
    }
}

fn shard_index(username: &str) -> usize {
    let mut hasher = DefaultHasher::new();
    username.hash(&mut hasher);
    hasher.finish() as usize % SHARD_COUNT
}
