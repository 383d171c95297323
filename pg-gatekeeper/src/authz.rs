//! Role-based authorization, consulted once per statement.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::session::Session;
use crate::store::User;
use crate::{Error, Result};

/// A privilege that can be granted on a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    /// Read rows.
    Select,
    /// Insert rows.
    Insert,
    /// Update rows.
    Update,
    /// Delete rows.
    Delete,
    /// Create objects.
    Create,
    /// Drop objects.
    Drop,
    /// Alter objects.
    Alter,
    /// Create indexes.
    Index,
    /// Reference a table from foreign keys.
    References,
    /// Create triggers.
    Trigger,
    /// Execute functions.
    Execute,
    /// Use schemas and sequences.
    Usage,
    /// Connect to a database.
    Connect,
    /// Create temporary tables.
    Temporary,
    /// Every privilege.
    All,
}

impl Permission {
    /// Parses a SQL privilege keyword, case-insensitively.
    pub fn parse(s: &str) -> Option<Permission> {
        match s.to_uppercase().as_str() {
            "SELECT" => Some(Permission::Select),
            "INSERT" => Some(Permission::Insert),
            "UPDATE" => Some(Permission::Update),
            "DELETE" => Some(Permission::Delete),
            "CREATE" => Some(Permission::Create),
            "DROP" => Some(Permission::Drop),
            "ALTER" => Some(Permission::Alter),
            "INDEX" => Some(Permission::Index),
            "REFERENCES" => Some(Permission::References),
            "TRIGGER" => Some(Permission::Trigger),
            "EXECUTE" => Some(Permission::Execute),
            "USAGE" => Some(Permission::Usage),
            "CONNECT" => Some(Permission::Connect),
            "TEMPORARY" => Some(Permission::Temporary),
            "ALL" => Some(Permission::All),
            _ => None,
        }
    }

    fn matches(&self, requested: &Permission) -> bool {
        self == requested || matches!(self, Permission::All)
    }
}

/// The object a privilege applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Resource {
    /// A table, addressed as `schema.table` where qualified.
    Table(String),
    /// A schema; grants on it cover every table under it.
    Schema(String),
    /// A database.
    Database(String),
    /// A function.
    Function(String),
    /// A sequence.
    Sequence(String),
    /// Every resource.
    All,
}

impl Resource {
    fn matches(&self, requested: &Resource) -> bool {
        match (self, requested) {
            (a, b) if a == b => true,
            (Resource::All, _) => true,
            // A schema grant covers tables qualified with that schema.
            (Resource::Schema(schema), Resource::Table(table)) => {
                table.starts_with(&format!("{schema}."))
            }
            _ => false,
        }
    }
}

/// One privilege granted on one resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Grant {
    /// The granted privilege.
    pub permission: Permission,
    /// What it was granted on.
    pub resource: Resource,
    /// Who issued the grant.
    pub granted_by: String,
    /// Whether the grantee may grant it onward.
    pub with_grant_option: bool,
}

/// A named bundle of grants, possibly inheriting from other roles.
#[derive(Debug, Clone)]
pub struct Role {
    /// Role name.
    pub name: String,
    /// Superuser roles bypass all checks.
    pub is_superuser: bool,
    /// Whether the role may be used as a login identity.
    pub can_login: bool,
    /// Whether members may create databases.
    pub can_create_db: bool,
    /// Whether members may create further roles.
    pub can_create_role: bool,
    /// Direct grants.
    pub grants: Vec<Grant>,
    /// Roles whose grants this role inherits.
    pub inherited_roles: Vec<String>,
}

impl Role {
    /// Creates a role with no capabilities and no grants.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_superuser: false,
            can_login: false,
            can_create_db: false,
            can_create_role: false,
            grants: Vec::new(),
            inherited_roles: Vec::new(),
        }
    }
}

/// The privilege an operation needs, as derived by the query engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// The privilege required.
    pub permission: Permission,
    /// The resource it is required on.
    pub resource: Resource,
}

impl Operation {
    /// Creates an operation descriptor.
    pub fn new(permission: Permission, resource: Resource) -> Self {
        Self {
            permission,
            resource,
        }
    }
}

/// A session's role set, resolved and flattened at login time.
///
/// Inheritance is already expanded: `grants` holds every grant reachable
/// from the user's direct roles. Checking an operation against a snapshot is
/// a pure function with no locking and no I/O.
#[derive(Debug, Clone, Default)]
pub struct RoleSnapshot {
    names: HashSet<String>,
    grants: Vec<Grant>,
    superuser: bool,
}

impl RoleSnapshot {
    /// Whether the named role (direct or inherited) is part of the snapshot.
    pub fn has_role(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    /// Whether any flattened grant covers the operation.
    pub fn allows(&self, operation: &Operation) -> bool {
        self.superuser
            || self.grants.iter().any(|grant| {
                grant.permission.matches(&operation.permission)
                    && grant.resource.matches(&operation.resource)
            })
    }
}

/// The set of roles known to the server.
#[derive(Debug, Default)]
pub struct RoleRegistry {
    roles: RwLock<HashMap<String, Role>>,
}

impl RoleRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the conventional predefined roles:
    /// `postgres` (superuser), `readonly`, `readwrite`, and `dbadmin`.
    pub fn with_predefined() -> Self {
        let mut postgres = Role::new("postgres");
        postgres.is_superuser = true;
        postgres.can_login = true;
        postgres.can_create_db = true;
        postgres.can_create_role = true;

        let mut readonly = Role::new("readonly");
        readonly.grants = vec![system_grant(Permission::Select)];

        let mut readwrite = Role::new("readwrite");
        readwrite.grants = vec![
            system_grant(Permission::Select),
            system_grant(Permission::Insert),
            system_grant(Permission::Update),
            system_grant(Permission::Delete),
        ];

        let mut dbadmin = Role::new("dbadmin");
        dbadmin.can_login = true;
        dbadmin.can_create_db = true;
        dbadmin.grants = vec![Grant {
            permission: Permission::All,
            resource: Resource::All,
            granted_by: "system".to_string(),
            with_grant_option: true,
        }];

        let roles = [postgres, readonly, readwrite, dbadmin]
            .into_iter()
            .map(|role| (role.name.clone(), role))
            .collect();

        Self {
            roles: RwLock::new(roles),
        }
    }

    /// Adds or replaces a role.
    pub async fn add_role(&self, role: Role) {
        self.roles.write().await.insert(role.name.clone(), role);
    }

    /// Returns a snapshot of the named role.
    pub async fn get(&self, name: &str) -> Option<Role> {
        self.roles.read().await.get(name).cloned()
    }

    /// Grants a privilege on a resource to the named role.
    pub async fn grant(
        &self,
        role_name: &str,
        permission: Permission,
        resource: Resource,
        granted_by: &str,
        with_grant_option: bool,
    ) -> Result {
        let mut roles = self.roles.write().await;
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| Error::NoSuchRole(role_name.to_string()))?;
        role.grants.push(Grant {
            permission,
            resource,
            granted_by: granted_by.to_string(),
            with_grant_option,
        });
        Ok(())
    }

    /// Removes every matching grant from the named role.
    pub async fn revoke(
        &self,
        role_name: &str,
        permission: Permission,
        resource: Resource,
    ) -> Result {
        let mut roles = self.roles.write().await;
        let role = roles
            .get_mut(role_name)
            .ok_or_else(|| Error::NoSuchRole(role_name.to_string()))?;
        role.grants
            .retain(|grant| !(grant.permission == permission && grant.resource == resource));
        Ok(())
    }

    /// Makes `child` inherit the grants of `parent`.
    pub async fn add_inheritance(&self, child: &str, parent: &str) -> Result {
        let mut roles = self.roles.write().await;
        if !roles.contains_key(parent) {
            return Err(Error::NoSuchRole(parent.to_string()));
        }
        let role = roles
            .get_mut(child)
            .ok_or_else(|| Error::NoSuchRole(child.to_string()))?;
        if !role.inherited_roles.contains(&parent.to_string()) {
            role.inherited_roles.push(parent.to_string());
        }
        Ok(())
    }

    /// Stops `child` from inheriting `parent`.
    pub async fn remove_inheritance(&self, child: &str, parent: &str) -> Result {
        let mut roles = self.roles.write().await;
        let role = roles
            .get_mut(child)
            .ok_or_else(|| Error::NoSuchRole(child.to_string()))?;
        role.inherited_roles.retain(|name| name != parent);
        Ok(())
    }

    /// Flattens the named roles and everything they inherit into a snapshot.
    ///
    /// Unknown role names are skipped; inheritance cycles terminate because
    /// every role is visited at most once.
    pub async fn resolve(&self, role_names: &[String]) -> RoleSnapshot {
        let roles = self.roles.read().await;

        let mut snapshot = RoleSnapshot::default();
        let mut queue: VecDeque<&str> = role_names.iter().map(String::as_str).collect();

        while let Some(name) = queue.pop_front() {
            if !snapshot.names.insert(name.to_string()) {
                continue;
            }
            let Some(role) = roles.get(name) else {
                continue;
            };
            snapshot.superuser |= role.is_superuser;
            snapshot.grants.extend(role.grants.iter().cloned());
            queue.extend(role.inherited_roles.iter().map(String::as_str));
        }

        snapshot
    }
}

fn system_grant(permission: Permission) -> Grant {
    Grant {
        permission,
        resource: Resource::All,
        granted_by: "system".to_string(),
        with_grant_option: false,
    }
}

/// A statement-level authorization failure.
///
/// Fails only the offending statement; the connection stays open. The
/// protocol layer renders it with SQLSTATE `42501`.
#[derive(Debug, Clone, thiserror::Error)]
#[error("permission denied for user \"{username}\"")]
pub struct PrivilegeDenied {
    /// The session user that was denied.
    pub username: String,
}

/// Gates statement execution on the session's role snapshot.
#[derive(Debug, Clone)]
pub struct SessionAuthorizer {
    registry: Arc<RoleRegistry>,
}

impl SessionAuthorizer {
    /// Creates an authorizer over the given role registry.
    pub fn new(registry: Arc<RoleRegistry>) -> Self {
        Self { registry }
    }

    /// The underlying role registry.
    pub fn registry(&self) -> &Arc<RoleRegistry> {
        &self.registry
    }

    /// Resolves the role snapshot a user's session should carry.
    pub async fn snapshot_for(&self, user: &User) -> RoleSnapshot {
        self.registry.resolve(&user.roles).await
    }

    /// Whether the session may perform the operation.
    ///
    /// Pure over the session's login-time snapshot: no locks, no I/O, and
    /// role edits made after login are invisible here.
    pub fn authorize(&self, session: &Session, operation: &Operation) -> bool {
        session.is_superuser() || session.roles().allows(operation)
    }

    /// Like [`authorize`](Self::authorize), but yields the statement-level
    /// error the protocol layer sends on denial.
    pub fn check(
        &self,
        session: &Session,
        operation: &Operation,
    ) -> std::result::Result<(), PrivilegeDenied> {
        if self.authorize(session, operation) {
            Ok(())
        } else {
            Err(PrivilegeDenied {
                username: session.username().to_string(),
            })
        }
    }
}
