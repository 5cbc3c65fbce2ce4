//! Caller identity and the owner-or-admin authorization policy.
//!
//! Authentication happens upstream; this crate only decides whether an
//! already identified caller may act on a resource.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role attached to an authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }

    pub fn is_elevated(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("unknown role '{0}'")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
    type Err = UnknownRole;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(UnknownRole(other.to_string())),
        }
    }
}

/// An authenticated caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: Uuid,
    pub role: Role,
}

impl Actor {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::User,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id,
            role: Role::Admin,
        }
    }
}

/// Authorization decisions consumed by the catalog.
pub trait Authorizer: Send + Sync {
    /// Whether `actor` may mutate a resource owned by `owner`.
    fn may_modify(&self, actor: &Actor, owner: Uuid) -> bool;

    /// Whether `actor` may run catalog-wide maintenance.
    fn may_administer(&self, actor: &Actor) -> bool;
}

/// Owners act on their own resources; admins act on everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct OwnerOrAdmin;

impl Authorizer for OwnerOrAdmin {
    fn may_modify(&self, actor: &Actor, owner: Uuid) -> bool {
        let allowed = actor.user_id == owner || actor.role.is_elevated();
        if !allowed {
            tracing::debug!(
                user_id = %actor.user_id,
                role = %actor.role,
                owner = %owner,
                "modification denied"
            );
        }
        allowed
    }

    fn may_administer(&self, actor: &Actor) -> bool {
        actor.role.is_elevated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn owner_may_modify_own_resource() {
        let owner = Uuid::new_v4();
        assert!(OwnerOrAdmin.may_modify(&Actor::user(owner), owner));
    }

    #[test]
    fn stranger_may_not_modify() {
        let owner = Uuid::new_v4();
        assert!(!OwnerOrAdmin.may_modify(&Actor::user(Uuid::new_v4()), owner));
    }

    #[test]
    fn admin_may_modify_anything_and_administer() {
        let admin = Actor::admin(Uuid::new_v4());
        assert!(OwnerOrAdmin.may_modify(&admin, Uuid::new_v4()));
        assert!(OwnerOrAdmin.may_administer(&admin));
        assert!(!OwnerOrAdmin.may_administer(&Actor::user(Uuid::new_v4())));
    }

    #[test]
    fn role_parsing() {
        assert_eq!("Admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!(" user ".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
    }
}
