//! Closed role set and the authorization decision.
//!
//! Roles arrive from storage or tokens as free-form strings (`admin`,
//! `ROLE_ADMIN`, ` role_user `). They are normalized exactly once at that
//! boundary: trimmed, uppercased, `ROLE_` prefixed, deduplicated and sorted.
//! Everything past the boundary works with [`Role`].

use serde::{Deserialize, Serialize};
use tracing::warn;
use utoipa::ToSchema;
use uuid::Uuid;

const ROLE_PREFIX: &str = "ROLE_";

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema,
)]
pub enum Role {
    #[serde(rename = "ROLE_USER")]
    User,
    #[serde(rename = "ROLE_ADMIN")]
    Admin,
}

impl Role {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "ROLE_USER",
            Self::Admin => "ROLE_ADMIN",
        }
    }

    /// Parse a single role string, accepting any casing and an optional prefix.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        let upper = raw.trim().to_uppercase();
        if upper.is_empty() {
            return None;
        }
        let canonical = if upper.starts_with(ROLE_PREFIX) {
            upper
        } else {
            format!("{ROLE_PREFIX}{upper}")
        };
        match canonical.as_str() {
            "ROLE_USER" => Some(Self::User),
            "ROLE_ADMIN" => Some(Self::Admin),
            _ => None,
        }
    }
}

/// Canonical, ordered, duplicate-free role set.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct Roles(Vec<Role>);

impl Roles {
    #[must_use]
    pub fn new(roles: impl IntoIterator<Item = Role>) -> Self {
        let mut roles: Vec<Role> = roles.into_iter().collect();
        roles.sort_unstable();
        roles.dedup();
        Self(roles)
    }

    #[must_use]
    pub fn user() -> Self {
        Self::new([Role::User])
    }

    #[must_use]
    pub fn admin() -> Self {
        Self::new([Role::User, Role::Admin])
    }

    /// Normalize raw role strings. Unknown roles are dropped and reported.
    pub fn from_strings<I, S>(raw: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self::new(raw.into_iter().filter_map(|value| {
            let value = value.as_ref();
            let role = Role::parse(value);
            if role.is_none() {
                warn!(role = value, "ignoring unknown role");
            }
            role
        }))
    }

    #[must_use]
    pub fn contains(&self, role: Role) -> bool {
        self.0.contains(&role)
    }

    #[must_use]
    pub fn is_admin(&self) -> bool {
        self.contains(Role::Admin)
    }

    pub fn iter(&self) -> impl Iterator<Item = Role> + '_ {
        self.0.iter().copied()
    }

    #[must_use]
    pub fn to_strings(&self) -> Vec<String> {
        self.iter().map(|role| role.as_str().to_string()).collect()
    }
}

/// What an actor wants to do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Read,
    Update,
    Delete,
    Invite,
}

/// Pure authorization decision.
///
/// Administrators may do anything. Regular users may read, update or delete
/// resources they own. Inviting new users is reserved for administrators.
#[must_use]
pub fn can_access(
    actor_roles: &Roles,
    actor_id: Uuid,
    resource_owner_id: Option<Uuid>,
    action: Action,
) -> bool {
    if actor_roles.is_admin() {
        return true;
    }
    if !actor_roles.contains(Role::User) {
        return false;
    }
    match action {
        Action::Invite => false,
        Action::Read | Action::Update | Action::Delete => resource_owner_id == Some(actor_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_accepts_any_casing_and_prefix() {
        assert_eq!(Role::parse("admin"), Some(Role::Admin));
        assert_eq!(Role::parse(" role_admin "), Some(Role::Admin));
        assert_eq!(Role::parse("ROLE_USER"), Some(Role::User));
        assert_eq!(Role::parse("superuser"), None);
        assert_eq!(Role::parse(""), None);
    }

    #[test]
    fn roles_are_deduplicated_and_ordered() {
        let roles = Roles::from_strings(["admin", "ROLE_USER", "Role_Admin", "bogus"]);
        assert_eq!(roles.to_strings(), vec!["ROLE_USER", "ROLE_ADMIN"]);
    }

    #[test]
    fn roles_serialize_canonically() -> anyhow::Result<()> {
        let value = serde_json::to_value(Roles::admin())?;
        assert_eq!(value, serde_json::json!(["ROLE_USER", "ROLE_ADMIN"]));
        Ok(())
    }

    #[test]
    fn admin_can_do_anything() {
        let admin = Uuid::new_v4();
        let other = Uuid::new_v4();
        assert!(can_access(&Roles::admin(), admin, Some(other), Action::Delete));
        assert!(can_access(&Roles::admin(), admin, None, Action::Invite));
    }

    #[test]
    fn users_only_touch_their_own_resources() {
        let me = Uuid::new_v4();
        let other = Uuid::new_v4();
        let roles = Roles::user();
        assert!(can_access(&roles, me, Some(me), Action::Read));
        assert!(can_access(&roles, me, Some(me), Action::Update));
        assert!(!can_access(&roles, me, Some(other), Action::Read));
        assert!(!can_access(&roles, me, None, Action::Read));
        assert!(!can_access(&roles, me, Some(me), Action::Invite));
    }

    #[test]
    fn empty_roles_deny() {
        let me = Uuid::new_v4();
        assert!(!can_access(&Roles::default(), me, Some(me), Action::Read));
    }
}
