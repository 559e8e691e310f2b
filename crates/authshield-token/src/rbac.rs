//! Role-to-permission checks on verified claims.

use crate::claims::ClaimSet;
use crate::{Error, Result};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Claim holding the caller's role.
pub const ROLE_CLAIM: &str = "role";

/// Static role table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RolePolicy {
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::from_iter([
            ("user", vec!["read"]),
            ("admin", vec!["read", "write", "delete"]),
        ])
    }
}

impl<R, P, I> FromIterator<(R, I)> for RolePolicy
where
    R: Into<String>,
    P: Into<String>,
    I: IntoIterator<Item = P>,
{
    fn from_iter<T: IntoIterator<Item = (R, I)>>(iter: T) -> Self {
        let roles = iter
            .into_iter()
            .map(|(role, perms)| (role.into(), perms.into_iter().map(Into::into).collect()))
            .collect();
        Self { roles }
    }
}

impl RolePolicy {
    /// True if `role` exists and grants `permission`.
    pub fn allows(&self, role: &str, permission: &str) -> bool {
        self.roles
            .get(role)
            .is_some_and(|perms| perms.contains(permission))
    }

    /// Check the `role` claim of already-verified `claims`.
    ///
    /// Fails with [`Error::Forbidden`] when the claim is missing, unknown,
    /// or lacks `permission`.
    pub fn authorize(&self, claims: &ClaimSet, permission: &str) -> Result<()> {
        let role = claims
            .get(ROLE_CLAIM)
            .and_then(|v| v.as_str())
            .ok_or_else(|| Error::Forbidden("token carries no role".to_string()))?;

        if self.allows(role, permission) {
            Ok(())
        } else {
            Err(Error::Forbidden(format!(
                "role {role} lacks permission {permission}"
            )))
        }
    }

    /// Known role names.
    pub fn roles(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_roles() {
        let policy = RolePolicy::default();
        assert!(policy.allows("user", "read"));
        assert!(!policy.allows("user", "write"));
        assert!(policy.allows("admin", "delete"));
        assert!(!policy.allows("guest", "read"));
    }

    #[test]
    fn authorize_reads_role_claim() {
        let policy = RolePolicy::default();
        let admin = ClaimSet::for_subject("a").with(ROLE_CLAIM, "admin");
        let user = ClaimSet::for_subject("b").with(ROLE_CLAIM, "user");

        assert!(policy.authorize(&admin, "write").is_ok());
        assert!(matches!(
            policy.authorize(&user, "write"),
            Err(Error::Forbidden(_))
        ));
        assert!(matches!(
            policy.authorize(&ClaimSet::for_subject("c"), "read"),
            Err(Error::Forbidden(_))
        ));
    }

    #[test]
    fn deserializes_from_toml_table() {
        let policy: RolePolicy = toml::from_str("editor = [\"read\", \"write\"]").unwrap();
        assert!(policy.allows("editor", "write"));
        assert_eq!(policy.roles().collect::<Vec<_>>(), vec!["editor"]);
    }
}
