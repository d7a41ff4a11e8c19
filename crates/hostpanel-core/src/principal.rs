//! Verified caller identity handed to the core by the authentication layer.

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Maximum tenant identifier length.
pub const TENANT_MAX_LEN: usize = 64;

/// Privilege level of a caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Ordinary tenant.
    #[default]
    User,
    /// Elevated operator; may act on any tenant's sessions and schedules.
    Admin,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Admin => write!(f, "admin"),
        }
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("unknown role: {}", s)),
        }
    }
}

/// An authenticated tenant together with its privilege level.
///
/// The core trusts this value; constructing one is the authentication layer's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub tenant: String,
    pub role: Role,
    /// Remote address the request came from, recorded in activity events.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_address: Option<String>,
}

impl Principal {
    pub fn new(tenant: impl Into<String>, role: Role) -> Self {
        Self {
            tenant: tenant.into(),
            role,
            source_address: None,
        }
    }

    pub fn with_source_address(mut self, address: impl Into<String>) -> Self {
        self.source_address = Some(address.into());
        self
    }

    pub fn is_elevated(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this principal may operate on a resource owned by `owner`.
    pub fn may_act_for(&self, owner: &str) -> bool {
        self.is_elevated() || self.tenant == owner
    }

    /// Address used in activity events when none was recorded.
    pub fn source(&self) -> &str {
        self.source_address.as_deref().unwrap_or("unknown")
    }
}

/// Validate a tenant identifier before it is used as a directory name.
///
/// Rules:
/// - Not empty, at most [`TENANT_MAX_LEN`] characters
/// - Only ASCII alphanumerics, `_`, `-` and `.`
/// - Not `.` or `..`
pub fn validate_tenant_id(tenant: &str) -> CoreResult<()> {
    if tenant.is_empty() {
        return Err(CoreError::invalid("tenant identifier is empty"));
    }
    if tenant.len() > TENANT_MAX_LEN {
        return Err(CoreError::invalid(format!(
            "tenant identifier too long ({} > {TENANT_MAX_LEN})",
            tenant.len()
        )));
    }
    if tenant == "." || tenant == ".." {
        return Err(CoreError::invalid("tenant identifier cannot be '.' or '..'"));
    }
    if !tenant
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
    {
        return Err(CoreError::invalid(
            "tenant identifier contains invalid characters (allowed: A-Z, a-z, 0-9, _, -, .)",
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("ADMIN".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_may_act_for() {
        let alice = Principal::new("alice", Role::User);
        let admin = Principal::new("ops", Role::Admin);
        assert!(alice.may_act_for("alice"));
        assert!(!alice.may_act_for("bob"));
        assert!(admin.may_act_for("bob"));
    }

    #[test]
    fn test_validate_tenant_id() {
        assert!(validate_tenant_id("alice").is_ok());
        assert!(validate_tenant_id("alice.smith-2_x").is_ok());

        for bad in ["", ".", "..", "a/b", "a b", "ä", &"x".repeat(65)] {
            assert!(validate_tenant_id(bad).is_err(), "{bad:?} should fail");
        }
    }
}
