//! JWT claims carried by control panel tokens.

use hostpanel_core::Role;
use serde::{Deserialize, Serialize};

/// JWT claims structure.
///
/// `sub` names the tenant. The role comes from either the `role` claim or the
/// `roles` array.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (tenant identifier).
    pub sub: String,

    #[serde(default)]
    pub iss: Option<String>,

    /// Expiration time (as Unix timestamp).
    pub exp: i64,

    #[serde(default)]
    pub iat: Option<i64>,

    #[serde(default)]
    pub jti: Option<String>,

    #[serde(default)]
    pub roles: Vec<String>,

    /// Custom role claim (alternative to roles array).
    #[serde(default)]
    pub role: Option<String>,
}

impl Claims {
    /// Get the effective role for the tenant.
    pub fn effective_role(&self) -> Role {
        let admin = self
            .role
            .iter()
            .chain(self.roles.iter())
            .any(|role| role.parse::<Role>() == Ok(Role::Admin));
        if admin { Role::Admin } else { Role::User }
    }

    pub fn is_admin(&self) -> bool {
        self.effective_role() == Role::Admin
    }
}
