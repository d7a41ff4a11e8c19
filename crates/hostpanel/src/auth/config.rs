//! Authentication configuration.

use serde::{Deserialize, Serialize};

/// Minimum accepted length of the HS256 secret.
pub const MIN_SECRET_LEN: usize = 32;

/// Authentication configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    /// JWT secret for HS256, either literal or `env:VAR_NAME`.
    pub jwt_secret: Option<String>,

    /// Allowed CORS origins. If empty, cross-origin requests are denied.
    pub allowed_origins: Vec<String>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            // No default JWT secret - must be explicitly configured
            jwt_secret: None,
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
        }
    }
}

impl AuthConfig {
    /// Resolve the JWT secret, expanding `env:VAR_NAME` syntax.
    /// Returns the resolved secret or None if not configured.
    pub fn resolve_jwt_secret(&self) -> Result<Option<String>, ConfigValidationError> {
        match &self.jwt_secret {
            None => Ok(None),
            Some(value) => {
                if let Some(var_name) = value.strip_prefix("env:") {
                    match std::env::var(var_name) {
                        Ok(secret) if !secret.is_empty() => Ok(Some(secret)),
                        Ok(_) => Err(ConfigValidationError::EnvVarEmpty(var_name.to_string())),
                        Err(_) => Err(ConfigValidationError::EnvVarNotFound(var_name.to_string())),
                    }
                } else {
                    Ok(Some(value.clone()))
                }
            }
        }
    }

    /// Validate the configuration before serving.
    pub fn validate(&self) -> Result<(), ConfigValidationError> {
        let secret = self
            .resolve_jwt_secret()?
            .ok_or(ConfigValidationError::MissingJwtSecret)?;
        if secret.len() < MIN_SECRET_LEN {
            return Err(ConfigValidationError::JwtSecretTooShort);
        }
        Ok(())
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConfigValidationError {
    MissingJwtSecret,
    /// JWT secret is too short (minimum 32 characters).
    JwtSecretTooShort,
    /// Environment variable not found (for `env:VAR_NAME` syntax).
    EnvVarNotFound(String),
    /// Environment variable is empty (for `env:VAR_NAME` syntax).
    EnvVarEmpty(String),
}

impl std::fmt::Display for ConfigValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingJwtSecret => {
                write!(
                    f,
                    "JWT secret is required. Set HOSTPANEL__AUTH__JWT_SECRET or auth.jwt_secret in config."
                )
            }
            Self::JwtSecretTooShort => {
                write!(
                    f,
                    "JWT secret must be at least {MIN_SECRET_LEN} characters long."
                )
            }
            Self::EnvVarNotFound(var) => {
                write!(
                    f,
                    "Environment variable '{}' not found (referenced via env:{} in config).",
                    var, var
                )
            }
            Self::EnvVarEmpty(var) => {
                write!(
                    f,
                    "Environment variable '{}' is empty (referenced via env:{} in config).",
                    var, var
                )
            }
        }
    }
}

impl std::error::Error for ConfigValidationError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_secret(secret: &str) -> AuthConfig {
        AuthConfig {
            jwt_secret: Some(secret.to_string()),
            ..AuthConfig::default()
        }
    }

    #[test]
    fn test_missing_secret_rejected() {
        assert_eq!(
            AuthConfig::default().validate(),
            Err(ConfigValidationError::MissingJwtSecret)
        );
    }

    #[test]
    fn test_short_secret_rejected() {
        assert_eq!(
            with_secret("short").validate(),
            Err(ConfigValidationError::JwtSecretTooShort)
        );
        assert!(with_secret(&"x".repeat(MIN_SECRET_LEN)).validate().is_ok());
    }

    #[test]
    fn test_env_secret_missing_variable() {
        let config = with_secret("env:HOSTPANEL_TEST_SECRET_THAT_IS_NEVER_SET");
        assert_eq!(
            config.resolve_jwt_secret(),
            Err(ConfigValidationError::EnvVarNotFound(
                "HOSTPANEL_TEST_SECRET_THAT_IS_NEVER_SET".to_string()
            ))
        );
    }

    #[test]
    fn test_literal_secret_passthrough() {
        let config = with_secret("literal-value");
        assert_eq!(
            config.resolve_jwt_secret().unwrap().as_deref(),
            Some("literal-value")
        );
    }
}
