//! Authentication module.
//!
//! Validates HS256 bearer tokens and turns them into the [`hostpanel_core::Principal`]
//! the core operates on. Token issuance happens elsewhere.

mod claims;
mod config;
mod error;
mod middleware;

pub use claims::Claims;
pub use config::{AuthConfig, ConfigValidationError, MIN_SECRET_LEN};
pub use error::AuthError;
pub use middleware::{AuthState, CurrentUser, auth_middleware};
