//! Authentication middleware.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{ConnectInfo, FromRequestParts, State},
    http::{header::AUTHORIZATION, request::Parts},
    middleware::Next,
    response::Response,
};
use hostpanel_core::Principal;
use hostpanel_core::principal::validate_tenant_id;
use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use tracing::{debug, warn};

use super::{AuthConfig, AuthError, Claims};

/// Extract a Bearer token from an Authorization header value.
fn bearer_token_from_header(header_value: &str) -> Result<&str, AuthError> {
    let mut parts = header_value.split_whitespace();
    let scheme = parts.next().ok_or(AuthError::InvalidAuthHeader)?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return Err(AuthError::InvalidAuthHeader);
    }

    let token = parts.next().ok_or(AuthError::InvalidAuthHeader)?;
    if token.is_empty() {
        return Err(AuthError::InvalidAuthHeader);
    }

    if parts.next().is_some() {
        return Err(AuthError::InvalidAuthHeader);
    }

    Ok(token)
}

/// Value of the `token` query parameter, URL-decoded.
fn token_from_query(query: &str) -> Option<String> {
    query.split('&').find_map(|pair| {
        let (key, value) = pair.split_once('=')?;
        if key == "token" {
            urlencoding::decode(value).ok().map(|s| s.into_owned())
        } else {
            None
        }
    })
}

/// Authentication state shared across handlers.
#[derive(Clone)]
pub struct AuthState {
    config: Arc<AuthConfig>,
    decoding_key: Option<DecodingKey>,
}

impl AuthState {
    /// Create auth state from config.
    /// Resolves `env:VAR_NAME` syntax in jwt_secret at construction time.
    pub fn new(mut config: AuthConfig) -> Self {
        match config.resolve_jwt_secret() {
            Ok(resolved) => config.jwt_secret = resolved,
            Err(err) => {
                warn!("JWT secret could not be resolved: {}", err);
                config.jwt_secret = None;
            }
        }

        let decoding_key = config
            .jwt_secret
            .as_ref()
            .map(|s| DecodingKey::from_secret(s.as_bytes()));

        Self {
            config: Arc::new(config),
            decoding_key,
        }
    }

    /// Get allowed CORS origins from config.
    pub fn allowed_origins(&self) -> &[String] {
        &self.config.allowed_origins
    }

    /// Validate a JWT token and the tenant it names.
    pub fn validate_token(&self, token: &str) -> Result<Claims, AuthError> {
        let decoding_key = self
            .decoding_key
            .as_ref()
            .ok_or_else(|| AuthError::Internal("no JWT secret configured".to_string()))?;

        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;

        let token_data = decode::<Claims>(token, decoding_key, &validation).map_err(|e| {
            debug!("JWT validation failed: {:?}", e);
            match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::InvalidToken(e.to_string()),
            }
        })?;

        validate_tenant_id(&token_data.claims.sub)
            .map_err(|_| AuthError::InvalidTenant(token_data.claims.sub.clone()))?;
        Ok(token_data.claims)
    }
}

/// Authenticated tenant extracted from request.
#[derive(Debug, Clone)]
pub struct CurrentUser {
    pub claims: Claims,
    /// Peer address of the connection, when the server records it.
    pub source_address: Option<String>,
}

impl CurrentUser {
    pub fn id(&self) -> &str {
        &self.claims.sub
    }

    pub fn is_admin(&self) -> bool {
        self.claims.is_admin()
    }

    /// Identity handed to the core.
    pub fn principal(&self) -> Principal {
        let principal = Principal::new(self.claims.sub.clone(), self.claims.effective_role());
        match &self.source_address {
            Some(address) => principal.with_source_address(address.clone()),
            None => principal,
        }
    }
}

impl<S> FromRequestParts<S> for CurrentUser
where
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<CurrentUser>()
            .cloned()
            .ok_or(AuthError::MissingAuthHeader)
    }
}

/// Authentication middleware.
///
/// Validates JWT tokens and injects `CurrentUser` into request extensions.
/// Supports, in priority order:
/// 1. Authorization: Bearer <token> header
/// 2. token query parameter (for WebSocket connections)
pub async fn auth_middleware(
    State(auth): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let auth_header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|h| h.to_str().ok());

    let claims = if let Some(header) = auth_header {
        let token = bearer_token_from_header(header)?;
        auth.validate_token(token)?
    } else if let Some(token) = req.uri().query().and_then(token_from_query) {
        auth.validate_token(&token)?
    } else {
        return Err(AuthError::MissingAuthHeader);
    };

    let source_address = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string());

    let user = CurrentUser {
        claims,
        source_address,
    };
    req.extensions_mut().insert(user);

    Ok(next.run(req).await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hostpanel_core::Role;
    use jsonwebtoken::{EncodingKey, Header, encode};

    const SECRET: &str = "test-secret-for-unit-tests-minimum-32-chars-long";

    fn state() -> AuthState {
        AuthState::new(AuthConfig {
            jwt_secret: Some(SECRET.to_string()),
            ..AuthConfig::default()
        })
    }

    fn token(sub: &str, exp_offset: i64, role: Option<&str>) -> String {
        let claims = Claims {
            sub: sub.to_string(),
            iss: None,
            exp: Utc::now().timestamp() + exp_offset,
            iat: Some(Utc::now().timestamp()),
            jti: None,
            roles: vec![],
            role: role.map(str::to_string),
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(SECRET.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_bearer_token_from_header_valid() {
        assert_eq!(
            bearer_token_from_header("Bearer abc.def.ghi").unwrap(),
            "abc.def.ghi"
        );
        assert_eq!(
            bearer_token_from_header("bearer   token123").unwrap(),
            "token123"
        );
        assert_eq!(
            bearer_token_from_header("   Bearer\tmixed-case ").unwrap(),
            "mixed-case"
        );
    }

    #[test]
    fn test_bearer_token_from_header_invalid() {
        let cases = [
            "",
            "Bearer",
            "Bearer ",
            "Token something",
            "Bearer token extra",
            "bear token",
        ];

        for case in cases {
            assert!(
                bearer_token_from_header(case).is_err(),
                "{case} should fail"
            );
        }
    }

    #[test]
    fn test_token_from_query() {
        assert_eq!(
            token_from_query("a=1&token=abc%2Edef").as_deref(),
            Some("abc.def")
        );
        assert_eq!(token_from_query("tokens=abc"), None);
        assert_eq!(token_from_query("token"), None);
    }

    #[test]
    fn test_validate_token() {
        let claims = state().validate_token(&token("alice", 3600, None)).unwrap();
        assert_eq!(claims.sub, "alice");
        assert_eq!(claims.effective_role(), Role::User);

        let admin = state()
            .validate_token(&token("ops", 3600, Some("admin")))
            .unwrap();
        assert!(admin.is_admin());
    }

    #[test]
    fn test_validate_token_rejections() {
        assert!(matches!(
            state().validate_token(&token("alice", -3600, None)),
            Err(AuthError::TokenExpired)
        ));
        assert!(matches!(
            state().validate_token(&token("../etc", 3600, None)),
            Err(AuthError::InvalidTenant(_))
        ));
        assert!(matches!(
            state().validate_token("not-a-jwt"),
            Err(AuthError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_validate_without_secret() {
        let state = AuthState::new(AuthConfig::default());
        assert!(matches!(
            state.validate_token(&token("alice", 3600, None)),
            Err(AuthError::Internal(_))
        ));
    }

    #[test]
    fn test_current_user_principal() {
        let claims = Claims {
            sub: "alice".to_string(),
            iss: None,
            exp: 0,
            iat: None,
            jti: None,
            roles: vec!["admin".to_string()],
            role: None,
        };
        let user = CurrentUser {
            claims,
            source_address: Some("10.0.0.7".to_string()),
        };
        let principal = user.principal();
        assert_eq!(user.id(), "alice");
        assert!(principal.is_elevated());
        assert_eq!(principal.source(), "10.0.0.7");
    }
}
