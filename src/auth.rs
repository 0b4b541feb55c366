use async_trait::async_trait;
use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header, request::Parts},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

use crate::errors::ServiceError;
use crate::AppState;

/// Permission strings checked per operation. The authorization collaborator
/// mints tokens carrying these; the core only verifies and consumes them.
pub mod consts {
    pub const MOVEMENTS_CREATE: &str = "movements:create";
    pub const MOVEMENTS_UPDATE: &str = "movements:update";
    pub const MOVEMENTS_PUBLISH: &str = "movements:publish";
    pub const MOVEMENTS_VOID: &str = "movements:void";
    pub const MOVEMENTS_READ: &str = "movements:read";
    pub const KARDEX_READ: &str = "kardex:read";
    pub const AUDIT_READ: &str = "audit:read";
    pub const STOCK_READ: &str = "stock:read";
    pub const STOCK_RECALCULATE: &str = "stock:recalculate";
    pub const STOCK_OVERRIDE_COST: &str = "stock:override_cost";
}

/// Claims carried by tokens issued by the authorization collaborator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub permissions: Vec<String>,
    pub iat: i64,
    pub exp: i64,
}

/// Authenticated caller identity extracted from the Bearer token.
/// Used for permission gating and audit attribution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthUser {
    pub user_id: String,
    pub roles: Vec<String>,
    pub permissions: Vec<String>,
}

impl AuthUser {
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn has_permission(&self, permission: &str) -> bool {
        self.permissions.iter().any(|p| p == permission)
    }

    /// Admins hold every permission implicitly
    pub fn require_permission(&self, permission: &str) -> Result<(), ServiceError> {
        if self.has_role("admin") || self.has_permission(permission) {
            Ok(())
        } else {
            Err(ServiceError::Forbidden(format!(
                "Missing permission: {}",
                permission
            )))
        }
    }
}

/// Verifies Bearer tokens against the shared secret
#[derive(Clone)]
pub struct TokenVerifier {
    decoding_key: DecodingKey,
    validation: Validation,
}

impl TokenVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            decoding_key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    pub fn verify(&self, token: &str) -> Result<Claims, ServiceError> {
        decode::<Claims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| ServiceError::Unauthenticated(format!("Invalid token: {}", e)))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
    AppState: FromRef<S>,
{
    type Rejection = ServiceError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let app_state = AppState::from_ref(state);

        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                ServiceError::Unauthenticated("Missing Authorization header".to_string())
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            ServiceError::Unauthenticated("Authorization header must be a Bearer token".to_string())
        })?;

        let claims = app_state.token_verifier.verify(token.trim())?;

        Ok(AuthUser {
            user_id: claims.sub,
            roles: claims.roles,
            permissions: claims.permissions,
        })
    }
}
