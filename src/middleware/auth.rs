//! Authentication middleware
//!
//! Session issuance lives in an external collaborator; this pipeline only
//! verifies the JWTs it mints and extracts the actor identity. Admin-facing
//! endpoints additionally require the admin role claim.

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use axum_extra::{
    headers::{authorization::Bearer, Authorization},
    TypedHeader,
};
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

/// JWT verification errors
#[derive(Error, Debug)]
pub enum JwtError {
    #[error("Token expired")]
    TokenExpired,

    #[error("Invalid token: {0}")]
    InvalidToken(String),
}

/// Claims carried by actor tokens issued by the auth collaborator
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Claims {
    /// Subject (actor ID)
    pub sub: String,
    /// Actor role
    pub role: String,
    /// Issued at (Unix timestamp)
    pub iat: i64,
    /// Expiration (Unix timestamp)
    pub exp: i64,
}

/// Token verifier held in application state
#[derive(Clone)]
pub struct AuthVerifier {
    secret: Arc<String>,
}

impl AuthVerifier {
    pub fn new(secret: &str) -> Self {
        Self {
            secret: Arc::new(secret.to_string()),
        }
    }

    /// Verify a bearer token and return its claims
    pub fn verify(&self, token: &str) -> Result<Claims, JwtError> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &Validation::default(),
        )
        .map_err(|e| match e.kind() {
            jsonwebtoken::errors::ErrorKind::ExpiredSignature => JwtError::TokenExpired,
            _ => JwtError::InvalidToken(e.to_string()),
        })?;

        Ok(data.claims)
    }
}

/// Actor roles recognized by this pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    Customer,
    Provider,
    Admin,
}

impl ActorRole {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "customer" => Some(ActorRole::Customer),
            "provider" => Some(ActorRole::Provider),
            "admin" => Some(ActorRole::Admin),
            _ => None,
        }
    }
}

/// Authenticated actor extracted from the bearer token
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub actor_id: Uuid,
    pub role: ActorRole,
}

impl AuthenticatedUser {
    pub fn is_admin(&self) -> bool {
        self.role == ActorRole::Admin
    }
}

/// Admin actor; extraction fails with 403 for non-admin tokens
#[derive(Debug, Clone)]
pub struct AdminUser {
    pub admin_id: Uuid,
}

/// Error response for authentication failures
#[derive(Debug, Serialize)]
struct AuthErrorBody {
    error: AuthErrorDetails,
}

#[derive(Debug, Serialize)]
struct AuthErrorDetails {
    code: String,
    message: String,
}

fn auth_error(status: StatusCode, code: &str, message: &str) -> Response {
    let body = AuthErrorBody {
        error: AuthErrorDetails {
            code: code.to_string(),
            message: message.to_string(),
        },
    };
    (status, Json(body)).into_response()
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    AuthVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let TypedHeader(Authorization(bearer)) =
            TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
                .await
                .map_err(|_| {
                    auth_error(
                        StatusCode::UNAUTHORIZED,
                        "MISSING_TOKEN",
                        "Authorization header with Bearer token required",
                    )
                })?;

        let verifier = AuthVerifier::from_ref(state);

        let claims = verifier.verify(bearer.token()).map_err(|e| match e {
            JwtError::TokenExpired => {
                auth_error(StatusCode::UNAUTHORIZED, "TOKEN_EXPIRED", "Token has expired")
            }
            JwtError::InvalidToken(_) => {
                auth_error(StatusCode::UNAUTHORIZED, "INVALID_TOKEN", "Invalid token")
            }
        })?;

        let actor_id = Uuid::parse_str(&claims.sub).map_err(|_| {
            auth_error(
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Invalid actor ID in token",
            )
        })?;

        let role = ActorRole::parse(&claims.role).ok_or_else(|| {
            auth_error(
                StatusCode::UNAUTHORIZED,
                "INVALID_TOKEN",
                "Unknown role in token",
            )
        })?;

        Ok(AuthenticatedUser { actor_id, role })
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AdminUser
where
    AuthVerifier: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Response;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;

        if !user.is_admin() {
            return Err(auth_error(
                StatusCode::FORBIDDEN,
                "FORBIDDEN",
                "Admin role required",
            ));
        }

        Ok(AdminUser {
            admin_id: user.actor_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jsonwebtoken::{encode, EncodingKey, Header};

    fn token_with(role: &str, secret: &str, exp_offset: i64) -> String {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            sub: Uuid::new_v4().to_string(),
            role: role.to_string(),
            iat: now,
            exp: now + exp_offset,
        };
        encode(
            &Header::default(),
            &claims,
            &EncodingKey::from_secret(secret.as_bytes()),
        )
        .unwrap()
    }

    #[test]
    fn test_verify_valid_token() {
        let verifier = AuthVerifier::new("test-secret");
        let token = token_with("admin", "test-secret", 3600);

        let claims = verifier.verify(&token).unwrap();
        assert_eq!(claims.role, "admin");
    }

    #[test]
    fn test_verify_rejects_wrong_secret() {
        let verifier = AuthVerifier::new("test-secret");
        let token = token_with("admin", "other-secret", 3600);

        assert!(matches!(
            verifier.verify(&token),
            Err(JwtError::InvalidToken(_))
        ));
    }

    #[test]
    fn test_verify_rejects_expired_token() {
        let verifier = AuthVerifier::new("test-secret");
        let token = token_with("admin", "test-secret", -3600);

        assert!(matches!(verifier.verify(&token), Err(JwtError::TokenExpired)));
    }

    #[test]
    fn test_actor_role_parse() {
        assert_eq!(ActorRole::parse("admin"), Some(ActorRole::Admin));
        assert_eq!(ActorRole::parse("customer"), Some(ActorRole::Customer));
        assert_eq!(ActorRole::parse("provider"), Some(ActorRole::Provider));
        assert_eq!(ActorRole::parse("superuser"), None);
    }
}
