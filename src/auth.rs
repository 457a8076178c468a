//! Authentication tiers for the public API surface (C9): end-user JWTs,
//! admin JWTs (an elevated claim on the same token family), and a shared
//! service secret for sibling-service calls (spec.md §6).

use crate::errors::{EngineError, Result};
use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::StatusCode;
use jsonwebtoken::{decode, DecodingKey, Validation};
use serde::{Deserialize, Serialize};

/// Claims carried by a user/admin JWT.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    #[serde(default)]
    pub is_admin: bool,
    pub exp: usize,
}

#[derive(Clone)]
pub struct AuthKeys {
    pub jwt_secret: String,
    pub service_secret: String,
}

impl AuthKeys {
    fn decode(&self, token: &str) -> Result<Claims> {
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.jwt_secret.as_bytes()),
            &Validation::default(),
        )?;
        Ok(data.claims)
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
}

/// Extractor proving the caller is an authenticated user (admin or not).
#[derive(Debug, Clone)]
pub struct AuthenticatedUser {
    pub user_id: String,
    pub is_admin: bool,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedUser
where
    S: Send + Sync,
    AuthKeys: axum::extract::FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let token = bearer_token(parts).ok_or((StatusCode::UNAUTHORIZED, "missing bearer token".to_string()))?;
        let claims = keys
            .decode(token)
            .map_err(|e| (StatusCode::UNAUTHORIZED, e.to_string()))?;
        Ok(AuthenticatedUser {
            user_id: claims.sub,
            is_admin: claims.is_admin,
        })
    }
}

/// Extractor that additionally requires the `is_admin` claim.
#[derive(Debug, Clone)]
pub struct AuthenticatedAdmin {
    pub admin_id: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedAdmin
where
    S: Send + Sync,
    AuthKeys: axum::extract::FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let user = AuthenticatedUser::from_request_parts(parts, state).await?;
        if !user.is_admin {
            return Err((StatusCode::FORBIDDEN, "admin privileges required".to_string()));
        }
        Ok(AuthenticatedAdmin { admin_id: user.user_id })
    }
}

/// Extractor for sibling-service calls: a shared secret in `X-Service-Secret`,
/// plus an audit-only `X-Service-Name` header naming the caller.
#[derive(Debug, Clone)]
pub struct AuthenticatedService {
    pub service_name: String,
}

#[axum::async_trait]
impl<S> FromRequestParts<S> for AuthenticatedService
where
    S: Send + Sync,
    AuthKeys: axum::extract::FromRef<S>,
{
    type Rejection = (StatusCode, String);

    async fn from_request_parts(parts: &mut Parts, state: &S) -> std::result::Result<Self, Self::Rejection> {
        let keys = AuthKeys::from_ref(state);
        let provided = parts
            .headers
            .get("x-service-secret")
            .and_then(|v| v.to_str().ok())
            .ok_or((StatusCode::UNAUTHORIZED, "missing x-service-secret header".to_string()))?;
        if provided != keys.service_secret {
            return Err((StatusCode::UNAUTHORIZED, "invalid service secret".to_string()));
        }
        let service_name = parts
            .headers
            .get("x-service-name")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("unknown-service")
            .to_string();
        Ok(AuthenticatedService { service_name })
    }
}

/// Issues a JWT for `user_id`, used by the login/service-account flows that
/// front this engine (kept here so the HMAC key handling lives in one place).
pub fn issue_token(keys: &AuthKeys, user_id: &str, is_admin: bool, ttl_seconds: usize) -> Result<String> {
    use jsonwebtoken::{encode, EncodingKey, Header};
    let exp = (crate::utils::now().timestamp() as usize).saturating_add(ttl_seconds);
    let claims = Claims {
        sub: user_id.to_string(),
        is_admin,
        exp,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(keys.jwt_secret.as_bytes()))
        .map_err(EngineError::from)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_token_decodes_back_to_the_same_claims() {
        let keys = AuthKeys {
            jwt_secret: "test-secret".to_string(),
            service_secret: "svc-secret".to_string(),
        };
        let token = issue_token(&keys, "user-1", true, 3600).unwrap();
        let claims = keys.decode(&token).unwrap();
        assert_eq!(claims.sub, "user-1");
        assert!(claims.is_admin);
    }

    #[test]
    fn tampered_secret_fails_decode() {
        let keys = AuthKeys {
            jwt_secret: "test-secret".to_string(),
            service_secret: "svc-secret".to_string(),
        };
        let other = AuthKeys {
            jwt_secret: "different".to_string(),
            service_secret: "svc-secret".to_string(),
        };
        let token = issue_token(&keys, "user-1", false, 3600).unwrap();
        assert!(other.decode(&token).is_err());
    }
}
