use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use be_auth_core::{Claims, JwtConfig, Role};
use uuid::Uuid;

use crate::error::PaymentError;

/// The authenticated caller as seen by the payment flows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub role: Role,
}

impl Principal {
    pub fn from_claims(claims: &Claims) -> Result<Self, PaymentError> {
        let id = claims
            .user_id()
            .map_err(|e| PaymentError::Unauthorized(e.to_string()))?;
        Ok(Self {
            id,
            username: claims.username.clone(),
            email: claims.email.clone(),
            role: claims.role,
        })
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

pub struct AuthUser(pub Principal);

impl<S> FromRequestParts<S> for AuthUser
where
    S: Send + Sync,
{
    type Rejection = PaymentError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let jwt_config = parts.extensions.get::<Arc<JwtConfig>>().ok_or_else(|| {
            PaymentError::Internal(anyhow::anyhow!("JwtConfig not found in extensions"))
        })?;

        let auth_header = parts
            .headers
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| {
                PaymentError::Unauthorized("Missing authorization header".to_string())
            })?;

        let token = auth_header.strip_prefix("Bearer ").ok_or_else(|| {
            PaymentError::Unauthorized("Authorization header must start with 'Bearer '".to_string())
        })?;

        let claims = jwt_config
            .validate_access_token(token)
            .map_err(|e| PaymentError::Unauthorized(e.to_string()))?;

        Ok(AuthUser(Principal::from_claims(&claims)?))
    }
}

/// An [`AuthUser`] holding the admin role.
pub struct AdminUser(pub Principal);

impl<S> FromRequestParts<S> for AdminUser
where
    S: Send + Sync,
{
    type Rejection = PaymentError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let AuthUser(principal) = AuthUser::from_request_parts(parts, state).await?;
        if !principal.is_admin() {
            return Err(PaymentError::Forbidden(
                "Admin role required for this operation".to_string(),
            ));
        }
        Ok(AdminUser(principal))
    }
}
