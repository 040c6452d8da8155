use axum::{extract::FromRequestParts, http::request::Parts};

use super::jwt::{self, Identity};
use crate::error::GatewayError;

/// JWT secret stored in request extensions for the identity extractors.
#[derive(Clone)]
pub struct JwtSecret(pub Vec<u8>);

fn secret_from(parts: &Parts) -> Result<&JwtSecret, GatewayError> {
    parts
        .extensions
        .get::<JwtSecret>()
        .ok_or_else(|| GatewayError::Transient("JWT secret not available".to_string()))
}

fn bearer_from(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Identity taken from `Authorization: Bearer <jwt>`. Rejects with 401.
#[derive(Debug, Clone)]
pub struct AuthIdentity(pub Identity);

impl<S> FromRequestParts<S> for AuthIdentity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let secret = secret_from(parts)?;
        let raw = bearer_from(parts).ok_or(GatewayError::Unauthorized)?;
        let identity = jwt::verify(&secret.0, raw).map_err(|_| GatewayError::Unauthorized)?;
        Ok(AuthIdentity(identity))
    }
}

/// Soft-fail variant: a missing or bad token yields an anonymous request.
#[derive(Debug, Clone)]
pub struct MaybeIdentity(pub Option<Identity>);

impl<S> FromRequestParts<S> for MaybeIdentity
where
    S: Send + Sync,
{
    type Rejection = GatewayError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let secret = secret_from(parts)?;
        let identity = match bearer_from(parts) {
            Some(raw) => match jwt::verify(&secret.0, raw) {
                Ok(identity) => Some(identity),
                Err(e) => {
                    tracing::debug!(error = %e, "Ignoring bad bearer token");
                    None
                }
            },
            None => None,
        };
        Ok(MaybeIdentity(identity))
    }
}

impl MaybeIdentity {
    pub fn require(self) -> Result<Identity, GatewayError> {
        self.0.ok_or(GatewayError::Unauthorized)
    }
}
