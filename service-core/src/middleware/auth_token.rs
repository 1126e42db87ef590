use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::{header, request::Parts};

use crate::error::AppError;

/// Bearer token forwarded to the catalog and customer registries.
///
/// The billing services do not validate tokens themselves; the registries do.
/// A missing header yields an empty token so that registries configured without
/// authentication keep working.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthToken(pub String);

impl AuthToken {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for AuthToken
where
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
            return Ok(AuthToken::default());
        };

        let value = value.to_str().map_err(|_| {
            AppError::Unauthorized(anyhow::anyhow!("Authorization header is not valid ASCII"))
        })?;

        let token = value.strip_prefix("Bearer ").ok_or_else(|| {
            AppError::Unauthorized(anyhow::anyhow!(
                "Authorization header must use the Bearer scheme"
            ))
        })?;

        Ok(AuthToken(token.trim().to_string()))
    }
}
