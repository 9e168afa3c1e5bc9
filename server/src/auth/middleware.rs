//! Request extractors for the caller's credentials and tenant.
//!
//! Devices authenticate with a shared bearer token. When `AUTH_SECRET` is
//! unset the server runs in development mode and accepts anonymous requests.

use axum::{
    extract::FromRequestParts,
    http::{header::AUTHORIZATION, request::Parts},
};

use crate::error::AppError;
use crate::AppState;

/// Header naming the tenant a request acts for.
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Authenticated caller extracted from request.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthUser {
    /// The bearer token, or `anonymous` in development mode
    pub token: String,
}

/// Check a bearer header against the configured secret.
pub fn authorize(header: Option<&str>, secret: Option<&str>) -> Result<AuthUser, AppError> {
    match header {
        Some(header) if header.starts_with("Bearer ") => {
            let token = header.trim_start_matches("Bearer ");
            if token.is_empty() {
                return Err(AppError::Unauthorized("Empty bearer token"));
            }
            match secret {
                Some(secret) if secret != token => Err(AppError::Unauthorized("Invalid bearer token")),
                _ => Ok(AuthUser {
                    token: token.to_string(),
                }),
            }
        }
        Some(_) => Err(AppError::Unauthorized("Invalid authorization header format")),
        None if secret.is_none() => Ok(AuthUser {
            token: "anonymous".to_string(),
        }),
        None => Err(AppError::Unauthorized("Missing authorization header")),
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());

        let user = authorize(header, state.config.auth_secret.as_deref())?;
        tracing::trace!(anonymous = state.config.auth_secret.is_none(), "request authorized");
        Ok(user)
    }
}

/// Tenant the request acts for, taken from the `X-Tenant-Id` header.
#[derive(Debug, Clone, PartialEq)]
pub struct Tenant(pub String);

impl Tenant {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Tenant {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|tenant| !tenant.is_empty())
            .map(|tenant| Tenant(tenant.to_string()))
            .ok_or_else(|| AppError::BadRequest("Missing X-Tenant-Id header".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_only_without_secret() {
        assert_eq!(authorize(None, None).unwrap().token, "anonymous");
        assert!(authorize(None, Some("s3cret")).is_err());
    }

    #[test]
    fn bearer_must_match_secret() {
        assert!(authorize(Some("Bearer s3cret"), Some("s3cret")).is_ok());
        assert!(authorize(Some("Bearer guess"), Some("s3cret")).is_err());
        assert_eq!(authorize(Some("Bearer any"), None).unwrap().token, "any");
    }

    #[test]
    fn malformed_headers() {
        assert!(authorize(Some("Bearer "), None).is_err());
        assert!(authorize(Some("Basic dXNlcg=="), None).is_err());
    }
}
