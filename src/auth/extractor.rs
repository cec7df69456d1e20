// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for callers.
//!
//! ```rust,ignore
//! async fn my_handler(Auth(caller): Auth) -> impl IntoResponse {
//!     // caller.user_id, caller.role, caller.ip
//! }
//! ```

use std::sync::Arc;

use axum::{
    extract::{FromRef, FromRequestParts},
    http::{header::AUTHORIZATION, request::Parts, HeaderMap},
};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};

use super::{AuthError, Caller, Role, SessionClaims};
use crate::crypto::constant_time_eq;

/// Clock skew tolerance (60 seconds).
const CLOCK_SKEW_LEEWAY: u64 = 60;

/// Secrets the extractors verify against.
#[derive(Clone)]
pub struct AuthConfig {
    /// HS256 secret for session tokens.
    pub session_secret: Vec<u8>,
    /// Bearer secret for cron endpoints; `None` rejects every cron call.
    pub cron_secret: Option<String>,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("session_secret", &"<redacted>")
            .field("cron_secret", &self.cron_secret.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

fn bearer_token(headers: &HeaderMap) -> Result<&str, AuthError> {
    headers
        .get(AUTHORIZATION)
        .ok_or(AuthError::MissingAuthHeader)?
        .to_str()
        .map_err(|_| AuthError::InvalidAuthHeader)?
        .strip_prefix("Bearer ")
        .ok_or(AuthError::InvalidAuthHeader)
}

/// First hop of `X-Forwarded-For`, else `X-Real-IP`.
fn client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded.or_else(real_ip).map(str::to_string)
}

/// Verify a session token and build the caller.
pub fn verify_session(token: &str, config: &AuthConfig) -> Result<Caller, AuthError> {
    let mut validation = Validation::new(Algorithm::HS256);
    validation.leeway = CLOCK_SKEW_LEEWAY;

    let token_data = decode::<SessionClaims>(
        token,
        &DecodingKey::from_secret(&config.session_secret),
        &validation,
    )
    .map_err(|e| match e.kind() {
        jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
        jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
        _ => AuthError::MalformedToken,
    })?;

    let claims = token_data.claims;
    if claims.sub.is_empty() {
        return Err(AuthError::MalformedToken);
    }

    let role = claims
        .role
        .as_deref()
        .and_then(Role::from_str)
        .unwrap_or_default();

    Ok(Caller {
        user_id: claims.sub,
        role,
        ip: None,
    })
}

/// Extractor for authenticated callers.
pub struct Auth(pub Caller);

impl<S> FromRequestParts<S> for Auth
where
    S: Send + Sync,
    Arc<AuthConfig>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        // First check if a layer already resolved the caller
        if let Some(caller) = parts.extensions.get::<Caller>().cloned() {
            return Ok(Auth(caller));
        }

        let config = Arc::<AuthConfig>::from_ref(state);
        let token = bearer_token(&parts.headers)?;
        let mut caller = verify_session(token, &config)?;
        caller.ip = client_ip(&parts.headers);

        Ok(Auth(caller))
    }
}

/// Extractor that requires admin role. Non-admins get 403.
pub struct AdminOnly(pub Caller);

impl<S> FromRequestParts<S> for AdminOnly
where
    S: Send + Sync,
    Arc<AuthConfig>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Auth(caller) = Auth::from_request_parts(parts, state).await?;

        if !caller.is_admin() {
            return Err(AuthError::InsufficientPermissions);
        }

        Ok(AdminOnly(caller))
    }
}

/// Shared-secret gate for scheduled jobs (`Authorization: Bearer $CRON_SECRET`).
pub struct CronAuth;

impl<S> FromRequestParts<S> for CronAuth
where
    S: Send + Sync,
    Arc<AuthConfig>: FromRef<S>,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let config = Arc::<AuthConfig>::from_ref(state);
        let provided = bearer_token(&parts.headers)?;

        let Some(expected) = config.cron_secret.as_deref() else {
            tracing::warn!("Cron endpoint called but no cron secret is configured");
            return Err(AuthError::InvalidSecret);
        };

        if !constant_time_eq(provided.as_bytes(), expected.as_bytes()) {
            return Err(AuthError::InvalidSecret);
        }

        Ok(CronAuth)
    }
}
