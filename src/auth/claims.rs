// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Session claims and the caller identity passed to core operations.

use jsonwebtoken::{encode, EncodingKey, Header};
use serde::{Deserialize, Serialize};

use super::error::AuthError;
use super::roles::Role;

/// Claims carried by the HS256 session token issued by the web frontend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionClaims {
    /// Subject (user ID)
    pub sub: String,
    #[serde(default)]
    pub role: Option<String>,
    pub iat: i64,
    pub exp: i64,
}

/// The identity every core operation receives explicitly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub user_id: String,
    pub role: Role,
    /// Client address, recorded in audit entries.
    pub ip: Option<String>,
}

impl Caller {
    pub fn user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            role: Role::User,
            ip: None,
        }
    }

    pub fn admin(user_id: impl Into<String>) -> Self {
        Self {
            role: Role::Admin,
            ..Self::user(user_id)
        }
    }

    pub fn with_ip(mut self, ip: impl Into<String>) -> Self {
        self.ip = Some(ip.into());
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role.has_privilege(Role::Admin)
    }

    pub fn ip(&self) -> Option<&str> {
        self.ip.as_deref()
    }
}

/// Sign a session token. Session issuance belongs to the frontend; this
/// exists for tooling and tests that need a valid token.
pub fn sign_session_token(
    secret: &[u8],
    user_id: &str,
    role: Role,
    ttl_secs: i64,
) -> Result<String, AuthError> {
    let now = chrono::Utc::now().timestamp();
    let claims = SessionClaims {
        sub: user_id.to_string(),
        role: Some(role.to_string()),
        iat: now,
        exp: now + ttl_secs,
    };
    encode(&Header::default(), &claims, &EncodingKey::from_secret(secret))
        .map_err(|e| AuthError::InternalError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admin_caller_has_admin_privilege() {
        assert!(Caller::admin("ops").is_admin());
        assert!(!Caller::user("u1").is_admin());
    }

    #[test]
    fn with_ip_is_recorded() {
        let caller = Caller::user("u1").with_ip("10.0.0.1");
        assert_eq!(caller.ip(), Some("10.0.0.1"));
    }

    #[test]
    fn signed_token_has_three_segments() {
        let token = sign_session_token(b"secret", "u1", Role::User, 60).unwrap();
        assert_eq!(token.split('.').count(), 3);
    }
}
