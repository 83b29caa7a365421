// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWT claims and authenticated user representation.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::error::AuthError;
use super::roles::Role;

/// Claims decoded from a Clerk JWT.
///
/// Clerk JWTs contain standard OIDC claims plus custom claims.
/// See: https://clerk.com/docs/backend-requests/handling/manual-jwt
#[derive(Debug, Deserialize)]
pub struct JwtClaims {
    /// Subject (user ID) - the canonical Clerk user identifier
    pub sub: String,

    /// Issued at timestamp
    #[serde(default)]
    #[allow(dead_code)]
    pub iat: i64,

    /// Expiration timestamp
    #[serde(default)]
    pub exp: i64,

    /// Issuer
    #[serde(default)]
    pub iss: String,

    /// Clerk session ID
    #[serde(default)]
    pub sid: Option<String>,

    /// Audience (validated by the jsonwebtoken crate, not read directly)
    #[serde(default)]
    #[allow(dead_code)]
    pub aud: Option<serde_json::Value>,

    /// Clerk public metadata containing the role
    #[serde(default, rename = "publicMetadata")]
    pub public_metadata: Option<PublicMetadata>,
}

/// Clerk public metadata structure.
#[derive(Debug, Deserialize, Default)]
pub struct PublicMetadata {
    /// User's role (set in Clerk dashboard)
    #[serde(default)]
    pub role: Option<String>,
}

impl JwtClaims {
    /// Role carried in public metadata, defaulting to `Client`.
    pub fn role(&self) -> Role {
        self.public_metadata
            .as_ref()
            .and_then(|m| m.role.as_ref())
            .and_then(|r| Role::from_str(r))
            .unwrap_or(Role::Client)
    }
}

/// Authenticated user information extracted from a verified JWT.
///
/// This is the primary type used throughout the application to represent
/// the authenticated user making a request.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct AuthenticatedUser {
    /// Canonical user ID (Clerk `sub` claim)
    pub user_id: String,

    /// User's role
    pub role: Role,

    /// Session ID (if available)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,

    /// Original issuer (used for logging, not serialized)
    #[serde(skip)]
    pub issuer: String,

    /// Token expiration (Unix timestamp, not serialized)
    #[serde(skip)]
    pub expires_at: i64,
}

impl AuthenticatedUser {
    /// Build from verified claims.
    pub fn from_claims(claims: JwtClaims) -> Self {
        let role = claims.role();
        Self {
            user_id: claims.sub,
            role,
            session_id: claims.sid,
            issuer: claims.iss,
            expires_at: claims.exp,
        }
    }

    /// Check if the user has at least the required role.
    pub fn has_role(&self, required: Role) -> bool {
        self.role.has_privilege(required)
    }

    /// Check if this user is an admin.
    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// The single ownership gate: a resource owned by `owner_id` is
    /// accessible to its owner and to admins, nobody else.
    pub fn authorize_owner(&self, owner_id: &str) -> Result<(), AuthError> {
        if self.is_admin() || self.user_id == owner_id {
            Ok(())
        } else {
            Err(AuthError::InsufficientPermissions)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_claims(role: Option<&str>) -> JwtClaims {
        JwtClaims {
            sub: "user_123".to_string(),
            iat: 1700000000,
            exp: 1700003600,
            iss: "https://clerk.example.com".to_string(),
            sid: Some("sess_abc".to_string()),
            aud: None,
            public_metadata: role.map(|r| PublicMetadata {
                role: Some(r.to_string()),
            }),
        }
    }

    #[test]
    fn from_claims_extracts_user_id_and_role() {
        let user = AuthenticatedUser::from_claims(sample_claims(Some("admin")));
        assert_eq!(user.user_id, "user_123");
        assert_eq!(user.role, Role::Admin);
    }

    #[test]
    fn from_claims_defaults_to_client_role() {
        let user = AuthenticatedUser::from_claims(sample_claims(None));
        assert_eq!(user.role, Role::Client);

        // Unknown role strings also fall back to Client
        let user = AuthenticatedUser::from_claims(sample_claims(Some("superuser")));
        assert_eq!(user.role, Role::Client);
    }

    #[test]
    fn owner_can_access_own_resource() {
        let user = AuthenticatedUser::from_claims(sample_claims(None));
        assert!(user.authorize_owner("user_123").is_ok());
    }

    #[test]
    fn foreign_client_is_denied() {
        let user = AuthenticatedUser::from_claims(sample_claims(None));
        assert!(matches!(
            user.authorize_owner("user_456"),
            Err(AuthError::InsufficientPermissions)
        ));
    }

    #[test]
    fn admin_can_access_any_resource() {
        let user = AuthenticatedUser::from_claims(sample_claims(Some("admin")));
        assert!(user.authorize_owner("user_456").is_ok());
    }

    #[test]
    fn support_is_not_owner_override() {
        let user = AuthenticatedUser::from_claims(sample_claims(Some("support")));
        assert!(user.authorize_owner("user_456").is_err());
    }
}
