// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User roles for authorization.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// User roles for authorization.
///
/// ## Role Hierarchy
///
/// Roles form a total order; a role covers every role below it:
///
/// `Client < Auditor < Support < Admin`
///
/// - `Client` - Normal user, can only access own wallets and fiat requests
/// - `Auditor` - Read-only access to audit logs
/// - `Support` - Read-only access to metadata (no private keys)
/// - `Admin` - Full access to all endpoints, wallets, and reserve operations
///
/// The derived `Ord` follows declaration order, so variant order here is
/// load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Normal client user (owns wallets)
    Client,
    /// Auditor (read-only audit logs)
    Auditor,
    /// Support staff (read-only metadata)
    Support,
    /// Full administrative access
    Admin,
}

impl Role {
    /// Check if this role has at least the privileges of the required role.
    pub fn has_privilege(&self, required: Role) -> bool {
        *self >= required
    }

    /// Parse role from string (case-insensitive).
    /// Used when extracting roles from Clerk public metadata.
    /// Unknown role strings parse to `None`; callers fall back to `Client`.
    pub fn from_str(s: &str) -> Option<Role> {
        match s.to_lowercase().as_str() {
            "admin" => Some(Role::Admin),
            "client" => Some(Role::Client),
            "support" => Some(Role::Support),
            "auditor" => Some(Role::Auditor),
            _ => None,
        }
    }
}

impl Default for Role {
    /// Default role is Client (least privilege for authenticated users).
    fn default() -> Self {
        Role::Client
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Admin => write!(f, "admin"),
            Role::Client => write!(f, "client"),
            Role::Support => write!(f, "support"),
            Role::Auditor => write!(f, "auditor"),
        }
    }
}
