// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! This module provides Clerk JWT authentication for the StableBridge API.
//!
//! ## Auth Flow
//!
//! 1. Frontend (Next.js) authenticates user with Clerk
//! 2. Frontend sends `Authorization: Bearer <Clerk JWT>`
//! 3. Enclave server:
//!    - Fetches Clerk JWKS via HTTPS (cached, bounded staleness)
//!    - Verifies JWT algorithm, signature, expiry, issuer, audience
//!    - Extracts:
//!      - `sub` → canonical `user_id`
//!      - `publicMetadata.role` → [`Role`]
//!
//! ## Security
//!
//! - All non-health endpoints require authentication
//! - JWT verification uses HTTPS-only JWKS fetching
//! - Key-set failures fail closed once the cache grace window is exhausted
//! - Only asymmetric signing algorithms are accepted
//! - Clock skew tolerance is 60 seconds

pub mod claims;
pub mod error;
pub mod extractor;
pub mod jwks;
pub mod roles;
pub mod verifier;

pub use claims::AuthenticatedUser;
pub use error::AuthError;
pub use extractor::{AdminOnly, Auth};
pub use jwks::JwksCache;
pub use roles::Role;
