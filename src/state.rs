// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared application state for the Axum router.

use std::sync::Arc;

use crate::auth::JwksCache;
use crate::fiat::{ReconciliationEngine, ReserveWalletManager};
use crate::storage::EncryptedStorage;

/// Authentication configuration.
///
/// With a JWKS cache configured, tokens are fully verified. Without one, the
/// verifier fails closed (unless the `dev` feature compiles in the local
/// bypass).
#[derive(Clone, Default)]
pub struct AuthConfig {
    /// JWKS cache for production JWT verification.
    pub jwks: Option<JwksCache>,
    /// Expected `iss` claim.
    pub issuer: Option<String>,
    /// Expected `aud` claim (optional).
    pub audience: Option<String>,
}

/// Shared state handed to every handler.
///
/// The engine and reserve manager are `None` when their dependencies
/// (provider credentials, chain RPC) are not configured; the fiat endpoints
/// answer 503 in that case rather than failing at startup.
#[derive(Clone)]
pub struct AppState {
    storage: Arc<EncryptedStorage>,
    pub auth_config: AuthConfig,
    pub reserve: Option<Arc<ReserveWalletManager>>,
    pub engine: Option<Arc<ReconciliationEngine>>,
    pub webhook_secret: Option<String>,
}

impl AppState {
    pub fn new(storage: EncryptedStorage) -> Self {
        Self {
            storage: Arc::new(storage),
            auth_config: AuthConfig::default(),
            reserve: None,
            engine: None,
            webhook_secret: None,
        }
    }

    pub fn with_auth_config(mut self, auth_config: AuthConfig) -> Self {
        self.auth_config = auth_config;
        self
    }

    pub fn with_reserve(mut self, reserve: Arc<ReserveWalletManager>) -> Self {
        self.reserve = Some(reserve);
        self
    }

    pub fn with_engine(mut self, engine: Arc<ReconciliationEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn with_webhook_secret(mut self, secret: impl Into<String>) -> Self {
        self.webhook_secret = Some(secret.into());
        self
    }

    /// Handle to the encrypted storage root.
    pub fn storage(&self) -> Arc<EncryptedStorage> {
        self.storage.clone()
    }

    /// The reconciliation engine, or a 503-worthy absence.
    pub fn engine(&self) -> Option<Arc<ReconciliationEngine>> {
        self.engine.clone()
    }
}
