// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Typed configuration loaded from the environment at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` / `PORT` | Server bind address | `0.0.0.0:8080` |
//! | `DATA_DIR` | Root directory for encrypted storage | `/data` |
//! | `TLS_CERT_PATH` / `TLS_KEY_PATH` | RA-TLS credential files | `/ratls/server.crt`, `/ratls/server.key` |
//! | `CLERK_JWKS_URL` | Clerk JWKS endpoint for JWT verification | Required for production |
//! | `CLERK_ISSUER` | Expected JWT issuer claim | Required for production |
//! | `CLERK_AUDIENCE` | Expected JWT audience claim | Optional |
//! | `FIAT_WEBHOOK_SECRET` | Shared secret for provider webhook HMAC | Optional |
//! | `FIAT_MIN_CONFIRMATIONS` | Deposit finality threshold | `3` |
//! | `FIAT_MAX_PENDING_HOURS` | Pending horizon before forcing `failed` | `24` |
//! | `FIAT_RESERVE_BOOTSTRAP` | Bootstrap the reserve wallet at startup | `false` |
//! | `CHAIN_RPC_URL` | EVM RPC endpoint | Fuji public RPC |
//! | `SETTLEMENT_TOKEN_ADDRESS` | Stablecoin contract address | built-in rEUR Fuji address |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info` |

use std::env;

use crate::chain::{AVAX_FUJI, SETTLEMENT_TOKEN};
use crate::fiat::engine::{DEFAULT_MAX_PENDING_HOURS, DEFAULT_MIN_CONFIRMATIONS};

/// Environment variable name for the encrypted data directory path.
///
/// The data directory is mounted as Gramine's encrypted filesystem in the
/// manifest. All wallet keys, fiat requests, and audit logs are stored here.
pub const DATA_DIR_ENV: &str = "DATA_DIR";

/// Application configuration, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    pub tls_cert_path: String,
    pub tls_key_path: String,
    pub clerk_jwks_url: Option<String>,
    pub clerk_issuer: Option<String>,
    pub clerk_audience: Option<String>,
    pub fiat_webhook_secret: Option<String>,
    pub fiat_min_confirmations: u64,
    pub fiat_max_pending_hours: i64,
    pub fiat_reserve_bootstrap: bool,
    pub chain_rpc_url: String,
    pub settlement_token_address: String,
    pub log_format: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8080),
            data_dir: env::var(DATA_DIR_ENV).unwrap_or_else(|_| "/data".to_string()),
            tls_cert_path: env::var("TLS_CERT_PATH")
                .unwrap_or_else(|_| "/ratls/server.crt".to_string()),
            tls_key_path: env::var("TLS_KEY_PATH")
                .unwrap_or_else(|_| "/ratls/server.key".to_string()),
            clerk_jwks_url: non_empty_env("CLERK_JWKS_URL"),
            clerk_issuer: non_empty_env("CLERK_ISSUER"),
            clerk_audience: non_empty_env("CLERK_AUDIENCE"),
            fiat_webhook_secret: non_empty_env("FIAT_WEBHOOK_SECRET"),
            fiat_min_confirmations: env::var("FIAT_MIN_CONFIRMATIONS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MIN_CONFIRMATIONS),
            fiat_max_pending_hours: env::var("FIAT_MAX_PENDING_HOURS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_PENDING_HOURS),
            fiat_reserve_bootstrap: env::var("FIAT_RESERVE_BOOTSTRAP")
                .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            chain_rpc_url: env::var("CHAIN_RPC_URL")
                .unwrap_or_else(|_| AVAX_FUJI.rpc_url.to_string()),
            settlement_token_address: env::var("SETTLEMENT_TOKEN_ADDRESS").unwrap_or_else(|_| {
                SETTLEMENT_TOKEN
                    .fuji_address
                    .unwrap_or_default()
                    .to_string()
            }),
            log_format: env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string()),
        }
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}
