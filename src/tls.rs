// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! RA-TLS credential loading.
//!
//! The attestation layer (outside this crate) leaves a certificate and key
//! on disk before the server starts. TLS is mandatory: if the files are
//! missing or unparsable, startup fails.

use std::path::Path;

use axum_server::tls_rustls::RustlsConfig;
use tracing::info;

/// Load the RA-TLS certificate chain and private key into a rustls server
/// config.
pub async fn load_ratls_config(
    cert_path: &str,
    key_path: &str,
) -> Result<RustlsConfig, std::io::Error> {
    for path in [cert_path, key_path] {
        if !Path::new(path).exists() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::NotFound,
                format!("TLS credential not found: {path}"),
            ));
        }
    }

    let config = RustlsConfig::from_pem_file(cert_path, key_path).await?;
    info!(cert = %cert_path, "Loaded RA-TLS credentials");
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_credentials_fail_loudly() {
        let result = load_ratls_config("/nonexistent/server.crt", "/nonexistent/server.key").await;
        assert!(result.is_err());
    }
}
