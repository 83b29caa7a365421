// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use stablebridge_server::{
    api,
    auth::JwksCache,
    chain::{ChainSettlementClient, EvmSettlementClient, AVAX_FUJI},
    config::AppConfig,
    fiat::{EngineConfig, ReconciliationEngine, ReserveWalletManager},
    fiat_poller::FiatPoller,
    providers::truelayer::TrueLayerClient,
    state::{AppState, AuthConfig},
    storage::{EncryptedStorage, FileFiatRequestStore, StoragePaths},
    tls,
};

fn init_tracing(log_format: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if log_format.eq_ignore_ascii_case("json") {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() {
    // Install the ring crypto provider for rustls (must happen before any
    // TLS operations)
    rustls::crypto::ring::default_provider()
        .install_default()
        .expect("Failed to install rustls crypto provider");

    let config = AppConfig::from_env();
    init_tracing(&config.log_format);

    // Encrypted storage (Gramine handles encryption transparently)
    let paths = StoragePaths::new(&config.data_dir);
    let mut storage = EncryptedStorage::new(paths);
    storage
        .initialize()
        .expect("Failed to initialize encrypted storage");

    // Auth: JWKS-backed verification in production, fail-closed otherwise
    let auth_config = AuthConfig {
        jwks: config.clerk_jwks_url.as_deref().map(JwksCache::new),
        issuer: config.clerk_issuer.clone(),
        audience: config.clerk_audience.clone(),
    };
    if auth_config.jwks.is_none() {
        warn!("CLERK_JWKS_URL not set; token verification will fail closed");
    } else if auth_config.issuer.is_none() {
        // A key set without a pinned issuer would accept tokens from any
        // tenant of the identity provider.
        panic!("CLERK_ISSUER must be set when CLERK_JWKS_URL is configured");
    }

    let mut state = AppState::new(storage).with_auth_config(auth_config);
    if let Some(secret) = config.fiat_webhook_secret.clone() {
        state = state.with_webhook_secret(secret);
    }
    let storage = state.storage();

    // Chain settlement client; without it the fiat surface answers 503
    let chain: Option<Arc<dyn ChainSettlementClient>> = match EvmSettlementClient::new(
        AVAX_FUJI,
        &config.chain_rpc_url,
        &config.settlement_token_address,
        storage.clone(),
    ) {
        Ok(client) => Some(Arc::new(client)),
        Err(e) => {
            error!(error = %e, "Chain client unavailable; fiat settlement disabled");
            None
        }
    };

    let mut engine: Option<Arc<ReconciliationEngine>> = None;
    if let Some(chain) = chain {
        let reserve = Arc::new(ReserveWalletManager::new(storage.clone(), chain.clone()));

        if config.fiat_reserve_bootstrap {
            match reserve.bootstrap() {
                Ok(meta) => info!(address = %meta.public_address, "Reserve wallet bootstrapped"),
                Err(e) => error!(error = %e, "Reserve wallet bootstrap failed"),
            }
        }
        state = state.with_reserve(reserve.clone());

        if TrueLayerClient::is_configured() {
            match TrueLayerClient::from_env() {
                Ok(provider) => {
                    let store = Arc::new(FileFiatRequestStore::new(storage.clone()));
                    let built = Arc::new(ReconciliationEngine::new(
                        store,
                        Arc::new(provider),
                        chain,
                        reserve,
                        EngineConfig {
                            min_confirmations: config.fiat_min_confirmations,
                            max_pending_hours: config.fiat_max_pending_hours,
                        },
                    ));
                    state = state.with_engine(built.clone());
                    engine = Some(built);
                }
                Err(e) => error!(error = %e, "TrueLayer configuration invalid; fiat disabled"),
            }
        } else {
            info!("TrueLayer credentials not set; fiat endpoints will answer 503");
        }
    }

    // Background poller catches missed webhooks
    let shutdown = CancellationToken::new();
    if let Some(engine) = engine {
        tokio::spawn(FiatPoller::new(engine).run(shutdown.clone()));
    }

    // TLS is mandatory: no HTTP fallback
    let tls_config = tls::load_ratls_config(&config.tls_cert_path, &config.tls_key_path)
        .await
        .expect("Failed to load RA-TLS credentials");

    let app = api::router(state);
    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .expect("Failed to parse bind address");

    info!(%addr, "StableBridge server listening (docs at /docs)");

    let server = axum_server::bind_rustls(addr, tls_config).serve(app.into_make_service());

    tokio::select! {
        result = server => {
            result.expect("HTTPS server failed");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            shutdown.cancel();
        }
    }
}
