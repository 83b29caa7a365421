// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Security
//!
//! - JWKS is fetched via HTTPS only
//! - Keys are cached with a configurable TTL (default 5 minutes)
//! - On fetch failure, a stale cache is served only within a bounded grace
//!   window (2x TTL); beyond it verification fails closed with
//!   `KeySetUnavailable`. An identity-provider outage degrades availability,
//!   never authentication.
//! - Refreshes are single-flight: concurrent callers that miss the cache
//!   share one upstream fetch.
//!
//! ## Usage
//!
//! Initialize `JwksCache` with CLERK_JWKS_URL in main.rs and store in AppState.
//! The Auth extractor uses it for production JWT verification.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};
use tracing::{error, warn};

use super::error::AuthError;

/// Default JWKS cache TTL (5 minutes).
const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);

/// How many TTLs a stale key set may keep being served after fetches start
/// failing.
const STALE_GRACE_FACTOR: u32 = 2;

/// Source of a key set. The production implementation fetches over HTTPS;
/// tests substitute a stub.
pub trait KeyFetcher: Send + Sync {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<JwkSet, AuthError>> + Send + '_>>;
}

/// HTTPS key fetcher against the identity provider's JWKS endpoint.
struct HttpKeyFetcher {
    jwks_url: String,
    client: reqwest::Client,
}

impl KeyFetcher for HttpKeyFetcher {
    fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<JwkSet, AuthError>> + Send + '_>> {
        Box::pin(async move {
            let response = self
                .client
                .get(&self.jwks_url)
                .send()
                .await
                .map_err(|e| {
                    warn!(error = %e, "JWKS fetch failed");
                    AuthError::KeySetUnavailable
                })?;

            if !response.status().is_success() {
                warn!(status = %response.status(), "JWKS endpoint returned non-success");
                return Err(AuthError::KeySetUnavailable);
            }

            let jwks: JwkSet = response.json().await.map_err(|e| {
                warn!(error = %e, "JWKS response was not a valid key set");
                AuthError::KeySetUnavailable
            })?;

            Ok(jwks)
        })
    }
}

/// JWKS cache entry.
struct CacheEntry {
    jwks: JwkSet,
    fetched_at: Instant,
}

/// Caching JWKS client.
///
/// Fetches and caches the identity provider's key set for JWT verification.
#[derive(Clone)]
pub struct JwksCache {
    fetcher: Arc<dyn KeyFetcher>,
    /// Cache TTL
    cache_ttl: Duration,
    /// Cached key set
    cache: Arc<RwLock<Option<CacheEntry>>>,
    /// Held across an upstream fetch so concurrent refreshes collapse into one
    refresh_lock: Arc<Mutex<()>>,
}

impl JwksCache {
    /// Create a new JWKS cache over an HTTPS fetcher.
    ///
    /// # Arguments
    /// - `jwks_url`: The JWKS endpoint URL (e.g., `https://your-clerk-domain.clerk.accounts.dev/.well-known/jwks.json`)
    pub fn new(jwks_url: impl Into<String>) -> Self {
        let fetcher = HttpKeyFetcher {
            jwks_url: jwks_url.into(),
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("Failed to create HTTP client"),
        };
        Self::with_fetcher(Arc::new(fetcher))
    }

    /// Create over a custom fetcher (used by tests).
    pub fn with_fetcher(fetcher: Arc<dyn KeyFetcher>) -> Self {
        Self {
            fetcher,
            cache_ttl: DEFAULT_CACHE_TTL,
            cache: Arc::new(RwLock::new(None)),
            refresh_lock: Arc::new(Mutex::new(())),
        }
    }

    /// Create with custom cache TTL.
    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    /// Get the key set, consulting the cache first.
    ///
    /// Within TTL the cached set is returned directly. Past TTL a refresh is
    /// attempted; if the refresh fails, a stale set within the grace window
    /// (2x TTL) is served with a warning, and anything older fails closed.
    async fn get_jwks(&self) -> Result<JwkSet, AuthError> {
        if let Some(jwks) = self.cached_within(self.cache_ttl).await {
            return Ok(jwks);
        }

        // Single-flight: only one caller performs the upstream fetch.
        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited on the lock.
        if let Some(jwks) = self.cached_within(self.cache_ttl).await {
            return Ok(jwks);
        }

        match self.fetcher.fetch().await {
            Ok(jwks) => {
                let mut cache = self.cache.write().await;
                *cache = Some(CacheEntry {
                    jwks: jwks.clone(),
                    fetched_at: Instant::now(),
                });
                Ok(jwks)
            }
            Err(fetch_err) => {
                let grace = self.cache_ttl * STALE_GRACE_FACTOR;
                if let Some(jwks) = self.cached_within(grace).await {
                    warn!("JWKS refresh failed; serving stale key set within grace window");
                    return Ok(jwks);
                }
                error!("JWKS refresh failed and no usable cached key set; failing closed");
                Err(fetch_err)
            }
        }
    }

    /// Clone of the cached key set if it is younger than `max_age`.
    async fn cached_within(&self, max_age: Duration) -> Option<JwkSet> {
        let cache = self.cache.read().await;
        match &*cache {
            Some(entry) if entry.fetched_at.elapsed() < max_age => Some(entry.jwks.clone()),
            _ => None,
        }
    }

    /// Get a decoding key for the given key ID.
    pub async fn get_decoding_key(&self, kid: &str) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;

        let jwk = jwks
            .keys
            .iter()
            .find(|k| k.common.key_id.as_deref() == Some(kid))
            .ok_or(AuthError::NoMatchingKey)?;

        jwk_to_decoding_key(jwk)
    }

    /// Get any valid decoding key (for tokens without kid).
    pub async fn get_any_decoding_key(&self) -> Result<(DecodingKey, Algorithm), AuthError> {
        let jwks = self.get_jwks().await?;

        for jwk in &jwks.keys {
            if let Ok(result) = jwk_to_decoding_key(jwk) {
                return Ok(result);
            }
        }

        Err(AuthError::NoMatchingKey)
    }

    /// Force refresh the cache. Used by the readiness probe.
    pub async fn refresh(&self) -> Result<(), AuthError> {
        let jwks = self.fetcher.fetch().await?;
        let mut cache = self.cache.write().await;
        *cache = Some(CacheEntry {
            jwks,
            fetched_at: Instant::now(),
        });
        Ok(())
    }

    /// Check if a key set is currently cached and within TTL.
    pub async fn is_cached(&self) -> bool {
        self.cached_within(self.cache_ttl).await.is_some()
    }
}

/// Convert a JWK to a DecodingKey.
///
/// Only RSA and EC keys are supported; anything else is unusable for the
/// asymmetric algorithm allow-list and reports `NoMatchingKey`.
fn jwk_to_decoding_key(jwk: &Jwk) -> Result<(DecodingKey, Algorithm), AuthError> {
    match &jwk.algorithm {
        AlgorithmParameters::RSA(rsa) => {
            let key = DecodingKey::from_rsa_components(&rsa.n, &rsa.e)
                .map_err(|_| AuthError::NoMatchingKey)?;

            let alg = jwk
                .common
                .key_algorithm
                .map(|a| match a {
                    jsonwebtoken::jwk::KeyAlgorithm::RS256 => Algorithm::RS256,
                    jsonwebtoken::jwk::KeyAlgorithm::RS384 => Algorithm::RS384,
                    jsonwebtoken::jwk::KeyAlgorithm::RS512 => Algorithm::RS512,
                    _ => Algorithm::RS256, // Default for RSA
                })
                .unwrap_or(Algorithm::RS256);

            Ok((key, alg))
        }
        AlgorithmParameters::EllipticCurve(ec) => {
            let key = DecodingKey::from_ec_components(&ec.x, &ec.y)
                .map_err(|_| AuthError::NoMatchingKey)?;

            let alg = jwk
                .common
                .key_algorithm
                .map(|a| match a {
                    jsonwebtoken::jwk::KeyAlgorithm::ES256 => Algorithm::ES256,
                    jsonwebtoken::jwk::KeyAlgorithm::ES384 => Algorithm::ES384,
                    _ => Algorithm::ES256, // Default for EC
                })
                .unwrap_or(Algorithm::ES256);

            Ok((key, alg))
        }
        _ => Err(AuthError::NoMatchingKey),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Stub fetcher whose behavior flips between a fixed key set and failure.
    struct StubFetcher {
        fail: std::sync::atomic::AtomicBool,
        calls: AtomicUsize,
    }

    impl StubFetcher {
        fn new() -> Self {
            Self {
                fail: std::sync::atomic::AtomicBool::new(false),
                calls: AtomicUsize::new(0),
            }
        }

        fn set_failing(&self, failing: bool) {
            self.fail.store(failing, Ordering::SeqCst);
        }

        fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl KeyFetcher for StubFetcher {
        fn fetch(&self) -> Pin<Box<dyn Future<Output = Result<JwkSet, AuthError>> + Send + '_>> {
            Box::pin(async move {
                self.calls.fetch_add(1, Ordering::SeqCst);
                if self.fail.load(Ordering::SeqCst) {
                    Err(AuthError::KeySetUnavailable)
                } else {
                    Ok(JwkSet { keys: vec![] })
                }
            })
        }
    }

    #[tokio::test]
    async fn cache_initially_empty() {
        let cache = JwksCache::new("https://example.com/.well-known/jwks.json");
        assert!(!cache.is_cached().await);
    }

    #[test]
    fn custom_cache_ttl() {
        let cache = JwksCache::new("https://example.com/.well-known/jwks.json")
            .with_cache_ttl(Duration::from_secs(60));
        assert_eq!(cache.cache_ttl, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn fresh_cache_skips_upstream() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = JwksCache::with_fetcher(fetcher.clone()).with_cache_ttl(Duration::from_secs(300));

        cache.get_jwks().await.unwrap();
        cache.get_jwks().await.unwrap();
        cache.get_jwks().await.unwrap();

        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn serves_stale_within_grace_window() {
        let fetcher = Arc::new(StubFetcher::new());
        // TTL 50ms, grace 100ms
        let cache =
            JwksCache::with_fetcher(fetcher.clone()).with_cache_ttl(Duration::from_millis(50));

        cache.get_jwks().await.unwrap();

        // Age the entry past TTL but inside the grace window, then fail fetches
        std::thread::sleep(Duration::from_millis(60));
        fetcher.set_failing(true);

        let result = cache.get_jwks().await;
        assert!(result.is_ok(), "stale set within grace must be served");
    }

    #[tokio::test]
    async fn fails_closed_beyond_grace_window() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache =
            JwksCache::with_fetcher(fetcher.clone()).with_cache_ttl(Duration::from_millis(20));

        cache.get_jwks().await.unwrap();

        // Age the entry past 2x TTL
        std::thread::sleep(Duration::from_millis(50));
        fetcher.set_failing(true);

        let result = cache.get_jwks().await;
        assert!(matches!(result, Err(AuthError::KeySetUnavailable)));
    }

    #[tokio::test]
    async fn fails_closed_with_no_cache_at_all() {
        let fetcher = Arc::new(StubFetcher::new());
        fetcher.set_failing(true);
        let cache = JwksCache::with_fetcher(fetcher.clone());

        let result = cache.get_jwks().await;
        assert!(matches!(result, Err(AuthError::KeySetUnavailable)));
    }

    #[tokio::test]
    async fn concurrent_misses_share_one_fetch() {
        let fetcher = Arc::new(StubFetcher::new());
        let cache = JwksCache::with_fetcher(fetcher.clone()).with_cache_ttl(Duration::from_secs(300));

        let (a, b, c) = tokio::join!(cache.get_jwks(), cache.get_jwks(), cache.get_jwks());
        a.unwrap();
        b.unwrap();
        c.unwrap();

        assert_eq!(fetcher.call_count(), 1);
    }
}
