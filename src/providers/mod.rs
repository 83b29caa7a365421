// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat provider integrations.
//!
//! A provider executes the bank-side leg of a settlement: collecting the
//! user's payment for on-ramps, paying out to the user's account for
//! off-ramps. The reconciliation engine talks to providers only through the
//! [`ProviderClient`] trait so tests can substitute a scripted double.

use std::future::Future;
use std::pin::Pin;

use serde::Serialize;
use utoipa::ToSchema;

use crate::storage::FiatDirection;

pub mod truelayer;

pub use truelayer::TrueLayerClient;

/// Boxed future type for provider client methods.
pub type ProviderFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ProviderError>> + Send + 'a>>;

/// Provider-side status of a payment or payout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderStatus {
    /// Still in flight (created, awaiting authorization, executing).
    Pending,
    /// Funds moved successfully.
    Completed,
    /// Provider refused or the payment expired.
    Rejected,
}

/// Detailed status answer from a provider poll.
#[derive(Debug, Clone)]
pub struct ProviderStatusDetails {
    pub status: ProviderStatus,
    /// Provider's raw status string, for audit trails.
    pub raw_status: String,
    /// Failure detail when the provider reports one.
    pub failure_reason: Option<String>,
}

/// Result of creating a provider session (payment or payout).
#[derive(Debug, Clone)]
pub struct ProviderSession {
    /// Provider-side identifier used for later polling and webhooks.
    pub provider_reference: String,
    /// URL the user must visit to authorize the payment (on-ramp only).
    pub action_url: Option<String>,
    pub status: ProviderStatus,
}

/// On-ramp order handed to a provider.
#[derive(Debug, Clone)]
pub struct OnRampOrder {
    pub request_id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub amount_minor: u64,
    pub amount_eur: String,
    pub note: Option<String>,
}

/// Off-ramp payout order handed to a provider.
#[derive(Debug, Clone)]
pub struct OffRampOrder {
    pub request_id: String,
    pub wallet_id: String,
    pub user_id: String,
    pub amount_minor: u64,
    pub amount_eur: String,
    pub beneficiary_name: String,
    pub beneficiary_account: String,
    pub note: Option<String>,
}

/// Errors from provider operations.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Provider is not configured or credentials are unusable.
    #[error("Provider configuration error: {0}")]
    Config(String),

    /// Network failure, provider outage, or malformed response. Safe to
    /// retry on the next sync pass.
    #[error("Provider request failed: {0}")]
    Transient(String),

    /// The provider refused the order outright.
    #[error("Provider rejected the order: {0}")]
    Rejected(String),
}

/// Bank-side operations the reconciliation engine needs from a provider.
pub trait ProviderClient: Send + Sync {
    /// Stable provider identifier stored on fiat requests.
    fn provider_id(&self) -> &str;

    /// Create an on-ramp payment session.
    fn create_session<'a>(&'a self, order: &OnRampOrder) -> ProviderFuture<'a, ProviderSession>;

    /// Initiate an off-ramp payout.
    fn initiate_payout<'a>(&'a self, order: &OffRampOrder) -> ProviderFuture<'a, ProviderSession>;

    /// Poll the provider for the current status of a payment or payout.
    fn query_status<'a>(
        &'a self,
        direction: FiatDirection,
        provider_reference: &str,
    ) -> ProviderFuture<'a, ProviderStatusDetails>;
}

/// Provider descriptor returned by the provider listing endpoint.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct ProviderDescriptor {
    /// Stable provider identifier.
    pub id: String,
    /// Human-readable name.
    pub display_name: String,
    /// Settlement currency.
    pub currency: String,
    /// Whether credentials for this provider are configured.
    pub configured: bool,
}

/// Verify a webhook HMAC-SHA256 signature (base64-encoded, computed over
/// the raw request body). Comparison is constant-time via the hmac crate.
pub fn verify_webhook_signature(secret: &str, body: &[u8], signature_header: &str) -> bool {
    use base64ct::{Base64, Encoding};
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    let Ok(signature) = Base64::decode_vec(signature_header.trim()) else {
        return false;
    };
    let Ok(mut mac) = Hmac::<Sha256>::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(body);
    mac.verify_slice(&signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        base64::engine::general_purpose::STANDARD.encode(mac.finalize().into_bytes())
    }

    #[test]
    fn valid_signature_verifies() {
        let body = br#"{"event":"payment_settled","payment_id":"pay-1"}"#;
        let signature = sign("webhook-secret", body);
        assert!(verify_webhook_signature("webhook-secret", body, &signature));
    }

    #[test]
    fn wrong_secret_fails() {
        let body = b"payload";
        let signature = sign("other-secret", body);
        assert!(!verify_webhook_signature("webhook-secret", body, &signature));
    }

    #[test]
    fn tampered_body_fails() {
        let signature = sign("webhook-secret", b"original");
        assert!(!verify_webhook_signature("webhook-secret", b"tampered", &signature));
    }

    #[test]
    fn garbage_signature_fails() {
        assert!(!verify_webhook_signature("webhook-secret", b"body", "not base64!!!"));
        assert!(!verify_webhook_signature("webhook-secret", b"body", ""));
    }
}
