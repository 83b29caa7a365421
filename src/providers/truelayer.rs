// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! TrueLayer sandbox integration for fiat on-ramp/off-ramp.

use std::{collections::HashMap, fs, time::Duration};

use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::info;
use truelayer_signing::{sign_with_pem, Method};
use uuid::Uuid;

use crate::storage::FiatDirection;

use super::{
    OffRampOrder, OnRampOrder, ProviderClient, ProviderDescriptor, ProviderError, ProviderFuture,
    ProviderSession, ProviderStatus, ProviderStatusDetails,
};

/// Stable identifier stored on fiat requests.
pub const PROVIDER_ID: &str = "truelayer_sandbox";

const DEFAULT_API_BASE_URL: &str = "https://api.truelayer-sandbox.com";
const DEFAULT_AUTH_BASE_URL: &str = "https://auth.truelayer-sandbox.com";
const DEFAULT_HOSTED_PAYMENTS_BASE_URL: &str = "https://payment.truelayer-sandbox.com";
const DEFAULT_CURRENCY: &str = "EUR";
const DEFAULT_HOSTED_PAYMENTS_RETURN_URI: &str = "http://localhost:3000/callback";
const PAYMENTS_SCOPE: &str = "payments";

/// Details of an off-ramp payout status poll.
#[derive(Debug, Clone)]
pub struct PayoutStatusDetails {
    pub status: ProviderStatus,
    pub raw_status: String,
    pub failure_reason: Option<String>,
}

#[derive(Debug, thiserror::Error)]
pub enum TrueLayerError {
    #[error("TrueLayer configuration missing: {0}")]
    MissingConfig(String),

    #[error("TrueLayer signing failed: {0}")]
    Signing(String),

    #[error("TrueLayer auth failed: {0}")]
    Auth(String),

    #[error("TrueLayer request failed: {0}")]
    Request(String),

    #[error("TrueLayer response was invalid: {0}")]
    InvalidResponse(String),
}

impl From<TrueLayerError> for ProviderError {
    fn from(e: TrueLayerError) -> Self {
        match e {
            TrueLayerError::MissingConfig(_) | TrueLayerError::Signing(_) => {
                ProviderError::Config(e.to_string())
            }
            TrueLayerError::Auth(_)
            | TrueLayerError::Request(_)
            | TrueLayerError::InvalidResponse(_) => ProviderError::Transient(e.to_string()),
        }
    }
}

/// TrueLayer Payments API v3 client (payment initiation + payouts).
#[derive(Debug, Clone)]
pub struct TrueLayerClient {
    api_base_url: String,
    auth_base_url: String,
    hosted_payments_base_url: String,
    client_id: String,
    client_secret: String,
    signing_key_id: String,
    signing_private_key_pem: String,
    merchant_account_id: String,
    currency: String,
    return_uri: String,
    http: Client,
}

#[derive(Debug, Deserialize)]
struct OAuthTokenResponse {
    access_token: String,
}

impl TrueLayerClient {
    /// Whether the full credential set is present in the environment.
    pub fn is_configured() -> bool {
        required_env_present("TRUELAYER_CLIENT_ID")
            && required_env_present("TRUELAYER_CLIENT_SECRET")
            && required_env_present("TRUELAYER_SIGNING_KEY_ID")
            && (required_env_present("TRUELAYER_SIGNING_PRIVATE_KEY_PEM")
                || required_env_present("TRUELAYER_SIGNING_PRIVATE_KEY_PATH"))
            && required_env_present("TRUELAYER_MERCHANT_ACCOUNT_ID")
    }

    pub fn from_env() -> Result<Self, TrueLayerError> {
        let api_base_url = env_or_default("TRUELAYER_API_BASE_URL", DEFAULT_API_BASE_URL);
        let auth_base_url = env_or_default("TRUELAYER_AUTH_BASE_URL", DEFAULT_AUTH_BASE_URL);
        let hosted_payments_base_url = env_or_default(
            "TRUELAYER_HOSTED_PAYMENTS_BASE_URL",
            DEFAULT_HOSTED_PAYMENTS_BASE_URL,
        );
        let client_id = env_required("TRUELAYER_CLIENT_ID")?;
        let client_secret = env_required("TRUELAYER_CLIENT_SECRET")?;
        let signing_key_id = env_required("TRUELAYER_SIGNING_KEY_ID")?;
        let signing_private_key_pem = load_signing_key_pem()?;
        let merchant_account_id = env_required("TRUELAYER_MERCHANT_ACCOUNT_ID")?;
        let currency = env_or_default("TRUELAYER_CURRENCY", DEFAULT_CURRENCY).to_ascii_uppercase();
        let return_uri = env_or_default(
            "TRUELAYER_RETURN_URI",
            DEFAULT_HOSTED_PAYMENTS_RETURN_URI,
        );

        let http = Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| TrueLayerError::Request(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            api_base_url,
            auth_base_url,
            hosted_payments_base_url,
            client_id,
            client_secret,
            signing_key_id,
            signing_private_key_pem,
            merchant_account_id,
            currency,
            return_uri,
            http,
        })
    }

    /// Descriptor for the provider listing endpoint.
    pub fn descriptor() -> ProviderDescriptor {
        ProviderDescriptor {
            id: PROVIDER_ID.to_string(),
            display_name: "TrueLayer (sandbox)".to_string(),
            currency: DEFAULT_CURRENCY.to_string(),
            configured: Self::is_configured(),
        }
    }

    /// Create an on-ramp payment and resolve the hosted-payment-page URL the
    /// user must visit to authorize it.
    pub async fn create_payment(
        &self,
        order: &OnRampOrder,
    ) -> Result<ProviderSession, TrueLayerError> {
        let provider_user = build_provider_user(&order.user_id);

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "wallet_id".to_string(),
            Value::String(order.wallet_id.clone()),
        );
        metadata.insert(
            "request_id".to_string(),
            Value::String(order.request_id.clone()),
        );
        metadata.insert(
            "amount_eur".to_string(),
            Value::String(order.amount_eur.clone()),
        );
        metadata.insert("user_id".to_string(), Value::String(order.user_id.clone()));
        if let Some(note) = &order.note {
            metadata.insert("note".to_string(), Value::String(note.clone()));
        }

        let reference = format!("sb-onramp-{}", order.request_id);
        let payload = json!({
            "amount_in_minor": order.amount_minor,
            "currency": self.currency,
            "payment_method": {
                "type": "bank_transfer",
                "provider_selection": {
                    "type": "user_selected"
                },
                "beneficiary": {
                    "type": "merchant_account",
                    "merchant_account_id": self.merchant_account_id,
                    "reference": reference
                }
            },
            "user": provider_user,
            "metadata": metadata
        });

        let response = self
            .signed_post_json("/v3/payments", PAYMENTS_SCOPE, &payload, &order.request_id)
            .await?;

        let payment_id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TrueLayerError::InvalidResponse("missing payment id in response".to_string())
            })?
            .to_string();

        let status = response
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TrueLayerError::InvalidResponse("missing payment status in response".to_string())
            })?;

        let resource_token = response
            .get("resource_token")
            .and_then(Value::as_str)
            .map(str::to_string);

        let action_url = response
            .pointer("/hosted_page/uri")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| {
                response
                    .pointer("/authorization_flow/actions/next/url")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| {
                response
                    .pointer("/authorization_flow/actions/next/uri")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .or_else(|| {
                resource_token.as_ref().map(|token| {
                    build_hpp_url(
                        &self.hosted_payments_base_url,
                        &payment_id,
                        token,
                        Some(self.return_uri.as_str()),
                    )
                })
            });

        let action_url = ensure_hpp_return_uri(action_url, Some(self.return_uri.as_str()));

        Ok(ProviderSession {
            provider_reference: payment_id,
            action_url,
            status: map_payment_status(status),
        })
    }

    /// Initiate an off-ramp payout from the merchant account to the user's
    /// bank account.
    pub async fn create_payout(
        &self,
        order: &OffRampOrder,
    ) -> Result<ProviderSession, TrueLayerError> {
        let scheme_selection = resolve_payout_scheme_selection(&self.currency);

        let mut metadata = serde_json::Map::new();
        metadata.insert(
            "wallet_id".to_string(),
            Value::String(order.wallet_id.clone()),
        );
        metadata.insert(
            "request_id".to_string(),
            Value::String(order.request_id.clone()),
        );
        metadata.insert(
            "amount_eur".to_string(),
            Value::String(order.amount_eur.clone()),
        );
        metadata.insert("user_id".to_string(), Value::String(order.user_id.clone()));
        if let Some(note) = &order.note {
            metadata.insert("note".to_string(), Value::String(note.clone()));
        }

        let payload = json!({
            "amount_in_minor": order.amount_minor,
            "currency": self.currency,
            "beneficiary": {
                "type": "external_account",
                "account_holder_name": order.beneficiary_name,
                "account_identifier": {
                    "type": "iban",
                    "iban": order.beneficiary_account
                },
                "reference": format!("sb-offramp-{}", order.request_id)
            },
            "merchant_account_id": self.merchant_account_id,
            "scheme_selection": scheme_selection,
            "metadata": metadata
        });

        info!(
            request_id = %order.request_id,
            "TrueLayer create_payout: sending payout request"
        );

        let response = self
            .signed_post_json("/v3/payouts", PAYMENTS_SCOPE, &payload, &order.request_id)
            .await?;

        let payout_id = response
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TrueLayerError::InvalidResponse("missing payout id in response".to_string())
            })?
            .to_string();

        // Some payout create responses do not include a status field
        // immediately. Treat those as pending and rely on polling.
        let status = extract_provider_status(&response).unwrap_or("pending");

        Ok(ProviderSession {
            provider_reference: payout_id,
            action_url: None,
            status: map_payout_status(status),
        })
    }

    /// Poll the status of an on-ramp payment.
    pub async fn fetch_payment_status(
        &self,
        provider_reference: &str,
    ) -> Result<PayoutStatusDetails, TrueLayerError> {
        let response = self
            .get_json(
                &format!("/v3/payments/{provider_reference}"),
                PAYMENTS_SCOPE,
            )
            .await?;
        let status = response
            .get("status")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                TrueLayerError::InvalidResponse("missing payment status in response".to_string())
            })?;
        Ok(PayoutStatusDetails {
            status: map_payment_status(status),
            raw_status: status.to_string(),
            failure_reason: response
                .get("failure_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    /// Poll the status of an off-ramp payout.
    pub async fn fetch_payout_status(
        &self,
        provider_reference: &str,
    ) -> Result<PayoutStatusDetails, TrueLayerError> {
        let response = self
            .get_json(&format!("/v3/payouts/{provider_reference}"), PAYMENTS_SCOPE)
            .await?;

        let status = extract_provider_status(&response).ok_or_else(|| {
            TrueLayerError::InvalidResponse("missing payout status in response".to_string())
        })?;
        Ok(PayoutStatusDetails {
            status: map_payout_status(status),
            raw_status: status.to_string(),
            failure_reason: response
                .get("failure_reason")
                .and_then(Value::as_str)
                .map(str::to_string),
        })
    }

    async fn access_token(&self, scope: &str) -> Result<String, TrueLayerError> {
        let mut form = HashMap::new();
        form.insert("grant_type".to_string(), "client_credentials".to_string());
        form.insert("client_id".to_string(), self.client_id.clone());
        form.insert("client_secret".to_string(), self.client_secret.clone());
        form.insert("scope".to_string(), scope.to_string());

        let response = self
            .http
            .post(format!(
                "{}/connect/token",
                self.auth_base_url.trim_end_matches('/')
            ))
            .form(&form)
            .send()
            .await
            .map_err(|e| TrueLayerError::Auth(format!("token request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrueLayerError::Auth(format!(
                "token request returned {status}: {body}"
            )));
        }

        let token_response: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| TrueLayerError::Auth(format!("invalid token response: {e}")))?;

        if token_response.access_token.trim().is_empty() {
            return Err(TrueLayerError::Auth(
                "token response did not include access_token".to_string(),
            ));
        }

        Ok(token_response.access_token)
    }

    async fn get_json(&self, path: &str, scope: &str) -> Result<Value, TrueLayerError> {
        let token = self.access_token(scope).await?;
        let response = self
            .http
            .get(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .header("Authorization", format!("Bearer {token}"))
            .header("Content-Type", "application/json")
            .send()
            .await
            .map_err(|e| TrueLayerError::Request(format!("GET {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrueLayerError::Request(format!(
                "GET {path} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TrueLayerError::InvalidResponse(format!("GET {path} invalid JSON: {e}")))
    }

    async fn signed_post_json(
        &self,
        path: &str,
        scope: &str,
        payload: &Value,
        idempotency_key: &str,
    ) -> Result<Value, TrueLayerError> {
        let token = self.access_token(scope).await?;
        let body = serde_json::to_string(payload)
            .map_err(|e| TrueLayerError::InvalidResponse(format!("serialize body failed: {e}")))?;

        let signature = sign_with_pem(
            &self.signing_key_id,
            self.signing_private_key_pem.as_bytes(),
        )
        .method(Method::Post)
        .path(path)
        .header("Idempotency-Key", idempotency_key.as_bytes())
        .body(body.as_bytes())
        .build_signer()
        .sign()
        .map_err(|e| TrueLayerError::Signing(e.to_string()))?;

        let response = self
            .http
            .post(format!(
                "{}{}",
                self.api_base_url.trim_end_matches('/'),
                path
            ))
            .header("Authorization", format!("Bearer {token}"))
            .header("Idempotency-Key", idempotency_key)
            .header("Tl-Signature", signature)
            .header("Content-Type", "application/json")
            .body(body)
            .send()
            .await
            .map_err(|e| TrueLayerError::Request(format!("POST {path} failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(TrueLayerError::Request(format!(
                "POST {path} returned {status}: {body}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| TrueLayerError::InvalidResponse(format!("POST {path} invalid JSON: {e}")))
    }
}

impl ProviderClient for TrueLayerClient {
    fn provider_id(&self) -> &str {
        PROVIDER_ID
    }

    fn create_session<'a>(&'a self, order: &OnRampOrder) -> ProviderFuture<'a, ProviderSession> {
        let order = order.clone();
        Box::pin(async move { Ok(self.create_payment(&order).await?) })
    }

    fn initiate_payout<'a>(&'a self, order: &OffRampOrder) -> ProviderFuture<'a, ProviderSession> {
        let order = order.clone();
        Box::pin(async move { Ok(self.create_payout(&order).await?) })
    }

    fn query_status<'a>(
        &'a self,
        direction: FiatDirection,
        provider_reference: &str,
    ) -> ProviderFuture<'a, ProviderStatusDetails> {
        let reference = provider_reference.to_string();
        Box::pin(async move {
            let details = match direction {
                FiatDirection::OnRamp => self.fetch_payment_status(&reference).await?,
                FiatDirection::OffRamp => self.fetch_payout_status(&reference).await?,
            };
            Ok(ProviderStatusDetails {
                status: details.status,
                raw_status: details.raw_status,
                failure_reason: details.failure_reason,
            })
        })
    }
}

pub fn map_payment_status(raw_status: &str) -> ProviderStatus {
    let status = raw_status.trim().to_ascii_lowercase();
    match status.as_str() {
        "executed" | "settled" => ProviderStatus::Completed,
        "failed" | "cancelled" | "expired" => ProviderStatus::Rejected,
        _ => ProviderStatus::Pending,
    }
}

pub fn map_payout_status(raw_status: &str) -> ProviderStatus {
    let status = raw_status.trim().to_ascii_lowercase();
    match status.as_str() {
        "executed" | "settled" | "successful" => ProviderStatus::Completed,
        "failed" | "cancelled" | "rejected" => ProviderStatus::Rejected,
        _ => ProviderStatus::Pending,
    }
}

fn resolve_payout_scheme_selection(currency: &str) -> Value {
    match currency.to_ascii_uppercase().as_str() {
        // UK payouts settle consistently in sandbox when using FPS.
        "GBP" => json!({
            "type": "preselected",
            "scheme_id": "faster_payments_service"
        }),
        // EUR payouts route via SEPA in sandbox.
        "EUR" => json!({
            "type": "preselected",
            "scheme_id": "sepa_credit_transfer"
        }),
        _ => json!({ "type": "instant_preferred" }),
    }
}

fn required_env_present(name: &str) -> bool {
    env_optional(name).is_some()
}

fn env_required(name: &str) -> Result<String, TrueLayerError> {
    env_optional(name).ok_or_else(|| TrueLayerError::MissingConfig(name.to_string()))
}

fn env_optional(name: &str) -> Option<String> {
    match std::env::var(name) {
        Ok(value) => {
            let trimmed = value.trim().to_string();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed)
            }
        }
        Err(_) => None,
    }
}

fn env_or_default(name: &str, default: &str) -> String {
    std::env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn load_signing_key_pem() -> Result<String, TrueLayerError> {
    if let Some(pem) = std::env::var("TRUELAYER_SIGNING_PRIVATE_KEY_PEM")
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
    {
        return Ok(pem.replace("\\n", "\n"));
    }

    let path = env_required("TRUELAYER_SIGNING_PRIVATE_KEY_PATH")?;
    let pem = fs::read_to_string(&path)
        .map_err(|e| TrueLayerError::MissingConfig(format!("failed to read {path}: {e}")))?;
    let trimmed = pem.trim().to_string();
    if trimmed.is_empty() {
        return Err(TrueLayerError::MissingConfig(format!(
            "TRUELAYER_SIGNING_PRIVATE_KEY_PATH points to an empty file: {path}"
        )));
    }
    Ok(trimmed)
}

fn normalize_user_id_as_uuid(raw_user_id: &str) -> String {
    if let Ok(parsed) = Uuid::parse_str(raw_user_id) {
        return parsed.to_string();
    }
    Uuid::new_v5(&Uuid::NAMESPACE_URL, raw_user_id.as_bytes()).to_string()
}

fn build_provider_user(raw_user_id: &str) -> Value {
    let provider_user_id = normalize_user_id_as_uuid(raw_user_id);
    // TrueLayer requires user.name and either user.email or user.phone.
    let email = format!("user-{provider_user_id}@sandbox.stablebridge.dev");
    json!({
        "id": provider_user_id,
        "name": "StableBridge User",
        "email": email
    })
}

fn build_hpp_url(
    hosted_payments_base_url: &str,
    payment_id: &str,
    resource_token: &str,
    return_uri: Option<&str>,
) -> String {
    let mut url = format!(
        "{}/payments#payment_id={}&resource_token={}",
        hosted_payments_base_url.trim_end_matches('/'),
        payment_id,
        resource_token
    );

    if let Some(uri) = return_uri {
        if !uri.trim().is_empty() {
            let encoded_uri: String =
                url::form_urlencoded::byte_serialize(uri.as_bytes()).collect();
            url.push_str("&return_uri=");
            url.push_str(&encoded_uri);
        }
    }

    url
}

fn ensure_hpp_return_uri(url: Option<String>, return_uri: Option<&str>) -> Option<String> {
    let mut url = url?;
    let Some(return_uri) = return_uri else {
        return Some(url);
    };
    if return_uri.trim().is_empty() || url.contains("return_uri=") {
        return Some(url);
    }
    if !url.starts_with("https://payment.truelayer") {
        return Some(url);
    }

    let encoded_uri: String = url::form_urlencoded::byte_serialize(return_uri.as_bytes()).collect();
    if let Some(fragment_idx) = url.find('#') {
        if fragment_idx + 1 < url.len() {
            url.push('&');
        }
        url.push_str("return_uri=");
        url.push_str(&encoded_uri);
    }

    Some(url)
}

fn extract_provider_status(response: &Value) -> Option<&str> {
    response
        .get("status")
        .and_then(Value::as_str)
        .or_else(|| response.pointer("/payment/status").and_then(Value::as_str))
        .or_else(|| response.pointer("/payout/status").and_then(Value::as_str))
        .or_else(|| response.pointer("/data/status").and_then(Value::as_str))
}
