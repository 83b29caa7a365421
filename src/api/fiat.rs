// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat on-ramp/off-ramp API.
//!
//! Request creation validates ownership and hands off to the reconciliation
//! engine; reads go straight to the repository. The webhook endpoint is
//! unauthenticated but HMAC-verified, and only ever triggers a re-sync — the
//! payload is never trusted for state.

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};

use crate::{
    audit_log,
    auth::Auth,
    error::ApiError,
    fiat::{NewOffRamp, NewOnRamp},
    providers::{self, truelayer, ProviderDescriptor},
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, AuditRepository, FiatDirection, FiatRequestRepository,
        FiatRequestStatus, StoredFiatRequest, WalletRepository, WalletStatus,
    },
};

/// Signature header carried by provider webhook deliveries.
pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Webhook-Signature";

/// Request body for creating a fiat on-ramp request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOnRampBody {
    /// Wallet to credit with settlement token.
    pub wallet_id: String,
    /// Amount in EUR decimal string (e.g. "25.50").
    pub amount: String,
    /// Provider ID; defaults to the only registered provider.
    pub provider: Option<String>,
    /// Optional free-form note.
    pub note: Option<String>,
}

/// Request body for creating a fiat off-ramp request.
#[derive(Debug, Clone, Deserialize, ToSchema)]
pub struct CreateOffRampBody {
    /// Wallet the user will send settlement token from.
    pub wallet_id: String,
    /// Amount in EUR decimal string (e.g. "25.50").
    pub amount: String,
    /// Provider ID; defaults to the only registered provider.
    pub provider: Option<String>,
    /// Payout beneficiary account holder name.
    pub beneficiary_name: String,
    /// Payout beneficiary account (IBAN).
    pub beneficiary_account: String,
    /// Optional free-form note.
    pub note: Option<String>,
}

/// Fiat request representation returned to clients.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FiatRequestResponse {
    pub request_id: String,
    pub wallet_id: String,
    /// `on_ramp` or `off_ramp`.
    pub direction: FiatDirection,
    /// Amount in EUR.
    pub amount_eur: String,
    /// Provider identifier.
    pub provider: String,
    /// Current status.
    pub status: FiatRequestStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Provider reference/session ID, once a session exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    /// Provider action URL (redirect/continue flow).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_action_url: Option<String>,
    /// Deposit target address for off-ramps.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_wallet_address: Option<String>,
    /// Detected user deposit transaction (off-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<String>,
    /// Reserve settlement transaction (on-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_transfer_tx_hash: Option<String>,
    /// Why the request failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// List response for fiat requests.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FiatRequestListResponse {
    /// Requests visible to the authenticated user.
    pub requests: Vec<FiatRequestResponse>,
    /// Total count.
    pub total: usize,
}

/// Response for provider discovery.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct FiatProviderListResponse {
    /// Default provider ID if client does not pass one.
    pub default_provider: String,
    /// Providers known to the backend.
    pub providers: Vec<ProviderDescriptor>,
}

/// Query params for listing fiat requests.
#[derive(Debug, Clone, Deserialize, IntoParams)]
pub struct FiatRequestListQuery {
    /// Optional wallet filter.
    pub wallet_id: Option<String>,
}

/// Acknowledgement returned to the webhook sender.
#[derive(Debug, Clone, Serialize, ToSchema)]
pub struct WebhookAck {
    pub request_id: String,
    pub status: FiatRequestStatus,
}

/// Payload shape we accept from provider webhooks. Only the reference is
/// used; everything else is re-derived by polling the provider.
#[derive(Debug, Deserialize)]
struct WebhookPayload {
    provider_reference: Option<String>,
    payment_id: Option<String>,
    payout_id: Option<String>,
}

impl WebhookPayload {
    fn reference(self) -> Option<String> {
        self.provider_reference.or(self.payment_id).or(self.payout_id)
    }
}

/// Parse a EUR decimal string into a normalized string and minor units.
///
/// Accepts up to 2 decimal places, rejects zero and non-numeric input.
pub(crate) fn parse_amount_to_minor(amount: &str) -> Result<(String, u64), ApiError> {
    let trimmed = amount.trim();
    if trimmed.is_empty() {
        return Err(ApiError::bad_request(
            "amount must be a valid positive number",
        ));
    }

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() > 2 {
        return Err(ApiError::bad_request(
            "amount must be a valid positive number",
        ));
    }

    let whole_part = parts[0];
    if whole_part.is_empty() || !whole_part.chars().all(|c| c.is_ascii_digit()) {
        return Err(ApiError::bad_request(
            "amount must be a valid positive number",
        ));
    }

    let whole = whole_part
        .parse::<u64>()
        .map_err(|_| ApiError::bad_request("amount is too large"))?;

    let fraction_part = if parts.len() == 2 { parts[1] } else { "" };
    if !fraction_part.chars().all(|c| c.is_ascii_digit()) || fraction_part.len() > 2 {
        return Err(ApiError::bad_request(
            "amount must have at most 2 decimal places",
        ));
    }

    let fraction = if fraction_part.is_empty() {
        0
    } else if fraction_part.len() == 1 {
        fraction_part
            .parse::<u64>()
            .map_err(|_| ApiError::bad_request("amount must be a valid positive number"))?
            * 10
    } else {
        fraction_part
            .parse::<u64>()
            .map_err(|_| ApiError::bad_request("amount must be a valid positive number"))?
    };

    let minor = whole
        .checked_mul(100)
        .and_then(|base| base.checked_add(fraction))
        .ok_or_else(|| ApiError::bad_request("amount is too large"))?;

    if minor == 0 {
        return Err(ApiError::bad_request(
            "amount must be a valid positive number",
        ));
    }

    let normalized = format!("{whole}.{fraction:02}");
    Ok((normalized, minor))
}

/// Resolve the requested provider against the registry. `None` selects the
/// default provider.
fn resolve_provider(requested: Option<&str>) -> Result<&'static str, ApiError> {
    match requested {
        None => Ok(truelayer::PROVIDER_ID),
        Some(id) if id == truelayer::PROVIDER_ID => Ok(truelayer::PROVIDER_ID),
        Some(other) => Err(ApiError::bad_request(format!("Unknown provider: {other}"))),
    }
}

fn normalize_note(note: Option<String>) -> Option<String> {
    note.and_then(|value| {
        let trimmed = value.trim().to_string();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    })
}

pub(crate) fn to_response(record: &StoredFiatRequest) -> FiatRequestResponse {
    FiatRequestResponse {
        request_id: record.request_id.clone(),
        wallet_id: record.wallet_id.clone(),
        direction: record.direction,
        amount_eur: record.amount_eur.clone(),
        provider: record.provider.clone(),
        status: record.status,
        note: record.note.clone(),
        provider_reference: record.provider_reference.clone(),
        provider_action_url: record.provider_action_url.clone(),
        service_wallet_address: record.service_wallet_address.clone(),
        deposit_tx_hash: record.deposit_tx_hash.clone(),
        reserve_transfer_tx_hash: record.reserve_transfer_tx_hash.clone(),
        failure_reason: record.failure_reason.clone(),
        created_at: record.created_at.to_rfc3339(),
        updated_at: record.updated_at.to_rfc3339(),
    }
}

/// Load a wallet, verify the caller owns it, and require it active.
fn owned_active_wallet(
    state: &AppState,
    user_id: &str,
    wallet_id: &str,
) -> Result<crate::storage::WalletMetadata, ApiError> {
    let storage = state.storage();
    let wallet = WalletRepository::new(&storage)
        .get(wallet_id)
        .map_err(|_| ApiError::not_found("Wallet not found"))?;

    if wallet.owner_user_id != user_id {
        return Err(ApiError::forbidden("You do not own this wallet"));
    }
    if wallet.status != WalletStatus::Active {
        return Err(ApiError::forbidden(
            "Wallet must be active for fiat requests",
        ));
    }
    Ok(wallet)
}

/// List supported fiat providers.
#[utoipa::path(
    get,
    path = "/v1/fiat/providers",
    tag = "Fiat",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Supported fiat providers", body = FiatProviderListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_fiat_providers(Auth(_user): Auth) -> Json<FiatProviderListResponse> {
    Json(FiatProviderListResponse {
        default_provider: truelayer::PROVIDER_ID.to_string(),
        providers: vec![truelayer::TrueLayerClient::descriptor()],
    })
}

/// Create a fiat on-ramp request.
#[utoipa::path(
    post,
    path = "/v1/fiat/onramp/requests",
    tag = "Fiat",
    request_body = CreateOnRampBody,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Fiat on-ramp request created", body = FiatRequestResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Wallet not found"),
        (status = 503, description = "Provider unavailable")
    )
)]
pub async fn create_onramp_request(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(body): Json<CreateOnRampBody>,
) -> Result<(StatusCode, Json<FiatRequestResponse>), ApiError> {
    let (amount_eur, amount_minor) = parse_amount_to_minor(&body.amount)?;
    resolve_provider(body.provider.as_deref())?;
    let wallet = owned_active_wallet(&state, &user.user_id, &body.wallet_id)?;

    let engine = state.engine().ok_or_else(|| {
        ApiError::service_unavailable(
            "Fiat settlement is not configured. Set TRUELAYER_* environment variables.",
        )
    })?;

    let record = engine
        .create_onramp(NewOnRamp {
            wallet_id: wallet.wallet_id,
            wallet_address: wallet.public_address,
            owner_user_id: user.user_id.clone(),
            amount_eur,
            amount_minor,
            note: normalize_note(body.note),
        })
        .await?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::FiatOnRampRequested,
        &user,
        "fiat_request",
        &record.request_id
    );

    Ok((StatusCode::CREATED, Json(to_response(&record))))
}

/// Create a fiat off-ramp request.
#[utoipa::path(
    post,
    path = "/v1/fiat/offramp/requests",
    tag = "Fiat",
    request_body = CreateOffRampBody,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Fiat off-ramp request created", body = FiatRequestResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Wallet not found"),
        (status = 503, description = "Provider or reserve unavailable")
    )
)]
pub async fn create_offramp_request(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(body): Json<CreateOffRampBody>,
) -> Result<(StatusCode, Json<FiatRequestResponse>), ApiError> {
    let (amount_eur, amount_minor) = parse_amount_to_minor(&body.amount)?;
    resolve_provider(body.provider.as_deref())?;

    let beneficiary_name = body.beneficiary_name.trim().to_string();
    let beneficiary_account = body.beneficiary_account.trim().to_string();
    if beneficiary_name.is_empty() || beneficiary_account.is_empty() {
        return Err(ApiError::bad_request(
            "beneficiary_name and beneficiary_account are required",
        ));
    }

    let wallet = owned_active_wallet(&state, &user.user_id, &body.wallet_id)?;

    let engine = state.engine().ok_or_else(|| {
        ApiError::service_unavailable(
            "Fiat settlement is not configured. Set TRUELAYER_* environment variables.",
        )
    })?;

    let record = engine
        .create_offramp(NewOffRamp {
            wallet_id: wallet.wallet_id,
            wallet_address: wallet.public_address,
            owner_user_id: user.user_id.clone(),
            amount_eur,
            amount_minor,
            beneficiary_name,
            beneficiary_account,
            note: normalize_note(body.note),
        })
        .await?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::FiatOffRampRequested,
        &user,
        "fiat_request",
        &record.request_id
    );

    Ok((StatusCode::CREATED, Json(to_response(&record))))
}

/// List fiat requests visible to the authenticated user.
#[utoipa::path(
    get,
    path = "/v1/fiat/requests",
    tag = "Fiat",
    params(FiatRequestListQuery),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Fiat requests listed", body = FiatRequestListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_fiat_requests(
    Auth(user): Auth,
    State(state): State<AppState>,
    Query(query): Query<FiatRequestListQuery>,
) -> Result<Json<FiatRequestListResponse>, ApiError> {
    let storage = state.storage();
    let repo = FiatRequestRepository::new(&storage);

    let requests = match (query.wallet_id.as_deref(), user.is_admin()) {
        (Some(wallet_id), true) => {
            let mut all = repo.list_all()?;
            all.retain(|r| r.wallet_id == wallet_id);
            all
        }
        (Some(wallet_id), false) => repo.list_by_wallet_for_owner(&user.user_id, wallet_id)?,
        (None, _) => repo.list_by_owner(&user.user_id)?,
    };

    let mapped: Vec<FiatRequestResponse> = requests.iter().map(to_response).collect();

    Ok(Json(FiatRequestListResponse {
        total: mapped.len(),
        requests: mapped,
    }))
}

/// Get a fiat request by ID.
#[utoipa::path(
    get,
    path = "/v1/fiat/requests/{request_id}",
    tag = "Fiat",
    params(
        ("request_id" = String, Path, description = "Fiat request ID")
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Fiat request details", body = FiatRequestResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden"),
        (status = 404, description = "Not found")
    )
)]
pub async fn get_fiat_request(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<FiatRequestResponse>, ApiError> {
    let storage = state.storage();
    let record = FiatRequestRepository::new(&storage)
        .get(&request_id)
        .map_err(|_| ApiError::not_found("Fiat request not found"))?;

    user.authorize_owner(&record.owner_user_id).map_err(|_| {
        ApiError::forbidden("You do not have permission to access this fiat request")
    })?;

    Ok(Json(to_response(&record)))
}

/// Provider webhook receiver.
///
/// HMAC-SHA256 over the raw body; the signature must match
/// `FIAT_WEBHOOK_SECRET`. Verification happens before the body is parsed.
#[utoipa::path(
    post,
    path = "/v1/fiat/providers/{provider_id}/webhook",
    tag = "Fiat",
    params(
        ("provider_id" = String, Path, description = "Provider ID")
    ),
    request_body(content = Vec<u8>, content_type = "application/octet-stream", description = "Raw webhook payload"),
    responses(
        (status = 200, description = "Webhook processed", body = WebhookAck),
        (status = 400, description = "Payload carries no provider reference"),
        (status = 401, description = "Signature missing or invalid"),
        (status = 404, description = "Unknown provider or reference"),
        (status = 503, description = "Webhook secret not configured")
    )
)]
pub async fn provider_webhook(
    State(state): State<AppState>,
    Path(provider_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<WebhookAck>, ApiError> {
    if provider_id != truelayer::PROVIDER_ID {
        return Err(ApiError::not_found(format!(
            "Unknown provider {provider_id}"
        )));
    }

    let Some(secret) = state.webhook_secret.as_deref() else {
        return Err(ApiError::service_unavailable(
            "Webhook secret is not configured",
        ));
    };

    let signature = headers
        .get(WEBHOOK_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::new(StatusCode::UNAUTHORIZED, "Missing webhook signature"))?;

    if !providers::verify_webhook_signature(secret, &body, signature) {
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid webhook signature",
        ));
    }

    let payload: WebhookPayload = serde_json::from_slice(&body)
        .map_err(|_| ApiError::bad_request("Webhook body is not valid JSON"))?;
    let reference = payload
        .reference()
        .ok_or_else(|| ApiError::bad_request("Webhook carries no provider reference"))?;

    let engine = state.engine().ok_or_else(|| {
        ApiError::service_unavailable("Fiat settlement is not configured")
    })?;

    let record = engine.handle_webhook(&reference).await?;

    let storage = state.storage();
    let audit_repo = AuditRepository::new(&storage);
    let _ = audit_repo.log(
        &AuditEvent::new(AuditEventType::FiatWebhookReceived)
            .with_resource("fiat_request", &record.request_id),
    );

    Ok(Json(WebhookAck {
        request_id: record.request_id,
        status: record.status,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_amount_converts_to_minor_units() {
        let (normalized, minor) = parse_amount_to_minor("25.5").expect("valid amount");
        assert_eq!(normalized, "25.50");
        assert_eq!(minor, 2550);

        let (normalized, minor) = parse_amount_to_minor("100").expect("valid amount");
        assert_eq!(normalized, "100.00");
        assert_eq!(minor, 10_000);
    }

    #[test]
    fn parse_amount_rejects_non_positive_values() {
        assert_eq!(
            parse_amount_to_minor("0").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            parse_amount_to_minor("0.00").unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn parse_amount_rejects_malformed_input() {
        for input in ["", "abc", "-5", "1.234", "1.2.3", "1,50"] {
            assert_eq!(
                parse_amount_to_minor(input).unwrap_err().status,
                StatusCode::BAD_REQUEST,
                "input {input:?} should be rejected"
            );
        }
    }

    #[test]
    fn resolve_provider_defaults_and_validates() {
        assert_eq!(resolve_provider(None).unwrap(), truelayer::PROVIDER_ID);
        assert_eq!(
            resolve_provider(Some(truelayer::PROVIDER_ID)).unwrap(),
            truelayer::PROVIDER_ID
        );
        assert_eq!(
            resolve_provider(Some("acme-pay")).unwrap_err().status,
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn onramp_body_accepts_amount_and_optional_provider() {
        let body: CreateOnRampBody = serde_json::from_str(
            r#"{"wallet_id":"w-1","amount":"25.50","provider":"truelayer_sandbox"}"#,
        )
        .unwrap();
        assert_eq!(body.amount, "25.50");
        assert_eq!(body.provider.as_deref(), Some("truelayer_sandbox"));

        let body: CreateOnRampBody =
            serde_json::from_str(r#"{"wallet_id":"w-1","amount":"10"}"#).unwrap();
        assert!(body.provider.is_none());
        assert!(body.note.is_none());
    }

    #[test]
    fn webhook_payload_prefers_explicit_reference() {
        let payload: WebhookPayload = serde_json::from_str(
            r#"{"provider_reference":"ref-1","payment_id":"pay-2"}"#,
        )
        .unwrap();
        assert_eq!(payload.reference().as_deref(), Some("ref-1"));

        let payload: WebhookPayload =
            serde_json::from_str(r#"{"payout_id":"payout-3"}"#).unwrap();
        assert_eq!(payload.reference().as_deref(), Some("payout-3"));

        let payload: WebhookPayload = serde_json::from_str("{}").unwrap();
        assert!(payload.reference().is_none());
    }

    #[test]
    fn note_normalization_drops_blank_notes() {
        assert_eq!(normalize_note(Some("  ".to_string())), None);
        assert_eq!(
            normalize_note(Some(" monthly top-up ".to_string())),
            Some("monthly top-up".to_string())
        );
        assert_eq!(normalize_note(None), None);
    }
}
