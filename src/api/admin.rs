// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Admin-only endpoints for reserve wallet operations and manual syncs.

use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::AdminOnly,
    chain::{format_token_units, minor_to_token_units, ChainError},
    error::ApiError,
    fiat::ReserveWalletManager,
    state::AppState,
    storage::AuditEventType,
};

use super::fiat::{parse_amount_to_minor, to_response, FiatRequestResponse};

/// Reserve (service) wallet details.
#[derive(Debug, Serialize, ToSchema)]
pub struct ServiceWalletResponse {
    /// Stable reserve wallet ID.
    pub wallet_id: String,
    /// Reserve wallet public address (off-ramp deposit target).
    pub public_address: String,
    /// When the reserve keypair was provisioned.
    pub created_at: String,
    /// Live settlement-token balance, EUR-formatted. Absent when the chain
    /// RPC is unreachable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<String>,
}

/// Request body for reserve top-up.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveTopupBody {
    /// Amount in EUR decimal string.
    pub amount: String,
}

/// Request body for a manual reserve transfer.
#[derive(Debug, Deserialize, ToSchema)]
pub struct ReserveTransferBody {
    /// Destination address.
    pub to: String,
    /// Amount in EUR decimal string.
    pub amount: String,
}

/// Response for reserve operations that submit a transaction.
#[derive(Debug, Serialize, ToSchema)]
pub struct ReserveTxResponse {
    /// Submitted transaction hash.
    pub tx_hash: String,
    /// Amount in EUR.
    pub amount_eur: String,
}

fn require_reserve(state: &AppState) -> Result<std::sync::Arc<ReserveWalletManager>, ApiError> {
    state.reserve.clone().ok_or_else(|| {
        ApiError::service_unavailable("Chain settlement is not configured. Set CHAIN_RPC_URL.")
    })
}

fn map_chain_error(error: ChainError) -> ApiError {
    match error {
        ChainError::InsufficientReserve {
            available,
            required,
        } => ApiError::unprocessable(format!(
            "Insufficient reserve balance: available {}, required {}",
            format_token_units(available),
            format_token_units(required)
        )),
        ChainError::InvalidAddress(message) => ApiError::bad_request(message),
        ChainError::Unavailable(message) => {
            ApiError::service_unavailable(format!("Chain RPC unavailable: {message}"))
        }
        ChainError::TxFailed(message) => {
            ApiError::internal(format!("Transaction failed: {message}"))
        }
        other => ApiError::service_unavailable(other.to_string()),
    }
}

/// Get reserve wallet metadata and live balance.
#[utoipa::path(
    get,
    path = "/v1/admin/fiat/service-wallet",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reserve wallet details", body = ServiceWalletResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Reserve wallet not bootstrapped"),
        (status = 503, description = "Chain settlement not configured")
    )
)]
pub async fn get_service_wallet(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<ServiceWalletResponse>, ApiError> {
    let reserve = require_reserve(&state)?;
    let metadata = reserve
        .metadata()
        .map_err(|_| ApiError::not_found("Reserve wallet is not bootstrapped"))?;

    let balance = match reserve.balance().await {
        Ok(units) => Some(format_token_units(units)),
        Err(e) => {
            tracing::warn!(error = %e, "Failed to read reserve balance");
            None
        }
    };

    let storage = state.storage();
    audit_log!(&storage, AuditEventType::AdminAccess, &user);

    Ok(Json(ServiceWalletResponse {
        wallet_id: metadata.wallet_id,
        public_address: metadata.public_address,
        created_at: metadata.created_at.to_rfc3339(),
        balance,
    }))
}

/// Bootstrap the reserve wallet. Idempotent: returns the existing wallet
/// when one is already provisioned.
#[utoipa::path(
    post,
    path = "/v1/admin/fiat/service-wallet/bootstrap",
    tag = "Admin",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Reserve wallet ready", body = ServiceWalletResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 503, description = "Chain settlement not configured")
    )
)]
pub async fn bootstrap_service_wallet(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
) -> Result<Json<ServiceWalletResponse>, ApiError> {
    let reserve = require_reserve(&state)?;
    let metadata = reserve
        .bootstrap()
        .map_err(|e| ApiError::internal(format!("Reserve bootstrap failed: {e}")))?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::ReserveBootstrapped,
        &user,
        "reserve_wallet",
        &metadata.wallet_id
    );

    Ok(Json(ServiceWalletResponse {
        wallet_id: metadata.wallet_id,
        public_address: metadata.public_address,
        created_at: metadata.created_at.to_rfc3339(),
        balance: None,
    }))
}

/// Mint settlement token to the reserve wallet.
#[utoipa::path(
    post,
    path = "/v1/admin/fiat/reserve/topup",
    tag = "Admin",
    request_body = ReserveTopupBody,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Top-up submitted", body = ReserveTxResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 503, description = "Chain unavailable")
    )
)]
pub async fn reserve_topup(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
    Json(body): Json<ReserveTopupBody>,
) -> Result<Json<ReserveTxResponse>, ApiError> {
    let (amount_eur, amount_minor) = parse_amount_to_minor(&body.amount)?;
    let reserve = require_reserve(&state)?;

    let tx_hash = reserve
        .topup(minor_to_token_units(amount_minor))
        .await
        .map_err(map_chain_error)?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::ReserveTopup,
        &user,
        "reserve_tx",
        &tx_hash
    );

    Ok(Json(ReserveTxResponse { tx_hash, amount_eur }))
}

/// Transfer settlement token out of the reserve wallet.
#[utoipa::path(
    post,
    path = "/v1/admin/fiat/reserve/transfer",
    tag = "Admin",
    request_body = ReserveTransferBody,
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Transfer submitted", body = ReserveTxResponse),
        (status = 400, description = "Bad request"),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 422, description = "Insufficient reserve balance"),
        (status = 503, description = "Chain unavailable")
    )
)]
pub async fn reserve_transfer(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
    Json(body): Json<ReserveTransferBody>,
) -> Result<Json<ReserveTxResponse>, ApiError> {
    let (amount_eur, amount_minor) = parse_amount_to_minor(&body.amount)?;
    let reserve = require_reserve(&state)?;

    let tx_hash = reserve
        .transfer(body.to.trim(), minor_to_token_units(amount_minor))
        .await
        .map_err(map_chain_error)?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::ReserveTransfer,
        &user,
        "reserve_tx",
        &tx_hash
    );

    Ok(Json(ReserveTxResponse { tx_hash, amount_eur }))
}

/// Force a reconciliation pass on a fiat request.
///
/// Runs the same transition evaluation the webhook and poller use. Syncing
/// a terminal request is a no-op success.
#[utoipa::path(
    post,
    path = "/v1/admin/fiat/requests/{request_id}/sync",
    tag = "Admin",
    params(
        ("request_id" = String, Path, description = "Fiat request ID")
    ),
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Request synced", body = FiatRequestResponse),
        (status = 401, description = "Not authenticated"),
        (status = 403, description = "Not authorized (admin required)"),
        (status = 404, description = "Request not found"),
        (status = 409, description = "Concurrent modification, retry"),
        (status = 503, description = "Fiat settlement not configured")
    )
)]
pub async fn sync_fiat_request(
    AdminOnly(user): AdminOnly,
    State(state): State<AppState>,
    Path(request_id): Path<String>,
) -> Result<Json<FiatRequestResponse>, ApiError> {
    let engine = state.engine().ok_or_else(|| {
        ApiError::service_unavailable("Fiat settlement is not configured")
    })?;

    let record = engine.sync_request(&request_id).await?;

    let storage = state.storage();
    audit_log!(
        &storage,
        AuditEventType::FiatRequestSynced,
        &user,
        "fiat_request",
        &record.request_id
    );

    Ok(Json(to_response(&record)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn insufficient_reserve_maps_to_422_with_amounts() {
        let error = map_chain_error(ChainError::InsufficientReserve {
            available: 1_000_000,
            required: 2_500_000,
        });
        assert_eq!(error.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(error.message.contains("1.00"));
        assert!(error.message.contains("2.50"));
    }

    #[test]
    fn chain_unavailable_maps_to_503() {
        let error = map_chain_error(ChainError::Unavailable("rpc timeout".to_string()));
        assert_eq!(error.status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn invalid_address_maps_to_400() {
        let error = map_chain_error(ChainError::InvalidAddress("bad hex".to_string()));
        assert_eq!(error.status, StatusCode::BAD_REQUEST);
    }
}
