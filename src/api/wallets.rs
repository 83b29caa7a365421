// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Wallet management API endpoints.
//!
//! Minimal custodial wallet surface: create, list, get. Wallets anchor
//! ownership for fiat requests; the private key never leaves the enclave.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::{
    audit_log,
    auth::Auth,
    chain::generate_secp256k1_keypair,
    error::ApiError,
    state::AppState,
    storage::{
        AuditEvent, AuditEventType, AuditRepository, WalletMetadata, WalletRepository,
        WalletResponse, WalletStatus,
    },
};

/// Request to create a new wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWalletRequest {
    /// Optional human-readable label for the wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
}

/// Response after creating a wallet.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CreateWalletResponse {
    /// The created wallet details.
    pub wallet: WalletResponse,
    /// Message indicating success.
    pub message: String,
}

/// Response containing a list of wallets.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct WalletListResponse {
    /// List of wallets owned by the user.
    pub wallets: Vec<WalletResponse>,
    /// Total count of wallets.
    pub total: usize,
}

/// Create a new wallet for the authenticated user.
///
/// Generates a new secp256k1 keypair inside the enclave and stores it
/// encrypted on disk. Returns the wallet metadata (never the private key).
#[utoipa::path(
    post,
    path = "/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    request_body = CreateWalletRequest,
    responses(
        (status = 201, description = "Wallet created successfully", body = CreateWalletResponse),
        (status = 401, description = "Unauthorized"),
        (status = 500, description = "Internal server error")
    )
)]
pub async fn create_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Json(request): Json<CreateWalletRequest>,
) -> Result<(StatusCode, Json<CreateWalletResponse>), ApiError> {
    let storage = state.storage();

    let wallet_id = uuid::Uuid::new_v4().to_string();

    let (private_key_pem, public_address) = generate_secp256k1_keypair()
        .map_err(|e| ApiError::internal(format!("Key generation failed: {e}")))?;

    let metadata = WalletMetadata {
        wallet_id: wallet_id.clone(),
        owner_user_id: user.user_id.clone(),
        public_address,
        created_at: Utc::now(),
        status: WalletStatus::Active,
        label: request.label,
    };

    let repo = WalletRepository::new(&storage);
    repo.create(&metadata, private_key_pem.as_bytes())
        .map_err(|e| ApiError::internal(format!("Failed to store wallet: {e}")))?;

    audit_log!(
        &storage,
        AuditEventType::WalletCreated,
        &user,
        "wallet",
        &wallet_id
    );

    let response = CreateWalletResponse {
        wallet: WalletResponse::from(metadata),
        message: "Wallet created successfully".to_string(),
    };

    Ok((StatusCode::CREATED, Json(response)))
}

/// List all wallets owned by the authenticated user.
#[utoipa::path(
    get,
    path = "/v1/wallets",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "List of wallets", body = WalletListResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_wallets(
    Auth(user): Auth,
    State(state): State<AppState>,
) -> Result<Json<WalletListResponse>, ApiError> {
    let storage = state.storage();
    let repo = WalletRepository::new(&storage);

    let wallets = repo
        .list_by_owner(&user.user_id)
        .map_err(|e| ApiError::internal(format!("Failed to list wallets: {e}")))?;

    let wallet_responses: Vec<WalletResponse> = wallets.into_iter().map(Into::into).collect();
    let total = wallet_responses.len();

    Ok(Json(WalletListResponse {
        wallets: wallet_responses,
        total,
    }))
}

/// Get a specific wallet by ID.
///
/// Accessible to the wallet owner or an admin.
#[utoipa::path(
    get,
    path = "/v1/wallets/{wallet_id}",
    tag = "Wallets",
    security(("bearer_auth" = [])),
    params(
        ("wallet_id" = String, Path, description = "Wallet ID")
    ),
    responses(
        (status = 200, description = "Wallet details", body = WalletResponse),
        (status = 401, description = "Unauthorized"),
        (status = 403, description = "Forbidden - not your wallet"),
        (status = 404, description = "Wallet not found")
    )
)]
pub async fn get_wallet(
    Auth(user): Auth,
    State(state): State<AppState>,
    Path(wallet_id): Path<String>,
) -> Result<Json<WalletResponse>, ApiError> {
    let storage = state.storage();
    let repo = WalletRepository::new(&storage);

    let metadata = repo
        .get(&wallet_id)
        .map_err(|_| ApiError::not_found(format!("Wallet {wallet_id} not found")))?;

    user.authorize_owner(&metadata.owner_user_id)
        .map_err(|_| ApiError::forbidden("You don't have permission to access this wallet"))?;

    let audit_repo = AuditRepository::new(&storage);
    let _ = audit_repo.log(
        &AuditEvent::new(AuditEventType::WalletAccessed)
            .with_user(&user.user_id)
            .with_resource("wallet", &wallet_id),
    );

    Ok(Json(WalletResponse::from(metadata)))
}
