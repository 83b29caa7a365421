// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! HTTP API router and OpenAPI document.

use axum::{
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    auth::Role,
    providers::ProviderDescriptor,
    state::AppState,
    storage::{FiatDirection, FiatRequestStatus, WalletResponse, WalletStatus},
};

pub mod admin;
pub mod fiat;
pub mod health;
pub mod users;
pub mod wallets;

pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/users/me", get(users::get_current_user))
        .route(
            "/wallets",
            get(wallets::list_wallets).post(wallets::create_wallet),
        )
        .route("/wallets/{wallet_id}", get(wallets::get_wallet))
        .route("/fiat/providers", get(fiat::list_fiat_providers))
        .route("/fiat/onramp/requests", post(fiat::create_onramp_request))
        .route("/fiat/offramp/requests", post(fiat::create_offramp_request))
        .route("/fiat/requests", get(fiat::list_fiat_requests))
        .route("/fiat/requests/{request_id}", get(fiat::get_fiat_request))
        .route(
            "/fiat/providers/{provider_id}/webhook",
            post(fiat::provider_webhook),
        )
        .route("/admin/fiat/service-wallet", get(admin::get_service_wallet))
        .route(
            "/admin/fiat/service-wallet/bootstrap",
            post(admin::bootstrap_service_wallet),
        )
        .route("/admin/fiat/reserve/topup", post(admin::reserve_topup))
        .route("/admin/fiat/reserve/transfer", post(admin::reserve_transfer))
        .route(
            "/admin/fiat/requests/{request_id}/sync",
            post(admin::sync_fiat_request),
        );

    Router::new()
        .route("/health", get(health::health))
        .route("/health/live", get(health::liveness))
        .route("/health/ready", get(health::readiness))
        .nest("/v1", v1_routes)
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        health::liveness,
        health::readiness,
        users::get_current_user,
        wallets::create_wallet,
        wallets::list_wallets,
        wallets::get_wallet,
        fiat::list_fiat_providers,
        fiat::create_onramp_request,
        fiat::create_offramp_request,
        fiat::list_fiat_requests,
        fiat::get_fiat_request,
        fiat::provider_webhook,
        admin::get_service_wallet,
        admin::bootstrap_service_wallet,
        admin::reserve_topup,
        admin::reserve_transfer,
        admin::sync_fiat_request
    ),
    components(
        schemas(
            health::ReadyResponse,
            health::HealthChecks,
            health::HealthResponse,
            users::UserMeResponse,
            Role,
            wallets::CreateWalletRequest,
            wallets::CreateWalletResponse,
            wallets::WalletListResponse,
            WalletResponse,
            WalletStatus,
            fiat::CreateOnRampBody,
            fiat::CreateOffRampBody,
            fiat::FiatRequestResponse,
            fiat::FiatRequestListResponse,
            fiat::FiatProviderListResponse,
            fiat::WebhookAck,
            ProviderDescriptor,
            FiatDirection,
            FiatRequestStatus,
            admin::ServiceWalletResponse,
            admin::ReserveTopupBody,
            admin::ReserveTransferBody,
            admin::ReserveTxResponse
        )
    ),
    tags(
        (name = "Health", description = "Service health probes"),
        (name = "Users", description = "Authenticated user identity"),
        (name = "Wallets", description = "Custodial wallet management"),
        (name = "Fiat", description = "Fiat on-ramp and off-ramp settlement"),
        (name = "Admin", description = "Reserve wallet operations and manual syncs")
    )
)]
struct ApiDoc;
