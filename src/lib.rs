// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! StableBridge - Custodial EUR/Stablecoin Bridge Service
//!
//! This crate provides a TEE-backed custodial wallet service that bridges
//! fiat EUR to an on-chain settlement token, using Intel SGX for key
//! management and Avalanche as the settlement layer.
//!
//! ## Modules
//!
//! - `api` - HTTP API handlers (Axum)
//! - `auth` - Authentication and authorization (Clerk JWT)
//! - `chain` - EVM settlement client (Avalanche C-Chain)
//! - `fiat` - Reserve wallet and the settlement reconciliation engine
//! - `providers` - Fiat provider integrations (TrueLayer sandbox)
//! - `storage` - Encrypted storage (Gramine sealed FS)

pub mod api;
pub mod auth;
pub mod chain;
pub mod config;
pub mod error;
pub mod fiat;
pub mod fiat_poller;
pub mod providers;
pub mod state;
pub mod storage;
pub mod tls;
