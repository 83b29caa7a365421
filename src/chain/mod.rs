// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Chain integration module for settlement on Avalanche C-Chain.
//!
//! This module provides functionality for:
//! - Querying settlement token balances
//! - Reserve-signed token transfers and mints
//! - Deposit detection via Transfer logs

pub mod client;
pub mod erc20;
pub mod signing;
pub mod types;

pub use client::{ChainFuture, ChainSettlementClient, DepositEvent, EvmSettlementClient};
pub use signing::generate_secp256k1_keypair;
pub use types::*;
