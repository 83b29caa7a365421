// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Repository layer providing typed access to encrypted storage.
//!
//! Each repository provides CRUD operations for a specific entity type,
//! using the EncryptedStorage for all file operations.

pub mod fiat;
pub mod service_wallet;
pub mod wallets;

pub use fiat::{
    FiatDirection, FiatRequestRepository, FiatRequestStatus, FileFiatRequestStore,
    StoredFiatRequest,
};
pub use service_wallet::{ReserveWalletMetadata, ReserveWalletRepository};
pub use wallets::{WalletMetadata, WalletRepository, WalletResponse, WalletStatus};
