// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reserve wallet lifecycle and settlement-token movements.

use std::sync::Arc;

use tracing::info;

use crate::chain::{ChainError, ChainSettlementClient};
use crate::storage::{EncryptedStorage, ReserveWalletMetadata, ReserveWalletRepository, StorageResult};

/// Owns the custodial reserve wallet: bootstrap, balance, top-up, transfer.
///
/// The balance is always re-read from the chain before a transfer decision;
/// it is never cached, so a racing settlement cannot act on stale numbers.
pub struct ReserveWalletManager {
    storage: Arc<EncryptedStorage>,
    chain: Arc<dyn ChainSettlementClient>,
}

impl ReserveWalletManager {
    pub fn new(storage: Arc<EncryptedStorage>, chain: Arc<dyn ChainSettlementClient>) -> Self {
        Self { storage, chain }
    }

    /// Provision the reserve keypair if missing. Idempotent.
    pub fn bootstrap(&self) -> StorageResult<ReserveWalletMetadata> {
        let metadata = ReserveWalletRepository::new(&self.storage).bootstrap()?;
        info!(address = %metadata.public_address, "Reserve wallet ready");
        Ok(metadata)
    }

    /// Stored reserve wallet metadata.
    pub fn metadata(&self) -> StorageResult<ReserveWalletMetadata> {
        ReserveWalletRepository::new(&self.storage).get()
    }

    /// Whether the reserve wallet has been bootstrapped.
    pub fn is_bootstrapped(&self) -> bool {
        ReserveWalletRepository::new(&self.storage).exists()
    }

    /// Reserve wallet public address.
    pub fn address(&self) -> StorageResult<String> {
        Ok(self.metadata()?.public_address)
    }

    /// Live settlement-token balance of the reserve wallet.
    pub async fn balance(&self) -> Result<u128, ChainError> {
        let address = self.require_address()?;
        self.chain.balance_of(&address).await
    }

    /// Mint settlement token to the reserve address. Returns the tx hash.
    pub async fn topup(&self, amount: u128) -> Result<String, ChainError> {
        let address = self.require_address()?;
        let tx_hash = self.chain.mint(&address, amount).await?;
        info!(amount, tx_hash = %tx_hash, "Reserve top-up submitted");
        Ok(tx_hash)
    }

    /// Transfer settlement token out of the reserve.
    ///
    /// Re-reads the live balance first and refuses to submit a transfer the
    /// reserve cannot cover.
    pub async fn transfer(&self, to: &str, amount: u128) -> Result<String, ChainError> {
        let address = self.require_address()?;

        let available = self.chain.balance_of(&address).await?;
        if available < amount {
            return Err(ChainError::InsufficientReserve {
                available,
                required: amount,
            });
        }

        let tx_hash = self.chain.transfer(to, amount).await?;
        info!(to = %to, amount, tx_hash = %tx_hash, "Reserve transfer submitted");
        Ok(tx_hash)
    }

    fn require_address(&self) -> Result<String, ChainError> {
        self.address()
            .map_err(|_| ChainError::Unavailable("reserve wallet is not bootstrapped".to_string()))
    }
}
