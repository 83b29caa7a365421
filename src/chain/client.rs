// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! EVM settlement client for reserve transfers and deposit detection.

use std::future::Future;
use std::pin::Pin;
use std::str::FromStr;
use std::sync::Arc;

use alloy::{
    eips::BlockNumberOrTag,
    primitives::{Address, B256, U256},
    providers::{
        fillers::{BlobGasFiller, ChainIdFiller, FillProvider, GasFiller, JoinFill, NonceFiller},
        Identity, Provider, ProviderBuilder, RootProvider,
    },
    rpc::types::Filter,
    sol_types::SolEvent,
};

use crate::storage::{EncryptedStorage, ReserveWalletRepository};

use super::erc20::IERC20;
use super::signing::wallet_from_pem;
use super::types::{ChainError, NetworkConfig};

/// Boxed future type for settlement client methods, keeping the trait
/// object-safe without an async-trait dependency.
pub type ChainFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, ChainError>> + Send + 'a>>;

/// A detected settlement-token deposit.
#[derive(Debug, Clone)]
pub struct DepositEvent {
    /// Transaction hash of the transfer.
    pub tx_hash: String,
    /// Block the transfer landed in.
    pub block_number: u64,
    /// Confirmations at observation time.
    pub confirmations: u64,
}

/// On-chain operations the reconciliation engine needs.
///
/// Amounts are settlement token units (6 decimals).
pub trait ChainSettlementClient: Send + Sync {
    /// Settlement token balance of an address.
    fn balance_of<'a>(&'a self, address: &str) -> ChainFuture<'a, u128>;

    /// Transfer tokens out of the reserve wallet. Waits for the receipt and
    /// returns the tx hash only if the transaction succeeded on chain.
    fn transfer<'a>(&'a self, to: &str, amount: u128) -> ChainFuture<'a, String>;

    /// Mint tokens to an address (reserve top-up on the sandbox token).
    /// Waits for the receipt like [`Self::transfer`].
    fn mint<'a>(&'a self, to: &str, amount: u128) -> ChainFuture<'a, String>;

    /// Confirmations for a transaction, `None` while unmined.
    ///
    /// A mined-but-reverted transaction is an error, not a confirmation
    /// count.
    fn confirmations_of<'a>(&'a self, tx_hash: &str) -> ChainFuture<'a, Option<u64>>;

    /// Find the earliest settlement-token transfer of exactly `amount`
    /// from `from` to `to`.
    fn find_deposit<'a>(
        &'a self,
        from: &str,
        to: &str,
        amount: u128,
    ) -> ChainFuture<'a, Option<DepositEvent>>;
}

/// HTTP provider type (with all fillers).
type HttpProvider = FillProvider<
    JoinFill<
        Identity,
        JoinFill<GasFiller, JoinFill<BlobGasFiller, JoinFill<NonceFiller, ChainIdFiller>>>,
    >,
    RootProvider<alloy::network::Ethereum>,
>;

/// Settlement client backed by an EVM JSON-RPC endpoint.
///
/// The reserve private key is read from encrypted storage for every signing
/// call, so key rotation via re-bootstrap needs no process restart.
pub struct EvmSettlementClient {
    network: NetworkConfig,
    rpc_url: url::Url,
    token_address: Address,
    provider: HttpProvider,
    storage: Arc<EncryptedStorage>,
}

impl EvmSettlementClient {
    /// Create a new client.
    pub fn new(
        network: NetworkConfig,
        rpc_url: &str,
        token_address: &str,
        storage: Arc<EncryptedStorage>,
    ) -> Result<Self, ChainError> {
        let rpc_url: url::Url = rpc_url
            .parse()
            .map_err(|e: url::ParseError| ChainError::InvalidRpcUrl(e.to_string()))?;
        let token_address = parse_address(token_address)?;
        let provider = ProviderBuilder::new().connect_http(rpc_url.clone());

        Ok(Self {
            network,
            rpc_url,
            token_address,
            provider,
            storage,
        })
    }

    /// Get the network configuration.
    pub fn network(&self) -> &NetworkConfig {
        &self.network
    }

    /// Explorer URL for a transaction hash.
    pub fn explorer_tx_url(&self, tx_hash: &str) -> String {
        format!("{}/tx/{}", self.network.explorer_url, tx_hash)
    }

    async fn token_balance(&self, address: Address) -> Result<u128, ChainError> {
        let contract = IERC20::new(self.token_address, &self.provider);
        let balance: U256 = contract
            .balanceOf(address)
            .call()
            .await
            .map_err(|e| ChainError::Unavailable(e.to_string()))?;
        u128::try_from(balance).map_err(|_| {
            ChainError::Unavailable("token balance exceeds u128 range".to_string())
        })
    }

    /// Build a signing provider from the stored reserve key.
    fn reserve_signing_provider(&self) -> Result<impl Provider + Clone, ChainError> {
        let repo = ReserveWalletRepository::new(&self.storage);
        let pem = repo
            .read_private_key()
            .map_err(|e| ChainError::InvalidPrivateKey(e.to_string()))?;
        let wallet = wallet_from_pem(&pem)?;
        let provider = ProviderBuilder::new()
            .wallet(wallet)
            .connect_http(self.rpc_url.clone());
        Ok(provider)
    }
}

impl ChainSettlementClient for EvmSettlementClient {
    fn balance_of<'a>(&'a self, address: &str) -> ChainFuture<'a, u128> {
        let address = address.to_string();
        Box::pin(async move {
            let addr = parse_address(&address)?;
            self.token_balance(addr).await
        })
    }

    fn transfer<'a>(&'a self, to: &str, amount: u128) -> ChainFuture<'a, String> {
        let to = to.to_string();
        Box::pin(async move {
            let to_addr = parse_address(&to)?;
            let provider = self.reserve_signing_provider()?;

            let contract = IERC20::new(self.token_address, provider);
            let receipt = contract
                .transfer(to_addr, U256::from(amount))
                .send()
                .await
                .map_err(|e| ChainError::TxFailed(e.to_string()))?
                .get_receipt()
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            settled_hash(receipt.status(), receipt.transaction_hash)
        })
    }

    fn mint<'a>(&'a self, to: &str, amount: u128) -> ChainFuture<'a, String> {
        let to = to.to_string();
        Box::pin(async move {
            let to_addr = parse_address(&to)?;
            let provider = self.reserve_signing_provider()?;

            let contract = IERC20::new(self.token_address, provider);
            let receipt = contract
                .mint(to_addr, U256::from(amount))
                .send()
                .await
                .map_err(|e| ChainError::TxFailed(e.to_string()))?
                .get_receipt()
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            settled_hash(receipt.status(), receipt.transaction_hash)
        })
    }

    fn confirmations_of<'a>(&'a self, tx_hash: &str) -> ChainFuture<'a, Option<u64>> {
        let tx_hash = tx_hash.to_string();
        Box::pin(async move {
            let hash: B256 = tx_hash
                .parse()
                .map_err(|_| ChainError::InvalidAddress(format!("Invalid tx hash: {tx_hash}")))?;

            let receipt = self
                .provider
                .get_transaction_receipt(hash)
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            let Some(receipt) = receipt else {
                return Ok(None);
            };
            if !receipt.status() {
                return Err(ChainError::TxFailed(format!("Transaction {tx_hash} reverted")));
            }
            let Some(block) = receipt.block_number else {
                return Ok(None);
            };

            let head = self
                .provider
                .get_block_number()
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            Ok(Some(head.saturating_sub(block) + 1))
        })
    }

    fn find_deposit<'a>(
        &'a self,
        from: &str,
        to: &str,
        amount: u128,
    ) -> ChainFuture<'a, Option<DepositEvent>> {
        let from = from.to_string();
        let to = to.to_string();
        Box::pin(async move {
            let from_addr = parse_address(&from)?;
            let to_addr = parse_address(&to)?;

            let filter = Filter::new()
                .address(self.token_address)
                .event_signature(IERC20::Transfer::SIGNATURE_HASH)
                .topic1(B256::from(from_addr.into_word()))
                .topic2(B256::from(to_addr.into_word()))
                .from_block(BlockNumberOrTag::Earliest);

            let logs = self
                .provider
                .get_logs(&filter)
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            let expected = U256::from(amount);
            let mut earliest: Option<(u64, B256)> = None;
            for log in logs {
                let Ok(decoded) = log.log_decode::<IERC20::Transfer>() else {
                    continue;
                };
                if decoded.inner.data.value != expected {
                    continue;
                }
                let (Some(block), Some(tx_hash)) = (log.block_number, log.transaction_hash)
                else {
                    continue;
                };
                match earliest {
                    Some((best, _)) if best <= block => {}
                    _ => earliest = Some((block, tx_hash)),
                }
            }

            let Some((block_number, tx_hash)) = earliest else {
                return Ok(None);
            };

            let head = self
                .provider
                .get_block_number()
                .await
                .map_err(|e| ChainError::Unavailable(e.to_string()))?;

            Ok(Some(DepositEvent {
                tx_hash: format!("{tx_hash:?}"),
                block_number,
                confirmations: head.saturating_sub(block_number) + 1,
            }))
        })
    }
}

fn parse_address(address: &str) -> Result<Address, ChainError> {
    Address::from_str(address).map_err(|e| ChainError::InvalidAddress(e.to_string()))
}

/// Map a mined receipt to the settlement reference. A reverted transaction
/// must never surface as a success to the reconciliation engine.
fn settled_hash(status: bool, tx_hash: B256) -> Result<String, ChainError> {
    if status {
        Ok(format!("{tx_hash:?}"))
    } else {
        Err(ChainError::TxFailed(format!(
            "Transaction {tx_hash:?} reverted"
        )))
    }
}
