// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat settlement: reserve wallet management and the reconciliation engine.
//!
//! The engine drives each fiat request through its state machine, reacting
//! to provider webhooks, background polls, and admin-triggered syncs. All
//! three are thin entry points into the same transition evaluation.

use crate::storage::{StorageResult, StoredFiatRequest};

pub mod engine;
pub mod reserve;

pub use engine::{EngineConfig, EngineError, NewOffRamp, NewOnRamp, ReconciliationEngine};
pub use reserve::ReserveWalletManager;

/// Durable, ownership-tagged persistence for fiat requests.
///
/// `update` is compare-and-swap on the record's revision counter; losing a
/// race returns `StorageError::Conflict` and the caller re-reads and
/// retries.
pub trait FiatRequestStore: Send + Sync {
    fn get(&self, request_id: &str) -> StorageResult<StoredFiatRequest>;

    fn create(&self, request: &StoredFiatRequest) -> StorageResult<()>;

    fn update(
        &self,
        request: &StoredFiatRequest,
        expected_revision: u64,
    ) -> StorageResult<StoredFiatRequest>;

    fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> StorageResult<Option<StoredFiatRequest>>;

    fn list_by_owner(&self, owner_user_id: &str) -> StorageResult<Vec<StoredFiatRequest>>;

    fn list_by_wallet_for_owner(
        &self,
        owner_user_id: &str,
        wallet_id: &str,
    ) -> StorageResult<Vec<StoredFiatRequest>>;

    /// IDs of all non-terminal requests (poller work list).
    fn list_pending_ids(&self) -> StorageResult<Vec<String>>;
}
