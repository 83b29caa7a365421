// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Fiat on-ramp/off-ramp request repository for encrypted storage.
//!
//! A fiat request is a settlement record reconciling three parties: the user,
//! the fiat provider, and the on-chain reserve wallet. The status field walks
//! a monotonic state machine:
//!
//! ```text
//! queued -> awaiting_provider     -> settlement_pending -> completed   (on-ramp)
//! queued -> awaiting_user_deposit -> settlement_pending -> provider_pending -> completed   (off-ramp)
//! failed from any non-terminal state
//! ```
//!
//! Updates are compare-and-swap on a per-record `revision` counter, so a
//! webhook, the background poller, and an admin sync racing on the same
//! record cannot silently overwrite each other.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use utoipa::ToSchema;

use super::super::{EncryptedStorage, StorageError, StorageResult};

/// Fiat request direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FiatDirection {
    /// Fiat to token request (bank payment -> reserve transfer to user wallet).
    OnRamp,
    /// Token to fiat request (user deposit to reserve -> bank payout).
    OffRamp,
}

/// Fiat request lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum FiatRequestStatus {
    /// Request accepted and queued for provider processing.
    Queued,
    /// On-ramp: provider payment session created, waiting for user
    /// authorization.
    AwaitingProvider,
    /// Off-ramp: waiting for the user's token deposit to the reserve wallet.
    AwaitingUserDeposit,
    /// Funds confirmed on the inbound side; outbound settlement not yet done.
    SettlementPending,
    /// Off-ramp: payout handed to the provider, waiting for completion.
    ProviderPending,
    /// Request settled successfully.
    Completed,
    /// Request failed.
    Failed,
}

impl FiatRequestStatus {
    /// Monotonic rank. Valid transitions never decrease it.
    pub fn rank(&self) -> u8 {
        match self {
            FiatRequestStatus::Queued => 0,
            FiatRequestStatus::AwaitingProvider | FiatRequestStatus::AwaitingUserDeposit => 1,
            FiatRequestStatus::SettlementPending => 2,
            FiatRequestStatus::ProviderPending => 3,
            FiatRequestStatus::Completed | FiatRequestStatus::Failed => 4,
        }
    }

    /// Terminal states admit no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, FiatRequestStatus::Completed | FiatRequestStatus::Failed)
    }
}

/// Persisted fiat request record.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct StoredFiatRequest {
    /// Unique request identifier.
    pub request_id: String,
    /// Wallet tied to this request.
    pub wallet_id: String,
    /// Settlement address of the wallet, snapshotted at creation so the
    /// reconciliation engine never needs a wallet lookup.
    pub wallet_address: String,
    /// Owner user ID.
    pub owner_user_id: String,
    /// On-ramp vs off-ramp direction.
    pub direction: FiatDirection,
    /// Requested fiat amount in EUR (normalized decimal string, e.g. "25.50").
    pub amount_eur: String,
    /// Requested amount in minor units (euro cents).
    pub amount_minor: u64,
    /// Selected provider identifier (e.g. `truelayer_sandbox`).
    pub provider: String,
    /// Optional user note.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Provider reference/session ID, set once the provider session exists.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_reference: Option<String>,
    /// URL where the user continues provider authorization (on-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider_action_url: Option<String>,
    /// Reserve wallet address the user must deposit to (off-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_wallet_address: Option<String>,
    /// Detected deposit transaction hash (off-ramp), set only once the
    /// confirmation threshold is met.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deposit_tx_hash: Option<String>,
    /// Reserve transfer transaction hash. For on-ramps this is the
    /// settlement payout to the user wallet.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reserve_transfer_tx_hash: Option<String>,
    /// Payout beneficiary name (off-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary_name: Option<String>,
    /// Payout beneficiary account, IBAN (off-ramp).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub beneficiary_account: Option<String>,
    /// Why the request failed, if it did.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Current status.
    pub status: FiatRequestStatus,
    /// Compare-and-swap revision counter, bumped on every persisted update.
    #[serde(default)]
    pub revision: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl StoredFiatRequest {
    /// Construct a new queued on-ramp request.
    #[allow(clippy::too_many_arguments)]
    pub fn new_onramp(
        request_id: String,
        wallet_id: String,
        wallet_address: String,
        owner_user_id: String,
        amount_eur: String,
        amount_minor: u64,
        provider: String,
        note: Option<String>,
    ) -> Self {
        Self::new(
            request_id,
            wallet_id,
            wallet_address,
            owner_user_id,
            FiatDirection::OnRamp,
            amount_eur,
            amount_minor,
            provider,
            note,
        )
    }

    /// Construct a new off-ramp request waiting for the user's deposit.
    #[allow(clippy::too_many_arguments)]
    pub fn new_offramp(
        request_id: String,
        wallet_id: String,
        wallet_address: String,
        owner_user_id: String,
        amount_eur: String,
        amount_minor: u64,
        provider: String,
        note: Option<String>,
        service_wallet_address: String,
        beneficiary_name: String,
        beneficiary_account: String,
    ) -> Self {
        let mut record = Self::new(
            request_id,
            wallet_id,
            wallet_address,
            owner_user_id,
            FiatDirection::OffRamp,
            amount_eur,
            amount_minor,
            provider,
            note,
        );
        record.status = FiatRequestStatus::AwaitingUserDeposit;
        record.service_wallet_address = Some(service_wallet_address);
        record.beneficiary_name = Some(beneficiary_name);
        record.beneficiary_account = Some(beneficiary_account);
        record
    }

    #[allow(clippy::too_many_arguments)]
    fn new(
        request_id: String,
        wallet_id: String,
        wallet_address: String,
        owner_user_id: String,
        direction: FiatDirection,
        amount_eur: String,
        amount_minor: u64,
        provider: String,
        note: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            request_id,
            wallet_id,
            wallet_address,
            owner_user_id,
            direction,
            amount_eur,
            amount_minor,
            provider,
            note,
            provider_reference: None,
            provider_action_url: None,
            service_wallet_address: None,
            deposit_tx_hash: None,
            reserve_transfer_tx_hash: None,
            beneficiary_name: None,
            beneficiary_account: None,
            failure_reason: None,
            status: FiatRequestStatus::Queued,
            revision: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Advance to `next` if that does not regress the status rank.
    ///
    /// Returns whether the status actually changed. Rank regressions are
    /// refused, which makes duplicate or late triggers harmless.
    pub fn advance(&mut self, next: FiatRequestStatus) -> bool {
        if self.status.is_terminal() || next.rank() <= self.status.rank() {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Move to `Failed` with a reason. Allowed from any non-terminal state.
    pub fn fail(&mut self, reason: impl Into<String>) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.status = FiatRequestStatus::Failed;
        self.failure_reason = Some(reason.into());
        self.updated_at = Utc::now();
        true
    }
}

/// Repository for fiat request storage.
pub struct FiatRequestRepository<'a> {
    storage: &'a EncryptedStorage,
}

impl<'a> FiatRequestRepository<'a> {
    /// Create repository.
    pub fn new(storage: &'a EncryptedStorage) -> Self {
        Self { storage }
    }

    /// Check if request exists.
    pub fn exists(&self, request_id: &str) -> bool {
        self.storage
            .exists(self.storage.paths().fiat_request(request_id))
    }

    /// Get request by ID.
    pub fn get(&self, request_id: &str) -> StorageResult<StoredFiatRequest> {
        let path = self.storage.paths().fiat_request(request_id);
        if !self.storage.exists(&path) {
            return Err(StorageError::NotFound(format!("Fiat request {request_id}")));
        }
        self.storage.read_json(path)
    }

    /// Persist new request.
    pub fn create(&self, request: &StoredFiatRequest) -> StorageResult<()> {
        if self.exists(&request.request_id) {
            return Err(StorageError::AlreadyExists(format!(
                "Fiat request {}",
                request.request_id
            )));
        }
        self.storage.write_json(
            self.storage.paths().fiat_request(&request.request_id),
            request,
        )
    }

    /// Compare-and-swap update.
    ///
    /// Persists `request` only if the stored revision still equals
    /// `expected_revision`, bumping the revision on success. Returns the
    /// persisted record.
    pub fn update(
        &self,
        request: &StoredFiatRequest,
        expected_revision: u64,
    ) -> StorageResult<StoredFiatRequest> {
        let current = self.get(&request.request_id)?;
        if current.revision != expected_revision {
            return Err(StorageError::Conflict(format!(
                "Fiat request {}",
                request.request_id
            )));
        }

        let mut next = request.clone();
        next.revision = expected_revision + 1;
        self.storage.write_json(
            self.storage.paths().fiat_request(&next.request_id),
            &next,
        )?;
        Ok(next)
    }

    /// Find a request by its provider reference (webhook resolution).
    pub fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> StorageResult<Option<StoredFiatRequest>> {
        let ids = self
            .storage
            .list_files(self.storage.paths().fiat_dir(), "json")?;

        for id in ids {
            if let Ok(record) = self.get(&id) {
                if record.provider_reference.as_deref() == Some(reference) {
                    return Ok(Some(record));
                }
            }
        }
        Ok(None)
    }

    /// List all requests for user, newest first.
    pub fn list_by_owner(&self, owner_user_id: &str) -> StorageResult<Vec<StoredFiatRequest>> {
        let ids = self
            .storage
            .list_files(self.storage.paths().fiat_dir(), "json")?;

        let mut requests = Vec::new();
        for id in ids {
            if let Ok(record) = self.get(&id) {
                if record.owner_user_id == owner_user_id {
                    requests.push(record);
                }
            }
        }

        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// List all requests for a given wallet owned by user.
    pub fn list_by_wallet_for_owner(
        &self,
        owner_user_id: &str,
        wallet_id: &str,
    ) -> StorageResult<Vec<StoredFiatRequest>> {
        let all = self.list_by_owner(owner_user_id)?;
        Ok(all
            .into_iter()
            .filter(|record| record.wallet_id == wallet_id)
            .collect())
    }

    /// List all requests, newest first (admin view).
    pub fn list_all(&self) -> StorageResult<Vec<StoredFiatRequest>> {
        let ids = self
            .storage
            .list_files(self.storage.paths().fiat_dir(), "json")?;

        let mut requests = Vec::new();
        for id in ids {
            if let Ok(record) = self.get(&id) {
                requests.push(record);
            }
        }

        requests.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(requests)
    }

    /// IDs of all non-terminal requests (poller work list).
    pub fn list_pending_ids(&self) -> StorageResult<Vec<String>> {
        let ids = self
            .storage
            .list_files(self.storage.paths().fiat_dir(), "json")?;

        let mut pending = Vec::new();
        for id in ids {
            if let Ok(record) = self.get(&id) {
                if !record.status.is_terminal() {
                    pending.push(record.request_id);
                }
            }
        }
        Ok(pending)
    }
}

/// Owned, thread-safe file store handed to the reconciliation engine.
#[derive(Clone)]
pub struct FileFiatRequestStore {
    storage: Arc<EncryptedStorage>,
}

impl FileFiatRequestStore {
    pub fn new(storage: Arc<EncryptedStorage>) -> Self {
        Self { storage }
    }
}

impl crate::fiat::FiatRequestStore for FileFiatRequestStore {
    fn get(&self, request_id: &str) -> StorageResult<StoredFiatRequest> {
        FiatRequestRepository::new(&self.storage).get(request_id)
    }

    fn create(&self, request: &StoredFiatRequest) -> StorageResult<()> {
        FiatRequestRepository::new(&self.storage).create(request)
    }

    fn update(
        &self,
        request: &StoredFiatRequest,
        expected_revision: u64,
    ) -> StorageResult<StoredFiatRequest> {
        FiatRequestRepository::new(&self.storage).update(request, expected_revision)
    }

    fn find_by_provider_reference(
        &self,
        reference: &str,
    ) -> StorageResult<Option<StoredFiatRequest>> {
        FiatRequestRepository::new(&self.storage).find_by_provider_reference(reference)
    }

    fn list_by_owner(&self, owner_user_id: &str) -> StorageResult<Vec<StoredFiatRequest>> {
        FiatRequestRepository::new(&self.storage).list_by_owner(owner_user_id)
    }

    fn list_by_wallet_for_owner(
        &self,
        owner_user_id: &str,
        wallet_id: &str,
    ) -> StorageResult<Vec<StoredFiatRequest>> {
        FiatRequestRepository::new(&self.storage).list_by_wallet_for_owner(owner_user_id, wallet_id)
    }

    fn list_pending_ids(&self) -> StorageResult<Vec<String>> {
        FiatRequestRepository::new(&self.storage).list_pending_ids()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{EncryptedStorage, StoragePaths};
    use std::env;
    use std::fs;

    fn test_storage() -> EncryptedStorage {
        let test_dir = env::temp_dir().join(format!("test-fiat-repo-{}", uuid::Uuid::new_v4()));
        let paths = StoragePaths::new(&test_dir);
        let mut storage = EncryptedStorage::new(paths);
        storage.initialize().expect("initialize test storage");
        storage
    }

    fn cleanup(storage: &EncryptedStorage) {
        let _ = fs::remove_dir_all(storage.paths().root());
    }

    fn sample_request(id: &str) -> StoredFiatRequest {
        StoredFiatRequest::new_onramp(
            id.to_string(),
            "wallet-1".to_string(),
            "0xabc0000000000000000000000000000000000001".to_string(),
            "user-1".to_string(),
            "25.50".to_string(),
            2550,
            "truelayer_sandbox".to_string(),
            Some("demo".to_string()),
        )
    }

    #[test]
    fn create_and_get_request() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);
        let req = sample_request("req-1");

        repo.create(&req).expect("create request");
        let loaded = repo.get("req-1").expect("get request");
        assert_eq!(loaded.request_id, "req-1");
        assert_eq!(loaded.provider, "truelayer_sandbox");
        assert_eq!(loaded.amount_minor, 2550);
        assert_eq!(loaded.revision, 0);

        cleanup(&storage);
    }

    #[test]
    fn update_bumps_revision() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);
        let mut req = sample_request("req-1");
        repo.create(&req).expect("create");

        req.advance(FiatRequestStatus::AwaitingProvider);
        let updated = repo.update(&req, 0).expect("update");
        assert_eq!(updated.revision, 1);
        assert_eq!(updated.status, FiatRequestStatus::AwaitingProvider);

        cleanup(&storage);
    }

    #[test]
    fn stale_revision_update_conflicts() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);
        let mut req = sample_request("req-1");
        repo.create(&req).expect("create");

        req.advance(FiatRequestStatus::AwaitingProvider);
        repo.update(&req, 0).expect("first update");

        // Second writer still holds revision 0
        let result = repo.update(&req, 0);
        assert!(matches!(result, Err(StorageError::Conflict(_))));

        cleanup(&storage);
    }

    #[test]
    fn advance_refuses_rank_regression() {
        let mut req = sample_request("req-1");
        assert!(req.advance(FiatRequestStatus::SettlementPending));
        assert!(!req.advance(FiatRequestStatus::AwaitingProvider));
        assert_eq!(req.status, FiatRequestStatus::SettlementPending);

        assert!(req.advance(FiatRequestStatus::Completed));
        assert!(!req.advance(FiatRequestStatus::Completed));
        assert!(!req.fail("too late"));
        assert_eq!(req.status, FiatRequestStatus::Completed);
    }

    #[test]
    fn fail_allowed_from_any_non_terminal_state() {
        let mut req = sample_request("req-1");
        req.advance(FiatRequestStatus::AwaitingProvider);
        assert!(req.fail("provider rejected"));
        assert_eq!(req.status, FiatRequestStatus::Failed);
        assert_eq!(req.failure_reason.as_deref(), Some("provider rejected"));
    }

    #[test]
    fn find_by_provider_reference_matches() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);

        let mut req = sample_request("req-1");
        req.provider_reference = Some("pay-abc".to_string());
        repo.create(&req).expect("create");
        repo.create(&sample_request("req-2")).expect("create other");

        let found = repo.find_by_provider_reference("pay-abc").expect("find");
        assert_eq!(found.map(|r| r.request_id), Some("req-1".to_string()));

        let missing = repo.find_by_provider_reference("pay-zzz").expect("find");
        assert!(missing.is_none());

        cleanup(&storage);
    }

    #[test]
    fn list_by_owner_filters_records() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);

        let one = sample_request("req-1");
        let mut two = sample_request("req-2");
        two.owner_user_id = "user-2".to_string();

        repo.create(&one).expect("create first");
        repo.create(&two).expect("create second");

        let owned = repo.list_by_owner("user-1").expect("list");
        assert_eq!(owned.len(), 1);
        assert_eq!(owned[0].request_id, "req-1");

        cleanup(&storage);
    }

    #[test]
    fn list_pending_ids_skips_terminal() {
        let storage = test_storage();
        let repo = FiatRequestRepository::new(&storage);

        let open = sample_request("req-open");
        let mut done = sample_request("req-done");
        done.advance(FiatRequestStatus::SettlementPending);
        done.advance(FiatRequestStatus::Completed);

        repo.create(&open).expect("create open");
        repo.create(&done).expect("create done");

        let pending = repo.list_pending_ids().expect("pending");
        assert_eq!(pending, vec!["req-open".to_string()]);

        cleanup(&storage);
    }

    #[test]
    fn offramp_starts_awaiting_deposit() {
        let req = StoredFiatRequest::new_offramp(
            "req-off".to_string(),
            "wallet-1".to_string(),
            "0xabc0000000000000000000000000000000000001".to_string(),
            "user-1".to_string(),
            "10.00".to_string(),
            1000,
            "truelayer_sandbox".to_string(),
            None,
            "0xfeed000000000000000000000000000000000001".to_string(),
            "Ada Lovelace".to_string(),
            "GB33BUKB20201555555555".to_string(),
        );

        assert_eq!(req.status, FiatRequestStatus::AwaitingUserDeposit);
        assert!(req.service_wallet_address.is_some());
        assert_eq!(req.beneficiary_name.as_deref(), Some("Ada Lovelace"));
    }
}
