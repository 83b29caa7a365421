// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Reconciliation engine: the fiat settlement state machine.
//!
//! Each fiat request walks
//! `queued → {awaiting_provider | awaiting_user_deposit} → settlement_pending
//! → provider_pending → completed`, with `failed` reachable from any
//! non-terminal state. Webhooks, the background poller, and admin sync all
//! call [`ReconciliationEngine::sync_request`], which re-evaluates the
//! record and advances it as far as current facts allow.
//!
//! Transition rules:
//! - Side effects (provider session, payout, reserve transfer) are guarded
//!   by the presence of the field they produce, not just the status label,
//!   so a re-run after a crash or a raced write never repeats them.
//! - Transient provider/chain errors leave the record untouched; the next
//!   trigger retries. Only explicit rejection, a failed transaction, or
//!   exceeding the pending horizon moves a request to `failed`.
//! - Writes are compare-and-swap on the record revision. A lost race is
//!   retried with a fresh read, bounded, then surfaces as a 409.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use crate::chain::{minor_to_token_units, ChainError, ChainSettlementClient};
use crate::providers::{
    OffRampOrder, OnRampOrder, ProviderClient, ProviderError, ProviderStatus,
};
use crate::storage::{FiatRequestStatus, StorageError, StoredFiatRequest};

use super::{FiatRequestStore, ReserveWalletManager};

/// Default minimum confirmations before an off-ramp deposit is final.
pub const DEFAULT_MIN_CONFIRMATIONS: u64 = 3;

/// Default maximum pending horizon in hours.
pub const DEFAULT_MAX_PENDING_HOURS: i64 = 24;

const MAX_CAS_RETRIES: u32 = 3;
const MAX_STEPS_PER_SYNC: u32 = 8;

/// Engine tuning knobs.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Confirmations required before an off-ramp deposit advances the
    /// request.
    pub min_confirmations: u64,
    /// Requests stuck in `queued`, `awaiting_provider` or `provider_pending`
    /// longer than this fail. `awaiting_user_deposit` never times out.
    pub max_pending_hours: i64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            min_confirmations: DEFAULT_MIN_CONFIRMATIONS,
            max_pending_hours: DEFAULT_MAX_PENDING_HOURS,
        }
    }
}

/// Errors surfaced by engine entry points.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("Fiat request not found: {0}")]
    NotFound(String),

    /// Lost the compare-and-swap race more times than the retry budget
    /// allows. The caller may simply retry.
    #[error("Reconciliation conflict on request {0}")]
    Conflict(String),

    #[error("Reserve wallet is not bootstrapped")]
    ReserveUnavailable,

    #[error(transparent)]
    Store(StorageError),
}

impl From<StorageError> for EngineError {
    fn from(e: StorageError) -> Self {
        match e {
            StorageError::NotFound(entity) => EngineError::NotFound(entity),
            other => EngineError::Store(other),
        }
    }
}

/// Parameters for a new on-ramp request.
#[derive(Debug, Clone)]
pub struct NewOnRamp {
    pub wallet_id: String,
    pub wallet_address: String,
    pub owner_user_id: String,
    pub amount_eur: String,
    pub amount_minor: u64,
    pub note: Option<String>,
}

/// Parameters for a new off-ramp request.
#[derive(Debug, Clone)]
pub struct NewOffRamp {
    pub wallet_id: String,
    pub wallet_address: String,
    pub owner_user_id: String,
    pub amount_eur: String,
    pub amount_minor: u64,
    pub beneficiary_name: String,
    pub beneficiary_account: String,
    pub note: Option<String>,
}

/// Outcome of one transition evaluation: whether the record changed, or a
/// transient obstacle that leaves it untouched.
enum StepOutcome {
    Changed,
    NoProgress,
    Transient(String),
}

/// The fiat settlement state machine.
pub struct ReconciliationEngine {
    store: Arc<dyn FiatRequestStore>,
    provider: Arc<dyn ProviderClient>,
    chain: Arc<dyn ChainSettlementClient>,
    reserve: Arc<ReserveWalletManager>,
    config: EngineConfig,
}

impl ReconciliationEngine {
    pub fn new(
        store: Arc<dyn FiatRequestStore>,
        provider: Arc<dyn ProviderClient>,
        chain: Arc<dyn ChainSettlementClient>,
        reserve: Arc<ReserveWalletManager>,
        config: EngineConfig,
    ) -> Self {
        Self {
            store,
            provider,
            chain,
            reserve,
            config,
        }
    }

    /// Create an on-ramp request and immediately attempt the first
    /// transition (provider session creation).
    pub async fn create_onramp(&self, params: NewOnRamp) -> Result<StoredFiatRequest, EngineError> {
        let record = StoredFiatRequest::new_onramp(
            Uuid::new_v4().to_string(),
            params.wallet_id,
            params.wallet_address,
            params.owner_user_id,
            params.amount_eur,
            params.amount_minor,
            self.provider.provider_id().to_string(),
            params.note,
        );
        self.store.create(&record)?;
        info!(request_id = %record.request_id, "On-ramp request created");

        self.sync_request(&record.request_id).await
    }

    /// Create an off-ramp request. The record starts in
    /// `awaiting_user_deposit` with the reserve address as deposit target,
    /// so it requires a bootstrapped reserve wallet.
    pub async fn create_offramp(
        &self,
        params: NewOffRamp,
    ) -> Result<StoredFiatRequest, EngineError> {
        let service_wallet_address = self
            .reserve
            .address()
            .map_err(|_| EngineError::ReserveUnavailable)?;

        let record = StoredFiatRequest::new_offramp(
            Uuid::new_v4().to_string(),
            params.wallet_id,
            params.wallet_address,
            params.owner_user_id,
            params.amount_eur,
            params.amount_minor,
            self.provider.provider_id().to_string(),
            params.note,
            service_wallet_address,
            params.beneficiary_name,
            params.beneficiary_account,
        );
        self.store.create(&record)?;
        info!(request_id = %record.request_id, "Off-ramp request created");
        Ok(record)
    }

    /// Resolve a webhook by provider reference and re-evaluate the request.
    ///
    /// The webhook payload itself is not trusted for state: the engine
    /// re-polls the provider inside the normal sync path.
    pub async fn handle_webhook(
        &self,
        provider_reference: &str,
    ) -> Result<StoredFiatRequest, EngineError> {
        let record = self
            .store
            .find_by_provider_reference(provider_reference)?
            .ok_or_else(|| EngineError::NotFound(format!("provider ref {provider_reference}")))?;
        self.sync_request(&record.request_id).await
    }

    /// IDs of all non-terminal requests (poller work list).
    pub fn pending_request_ids(&self) -> Result<Vec<String>, EngineError> {
        Ok(self.store.list_pending_ids()?)
    }

    /// Re-evaluate a request and advance it as far as current facts allow.
    ///
    /// Safe to call at any time, any number of times, from any trigger.
    /// Transient provider/chain failures stop the evaluation and leave the
    /// record unchanged for the next trigger.
    pub async fn sync_request(&self, request_id: &str) -> Result<StoredFiatRequest, EngineError> {
        let mut record = self.store.get(request_id)?;
        let mut conflicts = 0u32;
        let mut steps = 0u32;

        loop {
            if record.status.is_terminal() {
                return Ok(record);
            }
            steps += 1;
            if steps > MAX_STEPS_PER_SYNC {
                warn!(request_id, "Sync stopped after step budget");
                return Ok(record);
            }

            let expected_revision = record.revision;
            let mut next = record.clone();

            match self.step(&mut next).await {
                StepOutcome::NoProgress => return Ok(record),
                StepOutcome::Transient(reason) => {
                    warn!(
                        request_id,
                        status = ?record.status,
                        %reason,
                        "Transient error during sync; leaving state unchanged"
                    );
                    return Ok(record);
                }
                StepOutcome::Changed => match self.store.update(&next, expected_revision) {
                    Ok(persisted) => {
                        info!(
                            request_id,
                            from = ?record.status,
                            to = ?persisted.status,
                            "Fiat request advanced"
                        );
                        record = persisted;
                    }
                    Err(StorageError::Conflict(_)) => {
                        conflicts += 1;
                        if conflicts > MAX_CAS_RETRIES {
                            return Err(EngineError::Conflict(request_id.to_string()));
                        }
                        record = self.store.get(request_id)?;
                    }
                    Err(e) => return Err(e.into()),
                },
            }
        }
    }

    /// Evaluate one transition for `record`, mutating it in place.
    async fn step(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        use crate::storage::FiatDirection::{OffRamp, OnRamp};
        use FiatRequestStatus::*;

        // Terminal timeout applies to states waiting on the provider, never
        // to an unfunded off-ramp.
        if matches!(record.status, Queued | AwaitingProvider | ProviderPending)
            && self.horizon_expired(record)
        {
            record.fail("exceeded maximum pending horizon");
            return StepOutcome::Changed;
        }

        match (record.direction, record.status) {
            (OnRamp, Queued) => self.step_onramp_queued(record).await,
            (OnRamp, AwaitingProvider) => self.step_onramp_awaiting_provider(record).await,
            (OnRamp, SettlementPending) => self.step_onramp_settlement(record).await,
            (OffRamp, Queued) => {
                // Off-ramps are created in awaiting_user_deposit; a queued
                // off-ramp is a legacy record, move it along.
                if record.service_wallet_address.is_some() {
                    record.advance(AwaitingUserDeposit);
                    StepOutcome::Changed
                } else {
                    StepOutcome::Transient("off-ramp lacks a deposit address".to_string())
                }
            }
            (OffRamp, AwaitingUserDeposit) => self.step_offramp_deposit(record).await,
            (OffRamp, SettlementPending) => self.step_offramp_payout(record).await,
            (OffRamp, ProviderPending) => self.step_offramp_provider_pending(record).await,
            _ => StepOutcome::NoProgress,
        }
    }

    async fn step_onramp_queued(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        if record.provider_reference.is_some() {
            // Session already created by a write that raced ahead.
            record.advance(FiatRequestStatus::AwaitingProvider);
            return StepOutcome::Changed;
        }

        let order = OnRampOrder {
            request_id: record.request_id.clone(),
            wallet_id: record.wallet_id.clone(),
            user_id: record.owner_user_id.clone(),
            amount_minor: record.amount_minor,
            amount_eur: record.amount_eur.clone(),
            note: record.note.clone(),
        };

        match self.provider.create_session(&order).await {
            Ok(session) => {
                record.provider_reference = Some(session.provider_reference);
                record.provider_action_url = session.action_url;
                if session.status == ProviderStatus::Rejected {
                    record.fail("provider rejected the payment session");
                } else {
                    record.advance(FiatRequestStatus::AwaitingProvider);
                }
                StepOutcome::Changed
            }
            Err(ProviderError::Rejected(reason)) => {
                record.fail(reason);
                StepOutcome::Changed
            }
            Err(e) => StepOutcome::Transient(e.to_string()),
        }
    }

    async fn step_onramp_awaiting_provider(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        let Some(reference) = record.provider_reference.clone() else {
            return StepOutcome::Transient("missing provider reference".to_string());
        };

        match self
            .provider
            .query_status(record.direction, &reference)
            .await
        {
            Ok(details) => match details.status {
                ProviderStatus::Completed => {
                    record.advance(FiatRequestStatus::SettlementPending);
                    StepOutcome::Changed
                }
                ProviderStatus::Rejected => {
                    record.fail(
                        details
                            .failure_reason
                            .unwrap_or_else(|| format!("provider status: {}", details.raw_status)),
                    );
                    StepOutcome::Changed
                }
                ProviderStatus::Pending => StepOutcome::NoProgress,
            },
            Err(ProviderError::Rejected(reason)) => {
                record.fail(reason);
                StepOutcome::Changed
            }
            Err(e) => StepOutcome::Transient(e.to_string()),
        }
    }

    async fn step_onramp_settlement(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        if record.reserve_transfer_tx_hash.is_none() {
            let amount = minor_to_token_units(record.amount_minor);
            match self.reserve.transfer(&record.wallet_address, amount).await {
                Ok(tx_hash) => {
                    record.reserve_transfer_tx_hash = Some(tx_hash);
                }
                Err(ChainError::TxFailed(reason)) => {
                    record.fail(reason);
                    return StepOutcome::Changed;
                }
                Err(ChainError::InvalidAddress(reason)) => {
                    record.fail(format!("invalid settlement address: {reason}"));
                    return StepOutcome::Changed;
                }
                // Unavailable chain and an underfunded reserve both resolve
                // with time (or an admin top-up); keep waiting.
                Err(e) => return StepOutcome::Transient(e.to_string()),
            }
        }

        record.advance(FiatRequestStatus::Completed);
        StepOutcome::Changed
    }

    async fn step_offramp_deposit(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        if record.deposit_tx_hash.is_some() {
            record.advance(FiatRequestStatus::SettlementPending);
            return StepOutcome::Changed;
        }

        let Some(service_address) = record.service_wallet_address.clone() else {
            return StepOutcome::Transient("off-ramp lacks a deposit address".to_string());
        };

        let amount = minor_to_token_units(record.amount_minor);
        match self
            .chain
            .find_deposit(&record.wallet_address, &service_address, amount)
            .await
        {
            Ok(Some(deposit)) if deposit.confirmations >= self.config.min_confirmations => {
                record.deposit_tx_hash = Some(deposit.tx_hash);
                record.advance(FiatRequestStatus::SettlementPending);
                StepOutcome::Changed
            }
            // No deposit yet, or one that may still be reorganized away.
            Ok(_) => StepOutcome::NoProgress,
            Err(e) => StepOutcome::Transient(e.to_string()),
        }
    }

    async fn step_offramp_payout(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        if record.provider_reference.is_some() {
            record.advance(FiatRequestStatus::ProviderPending);
            return StepOutcome::Changed;
        }

        let order = OffRampOrder {
            request_id: record.request_id.clone(),
            wallet_id: record.wallet_id.clone(),
            user_id: record.owner_user_id.clone(),
            amount_minor: record.amount_minor,
            amount_eur: record.amount_eur.clone(),
            beneficiary_name: record.beneficiary_name.clone().unwrap_or_default(),
            beneficiary_account: record.beneficiary_account.clone().unwrap_or_default(),
            note: record.note.clone(),
        };

        match self.provider.initiate_payout(&order).await {
            Ok(session) => {
                record.provider_reference = Some(session.provider_reference);
                if session.status == ProviderStatus::Rejected {
                    record.fail("provider rejected the payout");
                } else {
                    record.advance(FiatRequestStatus::ProviderPending);
                }
                StepOutcome::Changed
            }
            Err(ProviderError::Rejected(reason)) => {
                record.fail(reason);
                StepOutcome::Changed
            }
            Err(e) => StepOutcome::Transient(e.to_string()),
        }
    }

    async fn step_offramp_provider_pending(&self, record: &mut StoredFiatRequest) -> StepOutcome {
        let Some(reference) = record.provider_reference.clone() else {
            return StepOutcome::Transient("missing provider reference".to_string());
        };

        match self
            .provider
            .query_status(record.direction, &reference)
            .await
        {
            Ok(details) => match details.status {
                ProviderStatus::Completed => {
                    record.advance(FiatRequestStatus::Completed);
                    StepOutcome::Changed
                }
                ProviderStatus::Rejected => {
                    record.fail(
                        details
                            .failure_reason
                            .unwrap_or_else(|| format!("provider status: {}", details.raw_status)),
                    );
                    StepOutcome::Changed
                }
                ProviderStatus::Pending => StepOutcome::NoProgress,
            },
            Err(ProviderError::Rejected(reason)) => {
                record.fail(reason);
                StepOutcome::Changed
            }
            Err(e) => StepOutcome::Transient(e.to_string()),
        }
    }

    fn horizon_expired(&self, record: &StoredFiatRequest) -> bool {
        Utc::now() - record.created_at > Duration::hours(self.config.max_pending_hours)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainFuture, DepositEvent};
    use crate::providers::{ProviderFuture, ProviderSession, ProviderStatusDetails};
    use crate::storage::{EncryptedStorage, FiatDirection, StoragePaths, StorageResult};
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    // ---------- scripted collaborators ----------

    #[derive(Clone, Copy)]
    enum StatusScript {
        Pending,
        Completed,
        Rejected,
        Transient,
    }

    struct MockProvider {
        session_ok: Mutex<bool>,
        status: Mutex<StatusScript>,
        create_calls: AtomicUsize,
        payout_calls: AtomicUsize,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                session_ok: Mutex::new(true),
                status: Mutex::new(StatusScript::Pending),
                create_calls: AtomicUsize::new(0),
                payout_calls: AtomicUsize::new(0),
            }
        }

        fn script_status(&self, script: StatusScript) {
            *self.status.lock().unwrap() = script;
        }
    }

    impl ProviderClient for MockProvider {
        fn provider_id(&self) -> &str {
            "mock_provider"
        }

        fn create_session<'a>(
            &'a self,
            order: &OnRampOrder,
        ) -> ProviderFuture<'a, ProviderSession> {
            self.create_calls.fetch_add(1, Ordering::SeqCst);
            let ok = *self.session_ok.lock().unwrap();
            let reference = format!("pay-{}", order.request_id);
            Box::pin(async move {
                if ok {
                    Ok(ProviderSession {
                        provider_reference: reference,
                        action_url: Some("https://pay.example/session".to_string()),
                        status: ProviderStatus::Pending,
                    })
                } else {
                    Err(ProviderError::Transient("provider down".to_string()))
                }
            })
        }

        fn initiate_payout<'a>(
            &'a self,
            order: &OffRampOrder,
        ) -> ProviderFuture<'a, ProviderSession> {
            self.payout_calls.fetch_add(1, Ordering::SeqCst);
            let reference = format!("payout-{}", order.request_id);
            Box::pin(async move {
                Ok(ProviderSession {
                    provider_reference: reference,
                    action_url: None,
                    status: ProviderStatus::Pending,
                })
            })
        }

        fn query_status<'a>(
            &'a self,
            _direction: FiatDirection,
            _reference: &str,
        ) -> ProviderFuture<'a, ProviderStatusDetails> {
            let script = *self.status.lock().unwrap();
            Box::pin(async move {
                match script {
                    StatusScript::Pending => Ok(ProviderStatusDetails {
                        status: ProviderStatus::Pending,
                        raw_status: "authorizing".to_string(),
                        failure_reason: None,
                    }),
                    StatusScript::Completed => Ok(ProviderStatusDetails {
                        status: ProviderStatus::Completed,
                        raw_status: "executed".to_string(),
                        failure_reason: None,
                    }),
                    StatusScript::Rejected => Ok(ProviderStatusDetails {
                        status: ProviderStatus::Rejected,
                        raw_status: "failed".to_string(),
                        failure_reason: Some("insufficient funds".to_string()),
                    }),
                    StatusScript::Transient => {
                        Err(ProviderError::Transient("timeout".to_string()))
                    }
                }
            })
        }
    }

    struct MockChain {
        balance: Mutex<u128>,
        deposit: Mutex<Option<DepositEvent>>,
        transfer_calls: AtomicUsize,
        fail_transfers: Mutex<bool>,
    }

    impl MockChain {
        fn new(balance: u128) -> Self {
            Self {
                balance: Mutex::new(balance),
                deposit: Mutex::new(None),
                transfer_calls: AtomicUsize::new(0),
                fail_transfers: Mutex::new(false),
            }
        }

        fn script_deposit(&self, deposit: Option<DepositEvent>) {
            *self.deposit.lock().unwrap() = deposit;
        }
    }

    impl ChainSettlementClient for MockChain {
        fn balance_of<'a>(&'a self, _address: &str) -> ChainFuture<'a, u128> {
            let balance = *self.balance.lock().unwrap();
            Box::pin(async move { Ok(balance) })
        }

        fn transfer<'a>(&'a self, _to: &str, _amount: u128) -> ChainFuture<'a, String> {
            let fail = *self.fail_transfers.lock().unwrap();
            let n = self.transfer_calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move {
                if fail {
                    Err(ChainError::TxFailed("reverted".to_string()))
                } else {
                    Ok(format!("0xsettle{n}"))
                }
            })
        }

        fn mint<'a>(&'a self, _to: &str, _amount: u128) -> ChainFuture<'a, String> {
            Box::pin(async move { Ok("0xmint".to_string()) })
        }

        fn confirmations_of<'a>(&'a self, _tx_hash: &str) -> ChainFuture<'a, Option<u64>> {
            Box::pin(async move { Ok(Some(10)) })
        }

        fn find_deposit<'a>(
            &'a self,
            _from: &str,
            _to: &str,
            _amount: u128,
        ) -> ChainFuture<'a, Option<DepositEvent>> {
            let deposit = self.deposit.lock().unwrap().clone();
            Box::pin(async move { Ok(deposit) })
        }
    }

    struct InMemoryStore {
        records: Mutex<HashMap<String, StoredFiatRequest>>,
        inject_conflicts: AtomicUsize,
    }

    impl InMemoryStore {
        fn new() -> Self {
            Self {
                records: Mutex::new(HashMap::new()),
                inject_conflicts: AtomicUsize::new(0),
            }
        }

        fn put(&self, record: StoredFiatRequest) {
            self.records
                .lock()
                .unwrap()
                .insert(record.request_id.clone(), record);
        }
    }

    impl FiatRequestStore for InMemoryStore {
        fn get(&self, request_id: &str) -> StorageResult<StoredFiatRequest> {
            self.records
                .lock()
                .unwrap()
                .get(request_id)
                .cloned()
                .ok_or_else(|| StorageError::NotFound(format!("Fiat request {request_id}")))
        }

        fn create(&self, request: &StoredFiatRequest) -> StorageResult<()> {
            let mut records = self.records.lock().unwrap();
            if records.contains_key(&request.request_id) {
                return Err(StorageError::AlreadyExists(request.request_id.clone()));
            }
            records.insert(request.request_id.clone(), request.clone());
            Ok(())
        }

        fn update(
            &self,
            request: &StoredFiatRequest,
            expected_revision: u64,
        ) -> StorageResult<StoredFiatRequest> {
            if self
                .inject_conflicts
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(StorageError::Conflict(request.request_id.clone()));
            }

            let mut records = self.records.lock().unwrap();
            let current = records
                .get(&request.request_id)
                .ok_or_else(|| StorageError::NotFound(request.request_id.clone()))?;
            if current.revision != expected_revision {
                return Err(StorageError::Conflict(request.request_id.clone()));
            }
            let mut next = request.clone();
            next.revision = expected_revision + 1;
            records.insert(next.request_id.clone(), next.clone());
            Ok(next)
        }

        fn find_by_provider_reference(
            &self,
            reference: &str,
        ) -> StorageResult<Option<StoredFiatRequest>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .find(|r| r.provider_reference.as_deref() == Some(reference))
                .cloned())
        }

        fn list_by_owner(&self, owner_user_id: &str) -> StorageResult<Vec<StoredFiatRequest>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.owner_user_id == owner_user_id)
                .cloned()
                .collect())
        }

        fn list_by_wallet_for_owner(
            &self,
            owner_user_id: &str,
            wallet_id: &str,
        ) -> StorageResult<Vec<StoredFiatRequest>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| r.owner_user_id == owner_user_id && r.wallet_id == wallet_id)
                .cloned()
                .collect())
        }

        fn list_pending_ids(&self) -> StorageResult<Vec<String>> {
            Ok(self
                .records
                .lock()
                .unwrap()
                .values()
                .filter(|r| !r.status.is_terminal())
                .map(|r| r.request_id.clone())
                .collect())
        }
    }

    struct Harness {
        _temp: TempDir,
        store: Arc<InMemoryStore>,
        provider: Arc<MockProvider>,
        chain: Arc<MockChain>,
        engine: ReconciliationEngine,
    }

    fn harness_with(balance: u128, bootstrap: bool) -> Harness {
        let temp = TempDir::new().unwrap();
        let paths = StoragePaths::new(temp.path());
        let mut storage = EncryptedStorage::new(paths);
        storage.initialize().unwrap();
        let storage = Arc::new(storage);

        let store = Arc::new(InMemoryStore::new());
        let provider = Arc::new(MockProvider::new());
        let chain = Arc::new(MockChain::new(balance));
        let reserve = Arc::new(ReserveWalletManager::new(storage, chain.clone()));
        if bootstrap {
            reserve.bootstrap().unwrap();
        }

        let engine = ReconciliationEngine::new(
            store.clone(),
            provider.clone(),
            chain.clone(),
            reserve,
            EngineConfig::default(),
        );

        Harness {
            _temp: temp,
            store,
            provider,
            chain,
            engine,
        }
    }

    fn harness() -> Harness {
        harness_with(1_000_000_000, true)
    }

    fn onramp_params() -> NewOnRamp {
        NewOnRamp {
            wallet_id: "wallet-1".to_string(),
            wallet_address: "0xabc0000000000000000000000000000000000001".to_string(),
            owner_user_id: "user-1".to_string(),
            amount_eur: "25.50".to_string(),
            amount_minor: 2550,
            note: None,
        }
    }

    fn offramp_params() -> NewOffRamp {
        NewOffRamp {
            wallet_id: "wallet-1".to_string(),
            wallet_address: "0xabc0000000000000000000000000000000000001".to_string(),
            owner_user_id: "user-1".to_string(),
            amount_eur: "10.00".to_string(),
            amount_minor: 1000,
            beneficiary_name: "Ada Lovelace".to_string(),
            beneficiary_account: "GB33BUKB20201555555555".to_string(),
            note: None,
        }
    }

    fn confirmed_deposit() -> DepositEvent {
        DepositEvent {
            tx_hash: "0xdeposit".to_string(),
            block_number: 100,
            confirmations: 5,
        }
    }

    // ---------- on-ramp ----------

    #[tokio::test]
    async fn onramp_happy_path_completes_with_settlement_ref() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        assert_eq!(created.status, FiatRequestStatus::AwaitingProvider);
        assert!(created.provider_reference.is_some());
        assert!(created.provider_action_url.is_some());

        // Provider settles the payment.
        h.provider.script_status(StatusScript::Completed);
        let synced = h.engine.sync_request(&created.request_id).await.unwrap();

        assert_eq!(synced.status, FiatRequestStatus::Completed);
        let tx = synced.reserve_transfer_tx_hash.as_deref().unwrap();
        assert!(!tx.is_empty());
        assert_eq!(h.chain.transfer_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn duplicate_sync_never_repeats_the_transfer() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Completed);
        let first = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(first.status, FiatRequestStatus::Completed);

        for _ in 0..3 {
            let again = h.engine.sync_request(&created.request_id).await.unwrap();
            assert_eq!(again.status, FiatRequestStatus::Completed);
            assert_eq!(
                again.reserve_transfer_tx_hash,
                first.reserve_transfer_tx_hash
            );
        }
        assert_eq!(h.chain.transfer_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.provider.create_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn transient_provider_error_leaves_state_untouched() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Transient);

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::AwaitingProvider);
        assert_eq!(synced.revision, created.revision);
    }

    #[tokio::test]
    async fn provider_rejection_fails_the_request() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Rejected);

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::Failed);
        assert_eq!(synced.failure_reason.as_deref(), Some("insufficient funds"));
        assert_eq!(h.chain.transfer_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn underfunded_reserve_is_transient_not_fatal() {
        let h = harness_with(0, true);

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Completed);

        // Reserve cannot cover the settlement; request waits.
        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::SettlementPending);
        assert!(synced.reserve_transfer_tx_hash.is_none());

        // Top-up happened; next trigger completes.
        *h.chain.balance.lock().unwrap() = 1_000_000_000;
        let done = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(done.status, FiatRequestStatus::Completed);
    }

    #[tokio::test]
    async fn failed_settlement_transaction_fails_the_request() {
        let h = harness();
        *h.chain.fail_transfers.lock().unwrap() = true;

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Completed);

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::Failed);
        assert_eq!(synced.failure_reason.as_deref(), Some("reverted"));
    }

    #[tokio::test]
    async fn stale_pending_request_times_out() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();

        // Backdate past the pending horizon.
        let mut stale = h.store.get(&created.request_id).unwrap();
        stale.created_at = Utc::now() - Duration::hours(25);
        h.store.put(stale);

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::Failed);
        assert_eq!(
            synced.failure_reason.as_deref(),
            Some("exceeded maximum pending horizon")
        );
    }

    // ---------- off-ramp ----------

    #[tokio::test]
    async fn offramp_starts_awaiting_deposit_with_reserve_address() {
        let h = harness();

        let created = h.engine.create_offramp(offramp_params()).await.unwrap();
        assert_eq!(created.status, FiatRequestStatus::AwaitingUserDeposit);
        assert!(created.service_wallet_address.is_some());
        assert!(created.provider_reference.is_none());
    }

    #[tokio::test]
    async fn offramp_without_bootstrapped_reserve_is_unavailable() {
        let h = harness_with(0, false);

        let result = h.engine.create_offramp(offramp_params()).await;
        assert!(matches!(result, Err(EngineError::ReserveUnavailable)));
    }

    #[tokio::test]
    async fn deposit_below_confirmation_threshold_does_not_advance() {
        let h = harness();

        let created = h.engine.create_offramp(offramp_params()).await.unwrap();
        h.chain.script_deposit(Some(DepositEvent {
            tx_hash: "0xdeposit".to_string(),
            block_number: 100,
            confirmations: 2,
        }));

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::AwaitingUserDeposit);
        assert!(synced.deposit_tx_hash.is_none());
    }

    #[tokio::test]
    async fn offramp_full_flow_completes() {
        let h = harness();

        let created = h.engine.create_offramp(offramp_params()).await.unwrap();

        // Deposit confirmed: advance through payout initiation.
        h.chain.script_deposit(Some(confirmed_deposit()));
        let pending = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(pending.status, FiatRequestStatus::ProviderPending);
        assert_eq!(pending.deposit_tx_hash.as_deref(), Some("0xdeposit"));
        assert!(pending.provider_reference.is_some());
        assert_eq!(h.provider.payout_calls.load(Ordering::SeqCst), 1);

        // Payout settles.
        h.provider.script_status(StatusScript::Completed);
        let done = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(done.status, FiatRequestStatus::Completed);
        assert_eq!(h.provider.payout_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn awaiting_user_deposit_never_times_out() {
        let h = harness();

        let created = h.engine.create_offramp(offramp_params()).await.unwrap();
        let mut stale = h.store.get(&created.request_id).unwrap();
        stale.created_at = Utc::now() - Duration::hours(30 * 24);
        h.store.put(stale);

        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::AwaitingUserDeposit);
    }

    // ---------- webhook / conflicts / properties ----------

    #[tokio::test]
    async fn webhook_resolves_request_by_provider_reference() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        let reference = created.provider_reference.clone().unwrap();

        h.provider.script_status(StatusScript::Completed);
        let synced = h.engine.handle_webhook(&reference).await.unwrap();
        assert_eq!(synced.request_id, created.request_id);
        assert_eq!(synced.status, FiatRequestStatus::Completed);

        let missing = h.engine.handle_webhook("pay-unknown").await;
        assert!(matches!(missing, Err(EngineError::NotFound(_))));
    }

    #[tokio::test]
    async fn cas_conflict_is_retried_then_surfaces() {
        let h = harness();

        let created = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.provider.script_status(StatusScript::Completed);

        // A couple of lost races resolve via retry.
        h.store.inject_conflicts.store(2, Ordering::SeqCst);
        let synced = h.engine.sync_request(&created.request_id).await.unwrap();
        assert_eq!(synced.status, FiatRequestStatus::Completed);

        // A second request that keeps losing exhausts the budget.
        let other = h.engine.create_onramp(onramp_params()).await.unwrap();
        h.store.inject_conflicts.store(50, Ordering::SeqCst);
        let result = h.engine.sync_request(&other.request_id).await;
        assert!(matches!(result, Err(EngineError::Conflict(_))));
        h.store.inject_conflicts.store(0, Ordering::SeqCst);
    }

    #[tokio::test]
    async fn random_trigger_orderings_never_regress_status_rank() {
        let h = harness();

        let onramp = h.engine.create_onramp(onramp_params()).await.unwrap();
        let offramp = h.engine.create_offramp(offramp_params()).await.unwrap();
        let ids = [onramp.request_id.clone(), offramp.request_id.clone()];

        let mut last_rank: HashMap<String, u8> = HashMap::new();
        let mut seed: u64 = 0x5eed_1234_abcd_4321;

        for _ in 0..200 {
            // xorshift
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;

            match seed % 5 {
                0 => h.provider.script_status(StatusScript::Pending),
                1 => h.provider.script_status(StatusScript::Completed),
                2 => h.provider.script_status(StatusScript::Transient),
                3 => h.chain.script_deposit(Some(confirmed_deposit())),
                _ => h.chain.script_deposit(None),
            }

            let id = &ids[(seed % 2) as usize];
            let record = h.engine.sync_request(id).await.unwrap();
            let rank = record.status.rank();
            let previous = last_rank.insert(id.clone(), rank).unwrap_or(0);
            assert!(
                rank >= previous,
                "status rank regressed from {previous} to {rank}"
            );
        }
    }

    #[tokio::test]
    async fn pending_ids_exclude_terminal_requests() {
        let h = harness();

        let open = h.engine.create_onramp(onramp_params()).await.unwrap();
        let done = h.engine.create_onramp(onramp_params()).await.unwrap();

        h.provider.script_status(StatusScript::Completed);
        h.engine.sync_request(&done.request_id).await.unwrap();
        h.provider.script_status(StatusScript::Pending);

        // Re-sync leaves the first one open.
        h.engine.sync_request(&open.request_id).await.unwrap();

        let pending = h.engine.pending_request_ids().unwrap();
        assert!(pending.contains(&open.request_id));
        assert!(!pending.contains(&done.request_id));
    }
}
