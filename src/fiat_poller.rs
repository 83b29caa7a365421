// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Fiat Request Poller
//!
//! Background task that periodically re-evaluates pending fiat requests.
//! Webhooks cover the common case; the poller catches missed or delayed
//! callbacks so status transitions happen server-side even when nobody is
//! polling from the frontend.
//!
//! Every `poll_interval` (default 30 s) the poller lists all non-terminal
//! requests and runs the engine's `sync_request` on each. Transient failures
//! are logged and retried next sweep. Shutdown is graceful via
//! `tokio_util::sync::CancellationToken`.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::fiat::ReconciliationEngine;

/// Default interval between polling sweeps.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Background fiat request poller.
pub struct FiatPoller {
    engine: Arc<ReconciliationEngine>,
    poll_interval: Duration,
}

impl FiatPoller {
    pub fn new(engine: Arc<ReconciliationEngine>) -> Self {
        Self {
            engine,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    /// Run the poller loop until the cancellation token is triggered.
    ///
    /// Should be spawned as a background task:
    /// ```rust,ignore
    /// tokio::spawn(poller.run(shutdown.clone()));
    /// ```
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            interval_secs = self.poll_interval.as_secs(),
            "Fiat request poller starting"
        );

        loop {
            if shutdown.is_cancelled() {
                info!("Fiat request poller shutting down");
                return;
            }

            self.poll_step().await;

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {},
                _ = shutdown.cancelled() => {
                    info!("Fiat request poller shutting down");
                    return;
                }
            }
        }
    }

    /// Execute one polling sweep: find pending requests and sync each.
    async fn poll_step(&self) {
        let pending_ids = match self.engine.pending_request_ids() {
            Ok(ids) => ids,
            Err(e) => {
                warn!(error = %e, "Fiat poller: failed to list pending requests");
                return;
            }
        };

        if pending_ids.is_empty() {
            return;
        }

        info!(
            count = pending_ids.len(),
            "Fiat poller: syncing pending requests"
        );

        for request_id in &pending_ids {
            match self.engine.sync_request(request_id).await {
                Ok(record) => {
                    info!(
                        request_id = %record.request_id,
                        status = ?record.status,
                        "Fiat poller: synced request"
                    );
                }
                Err(e) => {
                    warn!(
                        request_id = %request_id,
                        error = %e,
                        "Fiat poller: failed to sync request"
                    );
                }
            }
        }
    }
}
