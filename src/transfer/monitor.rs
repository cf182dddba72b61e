//! Receipt monitoring for broadcast transfers.
//!
//! One shared loop polls receipts for every pending submission on a fixed
//! interval. The pending set sits behind a read/write lock: a tick
//! snapshots it under the read lock, so new submissions can be registered
//! while lookups are in flight, and each confirmed entry is removed under
//! the write lock once its record is updated.

use alloy::primitives::{TxHash, U256};
use futures_util::future::join_all;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, RwLock};
use tokio::time::{Instant, MissedTickBehavior};

use crate::blockchain::{ChainClient, ReceiptInfo};
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::transfer::error::StoreError;
use crate::transfer::idempotency::IdempotencyStore;
use crate::transfer::nonce::NonceAllocator;
use crate::transfer::types::{unix_now, Confirmation, PendingSubmission, TransactionRecord};

/// How a monitoring run ended.
#[derive(Debug, Default)]
pub struct MonitorOutcome {
    /// Receipts recorded during this run.
    pub confirmed: usize,
    /// Still pending when the deadline passed or the run was cancelled.
    pub abandoned: Vec<PendingSubmission>,
}

pub struct ReceiptMonitor {
    client: Arc<dyn ChainClient>,
    store: IdempotencyStore,
    nonces: Arc<NonceAllocator>,
    pending: RwLock<HashMap<TxHash, PendingSubmission>>,
    poll_interval: Duration,
}

impl ReceiptMonitor {
    pub fn new(
        client: Arc<dyn ChainClient>,
        store: IdempotencyStore,
        nonces: Arc<NonceAllocator>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            store,
            nonces,
            pending: RwLock::new(HashMap::new()),
            // `interval` panics on a zero period.
            poll_interval: poll_interval.max(Duration::from_millis(1)),
        }
    }

    pub async fn register(&self, submission: PendingSubmission) {
        let mut pending = self.pending.write().await;
        tracing::debug!(
            entry_id = submission.entry.id,
            tx_hash = %submission.tx_hash(),
            "Waiting for receipt"
        );
        pending.insert(submission.tx_hash(), submission);
        metrics::record_pending_submissions(pending.len());
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }

    pub async fn is_pending(&self, tx_hash: &TxHash) -> bool {
        self.pending.read().await.contains_key(tx_hash)
    }

    /// Record `receipt` for `submission`, free its nonce and stop tracking it.
    pub async fn confirm(
        &self,
        submission: &PendingSubmission,
        receipt: &ReceiptInfo,
    ) -> Result<TransactionRecord, StoreError> {
        let signed = &submission.signed;
        let confirmation = Confirmation {
            gas_used: receipt.gas_used,
            cumulative_gas_used: receipt.cumulative_gas_used,
            gas_cost: U256::from(receipt.gas_used) * U256::from(signed.gas_price),
            receipt_status: receipt.status,
            block_number: receipt.block_number,
            block_hash: receipt.block_hash,
            confirmed_at: unix_now(),
        };
        let record = self.store.mark_confirmed(signed.hash, &confirmation).await?;
        self.nonces.release(signed.nonce).await;
        {
            let mut pending = self.pending.write().await;
            pending.remove(&signed.hash);
            metrics::record_pending_submissions(pending.len());
        }

        if receipt.status {
            tracing::info!(
                entry_id = submission.entry.id,
                tx_hash = %signed.hash,
                nonce = signed.nonce,
                block = ?receipt.block_number,
                gas_used = receipt.gas_used,
                gas_cost = %confirmation.gas_cost,
                "transfer confirmed"
            );
        } else {
            tracing::warn!(
                entry_id = submission.entry.id,
                tx_hash = %signed.hash,
                nonce = signed.nonce,
                block = ?receipt.block_number,
                "transfer confirmed but execution reverted"
            );
        }
        Ok(record)
    }

    /// One polling pass. Returns how many submissions were confirmed.
    pub async fn check_pending(&self) -> usize {
        let snapshot: Vec<PendingSubmission> = self.pending.read().await.values().cloned().collect();
        if snapshot.is_empty() {
            return 0;
        }

        let lookups = snapshot
            .iter()
            .map(|s| self.client.transaction_receipt(s.tx_hash()));
        let results = join_all(lookups).await;

        let mut confirmed = 0;
        for (submission, result) in snapshot.iter().zip(results) {
            match result {
                Ok(Some(receipt)) => match self.confirm(submission, &receipt).await {
                    Ok(_) => confirmed += 1,
                    Err(e) => tracing::error!(
                        entry_id = submission.entry.id,
                        tx_hash = %submission.tx_hash(),
                        error = %e,
                        "Failed to record confirmation"
                    ),
                },
                Ok(None) => {}
                Err(e) => tracing::debug!(
                    tx_hash = %submission.tx_hash(),
                    error = %e,
                    "Receipt lookup failed, will retry"
                ),
            }
        }

        tracing::debug!(checked = snapshot.len(), confirmed, "Receipt poll");
        confirmed
    }

    /// Poll in the background until `done` flips to true (or its sender
    /// goes away) or `cancel` fires.
    pub async fn poll_until(&self, mut done: watch::Receiver<bool>, cancel: &ShutdownSignal) -> usize {
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Nothing is pending yet on the first tick.
        ticker.tick().await;

        let mut confirmed = 0;
        loop {
            tokio::select! {
                _ = ticker.tick() => confirmed += self.check_pending().await,
                _ = done.wait_for(|finished| *finished) => break,
                _ = cancel.cancelled() => break,
            }
        }
        confirmed
    }

    /// Poll until nothing is pending, `timeout` has elapsed, or `cancel`
    /// fires. Whatever is left is drained and returned as abandoned.
    pub async fn run(&self, timeout: Duration, cancel: &ShutdownSignal) -> MonitorOutcome {
        let deadline = Instant::now() + timeout;
        let mut ticker = tokio::time::interval(self.poll_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut confirmed = 0;
        loop {
            if self.pending_count().await == 0 {
                break;
            }
            if Instant::now() >= deadline {
                tracing::warn!(timeout_secs = timeout.as_secs(), "Receipt monitor deadline reached");
                break;
            }
            tokio::select! {
                _ = ticker.tick() => confirmed += self.check_pending().await,
                _ = tokio::time::sleep_until(deadline) => {}
                _ = cancel.cancelled() => {
                    tracing::info!("Receipt monitoring cancelled");
                    break;
                }
            }
        }

        let abandoned: Vec<PendingSubmission> = {
            let mut pending = self.pending.write().await;
            let drained = pending.drain().map(|(_, s)| s).collect();
            metrics::record_pending_submissions(0);
            drained
        };
        for submission in &abandoned {
            tracing::warn!(
                entry_id = submission.entry.id,
                tx_hash = %submission.tx_hash(),
                nonce = submission.signed.nonce,
                "transfer unconfirmed"
            );
        }

        MonitorOutcome { confirmed, abandoned }
    }
}

impl std::fmt::Debug for ReceiptMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceiptMonitor")
            .field("poll_interval", &self.poll_interval)
            .finish_non_exhaustive()
    }
}
