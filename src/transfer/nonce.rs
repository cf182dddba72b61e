//! Per-wallet nonce allocation.
//!
//! The node's pending nonce lags behind transactions we have just
//! broadcast, so the allocator keeps its own ledger and hands out
//! `max(network_pending, highest_issued + 1)`. All ledger access goes
//! through one async mutex; an allocation also holds it across the settle
//! delay, so allocations never interleave.

use alloy::primitives::Address;
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

use crate::blockchain::ChainClient;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::transfer::error::{TransferError, TransferResult};

/// Local view of issued nonces.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NonceLedger {
    /// Never decreases for the lifetime of the process.
    pub highest_issued: Option<u64>,
    /// Issued but not yet confirmed.
    pub live: BTreeSet<u64>,
}

pub struct NonceAllocator {
    client: Arc<dyn ChainClient>,
    account: Address,
    ledger: Mutex<NonceLedger>,
    settle_delay: Duration,
}

impl NonceAllocator {
    pub fn new(client: Arc<dyn ChainClient>, account: Address, settle_delay: Duration) -> Self {
        Self {
            client,
            account,
            ledger: Mutex::new(NonceLedger::default()),
            settle_delay,
        }
    }

    pub fn account(&self) -> Address {
        self.account
    }

    /// Hand out the next nonce.
    ///
    /// After the ledger is updated the call waits `settle_delay` before
    /// returning. If `cancel` fires during that wait the nonce is dropped
    /// from the live set (it stays counted in `highest_issued`).
    pub async fn allocate(&self, cancel: &ShutdownSignal) -> TransferResult<u64> {
        let mut ledger = self.ledger.lock().await;

        let network_pending = self.client.pending_nonce(self.account).await?;
        let nonce = match ledger.highest_issued {
            Some(highest) => network_pending.max(highest + 1),
            None => network_pending,
        };
        ledger.highest_issued = Some(nonce);
        ledger.live.insert(nonce);

        metrics::record_nonce_allocation();
        metrics::record_live_nonces(ledger.live.len());
        tracing::debug!(
            account = %self.account,
            nonce,
            network_pending,
            live = ledger.live.len(),
            "Allocated nonce"
        );

        if !self.settle_delay.is_zero() {
            tokio::select! {
                _ = tokio::time::sleep(self.settle_delay) => {}
                _ = cancel.cancelled() => {
                    ledger.live.remove(&nonce);
                    metrics::record_live_nonces(ledger.live.len());
                    return Err(TransferError::Cancelled);
                }
            }
        }

        Ok(nonce)
    }

    /// Forget a nonce whose transaction is confirmed (or abandoned).
    pub async fn release(&self, nonce: u64) {
        let mut ledger = self.ledger.lock().await;
        if ledger.live.remove(&nonce) {
            tracing::debug!(account = %self.account, nonce, "Released nonce");
        }
        metrics::record_live_nonces(ledger.live.len());
    }

    /// Mark a nonce issued in an earlier run as live.
    pub async fn track(&self, nonce: u64) {
        let mut ledger = self.ledger.lock().await;
        ledger.live.insert(nonce);
        ledger.highest_issued = Some(ledger.highest_issued.map_or(nonce, |h| h.max(nonce)));
        metrics::record_live_nonces(ledger.live.len());
    }

    pub async fn snapshot(&self) -> NonceLedger {
        self.ledger.lock().await.clone()
    }
}

impl std::fmt::Debug for NonceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NonceAllocator")
            .field("account", &self.account)
            .field("settle_delay", &self.settle_delay)
            .finish()
    }
}
