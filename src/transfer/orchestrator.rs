//! Batch orchestration.
//!
//! Entries are handled one at a time, in input order: validate, look up
//! the stored record, sign (only when nothing is stored), persist,
//! broadcast. Receipt polling for everything already broadcast runs
//! alongside submission and then continues on its own until the pending
//! set drains, the deadline passes, or the caller cancels.

use alloy::primitives::{Address, TxHash, U256};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tracing::Instrument;
use uuid::Uuid;

use crate::blockchain::address::parse_recipient;
use crate::blockchain::{
    AddressValidator, ChainClient, HexAddressValidator, SignedTransfer, TransactionAssembler, TransferKind,
};
use crate::config::TransferConfig;
use crate::lifecycle::ShutdownSignal;
use crate::observability::metrics;
use crate::transfer::broadcast::{BroadcastResult, Broadcaster};
use crate::transfer::error::{TransferError, TransferResult};
use crate::transfer::idempotency::IdempotencyStore;
use crate::transfer::monitor::ReceiptMonitor;
use crate::transfer::nonce::NonceAllocator;
use crate::transfer::store::TransactionStore;
use crate::transfer::types::{BatchReport, EntryReport, Outcome, PendingSubmission, TransferEntry};

/// Engine tunables.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub nonce_settle: Duration,
    pub receipt_poll: Duration,
    pub release_nonce_on_fatal: bool,
    pub recover_pending: bool,
    pub check_balance: bool,
    pub balance_gas_multiplier: u64,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self::from(&TransferConfig::default())
    }
}

impl From<&TransferConfig> for EngineOptions {
    fn from(config: &TransferConfig) -> Self {
        Self {
            nonce_settle: Duration::from_millis(config.nonce_settle_ms),
            receipt_poll: Duration::from_secs(config.receipt_poll_secs),
            release_nonce_on_fatal: config.release_nonce_on_fatal,
            recover_pending: config.recover_pending,
            check_balance: config.check_balance,
            balance_gas_multiplier: config.balance_gas_multiplier,
        }
    }
}

/// Where an entry stands once submission is over.
enum Slot {
    Done(EntryReport),
    /// Broadcast and registered with the monitor.
    AwaitingReceipt { id: u64, tx_hash: TxHash },
}

pub struct BatchOrchestrator {
    client: Arc<dyn ChainClient>,
    assembler: TransactionAssembler,
    validator: Arc<dyn AddressValidator>,
    store: IdempotencyStore,
    nonces: Arc<NonceAllocator>,
    broadcaster: Broadcaster,
    monitor: ReceiptMonitor,
    options: EngineOptions,
}

impl BatchOrchestrator {
    pub fn new(
        client: Arc<dyn ChainClient>,
        assembler: TransactionAssembler,
        store: Arc<dyn TransactionStore>,
        options: EngineOptions,
    ) -> Self {
        let store = IdempotencyStore::new(store);
        let nonces = Arc::new(NonceAllocator::new(
            client.clone(),
            assembler.wallet().address(),
            options.nonce_settle,
        ));
        let monitor = ReceiptMonitor::new(client.clone(), store.clone(), nonces.clone(), options.receipt_poll);
        Self {
            broadcaster: Broadcaster::new(client.clone()),
            client,
            assembler,
            validator: Arc::new(HexAddressValidator),
            store,
            nonces,
            monitor,
            options,
        }
    }

    pub fn with_validator(mut self, validator: Arc<dyn AddressValidator>) -> Self {
        self.validator = validator;
        self
    }

    pub fn account(&self) -> Address {
        self.assembler.wallet().address()
    }

    pub fn nonces(&self) -> &NonceAllocator {
        &self.nonces
    }

    pub fn monitor(&self) -> &ReceiptMonitor {
        &self.monitor
    }

    pub fn store(&self) -> &IdempotencyStore {
        &self.store
    }

    /// Submit `entries` and wait up to `monitor_timeout` for their receipts.
    ///
    /// Per-entry problems land in the report. The run itself fails only when
    /// the record store is unusable, the balance check fails, or the
    /// pre-flight RPC calls fail.
    pub async fn run_batch(
        &self,
        entries: &[TransferEntry],
        monitor_timeout: Duration,
        cancel: &ShutdownSignal,
    ) -> TransferResult<BatchReport> {
        let run_id = Uuid::new_v4();
        let span = tracing::info_span!("batch", %run_id);
        self.run(run_id, entries, monitor_timeout, cancel).instrument(span).await
    }

    async fn run(
        &self,
        run_id: Uuid,
        entries: &[TransferEntry],
        monitor_timeout: Duration,
        cancel: &ShutdownSignal,
    ) -> TransferResult<BatchReport> {
        let started = Instant::now();
        tracing::info!(entries = entries.len(), account = %self.account(), "Starting batch");

        if self.options.check_balance {
            self.check_balance(entries).await?;
        }
        if self.options.recover_pending {
            self.recover_pending().await?;
        }

        let (done_tx, done_rx) = watch::channel(false);
        let submission = async {
            let slots = self.submit_all(entries, cancel).await;
            done_tx.send_replace(true);
            slots
        };
        let (slots, early) = tokio::join!(submission, self.monitor.poll_until(done_rx, cancel));
        let slots = match slots {
            Ok(slots) => slots,
            Err(e) => {
                tracing::error!(error = %e, "Aborting batch");
                self.monitor.run(Duration::ZERO, cancel).await;
                return Err(e);
            }
        };
        tracing::debug!(confirmed = early, "Submission finished");

        let outcome = self.monitor.run(monitor_timeout, cancel).await;
        let abandoned: HashSet<TxHash> = outcome.abandoned.iter().map(|s| s.tx_hash()).collect();
        let reason = if cancel.is_triggered() {
            "cancelled while awaiting receipt"
        } else {
            "no receipt before deadline"
        };

        let reports: Vec<EntryReport> = slots
            .into_iter()
            .map(|slot| match slot {
                Slot::Done(report) => report,
                Slot::AwaitingReceipt { id, tx_hash } if abandoned.contains(&tx_hash) => EntryReport {
                    id,
                    outcome: Outcome::Unconfirmed,
                    tx_hash: Some(tx_hash),
                    error: Some(reason.to_string()),
                },
                Slot::AwaitingReceipt { id, tx_hash } => EntryReport {
                    id,
                    outcome: Outcome::Succeeded,
                    tx_hash: Some(tx_hash),
                    error: None,
                },
            })
            .collect();
        for report in &reports {
            metrics::record_outcome(report.outcome.as_str());
        }

        let report = BatchReport::new(run_id, reports, started.elapsed());
        tracing::info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            skipped = report.skipped,
            invalid = report.invalid,
            unconfirmed = report.unconfirmed,
            elapsed_ms = report.elapsed.as_millis() as u64,
            "Batch finished"
        );
        Ok(report)
    }

    async fn submit_all(&self, entries: &[TransferEntry], cancel: &ShutdownSignal) -> TransferResult<Vec<Slot>> {
        let mut seen = HashSet::with_capacity(entries.len());
        let mut slots = Vec::with_capacity(entries.len());

        for entry in entries {
            let result = if cancel.is_triggered() {
                Err(TransferError::Cancelled)
            } else if !seen.insert(entry.id) {
                Err(TransferError::DuplicateInBatch(entry.id))
            } else {
                self.process_entry(entry, cancel).await
            };

            let slot = match result {
                Ok(slot) => slot,
                Err(e) if e.aborts_batch() => return Err(e),
                Err(e) => Slot::Done(rejected(entry.id, e)),
            };
            slots.push(slot);
        }
        Ok(slots)
    }

    /// Drive one entry up to the point where only a receipt is missing.
    async fn process_entry(&self, entry: &TransferEntry, cancel: &ShutdownSignal) -> TransferResult<Slot> {
        if !self.validator.is_valid_recipient(&entry.recipient) {
            return Err(TransferError::InvalidRecipient(entry.recipient.clone()));
        }
        let recipient =
            parse_recipient(&entry.recipient).map_err(|_| TransferError::InvalidRecipient(entry.recipient.clone()))?;

        let signed = match self.store.lookup(entry.id).await? {
            Some(stored) => {
                if stored.is_confirmed() {
                    return Err(TransferError::AlreadyProcessed(entry.id));
                }
                stored.verify(entry)?;
                tracing::debug!(
                    entry_id = entry.id,
                    tx_hash = %stored.signed.hash,
                    nonce = stored.signed.nonce,
                    "Replaying stored transaction"
                );
                self.nonces.track(stored.signed.nonce).await;
                stored.signed
            }
            None => self.sign_new(entry, recipient, cancel).await?,
        };

        let submission = PendingSubmission {
            signed,
            entry: entry.clone(),
        };
        match self.broadcaster.broadcast(&submission.signed).await {
            BroadcastResult::Accepted | BroadcastResult::AlreadyKnown => {
                let tx_hash = submission.tx_hash();
                tracing::info!(entry_id = entry.id, %tx_hash, nonce = submission.signed.nonce, "transfer queued");
                self.monitor.register(submission).await;
                Ok(Slot::AwaitingReceipt { id: entry.id, tx_hash })
            }
            BroadcastResult::StaleNonce => self.resolve_stale_nonce(submission).await,
            BroadcastResult::Fatal(e) => {
                if self.options.release_nonce_on_fatal {
                    self.nonces.release(submission.signed.nonce).await;
                }
                Err(TransferError::FatalBroadcast(e))
            }
        }
    }

    /// Price, allocate a nonce, sign, and persist. Pricing happens first so
    /// a failed gas lookup never leaves a hole in the nonce sequence. The
    /// nonce goes back if signing or persisting fails.
    async fn sign_new(
        &self,
        entry: &TransferEntry,
        recipient: Address,
        cancel: &ShutdownSignal,
    ) -> TransferResult<SignedTransfer> {
        let suggested = self.client.gas_price().await?;
        let gas_price = self.assembler.adjust_gas_price(suggested)?;
        let nonce = self.nonces.allocate(cancel).await?;

        let tx = self.assembler.build(nonce, gas_price, recipient, entry.amount);
        let signed = match self.assembler.sign(tx, recipient, entry.amount) {
            Ok(signed) => signed,
            Err(e) => {
                self.nonces.release(nonce).await;
                return Err(e.into());
            }
        };
        if let Err(e) = self.store.create(&signed, entry).await {
            self.nonces.release(nonce).await;
            return Err(e.into());
        }
        Ok(signed)
    }

    /// The node says our nonce is used. Succeed if it was used by us.
    async fn resolve_stale_nonce(&self, submission: PendingSubmission) -> TransferResult<Slot> {
        let (id, tx_hash, nonce) = (submission.entry.id, submission.tx_hash(), submission.signed.nonce);
        match self.broadcaster.receipt(tx_hash).await {
            Ok(Some(receipt)) => match self.monitor.confirm(&submission, &receipt).await {
                Ok(_) => Ok(Slot::Done(EntryReport {
                    id,
                    outcome: Outcome::Succeeded,
                    tx_hash: Some(tx_hash),
                    error: None,
                })),
                Err(e) => {
                    tracing::warn!(entry_id = id, %tx_hash, error = %e, "Could not record receipt, monitoring instead");
                    self.monitor.register(submission).await;
                    Ok(Slot::AwaitingReceipt { id, tx_hash })
                }
            },
            Ok(None) => {
                self.nonces.release(nonce).await;
                Err(TransferError::StaleNonceUnresolved { nonce, tx_hash })
            }
            Err(e) => {
                tracing::warn!(entry_id = id, %tx_hash, error = %e, "Receipt lookup failed, monitoring instead");
                self.monitor.register(submission).await;
                Ok(Slot::AwaitingReceipt { id, tx_hash })
            }
        }
    }

    /// The wallet must cover every amount (native transfers only) plus
    /// `balance_gas_multiplier` times the current gas budget per entry.
    async fn check_balance(&self, entries: &[TransferEntry]) -> TransferResult<()> {
        let have = self.client.balance(self.account()).await?;
        let gas_price = self.client.gas_price().await?;

        let gas_per_entry = U256::from(gas_price)
            .saturating_mul(U256::from(self.options.balance_gas_multiplier))
            .saturating_mul(U256::from(self.assembler.gas_limit()));
        let mut need = gas_per_entry.saturating_mul(U256::from(entries.len()));
        if self.assembler.kind() == TransferKind::Standard {
            need = entries.iter().fold(need, |sum, e| sum.saturating_add(e.amount));
        }

        if have < need {
            tracing::error!(%have, %need, "Insufficient balance for batch");
            return Err(TransferError::InsufficientBalance { have, need });
        }
        tracing::debug!(%have, %need, "Balance check passed");
        Ok(())
    }

    /// Put every stored `Generated` record back under monitoring.
    async fn recover_pending(&self) -> TransferResult<usize> {
        let stored = self.store.pending().await?;
        let count = stored.len();
        for stored in stored {
            self.nonces.track(stored.signed.nonce).await;
            self.monitor
                .register(PendingSubmission {
                    signed: stored.signed,
                    entry: stored.entry,
                })
                .await;
        }
        if count > 0 {
            tracing::info!(recovered = count, "Re-registered pending transactions");
        }
        Ok(count)
    }
}

impl std::fmt::Debug for BatchOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchOrchestrator")
            .field("account", &self.account())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

/// Report for an entry that ended with `error`, logged by bucket.
fn rejected(id: u64, error: TransferError) -> EntryReport {
    let outcome = error.outcome();
    let tx_hash = match &error {
        TransferError::StaleNonceUnresolved { tx_hash, .. } => Some(*tx_hash),
        _ => None,
    };
    match outcome {
        Outcome::Invalid => tracing::warn!(entry_id = id, error = %error, "transfer invalid"),
        Outcome::Skipped => tracing::info!(entry_id = id, reason = %error, "transfer skipped"),
        Outcome::Unconfirmed => tracing::warn!(entry_id = id, reason = %error, "transfer unconfirmed"),
        _ => tracing::error!(entry_id = id, error = %error, "transfer failed"),
    }
    EntryReport {
        id,
        outcome,
        tx_hash,
        error: Some(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockChainClient;
    use crate::blockchain::Wallet;
    use crate::config::BlockchainConfig;
    use crate::transfer::store::MemoryStore;

    const TEST_PRIVATE_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn engine(chain: &MockChainClient, kind: TransferKind) -> BatchOrchestrator {
        let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, 1).unwrap();
        let config = BlockchainConfig {
            gas_price_multiplier: 1.0,
            ..BlockchainConfig::default()
        };
        let options = EngineOptions {
            nonce_settle: Duration::ZERO,
            ..EngineOptions::default()
        };
        BatchOrchestrator::new(
            Arc::new(chain.clone()),
            TransactionAssembler::new(wallet, kind, &config),
            Arc::new(MemoryStore::new()),
            options,
        )
    }

    fn entry(id: u64, amount: u64) -> TransferEntry {
        TransferEntry {
            id,
            payer_account_ref: format!("acct-{}", id),
            amount: U256::from(amount),
            recipient: "0x70997970C51812dc3A010C7d01b50e0d17dc79C8".to_string(),
            auxiliary_tags: vec![],
        }
    }

    #[tokio::test]
    async fn test_balance_check_counts_amounts_and_gas() {
        let chain = MockChainClient::new(1);
        chain.set_gas_price(1_000_000_000);
        let orchestrator = engine(&chain, TransferKind::Standard);
        let entries = vec![entry(1, 1_000), entry(2, 2_000)];

        // 2 × (1 gwei × 10 × 21000) + 3000 wei
        let need = U256::from(2u64 * 10 * 21_000 * 1_000_000_000 + 3_000);
        chain.set_balance(need);
        assert!(orchestrator.check_balance(&entries).await.is_ok());

        chain.set_balance(need - U256::from(1u64));
        let err = orchestrator.check_balance(&entries).await.unwrap_err();
        assert!(matches!(err, TransferError::InsufficientBalance { .. }));
    }

    #[tokio::test]
    async fn test_balance_check_ignores_amounts_for_asset_transfers() {
        let chain = MockChainClient::new(1);
        let kind = TransferKind::AlternateAsset {
            contract: Address::repeat_byte(0xaa),
        };
        let orchestrator = engine(&chain, kind);

        chain.set_balance(U256::from(10u64 * 100_000 * 1_000_000_000));
        assert!(orchestrator.check_balance(&[entry(1, u64::MAX)]).await.is_ok());
    }

    #[tokio::test]
    async fn test_invalid_recipient_never_reaches_the_chain() {
        let chain = MockChainClient::new(1);
        let orchestrator = engine(&chain, TransferKind::Standard);
        let mut bad = entry(1, 5);
        bad.recipient = "0x1234".to_string();

        let report = orchestrator
            .run_batch(&[bad], Duration::from_secs(1), &ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(report.invalid, 1);
        assert!(chain.broadcasts().is_empty());
        assert!(orchestrator.store().lookup(1).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fatal_broadcast_releases_nonce_and_keeps_record() {
        let chain = MockChainClient::new(1);
        chain.push_send_response(crate::blockchain::mock::MockSendResponse::Reject(
            "insufficient funds for gas * price + value".to_string(),
        ));
        let orchestrator = engine(&chain, TransferKind::Standard);

        let report = orchestrator
            .run_batch(&[entry(1, 5)], Duration::from_secs(1), &ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(report.failed, 1);
        assert!(report.entries[0].error.as_deref().unwrap_or_default().contains("insufficient funds"));

        let ledger = orchestrator.nonces().snapshot().await;
        assert!(ledger.live.is_empty());
        assert_eq!(ledger.highest_issued, Some(0));

        let stored = orchestrator.store().lookup(1).await.unwrap().unwrap();
        assert!(!stored.is_confirmed());
    }
}
