//! Transfer engine data model.

use alloy::primitives::{Address, TxHash, B256, U256};
use serde::{Deserialize, Serialize};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::blockchain::SignedTransfer;

/// Seconds since the Unix epoch.
pub fn unix_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// One requested payment, as supplied by the caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferEntry {
    /// Caller-assigned identifier; at most one transaction is ever signed for it.
    pub id: u64,
    pub payer_account_ref: String,
    /// Amount in the smallest unit.
    pub amount: U256,
    pub recipient: String,
    /// Identifiers of external aggregates this transfer settles.
    #[serde(default)]
    pub auxiliary_tags: Vec<i64>,
}

/// Two entries describe the same payment when id, account, recipient and
/// amount agree. Tags are bookkeeping and do not take part.
impl PartialEq for TransferEntry {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.payer_account_ref == other.payer_account_ref
            && self.recipient == other.recipient
            && self.amount == other.amount
    }
}

impl Eq for TransferEntry {}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Signed and stored; may or may not have reached the network.
    Generated,
    /// A receipt has been recorded.
    Confirmed,
}

/// Persisted state of the single submission for a transfer id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: u64,
    pub payer_account_ref: String,
    pub payer_address: Address,
    pub recipient_address: Address,
    pub tx_hash: TxHash,
    pub nonce: u64,
    pub value: U256,
    pub gas_limit: u64,
    pub gas_price: u128,
    pub status: TxStatus,
    pub auxiliary_tags: Vec<i64>,
    pub created_at: u64,
    pub confirmed_at: Option<u64>,
    pub gas_used: Option<u64>,
    pub cumulative_gas_used: Option<u64>,
    /// `gas_used × gas_price`, in wei.
    pub gas_cost: Option<U256>,
    pub receipt_status: Option<bool>,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    /// JSON of the [`SignedTransfer`], replayed verbatim on re-runs.
    pub serialized_transaction: String,
    /// JSON of the [`TransferEntry`] the transaction was built from.
    pub serialized_entry: String,
}

impl TransactionRecord {
    pub fn is_confirmed(&self) -> bool {
        self.status == TxStatus::Confirmed
    }
}

/// Receipt data written when a record moves to `Confirmed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Confirmation {
    pub gas_used: u64,
    pub cumulative_gas_used: u64,
    pub gas_cost: U256,
    pub receipt_status: bool,
    pub block_number: Option<u64>,
    pub block_hash: Option<B256>,
    pub confirmed_at: u64,
}

/// A broadcast transaction the monitor is waiting on. Lives only for the
/// current run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSubmission {
    pub signed: SignedTransfer,
    pub entry: TransferEntry,
}

impl PendingSubmission {
    pub fn tx_hash(&self) -> TxHash {
        self.signed.hash
    }
}

/// Final bucket for one entry of a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    Failed,
    Skipped,
    Invalid,
    Unconfirmed,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Succeeded => "succeeded",
            Outcome::Failed => "failed",
            Outcome::Skipped => "skipped",
            Outcome::Invalid => "invalid",
            Outcome::Unconfirmed => "unconfirmed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryReport {
    pub id: u64,
    pub outcome: Outcome,
    pub tx_hash: Option<TxHash>,
    pub error: Option<String>,
}

/// Aggregate result of one batch run.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub invalid: usize,
    pub unconfirmed: usize,
    pub elapsed: Duration,
    /// One report per input entry, in input order.
    pub entries: Vec<EntryReport>,
}

impl BatchReport {
    pub fn new(run_id: Uuid, entries: Vec<EntryReport>, elapsed: Duration) -> Self {
        let count = |outcome: Outcome| entries.iter().filter(|e| e.outcome == outcome).count();
        let (failed, skipped, invalid, unconfirmed) = (
            count(Outcome::Failed),
            count(Outcome::Skipped),
            count(Outcome::Invalid),
            count(Outcome::Unconfirmed),
        );
        let total = entries.len();
        Self {
            run_id,
            total,
            succeeded: total - invalid - failed - skipped - unconfirmed,
            failed,
            skipped,
            invalid,
            unconfirmed,
            elapsed,
            entries,
        }
    }

    pub fn outcome_of(&self, id: u64) -> Option<Outcome> {
        self.entries.iter().find(|e| e.id == id).map(|e| e.outcome)
    }
}
