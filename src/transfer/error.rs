//! Transfer engine errors.

use alloy::primitives::{TxHash, U256};
use thiserror::Error;

use crate::blockchain::BlockchainError;
use crate::transfer::types::Outcome;

/// Failures of the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("record serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A record with this transfer id already exists.
    #[error("record {0} already exists")]
    Duplicate(u64),

    #[error("transaction {0} is already recorded")]
    DuplicateHash(TxHash),

    #[error("no record for transaction {0}")]
    NotFound(TxHash),
}

impl StoreError {
    /// The store itself is unhealthy, as opposed to rejecting one row.
    pub fn is_storage_failure(&self) -> bool {
        matches!(self, StoreError::Io(_) | StoreError::Serialization(_))
    }
}

/// Why a transfer did not go through.
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("invalid recipient address '{0}'")]
    InvalidRecipient(String),

    /// The transfer was confirmed by an earlier run.
    #[error("transfer {0} already processed")]
    AlreadyProcessed(u64),

    #[error("transfer {0} appears earlier in this batch")]
    DuplicateInBatch(u64),

    /// A stored record exists for the id but describes a different payment.
    #[error("entry mismatch for id {0}: stored entry differs from provided entry")]
    EntryMismatch(u64),

    /// The node rejected the transaction for a reason we cannot recover from.
    #[error("failed to broadcast transaction: {0}")]
    FatalBroadcast(BlockchainError),

    /// The nonce was consumed, but not by our transaction.
    #[error("nonce {nonce} already used and no receipt exists for {tx_hash}")]
    StaleNonceUnresolved { nonce: u64, tx_hash: TxHash },

    #[error("insufficient balance for transfers: have {have}, need {need}")]
    InsufficientBalance { have: U256, need: U256 },

    #[error("cancelled before submission")]
    Cancelled,

    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl TransferError {
    /// Only an unhealthy store stops the batch: past that point the
    /// single-submission guarantee can no longer be checked.
    pub fn aborts_batch(&self) -> bool {
        matches!(self, TransferError::Store(e) if e.is_storage_failure())
    }

    /// Report bucket for an entry that ended with this error.
    pub fn outcome(&self) -> Outcome {
        match self {
            TransferError::InvalidRecipient(_) => Outcome::Invalid,
            TransferError::AlreadyProcessed(_) | TransferError::DuplicateInBatch(_) => Outcome::Skipped,
            TransferError::Cancelled => Outcome::Unconfirmed,
            _ => Outcome::Failed,
        }
    }
}

pub type TransferResult<T> = Result<T, TransferError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_failures_abort() {
        let io = TransferError::Store(StoreError::Io(std::io::Error::other("disk gone")));
        assert!(io.aborts_batch());

        assert!(!TransferError::Store(StoreError::Duplicate(3)).aborts_batch());
        assert!(!TransferError::EntryMismatch(7).aborts_batch());
        assert!(!TransferError::FatalBroadcast(BlockchainError::Rpc("insufficient funds".into()))
            .aborts_batch());
    }

    #[test]
    fn test_outcome_buckets() {
        assert_eq!(TransferError::InvalidRecipient("0x1".into()).outcome(), Outcome::Invalid);
        assert_eq!(TransferError::AlreadyProcessed(1).outcome(), Outcome::Skipped);
        assert_eq!(TransferError::DuplicateInBatch(1).outcome(), Outcome::Skipped);
        assert_eq!(TransferError::Cancelled.outcome(), Outcome::Unconfirmed);
        assert_eq!(TransferError::EntryMismatch(7).outcome(), Outcome::Failed);
    }

    #[test]
    fn test_messages() {
        assert_eq!(
            TransferError::EntryMismatch(7).to_string(),
            "entry mismatch for id 7: stored entry differs from provided entry"
        );
        assert_eq!(StoreError::Duplicate(3).to_string(), "record 3 already exists");
    }
}
