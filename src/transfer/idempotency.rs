//! At-most-once bookkeeping on top of a [`TransactionStore`].
//!
//! A transfer id is signed once. The signed bytes and the source entry are
//! stored with the record, so a later run replays the stored transaction
//! rather than building a new one.

use alloy::primitives::TxHash;
use std::sync::Arc;

use crate::blockchain::SignedTransfer;
use crate::transfer::error::{StoreError, TransferError, TransferResult};
use crate::transfer::store::TransactionStore;
use crate::transfer::types::{unix_now, Confirmation, TransactionRecord, TransferEntry, TxStatus};

/// A stored record with its blobs decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTransfer {
    pub record: TransactionRecord,
    pub signed: SignedTransfer,
    pub entry: TransferEntry,
}

impl StoredTransfer {
    fn decode(record: TransactionRecord) -> Result<Self, StoreError> {
        let signed = serde_json::from_str(&record.serialized_transaction)?;
        let entry = serde_json::from_str(&record.serialized_entry)?;
        Ok(Self { record, signed, entry })
    }

    /// Fail with `EntryMismatch` unless `entry` describes the stored payment.
    pub fn verify(&self, entry: &TransferEntry) -> TransferResult<()> {
        if &self.entry != entry {
            return Err(TransferError::EntryMismatch(entry.id));
        }
        Ok(())
    }

    pub fn is_confirmed(&self) -> bool {
        self.record.is_confirmed()
    }
}

#[derive(Clone)]
pub struct IdempotencyStore {
    store: Arc<dyn TransactionStore>,
}

impl IdempotencyStore {
    pub fn new(store: Arc<dyn TransactionStore>) -> Self {
        Self { store }
    }

    /// `None` when nothing was ever signed for `id`.
    pub async fn lookup(&self, id: u64) -> Result<Option<StoredTransfer>, StoreError> {
        match self.store.get(id).await? {
            Some(record) => Ok(Some(StoredTransfer::decode(record)?)),
            None => Ok(None),
        }
    }

    /// Persist the single submission for `entry`. Fails with `Duplicate`
    /// if a record for the id already exists.
    pub async fn create(
        &self,
        signed: &SignedTransfer,
        entry: &TransferEntry,
    ) -> Result<TransactionRecord, StoreError> {
        let record = record_for(signed, entry)?;
        self.store.insert(record.clone()).await?;
        tracing::debug!(entry_id = entry.id, tx_hash = %signed.hash, nonce = signed.nonce, "Stored transaction record");
        Ok(record)
    }

    pub async fn mark_confirmed(
        &self,
        tx_hash: TxHash,
        confirmation: &Confirmation,
    ) -> Result<TransactionRecord, StoreError> {
        self.store.update_confirmation(tx_hash, confirmation).await
    }

    /// Every record still waiting for a receipt.
    pub async fn pending(&self) -> Result<Vec<StoredTransfer>, StoreError> {
        self.store
            .list_by_status(TxStatus::Generated)
            .await?
            .into_iter()
            .map(StoredTransfer::decode)
            .collect()
    }
}

impl std::fmt::Debug for IdempotencyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyStore").finish_non_exhaustive()
    }
}

/// The `Generated` record for a freshly signed transfer.
pub fn record_for(signed: &SignedTransfer, entry: &TransferEntry) -> Result<TransactionRecord, StoreError> {
    Ok(TransactionRecord {
        id: entry.id,
        payer_account_ref: entry.payer_account_ref.clone(),
        payer_address: signed.from,
        recipient_address: signed.recipient,
        tx_hash: signed.hash,
        nonce: signed.nonce,
        value: signed.amount,
        gas_limit: signed.gas_limit,
        gas_price: signed.gas_price,
        status: TxStatus::Generated,
        auxiliary_tags: entry.auxiliary_tags.clone(),
        created_at: unix_now(),
        confirmed_at: None,
        gas_used: None,
        cumulative_gas_used: None,
        gas_cost: None,
        receipt_status: None,
        block_number: None,
        block_hash: None,
        serialized_transaction: serde_json::to_string(signed)?,
        serialized_entry: serde_json::to_string(entry)?,
    })
}
