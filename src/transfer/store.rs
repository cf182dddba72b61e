//! Transaction record storage.
//!
//! Records are keyed by transfer id and indexed by transaction hash; both
//! are unique. [`MemoryStore`] keeps everything in process memory,
//! [`JsonFileStore`] adds whole-file JSON persistence after every write.

use alloy::primitives::TxHash;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::fs::File;
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::transfer::error::StoreError;
use crate::transfer::types::{Confirmation, TransactionRecord, TxStatus};

/// Row-level contract of the persistent record store.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    /// Insert a new record. Fails with `Duplicate` if the id exists, or
    /// `DuplicateHash` if another record already holds the hash.
    async fn insert(&self, record: TransactionRecord) -> Result<(), StoreError>;

    async fn get(&self, id: u64) -> Result<Option<TransactionRecord>, StoreError>;

    async fn find_by_hash(&self, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError>;

    /// Move the record for `tx_hash` to `Confirmed` and attach receipt data.
    async fn update_confirmation(
        &self,
        tx_hash: TxHash,
        confirmation: &Confirmation,
    ) -> Result<TransactionRecord, StoreError>;

    /// Records with `status`, ordered by id.
    async fn list_by_status(&self, status: TxStatus) -> Result<Vec<TransactionRecord>, StoreError>;
}

/// Records held in process memory.
#[derive(Clone, Default)]
pub struct MemoryStore {
    records: Arc<DashMap<u64, TransactionRecord>>,
    by_hash: Arc<DashMap<TxHash, u64>>,
    unavailable: Arc<AtomicBool>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with an I/O error, as a lost database
    /// connection would.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn check_available(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Io(std::io::Error::other("record store unavailable")));
        }
        Ok(())
    }

    fn insert_record(&self, record: TransactionRecord) -> Result<(), StoreError> {
        // Lock order: records shard, then hash index.
        match self.records.entry(record.id) {
            Entry::Occupied(_) => Err(StoreError::Duplicate(record.id)),
            Entry::Vacant(slot) => match self.by_hash.entry(record.tx_hash) {
                Entry::Occupied(_) => Err(StoreError::DuplicateHash(record.tx_hash)),
                Entry::Vacant(index) => {
                    index.insert(record.id);
                    slot.insert(record);
                    Ok(())
                }
            },
        }
    }

    fn remove_record(&self, id: u64) {
        if let Some((_, record)) = self.records.remove(&id) {
            self.by_hash.remove(&record.tx_hash);
        }
    }

    /// Put back an earlier version of an existing record. The hash is
    /// immutable, so the index is untouched.
    fn restore_record(&self, record: TransactionRecord) {
        self.records.insert(record.id, record);
    }

    fn get_record(&self, id: u64) -> Option<TransactionRecord> {
        self.records.get(&id).map(|r| r.value().clone())
    }

    fn find_record(&self, tx_hash: TxHash) -> Option<TransactionRecord> {
        let id = self.by_hash.get(&tx_hash).map(|r| *r.value())?;
        self.get_record(id)
    }

    fn confirm_record(
        &self,
        tx_hash: TxHash,
        confirmation: &Confirmation,
    ) -> Result<TransactionRecord, StoreError> {
        let id = self
            .by_hash
            .get(&tx_hash)
            .map(|r| *r.value())
            .ok_or(StoreError::NotFound(tx_hash))?;
        let mut record = self.records.get_mut(&id).ok_or(StoreError::NotFound(tx_hash))?;

        record.status = TxStatus::Confirmed;
        record.confirmed_at = Some(confirmation.confirmed_at);
        record.gas_used = Some(confirmation.gas_used);
        record.cumulative_gas_used = Some(confirmation.cumulative_gas_used);
        record.gas_cost = Some(confirmation.gas_cost);
        record.receipt_status = Some(confirmation.receipt_status);
        record.block_number = confirmation.block_number;
        record.block_hash = confirmation.block_hash;
        Ok(record.clone())
    }

    fn records_with(&self, status: TxStatus) -> Vec<TransactionRecord> {
        let mut found: Vec<TransactionRecord> = self
            .records
            .iter()
            .filter(|r| r.value().status == status)
            .map(|r| r.value().clone())
            .collect();
        found.sort_by_key(|r| r.id);
        found
    }

    fn all_records(&self) -> Vec<TransactionRecord> {
        let mut all: Vec<TransactionRecord> = self.records.iter().map(|r| r.value().clone()).collect();
        all.sort_by_key(|r| r.id);
        all
    }
}

#[async_trait]
impl TransactionStore for MemoryStore {
    async fn insert(&self, record: TransactionRecord) -> Result<(), StoreError> {
        self.check_available()?;
        self.insert_record(record)
    }

    async fn get(&self, id: u64) -> Result<Option<TransactionRecord>, StoreError> {
        self.check_available()?;
        Ok(self.get_record(id))
    }

    async fn find_by_hash(&self, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError> {
        self.check_available()?;
        Ok(self.find_record(tx_hash))
    }

    async fn update_confirmation(
        &self,
        tx_hash: TxHash,
        confirmation: &Confirmation,
    ) -> Result<TransactionRecord, StoreError> {
        self.check_available()?;
        self.confirm_record(tx_hash, confirmation)
    }

    async fn list_by_status(&self, status: TxStatus) -> Result<Vec<TransactionRecord>, StoreError> {
        self.check_available()?;
        Ok(self.records_with(status))
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("records", &self.records.len())
            .finish()
    }
}

/// Records persisted as one JSON array on disk.
///
/// The file is loaded on open and rewritten (temp file + rename) after
/// every insert or confirmation, before the call returns. A write that
/// cannot be saved is undone in memory. Each save rewrites the whole file
/// on the blocking pool, so cost grows with the number of records; suited
/// to batches of thousands, not millions.
pub struct JsonFileStore {
    memory: MemoryStore,
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        let memory = MemoryStore::new();

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            let records: Vec<TransactionRecord> = serde_json::from_reader(reader)?;
            for record in records {
                memory.insert_record(record)?;
            }
            tracing::info!(
                path = %path.display(),
                records = memory.len(),
                "Loaded transaction records"
            );
        }

        Ok(Self {
            memory,
            path,
            write_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn save(&self) -> Result<(), StoreError> {
        let records = self.memory.all_records();
        let path = self.path.clone();
        let count = records.len();
        tokio::task::spawn_blocking(move || write_records(&path, &records))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::other(e)))??;
        tracing::trace!(path = %self.path.display(), records = count, "Saved transaction records");
        Ok(())
    }
}

fn write_records(path: &Path, records: &[TransactionRecord]) -> Result<(), StoreError> {
    let tmp = path.with_extension("json.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        serde_json::to_writer_pretty(&mut writer, records)?;
        writer.flush()?;
        writer.get_ref().sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[async_trait]
impl TransactionStore for JsonFileStore {
    async fn insert(&self, record: TransactionRecord) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        let id = record.id;
        self.memory.insert_record(record)?;
        if let Err(e) = self.save().await {
            // Not durable, so it must not count as created.
            self.memory.remove_record(id);
            return Err(e);
        }
        Ok(())
    }

    async fn get(&self, id: u64) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.memory.get_record(id))
    }

    async fn find_by_hash(&self, tx_hash: TxHash) -> Result<Option<TransactionRecord>, StoreError> {
        Ok(self.memory.find_record(tx_hash))
    }

    async fn update_confirmation(
        &self,
        tx_hash: TxHash,
        confirmation: &Confirmation,
    ) -> Result<TransactionRecord, StoreError> {
        let _guard = self.write_lock.lock().await;
        let previous = self
            .memory
            .find_record(tx_hash)
            .ok_or(StoreError::NotFound(tx_hash))?;
        let record = self.memory.confirm_record(tx_hash, confirmation)?;
        if let Err(e) = self.save().await {
            self.memory.restore_record(previous);
            return Err(e);
        }
        Ok(record)
    }

    async fn list_by_status(&self, status: TxStatus) -> Result<Vec<TransactionRecord>, StoreError> {
        Ok(self.memory.records_with(status))
    }
}

impl std::fmt::Debug for JsonFileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JsonFileStore")
            .field("path", &self.path)
            .field("records", &self.memory.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloy::primitives::{Address, U256};

    fn record(id: u64, hash_byte: u8) -> TransactionRecord {
        TransactionRecord {
            id,
            payer_account_ref: "acct".to_string(),
            payer_address: Address::repeat_byte(0x01),
            recipient_address: Address::repeat_byte(0x02),
            tx_hash: TxHash::repeat_byte(hash_byte),
            nonce: id,
            value: U256::from(100u64),
            gas_limit: 21_000,
            gas_price: 1_000_000_000,
            status: TxStatus::Generated,
            auxiliary_tags: vec![],
            created_at: 1,
            confirmed_at: None,
            gas_used: None,
            cumulative_gas_used: None,
            gas_cost: None,
            receipt_status: None,
            block_number: None,
            block_hash: None,
            serialized_transaction: "{}".to_string(),
            serialized_entry: "{}".to_string(),
        }
    }

    fn confirmation() -> Confirmation {
        Confirmation {
            gas_used: 21_000,
            cumulative_gas_used: 42_000,
            gas_cost: U256::from(21_000u64 * 1_000_000_000),
            receipt_status: true,
            block_number: Some(10),
            block_hash: None,
            confirmed_at: 2,
        }
    }

    #[tokio::test]
    async fn test_ids_and_hashes_are_unique() {
        let store = MemoryStore::new();
        store.insert(record(1, 0xaa)).await.unwrap();

        let err = store.insert(record(1, 0xbb)).await.unwrap_err();
        assert!(matches!(err, StoreError::Duplicate(1)));

        let err = store.insert(record(2, 0xaa)).await.unwrap_err();
        assert!(matches!(err, StoreError::DuplicateHash(_)));

        assert_eq!(store.len(), 1);
        assert!(store.get(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_confirmation_updates_record() {
        let store = MemoryStore::new();
        store.insert(record(1, 0xaa)).await.unwrap();
        store.insert(record(2, 0xbb)).await.unwrap();

        let updated = store
            .update_confirmation(TxHash::repeat_byte(0xaa), &confirmation())
            .await
            .unwrap();
        assert!(updated.is_confirmed());
        assert_eq!(updated.gas_used, Some(21_000));
        assert_eq!(updated.block_number, Some(10));

        let generated = store.list_by_status(TxStatus::Generated).await.unwrap();
        assert_eq!(generated.iter().map(|r| r.id).collect::<Vec<_>>(), vec![2]);

        let err = store
            .update_confirmation(TxHash::repeat_byte(0xcc), &confirmation())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_unavailable_store_reports_io() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        let err = store.get(1).await.unwrap_err();
        assert!(err.is_storage_failure());
    }

    #[tokio::test]
    async fn test_file_store_persists_across_reopen() {
        let dir = std::env::temp_dir().join(format!("batch-transfer-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("records.json");

        {
            let store = JsonFileStore::open(&path).unwrap();
            store.insert(record(1, 0xaa)).await.unwrap();
            store.insert(record(2, 0xbb)).await.unwrap();
            store
                .update_confirmation(TxHash::repeat_byte(0xbb), &confirmation())
                .await
                .unwrap();
        }

        let reopened = JsonFileStore::open(&path).unwrap();
        assert_eq!(reopened.get(1).await.unwrap().unwrap().status, TxStatus::Generated);
        assert!(reopened.get(2).await.unwrap().unwrap().is_confirmed());
        assert_eq!(
            reopened.find_by_hash(TxHash::repeat_byte(0xaa)).await.unwrap().map(|r| r.id),
            Some(1)
        );
        assert!(matches!(
            reopened.insert(record(1, 0xcc)).await.unwrap_err(),
            StoreError::Duplicate(1)
        ));

        std::fs::remove_dir_all(&dir).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_file_store_undoes_insert_that_was_not_saved() {
        let dir = std::env::temp_dir().join(format!("batch-transfer-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let store = JsonFileStore::open(dir.join("records.json")).unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let err = store.insert(record(1, 0xaa)).await.unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        assert!(store.get(1).await.unwrap().is_none());
        assert!(store.find_by_hash(TxHash::repeat_byte(0xaa)).await.unwrap().is_none());

        // The id is free again once the file can be written.
        std::fs::create_dir_all(&dir).unwrap();
        store.insert(record(1, 0xaa)).await.unwrap();
        assert!(store.get(1).await.unwrap().is_some());

        std::fs::remove_dir_all(&dir).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_file_store_undoes_confirmation_that_was_not_saved() {
        let dir = std::env::temp_dir().join(format!("batch-transfer-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("records.json");
        let store = JsonFileStore::open(&path).unwrap();
        store.insert(record(1, 0xaa)).await.unwrap();
        std::fs::remove_dir_all(&dir).unwrap();

        let err = store
            .update_confirmation(TxHash::repeat_byte(0xaa), &confirmation())
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Io(_)));
        let kept = store.get(1).await.unwrap().unwrap();
        assert_eq!(kept.status, TxStatus::Generated);
        assert_eq!(kept.gas_used, None);
        assert_eq!(store.list_by_status(TxStatus::Generated).await.unwrap().len(), 1);

        std::fs::remove_dir_all(&dir).unwrap_or_default();
    }

    #[tokio::test]
    async fn test_file_store_rejects_corrupt_file() {
        let dir = std::env::temp_dir().join(format!("batch-transfer-store-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("records.json");
        std::fs::write(&path, "not json").unwrap();

        let err = JsonFileStore::open(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization(_)));

        std::fs::remove_dir_all(&dir).unwrap_or_default();
    }
}
