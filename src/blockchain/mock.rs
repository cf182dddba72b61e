//! A scripted in-memory chain used by tests.
//!
//! Default send behaviour mirrors a real node: a new transaction is
//! accepted, resending one that sits in the mempool answers
//! "already known", and resending one that has been mined answers
//! "nonce too low". Tests can queue explicit responses to override this.

use alloy::primitives::{keccak256, Address, TxHash, B256, U256};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::blockchain::client::ChainClient;
use crate::blockchain::types::{BlockchainError, BlockchainResult, ChainId, ReceiptInfo};

/// Scripted answer for the next `send_raw_transaction` call.
#[derive(Debug, Clone)]
pub enum MockSendResponse {
    Accept,
    /// Reject with this node error message.
    Reject(String),
}

#[derive(Clone, Debug)]
pub struct MockChainClient {
    chain_id: u64,
    pending_nonce: Arc<AtomicU64>,
    gas_price: Arc<Mutex<u128>>,
    balance: Arc<Mutex<U256>>,
    block_number: Arc<AtomicU64>,
    auto_mine: Arc<AtomicBool>,
    send_responses: Arc<Mutex<VecDeque<MockSendResponse>>>,
    /// Every raw transaction handed to `send_raw_transaction`, in order.
    broadcasts: Arc<Mutex<Vec<TxHash>>>,
    mempool: Arc<Mutex<HashSet<TxHash>>>,
    receipts: Arc<Mutex<HashMap<TxHash, ReceiptInfo>>>,
    receipt_failures: Arc<AtomicUsize>,
    gas_price_failures: Arc<AtomicUsize>,
    receipt_queries: Arc<AtomicUsize>,
}

impl MockChainClient {
    pub fn new(chain_id: u64) -> Self {
        Self {
            chain_id,
            pending_nonce: Arc::new(AtomicU64::new(0)),
            gas_price: Arc::new(Mutex::new(1_000_000_000)),
            balance: Arc::new(Mutex::new(U256::MAX)),
            block_number: Arc::new(AtomicU64::new(100)),
            auto_mine: Arc::new(AtomicBool::new(false)),
            send_responses: Default::default(),
            broadcasts: Default::default(),
            mempool: Default::default(),
            receipts: Default::default(),
            receipt_failures: Arc::new(AtomicUsize::new(0)),
            gas_price_failures: Arc::new(AtomicUsize::new(0)),
            receipt_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Set the nonce the node reports as pending.
    pub fn set_pending_nonce(&self, nonce: u64) {
        self.pending_nonce.store(nonce, Ordering::SeqCst);
    }

    pub fn set_gas_price(&self, wei: u128) {
        *lock(&self.gas_price) = wei;
    }

    pub fn set_balance(&self, balance: U256) {
        *lock(&self.balance) = balance;
    }

    /// Mine accepted transactions immediately.
    pub fn set_auto_mine(&self, enabled: bool) {
        self.auto_mine.store(enabled, Ordering::SeqCst);
    }

    pub fn push_send_response(&self, response: MockSendResponse) {
        lock(&self.send_responses).push_back(response);
    }

    /// Make the next `count` receipt lookups fail with an RPC error.
    pub fn fail_next_receipt_lookups(&self, count: usize) {
        self.receipt_failures.store(count, Ordering::SeqCst);
    }

    /// Include `tx_hash` in a block.
    /// Make the next `count` gas price lookups fail.
    pub fn fail_next_gas_price_lookups(&self, count: usize) {
        self.gas_price_failures.store(count, Ordering::SeqCst);
    }

    pub fn mine(&self, tx_hash: TxHash) {
        self.mine_with_status(tx_hash, true);
    }

    pub fn mine_with_status(&self, tx_hash: TxHash, status: bool) {
        let block = self.block_number.fetch_add(1, Ordering::SeqCst) + 1;
        lock(&self.mempool).remove(&tx_hash);
        lock(&self.receipts).insert(
            tx_hash,
            ReceiptInfo {
                tx_hash,
                block_number: Some(block),
                block_hash: Some(B256::left_padding_from(&block.to_be_bytes())),
                gas_used: 21_000,
                cumulative_gas_used: 21_000,
                status,
            },
        );
    }

    /// Mine everything currently in the mempool.
    pub fn mine_all(&self) {
        let pending: Vec<TxHash> = lock(&self.mempool).iter().copied().collect();
        for tx_hash in pending {
            self.mine(tx_hash);
        }
    }

    pub fn broadcasts(&self) -> Vec<TxHash> {
        lock(&self.broadcasts).clone()
    }

    pub fn is_mined(&self, tx_hash: &TxHash) -> bool {
        lock(&self.receipts).contains_key(tx_hash)
    }

    pub fn receipt_queries(&self) -> usize {
        self.receipt_queries.load(Ordering::SeqCst)
    }

    fn default_send(&self, tx_hash: TxHash) -> BlockchainResult<TxHash> {
        if self.is_mined(&tx_hash) {
            return Err(BlockchainError::Rpc("nonce too low".to_string()));
        }
        if !lock(&self.mempool).insert(tx_hash) {
            return Err(BlockchainError::Rpc("already known".to_string()));
        }
        if self.auto_mine.load(Ordering::SeqCst) {
            self.mine(tx_hash);
        }
        Ok(tx_hash)
    }
}

fn take_failure(remaining: &AtomicUsize) -> bool {
    remaining
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn pending_nonce(&self, _account: Address) -> BlockchainResult<u64> {
        Ok(self.pending_nonce.load(Ordering::SeqCst))
    }

    async fn gas_price(&self) -> BlockchainResult<u128> {
        if take_failure(&self.gas_price_failures) {
            return Err(BlockchainError::Rpc("gas price unavailable".to_string()));
        }
        Ok(*lock(&self.gas_price))
    }

    async fn send_raw_transaction(&self, raw: &[u8]) -> BlockchainResult<TxHash> {
        let tx_hash = keccak256(raw);
        lock(&self.broadcasts).push(tx_hash);

        let scripted = lock(&self.send_responses).pop_front();
        match scripted {
            Some(MockSendResponse::Accept) => {
                lock(&self.mempool).insert(tx_hash);
                if self.auto_mine.load(Ordering::SeqCst) {
                    self.mine(tx_hash);
                }
                Ok(tx_hash)
            }
            Some(MockSendResponse::Reject(message)) => Err(BlockchainError::Rpc(message)),
            None => self.default_send(tx_hash),
        }
    }

    async fn transaction_receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        self.receipt_queries.fetch_add(1, Ordering::SeqCst);
        if take_failure(&self.receipt_failures) {
            return Err(BlockchainError::Rpc("connection reset".to_string()));
        }
        Ok(lock(&self.receipts).get(&tx_hash).cloned())
    }

    async fn chain_id(&self) -> BlockchainResult<ChainId> {
        Ok(ChainId(self.chain_id))
    }

    async fn balance(&self, _account: Address) -> BlockchainResult<U256> {
        Ok(*lock(&self.balance))
    }
}
