//! Shared utilities for engine integration tests.

#![allow(dead_code)]

use alloy::primitives::U256;
use std::sync::Arc;
use std::time::Duration;

use batch_transfer::blockchain::mock::MockChainClient;
use batch_transfer::blockchain::Wallet;
use batch_transfer::config::AppConfig;
use batch_transfer::lifecycle::startup::assemble_engine;
use batch_transfer::transfer::{BatchOrchestrator, TransactionStore, TransferEntry};

/// Anvil's first development key.
pub const TEST_PRIVATE_KEY: &str =
    "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

/// Anvil's second development account, checksummed.
pub const RECIPIENT: &str = "0x70997970C51812dc3A010C7d01b50e0d17dc79C8";

pub const CHAIN_ID: u64 = 31337;

/// Engine configuration for tests: no settle delay, 15s polling.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.blockchain.chain_id = CHAIN_ID;
    config.blockchain.gas_price_multiplier = 1.0;
    config.transfer.nonce_settle_ms = 0;
    config.transfer.receipt_poll_secs = 15;
    config
}

pub fn engine_with(
    chain: &MockChainClient,
    store: Arc<dyn TransactionStore>,
    config: &AppConfig,
) -> BatchOrchestrator {
    let wallet = Wallet::from_private_key(TEST_PRIVATE_KEY, CHAIN_ID).unwrap();
    assemble_engine(config, Arc::new(chain.clone()), wallet, store).unwrap()
}

pub fn entry(id: u64, amount: u64) -> TransferEntry {
    TransferEntry {
        id,
        payer_account_ref: format!("account-{}", id),
        amount: U256::from(amount),
        recipient: RECIPIENT.to_string(),
        auxiliary_tags: vec![id as i64 * 10],
    }
}

pub fn entries(ids: std::ops::RangeInclusive<u64>) -> Vec<TransferEntry> {
    ids.map(|id| entry(id, 1_000 * id)).collect()
}

pub const LONG: Duration = Duration::from_secs(600);
