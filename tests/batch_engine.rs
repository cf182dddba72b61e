//! End-to-end batch runs against the scripted chain.

mod common;

use alloy::primitives::U256;
use futures_util::future::join_all;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use batch_transfer::blockchain::mock::{MockChainClient, MockSendResponse};
use batch_transfer::lifecycle::{Shutdown, ShutdownSignal};
use batch_transfer::transfer::{JsonFileStore, MemoryStore, Outcome, TransactionStore, TransferError, TxStatus};
use common::*;

#[tokio::test(start_paused = true)]
async fn test_confirmed_batch_is_skipped_on_rerun() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_auto_mine(true);
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let batch = entries(1..=4);

    let first = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(first.succeeded, 4);
    assert_eq!(chain.broadcasts().len(), 4);

    let second = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(second.skipped, 4);
    assert_eq!(second.succeeded, 0);
    assert_eq!(chain.broadcasts().len(), 4, "second run must not broadcast");
}

#[tokio::test(start_paused = true)]
async fn test_interrupted_run_replays_same_transactions() {
    let chain = MockChainClient::new(CHAIN_ID);
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let batch = entries(1..=3);

    // Nothing gets mined before the deadline.
    let first = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, Duration::from_secs(30), &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(first.unconfirmed, 3);
    let first_hashes: HashSet<_> = chain.broadcasts().into_iter().collect();
    assert_eq!(first_hashes.len(), 3);

    // Still in the mempool: the node answers "already known".
    let miner = {
        let chain = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(20)).await;
            chain.mine_all();
        })
    };
    let second = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    miner.await.unwrap();

    assert_eq!(second.succeeded, 3);
    let all_hashes: HashSet<_> = chain.broadcasts().into_iter().collect();
    assert_eq!(all_hashes, first_hashes, "one transaction hash per transfer id");
    for id in 1..=3 {
        let record = store_record(&store, id).await;
        assert_eq!(record.status, TxStatus::Confirmed);
    }
}

#[tokio::test(start_paused = true)]
async fn test_mined_nonce_resolves_by_receipt() {
    let chain = MockChainClient::new(CHAIN_ID);
    let store = Arc::new(MemoryStore::new());
    let config = test_config();
    let batch = vec![entry(1, 500)];

    let first = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(first.unconfirmed, 1);
    let tx_hash = chain.broadcasts()[0];
    chain.mine(tx_hash);

    // Rebroadcast now answers "nonce too low"; the receipt settles it.
    let second = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(second.succeeded, 1);
    assert_eq!(second.failed, 0);
    assert_eq!(second.entries[0].tx_hash, Some(tx_hash));

    let record = store_record(&store, 1).await;
    assert!(record.is_confirmed());
    assert_eq!(record.gas_used, Some(21_000));
}

#[tokio::test(start_paused = true)]
async fn test_stale_nonce_without_our_receipt_fails() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.push_send_response(MockSendResponse::Reject("nonce too low".to_string()));
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &test_config());

    let report = engine
        .run_batch(&[entry(1, 500)], LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.entries[0].tx_hash.is_some());
    assert!(engine.nonces().snapshot().await.live.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_changed_entry_is_rejected_without_broadcast() {
    let chain = MockChainClient::new(CHAIN_ID);
    let store = Arc::new(MemoryStore::new());
    let config = test_config();

    engine_with(&chain, store.clone(), &config)
        .run_batch(&[entry(7, 100)], Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();
    let broadcasts = chain.broadcasts().len();

    let report = engine_with(&chain, store.clone(), &config)
        .run_batch(&[entry(7, 200)], LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.failed, 1);
    let error = report.entries[0].error.clone().unwrap_or_default();
    assert!(error.contains("entry mismatch for id 7"), "{}", error);
    assert_eq!(chain.broadcasts().len(), broadcasts);
    assert_eq!(store_record(&store, 7).await.value, U256::from(100u64));
}

#[tokio::test(start_paused = true)]
async fn test_zero_deadline_reports_unconfirmed_not_failed() {
    let chain = MockChainClient::new(CHAIN_ID);
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &test_config());

    let report = engine
        .run_batch(&entries(1..=3), Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.total, 3);
    assert_eq!(report.unconfirmed, 3);
    assert_eq!(report.failed, 0);
    assert_eq!(report.succeeded, 0);
    assert_eq!(chain.broadcasts().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn test_every_entry_lands_in_one_bucket() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_auto_mine(true);
    let store = Arc::new(MemoryStore::new());
    let config = test_config();

    // Entry 1 is confirmed ahead of time so the real run skips it.
    engine_with(&chain, store.clone(), &config)
        .run_batch(&[entry(1, 10)], LONG, &ShutdownSignal::never())
        .await
        .unwrap();

    let mut invalid = entry(3, 30);
    invalid.recipient = "0x0000000000000000000000000000000000000000".to_string();
    let batch = vec![entry(1, 10), entry(2, 20), invalid, entry(4, 40), entry(2, 20), entry(5, 50)];

    // Entry 4 is rejected by the node; entry 5 is sent but never mined.
    chain.push_send_response(MockSendResponse::Accept);
    chain.push_send_response(MockSendResponse::Reject("insufficient funds for gas".to_string()));
    chain.set_auto_mine(false);
    let confirm_two = {
        let chain = chain.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            let entry_two = chain.broadcasts()[1];
            chain.mine(entry_two);
        })
    };

    let report = engine_with(&chain, store.clone(), &config)
        .run_batch(&batch, Duration::from_secs(60), &ShutdownSignal::never())
        .await
        .unwrap();
    confirm_two.await.unwrap();

    assert_eq!(report.total, 6);
    assert_eq!(report.outcome_of(1), Some(Outcome::Skipped));
    assert_eq!(report.entries[1].outcome, Outcome::Succeeded);
    assert_eq!(report.outcome_of(3), Some(Outcome::Invalid));
    assert_eq!(report.outcome_of(4), Some(Outcome::Failed));
    assert_eq!(report.entries[4].outcome, Outcome::Skipped);
    assert_eq!(report.outcome_of(5), Some(Outcome::Unconfirmed));
    assert_eq!(
        (report.succeeded, report.failed, report.skipped, report.invalid, report.unconfirmed),
        (1, 1, 2, 1, 1)
    );
}

#[tokio::test(start_paused = true)]
async fn test_nonces_follow_input_order() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_pending_nonce(40);
    let store = Arc::new(MemoryStore::new());
    let engine = engine_with(&chain, store.clone(), &test_config());

    engine
        .run_batch(&entries(1..=5), Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();

    let mut nonces = Vec::new();
    for id in 1..=5 {
        nonces.push(store_record(&store, id).await.nonce);
    }
    assert_eq!(nonces, vec![40, 41, 42, 43, 44]);
}

#[tokio::test(start_paused = true)]
async fn test_concurrent_allocations_are_serialised_by_settle_delay() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_pending_nonce(7);
    let mut config = test_config();
    config.transfer.nonce_settle_ms = 5_000;
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &config);

    let never = ShutdownSignal::never();
    let start = tokio::time::Instant::now();
    let allocations = join_all((0..5).map(|_| engine.nonces().allocate(&never))).await;
    let nonces: Vec<u64> = allocations.into_iter().map(|n| n.unwrap()).collect();

    let distinct: HashSet<_> = nonces.iter().copied().collect();
    assert_eq!(distinct.len(), 5);
    assert!(nonces.iter().all(|n| *n >= 7));
    assert!(start.elapsed() >= Duration::from_secs(25));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_before_submission() {
    let chain = MockChainClient::new(CHAIN_ID);
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &test_config());
    let shutdown = Shutdown::new();
    shutdown.trigger();

    let report = engine
        .run_batch(&entries(1..=3), LONG, &shutdown.subscribe())
        .await
        .unwrap();
    assert_eq!(report.unconfirmed, 3);
    assert!(report.entries.iter().all(|e| e.error.as_deref() == Some("cancelled before submission")));
    assert!(chain.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_monitoring() {
    let chain = MockChainClient::new(CHAIN_ID);
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &test_config());
    let shutdown = Shutdown::new();
    let signal = shutdown.subscribe();

    let trigger = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(45)).await;
        shutdown.trigger();
    });
    let start = tokio::time::Instant::now();
    let report = engine.run_batch(&entries(1..=2), LONG, &signal).await.unwrap();
    trigger.await.unwrap();

    assert!(start.elapsed() < LONG);
    assert_eq!(report.unconfirmed, 2);
    assert_eq!(report.failed, 0);
    assert_eq!(chain.broadcasts().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_recovery_confirms_earlier_submissions() {
    let chain = MockChainClient::new(CHAIN_ID);
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config();

    engine_with(&chain, store.clone(), &config)
        .run_batch(&entries(1..=2), Duration::ZERO, &ShutdownSignal::never())
        .await
        .unwrap();
    chain.mine_all();

    config.transfer.recover_pending = true;
    let engine = engine_with(&chain, store.clone(), &config);
    let report = engine
        .run_batch(&[entry(3, 3_000)], Duration::from_secs(60), &ShutdownSignal::never())
        .await
        .unwrap();

    // Only the current batch is counted.
    assert_eq!(report.total, 1);
    assert!(store_record(&store, 1).await.is_confirmed());
    assert!(store_record(&store, 2).await.is_confirmed());
    // Entry 3 drew a nonce above the recovered ones.
    assert_eq!(store_record(&store, 3).await.nonce, 2);
}

#[tokio::test(start_paused = true)]
async fn test_store_failure_aborts_the_run() {
    let chain = MockChainClient::new(CHAIN_ID);
    let store = Arc::new(MemoryStore::new());
    store.set_unavailable(true);
    let engine = engine_with(&chain, store, &test_config());

    let err = engine
        .run_batch(&entries(1..=2), LONG, &ShutdownSignal::never())
        .await
        .unwrap_err();
    assert!(err.aborts_batch());
    assert!(chain.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_insufficient_balance_stops_before_submission() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_balance(U256::from(1_000u64));
    let engine = engine_with(&chain, Arc::new(MemoryStore::new()), &test_config());

    let err = engine
        .run_batch(&entries(1..=2), LONG, &ShutdownSignal::never())
        .await
        .unwrap_err();
    assert!(matches!(err, TransferError::InsufficientBalance { .. }));
    assert!(chain.broadcasts().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_file_store_survives_restart() {
    let dir = std::env::temp_dir().join(format!("batch-transfer-it-{}", uuid::Uuid::new_v4()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("transfers.json");

    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_auto_mine(true);
    let config = test_config();
    let batch = entries(1..=2);

    {
        let store = Arc::new(JsonFileStore::open(&path).unwrap());
        let report = engine_with(&chain, store, &config)
            .run_batch(&batch, LONG, &ShutdownSignal::never())
            .await
            .unwrap();
        assert_eq!(report.succeeded, 2);
    }

    let store = Arc::new(JsonFileStore::open(&path).unwrap());
    let report = engine_with(&chain, store, &config)
        .run_batch(&batch, LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.skipped, 2);
    assert_eq!(chain.broadcasts().len(), 2);

    std::fs::remove_dir_all(&dir).unwrap_or_default();
}

#[tokio::test(start_paused = true)]
async fn test_gas_lookup_failure_leaves_no_nonce_gap() {
    let chain = MockChainClient::new(CHAIN_ID);
    chain.set_auto_mine(true);
    chain.fail_next_gas_price_lookups(1);
    let store = Arc::new(MemoryStore::new());
    let mut config = test_config();
    config.transfer.check_balance = false;
    let engine = engine_with(&chain, store.clone(), &config);

    let report = engine
        .run_batch(&entries(1..=3), LONG, &ShutdownSignal::never())
        .await
        .unwrap();
    assert_eq!(report.outcome_of(1), Some(Outcome::Failed));
    assert_eq!(report.succeeded, 2);
    assert_eq!(report.unconfirmed, 0);

    // The failed entry never took a nonce, so the next one starts at the
    // network pending nonce.
    assert!(store.get(1).await.unwrap().is_none());
    assert_eq!(store_record(&store, 2).await.nonce, 0);
    assert_eq!(store_record(&store, 3).await.nonce, 1);
    assert_eq!(engine.nonces().snapshot().await.highest_issued, Some(1));
}

async fn store_record(store: &MemoryStore, id: u64) -> batch_transfer::transfer::TransactionRecord {
    store.get(id).await.unwrap().unwrap()
}
