//! Startup orchestration.
//!
//! # Responsibilities
//! - Resolve the transfer kind from configuration
//! - Connect to the chain and check the chain id
//! - Open the record store
//! - Assemble the [`BatchOrchestrator`]
//!
//! Any failure here is fatal; nothing has been signed yet.

use std::sync::Arc;
use thiserror::Error;

use crate::blockchain::{BlockchainError, ChainClient, RpcChainClient, TransactionAssembler, Wallet};
use crate::config::loader::transfer_kind;
use crate::config::{AppConfig, ConfigError, StoreConfig};
use crate::transfer::{BatchOrchestrator, EngineOptions, JsonFileStore, StoreError, TransactionStore};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Blockchain(#[from] BlockchainError),

    #[error("cannot open record store: {0}")]
    Store(#[from] StoreError),
}

/// Build the engine described by `config`, talking to the configured RPC
/// endpoints and persisting to the configured record file.
pub async fn build_engine(config: &AppConfig, wallet: Wallet) -> Result<BatchOrchestrator, StartupError> {
    // Before any network traffic.
    transfer_kind(&config.transfer)?;

    let client = RpcChainClient::new(config.blockchain.clone()).await?;
    client.verify_chain_id().await?;
    let store = open_store(&config.store)?;

    assemble_engine(config, Arc::new(client), wallet, store)
}

/// Wire an engine from already constructed collaborators.
pub fn assemble_engine(
    config: &AppConfig,
    client: Arc<dyn ChainClient>,
    wallet: Wallet,
    store: Arc<dyn TransactionStore>,
) -> Result<BatchOrchestrator, StartupError> {
    let kind = transfer_kind(&config.transfer)?;
    let assembler = TransactionAssembler::new(wallet, kind, &config.blockchain);

    tracing::info!(
        account = %assembler.wallet().address(),
        chain_id = config.blockchain.chain_id,
        kind = ?kind,
        "Transfer engine ready"
    );
    Ok(BatchOrchestrator::new(
        client,
        assembler,
        store,
        EngineOptions::from(&config.transfer),
    ))
}

pub fn open_store(config: &StoreConfig) -> Result<Arc<JsonFileStore>, StoreError> {
    Ok(Arc::new(JsonFileStore::open(&config.path)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blockchain::mock::MockChainClient;
    use crate::transfer::MemoryStore;

    const TEST_PRIVATE_KEY: &str =
        "ac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn wallet() -> Wallet {
        Wallet::from_private_key(TEST_PRIVATE_KEY, 1).unwrap()
    }

    #[tokio::test]
    async fn test_bad_asset_contract_fails_before_connecting() {
        let mut config = AppConfig::default();
        config.blockchain.rpc_url = "http://127.0.0.1:1".to_string();
        config.transfer.asset_contract = Some("not-an-address".to_string());

        let err = build_engine(&config, wallet()).await.unwrap_err();
        assert!(matches!(err, StartupError::Config(_)));
    }

    #[test]
    fn test_assemble_uses_configured_wallet() {
        let config = AppConfig::default();
        let engine = assemble_engine(
            &config,
            Arc::new(MockChainClient::new(1)),
            wallet(),
            Arc::new(MemoryStore::new()),
        )
        .unwrap();
        assert_eq!(engine.account(), wallet().address());
    }

    #[test]
    fn test_open_store_creates_nothing_until_written() {
        let path = std::env::temp_dir().join(format!("batch-transfer-{}.json", uuid::Uuid::new_v4()));
        let config = StoreConfig {
            path: path.to_string_lossy().into_owned(),
        };
        let store = open_store(&config).unwrap();
        assert_eq!(store.path(), path.as_path());
        assert!(!path.exists());
    }
}
