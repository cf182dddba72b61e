//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the
//! batch-transfer tool. All types derive Serde traits for deserialization
//! from a TOML file.

use serde::{Deserialize, Serialize};

/// Root configuration.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Chain connection and gas policy.
    pub blockchain: BlockchainConfig,

    /// Transfer engine tuning.
    pub transfer: TransferConfig,

    /// Record store location.
    pub store: StoreConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Blockchain integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlockchainConfig {
    /// JSON-RPC endpoint URL.
    pub rpc_url: String,

    /// Failover JSON-RPC endpoint URLs.
    pub failover_urls: Vec<String>,

    /// Expected chain ID (e.g., 1 for Ethereum mainnet, 31337 for local Anvil).
    pub chain_id: u64,

    /// RPC request timeout in seconds.
    pub rpc_timeout_secs: u64,

    /// Gas price multiplier (1.0 = node suggestion, 1.2 = 20% buffer).
    pub gas_price_multiplier: f64,

    /// Maximum gas price in gwei (protection against spikes).
    pub max_gas_price_gwei: u64,

    /// Gas limit for native value transfers.
    pub gas_limit: u64,

    /// Gas limit for asset contract transfers.
    pub asset_gas_limit: u64,
}

impl Default for BlockchainConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8545".to_string(),
            failover_urls: Vec::new(),
            chain_id: 1,
            rpc_timeout_secs: 10,
            gas_price_multiplier: 1.2,
            max_gas_price_gwei: 500,
            gas_limit: 21_000,
            asset_gas_limit: 100_000,
        }
    }
}

/// Transfer engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Pause after each nonce allocation so the node's pending view catches up.
    pub nonce_settle_ms: u64,

    /// Interval between receipt polling ticks in seconds.
    pub receipt_poll_secs: u64,

    /// How long to wait for confirmations after submission, in seconds.
    pub monitor_timeout_secs: u64,

    /// Asset contract address. When set, transfers move this asset instead
    /// of native value.
    pub asset_contract: Option<String>,

    /// Drop a nonce from the live set when its broadcast fails fatally.
    pub release_nonce_on_fatal: bool,

    /// Re-register unconfirmed stored records with the monitor before a run.
    pub recover_pending: bool,

    /// Refuse to start a batch the wallet cannot fund.
    pub check_balance: bool,

    /// Headroom applied to the gas price in the balance check.
    pub balance_gas_multiplier: u64,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            nonce_settle_ms: 5_000,
            receipt_poll_secs: 15,
            monitor_timeout_secs: 600,
            asset_contract: None,
            release_nonce_on_fatal: true,
            recover_pending: false,
            check_balance: true,
            balance_gas_multiplier: 10,
        }
    }
}

/// Record store configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path of the JSON file holding transaction records.
    pub path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "transfers.json".to_string(),
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
