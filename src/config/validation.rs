//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate URLs, addresses and value ranges
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: AppConfig → Result<(), Vec<ValidationError>>

use alloy::primitives::Address;
use thiserror::Error;

use crate::config::schema::AppConfig;

/// A single semantic problem in the configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
}

impl ValidationError {
    fn new(field: &str, message: impl Into<String>) -> Self {
        Self {
            field: field.to_string(),
            message: message.into(),
        }
    }
}

/// Check `config` and collect every problem found.
pub fn validate_config(config: &AppConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();
    let chain = &config.blockchain;

    if chain.rpc_url.parse::<url::Url>().is_err() {
        errors.push(ValidationError::new("blockchain.rpc_url", "not a valid URL"));
    }
    for (i, failover) in chain.failover_urls.iter().enumerate() {
        if failover.parse::<url::Url>().is_err() {
            errors.push(ValidationError::new(
                "blockchain.failover_urls",
                format!("entry {} is not a valid URL", i),
            ));
        }
    }
    if chain.chain_id == 0 {
        errors.push(ValidationError::new("blockchain.chain_id", "must be non-zero"));
    }
    if chain.rpc_timeout_secs == 0 {
        errors.push(ValidationError::new("blockchain.rpc_timeout_secs", "must be > 0"));
    }
    if !(chain.gas_price_multiplier > 0.0) {
        errors.push(ValidationError::new("blockchain.gas_price_multiplier", "must be > 0"));
    }
    if chain.gas_limit < 21_000 {
        errors.push(ValidationError::new("blockchain.gas_limit", "must be at least 21000"));
    }
    if chain.asset_gas_limit < 21_000 {
        errors.push(ValidationError::new("blockchain.asset_gas_limit", "must be at least 21000"));
    }

    let transfer = &config.transfer;
    if transfer.receipt_poll_secs == 0 {
        errors.push(ValidationError::new("transfer.receipt_poll_secs", "must be > 0"));
    }
    if let Some(contract) = &transfer.asset_contract {
        if contract.parse::<Address>().is_err() {
            errors.push(ValidationError::new("transfer.asset_contract", "not a valid address"));
        }
    }

    if config.store.path.trim().is_empty() {
        errors.push(ValidationError::new("store.path", "must not be empty"));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
