//! Transaction assembly and signing.
//!
//! # Responsibilities
//! - Apply the gas price policy (multiplier, hard cap)
//! - Build legacy EIP-155 transactions for each transfer kind
//! - Sign and encode them into a replayable [`SignedTransfer`]

use alloy::consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy::eips::eip2718::Encodable2718;
use alloy::primitives::{Address, Bytes, TxHash, TxKind, U256};
use alloy::sol;
use alloy::sol_types::SolCall;
use serde::{Deserialize, Serialize};

use crate::blockchain::types::{BlockchainConfig, BlockchainError, BlockchainResult};
use crate::blockchain::wallet::Wallet;

sol! {
    /// Token transfer used for alternate-asset settlement.
    function transfer(address to, uint256 amount) returns (bool);
}

const WEI_PER_GWEI: u128 = 1_000_000_000;

/// What a transfer moves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TransferKind {
    /// Native value sent straight to the recipient.
    #[default]
    Standard,
    /// Balance of an asset contract, moved with `transfer(address,uint256)`.
    AlternateAsset { contract: Address },
}

/// A signed transaction together with the fields the engine needs later.
///
/// Persisted as the record's serialized transaction so a re-run can
/// rebroadcast the exact same bytes instead of signing again.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransfer {
    pub hash: TxHash,
    pub nonce: u64,
    pub gas_price: u128,
    pub gas_limit: u64,
    pub from: Address,
    /// Beneficiary of the transfer (not the asset contract).
    pub recipient: Address,
    pub amount: U256,
    pub kind: TransferKind,
    /// EIP-2718 encoding, ready for `eth_sendRawTransaction`.
    pub raw: Bytes,
}

/// Builds and signs transfers for one wallet.
#[derive(Debug, Clone)]
pub struct TransactionAssembler {
    wallet: Wallet,
    kind: TransferKind,
    gas_limit: u64,
    gas_price_multiplier: f64,
    max_gas_price_gwei: u64,
}

impl TransactionAssembler {
    pub fn new(wallet: Wallet, kind: TransferKind, config: &BlockchainConfig) -> Self {
        let gas_limit = match kind {
            TransferKind::Standard => config.gas_limit,
            TransferKind::AlternateAsset { .. } => config.asset_gas_limit,
        };
        Self {
            wallet,
            kind,
            gas_limit,
            gas_price_multiplier: config.gas_price_multiplier,
            max_gas_price_gwei: config.max_gas_price_gwei,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn kind(&self) -> TransferKind {
        self.kind
    }

    pub fn gas_limit(&self) -> u64 {
        self.gas_limit
    }

    /// Turn the node's suggestion into the price we sign with. The cap
    /// applies to the multiplied price.
    pub fn adjust_gas_price(&self, suggested: u128) -> BlockchainResult<u128> {
        let adjusted = (suggested as f64 * self.gas_price_multiplier) as u128;
        if adjusted > self.max_gas_price_gwei as u128 * WEI_PER_GWEI {
            return Err(BlockchainError::GasPriceTooHigh {
                current_gwei: u64::try_from(adjusted / WEI_PER_GWEI).unwrap_or(u64::MAX),
                max_gwei: self.max_gas_price_gwei,
            });
        }
        Ok(adjusted)
    }

    /// Build the unsigned transaction for a transfer.
    pub fn build(&self, nonce: u64, gas_price: u128, recipient: Address, amount: U256) -> TxLegacy {
        let (to, value, input) = match self.kind {
            TransferKind::Standard => (recipient, amount, Bytes::new()),
            TransferKind::AlternateAsset { contract } => {
                let call = transferCall {
                    to: recipient,
                    amount,
                };
                (contract, U256::ZERO, Bytes::from(call.abi_encode()))
            }
        };

        TxLegacy {
            chain_id: Some(self.wallet.chain_id()),
            nonce,
            gas_price,
            gas_limit: self.gas_limit,
            to: TxKind::Call(to),
            value,
            input,
        }
    }

    /// Sign `tx`, which must have been built by [`Self::build`] for
    /// `recipient` and `amount`.
    pub fn sign(&self, mut tx: TxLegacy, recipient: Address, amount: U256) -> BlockchainResult<SignedTransfer> {
        let signature = self.wallet.sign_transaction(&mut tx)?;
        let (nonce, gas_price, gas_limit) = (tx.nonce, tx.gas_price, tx.gas_limit);

        let envelope = TxEnvelope::Legacy(tx.into_signed(signature));
        let hash = *envelope.tx_hash();
        let raw = Bytes::from(envelope.encoded_2718());

        Ok(SignedTransfer {
            hash,
            nonce,
            gas_price,
            gas_limit,
            from: self.wallet.address(),
            recipient,
            amount,
            kind: self.kind,
            raw,
        })
    }
}
