//! Blockchain integration subsystem.
//!
//! # Data Flow
//! ```text
//! Environment variable (private key), config (RPC URLs, gas policy)
//!     → wallet.rs (key loading, signing)
//!     → transaction.rs (build + sign transfers)
//!     → client.rs (ChainClient: nonce, gas price, broadcast, receipts)
//! address.rs validates recipients before anything is built.
//! mock.rs is a scripted ChainClient for tests.
//! ```
//!
//! # Security Constraints
//! - Private keys ONLY from environment variables
//! - Never log private keys or sensitive data
//! - All RPC calls have configurable timeouts

pub mod address;
pub mod client;
pub mod mock;
pub mod transaction;
pub mod types;
pub mod wallet;

pub use address::{AddressValidator, HexAddressValidator};
pub use client::{ChainClient, RpcChainClient};
pub use transaction::{SignedTransfer, TransactionAssembler, TransferKind};
pub use types::{BlockchainConfig, BlockchainError, ChainId, ReceiptInfo};
pub use wallet::Wallet;
