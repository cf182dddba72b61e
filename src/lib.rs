//! Batch transfer engine for EVM chains.

pub mod blockchain;
pub mod config;
pub mod lifecycle;
pub mod observability;
pub mod transfer;

pub use config::schema::AppConfig;
pub use lifecycle::Shutdown;
pub use transfer::{BatchOrchestrator, BatchReport, TransferEntry};
