//! Transaction lifecycle engine.
//!
//! # Data Flow
//! ```text
//! TransferEntry list
//!     → orchestrator.rs (validate recipient, dedupe ids)
//!     → idempotency.rs (lookup: replay stored tx, skip confirmed, reject mismatches)
//!     → nonce.rs (allocate, only when nothing is stored)
//!     → TransactionAssembler (build + sign)
//!     → idempotency.rs (create record, before anything is sent)
//!     → broadcast.rs (send + classify: accepted / already known / stale nonce / fatal)
//!     → monitor.rs (poll receipts, mark confirmed, release nonce)
//!     → BatchReport
//! ```
//!
//! # Design Decisions
//! - A record is persisted before its transaction is broadcast, so a
//!   crashed run can only ever replay the same signed bytes
//! - One polling loop serves every pending transaction of a run
//! - Only record store failures abort a run; everything else is per entry

pub mod broadcast;
pub mod error;
pub mod idempotency;
pub mod monitor;
pub mod nonce;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use broadcast::{classify_send_error, BroadcastResult, Broadcaster};
pub use error::{StoreError, TransferError, TransferResult};
pub use idempotency::{IdempotencyStore, StoredTransfer};
pub use monitor::{MonitorOutcome, ReceiptMonitor};
pub use nonce::{NonceAllocator, NonceLedger};
pub use orchestrator::{BatchOrchestrator, EngineOptions};
pub use store::{JsonFileStore, MemoryStore, TransactionStore};
pub use types::{BatchReport, EntryReport, Outcome, TransactionRecord, TransferEntry, TxStatus};
