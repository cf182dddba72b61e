//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Config → transfer kind → chain client (chain id verified)
//!         → wallet → assembler → record store → BatchOrchestrator
//!
//! Cancellation (shutdown.rs):
//!     Shutdown::trigger → every ShutdownSignal resolves
//!         → submission stops, monitoring ends, pending reported unconfirmed
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Shutdown::trigger
//! ```
//!
//! # Design Decisions
//! - Fail fast: any startup error is fatal
//! - Cancellation is cooperative; records already written stay written

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::{Shutdown, ShutdownSignal};
