//! Metrics collection and exposition.
//!
//! # Metrics
//! - `transfer_outcomes_total` (counter): entries by final outcome
//! - `transfer_broadcasts_total` (counter): broadcast attempts by classified result
//! - `transfer_nonce_allocations_total` (counter): nonces handed out
//! - `transfer_pending_submissions` (gauge): submissions awaiting a receipt
//! - `transfer_live_nonces` (gauge): issued nonces not yet confirmed

use metrics::{counter, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;

/// Start the Prometheus scrape endpoint on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_outcome(outcome: &'static str) {
    counter!("transfer_outcomes_total", "outcome" => outcome).increment(1);
}

pub fn record_broadcast(result: &'static str) {
    counter!("transfer_broadcasts_total", "result" => result).increment(1);
}

pub fn record_nonce_allocation() {
    counter!("transfer_nonce_allocations_total").increment(1);
}

pub fn record_pending_submissions(count: usize) {
    gauge!("transfer_pending_submissions").set(count as f64);
}

pub fn record_live_nonces(count: usize) {
    gauge!("transfer_live_nonces").set(count as f64);
}
