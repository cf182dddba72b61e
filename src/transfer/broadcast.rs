//! Broadcasting signed transfers and classifying node rejections.

use alloy::primitives::TxHash;
use std::sync::Arc;

use crate::blockchain::{BlockchainError, ChainClient, ReceiptInfo, SignedTransfer};
use crate::blockchain::types::BlockchainResult;
use crate::observability::metrics;

/// What happened to one `eth_sendRawTransaction`.
#[derive(Debug)]
pub enum BroadcastResult {
    Accepted,
    /// The node already holds these exact bytes.
    AlreadyKnown,
    /// The nonce has been consumed by a mined transaction.
    StaleNonce,
    Fatal(BlockchainError),
}

impl BroadcastResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BroadcastResult::Accepted => "accepted",
            BroadcastResult::AlreadyKnown => "already_known",
            BroadcastResult::StaleNonce => "stale_nonce",
            BroadcastResult::Fatal(_) => "fatal",
        }
    }

    /// The transaction is (or was) in the node's hands.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, BroadcastResult::Accepted | BroadcastResult::AlreadyKnown)
    }
}

/// Sort a send failure by the node's error message.
pub fn classify_send_error(error: BlockchainError) -> BroadcastResult {
    let message = error.to_string().to_lowercase();
    if message.contains("already known") || message.contains("known transaction") {
        BroadcastResult::AlreadyKnown
    } else if message.contains("nonce too low") {
        BroadcastResult::StaleNonce
    } else {
        BroadcastResult::Fatal(error)
    }
}

#[derive(Clone)]
pub struct Broadcaster {
    client: Arc<dyn ChainClient>,
}

impl Broadcaster {
    pub fn new(client: Arc<dyn ChainClient>) -> Self {
        Self { client }
    }

    pub async fn broadcast(&self, signed: &SignedTransfer) -> BroadcastResult {
        let result = match self.client.send_raw_transaction(&signed.raw).await {
            Ok(returned) => {
                if returned != signed.hash {
                    tracing::warn!(
                        tx_hash = %signed.hash,
                        node_hash = %returned,
                        "Node reported a different transaction hash"
                    );
                }
                BroadcastResult::Accepted
            }
            Err(e) => classify_send_error(e),
        };

        metrics::record_broadcast(result.as_str());
        match &result {
            BroadcastResult::Accepted => {
                tracing::debug!(tx_hash = %signed.hash, nonce = signed.nonce, "Broadcast accepted")
            }
            BroadcastResult::AlreadyKnown => {
                tracing::info!(tx_hash = %signed.hash, nonce = signed.nonce, "Transaction already known to node")
            }
            BroadcastResult::StaleNonce => {
                tracing::info!(tx_hash = %signed.hash, nonce = signed.nonce, "Nonce already used on chain")
            }
            BroadcastResult::Fatal(e) => {
                tracing::warn!(tx_hash = %signed.hash, nonce = signed.nonce, error = %e, "Broadcast rejected")
            }
        }
        result
    }

    /// Receipt for `tx_hash`, if it has been mined.
    pub async fn receipt(&self, tx_hash: TxHash) -> BlockchainResult<Option<ReceiptInfo>> {
        self.client.transaction_receipt(tx_hash).await
    }
}

impl std::fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broadcaster").finish_non_exhaustive()
    }
}
