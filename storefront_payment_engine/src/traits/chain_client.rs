use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::helpers::TokenAddress;

/// One transfer as reported by the upstream feed, before any normalization. Addresses may be in
/// either textual encoding; the amount is the raw on-chain integer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTransfer {
    pub txid: String,
    pub sender: String,
    pub recipient: String,
    pub contract: String,
    pub raw_amount: u64,
    pub block_time: DateTime<Utc>,
}

/// Read-only view onto the blockchain, supplied by an external collaborator.
///
/// The engine only ever asks two questions: which transfers has an address received since a
/// given time, and how deep is a given transaction buried. `spg_watcherd` answers them over
/// HTTP; tests answer them from memory. Boxed futures (`async_trait`) so watcher tasks can
/// hold them across `tokio::spawn` boundaries.
#[async_trait]
pub trait ChainClient: Clone + Send + Sync + 'static {
    /// Transfers received by `address` with a block time at or after `since`, any token.
    async fn transfers_to(
        &self,
        address: &TokenAddress,
        since: DateTime<Utc>,
    ) -> Result<Vec<ObservedTransfer>, ChainClientError>;

    /// Current confirmation count for the transaction: latest block - inclusion block + 1.
    async fn confirmations(&self, txid: &str) -> Result<u64, ChainClientError>;
}

#[derive(Debug, Clone, Error)]
pub enum ChainClientError {
    #[error("Upstream rate limit hit")]
    RateLimited { retry_after: Option<u64> },
    #[error("Upstream network failure: {0}")]
    Network(String),
    #[error("Upstream returned an unusable response: {0}")]
    InvalidResponse(String),
    #[error("Transaction {0} is not known upstream")]
    TxNotFound(String),
}

impl ChainClientError {
    /// Transient failures are worth retrying with backoff; the rest are not.
    pub fn is_transient(&self) -> bool {
        matches!(self, ChainClientError::RateLimited { .. } | ChainClientError::Network(_))
    }
}
