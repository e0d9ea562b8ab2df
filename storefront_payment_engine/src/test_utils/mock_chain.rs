use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::{
    helpers::TokenAddress,
    traits::{ChainClient, ChainClientError, ObservedTransfer},
};

/// In-memory stand-in for the upstream transfer feed.
///
/// Tests seed it with transfers and confirmation counts, and can queue one-shot failures to
/// exercise the retry paths. Clones share state, which is what the watcher expects of a real
/// client.
#[derive(Clone, Default)]
pub struct MockChainClient {
    state: Arc<Mutex<MockChainState>>,
}

struct MockChainState {
    transfers: Vec<(TokenAddress, ObservedTransfer)>,
    confirmations: HashMap<String, u64>,
    default_confirmations: u64,
    feed_failures: VecDeque<ChainClientError>,
    confirmation_failures: VecDeque<ChainClientError>,
    confirmation_calls: u64,
}

impl Default for MockChainState {
    fn default() -> Self {
        Self {
            transfers: Vec::new(),
            confirmations: HashMap::new(),
            default_confirmations: 10,
            feed_failures: VecDeque::new(),
            confirmation_failures: VecDeque::new(),
            confirmation_calls: 0,
        }
    }
}

impl MockChainClient {
    pub fn add_transfer(&self, to: &TokenAddress, transfer: ObservedTransfer) {
        self.state.lock().unwrap().transfers.push((to.clone(), transfer));
    }

    /// Pins the confirmation count for one txid. Unlisted transactions report the default of 10.
    pub fn set_confirmations(&self, txid: &str, confirmations: u64) {
        self.state.lock().unwrap().confirmations.insert(txid.to_string(), confirmations);
    }

    /// Queues a one-shot failure for the next `transfers_to` call.
    pub fn fail_next_feed_call(&self, error: ChainClientError) {
        self.state.lock().unwrap().feed_failures.push_back(error);
    }

    /// Queues a one-shot failure for the next `confirmations` call.
    pub fn fail_next_confirmation_call(&self, error: ChainClientError) {
        self.state.lock().unwrap().confirmation_failures.push_back(error);
    }

    /// How many times `confirmations` has been called, failures included.
    pub fn confirmation_calls(&self) -> u64 {
        self.state.lock().unwrap().confirmation_calls
    }
}

#[async_trait]
impl ChainClient for MockChainClient {
    async fn transfers_to(
        &self,
        address: &TokenAddress,
        since: DateTime<Utc>,
    ) -> Result<Vec<ObservedTransfer>, ChainClientError> {
        let mut state = self.state.lock().unwrap();
        if let Some(error) = state.feed_failures.pop_front() {
            return Err(error);
        }
        let result = state
            .transfers
            .iter()
            .filter(|(to, t)| to == address && t.block_time >= since)
            .map(|(_, t)| t.clone())
            .collect();
        Ok(result)
    }

    async fn confirmations(&self, txid: &str) -> Result<u64, ChainClientError> {
        let mut state = self.state.lock().unwrap();
        state.confirmation_calls += 1;
        if let Some(error) = state.confirmation_failures.pop_front() {
            return Err(error);
        }
        Ok(state.confirmations.get(txid).copied().unwrap_or(state.default_confirmations))
    }
}
