use std::fmt::Debug;

use chrono::{DateTime, Utc};
use log::*;
use spg_common::{TenantId, TokenAmount, TokenAmountError};

use crate::{
    config::EngineSettings,
    db_types::{NewTransfer, Order, OrderId, OrderStatusType, TenantStatus, TransferRecord, TransferState},
    events::{EventProducers, OrderPaidEvent, TransferUnmatchedEvent},
    helpers::TokenAddress,
    traits::{
        ChainClient,
        ChainClientError,
        CreditOutcome,
        CreditReceipt,
        ObservedTransfer,
        ScanSummary,
        StorefrontDatabase,
        StorefrontError,
    },
};

/// `SettlementApi` turns raw on-chain observations into credited orders and ledger entries.
///
/// The pipeline for every observed transfer is fixed: normalize, record (idempotent on txid),
/// token filter, confirmation gate, order match, then the atomic credit. A transfer that stalls
/// at any stage is left in a state the next pass can pick up from; a transfer that completes can
/// never be credited a second time.
///
/// Every write goes through [`StorefrontDatabase`]; the only upstream dependency is a
/// [`ChainClient`] for the transfer feed and confirmation counts, retried with exponential
/// backoff when the upstream is flaky.
pub struct SettlementApi<B, C> {
    db: B,
    chain: C,
    config: EngineSettings,
    producers: EventProducers,
}

impl<B, C> Debug for SettlementApi<B, C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "SettlementApi")
    }
}

impl<B, C> SettlementApi<B, C> {
    pub fn new(db: B, chain: C, config: EngineSettings, producers: EventProducers) -> Self {
        Self { db, chain, config, producers }
    }
}

impl<B, C> SettlementApi<B, C>
where
    B: StorefrontDatabase,
    C: ChainClient,
{
    /// Runs one observed transfer through the full pipeline and reports what became of it.
    ///
    /// Only infrastructure failures surface as `Err`. Everything that is business-as-usual for a
    /// payment watcher, including duplicates, wrong-token payments, shallow confirmations and
    /// transfers nobody ordered, comes back as a [`CreditOutcome`] so batch callers can keep
    /// going and tally.
    pub async fn process_observed(
        &self,
        tenant: &TenantId,
        observed: ObservedTransfer,
    ) -> Result<CreditOutcome, StorefrontError> {
        let txid = observed.txid.clone();
        // Normalize before anything touches the database, so a txid seen in hex and in Base58
        // lands on the same row.
        let sender = TokenAddress::parse(&observed.sender)?;
        let recipient = TokenAddress::parse(&observed.recipient)?;
        let contract = TokenAddress::parse(&observed.contract)?;
        let wrong_token = contract != self.config.token_contract;
        let amount = TokenAmount::from_raw_token(observed.raw_amount, self.config.token_decimals)?;
        let raw_amount = i64::try_from(observed.raw_amount)
            .map_err(|_| TokenAmountError(format!("raw amount {} overflows storage", observed.raw_amount)))?;
        let new_transfer = NewTransfer {
            txid: txid.clone(),
            sender,
            recipient,
            contract,
            raw_amount,
            amount,
            block_time: observed.block_time,
            tenant_id: tenant.clone(),
            state: if wrong_token { TransferState::Rejected } else { TransferState::Unprocessed },
        };
        let result = self.db.record_transfer(new_transfer).await?;
        let record = result.record().clone();
        if !result.is_new() {
            match record.state {
                TransferState::Credited => {
                    debug!("💱️ Transfer {txid} was credited before. Nothing to do");
                    return Ok(CreditOutcome::AlreadyCredited(txid));
                },
                TransferState::Rejected => return Ok(CreditOutcome::Rejected(txid)),
                _ => {},
            }
        }
        if wrong_token {
            info!(
                "💱️ Transfer {txid} pays token {} rather than the settlement token. Recorded as rejected",
                record.contract
            );
            return Ok(CreditOutcome::Rejected(txid));
        }
        self.gate_and_match(record).await
    }

    /// Re-runs the pipeline for a single recorded transfer, typically after support has fixed
    /// whatever kept it from matching the first time.
    pub async fn rescan_by_txid(&self, txid: &str) -> Result<CreditOutcome, StorefrontError> {
        let record = self
            .db
            .transfer_by_txid(txid)
            .await?
            .ok_or_else(|| StorefrontError::TransferNotFound(txid.to_string()))?;
        match record.state {
            TransferState::Credited => Ok(CreditOutcome::AlreadyCredited(record.txid)),
            TransferState::Rejected => Ok(CreditOutcome::Rejected(record.txid)),
            _ => self.gate_and_match(record).await,
        }
    }

    /// The mirror rescan: starts from an order and hunts for a recorded transfer that pays it.
    /// `Ok(None)` means no compatible transfer is on file, which for support is an answer, not
    /// an error.
    pub async fn rescan_by_order(&self, order_id: &OrderId) -> Result<Option<CreditOutcome>, StorefrontError> {
        let order = self
            .db
            .order_by_id(order_id)
            .await?
            .ok_or_else(|| StorefrontError::OrderNotFound(order_id.clone()))?;
        if matches!(order.status, OrderStatusType::Paid | OrderStatusType::Fulfilled) {
            let txid = order.txid.clone().unwrap_or_default();
            debug!("💱️ Order [{order_id}] is already {}. Nothing to rescan", order.status);
            return Ok(Some(CreditOutcome::AlreadyCredited(txid)));
        }
        let candidates =
            self.db.transfers_compatible_with_order(&order, self.config.match_window, self.config.match_tolerance).await?;
        let Some(record) = candidates.first().cloned() else {
            info!("💱️ No recorded transfer is compatible with order [{order_id}]");
            return Ok(None);
        };
        if candidates.len() > 1 {
            warn!(
                "💱️ {} transfers are compatible with order [{order_id}]. Crediting the oldest, {}",
                candidates.len(),
                record.txid
            );
        }
        if let Some(blocked) = self.confirmation_gate(&record.txid).await {
            return Ok(Some(blocked));
        }
        self.credit(&record, &order).await.map(Some)
    }

    /// Sweeps every transfer of the tenant that is still awaiting a match through the pipeline
    /// again. Called on watcher startup for crash recovery and available to support as a manual
    /// batch rescan.
    pub async fn scan_pending(&self, tenant: &TenantId) -> Result<ScanSummary, StorefrontError> {
        let waiting = self.db.transfers_awaiting_match(tenant).await?;
        let mut summary = ScanSummary::default();
        for record in waiting {
            let outcome = self.gate_and_match(record).await?;
            summary.tally(&outcome);
        }
        info!("🔁️ Pending scan for tenant {tenant}: {summary}");
        Ok(summary)
    }

    /// One watcher tick: pulls the tenant's fresh transfers from the chain and runs each through
    /// the pipeline. Returns the tick's tally together with the newest block time seen, which
    /// the caller feeds back as the next `since` so the polling window only ever moves forward.
    pub async fn poll_tenant(
        &self,
        tenant: &TenantId,
        since: DateTime<Utc>,
    ) -> Result<(ScanSummary, Option<DateTime<Utc>>), StorefrontError> {
        let profile = self.db.tenant_profile(tenant).await?;
        if !matches!(profile.status, TenantStatus::Active) {
            debug!("👀️ Tenant {tenant} is {}. Skipping the poll", profile.status);
            return Ok((ScanSummary::default(), None));
        }
        let Some(address) = self.config.resolve_deposit_address(&profile.settings()) else {
            warn!("👀️ Tenant {tenant} has no deposit address to watch");
            return Ok((ScanSummary::default(), None));
        };
        let observed = self
            .transfers_with_retry(&address, since)
            .await
            .map_err(|e| StorefrontError::UpstreamUnavailable(e.to_string()))?;
        let mut summary = ScanSummary::default();
        let mut newest = None;
        for transfer in observed {
            newest = newest.max(Some(transfer.block_time));
            match self.process_observed(tenant, transfer).await {
                Ok(outcome) => summary.tally(&outcome),
                // Log and move on. One poisoned transfer must not stall the rest of the batch.
                Err(e) => error!("👀️ Could not process a transfer for tenant {tenant}: {e}"),
            }
        }
        if summary.seen > 0 {
            info!("👀️ Poll for tenant {tenant}: {summary}");
        }
        Ok((summary, newest))
    }

    //------------------------------------ Pipeline stages -------------------------------------

    /// Confirmation gate plus order matching for a transfer that is already on file in a
    /// creditable state.
    async fn gate_and_match(&self, record: TransferRecord) -> Result<CreditOutcome, StorefrontError> {
        let txid = record.txid.clone();
        if let Some(blocked) = self.confirmation_gate(&txid).await {
            return Ok(blocked);
        }
        let candidates =
            self.db.candidate_orders_for_transfer(&record, self.config.match_window, self.config.match_tolerance).await?;
        match candidates.as_slice() {
            [] => self.park_unmatched(&record, "no pending order matches the amount within the window").await,
            [order] => self.credit(&record, order).await,
            [oldest, ..] => {
                let ids = candidates.iter().map(|o| o.order_id.to_string()).collect::<Vec<String>>().join(", ");
                warn!(
                    "💱️ {} orders match transfer {txid} ({ids}). Crediting the oldest, [{}]",
                    candidates.len(),
                    oldest.order_id
                );
                self.credit(&record, oldest).await
            },
        }
    }

    /// `Some(outcome)` when the transfer cannot proceed to matching yet, `None` when it is
    /// buried deep enough.
    async fn confirmation_gate(&self, txid: &str) -> Option<CreditOutcome> {
        match self.confirmations_with_retry(txid).await {
            Ok(confirmations) if confirmations < self.config.min_confirmations => {
                debug!(
                    "💱️ Transfer {txid} has {confirmations} of {} required confirmations. Deferred",
                    self.config.min_confirmations
                );
                Some(CreditOutcome::Deferred {
                    txid: txid.to_string(),
                    confirmations,
                    required: self.config.min_confirmations,
                })
            },
            Ok(_) => None,
            Err(e) => {
                warn!("💱️ Could not fetch the confirmation count for {txid}: {e}");
                Some(CreditOutcome::Upstream { txid: txid.to_string(), error: e.to_string() })
            },
        }
    }

    /// The terminal happy path. Runs the atomic credit transaction and fires the order-paid
    /// hooks. Losing the race to another scanner is reported as `AlreadyCredited`; an expired
    /// order whose stock is gone is parked as unmatched for support.
    async fn credit(&self, record: &TransferRecord, order: &Order) -> Result<CreditOutcome, StorefrontError> {
        let txid = record.txid.clone();
        match self.db.credit_transfer(&txid, &order.order_id, self.config.maturity_window).await {
            Ok(receipt) => {
                let late = if receipt.late { " (late, after expiry)" } else { "" };
                info!(
                    "💰️ Transfer {txid} credited against order [{}]{late}. {} received, {} profit recorded",
                    receipt.order.order_id, receipt.order.total_price, receipt.entry.amount
                );
                self.call_order_paid_hook(&receipt).await;
                Ok(CreditOutcome::Credited(Box::new(receipt)))
            },
            Err(StorefrontError::TransferAlreadyCredited(_)) => {
                debug!("💰️ Transfer {txid} lost the credit race. It has been credited in the meantime");
                Ok(CreditOutcome::AlreadyCredited(txid))
            },
            Err(StorefrontError::OutOfStock(category)) => {
                let reason =
                    format!("expired order [{}] could not be re-stocked from '{category}'", order.order_id);
                self.park_unmatched(record, &reason).await
            },
            Err(e) => Err(e),
        }
    }

    /// Parks the transfer as `Unmatched` and notifies subscribers. The full record goes into the
    /// log as JSON so support can reconcile without a database session.
    async fn park_unmatched(&self, record: &TransferRecord, reason: &str) -> Result<CreditOutcome, StorefrontError> {
        let parked = self.db.mark_transfer_unmatched(&record.txid).await?;
        match serde_json::to_string(&parked) {
            Ok(json) => info!("💱️ Transfer {} parked as unmatched ({reason}): {json}", parked.txid),
            Err(_) => info!("💱️ Transfer {} parked as unmatched ({reason})", parked.txid),
        }
        self.call_transfer_unmatched_hook(&parked, reason).await;
        Ok(CreditOutcome::Unmatched(parked.txid.clone()))
    }

    //----------------------------------- Upstream retries -------------------------------------

    async fn confirmations_with_retry(&self, txid: &str) -> Result<u64, ChainClientError> {
        let mut attempt = 0u32;
        loop {
            match self.chain.confirmations(txid).await {
                Ok(n) => return Ok(n),
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_upstream_attempts => {
                    let delay = backoff_delay(&e, attempt);
                    debug!("💱️ Upstream hiccup fetching confirmations for {txid}: {e}. Retrying in {delay}s");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    async fn transfers_with_retry(
        &self,
        address: &TokenAddress,
        since: DateTime<Utc>,
    ) -> Result<Vec<ObservedTransfer>, ChainClientError> {
        let mut attempt = 0u32;
        loop {
            match self.chain.transfers_to(address, since).await {
                Ok(transfers) => return Ok(transfers),
                Err(e) if e.is_transient() && attempt + 1 < self.config.max_upstream_attempts => {
                    let delay = backoff_delay(&e, attempt);
                    debug!("👀️ Upstream hiccup on the transfer feed: {e}. Retrying in {delay}s");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    attempt += 1;
                },
                Err(e) => return Err(e),
            }
        }
    }

    //---------------------------------------- Hooks -------------------------------------------

    async fn call_order_paid_hook(&self, receipt: &CreditReceipt) {
        for emitter in &self.producers.order_paid_producer {
            debug!("💰️ Notifying order paid hook subscribers");
            let event = OrderPaidEvent::new(receipt.order.clone(), receipt.late);
            emitter.publish_event(event).await;
        }
    }

    async fn call_transfer_unmatched_hook(&self, transfer: &TransferRecord, reason: &str) {
        for emitter in &self.producers.transfer_unmatched_producer {
            debug!("💱️ Notifying unmatched transfer hook subscribers");
            let event = TransferUnmatchedEvent::new(transfer.clone(), reason);
            emitter.publish_event(event).await;
        }
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}

/// Honors an upstream `Retry-After` when one was given, otherwise backs off exponentially
/// starting at one second.
fn backoff_delay(e: &ChainClientError, attempt: u32) -> u64 {
    match e {
        ChainClientError::RateLimited { retry_after: Some(secs) } => *secs,
        _ => 2u64.pow(attempt),
    }
}
