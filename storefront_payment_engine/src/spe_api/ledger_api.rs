use std::fmt::Debug;

use chrono::Utc;
use log::*;
use spg_common::{TenantId, TokenAmount};

use crate::{
    config::EngineSettings,
    db_types::{Balance, LedgerEntry, OrderId},
    traits::{InsertEntryResult, StorefrontDatabase, StorefrontError},
};

/// `LedgerApi` exposes the profit ledger: balances, history, the maturity sweep and refunds.
pub struct LedgerApi<B> {
    db: B,
    config: EngineSettings,
}

impl<B> Debug for LedgerApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LedgerApi")
    }
}

impl<B> LedgerApi<B> {
    pub fn new(db: B, config: EngineSettings) -> Self {
        Self { db, config }
    }
}

impl<B> LedgerApi<B>
where B: StorefrontDatabase
{
    /// Records the profit for a credited order as a pending entry maturing after the configured
    /// window. Idempotent per order id; a duplicate call is logged and returns the original.
    ///
    /// The credit transaction appends this entry itself; the API method exists for manual
    /// corrections and for storefronts that settle off-chain.
    pub async fn record_profit(
        &self,
        tenant: &TenantId,
        order_id: &OrderId,
        amount: TokenAmount,
    ) -> Result<InsertEntryResult, StorefrontError> {
        let mature_at = Utc::now() + self.config.maturity_window;
        let result = self.db.record_profit(tenant, order_id, amount, mature_at).await?;
        match &result {
            InsertEntryResult::Inserted(entry) => {
                debug!(
                    "🧾️ Recorded {} profit for order [{}] (tenant {}), maturing at {}",
                    entry.amount, entry.order_id, entry.tenant_id, entry.mature_at
                );
            },
            InsertEntryResult::AlreadyRecorded(entry) => {
                info!(
                    "🧾️ Duplicate profit record for order [{}] prevented; entry #{} stands",
                    entry.order_id, entry.id
                );
            },
        }
        Ok(result)
    }

    /// Appends the refund entry offsetting an order's sale profit.
    pub async fn revert_order_profit(&self, order_id: &OrderId) -> Result<LedgerEntry, StorefrontError> {
        let refund = self.db.revert_order_profit(order_id).await?;
        info!(
            "🧾️ Sale profit for order [{}] reverted: refund entry #{} of {}",
            refund.order_id, refund.id, refund.amount
        );
        Ok(refund)
    }

    /// Flips every pending entry past its maturity time to matured. The maturity worker calls
    /// this on a fixed timer.
    pub async fn mature_entries(&self) -> Result<u64, StorefrontError> {
        let count = self.db.mature_ledger_entries(Utc::now()).await?;
        if count > 0 {
            info!("🧾️ {count} ledger entries matured");
        }
        Ok(count)
    }

    /// The tenant's balance, recomputed from the ledger on every call.
    pub async fn balance(&self, tenant: &TenantId) -> Result<Balance, StorefrontError> {
        self.db.balance_for_tenant(tenant).await
    }

    pub async fn history(&self, tenant: &TenantId, limit: i64) -> Result<Vec<LedgerEntry>, StorefrontError> {
        self.db.ledger_history(tenant, limit).await
    }

    pub async fn entries_for_order(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, StorefrontError> {
        self.db.ledger_entries_for_order(order_id).await
    }

    pub fn db(&self) -> &B {
        &self.db
    }
}
