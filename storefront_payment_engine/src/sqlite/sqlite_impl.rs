//! `SqliteDatabase` is a concrete implementation of the storefront ledger backend.
//!
//! Unsurprisingly, it uses SQLite as the backend and implements the [`StorefrontDatabase`] trait.
//! Every multi-step write runs inside one transaction; an early return drops the transaction and
//! rolls everything back.
use std::fmt::Debug;

use chrono::{DateTime, Duration, Utc};
use log::*;
use spg_common::{TenantId, TokenAmount};
use sqlx::SqlitePool;

use super::db::{db_url, inventory, ledger, new_pool, orders, tenants, transfers, withdrawals};
use crate::{
    db_types::{
        Balance,
        InventoryUnit,
        LedgerEntry,
        LedgerEntryKind,
        LedgerStatus,
        NewOrder,
        NewTransfer,
        Order,
        OrderId,
        OrderStatusType,
        TenantProfile,
        TenantSettings,
        TenantStatus,
        TransferRecord,
        TransferState,
        Withdrawal,
        WithdrawalStatus,
    },
    spe_api::order_objects::OrderQueryFilter,
    traits::{
        CreditReceipt,
        ExpiryOutcome,
        InsertEntryResult,
        InsertTransferResult,
        SettledWithdrawal,
        StorefrontDatabase,
        StorefrontError,
    },
};

#[derive(Clone)]
pub struct SqliteDatabase {
    url: String,
    pool: SqlitePool,
}

impl Debug for SqliteDatabase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "SqliteDatabase ({:?})", self.pool)
    }
}

impl SqliteDatabase {
    /// Creates a new database API object
    pub async fn new(max_connections: u32) -> Result<Self, sqlx::Error> {
        let url = db_url();
        SqliteDatabase::new_with_url(url.as_str(), max_connections).await
    }

    pub async fn new_with_url(url: &str, max_connections: u32) -> Result<Self, sqlx::Error> {
        trace!("Creating new database connection pool with url {url}");
        let pool = new_pool(url, max_connections).await?;
        let url = url.to_string();
        Ok(Self { url, pool })
    }

    /// Returns a reference to the database connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

impl StorefrontDatabase for SqliteDatabase {
    fn url(&self) -> &str {
        self.url.as_str()
    }

    //----------------------------------------- Tenants ----------------------------------------

    async fn upsert_tenant(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        tenants::idempotent_insert(id, &mut conn).await
    }

    async fn tenant_profile(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        tenants::fetch_tenant(id, &mut conn).await?.ok_or_else(|| StorefrontError::TenantNotFound(id.clone()))
    }

    async fn set_tenant_status(&self, id: &TenantId, status: TenantStatus) -> Result<TenantProfile, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        tenants::set_status(id, status, &mut conn).await
    }

    async fn update_tenant_settings(
        &self,
        id: &TenantId,
        settings: TenantSettings,
    ) -> Result<TenantProfile, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        tenants::update_settings(id, settings, &mut conn).await
    }

    async fn active_tenants(&self) -> Result<Vec<TenantProfile>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = tenants::fetch_active_tenants(&mut conn).await?;
        Ok(result)
    }

    //---------------------------------------- Inventory ---------------------------------------

    async fn add_inventory_units(&self, category: &str, payloads: &[String]) -> Result<u64, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        inventory::add_units(category, payloads, &mut conn).await
    }

    async fn stock_level(&self, category: &str) -> Result<i64, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let count = inventory::available_count(category, &mut conn).await?;
        Ok(count)
    }

    async fn reserve_unit(&self, category: &str) -> Result<InventoryUnit, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        inventory::claim_unit(category, None, &mut conn)
            .await?
            .ok_or_else(|| StorefrontError::OutOfStock(category.to_string()))
    }

    async fn release_unit(&self, unit_id: i64) -> Result<InventoryUnit, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        inventory::release_unit(unit_id, &mut conn).await
    }

    //------------------------------------------ Orders ----------------------------------------

    async fn insert_order(&self, order: NewOrder) -> Result<(Order, Vec<InventoryUnit>), StorefrontError> {
        if order.quantity < 1 {
            return Err(StorefrontError::OrderValidation(format!(
                "Order {} asks for {} units",
                order.order_id, order.quantity
            )));
        }
        let mut tx = self.pool.begin().await?;
        let order = orders::insert_order(order, &mut tx).await?;
        let units = inventory::claim_units(&order.category, &order.order_id, order.quantity, &mut tx).await?;
        tx.commit().await?;
        debug!("🛒️ Order [{}] stored with {} unit(s) reserved", order.order_id, units.len());
        Ok((order, units))
    }

    async fn order_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let order = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
        Ok(order)
    }

    async fn units_for_order(&self, order_id: &OrderId) -> Result<Vec<InventoryUnit>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let units = inventory::units_for_order(order_id, &mut conn).await?;
        Ok(units)
    }

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::search_orders(query, &mut conn).await?;
        Ok(result)
    }

    async fn cancel_or_expire_order(
        &self,
        order_id: &OrderId,
        new_status: OrderStatusType,
    ) -> Result<Order, StorefrontError> {
        if !matches!(new_status, OrderStatusType::Expired | OrderStatusType::Failed) {
            return Err(StorefrontError::invalid_transition(OrderStatusType::PendingPayment, new_status));
        }
        let mut tx = self.pool.begin().await?;
        let order = orders::transition_status(order_id, &[OrderStatusType::PendingPayment], new_status, &mut tx).await?;
        let order = match order {
            Some(order) => order,
            None => {
                let current = orders::fetch_order_by_order_id(order_id, &mut tx).await?;
                return Err(match current {
                    Some(order) => StorefrontError::invalid_transition(order.status, new_status),
                    None => StorefrontError::OrderNotFound(order_id.clone()),
                });
            },
        };
        let released = inventory::release_units_for_order(order_id, &mut tx).await?;
        tx.commit().await?;
        debug!("🛒️ Order [{order_id}] is now {new_status}; {} unit(s) returned to the shelf", released.len());
        Ok(order)
    }

    async fn fulfill_order(&self, order_id: &OrderId) -> Result<Order, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let order =
            orders::transition_status(order_id, &[OrderStatusType::Paid], OrderStatusType::Fulfilled, &mut conn)
                .await?;
        match order {
            Some(order) => Ok(order),
            None => {
                let current = orders::fetch_order_by_order_id(order_id, &mut conn).await?;
                Err(match current {
                    Some(order) => StorefrontError::invalid_transition(order.status, OrderStatusType::Fulfilled),
                    None => StorefrontError::OrderNotFound(order_id.clone()),
                })
            },
        }
    }

    async fn expire_old_orders(&self, unpaid_limit: Duration) -> Result<ExpiryOutcome, StorefrontError> {
        let mut tx = self.pool.begin().await?;
        let expired = orders::expire_orders(unpaid_limit, &mut tx).await?;
        let mut released_units = 0u64;
        for order in &expired {
            let released = inventory::release_units_for_order(&order.order_id, &mut tx).await?;
            released_units += released.len() as u64;
        }
        tx.commit().await?;
        if !expired.is_empty() {
            info!("🛒️ Expired {} stale order(s), releasing {released_units} unit(s)", expired.len());
        }
        Ok(ExpiryOutcome::new(expired, released_units))
    }

    //---------------------------------------- Transfers ---------------------------------------

    async fn record_transfer(&self, transfer: NewTransfer) -> Result<InsertTransferResult, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let (record, inserted) = transfers::idempotent_insert(transfer, &mut conn).await?;
        Ok(if inserted { InsertTransferResult::Inserted(record) } else { InsertTransferResult::AlreadyRecorded(record) })
    }

    async fn transfer_by_txid(&self, txid: &str) -> Result<Option<TransferRecord>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let transfer = transfers::fetch_transfer(txid, &mut conn).await?;
        Ok(transfer)
    }

    async fn transfers_awaiting_match(&self, tenant: &TenantId) -> Result<Vec<TransferRecord>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = transfers::fetch_awaiting_match(tenant, &mut conn).await?;
        Ok(result)
    }

    async fn mark_transfer_unmatched(&self, txid: &str) -> Result<TransferRecord, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        transfers::mark_unmatched(txid, &mut conn).await
    }

    async fn candidate_orders_for_transfer(
        &self,
        transfer: &TransferRecord,
        window: Duration,
        tolerance: TokenAmount,
    ) -> Result<Vec<Order>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = orders::candidates_for_transfer(transfer, window, tolerance, &mut conn).await?;
        Ok(result)
    }

    async fn transfers_compatible_with_order(
        &self,
        order: &Order,
        window: Duration,
        tolerance: TokenAmount,
    ) -> Result<Vec<TransferRecord>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = transfers::compatible_with_order(order, window, tolerance, &mut conn).await?;
        Ok(result)
    }

    /// Takes a matched (txid, order) pair, and in a single atomic transaction,
    /// * claims the transfer via compare-and-set. A transfer that is already `Credited` aborts
    ///   with `TransferAlreadyCredited` before anything is written.
    /// * moves the order to `Paid`. An `Expired` order is accepted only if its units can be
    ///   re-reserved here; that marks the receipt as late.
    /// * appends the pending `Sale` ledger entry for the order's markup, maturing after
    ///   `maturity`.
    async fn credit_transfer(
        &self,
        txid: &str,
        order_id: &OrderId,
        maturity: Duration,
    ) -> Result<CreditReceipt, StorefrontError> {
        let mut tx = self.pool.begin().await?;
        let on_file = transfers::fetch_transfer(txid, &mut tx)
            .await?
            .ok_or_else(|| StorefrontError::TransferNotFound(txid.to_string()))?;
        match on_file.state {
            TransferState::Credited => return Err(StorefrontError::TransferAlreadyCredited(txid.to_string())),
            TransferState::Rejected => {
                return Err(StorefrontError::invalid_transition(TransferState::Rejected, TransferState::Credited))
            },
            _ => {},
        }
        let transfer = transfers::claim_for_credit(txid, order_id, &mut tx)
            .await?
            .ok_or_else(|| StorefrontError::TransferAlreadyCredited(txid.to_string()))?;
        let order = orders::fetch_order_by_order_id(order_id, &mut tx)
            .await?
            .ok_or_else(|| StorefrontError::OrderNotFound(order_id.clone()))?;
        let late = match order.status {
            OrderStatusType::PendingPayment => false,
            OrderStatusType::Expired => {
                // Late credit: the order only comes back to life if its stock still exists.
                inventory::claim_units(&order.category, order_id, order.quantity, &mut tx).await?;
                true
            },
            other => return Err(StorefrontError::invalid_transition(other, OrderStatusType::Paid)),
        };
        let paid = orders::mark_paid(order_id, txid, order.status, &mut tx)
            .await?
            .ok_or_else(|| StorefrontError::invalid_transition(order.status, OrderStatusType::Paid))?;
        let mature_at = Utc::now() + maturity;
        let (entry, _) = ledger::idempotent_insert_entry(
            &paid.tenant_id,
            order_id,
            LedgerEntryKind::Sale,
            paid.markup_total,
            LedgerStatus::Pending,
            mature_at,
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        info!(
            "💰️ Transfer {txid} credited against order [{order_id}]: {} paid, {} profit recorded{}",
            paid.total_price,
            entry.amount,
            if late { " (late)" } else { "" }
        );
        Ok(CreditReceipt { order: paid, transfer, entry, late })
    }

    //------------------------------------------ Ledger ----------------------------------------

    async fn record_profit(
        &self,
        tenant: &TenantId,
        order_id: &OrderId,
        amount: TokenAmount,
        mature_at: DateTime<Utc>,
    ) -> Result<InsertEntryResult, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let (entry, inserted) = ledger::idempotent_insert_entry(
            tenant,
            order_id,
            LedgerEntryKind::Sale,
            amount,
            LedgerStatus::Pending,
            mature_at,
            &mut conn,
        )
        .await?;
        Ok(if inserted { InsertEntryResult::Inserted(entry) } else { InsertEntryResult::AlreadyRecorded(entry) })
    }

    /// The refund entry always mirrors the sale amount, negated. A still-pending sale is marked
    /// `Reverted` together with its refund (nothing ever happened, balance-wise); a sale that
    /// already matured is offset by the refund landing directly in `Matured`. A second revert of
    /// the same order returns the existing refund entry and writes nothing.
    async fn revert_order_profit(&self, order_id: &OrderId) -> Result<LedgerEntry, StorefrontError> {
        let mut tx = self.pool.begin().await?;
        let sale = ledger::fetch_entry(order_id, LedgerEntryKind::Sale, &mut tx)
            .await?
            .ok_or_else(|| StorefrontError::NothingToRevert { order_id: order_id.clone() })?;
        if let Some(refund) = ledger::fetch_entry(order_id, LedgerEntryKind::Refund, &mut tx).await? {
            debug!("🧾️ Order [{order_id}] was already reverted; returning the existing refund entry");
            return Ok(refund);
        }
        let refund_status = match sale.status {
            LedgerStatus::Pending => {
                ledger::mark_sale_reverted(order_id, &mut tx).await?;
                LedgerStatus::Reverted
            },
            LedgerStatus::Matured | LedgerStatus::Withdrawn => LedgerStatus::Matured,
            LedgerStatus::Reverted => LedgerStatus::Reverted,
        };
        let (refund, _) = ledger::idempotent_insert_entry(
            &sale.tenant_id,
            order_id,
            LedgerEntryKind::Refund,
            -sale.amount,
            refund_status,
            Utc::now(),
            &mut tx,
        )
        .await?;
        tx.commit().await?;
        info!("🧾️ Profit of {} for order [{order_id}] reverted", sale.amount);
        Ok(refund)
    }

    async fn mature_ledger_entries(&self, now: DateTime<Utc>) -> Result<u64, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let matured = ledger::mature_entries(now, &mut conn).await?;
        if matured > 0 {
            info!("🧾️ {matured} ledger entr(ies) matured");
        }
        Ok(matured)
    }

    async fn balance_for_tenant(&self, tenant: &TenantId) -> Result<Balance, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        ledger::balance_for_tenant(tenant, &mut conn).await
    }

    async fn ledger_entries_for_order(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let entries = ledger::entries_for_order(order_id, &mut conn).await?;
        Ok(entries)
    }

    async fn ledger_history(&self, tenant: &TenantId, limit: i64) -> Result<Vec<LedgerEntry>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let entries = ledger::history(tenant, limit, &mut conn).await?;
        Ok(entries)
    }

    //--------------------------------------- Withdrawals --------------------------------------

    /// Freezes first, checks second: the freeze takes the write lock, so the balance read that
    /// follows already includes this request and cannot be forged by a concurrent one. A negative
    /// available balance after the freeze rolls the whole thing back.
    async fn request_withdrawal(
        &self,
        tenant: &TenantId,
        amount: TokenAmount,
        fee: TokenAmount,
        address: &str,
    ) -> Result<Withdrawal, StorefrontError> {
        if amount.is_negative() || amount.is_zero() {
            return Err(StorefrontError::OrderValidation(format!("Withdrawal amount {amount} must be positive")));
        }
        let mut tx = self.pool.begin().await?;
        tenants::adjust_frozen(tenant, amount, &mut tx).await?;
        let balance = ledger::balance_for_tenant(tenant, &mut tx).await?;
        if balance.available.is_negative() {
            return Err(StorefrontError::InsufficientBalance {
                requested: amount,
                available: balance.available + amount,
            });
        }
        let withdrawal = withdrawals::insert_withdrawal(tenant, amount, fee, address, &mut tx).await?;
        tx.commit().await?;
        info!("🏧️ Withdrawal #{} of {amount} requested by {tenant}; funds frozen", withdrawal.id);
        Ok(withdrawal)
    }

    async fn withdrawal_by_id(&self, id: i64) -> Result<Option<Withdrawal>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let withdrawal = withdrawals::fetch_withdrawal(id, &mut conn).await?;
        Ok(withdrawal)
    }

    async fn withdrawals_for_tenant(
        &self,
        tenant: &TenantId,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        let result = withdrawals::fetch_for_tenant(tenant, status, &mut conn).await?;
        Ok(result)
    }

    async fn approve_withdrawal(&self, id: i64, reviewer: &str) -> Result<Withdrawal, StorefrontError> {
        let mut conn = self.pool.acquire().await?;
        match withdrawals::approve(id, reviewer, &mut conn).await? {
            Some(withdrawal) => {
                debug!("🏧️ Withdrawal #{id} approved by {reviewer}");
                Ok(withdrawal)
            },
            None => Err(withdrawals::transition_failure(id, WithdrawalStatus::Approved, &mut conn).await?),
        }
    }

    async fn reject_withdrawal(&self, id: i64, reviewer: &str, reason: &str) -> Result<Withdrawal, StorefrontError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = match withdrawals::reject(id, reviewer, reason, &mut tx).await? {
            Some(withdrawal) => withdrawal,
            None => return Err(withdrawals::transition_failure(id, WithdrawalStatus::Rejected, &mut tx).await?),
        };
        tenants::adjust_frozen(&withdrawal.tenant_id, -withdrawal.amount, &mut tx).await?;
        tx.commit().await?;
        info!("🏧️ Withdrawal #{id} rejected by {reviewer}; {} unfrozen", withdrawal.amount);
        Ok(withdrawal)
    }

    async fn mark_withdrawal_paid(
        &self,
        id: i64,
        reviewer: &str,
        tx_reference: &str,
    ) -> Result<SettledWithdrawal, StorefrontError> {
        let mut tx = self.pool.begin().await?;
        let withdrawal = match withdrawals::mark_paid(id, reviewer, tx_reference, &mut tx).await? {
            Some(withdrawal) => withdrawal,
            None => return Err(withdrawals::transition_failure(id, WithdrawalStatus::Paid, &mut tx).await?),
        };
        tenants::record_payout(&withdrawal.tenant_id, withdrawal.amount, &mut tx).await?;
        let entries_marked = ledger::mark_withdrawn_fifo(&withdrawal.tenant_id, withdrawal.amount, &mut tx).await?;
        tx.commit().await?;
        info!(
            "🏧️ Withdrawal #{id} of {} paid out to {} ({} after the {} fee)",
            withdrawal.amount,
            withdrawal.address,
            withdrawal.payout_amount(),
            withdrawal.fee
        );
        Ok(SettledWithdrawal { withdrawal, entries_marked })
    }

    async fn close(&mut self) -> Result<(), StorefrontError> {
        self.pool.close().await;
        Ok(())
    }
}
