use chrono::{DateTime, Duration, Utc};
use spg_common::{TenantId, TokenAmount, TokenAmountError};
use thiserror::Error;

use crate::{
    db_types::{
        Balance,
        InventoryUnit,
        LedgerEntry,
        NewOrder,
        NewTransfer,
        Order,
        OrderId,
        OrderStatusType,
        TenantProfile,
        TenantSettings,
        TenantStatus,
        TransferRecord,
        Withdrawal,
        WithdrawalStatus,
    },
    helpers::AddressError,
    spe_api::order_objects::OrderQueryFilter,
    traits::data_objects::{CreditReceipt, ExpiryOutcome, InsertEntryResult, InsertTransferResult, SettledWithdrawal},
};

/// The complete persistence contract for the storefront payment engine.
///
/// Backends guarantee three things above all:
/// * **No oversell**: [`reserve_unit`](Self::reserve_unit) and the reservation step inside
///   [`insert_order`](Self::insert_order) are single atomic compare-and-set claims.
/// * **Exactly-once crediting**: [`credit_transfer`](Self::credit_transfer) performs the
///   transfer/order/ledger writes in one transaction, gated by a state CAS on the transaction id.
/// * **Balance integrity**: every balance read is recomputed from the ledger and tenant
///   counters; nothing is served from a cache.
#[allow(async_fn_in_trait)]
pub trait StorefrontDatabase: Clone {
    /// The URL of the database
    fn url(&self) -> &str;

    //----------------------------------------- Tenants ----------------------------------------

    /// Creates the tenant profile if it does not exist yet and returns it. Existing profiles are
    /// returned unchanged, so the call is idempotent.
    async fn upsert_tenant(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError>;

    /// Fetches the tenant profile, or `TenantNotFound`.
    async fn tenant_profile(&self, id: &TenantId) -> Result<TenantProfile, StorefrontError>;

    async fn set_tenant_status(&self, id: &TenantId, status: TenantStatus) -> Result<TenantProfile, StorefrontError>;

    /// Replaces the tenant's settings record in one atomic write and bumps `settings_version`.
    /// Fields set to `None` fall back to the global defaults at resolution time; they are stored
    /// as NULL, never as copies of the current global values.
    async fn update_tenant_settings(
        &self,
        id: &TenantId,
        settings: TenantSettings,
    ) -> Result<TenantProfile, StorefrontError>;

    /// All tenants with `Active` status, for watcher startup.
    async fn active_tenants(&self) -> Result<Vec<TenantProfile>, StorefrontError>;

    //---------------------------------------- Inventory ---------------------------------------

    /// Adds sellable units to a category. Returns the number of units inserted.
    async fn add_inventory_units(&self, category: &str, payloads: &[String]) -> Result<u64, StorefrontError>;

    /// Number of `Available` units in the category.
    async fn stock_level(&self, category: &str) -> Result<i64, StorefrontError>;

    /// Claims one available unit in the category, atomically flipping it to `Reserved`.
    ///
    /// The claim is a single compare-and-set: under any number of concurrent callers, a unit is
    /// handed to at most one of them. When no unit flips, the call fails with `OutOfStock`
    /// immediately. There is no retry loop.
    async fn reserve_unit(&self, category: &str) -> Result<InventoryUnit, StorefrontError>;

    /// Reverts a reserved-but-unused unit to `Available`, clearing its order link. Guarded: a
    /// unit that is not currently `Reserved` yields `InvalidTransition`.
    async fn release_unit(&self, unit_id: i64) -> Result<InventoryUnit, StorefrontError>;

    //------------------------------------------ Orders ----------------------------------------

    /// Stores a new order and reserves `quantity` units for it in a single atomic transaction.
    ///
    /// If the category runs out mid-claim the transaction rolls back entirely; no unit stays
    /// reserved and no order row survives. Returns the order together with the reserved units.
    async fn insert_order(&self, order: NewOrder) -> Result<(Order, Vec<InventoryUnit>), StorefrontError>;

    async fn order_by_id(&self, order_id: &OrderId) -> Result<Option<Order>, StorefrontError>;

    async fn units_for_order(&self, order_id: &OrderId) -> Result<Vec<InventoryUnit>, StorefrontError>;

    async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StorefrontError>;

    /// Moves a `PendingPayment` order to `Expired` or `Failed` and releases its reserved units,
    /// atomically. Any other source status, or a target status outside those two, is an
    /// `InvalidTransition`.
    async fn cancel_or_expire_order(
        &self,
        order_id: &OrderId,
        new_status: OrderStatusType,
    ) -> Result<Order, StorefrontError>;

    /// Marks a `Paid` order `Fulfilled` once the goods have been handed over.
    async fn fulfill_order(&self, order_id: &OrderId) -> Result<Order, StorefrontError>;

    /// Expires every `PendingPayment` order older than `unpaid_limit` and releases the reserved
    /// units, in one transaction. Returns the expired orders.
    async fn expire_old_orders(&self, unpaid_limit: Duration) -> Result<ExpiryOutcome, StorefrontError>;

    //---------------------------------------- Transfers ---------------------------------------

    /// Records an observed transfer with insert-if-absent semantics on the transaction id.
    /// A transfer that is already on file is returned unchanged; two concurrent observers of the
    /// same txid cannot both insert.
    async fn record_transfer(&self, transfer: NewTransfer) -> Result<InsertTransferResult, StorefrontError>;

    async fn transfer_by_txid(&self, txid: &str) -> Result<Option<TransferRecord>, StorefrontError>;

    /// Transfers of this tenant still awaiting a match (`Unprocessed`, `Matched` or
    /// `Unmatched`), oldest first. Input for `scan_pending` and crash recovery.
    async fn transfers_awaiting_match(&self, tenant: &TenantId) -> Result<Vec<TransferRecord>, StorefrontError>;

    /// Parks a transfer as `Unmatched`. Guarded so a `Credited` or `Rejected` record can never
    /// regress.
    async fn mark_transfer_unmatched(&self, txid: &str) -> Result<TransferRecord, StorefrontError>;

    /// Pending orders of the transfer's tenant whose total matches the transfer amount within
    /// `tolerance` and whose creation time lies within `window` of the transfer's block time.
    /// Ordered oldest first, so the head of the list is the match candidate.
    async fn candidate_orders_for_transfer(
        &self,
        transfer: &TransferRecord,
        window: Duration,
        tolerance: TokenAmount,
    ) -> Result<Vec<Order>, StorefrontError>;

    /// The mirror search for manual rescans: recorded transfers of the order's tenant compatible
    /// with the order by amount and time window that have not been credited or rejected.
    async fn transfers_compatible_with_order(
        &self,
        order: &Order,
        window: Duration,
        tolerance: TokenAmount,
    ) -> Result<Vec<TransferRecord>, StorefrontError>;

    /// The heart of the engine: credits `txid` against `order_id` in one atomic transaction.
    ///
    /// Inside the transaction:
    /// * the transfer state is claimed via CAS, from `Unprocessed`, `Unmatched` or `Matched` to
    ///   `Credited`, recording the order id. A record already `Credited` aborts with
    ///   `TransferAlreadyCredited` and nothing else happens. This is the idempotency gate.
    /// * the order moves to `Paid` with the txid attached. A `PendingPayment` order qualifies
    ///   directly; an `Expired` order qualifies only if `quantity` units can be re-reserved from
    ///   its category inside this same transaction (the late-credit path). Any other status
    ///   aborts the transaction.
    /// * a `Sale` ledger entry for `order.markup_total` is appended (insert-if-absent per order
    ///   id) maturing after `maturity`.
    ///
    /// All three writes commit together or not at all.
    async fn credit_transfer(
        &self,
        txid: &str,
        order_id: &OrderId,
        maturity: Duration,
    ) -> Result<CreditReceipt, StorefrontError>;

    //------------------------------------------ Ledger ----------------------------------------

    /// Appends one pending `Sale` entry for the order. Idempotent per order id: a second call
    /// returns the existing entry and writes nothing.
    async fn record_profit(
        &self,
        tenant: &TenantId,
        order_id: &OrderId,
        amount: TokenAmount,
        mature_at: DateTime<Utc>,
    ) -> Result<InsertEntryResult, StorefrontError>;

    /// Appends the negative `Refund` entry for an order's sale entry. The sale entry itself
    /// keeps its amount forever; a still-pending sale is marked `Reverted` alongside (no balance
    /// effect), while a matured one is offset by the refund landing directly in `Matured`.
    async fn revert_order_profit(&self, order_id: &OrderId) -> Result<LedgerEntry, StorefrontError>;

    /// Flips every `Pending` entry with `mature_at <= now` to `Matured`. Returns how many
    /// entries matured.
    async fn mature_ledger_entries(&self, now: DateTime<Utc>) -> Result<u64, StorefrontError>;

    /// The tenant's balance, recomputed from scratch: available is the sum of matured and
    /// withdrawn entries less the frozen and lifetime-paid counters, reported alongside the
    /// frozen, paid and pending sums. One query, no cache.
    async fn balance_for_tenant(&self, tenant: &TenantId) -> Result<Balance, StorefrontError>;

    async fn ledger_entries_for_order(&self, order_id: &OrderId) -> Result<Vec<LedgerEntry>, StorefrontError>;

    async fn ledger_history(&self, tenant: &TenantId, limit: i64) -> Result<Vec<LedgerEntry>, StorefrontError>;

    //--------------------------------------- Withdrawals --------------------------------------

    /// Creates a withdrawal request and freezes its amount, in one transaction that re-reads the
    /// balance under the write lock, so a stale balance can never authorize an over-withdrawal.
    /// Fails with `InsufficientBalance` when `amount` exceeds the available balance at commit
    /// time.
    async fn request_withdrawal(
        &self,
        tenant: &TenantId,
        amount: TokenAmount,
        fee: TokenAmount,
        address: &str,
    ) -> Result<Withdrawal, StorefrontError>;

    async fn withdrawal_by_id(&self, id: i64) -> Result<Option<Withdrawal>, StorefrontError>;

    async fn withdrawals_for_tenant(
        &self,
        tenant: &TenantId,
        status: Option<WithdrawalStatus>,
    ) -> Result<Vec<Withdrawal>, StorefrontError>;

    /// Moves a request from `Requested` to `Approved`. No balance movement.
    async fn approve_withdrawal(&self, id: i64, reviewer: &str) -> Result<Withdrawal, StorefrontError>;

    /// Moves a request from `Requested` to `Rejected`; the frozen amount returns to available
    /// atomically with the status flip.
    async fn reject_withdrawal(&self, id: i64, reviewer: &str, reason: &str) -> Result<Withdrawal, StorefrontError>;

    /// Moves a request from `Approved` to `Paid`; the frozen amount moves into the tenant's
    /// lifetime-paid total and matured ledger entries are marked `Withdrawn` oldest-first until
    /// the amount is covered.
    async fn mark_withdrawal_paid(
        &self,
        id: i64,
        reviewer: &str,
        tx_reference: &str,
    ) -> Result<SettledWithdrawal, StorefrontError>;

    /// Closes the database connection.
    async fn close(&mut self) -> Result<(), StorefrontError> {
        Ok(())
    }
}

#[derive(Debug, Clone, Error)]
pub enum StorefrontError {
    #[error("We have an internal database engine issue (configuration/uptime etc.): {0}")]
    DatabaseError(String),
    #[error("No available unit in category '{0}'")]
    OutOfStock(String),
    #[error("Requested {requested}, but only {available} is available")]
    InsufficientBalance { requested: TokenAmount, available: TokenAmount },
    #[error("Requested {requested}, which is below the minimum withdrawal of {minimum}")]
    BelowMinimum { requested: TokenAmount, minimum: TokenAmount },
    #[error("Illegal state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
    #[error("Transfer {0} has already been credited")]
    TransferAlreadyCredited(String),
    #[error("The tenant {0} does not exist")]
    TenantNotFound(TenantId),
    #[error("The tenant {tenant} is {status}, not Active")]
    TenantNotActive { tenant: TenantId, status: TenantStatus },
    #[error("The requested order {0} does not exist")]
    OrderNotFound(OrderId),
    #[error("The requested inventory unit {0} does not exist")]
    UnitNotFound(i64),
    #[error("Order {order_id} has no sale ledger entry to revert")]
    NothingToRevert { order_id: OrderId },
    #[error("The requested withdrawal {0} does not exist")]
    WithdrawalNotFound(i64),
    #[error("The requested transfer {0} does not exist")]
    TransferNotFound(String),
    #[error("Upstream chain API unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("Invalid markup configuration: {0}")]
    InvalidMarkup(String),
    #[error("Order validation failed: {0}")]
    OrderValidation(String),
    #[error("{0}")]
    AddressError(#[from] AddressError),
    #[error("{0}")]
    AmountError(#[from] TokenAmountError),
}

impl From<sqlx::Error> for StorefrontError {
    fn from(e: sqlx::Error) -> Self {
        StorefrontError::DatabaseError(e.to_string())
    }
}

impl StorefrontError {
    pub fn invalid_transition<F: ToString, T: ToString>(from: F, to: T) -> Self {
        StorefrontError::InvalidTransition { from: from.to_string(), to: to.to_string() }
    }
}
