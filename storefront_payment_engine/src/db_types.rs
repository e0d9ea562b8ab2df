use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use log::error;
use rand::Rng;
use serde::{Deserialize, Serialize};
use spg_common::{TenantId, TokenAmount};
use sqlx::{FromRow, Type};
use thiserror::Error;

use crate::helpers::TokenAddress;

#[derive(Debug, Clone, Error)]
#[error("Invalid conversion: {0}")]
pub struct ConversionError(pub String);

//--------------------------------------        OrderId        -------------------------------------------------------
#[derive(Debug, Clone, PartialEq, Eq, Hash, Type, Serialize, Deserialize)]
#[sqlx(transparent)]
pub struct OrderId(pub String);

impl OrderId {
    /// Generates a fresh order id: unix seconds plus a 4-digit random suffix.
    pub fn generate() -> Self {
        let suffix = rand::thread_rng().gen_range(0..10_000u32);
        Self(format!("{}{suffix:04}", Utc::now().timestamp()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OrderId {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.to_string()))
    }
}

impl From<String> for OrderId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

//--------------------------------------   OrderStatusType     -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum OrderStatusType {
    /// Newly placed; stock is reserved and a matching payment is awaited.
    PendingPayment,
    /// A matching transfer has been credited in full.
    Paid,
    /// Goods have been handed over to the customer.
    Fulfilled,
    /// No matching payment arrived inside the payment window. Reserved stock was released.
    Expired,
    /// Aborted by an operator. Reserved stock was released.
    Failed,
}

impl Display for OrderStatusType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OrderStatusType::PendingPayment => write!(f, "PendingPayment"),
            OrderStatusType::Paid => write!(f, "Paid"),
            OrderStatusType::Fulfilled => write!(f, "Fulfilled"),
            OrderStatusType::Expired => write!(f, "Expired"),
            OrderStatusType::Failed => write!(f, "Failed"),
        }
    }
}

impl FromStr for OrderStatusType {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PendingPayment" => Ok(Self::PendingPayment),
            "Paid" => Ok(Self::Paid),
            "Fulfilled" => Ok(Self::Fulfilled),
            "Expired" => Ok(Self::Expired),
            "Failed" => Ok(Self::Failed),
            s => Err(ConversionError(format!("Invalid order status: {s}"))),
        }
    }
}

impl From<String> for OrderStatusType {
    fn from(value: String) -> Self {
        value.parse().unwrap_or_else(|_| {
            error!("Invalid order status: {value}. But this conversion cannot fail. Defaulting to PendingPayment");
            OrderStatusType::PendingPayment
        })
    }
}

//--------------------------------------        Order          -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub order_id: OrderId,
    pub tenant_id: TenantId,
    /// Opaque customer reference for the notification layer. Never interpreted by the engine.
    pub customer_id: Option<String>,
    pub category: String,
    pub quantity: i64,
    /// Operator's base price per unit.
    pub base_price: TokenAmount,
    /// Customer-facing price per unit after the tenant markup.
    pub unit_price: TokenAmount,
    /// `(unit_price - base_price) * quantity`; the tenant's profit when the order is credited.
    pub markup_total: TokenAmount,
    /// `unit_price * quantity`; the amount the payment matcher looks for.
    pub total_price: TokenAmount,
    pub status: OrderStatusType,
    /// Transaction id of the credited transfer, once paid.
    pub txid: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------       NewOrder        -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order_id: OrderId,
    pub tenant_id: TenantId,
    pub customer_id: Option<String>,
    pub category: String,
    pub quantity: i64,
    pub base_price: TokenAmount,
    pub unit_price: TokenAmount,
    pub markup_total: TokenAmount,
    pub total_price: TokenAmount,
}

//--------------------------------------    TransferState      -------------------------------------------------------
/// Processing state of an observed transfer. Progress is forward-only; in particular a record
/// never leaves `Credited`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum TransferState {
    /// Recorded, not yet matched (possibly deferred on confirmations).
    Unprocessed,
    /// Claimed for an order inside a credit transaction that has not completed.
    Matched,
    /// Credited against an order. Terminal.
    Credited,
    /// No compatible pending order was found; eligible for manual rescan.
    Unmatched,
    /// Not a candidate for matching (wrong token contract). Terminal.
    Rejected,
}

impl Display for TransferState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferState::Unprocessed => write!(f, "Unprocessed"),
            TransferState::Matched => write!(f, "Matched"),
            TransferState::Credited => write!(f, "Credited"),
            TransferState::Unmatched => write!(f, "Unmatched"),
            TransferState::Rejected => write!(f, "Rejected"),
        }
    }
}

impl FromStr for TransferState {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unprocessed" => Ok(Self::Unprocessed),
            "Matched" => Ok(Self::Matched),
            "Credited" => Ok(Self::Credited),
            "Unmatched" => Ok(Self::Unmatched),
            "Rejected" => Ok(Self::Rejected),
            s => Err(ConversionError(format!("Invalid transfer state: {s}"))),
        }
    }
}

//--------------------------------------    TransferRecord     -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TransferRecord {
    /// On-chain transaction id. Primary key and the idempotency backbone.
    pub txid: String,
    /// Sender address, canonical Base58Check form.
    pub sender: String,
    /// Recipient address, canonical Base58Check form.
    pub recipient: String,
    /// Token contract address, canonical Base58Check form.
    pub contract: String,
    /// Raw on-chain integer amount, before decimal conversion.
    pub raw_amount: i64,
    /// Settlement amount after decimal conversion.
    pub amount: TokenAmount,
    pub block_time: DateTime<Utc>,
    /// Tenant whose watcher recorded the transfer.
    pub tenant_id: TenantId,
    pub state: TransferState,
    pub order_id: Option<OrderId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------      NewTransfer      -------------------------------------------------------
#[derive(Debug, Clone)]
pub struct NewTransfer {
    pub txid: String,
    pub sender: TokenAddress,
    pub recipient: TokenAddress,
    pub contract: TokenAddress,
    pub raw_amount: i64,
    pub amount: TokenAmount,
    pub block_time: DateTime<Utc>,
    pub tenant_id: TenantId,
    /// Initial state; `Rejected` when the token filter has already disqualified the transfer.
    pub state: TransferState,
}

//--------------------------------------   LedgerEntryKind     -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum LedgerEntryKind {
    Sale,
    Refund,
}

impl Display for LedgerEntryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerEntryKind::Sale => write!(f, "Sale"),
            LedgerEntryKind::Refund => write!(f, "Refund"),
        }
    }
}

//--------------------------------------     LedgerStatus      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum LedgerStatus {
    /// Inside the maturity window; not withdrawable yet.
    Pending,
    /// Withdrawable.
    Matured,
    /// Consumed by a paid withdrawal.
    Withdrawn,
    /// Cancelled out by a refund before maturity.
    Reverted,
}

impl Display for LedgerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LedgerStatus::Pending => write!(f, "Pending"),
            LedgerStatus::Matured => write!(f, "Matured"),
            LedgerStatus::Withdrawn => write!(f, "Withdrawn"),
            LedgerStatus::Reverted => write!(f, "Reverted"),
        }
    }
}

impl FromStr for LedgerStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Pending" => Ok(Self::Pending),
            "Matured" => Ok(Self::Matured),
            "Withdrawn" => Ok(Self::Withdrawn),
            "Reverted" => Ok(Self::Reverted),
            s => Err(ConversionError(format!("Invalid ledger status: {s}"))),
        }
    }
}

//--------------------------------------      LedgerEntry      -------------------------------------------------------
/// One immutable profit (or refund) record. The amount never changes after insertion; only the
/// status moves, and only forward.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub id: i64,
    pub tenant_id: TenantId,
    pub order_id: OrderId,
    pub kind: LedgerEntryKind,
    /// Profit for `Sale`, negative for `Refund`.
    pub amount: TokenAmount,
    pub status: LedgerStatus,
    pub mature_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

//--------------------------------------   WithdrawalStatus    -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum WithdrawalStatus {
    Requested,
    Approved,
    /// Terminal. The frozen amount has been returned to the available balance.
    Rejected,
    /// Terminal. The frozen amount has been counted into the tenant's lifetime-paid total.
    Paid,
}

impl Display for WithdrawalStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WithdrawalStatus::Requested => write!(f, "Requested"),
            WithdrawalStatus::Approved => write!(f, "Approved"),
            WithdrawalStatus::Rejected => write!(f, "Rejected"),
            WithdrawalStatus::Paid => write!(f, "Paid"),
        }
    }
}

impl FromStr for WithdrawalStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Requested" => Ok(Self::Requested),
            "Approved" => Ok(Self::Approved),
            "Rejected" => Ok(Self::Rejected),
            "Paid" => Ok(Self::Paid),
            s => Err(ConversionError(format!("Invalid withdrawal status: {s}"))),
        }
    }
}

//--------------------------------------      Withdrawal       -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Withdrawal {
    pub id: i64,
    pub tenant_id: TenantId,
    /// Requested (and frozen) amount. The payout on the wire is `amount - fee`.
    pub amount: TokenAmount,
    pub fee: TokenAmount,
    pub address: String,
    pub status: WithdrawalStatus,
    pub requested_at: DateTime<Utc>,
    pub reviewed_at: Option<DateTime<Utc>>,
    pub reviewed_by: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub paid_by: Option<String>,
    /// On-chain reference of the payout transaction, set by `mark_paid`.
    pub tx_reference: Option<String>,
    pub reject_reason: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl Withdrawal {
    pub fn payout_amount(&self) -> TokenAmount {
        self.amount - self.fee
    }
}

//--------------------------------------       UnitState       -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum UnitState {
    Available,
    Reserved,
}

impl Display for UnitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UnitState::Available => write!(f, "Available"),
            UnitState::Reserved => write!(f, "Reserved"),
        }
    }
}

//--------------------------------------    InventoryUnit      -------------------------------------------------------
/// One sellable item. Shared across all tenants; claimed atomically, released explicitly.
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct InventoryUnit {
    pub id: i64,
    pub category: String,
    /// Opaque deliverable. The engine stores and returns it, nothing more.
    pub payload: String,
    pub state: UnitState,
    pub order_id: Option<OrderId>,
    pub reserved_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

//--------------------------------------      MarkupKind       -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum MarkupKind {
    /// `markup_value` is a percentage of the base price.
    Percent,
    /// `markup_value` is an absolute amount added to the base price.
    Fixed,
}

impl Display for MarkupKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MarkupKind::Percent => write!(f, "Percent"),
            MarkupKind::Fixed => write!(f, "Fixed"),
        }
    }
}

impl FromStr for MarkupKind {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Percent" => Ok(Self::Percent),
            "Fixed" => Ok(Self::Fixed),
            s => Err(ConversionError(format!("Invalid markup kind: {s}"))),
        }
    }
}

//--------------------------------------     TenantStatus      -------------------------------------------------------
#[derive(Debug, Clone, Copy, PartialEq, Eq, Type, Serialize, Deserialize)]
pub enum TenantStatus {
    Active,
    /// Not taking new orders; existing ledger state remains intact.
    Paused,
    /// Locked out by the operator. No orders, no withdrawals.
    Suspended,
}

impl Display for TenantStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TenantStatus::Active => write!(f, "Active"),
            TenantStatus::Paused => write!(f, "Paused"),
            TenantStatus::Suspended => write!(f, "Suspended"),
        }
    }
}

impl FromStr for TenantStatus {
    type Err = ConversionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Active" => Ok(Self::Active),
            "Paused" => Ok(Self::Paused),
            "Suspended" => Ok(Self::Suspended),
            s => Err(ConversionError(format!("Invalid tenant status: {s}"))),
        }
    }
}

//--------------------------------------    TenantSettings     -------------------------------------------------------
/// Per-tenant integration settings. Every field is optional; unset fields resolve to the global
/// defaults via [`crate::config::EngineSettings`]. Stored and updated as one versioned record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TenantSettings {
    pub markup_kind: Option<MarkupKind>,
    pub markup_value: Option<TokenAmount>,
    pub min_withdrawal: Option<TokenAmount>,
    pub payout_address: Option<String>,
    pub deposit_address: Option<String>,
}

//--------------------------------------    TenantProfile      -------------------------------------------------------
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TenantProfile {
    pub id: TenantId,
    pub status: TenantStatus,
    pub markup_kind: Option<MarkupKind>,
    pub markup_value: Option<TokenAmount>,
    pub min_withdrawal: Option<TokenAmount>,
    pub payout_address: Option<String>,
    pub deposit_address: Option<String>,
    pub settings_version: i64,
    /// Amount currently locked by in-flight withdrawal requests.
    pub frozen: TokenAmount,
    /// Lifetime total of paid-out withdrawals.
    pub lifetime_paid: TokenAmount,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TenantProfile {
    pub fn settings(&self) -> TenantSettings {
        TenantSettings {
            markup_kind: self.markup_kind,
            markup_value: self.markup_value,
            min_withdrawal: self.min_withdrawal,
            payout_address: self.payout_address.clone(),
            deposit_address: self.deposit_address.clone(),
        }
    }
}

//--------------------------------------        Balance        -------------------------------------------------------
/// A tenant's balance, always recomputed from the ledger and the tenant counters in one query.
#[derive(Debug, Clone, Copy, Default, FromRow, Serialize, Deserialize)]
pub struct Balance {
    /// Matured profit not locked by a withdrawal: matured and withdrawn sums less frozen and paid.
    pub available: TokenAmount,
    /// Locked by withdrawal requests awaiting review or payment.
    pub frozen: TokenAmount,
    /// Lifetime paid-out total.
    pub paid: TokenAmount,
    /// Still inside the maturity window.
    pub pending: TokenAmount,
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn status_round_trips() {
        for status in
            [OrderStatusType::PendingPayment, OrderStatusType::Paid, OrderStatusType::Fulfilled, OrderStatusType::Expired, OrderStatusType::Failed]
        {
            assert_eq!(status.to_string().parse::<OrderStatusType>().unwrap(), status);
        }
        for state in [
            TransferState::Unprocessed,
            TransferState::Matched,
            TransferState::Credited,
            TransferState::Unmatched,
            TransferState::Rejected,
        ] {
            assert_eq!(state.to_string().parse::<TransferState>().unwrap(), state);
        }
        for status in [LedgerStatus::Pending, LedgerStatus::Matured, LedgerStatus::Withdrawn, LedgerStatus::Reverted] {
            assert_eq!(status.to_string().parse::<LedgerStatus>().unwrap(), status);
        }
        for status in
            [WithdrawalStatus::Requested, WithdrawalStatus::Approved, WithdrawalStatus::Rejected, WithdrawalStatus::Paid]
        {
            assert_eq!(status.to_string().parse::<WithdrawalStatus>().unwrap(), status);
        }
    }

    #[test]
    fn generated_order_ids_are_numeric() {
        let id = OrderId::generate();
        assert_eq!(id.as_str().len(), 14);
        assert!(id.as_str().bytes().all(|b| b.is_ascii_digit()));
    }
}
