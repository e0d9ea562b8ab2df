use serde::{Deserialize, Serialize};

use crate::db_types::{Order, TransferRecord, Withdrawal};

/// Fired after a transfer has been credited against an order and the profit entry recorded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderPaidEvent {
    pub order: Order,
    /// True when the matching transfer arrived after the order had already expired.
    pub late: bool,
}

impl OrderPaidEvent {
    pub fn new(order: Order, late: bool) -> Self {
        Self { order, late }
    }
}

/// Fired when an incoming transfer could not be matched to any open order and was parked for
/// manual review.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransferUnmatchedEvent {
    pub transfer: TransferRecord,
    pub reason: String,
}

impl TransferUnmatchedEvent {
    pub fn new(transfer: TransferRecord, reason: impl Into<String>) -> Self {
        Self { transfer, reason: reason.into() }
    }
}

/// Fired on every withdrawal state change. The `status` field of the payload carries the new
/// state; the review and payment columns carry who moved it and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WithdrawalEvent {
    pub withdrawal: Withdrawal,
}

impl WithdrawalEvent {
    pub fn new(withdrawal: Withdrawal) -> Self {
        Self { withdrawal }
    }
}
