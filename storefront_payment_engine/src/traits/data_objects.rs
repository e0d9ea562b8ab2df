use std::fmt::Display;

use serde::{Deserialize, Serialize};

use crate::db_types::{LedgerEntry, Order, TransferRecord, Withdrawal};

/// Result of the insert-if-absent transfer write.
#[derive(Debug, Clone)]
pub enum InsertTransferResult {
    Inserted(TransferRecord),
    /// The txid was already on file. The existing record is returned untouched.
    AlreadyRecorded(TransferRecord),
}

impl InsertTransferResult {
    pub fn record(&self) -> &TransferRecord {
        match self {
            InsertTransferResult::Inserted(r) => r,
            InsertTransferResult::AlreadyRecorded(r) => r,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InsertTransferResult::Inserted(_))
    }
}

/// Result of the insert-if-absent ledger write.
#[derive(Debug, Clone)]
pub enum InsertEntryResult {
    Inserted(LedgerEntry),
    AlreadyRecorded(LedgerEntry),
}

impl InsertEntryResult {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            InsertEntryResult::Inserted(e) => e,
            InsertEntryResult::AlreadyRecorded(e) => e,
        }
    }

    pub fn is_new(&self) -> bool {
        matches!(self, InsertEntryResult::Inserted(_))
    }
}

/// Everything the atomic credit transaction produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreditReceipt {
    pub order: Order,
    pub transfer: TransferRecord,
    pub entry: LedgerEntry,
    /// The order had already expired and its units were re-reserved for the credit.
    pub late: bool,
}

/// Per-transfer outcome of one matcher pass.
#[derive(Debug, Clone)]
pub enum CreditOutcome {
    Credited(Box<CreditReceipt>),
    /// Idempotency gate: this txid was credited before. A success, not a failure.
    AlreadyCredited(String),
    /// Below the confirmation minimum; the transfer stays `Unprocessed` for the next pass.
    Deferred { txid: String, confirmations: u64, required: u64 },
    /// The upstream confirmation query failed after retries; the next poll starts over.
    Upstream { txid: String, error: String },
    /// No compatible pending order; recorded as `Unmatched` for manual rescan.
    Unmatched(String),
    /// Wrong token contract; recorded as `Rejected` for audit.
    Rejected(String),
}

/// Counters reported after a batch scan, one tick of a watcher, or a manual rescan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanSummary {
    pub seen: usize,
    pub credited: usize,
    pub duplicates: usize,
    pub deferred: usize,
    pub unmatched: usize,
    pub rejected: usize,
    pub upstream_errors: usize,
    /// Credits applied to orders that had already expired.
    pub late: usize,
}

impl ScanSummary {
    pub fn tally(&mut self, outcome: &CreditOutcome) {
        self.seen += 1;
        match outcome {
            CreditOutcome::Credited(receipt) => {
                self.credited += 1;
                if receipt.late {
                    self.late += 1;
                }
            },
            CreditOutcome::AlreadyCredited(_) => self.duplicates += 1,
            CreditOutcome::Deferred { .. } => self.deferred += 1,
            CreditOutcome::Upstream { .. } => self.upstream_errors += 1,
            CreditOutcome::Unmatched(_) => self.unmatched += 1,
            CreditOutcome::Rejected(_) => self.rejected += 1,
        }
    }
}

impl Display for ScanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} seen: {} credited ({} late), {} duplicate, {} deferred, {} unmatched, {} rejected, {} upstream errors",
            self.seen,
            self.credited,
            self.late,
            self.duplicates,
            self.deferred,
            self.unmatched,
            self.rejected,
            self.upstream_errors
        )
    }
}

/// Result of the bulk order-expiry sweep.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExpiryOutcome {
    pub expired: Vec<Order>,
    pub released_units: u64,
}

impl ExpiryOutcome {
    pub fn new(expired: Vec<Order>, released_units: u64) -> Self {
        Self { expired, released_units }
    }

    pub fn expired_count(&self) -> usize {
        self.expired.len()
    }
}

/// A paid-out withdrawal together with how many matured ledger entries were marked `Withdrawn`
/// to cover it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettledWithdrawal {
    pub withdrawal: Withdrawal,
    pub entries_marked: u64,
}
