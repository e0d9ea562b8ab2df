//! Storefront Payment Engine
//!
//! The storefront payment engine is the ledger and reconciliation core of a multi-tenant
//! storefront gateway: tenants resell inventory at a markup, customers pay in a TRC-20 style
//! settlement token, and the engine turns observed on-chain transfers into paid orders,
//! profit ledger entries and, eventually, withdrawals.
//!
//! The library is divided into three main sections:
//! 1. Database management and control ([`mod@traits`] and the SQLite backend behind the
//!    `sqlite` feature). You should never need to access the database directly; use the public
//!    APIs instead. The exception is the data types stored in the database, which live in
//!    [`mod@db_types`] and are public.
//! 2. The engine public API ([`OrderFlowApi`], [`SettlementApi`], [`LedgerApi`],
//!    [`WithdrawalApi`] and [`TenantApi`]). This is the public-facing functionality: placing
//!    and pricing orders, matching transfers, the profit ledger and the withdrawal state
//!    machine.
//! 3. The runtime pieces: the per-tenant [`WatcherRegistry`] that polls the chain, and the
//!    scheduled maturity and expiry workers.
//!
//! The engine also emits events when orders are paid, transfers cannot be matched, and
//! withdrawals change state. Subscribe via [`events::EventHooks`]; delivery is
//! fire-and-forget, so a broken subscriber can never roll back ledger state.
pub mod config;
pub mod db_types;
pub mod events;
pub mod helpers;
pub mod pricing;
mod spe_api;
#[cfg(feature = "sqlite")]
mod sqlite;
pub mod traits;
#[cfg(feature = "sqlite")]
mod watcher;
#[cfg(feature = "sqlite")]
mod workers;

#[cfg(any(feature = "test_utils", test))]
pub mod test_utils;

pub use config::EngineSettings;
pub use spe_api::{
    ledger_api::LedgerApi,
    order_flow_api::OrderFlowApi,
    order_objects,
    settlement_api::SettlementApi,
    tenant_api::TenantApi,
    withdrawal_api::WithdrawalApi,
};
#[cfg(feature = "sqlite")]
pub use sqlite::{db::MIGRATOR, SqliteDatabase};
pub use traits::{ChainClient, ChainClientError, CreditOutcome, ObservedTransfer, StorefrontDatabase, StorefrontError};
#[cfg(feature = "sqlite")]
pub use watcher::WatcherRegistry;
#[cfg(feature = "sqlite")]
pub use workers::{start_maturity_worker, start_order_expiry_worker};
