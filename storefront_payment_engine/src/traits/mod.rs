//! # Backend interface contracts.
//!
//! This module defines the behavior a database backend must expose in order to power the
//! storefront payment engine, plus the contract for the upstream blockchain feed.
//!
//! ## Traits
//! * [`StorefrontDatabase`] is the complete persistence contract: inventory claims, order flow,
//!   transfer records and the atomic credit step, the profit ledger, withdrawals and tenant
//!   profiles. The SQLite backend in [`crate::sqlite`] implements it; a Postgres backend would
//!   implement the same trait behind the `postgres` feature.
//! * [`ChainClient`] is the read-only upstream collaborator: a transfer feed for one deposit
//!   address and a confirmation-count query. The engine never talks to a node directly.
//!
//! The watcher, the API layer and the workers are all generic over these traits, so tests can
//! substitute an in-memory chain feed while running against a real (temporary) database.
mod chain_client;
mod data_objects;
mod storefront_database;

pub use chain_client::{ChainClient, ChainClientError, ObservedTransfer};
pub use data_objects::{
    CreditOutcome,
    CreditReceipt,
    ExpiryOutcome,
    InsertEntryResult,
    InsertTransferResult,
    ScanSummary,
    SettledWithdrawal,
};
pub use storefront_database::{StorefrontDatabase, StorefrontError};
