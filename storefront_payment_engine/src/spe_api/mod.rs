//! # Storefront payment engine public API
//!
//! The `spe_api` module exposes the programmatic API for the storefront payment engine.
//! The API is modular, so that clients of the API can pick and choose the functionality they want.
//! Or different parts (e.g. order intake and withdrawal review) could be configured on different
//! machines, or even use Sqlite for one and Postgres for the other.
//!
//! * [`tenant_api`] manages tenant registration, lifecycle status and the versioned per-tenant
//!   settings record.
//! * [`order_flow_api`] prices and places orders against reserved stock, and drives the order
//!   lifecycle: fulfillment, cancellation and the unpaid-order expiry sweep. Inventory intake
//!   and the raw reserve/release operations live here too.
//! * [`settlement_api`] is the credit matcher. It takes observed on-chain transfers through the
//!   idempotency, token, confirmation and matching gates, applies the atomic credit, and
//!   provides the manual rescan tools.
//! * [`ledger_api`] reads balances and ledger history, matures entries on schedule, and reverts
//!   sale profits on refund.
//! * [`withdrawal_api`] runs the withdrawal state machine from request through review to payout.
//!
//! The other submodules in this module are support and utility types.
//!
//! # API usage
//!
//! The pattern for using all the APIs is the same. An API instance is created by supplying a
//! database backend that implements [`crate::traits::StorefrontDatabase`] (the settlement API
//! additionally takes a [`crate::traits::ChainClient`]).
//!
//! ```rust,ignore
//! use storefront_payment_engine::{EngineSettings, LedgerApi, SqliteDatabase};
//! let db = SqliteDatabase::new(25).await?;
//! // SqliteDatabase implements StorefrontDatabase
//! let api = LedgerApi::new(db, EngineSettings::from_env_or_default());
//! // use the api to access information
//! let balance = api.balance(&tenant_id).await?;
//! ```

pub mod ledger_api;
pub mod order_flow_api;
pub mod order_objects;
pub mod settlement_api;
pub mod tenant_api;
pub mod withdrawal_api;
