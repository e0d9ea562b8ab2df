//! # SPG settlement watcher daemon
//!
//! `spg_watcherd` is the long-running half of the storefront payment gateway. It connects the
//! payment engine to TronGrid, runs one watcher task per active tenant feeding observed
//! transfers into settlement, and drives the scheduled profit-maturity and order-expiry sweeps.
//!
//! ## Configuration
//! Everything is read from the environment with an `SPG_` prefix and falls back to a logged
//! default. See [config] for the daemon's own variables; the engine documents the rest.

pub mod config;
pub mod daemon;
pub mod errors;
pub mod trongrid;
