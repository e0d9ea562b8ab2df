//! Scheduled background jobs: the ledger maturity sweep and the unpaid-order expiry sweep.
//!
//! Both are plain interval loops. They log failures and carry on; a broken sweep is retried on
//! the next tick with no state to repair.

use log::*;
use tokio::task::JoinHandle;

use crate::{
    config::EngineSettings,
    spe_api::{ledger_api::LedgerApi, order_flow_api::OrderFlowApi},
    sqlite::SqliteDatabase,
};

/// Starts the maturity sweep worker. Do not await the returned JoinHandle, it runs until the
/// process exits.
///
/// Every tick flips ledger entries whose maturity timestamp has passed from `Pending` to
/// `Matured`, which is the moment their profit becomes withdrawable.
pub fn start_maturity_worker(db: SqliteDatabase, config: EngineSettings) -> JoinHandle<()> {
    let interval = config.maturity_sweep_interval.to_std().unwrap_or(std::time::Duration::from_secs(600));
    let api = LedgerApi::new(db, config);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(interval);
        info!("🕰️ Ledger maturity worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running ledger maturity sweep");
            if let Err(e) = api.mature_entries().await {
                error!("🕰️ Ledger maturity sweep failed: {e}");
            }
        }
    })
}

/// Starts the order expiry worker. Do not await the returned JoinHandle, it runs until the
/// process exits.
///
/// Every minute, unpaid orders older than the configured expiry are moved to `Expired` and
/// their reserved stock is released back for sale.
pub fn start_order_expiry_worker(db: SqliteDatabase, config: EngineSettings) -> JoinHandle<()> {
    let api = OrderFlowApi::new(db, config);
    tokio::spawn(async move {
        let mut timer = tokio::time::interval(std::time::Duration::from_secs(60));
        info!("🕰️ Order expiry worker started");
        loop {
            timer.tick().await;
            debug!("🕰️ Running order expiry sweep");
            match api.expire_old_orders().await {
                Ok(outcome) if outcome.expired_count() > 0 => {
                    debug!("🕰️ Expired orders: {}", order_list(&outcome.expired));
                },
                Ok(_) => {},
                Err(e) => error!("🕰️ Order expiry sweep failed: {e}"),
            }
        }
    })
}

fn order_list(orders: &[crate::db_types::Order]) -> String {
    orders
        .iter()
        .map(|o| format!("[{}] {} for {}", o.order_id, o.total_price, o.tenant_id))
        .collect::<Vec<String>>()
        .join(", ")
}
