//! Daemon assembly: database, event subscribers, tenant watchers and the scheduled sweeps.
use futures_util::FutureExt;
use log::*;
use sqlx::{migrate::MigrateDatabase, Sqlite};
use storefront_payment_engine::{
    events::{EventHandlers, EventHooks},
    start_maturity_worker,
    start_order_expiry_worker,
    EngineSettings,
    SqliteDatabase,
    StorefrontDatabase,
    WatcherRegistry,
    MIGRATOR,
};

use crate::{config::WatcherdConfig, errors::WatcherdError, trongrid::TronGridClient};

/// Runs the daemon until ctrl-c, then winds the watchers down cleanly.
pub async fn run_daemon(config: WatcherdConfig) -> Result<(), WatcherdError> {
    let mut db = connect(&config.engine).await?;
    let chain = TronGridClient::new(config.trongrid.clone())?;
    let handlers = EventHandlers::new(8, logging_hooks());
    let producers = handlers.producers();
    handlers.start_handlers().await;

    let mut registry = WatcherRegistry::new(db.clone(), chain, config.engine.clone(), producers);
    let watching = registry.start_active_tenants().await?;
    if watching == 0 {
        warn!("🕰️ No tenants are being watched. Register tenants and set deposit addresses, then restart.");
    }
    let maturity = start_maturity_worker(db.clone(), config.engine.clone());
    let expiry = start_order_expiry_worker(db.clone(), config.engine.clone());

    tokio::signal::ctrl_c().await?;
    info!("🕰️ Shutdown signal received");
    registry.stop_all().await;
    maturity.abort();
    expiry.abort();
    if let Err(e) = db.close().await {
        warn!("🕰️ The database did not close cleanly: {e}");
    }
    Ok(())
}

/// Until a storefront relay subscribes, the daemon's own log is the notification channel.
fn logging_hooks() -> EventHooks {
    let mut hooks = EventHooks::default();
    hooks.on_order_paid(|ev| {
        let late = if ev.late { " (late)" } else { "" };
        info!("📬️ Order [{}] for tenant {} is paid{late}", ev.order.order_id, ev.order.tenant_id);
        async {}.boxed()
    });
    hooks.on_transfer_unmatched(|ev| {
        warn!("📬️ Transfer {} needs manual review: {}", ev.transfer.txid, ev.reason);
        async {}.boxed()
    });
    hooks.on_withdrawal_change(|ev| {
        info!(
            "📬️ Withdrawal #{} for tenant {} is now {}",
            ev.withdrawal.id, ev.withdrawal.tenant_id, ev.withdrawal.status
        );
        async {}.boxed()
    });
    hooks
}

/// Creates the database file on first run, applies pending migrations and opens the pool.
async fn connect(config: &EngineSettings) -> Result<SqliteDatabase, WatcherdError> {
    let url = config.database_url.as_str();
    if !Sqlite::database_exists(url).await.unwrap_or(false) {
        info!("🪛️ Database {url} does not exist yet. Creating it.");
        if let Some(dir) = std::path::Path::new(url.trim_start_matches("sqlite://")).parent() {
            let _ = std::fs::create_dir_all(dir);
        }
        Sqlite::create_database(url).await?;
    }
    let db = SqliteDatabase::new_with_url(url, 25).await?;
    MIGRATOR.run(db.pool()).await?;
    info!("🪛️ Database ready at {url}");
    Ok(db)
}
