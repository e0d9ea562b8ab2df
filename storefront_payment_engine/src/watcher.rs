//! Per-tenant transfer watchers.
//!
//! A watcher is one polling task: every tick it asks the [`ChainClient`] for fresh transfers to
//! its tenant's deposit address and feeds them through the settlement pipeline. The
//! [`WatcherRegistry`] owns every running watcher, keyed by tenant id, and is the only way to
//! start or stop one. There is no global state; the registry goes down with its owner and the
//! tasks go down with the registry.

use std::collections::HashMap;

use chrono::Utc;
use log::*;
use spg_common::TenantId;
use tokio::{sync::watch, task::JoinHandle, time::MissedTickBehavior};

use crate::{
    config::EngineSettings,
    events::EventProducers,
    spe_api::settlement_api::SettlementApi,
    sqlite::SqliteDatabase,
    traits::{ChainClient, StorefrontDatabase, StorefrontError},
};

struct WatcherHandle {
    stop: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Owns the polling task of every watched tenant.
///
/// `start` is idempotent per tenant: a tenant that is already being watched is left alone.
/// `stop` signals the task and waits for it, so a credit transaction in flight always commits
/// before the watcher winds down.
pub struct WatcherRegistry<C> {
    db: SqliteDatabase,
    chain: C,
    config: EngineSettings,
    producers: EventProducers,
    watchers: HashMap<TenantId, WatcherHandle>,
}

impl<C> std::fmt::Debug for WatcherRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "WatcherRegistry({} watchers)", self.watchers.len())
    }
}

impl<C> WatcherRegistry<C>
where C: ChainClient
{
    pub fn new(db: SqliteDatabase, chain: C, config: EngineSettings, producers: EventProducers) -> Self {
        Self { db, chain, config, producers, watchers: HashMap::new() }
    }

    /// Spawns a watcher task for the tenant. Returns `false` when one is already running.
    pub fn start(&mut self, tenant: &TenantId) -> bool {
        if let Some(handle) = self.watchers.get(tenant) {
            if !handle.task.is_finished() {
                debug!("👀️ Tenant {tenant} is already being watched");
                return false;
            }
        }
        let (stop, stop_rx) = watch::channel(false);
        let api = SettlementApi::new(
            self.db.clone(),
            self.chain.clone(),
            self.config.clone(),
            self.producers.clone(),
        );
        let poll_interval = self.config.poll_interval.to_std().unwrap_or(std::time::Duration::from_secs(60));
        let window = self.config.match_window;
        let id = tenant.clone();
        let task = tokio::spawn(async move {
            info!("👀️ Watcher for tenant {id} started");
            // Crash recovery. Whatever was recorded but never settled gets a pass before the
            // polling window opens.
            if let Err(e) = api.scan_pending(&id).await {
                error!("👀️ Startup scan for tenant {id} failed: {e}");
            }
            let mut since = Utc::now() - window;
            let mut timer = tokio::time::interval(poll_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut stop = stop_rx;
            loop {
                tokio::select! {
                    _ = stop.changed() => break,
                    _ = timer.tick() => {
                        match api.poll_tenant(&id, since).await {
                            // The poll window only moves forward, to the newest block seen.
                            // Re-observing that block next tick is harmless; recording is
                            // idempotent on txid.
                            Ok((_, Some(newest))) => since = newest,
                            Ok((_, None)) => {},
                            Err(e) => error!("👀️ Poll for tenant {id} failed: {e}"),
                        }
                    },
                }
            }
            info!("👀️ Watcher for tenant {id} stopped");
        });
        self.watchers.insert(tenant.clone(), WatcherHandle { stop, task });
        true
    }

    /// Starts a watcher for every `Active` tenant that has a deposit address to watch.
    /// Returns how many watchers were newly started.
    pub async fn start_active_tenants(&mut self) -> Result<usize, StorefrontError> {
        let tenants = self.db.active_tenants().await?;
        let mut started = 0;
        for profile in tenants {
            if self.config.resolve_deposit_address(&profile.settings()).is_none() {
                warn!("👀️ Tenant {} has no deposit address. Not watching it", profile.id);
                continue;
            }
            if self.start(&profile.id) {
                started += 1;
            }
        }
        info!("👀️ Watching {started} tenants");
        Ok(started)
    }

    /// Stops the tenant's watcher and waits for the task to finish its current tick.
    /// Returns `false` when the tenant was not being watched.
    pub async fn stop(&mut self, tenant: &TenantId) -> bool {
        let Some(handle) = self.watchers.remove(tenant) else {
            return false;
        };
        // The send fails if the task already exited on its own. The join below settles it
        // either way.
        let _ = handle.stop.send(true);
        if let Err(e) = handle.task.await {
            warn!("👀️ Watcher task for tenant {tenant} did not shut down cleanly: {e}");
        }
        true
    }

    pub async fn stop_all(&mut self) {
        let tenants = self.watchers.keys().cloned().collect::<Vec<TenantId>>();
        for tenant in &tenants {
            self.stop(tenant).await;
        }
        if !tenants.is_empty() {
            info!("👀️ All {} watchers stopped", tenants.len());
        }
    }

    pub fn is_watching(&self, tenant: &TenantId) -> bool {
        self.watchers.get(tenant).map(|h| !h.task.is_finished()).unwrap_or(false)
    }

    pub fn watched_tenants(&self) -> Vec<TenantId> {
        self.watchers.keys().cloned().collect()
    }
}
