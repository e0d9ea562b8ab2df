//! Event hooks: every ledger-moving action notifies its subscribers exactly once.
use std::sync::{atomic::AtomicI32, Arc, Mutex};

use chrono::{DateTime, Duration, Utc};
use futures_util::FutureExt;
use log::*;
use spg_common::{TenantId, TokenAmount};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use storefront_payment_engine::{
    config::DEFAULT_TOKEN_CONTRACT,
    db_types::{MarkupKind, TenantSettings, WithdrawalStatus},
    events::{EventHandler, EventHandlers, EventHooks, EventProducers, OrderPaidEvent, TransferUnmatchedEvent, WithdrawalEvent},
    order_objects::PlaceOrderRequest,
    test_utils::{
        mock_chain::MockChainClient,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::CreditOutcome,
    EngineSettings,
    ObservedTransfer,
    OrderFlowApi,
    SettlementApi,
    SqliteDatabase,
    StorefrontDatabase,
    TenantApi,
    WithdrawalApi,
};
use tokio::runtime::Runtime;

const DEPOSIT: &str = "410000000000000000000000000000000000000001";
const SENDER: &str = "410000000000000000000000000000000000000002";
const PAYOUT: &str = "410000000000000000000000000000000000000009";

async fn setup() -> (SqliteDatabase, EngineSettings) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 25).await.expect("Error creating database");
    let config = EngineSettings { database_url: url, ..EngineSettings::default() };
    (db, config)
}

async fn tear_down(mut db: SqliteDatabase) {
    let url = db.url().to_string();
    if let Err(e) = db.close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(&url).await.unwrap();
}

async fn seed_shop(db: &SqliteDatabase, config: &EngineSettings) -> TenantId {
    let tenant = TenantId::agent("shop_a").unwrap();
    let tenants = TenantApi::new(db.clone());
    tenants.register_tenant(&tenant).await.expect("Error registering tenant");
    let settings = TenantSettings {
        markup_kind: Some(MarkupKind::Fixed),
        markup_value: Some(TokenAmount::from_tokens(10)),
        deposit_address: Some(DEPOSIT.to_string()),
        ..TenantSettings::default()
    };
    tenants.update_settings(&tenant, settings).await.expect("Error updating settings");
    let payloads = (0..3).map(|i| format!("ACC-{i:03}:hunter2")).collect::<Vec<String>>();
    OrderFlowApi::new(db.clone(), config.clone())
        .add_inventory_units("starter_pack", &payloads)
        .await
        .expect("Error adding stock");
    tenant
}

fn observed(txid: &str, raw_amount: u64, block_time: DateTime<Utc>) -> ObservedTransfer {
    ObservedTransfer {
        txid: txid.to_string(),
        sender: SENDER.to_string(),
        recipient: DEPOSIT.to_string(),
        contract: DEFAULT_TOKEN_CONTRACT.to_string(),
        raw_amount,
        block_time,
    }
}

#[derive(Default, Clone)]
struct HookCalled {
    called: Arc<AtomicI32>,
}

impl HookCalled {
    pub fn called(&self) {
        let _ = self.called.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    }

    pub fn count(&self) -> i32 {
        self.called.load(std::sync::atomic::Ordering::Relaxed)
    }
}

#[test]
fn order_paid_hook_fires_on_credit() {
    let rt = Runtime::new().unwrap();
    let event = HookCalled::default();
    let event_copy = event.clone();
    let seen_orders: Arc<Mutex<Vec<String>>> = Arc::default();
    let seen_copy = Arc::clone(&seen_orders);
    rt.block_on(async move {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let handler = EventHandler::new(8, Arc::new(move |ev: OrderPaidEvent| {
            info!("🪝️ Order [{}] paid (late: {})", ev.order.order_id, ev.late);
            event_copy.called();
            seen_copy.lock().unwrap().push(ev.order.order_id.as_str().to_string());
            async {}.boxed()
        }));
        let mut producers = EventProducers::default();
        producers.order_paid_producer.push(handler.subscribe());
        let drained = tokio::spawn(handler.start_handler());
        let api = SettlementApi::new(db.clone(), MockChainClient::default(), config.clone(), producers);
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        let (order, _) =
            OrderFlowApi::new(db.clone(), config.clone()).place_order(request).await.expect("Error placing order");
        let outcome = api.process_observed(&tenant, observed("tx-0001", 110_000_000, Utc::now())).await.unwrap();
        assert!(matches!(outcome, CreditOutcome::Credited(_)));
        // Dropping the last producer lets the handler drain and exit
        drop(api);
        drained.await.unwrap();
        assert_eq!(seen_orders.lock().unwrap().as_slice(), [order.order_id.as_str().to_string()]);
        tear_down(db).await;
    });
    assert_eq!(event.count(), 1);
    info!("🪝️ test complete");
}

#[test]
fn unmatched_hook_reports_the_reason() {
    let rt = Runtime::new().unwrap();
    let reasons: Arc<Mutex<Vec<String>>> = Arc::default();
    let reasons_copy = Arc::clone(&reasons);
    rt.block_on(async move {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let handler = EventHandler::new(8, Arc::new(move |ev: TransferUnmatchedEvent| {
            info!("🪝️ Transfer {} parked: {}", ev.transfer.txid, ev.reason);
            reasons_copy.lock().unwrap().push(ev.reason);
            async {}.boxed()
        }));
        let mut producers = EventProducers::default();
        producers.transfer_unmatched_producer.push(handler.subscribe());
        let drained = tokio::spawn(handler.start_handler());
        let api = SettlementApi::new(db.clone(), MockChainClient::default(), config.clone(), producers);
        // 33 tokens that nobody ordered
        let outcome = api.process_observed(&tenant, observed("tx-0002", 33_000_000, Utc::now())).await.unwrap();
        assert!(matches!(outcome, CreditOutcome::Unmatched(_)));
        drop(api);
        drained.await.unwrap();
        let reasons = reasons.lock().unwrap();
        assert_eq!(reasons.len(), 1);
        assert!(reasons[0].contains("no pending order"), "unexpected reason: {}", reasons[0]);
        tear_down(db).await;
    });
}

#[test]
fn withdrawal_hook_fires_on_every_transition() {
    let rt = Runtime::new().unwrap();
    let statuses: Arc<Mutex<Vec<WithdrawalStatus>>> = Arc::default();
    let statuses_copy = Arc::clone(&statuses);
    rt.block_on(async move {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        // One matured sale to fund the request
        let settle = SettlementApi::new(db.clone(), MockChainClient::default(), config.clone(), EventProducers::default());
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        OrderFlowApi::new(db.clone(), config.clone()).place_order(request).await.expect("Error placing order");
        settle.process_observed(&tenant, observed("tx-0003", 110_000_000, Utc::now())).await.unwrap();
        db.mature_ledger_entries(Utc::now() + Duration::hours(49)).await.unwrap();
        let handler = EventHandler::new(8, Arc::new(move |ev: WithdrawalEvent| {
            info!("🪝️ Withdrawal #{} is now {}", ev.withdrawal.id, ev.withdrawal.status);
            statuses_copy.lock().unwrap().push(ev.withdrawal.status);
            async {}.boxed()
        }));
        let mut producers = EventProducers::default();
        producers.withdrawal_producer.push(handler.subscribe());
        let drained = tokio::spawn(handler.start_handler());
        let api = WithdrawalApi::new(db.clone(), config.clone(), producers);
        let withdrawal =
            api.request_withdrawal(&tenant, TokenAmount::from_tokens(10), PAYOUT).await.expect("Error requesting");
        api.approve(withdrawal.id, "carol").await.expect("Error approving");
        api.mark_paid(withdrawal.id, "carol", "payout-tx-1").await.expect("Error marking paid");
        drop(api);
        drained.await.unwrap();
        // Handlers run in their own tasks, so assert membership rather than arrival order
        let statuses = statuses.lock().unwrap();
        assert_eq!(statuses.len(), 3);
        for status in [WithdrawalStatus::Requested, WithdrawalStatus::Approved, WithdrawalStatus::Paid] {
            assert!(statuses.contains(&status), "missing {status} event");
        }
        tear_down(db).await;
    });
}

#[test]
fn handlers_compose_from_a_hook_bundle() {
    let rt = Runtime::new().unwrap();
    let event = HookCalled::default();
    let event_copy = event.clone();
    rt.block_on(async move {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let mut hooks = EventHooks::default();
        hooks.on_order_paid(move |ev| {
            info!("🪝️ Order [{}] paid", ev.order.order_id);
            event_copy.called();
            async {}.boxed()
        });
        let handlers = EventHandlers::new(8, hooks);
        let producers = handlers.producers();
        handlers.start_handlers().await;
        let api = SettlementApi::new(db.clone(), MockChainClient::default(), config.clone(), producers);
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        OrderFlowApi::new(db.clone(), config.clone()).place_order(request).await.expect("Error placing order");
        let outcome = api.process_observed(&tenant, observed("tx-0004", 110_000_000, Utc::now())).await.unwrap();
        assert!(matches!(outcome, CreditOutcome::Credited(_)));
        drop(api);
        // The detached handler task delivers in the background; give it a moment
        let mut waited = 0;
        while event.count() < 1 && waited < 5_000 {
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            waited += 50;
        }
        assert_eq!(event.count(), 1);
        tear_down(db).await;
    });
}
