//! The whole engine in motion: order to payout in one sitting, and the watcher registry
//! driving settlement off the mock chain feed.
use chrono::{DateTime, Duration, Utc};
use log::*;
use once_cell::sync::Lazy;
use spg_common::{TenantId, TokenAmount};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use storefront_payment_engine::{
    config::DEFAULT_TOKEN_CONTRACT,
    db_types::{Balance, MarkupKind, OrderId, OrderStatusType, TenantSettings},
    events::EventProducers,
    helpers::TokenAddress,
    order_objects::PlaceOrderRequest,
    test_utils::{
        mock_chain::MockChainClient,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::CreditOutcome,
    EngineSettings,
    LedgerApi,
    ObservedTransfer,
    OrderFlowApi,
    SettlementApi,
    SqliteDatabase,
    StorefrontDatabase,
    TenantApi,
    WatcherRegistry,
    WithdrawalApi,
};
use tokio::runtime::Runtime;

const DEPOSIT: &str = "410000000000000000000000000000000000000001";
const SENDER: &str = "410000000000000000000000000000000000000002";
const PAYOUT: &str = "410000000000000000000000000000000000000009";

static SHOP: Lazy<TenantId> = Lazy::new(|| TenantId::agent("shop_a").unwrap());

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
    let tenant = SHOP.clone();
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

fn settled_total(balance: &Balance) -> TokenAmount {
    balance.available + balance.frozen + balance.paid
}

async fn wait_for_status(orders: &OrderFlowApi<SqliteDatabase>, order_id: &OrderId, status: OrderStatusType) -> bool {
    for _ in 0..100 {
        let order = orders.fetch_order(order_id).await.expect("Error fetching order");
        if order.map(|o| o.status) == Some(status) {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    }
    false
}

#[test]
fn full_settlement_cycle() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let (db, config) = setup().await;
        // Zero-width maturity window, so the whole cycle fits in one test
        let config = EngineSettings { maturity_window: Duration::zero(), ..config };
        let tenant = seed_shop(&db, &config).await;
        let orders = OrderFlowApi::new(db.clone(), config.clone());
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        let (order, units) = orders.place_order(request).await.expect("Error placing order");
        assert_eq!(order.total_price, TokenAmount::from_tokens(110));
        assert_eq!(units.len(), 1);

        // The customer pays 110 on chain, exactly as many confirmations deep as the gate demands
        let chain = MockChainClient::default();
        chain.set_confirmations("tx-cycle-1", 2);
        chain.add_transfer(&TokenAddress::parse(DEPOSIT).unwrap(), observed("tx-cycle-1", 110_000_000, Utc::now()));
        let settlement = SettlementApi::new(db.clone(), chain, config.clone(), EventProducers::default());
        let (summary, newest) =
            settlement.poll_tenant(&tenant, Utc::now() - Duration::minutes(60)).await.expect("Error polling");
        assert_eq!(summary.seen, 1);
        assert_eq!(summary.credited, 1);
        assert!(newest.is_some());
        let order = orders.fetch_order(&order.order_id).await.unwrap().expect("Order vanished");
        assert_eq!(order.status, OrderStatusType::Paid);
        assert_eq!(order.txid.as_deref(), Some("tx-cycle-1"));

        // The 10 token markup matures and becomes available
        let ledger = LedgerApi::new(db.clone(), config.clone());
        assert_eq!(ledger.mature_entries().await.expect("Error maturing entries"), 1);
        let balance = ledger.balance(&tenant).await.expect("Error fetching balance");
        assert_eq!(balance.available, TokenAmount::from_tokens(10));
        assert!(balance.pending.is_zero());
        assert_eq!(settled_total(&balance), TokenAmount::from_tokens(10));

        // Hand over the goods
        let order = orders.fulfill_order(&order.order_id).await.expect("Error fulfilling order");
        assert_eq!(order.status, OrderStatusType::Fulfilled);

        // Withdraw the lot. Available + frozen + paid stays constant through every transition.
        let withdrawals = WithdrawalApi::new(db.clone(), config.clone(), EventProducers::default());
        let withdrawal = withdrawals
            .request_withdrawal(&tenant, TokenAmount::from_tokens(10), PAYOUT)
            .await
            .expect("Error requesting withdrawal");
        assert_eq!(withdrawal.fee, TokenAmount::from_tokens(1));
        assert_eq!(withdrawal.payout_amount(), TokenAmount::from_tokens(9));
        let balance = ledger.balance(&tenant).await.unwrap();
        assert!(balance.available.is_zero());
        assert_eq!(balance.frozen, TokenAmount::from_tokens(10));
        assert_eq!(settled_total(&balance), TokenAmount::from_tokens(10));

        withdrawals.approve(withdrawal.id, "dana").await.expect("Error approving");
        let balance = ledger.balance(&tenant).await.unwrap();
        assert_eq!(balance.frozen, TokenAmount::from_tokens(10));
        assert_eq!(settled_total(&balance), TokenAmount::from_tokens(10));

        let settled = withdrawals.mark_paid(withdrawal.id, "dana", "payout-tx-9").await.expect("Error marking paid");
        assert_eq!(settled.entries_marked, 1);
        let balance = ledger.balance(&tenant).await.unwrap();
        assert!(balance.available.is_zero());
        assert!(balance.frozen.is_zero());
        assert_eq!(balance.paid, TokenAmount::from_tokens(10));
        assert_eq!(settled_total(&balance), TokenAmount::from_tokens(10));
        info!("💱️ Full cycle settled cleanly");
        tear_down(db).await;
    });
}

#[test]
fn watcher_registry_credits_fresh_transfers() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let (db, config) = setup().await;
        let config = EngineSettings { poll_interval: Duration::seconds(1), ..config };
        let tenant = seed_shop(&db, &config).await;
        let orders = OrderFlowApi::new(db.clone(), config.clone());
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        let (order, _) = orders.place_order(request).await.expect("Error placing order");

        let chain = MockChainClient::default();
        chain.add_transfer(&TokenAddress::parse(DEPOSIT).unwrap(), observed("tx-watch-1", 110_000_000, Utc::now()));
        let mut registry = WatcherRegistry::new(db.clone(), chain, config.clone(), EventProducers::default());
        let started = registry.start_active_tenants().await.expect("Error starting watchers");
        assert_eq!(started, 1);
        assert!(registry.is_watching(&tenant));
        assert_eq!(registry.watched_tenants(), vec![tenant.clone()]);

        let paid = wait_for_status(&orders, &order.order_id, OrderStatusType::Paid).await;
        assert!(paid, "watcher never credited the order");

        // Stop, restart, and guard against double starts
        assert!(registry.stop(&tenant).await);
        assert!(!registry.is_watching(&tenant));
        assert!(!registry.stop(&tenant).await);
        assert!(registry.start(&tenant));
        assert!(!registry.start(&tenant));
        registry.stop_all().await;
        assert!(registry.watched_tenants().is_empty());
        tear_down(db).await;
    });
}

#[test]
fn watcher_startup_scan_recovers_unsettled_transfers() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async move {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        // A payment lands before its order exists and gets parked
        let settlement =
            SettlementApi::new(db.clone(), MockChainClient::default(), config.clone(), EventProducers::default());
        let outcome =
            settlement.process_observed(&tenant, observed("tx-crash-1", 110_000_000, Utc::now())).await.unwrap();
        assert!(matches!(outcome, CreditOutcome::Unmatched(_)));

        // The order turns up afterwards
        let orders = OrderFlowApi::new(db.clone(), config.clone());
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
        let (order, _) = orders.place_order(request).await.expect("Error placing order");

        // A watcher started over an empty feed still settles the backlog on its startup scan
        let mut registry =
            WatcherRegistry::new(db.clone(), MockChainClient::default(), config.clone(), EventProducers::default());
        assert!(registry.start(&tenant));
        let paid = wait_for_status(&orders, &order.order_id, OrderStatusType::Paid).await;
        assert!(paid, "startup scan never settled the parked transfer");
        registry.stop_all().await;
        tear_down(db).await;
    });
}
