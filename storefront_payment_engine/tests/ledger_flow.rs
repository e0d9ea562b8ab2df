//! The profit ledger: maturity, reverts and the append-only audit rules.
use chrono::{DateTime, Duration, Utc};
use log::*;
use spg_common::{TenantId, TokenAmount};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use storefront_payment_engine::{
    config::DEFAULT_TOKEN_CONTRACT,
    db_types::{LedgerEntryKind, LedgerStatus, MarkupKind, Order, OrderId, TenantSettings},
    events::EventProducers,
    order_objects::PlaceOrderRequest,
    start_maturity_worker,
    test_utils::{
        mock_chain::MockChainClient,
        prepare_env::{prepare_test_env, random_db_path},
    },
    traits::{CreditOutcome, InsertEntryResult},
    EngineSettings,
    LedgerApi,
    ObservedTransfer,
    OrderFlowApi,
    SettlementApi,
    SqliteDatabase,
    StorefrontDatabase,
    StorefrontError,
    TenantApi,
};
use tokio::runtime::Runtime;

const DEPOSIT: &str = "410000000000000000000000000000000000000001";
const SENDER: &str = "410000000000000000000000000000000000000002";

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
    let payloads = (0..10).map(|i| format!("ACC-{i:03}:hunter2")).collect::<Vec<String>>();
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

/// Places a 110-token order and credits it, leaving 10 tokens of pending profit.
async fn credit_one(db: &SqliteDatabase, config: &EngineSettings, tenant: &TenantId, txid: &str) -> Order {
    let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(100));
    let (order, _) =
        OrderFlowApi::new(db.clone(), config.clone()).place_order(request).await.expect("Error placing order");
    let chain = MockChainClient::default();
    let api = SettlementApi::new(db.clone(), chain, config.clone(), EventProducers::default());
    let outcome = api.process_observed(tenant, observed(txid, 110_000_000, Utc::now())).await.unwrap();
    assert!(matches!(outcome, CreditOutcome::Credited(_)));
    order
}

#[test]
fn profit_matures_only_after_the_window() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        credit_one(&db, &config, &tenant, "tx-0001").await;
        let ledger = LedgerApi::new(db.clone(), config.clone());
        let balance = ledger.balance(&tenant).await.unwrap();
        assert_eq!(balance.pending, TokenAmount::from_tokens(10));
        assert!(balance.available.is_zero());
        // 47 hours in: one hour short of the window
        let matured = db.mature_ledger_entries(Utc::now() + Duration::hours(47)).await.unwrap();
        assert_eq!(matured, 0);
        let balance = ledger.balance(&tenant).await.unwrap();
        assert_eq!(balance.pending, TokenAmount::from_tokens(10));
        // 49 hours in: the profit is withdrawable
        let matured = db.mature_ledger_entries(Utc::now() + Duration::hours(49)).await.unwrap();
        assert_eq!(matured, 1);
        let balance = ledger.balance(&tenant).await.unwrap();
        assert!(balance.pending.is_zero());
        assert_eq!(balance.available, TokenAmount::from_tokens(10));
        tear_down(db).await;
    });
}

#[test]
fn revert_before_maturity_cancels_the_sale() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let order = credit_one(&db, &config, &tenant, "tx-0002").await;
        let ledger = LedgerApi::new(db.clone(), config.clone());
        let refund = ledger.revert_order_profit(&order.order_id).await.expect("Error reverting profit");
        assert_eq!(refund.kind, LedgerEntryKind::Refund);
        assert_eq!(refund.amount, -TokenAmount::from_tokens(10));
        assert_eq!(refund.status, LedgerStatus::Reverted);
        let balance = ledger.balance(&tenant).await.unwrap();
        assert!(balance.pending.is_zero(), "the reverted sale no longer counts as pending");
        assert!(balance.available.is_zero());
        let entries = ledger.entries_for_order(&order.order_id).await.unwrap();
        assert_eq!(entries.len(), 2);
        let sale = entries.iter().find(|e| e.kind == LedgerEntryKind::Sale).unwrap();
        assert_eq!(sale.status, LedgerStatus::Reverted);
        assert_eq!(sale.amount, TokenAmount::from_tokens(10), "amounts are immutable, only the status moved");
        // Reverting twice returns the refund already on file
        let again = ledger.revert_order_profit(&order.order_id).await.expect("Error re-reverting profit");
        assert_eq!(again.id, refund.id);
        assert_eq!(ledger.entries_for_order(&order.order_id).await.unwrap().len(), 2);
        tear_down(db).await;
    });
}

#[test]
fn revert_after_maturity_offsets_the_balance() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let order = credit_one(&db, &config, &tenant, "tx-0003").await;
        db.mature_ledger_entries(Utc::now() + Duration::hours(49)).await.unwrap();
        let ledger = LedgerApi::new(db.clone(), config.clone());
        assert_eq!(ledger.balance(&tenant).await.unwrap().available, TokenAmount::from_tokens(10));
        let refund = ledger.revert_order_profit(&order.order_id).await.expect("Error reverting profit");
        assert_eq!(refund.status, LedgerStatus::Matured, "a matured sale is offset, not rewritten");
        assert_eq!(refund.amount, -TokenAmount::from_tokens(10));
        let balance = ledger.balance(&tenant).await.unwrap();
        assert!(balance.available.is_zero());
        let entries = ledger.entries_for_order(&order.order_id).await.unwrap();
        let sale = entries.iter().find(|e| e.kind == LedgerEntryKind::Sale).unwrap();
        assert_eq!(sale.status, LedgerStatus::Matured, "the sale entry itself is untouched");
        // Newest first in the history view
        let history = ledger.history(&tenant, 10).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].kind, LedgerEntryKind::Refund);
        tear_down(db).await;
    });
}

#[test]
fn nothing_to_revert_is_an_error() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        seed_shop(&db, &config).await;
        let ledger = LedgerApi::new(db.clone(), config.clone());
        let missing = OrderId::from("never-credited".to_string());
        let err = ledger.revert_order_profit(&missing).await.unwrap_err();
        assert!(matches!(err, StorefrontError::NothingToRevert { .. }));
        tear_down(db).await;
    });
}

#[test]
fn manual_profit_records_are_idempotent() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config).await;
        let ledger = LedgerApi::new(db.clone(), config.clone());
        // An off-chain settlement, booked by hand
        let order_id = OrderId::from("manual-0001".to_string());
        let result = ledger.record_profit(&tenant, &order_id, TokenAmount::from_tokens(7)).await.unwrap();
        assert!(result.is_new());
        assert_eq!(result.entry().status, LedgerStatus::Pending);
        let result = ledger.record_profit(&tenant, &order_id, TokenAmount::from_tokens(7)).await.unwrap();
        let InsertEntryResult::AlreadyRecorded(entry) = result else {
            panic!("Expected the duplicate to be swallowed");
        };
        assert_eq!(entry.amount, TokenAmount::from_tokens(7));
        assert_eq!(ledger.balance(&tenant).await.unwrap().pending, TokenAmount::from_tokens(7));
        tear_down(db).await;
    });
}

#[test]
fn maturity_worker_flips_entries_on_its_timer() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let config = EngineSettings {
            maturity_window: Duration::zero(),
            maturity_sweep_interval: Duration::seconds(1),
            ..config
        };
        let tenant = seed_shop(&db, &config).await;
        credit_one(&db, &config, &tenant, "tx-0004").await;
        let worker = start_maturity_worker(db.clone(), config.clone());
        let ledger = LedgerApi::new(db.clone(), config.clone());
        let mut waited = 0;
        while ledger.balance(&tenant).await.unwrap().available.is_zero() && waited < 5_000 {
            tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            waited += 100;
        }
        worker.abort();
        let balance = ledger.balance(&tenant).await.unwrap();
        assert_eq!(balance.available, TokenAmount::from_tokens(10));
        assert!(balance.pending.is_zero());
        tear_down(db).await;
    });
}
