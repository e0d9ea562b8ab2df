//! Stock reservation under contention: N buyers, K units, never more than K sales.
use std::collections::HashSet;

use chrono::Duration;
use futures_util::future::join_all;
use log::*;
use spg_common::{TenantId, TokenAmount};
use sqlx::{migrate::MigrateDatabase, Sqlite};
use storefront_payment_engine::{
    db_types::{OrderStatusType, TenantStatus},
    order_objects::{OrderQueryFilter, PlaceOrderRequest},
    test_utils::prepare_env::{prepare_test_env, random_db_path},
    EngineSettings,
    OrderFlowApi,
    SqliteDatabase,
    StorefrontDatabase,
    StorefrontError,
    TenantApi,
};
use tokio::runtime::Runtime;

async fn setup() -> (SqliteDatabase, EngineSettings) {
    let url = random_db_path();
    prepare_test_env(&url).await;
    let db = SqliteDatabase::new_with_url(&url, 25).await.expect("Error creating database");
    let config = EngineSettings { database_url: url, ..EngineSettings::default() };
    (db, config)
}

async fn tear_down(mut api: OrderFlowApi<SqliteDatabase>) {
    if let Err(e) = api.db_mut().close().await {
        error!("🚀️ Failed to close database: {e}");
    }
    Sqlite::drop_database(api.db().url()).await.unwrap();
}

fn payloads(n: usize) -> Vec<String> {
    (0..n).map(|i| format!("ACC-{i:03}:hunter2")).collect()
}

async fn seed_shop(db: &SqliteDatabase, config: &EngineSettings, units: usize) -> TenantId {
    let tenant = TenantId::agent("shop_a").unwrap();
    TenantApi::new(db.clone()).register_tenant(&tenant).await.expect("Error registering tenant");
    let api = OrderFlowApi::new(db.clone(), config.clone());
    api.add_inventory_units("starter_pack", &payloads(units)).await.expect("Error adding stock");
    tenant
}

#[test]
fn ten_buyers_three_units() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config, 3).await;
        let api = OrderFlowApi::new(db.clone(), config);
        let requests = (0..10)
            .map(|i| {
                PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(5))
                    .with_customer(format!("buyer_{i}"))
            })
            .collect::<Vec<PlaceOrderRequest>>();
        let results = join_all(requests.into_iter().map(|r| api.place_order(r))).await;
        let mut sold_units = HashSet::new();
        let mut wins = 0;
        let mut sold_out = 0;
        for result in results {
            match result {
                Ok((_, units)) => {
                    wins += 1;
                    assert_eq!(units.len(), 1);
                    sold_units.insert(units[0].id);
                },
                Err(StorefrontError::OutOfStock(category)) => {
                    sold_out += 1;
                    assert_eq!(category, "starter_pack");
                },
                Err(e) => panic!("Unexpected error placing order: {e}"),
            }
        }
        assert_eq!(wins, 3, "exactly as many sales as units");
        assert_eq!(sold_out, 7);
        assert_eq!(sold_units.len(), 3, "no unit was handed out twice");
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 0);
        tear_down(api).await;
    });
}

#[test]
fn short_stock_rolls_back_the_whole_order() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config, 2).await;
        let api = OrderFlowApi::new(db.clone(), config);
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 3, TokenAmount::from_tokens(5));
        let err = api.place_order(request).await.unwrap_err();
        assert!(matches!(err, StorefrontError::OutOfStock(_)));
        // Nothing survives the rollback: both units are still on the shelf and no order row exists
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 2);
        let orders = api.search_orders(OrderQueryFilter::default().for_tenant(tenant.clone())).await.unwrap();
        assert!(orders.is_empty());
        let request = PlaceOrderRequest::new(tenant, "starter_pack", 2, TokenAmount::from_tokens(5));
        let (order, units) = api.place_order(request).await.expect("Error placing order");
        assert_eq!(order.quantity, 2);
        assert_eq!(units.len(), 2);
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 0);
        tear_down(api).await;
    });
}

#[test]
fn cancelling_restores_the_stock() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config, 2).await;
        let api = OrderFlowApi::new(db.clone(), config);
        let request = PlaceOrderRequest::new(tenant, "starter_pack", 2, TokenAmount::from_tokens(5));
        let (order, _) = api.place_order(request).await.expect("Error placing order");
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 0);
        let cancelled = api.cancel_order(&order.order_id).await.expect("Error cancelling order");
        assert_eq!(cancelled.status, OrderStatusType::Failed);
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 2);
        assert!(api.units_for_order(&order.order_id).await.unwrap().is_empty());
        // A cancelled order cannot be cancelled again
        let err = api.cancel_order(&order.order_id).await.unwrap_err();
        assert!(matches!(err, StorefrontError::InvalidTransition { .. }));
        tear_down(api).await;
    });
}

#[test]
fn unpaid_orders_expire_and_release_their_units() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let config = EngineSettings { order_expiry: Duration::seconds(0), ..config };
        let tenant = seed_shop(&db, &config, 3).await;
        let api = OrderFlowApi::new(db.clone(), config);
        let request = PlaceOrderRequest::new(tenant, "starter_pack", 2, TokenAmount::from_tokens(5));
        let (order, _) = api.place_order(request).await.expect("Error placing order");
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 1);
        // The sweep works on second granularity, so let the order age past the (zero) limit
        tokio::time::sleep(std::time::Duration::from_millis(1500)).await;
        let outcome = api.expire_old_orders().await.expect("Error running the expiry sweep");
        assert_eq!(outcome.expired_count(), 1);
        assert_eq!(outcome.released_units, 2);
        assert_eq!(outcome.expired[0].order_id, order.order_id);
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 3);
        let expired = api.fetch_order(&order.order_id).await.unwrap().unwrap();
        assert_eq!(expired.status, OrderStatusType::Expired);
        tear_down(api).await;
    });
}

#[test]
fn paused_tenants_cannot_place_orders() {
    let rt = Runtime::new().unwrap();
    rt.block_on(async {
        let (db, config) = setup().await;
        let tenant = seed_shop(&db, &config, 1).await;
        let tenants = TenantApi::new(db.clone());
        tenants.set_status(&tenant, TenantStatus::Paused).await.expect("Error pausing tenant");
        let profile = tenants.profile(&tenant).await.expect("Error fetching profile");
        assert_eq!(profile.status, TenantStatus::Paused);
        let api = OrderFlowApi::new(db.clone(), config);
        let request = PlaceOrderRequest::new(tenant.clone(), "starter_pack", 1, TokenAmount::from_tokens(5));
        let err = api.place_order(request).await.unwrap_err();
        assert!(matches!(err, StorefrontError::TenantNotActive { .. }));
        assert_eq!(api.stock_level("starter_pack").await.unwrap(), 1);
        tear_down(api).await;
    });
}
