use std::fmt::Debug;

use log::*;

use crate::{
    config::EngineSettings,
    db_types::{InventoryUnit, NewOrder, Order, OrderId, OrderStatusType, TenantStatus},
    pricing,
    spe_api::order_objects::{OrderQueryFilter, PlaceOrderRequest},
    traits::{ExpiryOutcome, StorefrontDatabase, StorefrontError},
};

/// `OrderFlowApi` handles order placement and the order lifecycle in response to storefront
/// events, along with inventory intake and the raw stock operations.
pub struct OrderFlowApi<B> {
    db: B,
    config: EngineSettings,
}

impl<B> Debug for OrderFlowApi<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "OrderFlowApi")
    }
}

impl<B> OrderFlowApi<B> {
    pub fn new(db: B, config: EngineSettings) -> Self {
        Self { db, config }
    }
}

impl<B> OrderFlowApi<B>
where B: StorefrontDatabase
{
    /// Prices and places a new order, reserving `quantity` units of stock for it atomically.
    ///
    /// The tenant must be `Active`. The customer-facing unit price is the request's base price
    /// plus the tenant's resolved markup; the markup times the quantity is the profit that will
    /// land in the tenant's ledger when the order is credited. When the category cannot cover
    /// the quantity the whole placement fails with `OutOfStock` and nothing is reserved.
    pub async fn place_order(
        &self,
        request: PlaceOrderRequest,
    ) -> Result<(Order, Vec<InventoryUnit>), StorefrontError> {
        let profile = self.db.tenant_profile(&request.tenant_id).await?;
        if !matches!(profile.status, TenantStatus::Active) {
            return Err(StorefrontError::TenantNotActive { tenant: profile.id, status: profile.status });
        }
        let (kind, value) = self.config.resolve_markup(&profile.settings());
        let quote = pricing::quote(request.base_price, kind, value)?;
        let markup_total = quote.markup.checked_scale(request.quantity).ok_or_else(|| {
            StorefrontError::OrderValidation(format!("markup overflows at quantity {}", request.quantity))
        })?;
        let total_price = quote.unit_price.checked_scale(request.quantity).ok_or_else(|| {
            StorefrontError::OrderValidation(format!("total price overflows at quantity {}", request.quantity))
        })?;
        let order_id = request.order_id.unwrap_or_else(OrderId::generate);
        let order = NewOrder {
            order_id,
            tenant_id: request.tenant_id,
            customer_id: request.customer_id,
            category: request.category,
            quantity: request.quantity,
            base_price: request.base_price,
            unit_price: quote.unit_price,
            markup_total,
            total_price,
        };
        let (order, units) = self.db.insert_order(order).await?;
        debug!(
            "🛒️ Order [{}] placed for tenant {}: {} x '{}' at {} each, {} total ({} markup)",
            order.order_id,
            order.tenant_id,
            order.quantity,
            order.category,
            order.unit_price,
            order.total_price,
            order.markup_total
        );
        Ok((order, units))
    }

    pub async fn fetch_order(&self, order_id: &OrderId) -> Result<Option<Order>, StorefrontError> {
        self.db.order_by_id(order_id).await
    }

    pub async fn search_orders(&self, query: OrderQueryFilter) -> Result<Vec<Order>, StorefrontError> {
        self.db.search_orders(query).await
    }

    pub async fn units_for_order(&self, order_id: &OrderId) -> Result<Vec<InventoryUnit>, StorefrontError> {
        self.db.units_for_order(order_id).await
    }

    /// Aborts a pending order. Its reserved units go back on the shelf atomically.
    pub async fn cancel_order(&self, order_id: &OrderId) -> Result<Order, StorefrontError> {
        let order = self.db.cancel_or_expire_order(order_id, OrderStatusType::Failed).await?;
        info!("🛒️ Order [{}] cancelled and its reserved stock released", order.order_id);
        Ok(order)
    }

    /// Expires a single pending order by hand, ahead of the sweep.
    pub async fn expire_order(&self, order_id: &OrderId) -> Result<Order, StorefrontError> {
        let order = self.db.cancel_or_expire_order(order_id, OrderStatusType::Expired).await?;
        info!("🛒️ Order [{}] expired and its reserved stock released", order.order_id);
        Ok(order)
    }

    /// Marks a paid order fulfilled once the goods have been handed over.
    pub async fn fulfill_order(&self, order_id: &OrderId) -> Result<Order, StorefrontError> {
        let order = self.db.fulfill_order(order_id).await?;
        info!("🛒️ Order [{}] fulfilled", order.order_id);
        Ok(order)
    }

    /// Expires every unpaid order older than the configured payment window, releasing the
    /// reserved stock. The order-expiry worker calls this on a fixed timer.
    pub async fn expire_old_orders(&self) -> Result<ExpiryOutcome, StorefrontError> {
        let outcome = self.db.expire_old_orders(self.config.order_expiry).await?;
        if outcome.expired_count() > 0 {
            info!(
                "🛒️ {} unpaid orders older than {} min expired; {} units released",
                outcome.expired_count(),
                self.config.order_expiry.num_minutes(),
                outcome.released_units
            );
        }
        Ok(outcome)
    }

    //----------------------------------------- Inventory ---------------------------------------

    /// Adds sellable units to a category. Returns how many were inserted.
    pub async fn add_inventory_units(&self, category: &str, payloads: &[String]) -> Result<u64, StorefrontError> {
        let added = self.db.add_inventory_units(category, payloads).await?;
        info!("📦️ {added} units added to category '{category}'");
        Ok(added)
    }

    pub async fn stock_level(&self, category: &str) -> Result<i64, StorefrontError> {
        self.db.stock_level(category).await
    }

    /// Claims one available unit outside of any order, e.g. for a manual hand-over.
    pub async fn reserve_unit(&self, category: &str) -> Result<InventoryUnit, StorefrontError> {
        self.db.reserve_unit(category).await
    }

    /// Returns a reserved-but-unused unit to the shelf.
    pub async fn release_unit(&self, unit_id: i64) -> Result<InventoryUnit, StorefrontError> {
        self.db.release_unit(unit_id).await
    }

    pub fn db(&self) -> &B {
        &self.db
    }

    pub fn db_mut(&mut self) -> &mut B {
        &mut self.db
    }
}
