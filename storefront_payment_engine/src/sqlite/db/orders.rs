use chrono::Duration;
use log::{debug, trace};
use spg_common::TokenAmount;
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{NewOrder, Order, OrderId, OrderStatusType, TransferRecord},
    spe_api::order_objects::OrderQueryFilter,
    traits::StorefrontError,
};

pub async fn insert_order(order: NewOrder, conn: &mut SqliteConnection) -> Result<Order, StorefrontError> {
    let order_id = order.order_id.clone();
    let order: Order = sqlx::query_as(
        r#"
            INSERT INTO orders (
                order_id,
                tenant_id,
                customer_id,
                category,
                quantity,
                base_price,
                unit_price,
                markup_total,
                total_price
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(order.order_id)
    .bind(order.tenant_id)
    .bind(order.customer_id)
    .bind(order.category)
    .bind(order.quantity)
    .bind(order.base_price)
    .bind(order.unit_price)
    .bind(order.markup_total)
    .bind(order.total_price)
    .fetch_one(conn)
    .await
    .map_err(|e| match e {
        sqlx::Error::Database(err) if err.is_unique_violation() => {
            StorefrontError::OrderValidation(format!("Order id {order_id} already exists"))
        },
        _ => StorefrontError::from(e),
    })?;
    debug!("🛒️ Order [{}] inserted with id {}", order.order_id, order.id);
    Ok(order)
}

pub async fn fetch_order_by_order_id(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order =
        sqlx::query_as("SELECT * FROM orders WHERE order_id = $1").bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Fetches orders according to criteria specified in the `OrderQueryFilter`
///
/// Resulting orders are ordered by `created_at` in ascending order
pub async fn search_orders(query: OrderQueryFilter, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let mut builder = QueryBuilder::new(
        r#"
    SELECT * FROM orders
    "#,
    );
    if !query.is_empty() {
        builder.push("WHERE ");
    }
    let mut where_clause = builder.separated(" AND ");
    if let Some(order_id) = query.order_id {
        where_clause.push("order_id = ");
        where_clause.push_bind_unseparated(order_id.to_string());
    }
    if let Some(tenant) = query.tenant_id {
        where_clause.push("tenant_id = ");
        where_clause.push_bind_unseparated(tenant.as_str().to_string());
    }
    if let Some(cid) = query.customer_id {
        where_clause.push("customer_id = ");
        where_clause.push_bind_unseparated(cid);
    }
    if let Some(category) = query.category {
        where_clause.push("category = ");
        where_clause.push_bind_unseparated(category);
    }
    if query.status.as_ref().map(|s| !s.is_empty()).unwrap_or(false) {
        let mut statuses = vec![];
        query.status.as_ref().unwrap().iter().for_each(|s| {
            statuses.push(format!("'{s}'"));
        });
        let status_clause = statuses.join(",");
        where_clause.push(format!("status IN ({status_clause})"));
    }
    if let Some(since) = query.since {
        where_clause.push(format!("unixepoch(created_at) >= {}", since.timestamp()));
    }
    if let Some(until) = query.until {
        where_clause.push(format!("unixepoch(created_at) <= {}", until.timestamp()));
    }
    builder.push(" ORDER BY created_at ASC");

    trace!("🛒️ Executing query: {}", builder.sql());
    let query = builder.build_query_as::<Order>();
    let orders = query.fetch_all(conn).await?;
    trace!("🛒️ Result of search_orders: {:?}", orders.len());
    Ok(orders)
}

/// Compare-and-set on the order status. `None` means the order was missing or not in any of the
/// `from` statuses; nothing was written in that case.
pub(crate) async fn transition_status(
    order_id: &OrderId,
    from: &[OrderStatusType],
    to: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let from_clause = from.iter().map(|s| format!("'{s}'")).collect::<Vec<String>>().join(",");
    let query = format!(
        "UPDATE orders SET status = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 AND status IN \
         ({from_clause}) RETURNING *"
    );
    let order = sqlx::query_as(&query).bind(to).bind(order_id.as_str()).fetch_optional(conn).await?;
    Ok(order)
}

/// Compare-and-set to `Paid`, recording the paying transaction id. The expected source status is
/// part of the guard so a concurrent expiry sweep cannot slip in between read and write.
pub(crate) async fn mark_paid(
    order_id: &OrderId,
    txid: &str,
    expected: OrderStatusType,
    conn: &mut SqliteConnection,
) -> Result<Option<Order>, sqlx::Error> {
    let order = sqlx::query_as(
        "UPDATE orders SET status = 'Paid', txid = $1, updated_at = CURRENT_TIMESTAMP WHERE order_id = $2 AND status \
         = $3 RETURNING *",
    )
    .bind(txid)
    .bind(order_id.as_str())
    .bind(expected)
    .fetch_optional(conn)
    .await?;
    Ok(order)
}

pub(crate) async fn expire_orders(limit: Duration, conn: &mut SqliteConnection) -> Result<Vec<Order>, sqlx::Error> {
    let rows = sqlx::query_as(
        format!(
            "UPDATE orders SET updated_at = CURRENT_TIMESTAMP, status = 'Expired' WHERE status = 'PendingPayment' AND \
             (unixepoch(CURRENT_TIMESTAMP) - unixepoch(created_at)) > {} RETURNING *;",
            limit.num_seconds()
        )
        .as_str(),
    )
    .fetch_all(conn)
    .await?;
    Ok(rows)
}

/// Pending orders of the transfer's tenant whose total lies within `tolerance` of the transfer
/// amount and whose creation time lies within `window` of the block time. Oldest first, so the
/// head of the list is the match.
pub(crate) async fn candidates_for_transfer(
    transfer: &TransferRecord,
    window: Duration,
    tolerance: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<Vec<Order>, sqlx::Error> {
    let block_time = transfer.block_time.timestamp();
    let orders = sqlx::query_as(
        r#"
        SELECT * FROM orders
        WHERE tenant_id = $1 AND status = 'PendingPayment'
          AND total_price BETWEEN $2 AND $3
          AND unixepoch(created_at) BETWEEN $4 AND $5
        ORDER BY created_at ASC, id ASC;
        "#,
    )
    .bind(transfer.tenant_id.as_str())
    .bind(transfer.amount - tolerance)
    .bind(transfer.amount + tolerance)
    .bind(block_time - window.num_seconds())
    .bind(block_time + window.num_seconds())
    .fetch_all(conn)
    .await?;
    Ok(orders)
}
