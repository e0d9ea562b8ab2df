use log::{debug, trace};
use sqlx::{QueryBuilder, SqliteConnection};

use crate::{
    db_types::{InventoryUnit, OrderId},
    traits::StorefrontError,
};

pub async fn add_units(
    category: &str,
    payloads: &[String],
    conn: &mut SqliteConnection,
) -> Result<u64, StorefrontError> {
    if payloads.is_empty() {
        return Ok(0);
    }
    let mut builder = QueryBuilder::new("INSERT INTO inventory_units (category, payload) ");
    builder.push_values(payloads, |mut row, payload| {
        row.push_bind(category).push_bind(payload);
    });
    let result = builder.build().execute(conn).await?;
    debug!("📦️ Added {} unit(s) to category '{category}'", result.rows_affected());
    Ok(result.rows_affected())
}

pub async fn available_count(category: &str, conn: &mut SqliteConnection) -> Result<i64, sqlx::Error> {
    let count: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM inventory_units WHERE category = $1 AND state = 'Available'")
            .bind(category)
            .fetch_one(conn)
            .await?;
    Ok(count)
}

/// Claims one available unit in a single compare-and-set statement, optionally attaching it to an
/// order. Under any number of concurrent claimants a unit flips exactly once; `None` means the
/// category is sold out.
pub async fn claim_unit(
    category: &str,
    order_id: Option<&OrderId>,
    conn: &mut SqliteConnection,
) -> Result<Option<InventoryUnit>, sqlx::Error> {
    let unit = sqlx::query_as(
        r#"
        UPDATE inventory_units
        SET state = 'Reserved', order_id = $2, reserved_at = CURRENT_TIMESTAMP
        WHERE id = (
            SELECT id FROM inventory_units WHERE category = $1 AND state = 'Available' ORDER BY id LIMIT 1
        ) AND state = 'Available'
        RETURNING *;
        "#,
    )
    .bind(category)
    .bind(order_id.map(|id| id.as_str().to_string()))
    .fetch_optional(conn)
    .await?;
    trace!("📦️ Claim on '{category}': {}", if unit.is_some() { "hit" } else { "sold out" });
    Ok(unit)
}

/// Claims `quantity` units for the order, failing with `OutOfStock` as soon as the category runs
/// dry. Callers run this inside a transaction so a partial claim never survives.
pub(crate) async fn claim_units(
    category: &str,
    order_id: &OrderId,
    quantity: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<InventoryUnit>, StorefrontError> {
    let mut units = Vec::with_capacity(quantity as usize);
    for _ in 0..quantity {
        match claim_unit(category, Some(order_id), &mut *conn).await? {
            Some(unit) => units.push(unit),
            None => return Err(StorefrontError::OutOfStock(category.to_string())),
        }
    }
    Ok(units)
}

/// Reverts a reserved unit to the shelf. A unit in any other state is left alone and reported as
/// an invalid transition.
pub async fn release_unit(unit_id: i64, conn: &mut SqliteConnection) -> Result<InventoryUnit, StorefrontError> {
    let released: Option<InventoryUnit> = sqlx::query_as(
        "UPDATE inventory_units SET state = 'Available', order_id = NULL, reserved_at = NULL WHERE id = $1 AND state \
         = 'Reserved' RETURNING *",
    )
    .bind(unit_id)
    .fetch_optional(&mut *conn)
    .await?;
    match released {
        Some(unit) => Ok(unit),
        None => {
            let current: Option<InventoryUnit> =
                sqlx::query_as("SELECT * FROM inventory_units WHERE id = $1").bind(unit_id).fetch_optional(conn).await?;
            match current {
                Some(unit) => Err(StorefrontError::invalid_transition(unit.state, "Available")),
                None => Err(StorefrontError::UnitNotFound(unit_id)),
            }
        },
    }
}

/// Puts every unit reserved for the order back on the shelf. Returns the released units.
pub(crate) async fn release_units_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<InventoryUnit>, sqlx::Error> {
    let units = sqlx::query_as(
        "UPDATE inventory_units SET state = 'Available', order_id = NULL, reserved_at = NULL WHERE order_id = $1 AND \
         state = 'Reserved' RETURNING *",
    )
    .bind(order_id.as_str())
    .fetch_all(conn)
    .await?;
    Ok(units)
}

pub async fn units_for_order(order_id: &OrderId, conn: &mut SqliteConnection) -> Result<Vec<InventoryUnit>, sqlx::Error> {
    let units = sqlx::query_as("SELECT * FROM inventory_units WHERE order_id = $1 ORDER BY id")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(units)
}
