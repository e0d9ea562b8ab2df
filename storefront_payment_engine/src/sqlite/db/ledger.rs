use chrono::{DateTime, Utc};
use log::{debug, trace};
use spg_common::{TenantId, TokenAmount};
use sqlx::SqliteConnection;

use crate::{
    db_types::{Balance, LedgerEntry, LedgerEntryKind, LedgerStatus, OrderId},
    traits::StorefrontError,
};

/// Appends a ledger entry, insert-if-absent on `(order_id, kind)`. An entry that is already on
/// file is returned unchanged with `false` in the second element. The amount of an existing entry
/// is never touched.
pub async fn idempotent_insert_entry(
    tenant: &TenantId,
    order_id: &OrderId,
    kind: LedgerEntryKind,
    amount: TokenAmount,
    status: LedgerStatus,
    mature_at: DateTime<Utc>,
    conn: &mut SqliteConnection,
) -> Result<(LedgerEntry, bool), StorefrontError> {
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO ledger_entries (tenant_id, order_id, kind, amount, status, mature_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING *;
        "#,
    )
    .bind(tenant.as_str())
    .bind(order_id.as_str())
    .bind(kind)
    .bind(amount)
    .bind(status)
    .bind(mature_at)
    .fetch_one(&mut *conn)
    .await;
    match inserted {
        Ok(entry) => {
            debug!("🧾️ {kind} entry of {amount} recorded for order [{order_id}]");
            Ok((entry, true))
        },
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            let existing = fetch_entry(order_id, kind, conn).await?.ok_or_else(|| {
                StorefrontError::DatabaseError(format!("{kind} entry for {order_id} vanished mid-insert"))
            })?;
            trace!("🧾️ {kind} entry for order [{order_id}] was already on file");
            Ok((existing, false))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_entry(
    order_id: &OrderId,
    kind: LedgerEntryKind,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    let entry = sqlx::query_as("SELECT * FROM ledger_entries WHERE order_id = $1 AND kind = $2")
        .bind(order_id.as_str())
        .bind(kind)
        .fetch_optional(conn)
        .await?;
    Ok(entry)
}

pub async fn entries_for_order(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM ledger_entries WHERE order_id = $1 ORDER BY id")
        .bind(order_id.as_str())
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

pub async fn history(
    tenant: &TenantId,
    limit: i64,
    conn: &mut SqliteConnection,
) -> Result<Vec<LedgerEntry>, sqlx::Error> {
    let entries = sqlx::query_as("SELECT * FROM ledger_entries WHERE tenant_id = $1 ORDER BY created_at DESC, id DESC LIMIT $2")
        .bind(tenant.as_str())
        .bind(limit)
        .fetch_all(conn)
        .await?;
    Ok(entries)
}

/// Flips every `Pending` entry whose maturity time has passed to `Matured`. Returns the number of
/// entries that matured.
pub async fn mature_entries(now: DateTime<Utc>, conn: &mut SqliteConnection) -> Result<u64, sqlx::Error> {
    let result = sqlx::query(
        "UPDATE ledger_entries SET status = 'Matured', updated_at = CURRENT_TIMESTAMP WHERE status = 'Pending' AND \
         unixepoch(mature_at) <= $1",
    )
    .bind(now.timestamp())
    .execute(conn)
    .await?;
    Ok(result.rows_affected())
}

/// Cancels a still-pending sale entry. `None` when the sale entry is missing or no longer
/// `Pending`; the caller decides what that means.
pub(crate) async fn mark_sale_reverted(
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<LedgerEntry>, sqlx::Error> {
    let entry = sqlx::query_as(
        "UPDATE ledger_entries SET status = 'Reverted', updated_at = CURRENT_TIMESTAMP WHERE order_id = $1 AND kind \
         = 'Sale' AND status = 'Pending' RETURNING *",
    )
    .bind(order_id.as_str())
    .fetch_optional(conn)
    .await?;
    Ok(entry)
}

/// The tenant's balance, recomputed from the ledger and the tenant counters in one query.
/// `available` sums `Matured` and `Withdrawn` entries and subtracts frozen and lifetime_paid;
/// marking entries `Withdrawn` therefore never moves a balance on its own.
pub async fn balance_for_tenant(tenant: &TenantId, conn: &mut SqliteConnection) -> Result<Balance, StorefrontError> {
    let balance: Option<Balance> = sqlx::query_as(
        r#"
        SELECT
            COALESCE(SUM(CASE WHEN le.status IN ('Matured', 'Withdrawn') THEN le.amount ELSE 0 END), 0)
                - t.frozen - t.lifetime_paid AS available,
            t.frozen AS frozen,
            t.lifetime_paid AS paid,
            COALESCE(SUM(CASE WHEN le.status = 'Pending' THEN le.amount ELSE 0 END), 0) AS pending
        FROM tenants t
        LEFT JOIN ledger_entries le ON le.tenant_id = t.id
        WHERE t.id = $1
        GROUP BY t.id;
        "#,
    )
    .bind(tenant.as_str())
    .fetch_optional(conn)
    .await?;
    balance.ok_or_else(|| StorefrontError::TenantNotFound(tenant.clone()))
}

/// Marks matured entries `Withdrawn`, oldest first, until their sum covers `amount`. This is an
/// audit trail of which profits a payout consumed; balances do not depend on it.
pub(crate) async fn mark_withdrawn_fifo(
    tenant: &TenantId,
    amount: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<u64, StorefrontError> {
    let matured: Vec<LedgerEntry> = sqlx::query_as(
        "SELECT * FROM ledger_entries WHERE tenant_id = $1 AND status = 'Matured' ORDER BY mature_at ASC, id ASC",
    )
    .bind(tenant.as_str())
    .fetch_all(&mut *conn)
    .await?;
    let mut covered = TokenAmount::default();
    let mut ids = Vec::new();
    for entry in matured {
        if covered >= amount {
            break;
        }
        covered += entry.amount;
        ids.push(entry.id);
    }
    if ids.is_empty() {
        return Ok(0);
    }
    let id_list = ids.iter().map(|id| id.to_string()).collect::<Vec<String>>().join(",");
    let query = format!(
        "UPDATE ledger_entries SET status = 'Withdrawn', withdrawn_at = CURRENT_TIMESTAMP, updated_at = \
         CURRENT_TIMESTAMP WHERE id IN ({id_list})"
    );
    let result = sqlx::query(&query).execute(conn).await?;
    trace!("🧾️ {} entr(ies) of {tenant} marked Withdrawn to cover {amount}", result.rows_affected());
    Ok(result.rows_affected())
}
