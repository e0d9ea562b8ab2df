use chrono::Duration;
use log::{debug, trace};
use spg_common::{TenantId, TokenAmount};
use sqlx::SqliteConnection;

use crate::{
    db_types::{NewTransfer, Order, OrderId, TransferRecord},
    traits::StorefrontError,
};

/// Records an observed transfer, keyed on the transaction id. A txid that is already on file is
/// returned as-is with `false` in the second element; two concurrent observers cannot both insert.
pub async fn idempotent_insert(
    transfer: NewTransfer,
    conn: &mut SqliteConnection,
) -> Result<(TransferRecord, bool), StorefrontError> {
    let txid = transfer.txid.clone();
    let inserted = sqlx::query_as(
        r#"
            INSERT INTO transfers (txid, sender, recipient, contract, raw_amount, amount, block_time, tenant_id, state)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING *;
        "#,
    )
    .bind(transfer.txid)
    .bind(transfer.sender.as_base58().to_string())
    .bind(transfer.recipient.as_base58().to_string())
    .bind(transfer.contract.as_base58().to_string())
    .bind(transfer.raw_amount)
    .bind(transfer.amount)
    .bind(transfer.block_time)
    .bind(transfer.tenant_id)
    .bind(transfer.state)
    .fetch_one(&mut *conn)
    .await;
    match inserted {
        Ok(record) => {
            debug!("💸️ Transfer {txid} recorded");
            Ok((record, true))
        },
        Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
            let existing =
                fetch_transfer(&txid, conn).await?.ok_or_else(|| StorefrontError::TransferNotFound(txid.clone()))?;
            trace!("💸️ Transfer {txid} was already on file");
            Ok((existing, false))
        },
        Err(e) => Err(e.into()),
    }
}

pub async fn fetch_transfer(txid: &str, conn: &mut SqliteConnection) -> Result<Option<TransferRecord>, sqlx::Error> {
    let transfer =
        sqlx::query_as("SELECT * FROM transfers WHERE txid = $1").bind(txid).fetch_optional(conn).await?;
    Ok(transfer)
}

/// Transfers of the tenant still awaiting a match, oldest block first.
pub async fn fetch_awaiting_match(
    tenant: &TenantId,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransferRecord>, sqlx::Error> {
    let transfers = sqlx::query_as(
        "SELECT * FROM transfers WHERE tenant_id = $1 AND state IN ('Unprocessed', 'Matched', 'Unmatched') ORDER BY \
         block_time ASC, txid ASC",
    )
    .bind(tenant.as_str())
    .fetch_all(conn)
    .await?;
    Ok(transfers)
}

/// Parks a transfer as `Unmatched`. The guard keeps `Credited` and `Rejected` records exactly
/// where they are.
pub async fn mark_unmatched(txid: &str, conn: &mut SqliteConnection) -> Result<TransferRecord, StorefrontError> {
    let parked: Option<TransferRecord> = sqlx::query_as(
        "UPDATE transfers SET state = 'Unmatched', updated_at = CURRENT_TIMESTAMP WHERE txid = $1 AND state IN \
         ('Unprocessed', 'Matched', 'Unmatched') RETURNING *",
    )
    .bind(txid)
    .fetch_optional(&mut *conn)
    .await?;
    match parked {
        Some(record) => Ok(record),
        None => {
            let current =
                fetch_transfer(txid, conn).await?.ok_or_else(|| StorefrontError::TransferNotFound(txid.to_string()))?;
            Err(StorefrontError::invalid_transition(current.state, "Unmatched"))
        },
    }
}

/// The idempotency gate of the crediting transaction: claims the transfer for `order_id` via
/// compare-and-set. `None` means the record was missing or already terminal, and nothing was
/// written.
pub(crate) async fn claim_for_credit(
    txid: &str,
    order_id: &OrderId,
    conn: &mut SqliteConnection,
) -> Result<Option<TransferRecord>, sqlx::Error> {
    let claimed = sqlx::query_as(
        "UPDATE transfers SET state = 'Credited', order_id = $1, updated_at = CURRENT_TIMESTAMP WHERE txid = $2 AND \
         state IN ('Unprocessed', 'Matched', 'Unmatched') RETURNING *",
    )
    .bind(order_id.as_str())
    .bind(txid)
    .fetch_optional(conn)
    .await?;
    Ok(claimed)
}

/// The mirror of `orders::candidates_for_transfer`, for manual rescans by order: uncredited
/// transfers of the order's tenant compatible by amount and time window, oldest block first.
pub(crate) async fn compatible_with_order(
    order: &Order,
    window: Duration,
    tolerance: TokenAmount,
    conn: &mut SqliteConnection,
) -> Result<Vec<TransferRecord>, sqlx::Error> {
    let created = order.created_at.timestamp();
    let transfers = sqlx::query_as(
        r#"
        SELECT * FROM transfers
        WHERE tenant_id = $1 AND state IN ('Unprocessed', 'Matched', 'Unmatched')
          AND amount BETWEEN $2 AND $3
          AND unixepoch(block_time) BETWEEN $4 AND $5
        ORDER BY block_time ASC, txid ASC;
        "#,
    )
    .bind(order.tenant_id.as_str())
    .bind(order.total_price - tolerance)
    .bind(order.total_price + tolerance)
    .bind(created - window.num_seconds())
    .bind(created + window.num_seconds())
    .fetch_all(conn)
    .await?;
    Ok(transfers)
}
